// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Protocol payloads carried inside frames: the message-kind discriminator,
//! request/response headers, the login handshake bodies, and the codec seam
//! selected by login negotiation.

pub use codec::CodecRegistry;
pub use codec::PayloadCodec;
pub use codec::RawCodec;
pub use codec::{NO_COMPRESSION, RAW_PROTOCOL};
pub use header::RequestHeader;
pub use header::ResponseHeader;
pub use header::RoutingInfo;
pub use header::{
    STATUS_DECODE_ERROR, STATUS_LOGIN_REJECTED, STATUS_LOGIN_REQUIRED, STATUS_OK,
    STATUS_OPERATION_NOT_FOUND, STATUS_SERVER_ERROR,
};
pub use login::LoginRequest;
pub use login::LoginResponse;
pub use msg_type::MsgType;

mod codec;
mod header;
mod login;
mod msg_type;
mod primitives;
