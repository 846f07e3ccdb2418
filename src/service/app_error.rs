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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
#[error("transport error")]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// framing errors, fatal to the connection
    #[error("malformed protocol: {0}")]
    MalformedProtocol(String),

    #[error("frame too large: {0}")]
    FrameTooLarge(String),

    /// marker error, the buffer does not yet hold a complete frame
    Incomplete,

    /// connection lifecycle errors
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("connection not ready: {0}")]
    ConnectionNotReady(String),

    #[error("no available connection: {0}")]
    NoAvailableConnection(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    /// per-request errors, reported to the specific caller only
    #[error("request timed out: {0}")]
    RequestTimeout(String),

    #[error("operation not found: {0}")]
    OperationNotFound(String),

    #[error("codec not found: {0}")]
    CodecNotFound(String),

    #[error("remote error, status {status}: {message}")]
    RemoteError { status: i32, message: String },
}
