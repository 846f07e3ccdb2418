use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::protocol::primitives::{read_i32, read_str, read_u8, write_str};
use crate::protocol::MsgType;
use crate::AppResult;

pub const STATUS_OK: i32 = 0;
pub const STATUS_SERVER_ERROR: i32 = 1;
pub const STATUS_OPERATION_NOT_FOUND: i32 = 2;
pub const STATUS_DECODE_ERROR: i32 = 3;
pub const STATUS_LOGIN_REQUIRED: i32 = 4;
pub const STATUS_LOGIN_REJECTED: i32 = 5;

/// Identity of the operation a request frame targets. The remainder of the
/// argument data lives in the frame body and is opaque to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingInfo {
    pub dest_service: String,
    pub schema_id: String,
    pub operation_id: String,
}

impl RoutingInfo {
    pub fn new(dest_service: &str, schema_id: &str, operation_id: &str) -> Self {
        RoutingInfo {
            dest_service: dest_service.to_string(),
            schema_id: schema_id.to_string(),
            operation_id: operation_id.to_string(),
        }
    }
}

impl fmt::Display for RoutingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.dest_service, self.schema_id, self.operation_id
        )
    }
}

/// Header of LOGIN and REQUEST frames.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub msg_type: MsgType,
    pub route: RoutingInfo,
}

impl RequestHeader {
    /// Control frame header; routing fields stay empty.
    pub fn login() -> Self {
        RequestHeader {
            msg_type: MsgType::Login,
            route: RoutingInfo::new("", "", ""),
        }
    }

    pub fn request(route: RoutingInfo) -> Self {
        RequestHeader {
            msg_type: MsgType::Request,
            route,
        }
    }

    pub fn write_to(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.msg_type.as_u8());
        write_str(buffer, &self.route.dest_service);
        write_str(buffer, &self.route.schema_id);
        write_str(buffer, &self.route.operation_id);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::new();
        self.write_to(&mut buffer);
        buffer
    }

    pub fn read_from(buffer: &mut BytesMut) -> AppResult<RequestHeader> {
        let msg_type = MsgType::from_u8(read_u8(buffer)?)?;
        let dest_service = read_str(buffer)?;
        let schema_id = read_str(buffer)?;
        let operation_id = read_str(buffer)?;
        Ok(RequestHeader {
            msg_type,
            route: RoutingInfo {
                dest_service,
                schema_id,
                operation_id,
            },
        })
    }
}

/// Header of RESPONSE frames. A nonzero status carries a structured error to
/// the caller; the body is only meaningful when the status is ok.
#[derive(Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub msg_type: MsgType,
    pub status: i32,
    pub message: String,
}

impl ResponseHeader {
    pub fn ok() -> Self {
        ResponseHeader {
            msg_type: MsgType::Response,
            status: STATUS_OK,
            message: String::new(),
        }
    }

    pub fn error(status: i32, message: &str) -> Self {
        ResponseHeader {
            msg_type: MsgType::Response,
            status,
            message: message.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn write_to(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.msg_type.as_u8());
        buffer.put_i32(self.status);
        write_str(buffer, &self.message);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::new();
        self.write_to(&mut buffer);
        buffer
    }

    pub fn read_from(buffer: &mut BytesMut) -> AppResult<ResponseHeader> {
        let msg_type = MsgType::from_u8(read_u8(buffer)?)?;
        let status = read_i32(buffer)?;
        let message = read_str(buffer)?;
        Ok(ResponseHeader {
            msg_type,
            status,
            message,
        })
    }
}
