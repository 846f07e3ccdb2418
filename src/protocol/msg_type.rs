use crate::{AppError, AppResult};

/// Message-kind discriminator carried first in every frame header. This is
/// the only header field the connection layer interprets; everything after
/// it belongs to the login or routing payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Login = 0,
    Request = 1,
    Response = 2,
}

impl MsgType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> AppResult<MsgType> {
        match value {
            0 => Ok(MsgType::Login),
            1 => Ok(MsgType::Request),
            2 => Ok(MsgType::Response),
            other => Err(AppError::MalformedProtocol(format!(
                "unknown msg type {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        for t in [MsgType::Login, MsgType::Request, MsgType::Response] {
            assert_eq!(MsgType::from_u8(t.as_u8()).unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_value() {
        assert!(MsgType::from_u8(100).is_err());
    }
}
