use bytes::{Buf, BufMut, BytesMut};

use crate::{AppError, AppResult};

/// Wire helpers shared by the header and login payload types. Strings are
/// u16-length-prefixed UTF-8, big-endian like the rest of the protocol.
pub(crate) fn write_str(buffer: &mut BytesMut, value: &str) {
    debug_assert!(value.len() <= u16::MAX as usize);
    buffer.put_u16(value.len() as u16);
    buffer.put_slice(value.as_bytes());
}

pub(crate) fn read_str(buffer: &mut BytesMut) -> AppResult<String> {
    if buffer.remaining() < 2 {
        return Err(AppError::MalformedProtocol(
            "can not read a string length".to_string(),
        ));
    }
    let length = buffer.get_u16() as usize;
    if buffer.remaining() < length {
        return Err(AppError::MalformedProtocol(format!(
            "string length {} exceeds remaining {}",
            length,
            buffer.remaining()
        )));
    }
    let raw = buffer.split_to(length);
    String::from_utf8(raw.to_vec())
        .map_err(|e| AppError::MalformedProtocol(format!("invalid utf8 string: {}", e)))
}

pub(crate) fn read_i32(buffer: &mut BytesMut) -> AppResult<i32> {
    if buffer.remaining() < 4 {
        return Err(AppError::MalformedProtocol(
            "can not read an i32".to_string(),
        ));
    }
    Ok(buffer.get_i32())
}

pub(crate) fn read_u8(buffer: &mut BytesMut) -> AppResult<u8> {
    if buffer.remaining() < 1 {
        return Err(AppError::MalformedProtocol("can not read a u8".to_string()));
    }
    Ok(buffer.get_u8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_round_trip() {
        let mut buffer = BytesMut::new();
        write_str(&mut buffer, "provider.calc");
        assert_eq!(read_str(&mut buffer).unwrap(), "provider.calc");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_truncated_str() {
        let mut buffer = BytesMut::new();
        write_str(&mut buffer, "abcdef");
        let mut truncated = buffer.split_to(4);
        assert!(read_str(&mut truncated).is_err());
    }
}
