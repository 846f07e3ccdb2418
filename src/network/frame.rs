use bytes::{Buf, BufMut, BytesMut};

use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// Fixed prefix identifying the protocol and its version. A peer presenting
/// anything else is treated as protocol corruption and disconnected.
pub const FRAME_MAGIC: [u8; 7] = *b"hwy.tcp";

/// magic + msg_id(8) + header_len(4) + body_len(4)
pub const FRAME_PRELUDE_SIZE: usize = FRAME_MAGIC.len() + 8 + 4 + 4;

const HEADER_LEN_OFFSET: usize = FRAME_MAGIC.len() + 8;
const BODY_LEN_OFFSET: usize = HEADER_LEN_OFFSET + 4;

/// One wire unit of the binary protocol. Header and body are opaque byte
/// sequences whose interpretation belongs to the protocol layer; the frame
/// only carries the correlation id and the two lengths.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub msg_id: u64,
    pub header: BytesMut,
    pub body: BytesMut,
}

impl Frame {
    /// Serializes a frame: `magic || msg_id(8) || header_len(4) || body_len(4)
    /// || header || body`, all integers big-endian.
    pub fn encode(msg_id: u64, header: &[u8], body: &[u8]) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(FRAME_PRELUDE_SIZE + header.len() + body.len());
        buffer.put_slice(&FRAME_MAGIC);
        buffer.put_u64(msg_id);
        buffer.put_u32(header.len() as u32);
        buffer.put_u32(body.len() as u32);
        buffer.put_slice(header);
        buffer.put_slice(body);
        buffer
    }

    /// Checks whether `buffer` starts with a complete frame. Returns
    /// `Incomplete` while more bytes are needed, or a fatal error when the
    /// stream is corrupted or the announced size exceeds `max_frame_size`.
    pub fn check(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<()> {
        let magic_probe = FRAME_MAGIC.len().min(buffer.remaining());
        if buffer.get(0..magic_probe).unwrap() != &FRAME_MAGIC[..magic_probe] {
            return Err(AppError::MalformedProtocol(format!(
                "bad frame magic {:?}",
                buffer.get(0..magic_probe).unwrap()
            )));
        }
        if buffer.remaining() < FRAME_PRELUDE_SIZE {
            return Err(Incomplete);
        }

        let header_len = u32::from_be_bytes(
            buffer
                .get(HEADER_LEN_OFFSET..HEADER_LEN_OFFSET + 4)
                .unwrap()
                .try_into()
                .unwrap(),
        ) as usize;
        let body_len = u32::from_be_bytes(
            buffer
                .get(BODY_LEN_OFFSET..BODY_LEN_OFFSET + 4)
                .unwrap()
                .try_into()
                .unwrap(),
        ) as usize;

        let total = header_len + body_len;
        if total > max_frame_size {
            return Err(AppError::FrameTooLarge(format!(
                "frame of length {} is too large",
                total
            )));
        }
        if buffer.remaining() < FRAME_PRELUDE_SIZE + total {
            buffer.reserve(FRAME_PRELUDE_SIZE + total - buffer.remaining());
            return Err(Incomplete);
        }
        Ok(())
    }

    /// Consumes as many leading bytes as needed to produce zero or one
    /// complete frame, leaving any unconsumed bytes in `buffer` for the next
    /// call. Tolerates being fed one byte at a time and multiple frames
    /// already resident in the buffer (the first is returned, the rest stay).
    pub fn parse(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<Option<Frame>> {
        match Frame::check(buffer, max_frame_size) {
            Ok(_) => {
                buffer.advance(FRAME_MAGIC.len());
                let msg_id = buffer.get_u64();
                let header_len = buffer.get_u32() as usize;
                let body_len = buffer.get_u32() as usize;
                let header = buffer.split_to(header_len);
                let body = buffer.split_to(body_len);
                Ok(Some(Frame {
                    msg_id,
                    header,
                    body,
                }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
