use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::network::Frame;
use crate::AppResult;

/// Read side of one TCP socket.
///
/// Owns the bytes received but not yet forming a complete frame. The buffer
/// is exclusively owned by this connection and shrinks as frames complete.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_frame_size: usize,
    pub peer_addr: String,
}

impl Connection {
    pub fn new(
        reader: OwnedReadHalf,
        peer_addr: String,
        read_buffer_size: usize,
        max_frame_size: usize,
    ) -> Connection {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(read_buffer_size),
            max_frame_size,
            peer_addr,
        }
    }

    /// Reads one frame from the connection.
    ///
    /// Keeps pulling bytes from the stream until a complete frame can be
    /// parsed. A magic mismatch or an oversized length is returned as an
    /// error and the connection must be closed; there is no recovery from a
    /// corrupted stream.
    ///
    /// If the peer closes the connection between frames, `None` is returned.
    /// If it closes while a frame is partially sent, an error is returned.
    pub async fn read_frame(&mut self) -> AppResult<Option<Frame>> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.buffer, self.max_frame_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    // peer closed the connection gracefully
                    Ok(None)
                } else {
                    // peer closed the connection while sending a frame
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    use crate::AppError;

    use super::*;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_read_frame_across_writes() {
        let (mut client, server) = socket_pair().await;
        let (reader, _writer) = server.into_split();
        let mut connection = Connection::new(reader, "test".to_string(), 64, 1024);

        let encoded = Frame::encode(11, b"hh", b"payload");
        let (first, second) = encoded.split_at(9);
        client.write_all(first).await.unwrap();
        client.flush().await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(second).await.unwrap();
        client.flush().await.unwrap();

        let frame = connection.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.msg_id, 11);
        assert_eq!(&frame.body[..], b"payload");
    }

    #[tokio::test]
    async fn test_graceful_close_returns_none() {
        let (client, server) = socket_pair().await;
        let (reader, _writer) = server.into_split();
        let mut connection = Connection::new(reader, "test".to_string(), 64, 1024);

        drop(client);
        assert!(connection.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_an_error() {
        let (mut client, server) = socket_pair().await;
        let (reader, _writer) = server.into_split();
        let mut connection = Connection::new(reader, "test".to_string(), 64, 1024);

        let encoded = Frame::encode(3, b"header", b"body");
        client.write_all(&encoded[..encoded.len() - 1]).await.unwrap();
        client.flush().await.unwrap();
        drop(client);

        let err = connection.read_frame().await.unwrap_err();
        assert!(matches!(err, AppError::IoError(_)));
    }
}
