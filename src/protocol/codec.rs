use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;

use crate::{AppError, AppResult};

/// Body (de)serialization seam. Concrete implementations are supplied by the
/// codec layer (protobuf and friends) and selected per connection by the
/// protocol name negotiated at login; the transport never inspects body
/// contents itself.
pub trait PayloadCodec: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Encodes an outgoing body for the wire.
    fn encode(&self, body: BytesMut) -> AppResult<BytesMut>;

    /// Decodes a body received from the wire.
    fn decode(&self, body: BytesMut) -> AppResult<BytesMut>;
}

impl fmt::Debug for dyn PayloadCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadCodec({})", self.name())
    }
}

/// Pass-through codec for the native protocol; bodies travel as-is.
#[derive(Debug, Default)]
pub struct RawCodec;

pub const RAW_PROTOCOL: &str = "highway";
pub const NO_COMPRESSION: &str = "none";

impl PayloadCodec for RawCodec {
    fn name(&self) -> &str {
        RAW_PROTOCOL
    }

    fn encode(&self, body: BytesMut) -> AppResult<BytesMut> {
        Ok(body)
    }

    fn decode(&self, body: BytesMut) -> AppResult<BytesMut> {
        Ok(body)
    }
}

/// Maps a negotiated (protocol, compression) pair to a codec. Both sides of
/// a connection consult the registry when handling the login handshake.
#[derive(Debug)]
pub struct CodecRegistry {
    codecs: DashMap<String, Arc<dyn PayloadCodec>>,
    compressions: DashMap<String, ()>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let registry = CodecRegistry {
            codecs: DashMap::new(),
            compressions: DashMap::new(),
        };
        registry.register(Arc::new(RawCodec));
        registry.register_compression(NO_COMPRESSION);
        registry
    }

    pub fn register(&self, codec: Arc<dyn PayloadCodec>) {
        self.codecs.insert(codec.name().to_string(), codec);
    }

    pub fn register_compression(&self, zip_name: &str) {
        self.compressions.insert(zip_name.to_string(), ());
    }

    /// Validates a login preference and returns the codec to use for the
    /// connection. Unknown names fail the login, not the socket.
    pub fn select(&self, protocol: &str, zip_name: &str) -> AppResult<Arc<dyn PayloadCodec>> {
        if !self.compressions.contains_key(zip_name) {
            return Err(AppError::CodecNotFound(format!(
                "compression '{}' is not supported",
                zip_name
            )));
        }
        self.codecs
            .get(protocol)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                AppError::CodecNotFound(format!("protocol '{}' is not supported", protocol))
            })
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        CodecRegistry::new()
    }
}
