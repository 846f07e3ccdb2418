//! Framing layer for the binary transport.
//!
//! The wire unit is a length-prefixed [`Frame`]; [`Connection`] reassembles
//! frames from a TCP read half, tolerating arbitrary fragmentation. Header
//! and body contents are opaque at this layer.

pub use connection::Connection;
pub use frame::Frame;
pub use frame::FRAME_MAGIC;
pub use frame::FRAME_PRELUDE_SIZE;
mod connection;
mod frame;
