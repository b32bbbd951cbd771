//! # Core Protocol Components
//!
//! Low-level framing, parameter encoding and value serialization.
//!
//! ## Components
//! - **Wire**: message type tags and little-endian primitives
//! - **Codec**: Tokio codecs for framing requests and responses over byte streams
//! - **Params**: parameter/return value blocks with threshold compression
//! - **Serialization**: pluggable object serializers (bincode, JSON, MessagePack)
//!
//! ## Wire Format
//! ```text
//! [MessageType(4)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 16MB (prevents memory exhaustion)
//! - Length validation before allocation

pub mod codec;
pub mod params;
pub mod serialization;
pub mod wire;
