//! # Serialization Formats
//!
//! Object serializers for parameter and return values.
//! Supports bincode (default), JSON (debugging/interop), and MessagePack (compact encoding).
//!
//! Both ends of a connection must use the same format; it is not negotiated on the wire.
//!
//! ## Usage
//! ```rust
//! use wirecall::core::serialization::SerializationFormat;
//!
//! let format = SerializationFormat::MessagePack;
//! let bytes = format.encode(&(3_i32, "three")).unwrap();
//! let back: (i32, String) = format.decode(&bytes).unwrap();
//! assert_eq!(back, (3, "three".to_string()));
//! ```

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
    /// Compact binary format (MessagePack, efficient)
    #[serde(rename = "messagepack")]
    MessagePack,
}

impl SerializationFormat {
    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
            SerializationFormat::MessagePack => "MessagePack",
        }
    }

    /// Serialize a value to bytes
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializationFormat::Bincode => {
                bincode::serialize(value).map_err(|e| RpcError::SerializeError(e.to_string()))
            }
            SerializationFormat::Json => {
                serde_json::to_vec(value).map_err(|e| RpcError::SerializeError(e.to_string()))
            }
            SerializationFormat::MessagePack => {
                rmp_serde::to_vec(value).map_err(|e| RpcError::SerializeError(e.to_string()))
            }
        }
    }

    /// Deserialize a value from bytes
    pub fn decode<T: DeserializeOwned>(self, data: &[u8]) -> Result<T> {
        match self {
            SerializationFormat::Bincode => {
                bincode::deserialize(data).map_err(|e| RpcError::DeserializeError(e.to_string()))
            }
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| RpcError::DeserializeError(e.to_string())),
            SerializationFormat::MessagePack => rmp_serde::from_slice(data)
                .map_err(|e| RpcError::DeserializeError(e.to_string())),
        }
    }
}
