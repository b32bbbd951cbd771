//! # Parameter Codec
//!
//! Encodes an ordered array of values into a single block, used for invocation
//! arguments as well as for return values.
//!
//! ## Block Layout
//! ```text
//! [count:i32] then per slot:
//!   [tag:u8 = 0]                    null slot
//!   [tag:u8 = 1] [len:i32] [bytes]  serialized value
//!   [tag:u8 = 2] [len:i32] [bytes]  serialized value, LZ4-compressed
//!   [tag:u8 = 3] [len:i32] [bytes]  serialized value, Zstd-compressed
//! ```
//!
//! Values are serialized individually with the connection's [`SerializationFormat`];
//! a slot is compressed when compression is enabled and its serialized length reaches
//! the threshold.

use crate::config::clamp_compression_threshold;
use crate::core::serialization::SerializationFormat;
use crate::core::wire;
use crate::error::{constants, Result, RpcError};
use crate::utils::compression::{self, CompressionKind};
use bytes::BufMut;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One element of a block: `None` is a null slot, otherwise the serialized value.
pub type Slot = Option<Vec<u8>>;

const TAG_NULL: u8 = 0;
const TAG_RAW: u8 = 1;
const TAG_LZ4: u8 = 2;
const TAG_ZSTD: u8 = 3;

fn tag_for(kind: CompressionKind) -> u8 {
    match kind {
        CompressionKind::Lz4 => TAG_LZ4,
        CompressionKind::Zstd => TAG_ZSTD,
    }
}

/// When and how slots are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    pub kind: CompressionKind,
    pub threshold: usize,
}

impl CompressionPolicy {
    /// Build a policy, raising the threshold to the supported floor.
    pub fn new(kind: CompressionKind, threshold: usize) -> Self {
        Self {
            kind,
            threshold: clamp_compression_threshold(threshold),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamCodec {
    format: SerializationFormat,
    compression: Option<CompressionPolicy>,
}

impl ParamCodec {
    pub fn new(format: SerializationFormat) -> Self {
        Self {
            format,
            compression: None,
        }
    }

    pub fn with_compression(mut self, policy: Option<CompressionPolicy>) -> Self {
        self.compression = policy;
        self
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn compression(&self) -> Option<CompressionPolicy> {
        self.compression
    }

    /// Serialize a single value into slot bytes.
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        self.format.encode(value)
    }

    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        self.format.decode(bytes)
    }

    /// Encode slots into a block, compressing the ones that reach the threshold.
    pub fn encode_block(&self, slots: &[Slot]) -> Result<Vec<u8>> {
        let count =
            i32::try_from(slots.len()).map_err(|_| RpcError::OversizedPacket(slots.len()))?;

        let mut out = Vec::with_capacity(
            4 + slots
                .iter()
                .map(|s| 5 + s.as_ref().map_or(0, Vec::len))
                .sum::<usize>(),
        );
        wire::put_i32(&mut out, count);

        for slot in slots {
            match slot {
                None => out.put_u8(TAG_NULL),
                Some(bytes) => match self.compression {
                    Some(policy) => {
                        let (data, compressed) =
                            compression::maybe_compress(bytes, policy.kind, policy.threshold)?;
                        out.put_u8(if compressed {
                            tag_for(policy.kind)
                        } else {
                            TAG_RAW
                        });
                        wire::put_blob(&mut out, &data)?;
                    }
                    None => {
                        out.put_u8(TAG_RAW);
                        wire::put_blob(&mut out, bytes)?;
                    }
                },
            }
        }

        Ok(out)
    }

    /// Decode a block back into slots, decompressing as the slot tags say.
    pub fn decode_block(&self, data: &[u8]) -> Result<Vec<Slot>> {
        let mut src = data;
        let count = wire::get_i32(&mut src)?;
        if count < 0 {
            return Err(RpcError::InvalidFrame(format!(
                "{}: {count}",
                constants::ERR_NEGATIVE_LENGTH
            )));
        }
        // every slot needs at least its tag byte
        if count as usize > src.len() {
            return Err(RpcError::InvalidFrame(
                constants::ERR_TRUNCATED_BLOCK.to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = wire::get_u8(&mut src)?;
            let slot = match tag {
                TAG_NULL => None,
                TAG_RAW => Some(wire::get_blob(&mut src)?),
                TAG_LZ4 => Some(compression::decompress(
                    &wire::get_blob(&mut src)?,
                    CompressionKind::Lz4,
                )?),
                TAG_ZSTD => Some(compression::decompress(
                    &wire::get_blob(&mut src)?,
                    CompressionKind::Zstd,
                )?),
                other => {
                    return Err(RpcError::InvalidFrame(format!(
                        "{}: {other}",
                        constants::ERR_UNKNOWN_SLOT_TAG
                    )))
                }
            };
            slots.push(slot);
        }

        wire::expect_end(&src)?;
        Ok(slots)
    }
}
