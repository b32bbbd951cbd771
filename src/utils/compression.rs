//! Parameter compression.
//!
//! Values at or above the service's compression threshold are compressed with the
//! configured [`CompressionKind`]. The algorithm travels with each value as a slot tag, so
//! the decoding side never needs to be configured to match.

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Lz4,
    Zstd,
}

/// Maximum output size for decompression (align with MAX_PAYLOAD_SIZE to prevent DoS)
const MAX_DECOMPRESSION_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `RpcError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| RpcError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// Output is capped at MAX_PAYLOAD_SIZE.
///
/// # Errors
/// Returns `RpcError::DecompressionFailure` if:
/// - Decompression fails
/// - Output size exceeds MAX_DECOMPRESSION_SIZE
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            if data.len() < 4 {
                return Err(RpcError::DecompressionFailure);
            }

            // lz4_flex prepends the uncompressed size as 4-byte little-endian;
            // reject oversized claims before it allocates
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSION_SIZE {
                return Err(RpcError::DecompressionFailure);
            }

            let decompressed = lz4_flex::decompress_size_prepended(data)
                .map_err(|_| RpcError::DecompressionFailure)?;

            if decompressed.len() > MAX_DECOMPRESSION_SIZE {
                return Err(RpcError::DecompressionFailure);
            }
            Ok(decompressed)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            let mut reader =
                zstd::stream::Decoder::new(data).map_err(|_| RpcError::DecompressionFailure)?;

            use std::io::Read;
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > MAX_DECOMPRESSION_SIZE {
                            return Err(RpcError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(RpcError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

/// Compress data if it meets the configured threshold, otherwise return it unchanged.
/// Returns the output bytes and a flag indicating whether compression was applied.
///
/// A value exactly at the threshold is compressed.
pub fn maybe_compress(
    data: &[u8],
    kind: CompressionKind,
    threshold_bytes: usize,
) -> Result<(Vec<u8>, bool)> {
    if data.len() < threshold_bytes {
        Ok((data.to_vec(), false))
    } else {
        Ok((compress(data, kind)?, true))
    }
}
