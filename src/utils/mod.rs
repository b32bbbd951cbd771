//! # Utility Modules
//!
//! Supporting utilities for cryptography, compression, logging, statistics and timing.
//!
//! ## Components
//! - **Crypto**: AES-256-CBC session cipher and SHA-256 hash chain helpers
//! - **Compression**: LZ4 and Zstd with size limits and thresholds
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Statistics sink and thread-safe counters
//! - **Timeout**: Async timeout wrappers
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Decompression bomb protection (16MB limit)
//! - Memory zeroing for sensitive data (zeroize crate)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{Metrics, NullStats, StatsSink};
