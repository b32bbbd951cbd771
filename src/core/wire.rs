//! Wire primitives.
//!
//! ```text
//! int32   : 4 bytes, little-endian, signed
//! string  : int32 byte length, then UTF-8 bytes
//! blob    : int32 byte length, then raw bytes
//! frame   : int32 message type, then the type-specific payload
//! ```
//!
//! Readers operate on a fully buffered payload and never allocate more than the
//! remaining input, so a hostile length prefix cannot trigger a large allocation.

use crate::error::{constants, Result, RpcError};
use bytes::{Buf, BufMut};

/// Message type tag written at the head of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    TerminateConnection = 0,
    MethodInvocation = 1,
    ReturnValues = 2,
    UnknownMethod = 3,
    ThrowException = 4,
    SyncInterface = 5,
    ZkInitiate = 6,
    ZkProof = 7,
}

impl MessageType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for MessageType {
    type Error = RpcError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            0 => MessageType::TerminateConnection,
            1 => MessageType::MethodInvocation,
            2 => MessageType::ReturnValues,
            3 => MessageType::UnknownMethod,
            4 => MessageType::ThrowException,
            5 => MessageType::SyncInterface,
            6 => MessageType::ZkInitiate,
            7 => MessageType::ZkProof,
            other => {
                return Err(RpcError::InvalidFrame(format!(
                    "{}: {other}",
                    constants::ERR_UNKNOWN_MESSAGE_TYPE
                )))
            }
        })
    }
}

pub fn put_i32<B: BufMut>(dst: &mut B, value: i32) {
    dst.put_i32_le(value);
}

/// Write a length-prefixed blob.
pub fn put_blob<B: BufMut>(dst: &mut B, bytes: &[u8]) -> Result<()> {
    let len = i32::try_from(bytes.len()).map_err(|_| RpcError::OversizedPacket(bytes.len()))?;
    dst.put_i32_le(len);
    dst.put_slice(bytes);
    Ok(())
}

/// Write a length-prefixed UTF-8 string.
pub fn put_string<B: BufMut>(dst: &mut B, value: &str) -> Result<()> {
    put_blob(dst, value.as_bytes())
}

pub fn get_i32<B: Buf>(src: &mut B) -> Result<i32> {
    if src.remaining() < 4 {
        return Err(RpcError::InvalidFrame(
            constants::ERR_TRUNCATED_BLOCK.to_string(),
        ));
    }
    Ok(src.get_i32_le())
}

pub fn get_u8<B: Buf>(src: &mut B) -> Result<u8> {
    if !src.has_remaining() {
        return Err(RpcError::InvalidFrame(
            constants::ERR_TRUNCATED_BLOCK.to_string(),
        ));
    }
    Ok(src.get_u8())
}

/// Read a length, rejecting negative values and lengths past the end of input.
pub fn get_len<B: Buf>(src: &mut B) -> Result<usize> {
    let len = get_i32(src)?;
    if len < 0 {
        return Err(RpcError::InvalidFrame(format!(
            "{}: {len}",
            constants::ERR_NEGATIVE_LENGTH
        )));
    }
    let len = len as usize;
    if len > src.remaining() {
        return Err(RpcError::InvalidFrame(
            constants::ERR_TRUNCATED_BLOCK.to_string(),
        ));
    }
    Ok(len)
}

pub fn get_blob<B: Buf>(src: &mut B) -> Result<Vec<u8>> {
    let len = get_len(src)?;
    let mut out = vec![0u8; len];
    src.copy_to_slice(&mut out);
    Ok(out)
}

pub fn get_string<B: Buf>(src: &mut B) -> Result<String> {
    let bytes = get_blob(src)?;
    String::from_utf8(bytes)
        .map_err(|_| RpcError::InvalidFrame(constants::ERR_INVALID_UTF8.to_string()))
}

/// Fail if a fully parsed payload still has unread bytes.
pub fn expect_end<B: Buf>(src: &B) -> Result<()> {
    if src.has_remaining() {
        Err(RpcError::InvalidFrame(format!(
            "{}: {}",
            constants::ERR_TRAILING_BYTES,
            src.remaining()
        )))
    } else {
        Ok(())
    }
}
