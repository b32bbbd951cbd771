//! # Frame Codec
//!
//! Tokio codec that turns a byte stream into typed frames.
//!
//! Frames carry no outer length prefix: a frame is a message type followed by a payload
//! whose fields are either fixed-size integers or length-prefixed blobs. The decoder
//! walks the payload layout of the incoming type to find the frame boundary and waits
//! for more bytes until the whole frame is buffered.
//!
//! [`ServerCodec`] reads requests and writes responses, [`ClientCodec`] the reverse.
//!
//! ## Security
//! - Frames larger than the configured maximum (16 MB by default) are rejected before
//!   they are buffered
//! - Negative lengths and unknown message types end the connection

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::wire::MessageType;
use crate::error::{constants, Result, RpcError};
use crate::protocol::message::{Field, Request, Response, WireMessage};
use bytes::{Buf, BufMut, BytesMut};
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Codec reading `In` frames and writing `Out` frames.
#[derive(Debug)]
pub struct FrameCodec<In, Out> {
    max_payload_size: usize,
    _marker: PhantomData<fn() -> (In, Out)>,
}

/// Host side: decodes [`Request`], encodes [`Response`].
pub type ServerCodec = FrameCodec<Request, Response>;

/// Client side: decodes [`Response`], encodes [`Request`].
pub type ClientCodec = FrameCodec<Response, Request>;

impl<In, Out> FrameCodec<In, Out> {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            max_payload_size,
            _marker: PhantomData,
        }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl<In, Out> Default for FrameCodec<In, Out> {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl<In, Out> Clone for FrameCodec<In, Out> {
    fn clone(&self) -> Self {
        Self::new(self.max_payload_size)
    }
}

/// Length of the payload starting at `src[0]`, or `None` if more bytes are needed.
fn payload_len(src: &[u8], layout: &[Field], max: usize) -> Result<Option<usize>> {
    let mut offset = 0usize;
    for field in layout {
        if src.len() < offset + 4 {
            return Ok(None);
        }
        match field {
            Field::I32 => offset += 4,
            Field::Blob => {
                let mut len_bytes = [0u8; 4];
                len_bytes.copy_from_slice(&src[offset..offset + 4]);
                let len = i32::from_le_bytes(len_bytes);
                if len < 0 {
                    return Err(RpcError::InvalidFrame(format!(
                        "{}: {len}",
                        constants::ERR_NEGATIVE_LENGTH
                    )));
                }
                offset += 4 + len as usize;
            }
        }
        if offset > max {
            return Err(RpcError::OversizedPacket(offset));
        }
    }
    if src.len() < offset {
        return Ok(None);
    }
    Ok(Some(offset))
}

impl<In: WireMessage, Out> Decoder for FrameCodec<In, Out> {
    type Item = In;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut type_bytes = [0u8; 4];
        type_bytes.copy_from_slice(&src[..4]);
        let msg_type = MessageType::try_from(i32::from_le_bytes(type_bytes))?;
        let layout = In::layout(msg_type).ok_or(RpcError::UnexpectedMessage)?;

        let Some(len) = payload_len(&src[4..], layout, self.max_payload_size)? else {
            return Ok(None);
        };

        src.advance(4);
        let payload = src.split_to(len);
        In::decode_payload(msg_type, &payload).map(Some)
    }
}

impl<In, Out: WireMessage> Encoder<Out> for FrameCodec<In, Out> {
    type Error = RpcError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        dst.put_i32_le(item.message_type().as_i32());
        item.encode_payload(dst)?;

        let payload_len = dst.len() - start - 4;
        if payload_len > self.max_payload_size {
            dst.truncate(start);
            return Err(RpcError::OversizedPacket(payload_len));
        }
        Ok(())
    }
}
