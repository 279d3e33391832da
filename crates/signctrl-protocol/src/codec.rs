//! Length-delimited frame codec for remote-signer messages.
//!
//! Every message on the wire is a JSON body behind a 4-byte big-endian
//! length prefix:
//!
//! ```text
//! +------------------+-------------------+
//! | Length (4 bytes) | JSON message body |
//! +------------------+-------------------+
//! ```
//!
//! Bodies larger than the configured limit are skipped and bodies that do
//! not decode are surfaced as [`Frame::Malformed`] instead of a decoder
//! error, so a single bad message never tears down the stream.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::{ProtocolError, SignerRequest, SignerResponse, FRAME_HEADER_LEN, MAX_REMOTE_SIGNER_MSG_SIZE};

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<T> {
    Message(T),
    /// The frame was consumed but its content is unusable.
    Malformed(String),
}

#[derive(Debug, Clone, Copy, Default)]
enum DecodeState {
    #[default]
    ReadingLength,
    ReadingBody { len: usize },
    /// Discarding an oversize body.
    Skipping { remaining: usize, len: usize },
}

/// Codec decoding `In` and encoding `Out`.
#[derive(Debug)]
pub struct FrameCodec<In, Out> {
    state: DecodeState,
    max_size: usize,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Signer side: reads requests, writes responses.
pub type SignerCodec = FrameCodec<SignerRequest, SignerResponse>;

/// Validator side: reads responses, writes requests.
pub type ValidatorCodec = FrameCodec<SignerResponse, SignerRequest>;

impl<In, Out> FrameCodec<In, Out> {
    pub fn new() -> Self {
        Self::with_max_size(MAX_REMOTE_SIGNER_MSG_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: DecodeState::ReadingLength,
            max_size,
            _marker: PhantomData,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<In, Out> Default for FrameCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for FrameCodec<In, Out> {
    type Item = Frame<In>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::ReadingLength => {
                    if src.len() < FRAME_HEADER_LEN {
                        return Ok(None);
                    }
                    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
                    src.advance(FRAME_HEADER_LEN);

                    if len > self.max_size {
                        self.state = DecodeState::Skipping { remaining: len, len };
                    } else {
                        src.reserve(len);
                        self.state = DecodeState::ReadingBody { len };
                    }
                }
                DecodeState::ReadingBody { len } => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let body = src.split_to(len);
                    self.state = DecodeState::ReadingLength;

                    let frame = match serde_json::from_slice::<In>(&body) {
                        Ok(msg) => Frame::Message(msg),
                        Err(e) => Frame::Malformed(format!("undecodable message body: {e}")),
                    };
                    return Ok(Some(frame));
                }
                DecodeState::Skipping { remaining, len } => {
                    let n = remaining.min(src.len());
                    src.advance(n);
                    let left = remaining - n;
                    if left > 0 {
                        self.state = DecodeState::Skipping { remaining: left, len };
                        return Ok(None);
                    }
                    self.state = DecodeState::ReadingLength;
                    return Ok(Some(Frame::Malformed(format!(
                        "message too large: {len} bytes (limit: {})",
                        self.max_size
                    ))));
                }
            }
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for FrameCodec<In, Out> {
    type Error = ProtocolError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > self.max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                limit: self.max_size,
            });
        }
        dst.reserve(FRAME_HEADER_LEN + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
