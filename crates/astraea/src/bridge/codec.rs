//! Framed codec for decision-process communication.
//!
//! Frame layout: `[u16 big-endian payload length][payload]`, where the payload
//! is a JSON document. Uses LengthDelimitedCodec for framing + serde_json for
//! serialization, both directions.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 2;

/// Largest payload the length prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("frame truncated: {declared} bytes declared, {available} available")]
    Truncated { declared: usize, available: usize },

    #[error("payload of {0} bytes does not fit the 2-byte length field")]
    TooLarge(usize),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("framing failed: {0}")]
    Io(#[from] io::Error),
}

/// Codec that frames messages with a 2-byte length prefix and serializes with JSON.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(HEADER_LEN)
                .max_frame_length(MAX_PAYLOAD_LEN)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = FormatError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = FormatError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        if json.len() > MAX_PAYLOAD_LEN {
            return Err(FormatError::TooLarge(json.len()));
        }
        tracing::trace!(json_size_bytes = json.len(), "Encoding frame");
        self.inner.encode(Bytes::from(json), dst)?;
        Ok(())
    }
}

/// Encode one message into a complete frame.
pub fn encode<T: Serialize>(item: &T) -> Result<Vec<u8>, FormatError> {
    let mut buf = BytesMut::new();
    JsonCodec::<&T>::new().encode(item, &mut buf)?;
    Ok(buf.to_vec())
}

/// Decode the first frame in `bytes`.
///
/// Bytes past the declared length are ignored. A short buffer is an error,
/// never a partial document.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, FormatError> {
    let declared = declared_len(bytes)?;
    let available = bytes.len() - HEADER_LEN;
    if available < declared {
        return Err(FormatError::Truncated {
            declared,
            available,
        });
    }

    let mut buf = BytesMut::from(&bytes[..HEADER_LEN + declared]);
    JsonCodec::<T>::new()
        .decode(&mut buf)?
        .ok_or(FormatError::Truncated {
            declared,
            available,
        })
}

/// Payload length announced by a frame header.
pub fn declared_len(header: &[u8]) -> Result<usize, FormatError> {
    match header {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo]) as usize),
        _ => Err(FormatError::Truncated {
            declared: HEADER_LEN,
            available: header.len(),
        }),
    }
}
