//! Typed (de)serialization at the cache edge
//!
//! Layers only ever see bytes. Values that travel through the
//! [`MultiLayerCache`](super::MultiLayerCache) implement [`CacheCodec`]; plain
//! serde types get it for free through the [`Json`] wrapper.

use super::errors::{CacheError, CacheResult};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Conversion between a typed value and the bytes a layer stores
pub trait CacheCodec: Sized {
    fn encode(&self) -> CacheResult<Bytes>;
    fn decode(data: &Bytes) -> CacheResult<Self>;
}

/// JSON encoding for any serde type
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T> CacheCodec for Json<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self) -> CacheResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.0)?))
    }

    fn decode(data: &Bytes) -> CacheResult<Self> {
        Ok(Json(serde_json::from_slice(data)?))
    }
}

/// Frame a JSON header followed by a raw binary body:
/// `[u32 header length, big endian][header][body]`
pub fn encode_framed<H: Serialize>(header: &H, body: &Bytes) -> CacheResult<Bytes> {
    let header = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| CacheError::SerializationError("frame header too large".to_string()))?;

    let mut buf = BytesMut::with_capacity(4 + header.len() + body.len());
    buf.put_u32(header_len);
    buf.put_slice(&header);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Inverse of [`encode_framed`]; the body is a zero-copy slice of `data`
pub fn decode_framed<H: DeserializeOwned>(data: &Bytes) -> CacheResult<(H, Bytes)> {
    if data.len() < 4 {
        return Err(CacheError::SerializationError(
            "frame shorter than its length prefix".to_string(),
        ));
    }
    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body_start = 4 + header_len;
    if data.len() < body_start {
        return Err(CacheError::SerializationError(format!(
            "frame truncated: header declares {header_len} bytes, {} available",
            data.len() - 4
        )));
    }

    let header = serde_json::from_slice(&data[4..body_start])?;
    Ok((header, data.slice(body_start..)))
}
