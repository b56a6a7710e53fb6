//! Wire message encode/decode helpers over MessagePack.
//!
//! Outgoing messages are always written into a transport-provided buffer of
//! at most `Transport::BUFFER_SIZE` bytes; blowing past that bound means the
//! message can never fit a frame and is treated as fatal by callers.

use std::io::Cursor;

use crate::utils::WinterholdError;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes `msg` into the front of `buffer`, returning the number of
/// bytes written. Fails if the encoded form does not fit.
pub fn wire_encode<M: Serialize>(
    buffer: &mut [u8],
    msg: &M,
) -> Result<usize, WinterholdError> {
    let mut cursor = Cursor::new(buffer);
    rmp_serde::encode::write(&mut cursor, msg)?;
    Ok(cursor.position() as usize)
}

/// Deserializes a message of type `M` from `bytes`.
pub fn wire_decode<M: DeserializeOwned>(
    bytes: &[u8],
) -> Result<M, WinterholdError> {
    Ok(rmp_serde::decode::from_slice(bytes)?)
}
