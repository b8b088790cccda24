//! LZ-class payload compression (§4.1).
//!
//! The compressed form is `u32 uncompressed_len (big-endian) | lz4 block`.
//! The length prefix lets the decoder verify the decompressed size, but
//! only after `decompress` has first bounded it against `MAX_PAYLOAD_LEN`
//! (§4.1) — without that bound a small compressed frame could declare an
//! arbitrary `uncompressed_len` and turn into a multi-gigabyte allocation
//! before any size-match check ever runs.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use bytes::{BufMut, Bytes, BytesMut};

// Layer 3: Internal module imports
use crate::error::WireError;
use crate::wire::packet::MAX_PAYLOAD_LEN;

/// Payloads at or above this size are eligible for compression (§4.1 default).
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 512;

/// Compress `payload` if it is at least `threshold` bytes AND the
/// compressed form (including the 4-byte length prefix) is smaller.
/// Returns `None` when compression is not worth doing.
pub fn maybe_compress(payload: &[u8], threshold: usize) -> Option<Bytes> {
    if payload.len() < threshold {
        return None;
    }
    let compressed = lz4_flex::compress(payload);
    if compressed.len() + 4 >= payload.len() {
        return None;
    }
    let mut out = BytesMut::with_capacity(compressed.len() + 4);
    out.put_u32(payload.len() as u32);
    out.put_slice(&compressed);
    Some(out.freeze())
}

/// Decompress a payload produced by `maybe_compress`, verifying the
/// recorded `uncompressed_len` against the actual decompressed size.
pub fn decompress(data: &[u8]) -> Result<Bytes, WireError> {
    if data.len() < 4 {
        return Err(WireError::Malformed(
            "compressed payload shorter than length prefix".into(),
        ));
    }
    let declared = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if declared as usize > MAX_PAYLOAD_LEN {
        // Reject before allocating: `declared` is an attacker-controlled
        // hint used as the decompressor's allocation size, and a
        // small compressed frame can claim any u32 here.
        return Err(WireError::FrameTooLarge {
            actual: declared,
            max: MAX_PAYLOAD_LEN as u32,
        });
    }
    let body = &data[4..];
    let decompressed = lz4_flex::decompress(body, declared as usize)
        .map_err(|e| WireError::DecompressionFailed(e.to_string()))?;
    if decompressed.len() as u32 != declared {
        return Err(WireError::CompressionLengthMismatch {
            declared,
            actual: decompressed.len() as u32,
        });
    }
    Ok(Bytes::from(decompressed))
}
