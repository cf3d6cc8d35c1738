//! Vector blob codec. Blobs carry a 16-byte header (magic `BRNY`, LE u32
//! dimension, dtype byte, 7 reserved zero bytes) followed by the raw
//! little-endian IEEE-754 float32 payload.

use crate::{CoreError, Result};
use bytes::{BufMut, Bytes, BytesMut};

pub const VECTOR_MAGIC: [u8; 4] = *b"BRNY";

const HEADER_LEN: usize = 16;

/// Element type tag stored in the blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DType {
    F32 = 0x01,
}

/// Total blob length for a vector of `dim` float32 elements.
pub fn vector_blob_len(dim: usize) -> usize {
    HEADER_LEN + dim * 4
}

/// Encode a vector into its canonical blob form. The caller is expected to
/// have validated dimensionality and finiteness already; encoding rejects
/// non-finite values anyway so a corrupt vector can never reach storage.
pub fn encode_vector(vector: &[f32]) -> Result<Bytes> {
    for (i, x) in vector.iter().enumerate() {
        if !x.is_finite() {
            return Err(CoreError::validation(
                "vector",
                format!("component {i} is {x}; vectors must be finite"),
            ));
        }
    }
    let mut buf = BytesMut::with_capacity(vector_blob_len(vector.len()));
    buf.put_slice(&VECTOR_MAGIC);
    buf.put_u32_le(vector.len() as u32);
    buf.put_u8(DType::F32 as u8);
    buf.put_bytes(0, 7);
    for x in vector {
        buf.put_f32_le(*x);
    }
    Ok(buf.freeze())
}

/// Decode a vector blob, verifying magic, dtype, declared dimension and
/// payload length. `expected_dim` is the database dimension; a stored blob
/// that disagrees is corrupt, not merely mismatched input.
pub fn decode_vector(blob: &[u8], expected_dim: Option<usize>) -> Result<Vec<f32>> {
    if blob.len() < HEADER_LEN {
        return Err(CoreError::integrity(format!(
            "vector blob truncated: {} bytes, header needs {HEADER_LEN}",
            blob.len()
        )));
    }
    if blob[0..4] != VECTOR_MAGIC {
        return Err(CoreError::integrity(format!(
            "vector blob magic mismatch: {:02x?}",
            &blob[0..4]
        )));
    }
    let dim = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]) as usize;
    if blob[8] != DType::F32 as u8 {
        return Err(CoreError::integrity(format!("unknown vector dtype 0x{:02x}", blob[8])));
    }
    if let Some(expected) = expected_dim {
        if dim != expected {
            return Err(CoreError::integrity(format!(
                "stored vector dimension {dim} != database dimension {expected}"
            )));
        }
    }
    let payload = &blob[HEADER_LEN..];
    if payload.len() != dim * 4 {
        return Err(CoreError::integrity(format!(
            "vector payload length {} != dim {dim} * 4",
            payload.len()
        )));
    }
    let mut vector = Vec::with_capacity(dim);
    for chunk in payload.chunks_exact(4) {
        vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(vector)
}
