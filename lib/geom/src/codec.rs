//! Compact binary encoding of numeric buffers.
//!
//! # Wire format
//!
//! ```text
//! [u8 scalar tag] [zlib stream of the row-major components] [u32 rows, little-endian] [u8 columns]
//! ```
//!
//! The shape footer is always the final five bytes, so a reader can recover the buffer's shape
//! without inflating anything. The leading tag lets [`decompress`] refuse to reinterpret a buffer
//! as a different scalar type.

use crate::buffer::{row_major, BufferScalar, ScalarType};
use base64::Engine;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use nalgebra::DMatrix;
use std::io::{Read, Write};

/// Length of the scalar tag preceding the zlib stream.
pub const HEADER_LEN: usize = 1;
/// Length of the shape footer following the zlib stream.
pub const FOOTER_LEN: usize = 5;
/// Widest buffer which may be encoded.
pub const MAX_COLUMNS: usize = u8::MAX as usize;
/// Upper bound on the ratio of inflated to deflated size.
const MAX_INFLATE_RATIO: usize = 1032;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer has {0} columns; at most 255 can be encoded")]
    TooManyColumns(usize),
    #[error("buffer has {0} rows; at most 4294967295 can be encoded")]
    TooManyRows(usize),
    #[error("encoded buffer is {0} bytes long; a valid buffer is at least 6")]
    Truncated(usize),
    #[error("unknown scalar tag {0:#04x}")]
    UnknownScalarTag(u8),
    #[error("expected a buffer of {expected:?}, found {found:?}")]
    ScalarMismatch {
        expected: ScalarType,
        found: ScalarType,
    },
    #[error("inflated payload is {found} bytes; shape footer implies {expected}")]
    PayloadSize { expected: usize, found: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

/// Shape information recovered from an encoded buffer without inflating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedShape {
    pub scalar: ScalarType,
    pub rows: usize,
    pub cols: usize,
}

impl EncodedShape {
    /// Read the scalar tag and shape footer of an encoded buffer.
    pub fn read(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN + FOOTER_LEN {
            return Err(CodecError::Truncated(bytes.len()));
        }
        let scalar = ScalarType::from_tag(bytes[0]).ok_or(CodecError::UnknownScalarTag(bytes[0]))?;
        let footer = &bytes[bytes.len() - FOOTER_LEN..];
        let rows = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]) as usize;
        let cols = footer[4] as usize;
        Ok(Self { scalar, rows, cols })
    }

    /// Number of payload bytes the shape implies.
    pub fn payload_len(&self) -> usize {
        self.rows
            .saturating_mul(self.cols)
            .saturating_mul(self.scalar.size())
    }
}

/// Encode a buffer.
pub fn compress<T: BufferScalar>(matrix: &DMatrix<T>) -> Result<Vec<u8>, CodecError> {
    let (rows, cols) = matrix.shape();
    let cols = u8::try_from(cols).map_err(|_| CodecError::TooManyColumns(cols))?;
    let rows = u32::try_from(rows).map_err(|_| CodecError::TooManyRows(rows))?;

    let mut payload = Vec::with_capacity(matrix.len() * T::SCALAR.size());
    for value in row_major(matrix) {
        value.write_le(&mut payload);
    }

    let mut encoder = ZlibEncoder::new(vec![T::SCALAR.tag()], Compression::default());
    encoder.write_all(&payload)?;
    let mut bytes = encoder.finish()?;
    bytes.extend_from_slice(&rows.to_le_bytes());
    bytes.push(cols);

    tracing::trace!(
        scalar = ?T::SCALAR,
        rows,
        cols,
        raw = payload.len(),
        encoded = bytes.len(),
        "compressed buffer"
    );
    Ok(bytes)
}

/// Decode a buffer previously produced by [`compress`] with the same scalar type.
pub fn decompress<T: BufferScalar>(bytes: &[u8]) -> Result<DMatrix<T>, CodecError> {
    let shape = EncodedShape::read(bytes)?;
    if shape.scalar != T::SCALAR {
        return Err(CodecError::ScalarMismatch {
            expected: T::SCALAR,
            found: shape.scalar,
        });
    }

    let expected = shape.payload_len();
    let stream = &bytes[HEADER_LEN..bytes.len() - FOOTER_LEN];
    // the footer is untrusted
    let capacity = expected.min(stream.len().saturating_mul(MAX_INFLATE_RATIO));
    let mut payload = Vec::with_capacity(capacity);
    // read one byte past the expected length so that oversized payloads are noticed
    ZlibDecoder::new(stream)
        .take(expected as u64 + 1)
        .read_to_end(&mut payload)?;
    if payload.len() != expected {
        return Err(CodecError::PayloadSize {
            expected,
            found: payload.len(),
        });
    }

    let values = payload
        .chunks_exact(T::SCALAR.size())
        .map(T::read_le)
        .collect::<Vec<_>>();
    Ok(DMatrix::from_row_slice(shape.rows, shape.cols, &values))
}

/// Standard Base64, with padding.
pub fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Inverse of [`base64_encode`].
pub fn base64_decode(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

/// [`compress`] a buffer, then encode the result as base64 text.
pub fn matrix_to_base64<T: BufferScalar>(matrix: &DMatrix<T>) -> Result<String, CodecError> {
    Ok(base64_encode(&compress(matrix)?))
}

/// Inverse of [`matrix_to_base64`].
pub fn matrix_from_base64<T: BufferScalar>(text: &str) -> Result<DMatrix<T>, CodecError> {
    decompress(&base64_decode(text)?)
}
