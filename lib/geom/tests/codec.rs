use nalgebra::DMatrix;
use quickcheck::TestResult;
use std::io::Read;
use quickcheck_macros::quickcheck;
use tableau_geom::{
    codec::{self, EncodedShape, FOOTER_LEN},
    CodecError, ScalarType,
};

#[test]
fn footer_holds_shape() {
    let buffer = DMatrix::from_row_slice(2, 3, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let bytes = codec::compress(&buffer).unwrap();

    let footer = &bytes[bytes.len() - FOOTER_LEN..];
    assert_eq!(footer, &[2, 0, 0, 0, 3]);
    assert_eq!(
        EncodedShape::read(&bytes).unwrap(),
        EncodedShape {
            scalar: ScalarType::F32,
            rows: 2,
            cols: 3
        }
    );

    let decoded = codec::decompress::<f32>(&bytes).unwrap();
    assert_eq!(decoded, buffer);
}

#[test]
fn payload_is_row_major() {
    // column-major storage must not leak into the encoding
    let buffer = DMatrix::from_row_slice(2, 2, &[1u8, 2, 3, 4]);
    let bytes = codec::compress(&buffer).unwrap();
    let stream = &bytes[1..bytes.len() - FOOTER_LEN];

    let mut raw = Vec::new();
    flate2::read::ZlibDecoder::new(stream)
        .read_to_end(&mut raw)
        .unwrap();
    assert_eq!(raw, [1, 2, 3, 4]);
    assert_eq!(codec::decompress::<u8>(&bytes).unwrap()[(0, 1)], 2);
}

#[test]
fn empty_buffer() {
    let buffer = DMatrix::<u32>::zeros(0, 3);
    let bytes = codec::compress(&buffer).unwrap();
    let decoded = codec::decompress::<u32>(&bytes).unwrap();
    assert_eq!(decoded.shape(), (0, 3));
}

#[test]
fn too_many_columns() {
    let buffer = DMatrix::<u8>::zeros(1, 256);
    assert!(matches!(
        codec::compress(&buffer),
        Err(CodecError::TooManyColumns(256))
    ));
    assert!(codec::compress(&DMatrix::<u8>::zeros(1, 255)).is_ok());
}

#[test]
fn truncated() {
    assert!(matches!(
        codec::decompress::<f32>(&[0x04, 0, 0, 0, 0]),
        Err(CodecError::Truncated(5))
    ));
}

#[test]
fn scalar_mismatch() {
    let bytes = codec::compress(&DMatrix::<u16>::zeros(4, 3)).unwrap();
    assert!(matches!(
        codec::decompress::<f32>(&bytes),
        Err(CodecError::ScalarMismatch {
            expected: ScalarType::F32,
            found: ScalarType::U16
        })
    ));
}

#[test]
fn unknown_tag() {
    let mut bytes = codec::compress(&DMatrix::<u16>::zeros(4, 3)).unwrap();
    bytes[0] = 0x7f;
    assert!(matches!(
        codec::decompress::<u16>(&bytes),
        Err(CodecError::UnknownScalarTag(0x7f))
    ));
}

#[test]
fn footer_disagrees_with_payload() {
    let mut bytes = codec::compress(&DMatrix::<u32>::zeros(4, 3)).unwrap();
    let rows_at = bytes.len() - FOOTER_LEN;
    bytes[rows_at] = 5;
    assert!(matches!(
        codec::decompress::<u32>(&bytes),
        Err(CodecError::PayloadSize {
            expected: 60,
            found: 48
        })
    ));
}

#[test]
fn huge_footer_is_rejected() {
    let mut bytes = codec::compress(&DMatrix::<f32>::zeros(0, 0)).unwrap();
    let rows_at = bytes.len() - FOOTER_LEN;
    bytes[rows_at..rows_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
    bytes[rows_at + 4] = 255;
    assert!(matches!(
        codec::decompress::<f32>(&bytes),
        Err(CodecError::PayloadSize { found: 0, .. })
    ));
}

#[test]
fn base64() {
    let buffer = DMatrix::from_row_slice(3, 1, &[0.5f32, -1.25, 8.0]);
    let text = codec::matrix_to_base64(&buffer).unwrap();
    assert!(text
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"+/=".contains(&b)));
    assert_eq!(codec::matrix_from_base64::<f32>(&text).unwrap(), buffer);
    assert!(matches!(
        codec::matrix_from_base64::<f32>("not base64!"),
        Err(CodecError::Base64(_))
    ));
}

#[quickcheck]
fn u16_buffers_survive(values: Vec<u16>, cols: u8) -> TestResult {
    let cols = cols as usize % 8 + 1;
    let rows = values.len() / cols;
    let buffer = DMatrix::from_row_slice(rows, cols, &values[..rows * cols]);
    let bytes = match codec::compress(&buffer) {
        Ok(bytes) => bytes,
        Err(e) => return TestResult::error(e.to_string()),
    };
    match codec::decompress::<u16>(&bytes) {
        Ok(decoded) => TestResult::from_bool(decoded == buffer),
        Err(e) => TestResult::error(e.to_string()),
    }
}
