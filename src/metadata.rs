//! Fixed-width metadata record: the serialized `(shape, dtype)` pair a
//! publisher writes once at init and every late-joining subscriber reads at
//! signin time.
//!
//! Layout (§6): 40 bytes total, split `(21, 19)`. The first 21 bytes carry
//! `d0xd1x...xdN` padded right with `*`. Byte 21 is the `|` separator. The
//! remaining 18 bytes carry the dtype name, also padded right with `*`.

use crate::dtype::DType;
use crate::error::{FrameBusError, Result};

pub const METADATA_WIDTH: usize = 40;
const SHAPE_FIELD_WIDTH: usize = 21;
const DTYPE_FIELD_WIDTH: usize = 18;
const SEPARATOR: u8 = b'|';
const PAD: u8 = b'*';

/// Encodes `shape` and `dtype` into the fixed-width record. Panics if the
/// shape or dtype name would overflow its field — both are effectively
/// bounded (shapes up to 4 dims of modest magnitude; six fixed dtype names),
/// so this is a programmer error, not a runtime condition.
pub fn encode(shape: &[usize], dtype: DType) -> [u8; METADATA_WIDTH] {
    let shape_str = shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x");
    assert!(
        shape_str.len() <= SHAPE_FIELD_WIDTH,
        "shape {:?} does not fit the {}-byte metadata field",
        shape,
        SHAPE_FIELD_WIDTH
    );
    let dtype_str = dtype.name();
    debug_assert!(dtype_str.len() <= DTYPE_FIELD_WIDTH);

    let mut buf = [PAD; METADATA_WIDTH];
    buf[..shape_str.len()].copy_from_slice(shape_str.as_bytes());
    buf[SHAPE_FIELD_WIDTH] = SEPARATOR;
    let dtype_start = SHAPE_FIELD_WIDTH + 1;
    buf[dtype_start..dtype_start + dtype_str.len()].copy_from_slice(dtype_str.as_bytes());
    buf
}

/// Decodes a fixed-width record back into `(shape, dtype)`.
pub fn decode(bytes: &[u8]) -> Result<(Vec<usize>, DType)> {
    if bytes.len() != METADATA_WIDTH {
        return Err(FrameBusError::InvalidMetadata(format!(
            "expected {METADATA_WIDTH} bytes, got {}",
            bytes.len()
        )));
    }
    if bytes[SHAPE_FIELD_WIDTH] != SEPARATOR {
        return Err(FrameBusError::InvalidMetadata(
            "missing '|' separator at the expected offset".into(),
        ));
    }

    let shape_field = trim_padding(&bytes[..SHAPE_FIELD_WIDTH]);
    let dtype_start = SHAPE_FIELD_WIDTH + 1;
    let dtype_field = trim_padding(&bytes[dtype_start..dtype_start + DTYPE_FIELD_WIDTH]);

    let shape_str = std::str::from_utf8(shape_field)
        .map_err(|e| FrameBusError::InvalidMetadata(e.to_string()))?;
    let dtype_str = std::str::from_utf8(dtype_field)
        .map_err(|e| FrameBusError::InvalidMetadata(e.to_string()))?;

    if shape_str.is_empty() {
        return Err(FrameBusError::InvalidMetadata("empty shape field".into()));
    }

    let shape = shape_str
        .split('x')
        .map(|d| {
            d.parse::<usize>()
                .map_err(|e| FrameBusError::InvalidMetadata(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let dtype = DType::parse(dtype_str)?;
    Ok((shape, dtype))
}

fn trim_padding(field: &[u8]) -> &[u8] {
    let end = field
        .iter()
        .rposition(|&b| b != PAD)
        .map(|i| i + 1)
        .unwrap_or(0);
    &field[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_dtype_and_common_shapes() {
        let dtypes = [
            DType::U8,
            DType::I16,
            DType::I32,
            DType::I64,
            DType::F32,
            DType::F64,
        ];
        let shapes: [&[usize]; 4] = [&[3], &[2, 2], &[288, 320, 1], &[1, 2, 3, 4]];
        for dtype in dtypes {
            for shape in shapes {
                let encoded = encode(shape, dtype);
                let (decoded_shape, decoded_dtype) = decode(&encoded).unwrap();
                assert_eq!(decoded_shape, shape);
                assert_eq!(decoded_dtype, dtype);
            }
        }
    }

    #[test]
    fn layout_matches_the_documented_byte_offsets() {
        let encoded = encode(&[2, 2], DType::U8);
        assert_eq!(encoded.len(), METADATA_WIDTH);
        assert_eq!(&encoded[0..3], b"2x2");
        assert_eq!(encoded[SHAPE_FIELD_WIDTH], b'|');
        assert_eq!(&encoded[SHAPE_FIELD_WIDTH + 1..SHAPE_FIELD_WIDTH + 6], b"uint8");
    }

    #[test]
    fn rejects_wrong_length() {
        let err = decode(&[0u8; 39]).unwrap_err();
        assert!(matches!(err, FrameBusError::InvalidMetadata(_)));
    }

    #[test]
    fn rejects_missing_separator() {
        let mut encoded = encode(&[288, 320, 1], DType::I16);
        encoded[SHAPE_FIELD_WIDTH] = b'*';
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, FrameBusError::InvalidMetadata(_)));
    }

    #[test]
    fn rejects_unsupported_dtype_in_record() {
        let mut encoded = encode(&[1], DType::U8);
        let dtype_start = SHAPE_FIELD_WIDTH + 1;
        encoded[dtype_start..dtype_start + 7].copy_from_slice(b"complex");
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, FrameBusError::UnsupportedDtype(_)));
    }
}
