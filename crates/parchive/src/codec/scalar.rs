//! Fixed-width, order-preserving encodings of scalar values.
//!
//! All values are stored big-endian so that unsigned lexicographic comparison
//! of the bytes equals comparison of the unsigned integers they spell.
//!
//! ```text
//! Type            Size  Transform
//! ----            ----  ---------
//! i16             2     bits ^ 0x8000
//! i32             4     bits ^ 0x8000_0000
//! i64             8     bits ^ 0x8000_0000_0000_0000
//! f64             8     negative: !bits, otherwise bits ^ sign
//! hres timestamp  12    i64 millis (sign flipped) ‖ u32 picos (raw)
//! ```

use crate::error::{ArchiveError, Result};

const SIGN_16: u16 = 1 << 15;
const SIGN_32: u32 = 1 << 31;
const SIGN_64: u64 = 1 << 63;

/// Picoseconds per millisecond; the remainder of an instant is below this.
pub const PICOS_PER_MILLI: u32 = 1_000_000_000;

/// Encoded size of an `i16` column.
pub const SHORT_LEN: usize = 2;
/// Encoded size of an `i32` column.
pub const INT_LEN: usize = 4;
/// Encoded size of an `i64` column.
pub const LONG_LEN: usize = 8;
/// Encoded size of an `f64` column.
pub const DOUBLE_LEN: usize = 8;
/// Encoded size of a high-resolution timestamp column.
pub const HRES_TIMESTAMP_LEN: usize = 12;

/// A high-resolution instant: milliseconds plus a sub-millisecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HresInstant {
    millis: i64,
    picos: u32,
}

impl HresInstant {
    /// Creates an instant, rejecting a remainder of a full millisecond or more.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidValue`] if `picos` is out of range.
    pub fn new(millis: i64, picos: u32) -> Result<Self> {
        if picos >= PICOS_PER_MILLI {
            return Err(ArchiveError::InvalidValue(format!(
                "picosecond remainder {} out of range [0, {})",
                picos, PICOS_PER_MILLI
            )));
        }
        Ok(Self { millis, picos })
    }

    /// Creates an instant on a whole millisecond.
    pub fn from_millis(millis: i64) -> Self {
        Self { millis, picos: 0 }
    }

    /// Milliseconds part.
    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Sub-millisecond remainder in picoseconds.
    pub fn picos(&self) -> u32 {
        self.picos
    }
}

/// Maps an `i16` to an unsigned key with the same ordering.
pub fn short_key(v: i16) -> u16 {
    (v as u16) ^ SIGN_16
}

/// Maps an `i32` to an unsigned key with the same ordering.
pub fn int_key(v: i32) -> u32 {
    (v as u32) ^ SIGN_32
}

/// Maps an `i64` to an unsigned key with the same ordering.
pub fn long_key(v: i64) -> u64 {
    (v as u64) ^ SIGN_64
}

/// Maps an `f64` bit pattern to an unsigned key with the same ordering.
///
/// Negative values get every bit flipped, non-negative values only the sign
/// bit. NaN and infinities go through the same transform.
pub fn double_key(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & SIGN_64 != 0 {
        !bits
    } else {
        bits ^ SIGN_64
    }
}

/// Inverse of [`double_key`].
pub fn double_from_key(key: u64) -> f64 {
    let bits = if key & SIGN_64 != 0 {
        key ^ SIGN_64
    } else {
        !key
    };
    f64::from_bits(bits)
}

/// Encodes an `i16`.
pub fn encode_short(v: i16) -> [u8; SHORT_LEN] {
    short_key(v).to_be_bytes()
}

/// Decodes an `i16`.
pub fn decode_short(b: [u8; SHORT_LEN]) -> i16 {
    (u16::from_be_bytes(b) ^ SIGN_16) as i16
}

/// Encodes an `i32`.
pub fn encode_int(v: i32) -> [u8; INT_LEN] {
    int_key(v).to_be_bytes()
}

/// Decodes an `i32`.
pub fn decode_int(b: [u8; INT_LEN]) -> i32 {
    (u32::from_be_bytes(b) ^ SIGN_32) as i32
}

/// Encodes an `i64`.
pub fn encode_long(v: i64) -> [u8; LONG_LEN] {
    long_key(v).to_be_bytes()
}

/// Decodes an `i64`.
pub fn decode_long(b: [u8; LONG_LEN]) -> i64 {
    (u64::from_be_bytes(b) ^ SIGN_64) as i64
}

/// Encodes an `f64`.
pub fn encode_double(v: f64) -> [u8; DOUBLE_LEN] {
    double_key(v).to_be_bytes()
}

/// Decodes an `f64`.
pub fn decode_double(b: [u8; DOUBLE_LEN]) -> f64 {
    double_from_key(u64::from_be_bytes(b))
}

/// Encodes a high-resolution instant into its 12-byte layout.
pub fn encode_instant(v: HresInstant) -> [u8; HRES_TIMESTAMP_LEN] {
    let mut out = [0u8; HRES_TIMESTAMP_LEN];
    out[..8].copy_from_slice(&encode_long(v.millis));
    out[8..].copy_from_slice(&v.picos.to_be_bytes());
    out
}

/// Decodes a high-resolution instant.
///
/// # Errors
///
/// Returns [`ArchiveError::Decode`] if the remainder is a millisecond or more.
pub fn decode_instant(b: [u8; HRES_TIMESTAMP_LEN]) -> Result<HresInstant> {
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&b[..8]);
    let mut picos = [0u8; 4];
    picos.copy_from_slice(&b[8..]);
    let picos = u32::from_be_bytes(picos);
    HresInstant::new(decode_long(millis), picos).map_err(|_| {
        ArchiveError::Decode(format!(
            "encoded picosecond remainder {} is not below {}",
            picos, PICOS_PER_MILLI
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_flip_layout() {
        assert_eq!(encode_short(0), [0x80, 0x00]);
        assert_eq!(encode_short(-1), [0x7F, 0xFF]);
        assert_eq!(encode_int(i32::MIN), [0, 0, 0, 0]);
        assert_eq!(encode_long(i64::MAX), [0xFF; 8]);
    }

    #[test]
    fn test_double_layout_across_zero() {
        assert_eq!(encode_double(0.0), [0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_double(-0.0), [0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(encode_double(-f64::MIN_POSITIVE) < encode_double(-0.0));
        assert!(encode_double(0.0) < encode_double(f64::from_bits(1)));
    }

    #[test]
    fn test_double_special_values_roundtrip() {
        for v in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, -f64::NAN, f64::MIN, f64::MAX] {
            assert_eq!(decode_double(encode_double(v)).to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_instant_layout() {
        let instant = HresInstant::new(-1, 7).unwrap();
        let bytes = encode_instant(instant);
        assert_eq!(&bytes[..8], &[0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[8..], &[0, 0, 0, 7]);
        assert_eq!(decode_instant(bytes).unwrap(), instant);
    }

    #[test]
    fn test_instant_rejects_out_of_range_picos() {
        let mut bytes = encode_instant(HresInstant::from_millis(10));
        bytes[8..].copy_from_slice(&PICOS_PER_MILLI.to_be_bytes());
        assert!(matches!(decode_instant(bytes), Err(ArchiveError::Decode(_))));
        assert!(HresInstant::new(0, PICOS_PER_MILLI - 1).is_ok());
        assert!(matches!(
            HresInstant::new(0, PICOS_PER_MILLI),
            Err(ArchiveError::InvalidValue(_))
        ));
    }
}
