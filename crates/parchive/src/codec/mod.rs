//! Order-preserving column codec.
//!
//! Column values are serialized so that, for two values of the same type,
//! unsigned lexicographic comparison of the encoded bytes matches the numeric
//! comparison of the values. The sorted key-value layer under the archive
//! relies on this: logically ordered values are byte-ordered in storage.
//!
//! Every value can be written either to a growing cursor (any
//! [`std::io::Write`]) or to a fixed-size array; both produce the same bytes.
//! The layouts in [`scalar`] are the on-disk format and must not change.

pub mod scalar;

use crate::error::{ArchiveError, Result};
use std::cmp::Ordering;
use std::io::{ErrorKind, Read, Write};

pub use scalar::{HresInstant, PICOS_PER_MILLI};

/// Type tag of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    /// 16-bit signed integer.
    Short = 1,
    /// 32-bit signed integer.
    Int = 2,
    /// 64-bit signed integer.
    Long = 3,
    /// 64-bit IEEE-754 float.
    Double = 4,
    /// Milliseconds plus picosecond remainder.
    HresTimestamp = 5,
}

impl ColumnType {
    /// Returns the encoded size of a value of this type in bytes.
    pub fn encoded_len(self) -> usize {
        match self {
            Self::Short => scalar::SHORT_LEN,
            Self::Int => scalar::INT_LEN,
            Self::Long => scalar::LONG_LEN,
            Self::Double => scalar::DOUBLE_LEN,
            Self::HresTimestamp => scalar::HRES_TIMESTAMP_LEN,
        }
    }

    /// Converts a stored tag back to a type.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Short),
            2 => Some(Self::Int),
            3 => Some(Self::Long),
            4 => Some(Self::Double),
            5 => Some(Self::HresTimestamp),
            _ => None,
        }
    }
}

/// A typed scalar column value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnValue {
    /// 16-bit signed integer.
    Short(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// High-resolution timestamp.
    HresTimestamp(HresInstant),
}

impl ColumnValue {
    /// Returns the type tag of this value.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Short(_) => ColumnType::Short,
            Self::Int(_) => ColumnType::Int,
            Self::Long(_) => ColumnType::Long,
            Self::Double(_) => ColumnType::Double,
            Self::HresTimestamp(_) => ColumnType::HresTimestamp,
        }
    }

    /// Writes the encoded value to a growing cursor.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        match *self {
            Self::Short(v) => writer.write_all(&scalar::encode_short(v))?,
            Self::Int(v) => writer.write_all(&scalar::encode_int(v))?,
            Self::Long(v) => writer.write_all(&scalar::encode_long(v))?,
            Self::Double(v) => writer.write_all(&scalar::encode_double(v))?,
            Self::HresTimestamp(v) => writer.write_all(&scalar::encode_instant(v))?,
        }
        Ok(())
    }

    /// Reads a value of type `ty` from a cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Decode`] if the input is truncated or the
    /// bytes do not form a valid value.
    pub fn deserialize<R: Read>(ty: ColumnType, reader: &mut R) -> Result<Self> {
        match ty {
            ColumnType::Short => Ok(Self::Short(scalar::decode_short(read_array(reader, ty)?))),
            ColumnType::Int => Ok(Self::Int(scalar::decode_int(read_array(reader, ty)?))),
            ColumnType::Long => Ok(Self::Long(scalar::decode_long(read_array(reader, ty)?))),
            ColumnType::Double => Ok(Self::Double(scalar::decode_double(read_array(reader, ty)?))),
            ColumnType::HresTimestamp => Ok(Self::HresTimestamp(scalar::decode_instant(
                read_array(reader, ty)?,
            )?)),
        }
    }

    /// Returns the encoded value as a standalone byte array.
    pub fn to_byte_array(&self) -> Vec<u8> {
        match *self {
            Self::Short(v) => scalar::encode_short(v).to_vec(),
            Self::Int(v) => scalar::encode_int(v).to_vec(),
            Self::Long(v) => scalar::encode_long(v).to_vec(),
            Self::Double(v) => scalar::encode_double(v).to_vec(),
            Self::HresTimestamp(v) => scalar::encode_instant(v).to_vec(),
        }
    }

    /// Decodes a standalone byte array holding exactly one value of type `ty`.
    pub fn from_byte_array(ty: ColumnType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ty.encoded_len() {
            return Err(ArchiveError::Decode(format!(
                "{:?} expects {} bytes, got {}",
                ty,
                ty.encoded_len(),
                bytes.len()
            )));
        }
        let mut cursor = bytes;
        Self::deserialize(ty, &mut cursor)
    }

    /// Compares two values by their encoded bytes.
    ///
    /// Returns `None` when the values are of different types. For floats this
    /// is a total order (NaNs sort past the infinities by sign).
    pub fn cmp_encoded(&self, other: &Self) -> Option<Ordering> {
        match (*self, *other) {
            (Self::Short(a), Self::Short(b)) => Some(scalar::short_key(a).cmp(&scalar::short_key(b))),
            (Self::Int(a), Self::Int(b)) => Some(scalar::int_key(a).cmp(&scalar::int_key(b))),
            (Self::Long(a), Self::Long(b)) => Some(scalar::long_key(a).cmp(&scalar::long_key(b))),
            (Self::Double(a), Self::Double(b)) => {
                Some(scalar::double_key(a).cmp(&scalar::double_key(b)))
            }
            (Self::HresTimestamp(a), Self::HresTimestamp(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

/// Reads exactly `N` bytes, mapping a short read to a decode error.
fn read_array<R: Read, const N: usize>(reader: &mut R, ty: ColumnType) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ArchiveError::Decode(format!(
            "truncated {:?} value: need {} bytes",
            ty, N
        ))),
        Err(e) => Err(e.into()),
    }
}
