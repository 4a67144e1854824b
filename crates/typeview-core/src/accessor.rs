//! Byte-accessor layer.
//!
//! Given a numeric class, bit position, width and byte order, produce a
//! getter/setter pair over a raw byte buffer. Aligned machine widths take a
//! fast path; everything else (bit-packed fields, odd widths, extended floats,
//! integers wider than 128 bits) goes through the generic bit algorithm.
//!
//! Bit numbering inside packed fields is little-endian: bit 0 is the least
//! significant bit of the first byte. Accessors never touch bits outside
//! `[bit_offset, bit_offset + bit_size)`.

use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};

use crate::float::{f16_to_f64, f64_to_f16, f64_to_f80, f64_to_f128, f80_to_f64, f128_to_f64};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericClass {
    Bool,
    Int,
    Uint,
    Float,
}

/// Position and shape of one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorSpec {
    pub class: NumericClass,
    pub bit_offset: usize,
    pub bit_size: usize,
    /// Storage bytes; 0 for bit-packed fields.
    pub byte_size: usize,
    pub little_endian: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarError {
    Overflow { value: String, bits: usize },
    TypeMismatch { expected: &'static str, received: String },
    OutOfRange { bit_offset: usize, bit_size: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FastKind {
    Bool8,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    I128,
    U128,
    F32,
    F64,
}

/// Accessor for an aligned machine-width scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastAccessor {
    kind: FastKind,
    byte_offset: usize,
    little_endian: bool,
}

/// Fast accessor for `spec`, or `None` when the generic algorithm is needed.
#[must_use]
pub fn fast_accessor(spec: &AccessorSpec) -> Option<FastAccessor> {
    if spec.bit_offset % 8 != 0 || spec.byte_size == 0 {
        return None;
    }
    let kind = match (spec.class, spec.bit_size, spec.byte_size) {
        (NumericClass::Bool, 1 | 8, 1) => FastKind::Bool8,
        (NumericClass::Int, 8, 1) => FastKind::I8,
        (NumericClass::Uint, 8, 1) => FastKind::U8,
        (NumericClass::Int, 16, 2) => FastKind::I16,
        (NumericClass::Uint, 16, 2) => FastKind::U16,
        (NumericClass::Int, 32, 4) => FastKind::I32,
        (NumericClass::Uint, 32, 4) => FastKind::U32,
        (NumericClass::Int, 64, 8) => FastKind::I64,
        (NumericClass::Uint, 64, 8) => FastKind::U64,
        (NumericClass::Int, 128, 16) => FastKind::I128,
        (NumericClass::Uint, 128, 16) => FastKind::U128,
        (NumericClass::Float, 32, 4) => FastKind::F32,
        (NumericClass::Float, 64, 8) => FastKind::F64,
        _ => return None,
    };
    Some(FastAccessor {
        kind,
        byte_offset: spec.bit_offset / 8,
        little_endian: spec.little_endian,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    Fast(FastAccessor),
    Bits(AccessorSpec),
}

fn mismatch(expected: &'static str, value: &Value) -> ScalarError {
    ScalarError::TypeMismatch {
        expected,
        received: value.describe(),
    }
}

fn int_range(signed: bool, bits: usize) -> (i128, i128) {
    if signed {
        let half = 1_i128 << (bits - 1);
        (-half, half - 1)
    } else if bits >= 127 {
        (0, i128::MAX)
    } else {
        (0, (1_i128 << bits) - 1)
    }
}

fn big_range(signed: bool, bits: usize) -> (BigInt, BigInt) {
    let one = BigInt::from(1);
    if signed {
        let half = &one << (bits - 1);
        (-half.clone(), half - one)
    } else {
        (BigInt::zero(), (&one << bits) - one)
    }
}

/// Two's-complement little-endian bytes of `value` checked against the range
/// of a `bits`-wide integer.
fn encode_int(value: &Value, signed: bool, bits: usize) -> Result<Vec<u8>, ScalarError> {
    let nbytes = bits.div_ceil(8);
    if bits == 0 {
        return match value.as_int() {
            Some(0) => Ok(Vec::new()),
            _ => Err(ScalarError::Overflow {
                value: value.describe(),
                bits,
            }),
        };
    }
    if bits <= 64
        && let Some(v) = value.as_int().filter(|_| !matches!(value, Value::Bool(_)))
    {
        let (min, max) = int_range(signed, bits);
        if v < min || v > max {
            return Err(ScalarError::Overflow {
                value: v.to_string(),
                bits,
            });
        }
        return Ok(v.to_le_bytes()[..nbytes].to_vec());
    }
    let big = match value {
        Value::Int(_) | Value::BigInt(_) | Value::Float(_) => value.as_big(),
        _ => None,
    }
    .ok_or_else(|| mismatch("integer", value))?;
    let (min, max) = big_range(signed, bits);
    if big < min || big > max {
        return Err(ScalarError::Overflow {
            value: big.to_string(),
            bits,
        });
    }
    let mut raw = big.to_signed_bytes_le();
    let fill = if big.sign() == Sign::Minus { 0xFF } else { 0 };
    raw.resize(nbytes.max(raw.len()), fill);
    raw.truncate(nbytes);
    Ok(raw)
}

fn decode_int(raw: &[u8], signed: bool, bits: usize) -> Value {
    if bits <= 64 {
        let mut buf = [0_u8; 16];
        buf[..raw.len()].copy_from_slice(raw);
        let unsigned = i128::from_le_bytes(buf);
        if signed && bits > 0 && unsigned >> (bits - 1) & 1 == 1 {
            return Value::Int(unsigned - (1_i128 << bits));
        }
        return Value::Int(unsigned);
    }
    let magnitude = BigInt::from_bytes_le(Sign::Plus, raw);
    if signed && (&magnitude >> (bits - 1)) & BigInt::from(1) == BigInt::from(1) {
        return Value::BigInt(magnitude - (BigInt::from(1) << bits));
    }
    Value::BigInt(magnitude)
}

fn encode_float(value: &Value, bits: usize) -> Result<Vec<u8>, ScalarError> {
    let v = value.as_f64().ok_or_else(|| mismatch("number", value))?;
    Ok(match bits {
        16 => f64_to_f16(v).to_le_bytes().to_vec(),
        32 => (v as f32).to_bits().to_le_bytes().to_vec(),
        64 => v.to_bits().to_le_bytes().to_vec(),
        80 => f64_to_f80(v).to_le_bytes()[..10].to_vec(),
        128 => f64_to_f128(v).to_le_bytes().to_vec(),
        _ => return Err(mismatch("float width of 16, 32, 64, 80 or 128 bits", value)),
    })
}

fn decode_float(raw: &[u8], bits: usize) -> Value {
    let mut buf = [0_u8; 16];
    let n = raw.len().min(16);
    buf[..n].copy_from_slice(&raw[..n]);
    let wide = u128::from_le_bytes(buf);
    Value::Float(match bits {
        16 => f16_to_f64(wide as u16),
        32 => f64::from(f32::from_bits(wide as u32)),
        64 => f64::from_bits(wide as u64),
        80 => f80_to_f64(wide),
        128 => f128_to_f64(wide),
        _ => f64::NAN,
    })
}

/// Copy `bit_size` bits starting at `bit_offset` into a fresh little-endian
/// buffer, masking the unused high bits of the final byte.
#[must_use]
pub fn extract_bits(src: &[u8], bit_offset: usize, bit_size: usize) -> Vec<u8> {
    let n = bit_size.div_ceil(8);
    let start = bit_offset / 8;
    let shift = bit_offset % 8;
    let mut out = vec![0_u8; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let lo = src.get(start + i).copied().unwrap_or(0) >> shift;
        let hi = if shift > 0 {
            src.get(start + i + 1).copied().unwrap_or(0) << (8 - shift)
        } else {
            0
        };
        *slot = lo | hi;
    }
    if bit_size % 8 != 0
        && let Some(last) = out.last_mut()
    {
        *last &= (1_u8 << (bit_size % 8)) - 1;
    }
    out
}

/// Write the low `bit_size` bits of `raw` at `bit_offset`, leaving every other
/// bit of `dst` untouched.
pub fn deposit_bits(dst: &mut [u8], bit_offset: usize, bit_size: usize, raw: &[u8]) {
    let mut pos = bit_offset;
    let mut src_bit = 0;
    let mut remaining = bit_size;
    while remaining > 0 {
        let bit_in = pos % 8;
        let take = (8 - bit_in).min(remaining);
        let b = src_bit / 8;
        let s = src_bit % 8;
        let word = u16::from(raw.get(b).copied().unwrap_or(0))
            | u16::from(raw.get(b + 1).copied().unwrap_or(0)) << 8;
        let chunk = (word >> s) & ((1_u16 << take) - 1);
        let mask = (((1_u16 << take) - 1) << bit_in) as u8;
        if let Some(slot) = dst.get_mut(pos / 8) {
            *slot = (*slot & !mask) | ((chunk << bit_in) as u8 & mask);
        }
        pos += take;
        src_bit += take;
        remaining -= take;
    }
}

impl Accessor {
    /// Accessor for `spec`, preferring the fast path.
    #[must_use]
    pub fn new(spec: AccessorSpec) -> Self {
        fast_accessor(&spec).map_or(Self::Bits(spec), Self::Fast)
    }

    #[must_use]
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast(_))
    }

    /// Read the scalar at `base_bit` bits past the accessor's own offset.
    pub fn get(&self, bytes: &[u8], base_bit: usize) -> Result<Value, ScalarError> {
        match self {
            Self::Fast(fast) => fast.get(bytes, base_bit / 8),
            Self::Bits(spec) => get_bits(spec, bytes, base_bit),
        }
    }

    /// Write `value` at `base_bit` bits past the accessor's own offset.
    pub fn set(&self, bytes: &mut [u8], base_bit: usize, value: &Value) -> Result<(), ScalarError> {
        match self {
            Self::Fast(fast) => fast.set(bytes, base_bit / 8, value),
            Self::Bits(spec) => set_bits(spec, bytes, base_bit, value),
        }
    }
}

macro_rules! fast_read {
    ($t:ty, $bytes:expr, $le:expr) => {{
        let mut buf = [0_u8; std::mem::size_of::<$t>()];
        buf.copy_from_slice($bytes);
        if $le {
            <$t>::from_le_bytes(buf)
        } else {
            <$t>::from_be_bytes(buf)
        }
    }};
}

impl FastAccessor {
    fn width(self) -> usize {
        match self.kind {
            FastKind::Bool8 | FastKind::I8 | FastKind::U8 => 1,
            FastKind::I16 | FastKind::U16 => 2,
            FastKind::I32 | FastKind::U32 | FastKind::F32 => 4,
            FastKind::I64 | FastKind::U64 | FastKind::F64 => 8,
            FastKind::I128 | FastKind::U128 => 16,
        }
    }

    fn range(self, base: usize, len: usize) -> Result<std::ops::Range<usize>, ScalarError> {
        let start = self.byte_offset + base;
        let end = start + self.width();
        if end > len {
            return Err(ScalarError::OutOfRange {
                bit_offset: start * 8,
                bit_size: self.width() * 8,
                len,
            });
        }
        Ok(start..end)
    }

    fn get(self, bytes: &[u8], base: usize) -> Result<Value, ScalarError> {
        let range = self.range(base, bytes.len())?;
        let b = &bytes[range];
        let le = self.little_endian;
        Ok(match self.kind {
            FastKind::Bool8 => Value::Bool(b[0] != 0),
            FastKind::I8 => Value::Int(i128::from(b[0] as i8)),
            FastKind::U8 => Value::Int(i128::from(b[0])),
            FastKind::I16 => Value::Int(i128::from(fast_read!(i16, b, le))),
            FastKind::U16 => Value::Int(i128::from(fast_read!(u16, b, le))),
            FastKind::I32 => Value::Int(i128::from(fast_read!(i32, b, le))),
            FastKind::U32 => Value::Int(i128::from(fast_read!(u32, b, le))),
            FastKind::I64 => Value::Int(i128::from(fast_read!(i64, b, le))),
            FastKind::U64 => Value::Int(i128::from(fast_read!(u64, b, le))),
            FastKind::I128 => Value::BigInt(BigInt::from(fast_read!(i128, b, le))),
            FastKind::U128 => Value::BigInt(BigInt::from(fast_read!(u128, b, le))),
            FastKind::F32 => Value::Float(f64::from(f32::from_bits(fast_read!(u32, b, le)))),
            FastKind::F64 => Value::Float(f64::from_bits(fast_read!(u64, b, le))),
        })
    }

    fn set(self, bytes: &mut [u8], base: usize, value: &Value) -> Result<(), ScalarError> {
        let range = self.range(base, bytes.len())?;
        let mut raw = match self.kind {
            FastKind::Bool8 => {
                let b = value.as_bool().ok_or_else(|| mismatch("boolean", value))?;
                vec![u8::from(b)]
            }
            FastKind::I8 => encode_int(value, true, 8)?,
            FastKind::U8 => encode_int(value, false, 8)?,
            FastKind::I16 => encode_int(value, true, 16)?,
            FastKind::U16 => encode_int(value, false, 16)?,
            FastKind::I32 => encode_int(value, true, 32)?,
            FastKind::U32 => encode_int(value, false, 32)?,
            FastKind::I64 => encode_int(value, true, 64)?,
            FastKind::U64 => encode_int(value, false, 64)?,
            FastKind::I128 => encode_int(value, true, 128)?,
            FastKind::U128 => encode_int(value, false, 128)?,
            FastKind::F32 => encode_float(value, 32)?,
            FastKind::F64 => encode_float(value, 64)?,
        };
        if !self.little_endian {
            raw.reverse();
        }
        bytes[range].copy_from_slice(&raw);
        Ok(())
    }
}

fn get_bits(spec: &AccessorSpec, bytes: &[u8], base_bit: usize) -> Result<Value, ScalarError> {
    let bit_offset = spec.bit_offset + base_bit;
    let raw = if spec.byte_size > 0 && bit_offset % 8 == 0 {
        let start = bit_offset / 8;
        let mut stored = bytes
            .get(start..start + spec.byte_size)
            .ok_or(ScalarError::OutOfRange {
                bit_offset,
                bit_size: spec.byte_size * 8,
                len: bytes.len(),
            })?
            .to_vec();
        if !spec.little_endian {
            stored.reverse();
        }
        extract_bits(&stored, 0, spec.bit_size)
    } else {
        if (bit_offset + spec.bit_size).div_ceil(8) > bytes.len() {
            return Err(ScalarError::OutOfRange {
                bit_offset,
                bit_size: spec.bit_size,
                len: bytes.len(),
            });
        }
        extract_bits(bytes, bit_offset, spec.bit_size)
    };
    Ok(match spec.class {
        NumericClass::Bool => Value::Bool(raw.iter().any(|&b| b != 0)),
        NumericClass::Int => decode_int(&raw, true, spec.bit_size),
        NumericClass::Uint => decode_int(&raw, false, spec.bit_size),
        NumericClass::Float => decode_float(&raw, spec.bit_size),
    })
}

fn set_bits(
    spec: &AccessorSpec,
    bytes: &mut [u8],
    base_bit: usize,
    value: &Value,
) -> Result<(), ScalarError> {
    let bit_offset = spec.bit_offset + base_bit;
    let raw = match spec.class {
        NumericClass::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch("boolean", value))?;
            vec![u8::from(b)]
        }
        NumericClass::Int => encode_int(value, true, spec.bit_size)?,
        NumericClass::Uint => encode_int(value, false, spec.bit_size)?,
        NumericClass::Float => encode_float(value, spec.bit_size)?,
    };
    if spec.byte_size > 0 && bit_offset % 8 == 0 {
        let start = bit_offset / 8;
        let len = bytes.len();
        let target = bytes
            .get_mut(start..start + spec.byte_size)
            .ok_or(ScalarError::OutOfRange {
                bit_offset,
                bit_size: spec.byte_size * 8,
                len,
            })?;
        let mut stored = target.to_vec();
        if !spec.little_endian {
            stored.reverse();
        }
        deposit_bits(&mut stored, 0, spec.bit_size, &raw);
        if !spec.little_endian {
            stored.reverse();
        }
        target.copy_from_slice(&stored);
        return Ok(());
    }
    if (bit_offset + spec.bit_size).div_ceil(8) > bytes.len() {
        return Err(ScalarError::OutOfRange {
            bit_offset,
            bit_size: spec.bit_size,
            len: bytes.len(),
        });
    }
    deposit_bits(bytes, bit_offset, spec.bit_size, &raw);
    Ok(())
}

/// Integer view of a scalar value as an unsigned word, for addresses.
#[must_use]
pub fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).ok(),
        Value::BigInt(i) => i.to_u64(),
        _ => None,
    }
}
