//! Conversions between `f64` and the float formats Rust has no native type for:
//! IEEE half (16-bit), x87 extended (80-bit) and IEEE quad (128-bit).
//!
//! Narrowing rounds to nearest, ties to even, and overflows to infinity.
//! NaN payloads are carried across by aligning the most significant fraction
//! bits, so `f64 -> wide -> f64` preserves every bit.

/// Round `v / 2^shift` to nearest, ties to even.
fn shift_right_rne(v: u128, shift: u32) -> u128 {
    match shift {
        0 => v,
        1..=127 => {
            let q = v >> shift;
            let rem = v & ((1_u128 << shift) - 1);
            let half = 1_u128 << (shift - 1);
            if rem > half || (rem == half && q & 1 == 1) {
                q + 1
            } else {
                q
            }
        }
        128 => u128::from(v > 1_u128 << 127),
        _ => 0,
    }
}

/// Magnitude bits of `mant * 2^exp` in a format with `exp_bits`/`frac_bits`
/// and an implicit leading bit.
fn compose(mant: u128, exp: i32, exp_bits: u32, frac_bits: u32) -> u128 {
    if mant == 0 {
        return 0;
    }
    let bias = (1_i32 << (exp_bits - 1)) - 1;
    let infinity = ((1_u128 << exp_bits) - 1) << frac_bits;
    let width = 128 - mant.leading_zeros() as i32;
    let unbiased = width - 1 + exp;
    let min_exp = 1 - bias;
    let frac_mask = (1_u128 << frac_bits) - 1;
    if unbiased >= min_exp {
        let shift = width - 1 - frac_bits as i32;
        let mut m = if shift > 0 {
            shift_right_rne(mant, shift as u32)
        } else {
            mant << (-shift) as u32
        };
        let mut e = unbiased;
        if m >> (frac_bits + 1) != 0 {
            m >>= 1;
            e += 1;
        }
        if e > bias {
            return infinity;
        }
        ((e + bias) as u128) << frac_bits | (m & frac_mask)
    } else {
        // Subnormal; a carry into bit `frac_bits` yields the smallest normal.
        let shift = (min_exp - frac_bits as i32) - exp;
        if shift > 0 {
            shift_right_rne(mant, shift as u32)
        } else {
            mant << (-shift) as u32
        }
    }
}

fn move_payload(payload: u128, from_bits: u32, to_bits: u32) -> u128 {
    if from_bits >= to_bits {
        payload >> (from_bits - to_bits)
    } else {
        payload << (to_bits - from_bits)
    }
}

/// `(sign, fraction, biased exponent)` of an f64.
fn split_f64(v: f64) -> (u64, u64, i32) {
    let bits = v.to_bits();
    let sign = bits >> 63;
    let exp = ((bits >> 52) & 0x7FF) as i32;
    let frac = bits & ((1 << 52) - 1);
    (sign, frac, exp)
}

fn decode_ieee(bits: u128, exp_bits: u32, frac_bits: u32) -> f64 {
    let sign = ((bits >> (exp_bits + frac_bits)) & 1) as u64;
    let max_exp = (1_u128 << exp_bits) - 1;
    let exp = (bits >> frac_bits) & max_exp;
    let frac = bits & ((1_u128 << frac_bits) - 1);
    let bias = (1_i32 << (exp_bits - 1)) - 1;
    let sign_bit = sign << 63;
    if exp == max_exp {
        if frac == 0 {
            return f64::from_bits(sign_bit | 0x7FF0_0000_0000_0000);
        }
        let mut payload = move_payload(frac, frac_bits, 52) as u64;
        if payload == 0 {
            payload = 1 << 51;
        }
        return f64::from_bits(sign_bit | 0x7FF0_0000_0000_0000 | payload);
    }
    let (mant, e) = if exp == 0 {
        (frac, 1 - bias - frac_bits as i32)
    } else {
        (frac | 1_u128 << frac_bits, exp as i32 - bias - frac_bits as i32)
    };
    f64::from_bits(sign_bit | compose(mant, e, 11, 52) as u64)
}

fn encode_ieee(v: f64, exp_bits: u32, frac_bits: u32) -> u128 {
    let (sign, frac, exp) = split_f64(v);
    let sign_out = u128::from(sign) << (exp_bits + frac_bits);
    let max_exp = (1_u128 << exp_bits) - 1;
    if exp == 0x7FF {
        if frac == 0 {
            return sign_out | max_exp << frac_bits;
        }
        let mut payload = move_payload(u128::from(frac), 52, frac_bits);
        if payload == 0 {
            payload = 1 << (frac_bits - 1);
        }
        return sign_out | max_exp << frac_bits | payload;
    }
    let (mant, e) = if exp == 0 {
        (u128::from(frac), -1074)
    } else {
        (u128::from(frac | 1 << 52), exp - 1075)
    };
    sign_out | compose(mant, e, exp_bits, frac_bits)
}

#[must_use]
pub fn f16_to_f64(bits: u16) -> f64 {
    decode_ieee(u128::from(bits), 5, 10)
}

#[must_use]
pub fn f64_to_f16(v: f64) -> u16 {
    encode_ieee(v, 5, 10) as u16
}

#[must_use]
pub fn f128_to_f64(bits: u128) -> f64 {
    decode_ieee(bits, 15, 112)
}

#[must_use]
pub fn f64_to_f128(v: f64) -> u128 {
    encode_ieee(v, 15, 112)
}

const F80_INT_BIT: u128 = 1 << 63;

/// Decode the low 80 bits of `bits` as an x87 extended float.
#[must_use]
pub fn f80_to_f64(bits: u128) -> f64 {
    let sign = ((bits >> 79) & 1) as u64;
    let exp = ((bits >> 64) & 0x7FFF) as i32;
    let mantissa = bits & ((1_u128 << 64) - 1);
    let frac = mantissa & (F80_INT_BIT - 1);
    let sign_bit = sign << 63;
    if exp == 0x7FFF {
        if frac == 0 {
            return f64::from_bits(sign_bit | 0x7FF0_0000_0000_0000);
        }
        let mut payload = (frac >> 11) as u64;
        if payload == 0 {
            payload = 1 << 51;
        }
        return f64::from_bits(sign_bit | 0x7FF0_0000_0000_0000 | payload);
    }
    let e = if exp == 0 { 1 - 16383 - 63 } else { exp - 16383 - 63 };
    f64::from_bits(sign_bit | compose(mantissa, e, 11, 52) as u64)
}

/// Encode as an x87 extended float in the low 80 bits.
#[must_use]
pub fn f64_to_f80(v: f64) -> u128 {
    let (sign, frac, exp) = split_f64(v);
    let sign_out = u128::from(sign) << 79;
    if exp == 0x7FF {
        let payload = u128::from(frac) << 11;
        return sign_out | 0x7FFF_u128 << 64 | F80_INT_BIT | payload;
    }
    let (mant, e) = if exp == 0 {
        (u128::from(frac), -1074)
    } else {
        (u128::from(frac | 1 << 52), exp - 1075)
    };
    let magnitude = compose(mant, e, 15, 63);
    let biased = magnitude >> 63;
    let fraction = magnitude & (F80_INT_BIT - 1);
    let int_bit = if biased != 0 { F80_INT_BIT } else { 0 };
    sign_out | biased << 64 | int_bit | fraction
}
