//! Member descriptors bound to byte accessors.

use typeview_membrane::ByteWindow;

use crate::accessor::{Accessor, AccessorSpec, NumericClass, ScalarError};
use crate::error::{Result, ViewError};
use crate::layout::{MemberDescriptor, MemberFlags, MemberType, TypeId};
use crate::value::Value;

const FLOAT_WIDTHS: [usize; 5] = [16, 32, 64, 80, 128];

/// A member with its accessor resolved.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: Option<String>,
    pub member_type: MemberType,
    pub bit_offset: usize,
    pub bit_size: usize,
    pub byte_size: usize,
    pub structure: Option<TypeId>,
    pub flags: MemberFlags,
    accessor: Option<Accessor>,
}

fn numeric_class(member_type: MemberType) -> Option<NumericClass> {
    match member_type {
        MemberType::Bool => Some(NumericClass::Bool),
        MemberType::Int => Some(NumericClass::Int),
        MemberType::Uint => Some(NumericClass::Uint),
        MemberType::Float => Some(NumericClass::Float),
        _ => None,
    }
}

impl Member {
    pub(crate) fn from_descriptor(desc: &MemberDescriptor, owner: &str, little_endian: bool) -> Result<Self> {
        if desc.member_type == MemberType::Float && !FLOAT_WIDTHS.contains(&desc.bit_size) {
            return Err(ViewError::Unsupported(format!(
                "{owner}: {}-bit float",
                desc.bit_size
            )));
        }
        if desc.member_type == MemberType::Object {
            if desc.structure.is_none() {
                return Err(ViewError::Unsupported(format!(
                    "{owner}: object member without a structure"
                )));
            }
            if desc.bit_offset % 8 != 0 {
                return Err(ViewError::Unsupported(format!(
                    "{owner}: object member at bit offset {}",
                    desc.bit_offset
                )));
            }
        }
        let accessor = numeric_class(desc.member_type).map(|class| {
            Accessor::new(AccessorSpec {
                class,
                bit_offset: desc.bit_offset,
                bit_size: desc.bit_size,
                byte_size: desc.byte_size,
                little_endian,
            })
        });
        Ok(Self {
            name: desc.name.clone(),
            member_type: desc.member_type,
            bit_offset: desc.bit_offset,
            bit_size: desc.bit_size,
            byte_size: if desc.byte_size == 0 && desc.bit_size % 8 == 0 && accessor.is_none() {
                desc.bit_size / 8
            } else {
                desc.byte_size
            },
            structure: desc.structure,
            flags: desc.flags,
            accessor,
        })
    }

    /// Same member re-based to bit 0, for addressing vector lanes.
    pub(crate) fn as_lane(&self, little_endian: bool) -> Self {
        let mut lane = self.clone();
        lane.byte_size = 0;
        lane.bit_offset = 0;
        lane.accessor = numeric_class(self.member_type).map(|class| {
            Accessor::new(AccessorSpec {
                class,
                bit_offset: 0,
                bit_size: self.bit_size,
                byte_size: 0,
                little_endian,
            })
        });
        lane
    }

    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.accessor.is_some()
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        self.member_type == MemberType::Object
    }

    /// Name used in messages: the member name, or its position.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| index.to_string())
    }

    /// Storage stride when this member is a sequence element.
    #[must_use]
    pub fn stride(&self) -> usize {
        if self.byte_size > 0 {
            self.byte_size
        } else {
            self.bit_size.div_ceil(8)
        }
    }

    /// Byte range of an object member at `base_bit`.
    pub(crate) fn byte_range(&self, base_bit: usize) -> (usize, usize) {
        ((self.bit_offset + base_bit) / 8, self.byte_size)
    }

    pub(crate) fn read(&self, window: &ByteWindow, base_bit: usize, type_name: &str) -> Result<Value> {
        let Some(accessor) = &self.accessor else {
            return Ok(Value::Null);
        };
        window
            .read(|bytes| accessor.get(bytes, base_bit))?
            .map_err(|err| scalar_error(err, type_name))
    }

    pub(crate) fn write(
        &self,
        window: &ByteWindow,
        base_bit: usize,
        value: &Value,
        type_name: &str,
    ) -> Result<()> {
        let Some(accessor) = &self.accessor else {
            return Ok(());
        };
        window
            .write(|bytes| accessor.set(bytes, base_bit, value))?
            .map_err(|err| scalar_error(err, type_name))
    }

    /// Integer content of a scalar member; booleans read as 0/1.
    pub(crate) fn read_int(&self, window: &ByteWindow, base_bit: usize, type_name: &str) -> Result<i128> {
        match self.read(window, base_bit, type_name)? {
            Value::Bool(b) => Ok(i128::from(b)),
            other => other.as_int().ok_or_else(|| ViewError::InvalidInitializer {
                type_name: type_name.to_owned(),
                expected: "integer".into(),
                received: other.describe(),
            }),
        }
    }

    /// Write an integer, coercing to a boolean for bool members.
    pub(crate) fn write_int(&self, window: &ByteWindow, base_bit: usize, value: i128, type_name: &str) -> Result<()> {
        let value = if self.member_type == MemberType::Bool {
            Value::Bool(value != 0)
        } else {
            Value::Int(value)
        };
        self.write(window, base_bit, &value, type_name)
    }

    /// Truncate `value` to this member's width, sign-extending signed members.
    #[must_use]
    pub fn truncate(&self, value: i128) -> i128 {
        let bits = self.bit_size.min(127);
        if bits == 0 {
            return 0;
        }
        let mask = (1_i128 << bits) - 1;
        let raw = value & mask;
        if self.member_type == MemberType::Int && raw >> (bits - 1) & 1 == 1 {
            raw - (1_i128 << bits)
        } else {
            raw
        }
    }
}

fn scalar_error(err: ScalarError, type_name: &str) -> ViewError {
    match err {
        ScalarError::Overflow { value, bits } => ViewError::Overflow {
            type_name: type_name.to_owned(),
            value,
            bits,
        },
        ScalarError::TypeMismatch { expected, received } => ViewError::InvalidInitializer {
            type_name: type_name.to_owned(),
            expected: expected.to_owned(),
            received,
        },
        ScalarError::OutOfRange { bit_offset, len, .. } => ViewError::OutOfBound {
            type_name: type_name.to_owned(),
            index: bit_offset / 8,
            length: len,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_float_widths_are_rejected() {
        let desc = MemberDescriptor::scalar("f", MemberType::Float, 0, 24);
        assert!(matches!(
            Member::from_descriptor(&desc, "Bad", true),
            Err(ViewError::Unsupported(_))
        ));
    }

    #[test]
    fn overflow_names_the_owner() {
        let member = Member::from_descriptor(
            &MemberDescriptor::scalar("x", MemberType::Uint, 0, 8),
            "Pair",
            true,
        )
        .expect("member");
        let window = ByteWindow::host(1, 1);
        let err = member.write(&window, 0, &Value::Int(300), "Pair").unwrap_err();
        assert_eq!(err.to_string(), "Pair: 300 does not fit in 8 bits");
    }

    #[test]
    fn truncation_sign_extends() {
        let member = Member::from_descriptor(
            &MemberDescriptor::scalar("tag", MemberType::Int, 0, 8),
            "E",
            true,
        )
        .expect("member");
        assert_eq!(member.truncate(0x1FF), -1);
        assert_eq!(member.truncate(0x7F), 127);
    }
}
