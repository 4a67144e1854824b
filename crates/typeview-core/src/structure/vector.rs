//! SIMD-style lane vectors.
//!
//! When the lanes do not fit at their natural byte stride (`@Vector(8, bool)`
//! in one byte) they are bit-packed: lane `i` occupies bits
//! `[i * bit_size, (i + 1) * bit_size)`.

use crate::error::{Result, ViewError};
use crate::layout::StructureDescriptor;
use crate::structure::DefineContext;
use crate::structure::members::Member;
use crate::value::Value;
use crate::view::View;

#[derive(Debug)]
pub struct VectorShape {
    pub element: Member,
    pub length: usize,
    pub lane_bits: usize,
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<VectorShape> {
    let element = cx.first_member(desc)?;
    if !element.is_scalar() {
        return Err(ViewError::Unsupported(format!(
            "{}: vector lanes must be scalars",
            desc.name
        )));
    }
    let length = desc.length.ok_or_else(|| {
        ViewError::Unsupported(format!("{}: vector without length", desc.name))
    })?;
    let packed = element.stride() * length > desc.byte_size;
    let (element, lane_bits) = if packed {
        let lane_bits = element.bit_size;
        (element.as_lane(cx.little_endian), lane_bits)
    } else {
        let lane_bits = element.stride() * 8;
        (element, lane_bits)
    };
    if (lane_bits * length).div_ceil(8) > desc.byte_size {
        return Err(ViewError::Unsupported(format!(
            "{}: {length} lanes of {lane_bits} bits exceed {} bytes",
            desc.name, desc.byte_size
        )));
    }
    Ok(VectorShape {
        element,
        length,
        lane_bits,
    })
}

fn check_index(view: &View, index: usize) -> Result<()> {
    if index >= view.len() {
        return Err(ViewError::OutOfBound {
            type_name: view.type_name().to_owned(),
            index,
            length: view.len(),
        });
    }
    Ok(())
}

pub(crate) fn at(view: &View, shape: &VectorShape, index: usize) -> Result<Value> {
    check_index(view, index)?;
    view.read_member(&shape.element, index, index * shape.lane_bits)
}

pub(crate) fn set_at(view: &View, shape: &VectorShape, index: usize, value: &Value) -> Result<()> {
    view.ensure_writable()?;
    check_index(view, index)?;
    view.write_member(&shape.element, index, index * shape.lane_bits, value)
}

pub(crate) fn assign(view: &View, shape: &VectorShape, value: &Value) -> Result<()> {
    let items: Vec<Value> = match value {
        Value::List(items) => items.clone(),
        Value::View(other) => (0..other.len()).map(|i| other.at(i)).collect::<Result<_>>()?,
        Value::Null => {
            return Err(ViewError::MissingInitializer {
                type_name: view.type_name().to_owned(),
            });
        }
        other => {
            return Err(ViewError::InvalidInitializer {
                type_name: view.type_name().to_owned(),
                expected: "list of lanes".into(),
                received: other.describe(),
            });
        }
    };
    if items.len() != shape.length {
        return Err(ViewError::ArrayLengthMismatch {
            type_name: view.type_name().to_owned(),
            expected: shape.length,
            received: items.len(),
        });
    }
    for (index, item) in items.iter().enumerate() {
        view.write_member(&shape.element, index, index * shape.lane_bits, item)?;
    }
    Ok(())
}
