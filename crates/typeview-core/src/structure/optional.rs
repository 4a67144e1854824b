//! Optionals.
//!
//! Presence comes from the flag member when the layout has one. Without a
//! flag the value's own encoding must have a spare representation: a linked
//! pointer, or a non-zero error number.

use crate::error::{Result, ViewError};
use crate::layout::StructureDescriptor;
use crate::structure::members::Member;
use crate::structure::{DefineContext, Shape, pointer};
use crate::value::Value;
use crate::view::View;

const VALUE_KEY: usize = 0;

#[derive(Debug)]
pub struct OptionalShape {
    pub value: Member,
    pub present: Option<Member>,
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<OptionalShape> {
    let mut members = cx.members(desc)?.into_iter();
    let value = members.next().ok_or_else(|| {
        ViewError::Unsupported(format!("{}: optional without value member", desc.name))
    })?;
    let present = members.next();
    if present.as_ref().is_some_and(|m| !m.is_scalar()) {
        return Err(ViewError::Unsupported(format!(
            "{}: presence flag must be a scalar",
            desc.name
        )));
    }
    if present.is_none() && !has_spare_encoding(desc, &value) {
        return Err(ViewError::Unsupported(format!(
            "{}: optional without a presence flag needs a pointer or error set value",
            desc.name
        )));
    }
    Ok(OptionalShape { value, present })
}

fn has_spare_encoding(desc: &StructureDescriptor, value: &Member) -> bool {
    if value.is_object() {
        desc.flags.has_pointer
    } else {
        value.is_scalar() && value.structure.is_some()
    }
}

pub(crate) fn is_present(view: &View, shape: &OptionalShape) -> Result<bool> {
    if let Some(flag) = &shape.present {
        return Ok(flag.read_int(view.window(), 0, view.type_name())? != 0);
    }
    if shape.value.is_object() {
        let child = view.member_child(&shape.value, VALUE_KEY, 0)?;
        if let Shape::Pointer(_) = &child.runtime_type().shape {
            return pointer::is_linked(&child);
        }
    }
    let start = shape.value.bit_offset / 8;
    let end = (shape.value.bit_offset + shape.value.bit_size).div_ceil(8);
    Ok(view
        .window()
        .read(|bytes| bytes.get(start..end).is_some_and(|b| b.iter().any(|&x| x != 0)))?)
}

pub(crate) fn value(view: &View, shape: &OptionalShape) -> Result<Value> {
    if !is_present(view, shape)? {
        return Ok(Value::Null);
    }
    view.read_member(&shape.value, VALUE_KEY, 0)
}

pub(crate) fn assign(view: &View, shape: &OptionalShape, value: &Value) -> Result<()> {
    if value.is_null() {
        view.clear_pointers()?;
        view.window().reset()?;
        return Ok(());
    }
    view.write_member(&shape.value, VALUE_KEY, 0, value)?;
    if let Some(flag) = &shape.present {
        flag.write_int(view.window(), 0, 1, view.type_name())?;
    }
    Ok(())
}
