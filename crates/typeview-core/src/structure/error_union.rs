//! Error unions: a value slot plus an error number, zero meaning success.

use crate::error::{Result, ViewError};
use crate::layout::StructureDescriptor;
use crate::structure::DefineContext;
use crate::structure::members::Member;
use crate::value::{ForeignError, Value};
use crate::view::View;

const VALUE_KEY: usize = 0;

#[derive(Debug)]
pub struct ErrorUnionShape {
    pub value: Member,
    /// Error number; `structure` names the error set when known.
    pub error: Member,
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<ErrorUnionShape> {
    let members = cx.members(desc)?;
    let [value, error]: [Member; 2] = members.try_into().map_err(|_| {
        ViewError::Unsupported(format!("{}: error union needs value and error members", desc.name))
    })?;
    if !error.is_scalar() {
        return Err(ViewError::Unsupported(format!(
            "{}: error member must be an integer",
            desc.name
        )));
    }
    Ok(ErrorUnionShape { value, error })
}

/// Stored error, if any.
pub(crate) fn error(view: &View, shape: &ErrorUnionShape) -> Result<Option<ForeignError>> {
    let number = shape.error.read_int(view.window(), 0, view.type_name())?;
    if number == 0 {
        return Ok(None);
    }
    u32::try_from(number)
        .ok()
        .and_then(|n| view.env().errors().lookup(n))
        .map(Some)
        .ok_or_else(|| ViewError::NotInErrorSet {
            type_name: view.type_name().to_owned(),
            error: number.to_string(),
        })
}

pub(crate) fn value(view: &View, shape: &ErrorUnionShape) -> Result<Value> {
    if let Some(err) = error(view, shape)? {
        return Err(ViewError::Foreign(err));
    }
    view.read_member(&shape.value, VALUE_KEY, 0)
}

fn reset_value(view: &View, shape: &ErrorUnionShape) -> Result<()> {
    view.clear_pointers()?;
    if shape.value.is_object() {
        view.member_child(&shape.value, VALUE_KEY, 0)?.window().reset()?;
        return Ok(());
    }
    let start = shape.value.bit_offset / 8;
    let end = (shape.value.bit_offset + shape.value.bit_size).div_ceil(8);
    view.window().write(|bytes| {
        if let Some(region) = bytes.get_mut(start..end) {
            region.fill(0);
        }
    })?;
    Ok(())
}

pub(crate) fn assign(view: &View, shape: &ErrorUnionShape, value: &Value) -> Result<()> {
    if let Value::Error(err) = value {
        if let Some(set) = shape.error.structure
            && !view.env().errors().is_instance(err, set)
        {
            return Err(ViewError::NotInErrorSet {
                type_name: view.type_name().to_owned(),
                error: err.name().to_owned(),
            });
        }
        reset_value(view, shape)?;
        return shape
            .error
            .write_int(view.window(), 0, i128::from(err.number()), view.type_name());
    }
    view.write_member(&shape.value, VALUE_KEY, 0, value)?;
    shape.error.write_int(view.window(), 0, 0, view.type_name())
}
