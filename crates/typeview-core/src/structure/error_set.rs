//! Error sets. Members are interned in the environment's error registry at
//! definition time, so every set naming a number shares one error object.

use crate::error::{Result, ViewError};
use crate::layout::StructureDescriptor;
use crate::structure::members::Member;
use crate::structure::{DefineContext, Shape};
use crate::value::{ForeignError, Value};
use crate::view::View;

#[derive(Debug)]
pub struct ErrorSetShape {
    pub int: Member,
    pub is_any: bool,
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<ErrorSetShape> {
    let int = cx.first_member(desc)?;
    if !int.is_scalar() {
        return Err(ViewError::Unsupported(format!(
            "{}: error set must be backed by an integer",
            desc.name
        )));
    }
    let items = desc
        .items
        .iter()
        .map(|item| match u32::try_from(item.value) {
            Ok(number) if number != 0 => Ok((item.name.clone(), number)),
            _ => Err(ViewError::Unsupported(format!(
                "{}: error number {} for {}",
                desc.name, item.value, item.name
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    cx.errors.define_set(cx.id, &items, desc.flags.is_any);
    Ok(ErrorSetShape {
        int,
        is_any: desc.flags.is_any,
    })
}

fn not_in_set(view: &View, error: String) -> ViewError {
    ViewError::NotInErrorSet {
        type_name: view.type_name().to_owned(),
        error,
    }
}

pub(crate) fn value(view: &View, shape: &ErrorSetShape) -> Result<Value> {
    let number = shape.int.read_int(view.window(), 0, view.type_name())?;
    if number == 0 {
        return Ok(Value::Null);
    }
    let errors = view.env().errors();
    u32::try_from(number)
        .ok()
        .and_then(|n| errors.lookup(n))
        .filter(|err| errors.is_instance(err, view.type_id()))
        .map(Value::Error)
        .ok_or_else(|| not_in_set(view, number.to_string()))
}

/// Resolve `key` to a member of the set `view` belongs to.
fn resolve(view: &View, key: &Value) -> Result<ForeignError> {
    let errors = view.env().errors();
    let ty = view.type_id();
    match key {
        Value::Error(err) if errors.is_instance(err, ty) => Ok(err.clone()),
        Value::Error(err) => Err(not_in_set(view, err.name().to_owned())),
        Value::String(name) => errors
            .by_name(ty, name)
            .ok_or_else(|| not_in_set(view, name.clone())),
        Value::View(other) if matches!(other.runtime_type().shape, Shape::ErrorSet(_)) => {
            resolve(view, &other.value()?)
        }
        other => match other.as_int().and_then(|n| u32::try_from(n).ok()) {
            Some(number) => errors
                .lookup(number)
                .filter(|err| errors.is_instance(err, ty))
                .ok_or_else(|| not_in_set(view, number.to_string())),
            None => Err(ViewError::InvalidInitializer {
                type_name: view.type_name().to_owned(),
                expected: "error, error name or error number".into(),
                received: other.describe(),
            }),
        },
    }
}

pub(crate) fn assign(view: &View, shape: &ErrorSetShape, value: &Value) -> Result<()> {
    if value.is_null() {
        return Err(ViewError::MissingInitializer {
            type_name: view.type_name().to_owned(),
        });
    }
    let err = resolve(view, value)?;
    shape
        .int
        .write_int(view.window(), 0, i128::from(err.number()), view.type_name())
}
