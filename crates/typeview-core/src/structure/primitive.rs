//! Single-scalar types.

use crate::error::{Result, ViewError};
use crate::layout::StructureDescriptor;
use crate::structure::DefineContext;
use crate::structure::members::Member;
use crate::value::Value;
use crate::view::View;

#[derive(Debug)]
pub struct PrimitiveShape {
    pub value: Member,
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<PrimitiveShape> {
    let value = cx.first_member(desc)?;
    if !value.is_scalar() {
        return Err(ViewError::Unsupported(format!(
            "{}: primitive member must be a scalar",
            desc.name
        )));
    }
    Ok(PrimitiveShape { value })
}

pub(crate) fn value(view: &View, shape: &PrimitiveShape) -> Result<Value> {
    view.read_member(&shape.value, 0, 0)
}

pub(crate) fn assign(view: &View, shape: &PrimitiveShape, value: &Value) -> Result<()> {
    match value {
        Value::Null => Err(ViewError::MissingInitializer {
            type_name: view.type_name().to_owned(),
        }),
        Value::View(other) if other.runtime_type().is_value_kind() => {
            view.write_member(&shape.value, 0, 0, &other.value()?)
        }
        other => view.write_member(&shape.value, 0, 0, other),
    }
}
