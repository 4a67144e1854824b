//! Enumerations.
//!
//! Items are created once per type and handed out by identity. Open
//! (non-exhaustive) enums synthesize an unnamed item the first time an
//! undeclared value is read and cache it under the value truncated to the
//! tag width, so later reads of the same value return the same item.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{Result, ViewError};
use crate::layout::{StructureDescriptor, TypeId};
use crate::structure::DefineContext;
use crate::structure::members::Member;
use crate::value::{EnumItem, Value};
use crate::view::View;

#[derive(Debug)]
pub struct EnumShape {
    pub int: Member,
    pub items: Vec<EnumItem>,
    pub open: bool,
    synthesized: RefCell<HashMap<i128, EnumItem>>,
}

impl EnumShape {
    /// Item for `raw`. Closed enums only know declared items.
    pub fn by_value(&self, ty: TypeId, raw: i128) -> Option<EnumItem> {
        let value = self.int.truncate(raw);
        if let Some(item) = self.items.iter().find(|item| item.value() == value) {
            return Some(item.clone());
        }
        if !self.open {
            return None;
        }
        Some(
            self.synthesized
                .borrow_mut()
                .entry(value)
                .or_insert_with(|| EnumItem::new(ty, None, value))
                .clone(),
        )
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<EnumItem> {
        self.items.iter().find(|item| item.name() == Some(name)).cloned()
    }
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<EnumShape> {
    let int = cx.first_member(desc)?;
    if !int.is_scalar() {
        return Err(ViewError::Unsupported(format!(
            "{}: enum must be backed by an integer",
            desc.name
        )));
    }
    let items = desc
        .items
        .iter()
        .map(|item| EnumItem::new(cx.id, Some(item.name.clone()), int.truncate(item.value)))
        .collect();
    Ok(EnumShape {
        int,
        items,
        open: desc.flags.is_open,
        synthesized: RefCell::new(HashMap::new()),
    })
}

fn not_found(type_name: &str, key: impl ToString) -> ViewError {
    ViewError::EnumNotFound {
        type_name: type_name.to_owned(),
        key: key.to_string(),
    }
}

/// Resolve `key` (item, integer or name) to an item of this enum.
pub(crate) fn cast(shape: &EnumShape, ty: TypeId, type_name: &str, key: &Value) -> Result<EnumItem> {
    match key {
        Value::Enum(item) if item.type_id() == ty => Ok(item.clone()),
        Value::Enum(item) => Err(not_found(type_name, item)),
        Value::String(name) => shape.by_name(name).ok_or_else(|| not_found(type_name, name)),
        Value::Null => Err(ViewError::MissingInitializer {
            type_name: type_name.to_owned(),
        }),
        other => {
            let raw = other.as_int().ok_or_else(|| ViewError::InvalidInitializer {
                type_name: type_name.to_owned(),
                expected: "enum item, name or integer".into(),
                received: other.describe(),
            })?;
            if shape.int.truncate(raw) != raw {
                return Err(ViewError::Overflow {
                    type_name: type_name.to_owned(),
                    value: raw.to_string(),
                    bits: shape.int.bit_size,
                });
            }
            shape.by_value(ty, raw).ok_or_else(|| not_found(type_name, raw))
        }
    }
}

pub(crate) fn value_of(view: &View, shape: &EnumShape) -> Result<i128> {
    shape.int.read_int(view.window(), 0, view.type_name())
}

pub(crate) fn value(view: &View, shape: &EnumShape) -> Result<Value> {
    let raw = value_of(view, shape)?;
    shape
        .by_value(view.type_id(), raw)
        .map(Value::Enum)
        .ok_or_else(|| not_found(view.type_name(), raw))
}

pub(crate) fn assign(view: &View, shape: &EnumShape, value: &Value) -> Result<()> {
    let item = match value {
        Value::View(other) if other.kind() == view.kind() => other.value()?,
        other => other.clone(),
    };
    let item = cast(shape, view.type_id(), view.type_name(), &item)?;
    shape
        .int
        .write_int(view.window(), 0, item.value(), view.type_name())
}
