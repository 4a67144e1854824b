//! Extern, bare and tagged unions.
//!
//! Tagged unions store an enum selector; reading an inactive member yields
//! `Null`. Bare unions may carry a hidden index selector: with runtime safety
//! on, reading an inactive member is an error, otherwise the bytes are
//! reinterpreted like an extern union.

use crate::error::{Result, ViewError};
use crate::layout::{StructureDescriptor, StructureKind};
use crate::structure::DefineContext;
use crate::structure::members::Member;
use crate::value::Value;
use crate::view::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionVariant {
    Extern,
    Bare,
    Tagged,
}

#[derive(Debug)]
pub struct UnionShape {
    pub variant: UnionVariant,
    pub members: Vec<Member>,
    pub selector: Option<Member>,
}

impl UnionShape {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .position(|(i, m)| m.label(i) == name)
    }

    /// Child cache key of the selector, past every value member.
    fn selector_key(&self) -> usize {
        self.members.len()
    }
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<UnionShape> {
    let variant = match desc.kind {
        StructureKind::TaggedUnion => UnionVariant::Tagged,
        StructureKind::BareUnion => UnionVariant::Bare,
        _ => UnionVariant::Extern,
    };
    let (selectors, members): (Vec<Member>, Vec<Member>) = cx
        .members(desc)?
        .into_iter()
        .partition(|m| m.flags.is_selector);
    let selector = selectors.into_iter().next();
    if variant == UnionVariant::Tagged && selector.is_none() {
        return Err(ViewError::Unsupported(format!(
            "{}: tagged union without selector",
            desc.name
        )));
    }
    Ok(UnionShape {
        variant,
        members,
        selector: if variant == UnionVariant::Extern {
            None
        } else {
            selector
        },
    })
}

/// Index of the active member, when a selector records one.
pub(crate) fn active_index(view: &View, shape: &UnionShape) -> Result<Option<usize>> {
    let Some(selector) = &shape.selector else {
        return Ok(None);
    };
    let index = match view.read_member(selector, shape.selector_key(), 0)? {
        Value::Enum(item) => item.name().and_then(|name| shape.index_of(name)),
        other => other
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .filter(|&n| n < shape.members.len()),
    };
    Ok(index)
}

pub(crate) fn active_name(view: &View, shape: &UnionShape) -> Result<Option<String>> {
    Ok(active_index(view, shape)?.map(|i| shape.members[i].label(i)))
}

fn checked(view: &View, shape: &UnionShape) -> bool {
    shape.variant == UnionVariant::Bare
        && shape.selector.is_some()
        && view.env().config().safety.checks_enabled()
}

pub(crate) fn get(view: &View, shape: &UnionShape, name: &str) -> Result<Value> {
    let index = shape.index_of(name).ok_or_else(|| ViewError::NoProperty {
        type_name: view.type_name().to_owned(),
        name: name.to_owned(),
    })?;
    match shape.variant {
        UnionVariant::Tagged if active_index(view, shape)? != Some(index) => Ok(Value::Null),
        UnionVariant::Bare if checked(view, shape) => {
            let active = active_index(view, shape)?;
            if active != Some(index) {
                return Err(ViewError::InactiveUnionMember {
                    type_name: view.type_name().to_owned(),
                    member: name.to_owned(),
                    active: active.map_or_else(|| "none".to_owned(), |i| shape.members[i].label(i)),
                });
            }
            view.read_member(&shape.members[index], index, 0)
        }
        _ => view.read_member(&shape.members[index], index, 0),
    }
}

fn write_selector(view: &View, shape: &UnionShape, index: usize) -> Result<()> {
    let Some(selector) = &shape.selector else {
        return Ok(());
    };
    if selector.is_object() {
        let tag = Value::String(shape.members[index].label(index));
        view.write_member(selector, shape.selector_key(), 0, &tag)
    } else {
        let index = i128::try_from(index).unwrap_or(i128::MAX);
        selector.write_int(view.window(), 0, index, view.type_name())
    }
}

pub(crate) fn set(view: &View, shape: &UnionShape, name: &str, value: &Value) -> Result<()> {
    view.ensure_writable()?;
    let index = shape.index_of(name).ok_or_else(|| ViewError::NoProperty {
        type_name: view.type_name().to_owned(),
        name: name.to_owned(),
    })?;
    if let Some(previous) = active_index(view, shape)?
        && previous != index
    {
        view.clear_pointers()?;
    }
    view.write_member(&shape.members[index], index, 0, value)?;
    write_selector(view, shape, index)
}

pub(crate) fn assign(view: &View, shape: &UnionShape, value: &Value) -> Result<()> {
    match value {
        Value::Record(pairs) if pairs.len() == 1 => {
            let (name, value) = &pairs[0];
            set(view, shape, name, value)
        }
        Value::Null => Err(ViewError::MissingInitializer {
            type_name: view.type_name().to_owned(),
        }),
        other => Err(ViewError::InvalidInitializer {
            type_name: view.type_name().to_owned(),
            expected: "record with exactly one member".into(),
            received: other.describe(),
        }),
    }
}

pub(crate) fn entries(view: &View, shape: &UnionShape) -> Vec<(String, Result<Value>)> {
    let only_active = shape.variant == UnionVariant::Tagged || checked(view, shape);
    if only_active {
        return match active_index(view, shape) {
            Ok(Some(i)) => vec![(shape.members[i].label(i), view.read_member(&shape.members[i], i, 0))],
            Ok(None) => Vec::new(),
            Err(err) => vec![("selector".to_owned(), Err(err))],
        };
    }
    shape
        .members
        .iter()
        .enumerate()
        .map(|(i, m)| (m.label(i), view.read_member(m, i, 0)))
        .collect()
}
