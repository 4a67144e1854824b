//! Structs, extern structs and packed structs.
//!
//! Packed structs may carry an unnamed backing integer spanning the whole
//! object; it is skipped by keyed access and used for integer coercion.

use std::collections::HashSet;
use std::rc::Rc;

use typeview_membrane::ByteWindow;

use crate::error::{Result, ViewError};
use crate::layout::{MemberType, StructureDescriptor, StructureKind};
use crate::structure::DefineContext;
use crate::structure::members::Member;
use crate::value::Value;
use crate::view::View;

#[derive(Debug)]
pub struct StructShape {
    pub members: Vec<Member>,
    /// Default bytes copied in before keyed initializers apply.
    pub template: Option<Vec<u8>>,
    /// Index of the backing integer member.
    pub backing: Option<usize>,
    pub tuple: bool,
}

impl StructShape {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .position(|(i, m)| Some(i) != self.backing && m.label(i) == name)
    }

    fn is_settable(&self, index: usize) -> bool {
        Some(index) != self.backing && self.members[index].member_type != MemberType::Void
    }
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<StructShape> {
    let members = cx.members(desc)?;
    let backing = members.iter().position(|m| {
        m.flags.is_backing_int
            || (desc.kind == StructureKind::PackedStruct && m.name.is_none() && m.is_scalar())
    });
    if let Some(template) = &desc.template
        && template.len() != desc.byte_size
    {
        return Err(ViewError::Unsupported(format!(
            "{}: template of {} bytes for a {}-byte struct",
            desc.name,
            template.len(),
            desc.byte_size
        )));
    }
    Ok(StructShape {
        members,
        template: desc.template.clone(),
        backing,
        tuple: desc.flags.is_tuple,
    })
}

fn no_property(view: &View, name: &str) -> ViewError {
    ViewError::NoProperty {
        type_name: view.type_name().to_owned(),
        name: name.to_owned(),
    }
}

pub(crate) fn get(view: &View, shape: &StructShape, name: &str) -> Result<Value> {
    let index = shape.index_of(name).ok_or_else(|| no_property(view, name))?;
    view.read_member(&shape.members[index], index, 0)
}

pub(crate) fn set(view: &View, shape: &StructShape, name: &str, value: &Value) -> Result<()> {
    view.ensure_writable()?;
    let index = shape.index_of(name).ok_or_else(|| no_property(view, name))?;
    if shape.members[index].flags.is_read_only {
        return Err(ViewError::ReadOnly {
            type_name: format!("{}.{name}", view.type_name()),
        });
    }
    view.write_member(&shape.members[index], index, 0, value)
}

pub(crate) fn entries(view: &View, shape: &StructShape) -> Vec<(String, Result<Value>)> {
    shape
        .members
        .iter()
        .enumerate()
        .filter(|(i, m)| Some(*i) != shape.backing && (m.name.is_some() || shape.tuple))
        .map(|(i, m)| (m.label(i), view.read_member(m, i, 0)))
        .collect()
}

pub(crate) fn to_int(view: &View, shape: &StructShape) -> Result<Value> {
    let index = shape.backing.ok_or_else(|| {
        ViewError::Unsupported(format!("{} has no backing integer", view.type_name()))
    })?;
    view.read_member(&shape.members[index], index, 0)
}

fn apply_template(view: &View, shape: &StructShape) -> Result<bool> {
    match &shape.template {
        Some(template) => {
            view.window().copy_from_slice(template)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn assign_record(view: &View, shape: &StructShape, pairs: &[(String, Value)]) -> Result<()> {
    let mut targets = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        let index = shape
            .index_of(key)
            .filter(|&i| shape.is_settable(i))
            .ok_or_else(|| no_property(view, key))?;
        targets.push((index, value));
    }
    let given: HashSet<usize> = targets.iter().map(|(i, _)| *i).collect();
    let templated = shape.template.is_some();
    let missing: Vec<String> = shape
        .members
        .iter()
        .enumerate()
        .filter(|(i, m)| {
            shape.is_settable(*i)
                && (m.name.is_some() || shape.tuple)
                && !given.contains(i)
                && (!templated || m.flags.is_required)
        })
        .map(|(i, m)| m.label(i))
        .collect();
    if !missing.is_empty() {
        return Err(ViewError::MissingMembers {
            type_name: view.type_name().to_owned(),
            members: missing,
        });
    }
    staged(view, |target| {
        apply_template(target, shape)?;
        for (index, value) in &targets {
            target.write_member(&shape.members[*index], *index, 0, value)?;
        }
        Ok(())
    })
}

/// Run `write` against a scratch copy first; a value rejected there never
/// reaches `view`. Should the real write still fail, the old bytes return.
fn staged(view: &View, write: impl Fn(&View) -> Result<()>) -> Result<()> {
    let snapshot = view.bytes()?;
    let scratch = View::new(
        view.env().clone(),
        Rc::clone(view.runtime_type()),
        ByteWindow::host_from(snapshot.clone(), view.window().align()),
        view.len(),
    );
    write(&scratch)?;
    if let Err(err) = write(view) {
        view.window().copy_from_slice(&snapshot)?;
        return Err(err);
    }
    Ok(())
}

fn assign_positional(view: &View, shape: &StructShape, items: &[Value]) -> Result<()> {
    let slots: Vec<usize> = (0..shape.members.len())
        .filter(|&i| shape.is_settable(i))
        .collect();
    if slots.len() != items.len() {
        return Err(ViewError::ArrayLengthMismatch {
            type_name: view.type_name().to_owned(),
            expected: slots.len(),
            received: items.len(),
        });
    }
    staged(view, |target| {
        for (&index, item) in slots.iter().zip(items) {
            target.write_member(&shape.members[index], index, 0, item)?;
        }
        Ok(())
    })
}

pub(crate) fn assign(view: &View, shape: &StructShape, value: &Value) -> Result<()> {
    if let (Value::Int(_) | Value::BigInt(_), Some(index)) = (value, shape.backing) {
        return view.write_member(&shape.members[index], index, 0, value);
    }
    match value {
        Value::Record(pairs) => assign_record(view, shape, pairs),
        Value::List(items) if shape.tuple => assign_positional(view, shape, items),
        Value::Null => {
            if apply_template(view, shape)? {
                Ok(())
            } else {
                Err(ViewError::MissingInitializer {
                    type_name: view.type_name().to_owned(),
                })
            }
        }
        other => Err(ViewError::InvalidInitializer {
            type_name: view.type_name().to_owned(),
            expected: if shape.tuple {
                "record or list of members".into()
            } else {
                "record of members".into()
            },
            received: other.describe(),
        }),
    }
}
