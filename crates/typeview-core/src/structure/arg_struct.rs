//! Argument structs: the packed argument list of one call, return value slot
//! first.
//!
//! Variadic functions get a per-call layout: extra arguments are appended
//! after the fixed ones at their natural alignment, and the invocation
//! primitive receives an attribute table describing every slot.

use std::rc::Rc;

use crate::env::Env;
use crate::error::{Result, ViewError};
use crate::layout::{MemberDescriptor, MemberType, StructureDescriptor, StructureKind};
use crate::structure::members::Member;
use crate::structure::{DefineContext, RuntimeType, Shape};
use crate::value::Value;
use crate::view::View;

/// Numeric class of an argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgClass {
    Bool,
    Int,
    Uint,
    Float,
    Object,
}

/// Placement of one slot of an argument struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgAttributes {
    pub offset: usize,
    pub bit_size: usize,
    pub alignment: usize,
    pub class: ArgClass,
}

#[derive(Debug)]
pub struct ArgStructShape {
    /// Return value at index 0, then the arguments.
    pub members: Vec<Member>,
    pub variadic: bool,
}

impl ArgStructShape {
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.members.len().saturating_sub(1)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .position(|(i, m)| m.label(i) == name)
    }
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<ArgStructShape> {
    let members = cx.members(desc)?;
    if members.is_empty() {
        return Err(ViewError::Unsupported(format!(
            "{}: argument struct without return slot",
            desc.name
        )));
    }
    Ok(ArgStructShape {
        members,
        variadic: desc.kind == StructureKind::VariadicStruct,
    })
}

fn no_property(view: &View, name: &str) -> ViewError {
    ViewError::NoProperty {
        type_name: view.type_name().to_owned(),
        name: name.to_owned(),
    }
}

pub(crate) fn get(view: &View, shape: &ArgStructShape, name: &str) -> Result<Value> {
    let index = shape.index_of(name).ok_or_else(|| no_property(view, name))?;
    view.read_member(&shape.members[index], index, 0)
}

pub(crate) fn set(view: &View, shape: &ArgStructShape, name: &str, value: &Value) -> Result<()> {
    view.ensure_writable()?;
    let index = shape.index_of(name).ok_or_else(|| no_property(view, name))?;
    view.write_member(&shape.members[index], index, 0, value)
}

pub(crate) fn entries(view: &View, shape: &ArgStructShape) -> Vec<(String, Result<Value>)> {
    shape
        .members
        .iter()
        .enumerate()
        .map(|(i, m)| (m.label(i), view.read_member(m, i, 0)))
        .collect()
}

pub(crate) fn assign(view: &View, shape: &ArgStructShape, value: &Value) -> Result<()> {
    let args: &[Value] = match value {
        Value::List(items) => items,
        Value::Null => &[],
        other => {
            return Err(ViewError::InvalidInitializer {
                type_name: view.type_name().to_owned(),
                expected: "argument list".into(),
                received: other.describe(),
            });
        }
    };
    if args.len() != shape.arg_count() {
        return Err(ViewError::ArgumentCountMismatch {
            type_name: view.type_name().to_owned(),
            expected: shape.arg_count(),
            received: args.len(),
        });
    }
    for (position, arg) in args.iter().enumerate() {
        let index = position + 1;
        let member = &shape.members[index];
        view.write_member(member, index, 0, arg)
            .map_err(|source| ViewError::ArgumentError {
                function: view.type_name().to_owned(),
                index: position,
                label: member.label(position),
                source: Box::new(source),
            })?;
    }
    Ok(())
}

fn round_up(value: usize, align: usize) -> usize {
    value.next_multiple_of(align.max(1))
}

/// Layout of a variadic argument struct extended with `extras`.
///
/// Integers and booleans travel as `i32`, numbers as `f64`, objects at their
/// own size and alignment.
pub(crate) fn variadic_type(env: &Env, ty: &Rc<RuntimeType>, extras: &[Value]) -> Result<Rc<RuntimeType>> {
    let Shape::ArgStruct(shape) = &ty.shape else {
        return Err(ViewError::Unsupported(format!(
            "{} is not an argument struct",
            ty.name
        )));
    };
    let little_endian = env.config().endianness.is_little();
    let mut members = shape.members.clone();
    let mut flags = ty.flags;
    let mut align = ty.align;
    let mut end = members
        .iter()
        .map(|m| m.bit_offset / 8 + m.stride())
        .max()
        .unwrap_or(0);
    for (position, extra) in extras.iter().enumerate() {
        let label = (shape.arg_count() + position).to_string();
        let (desc, slot_align) = match extra {
            Value::View(view) => {
                let extra_ty = view.runtime_type();
                let size = view.window().len();
                let slot_align = extra_ty.align.max(1);
                let offset = round_up(end, slot_align);
                flags.has_pointer |= extra_ty.flags.has_pointer
                    || matches!(extra_ty.shape, Shape::Pointer(_));
                (MemberDescriptor::object(&label, extra_ty.id, offset, size), slot_align)
            }
            Value::Int(_) | Value::BigInt(_) | Value::Bool(_) => {
                let offset = round_up(end, 4);
                (MemberDescriptor::scalar(&label, MemberType::Int, offset, 32), 4)
            }
            Value::Float(_) => {
                let offset = round_up(end, 8);
                (MemberDescriptor::scalar(&label, MemberType::Float, offset, 64), 8)
            }
            other => {
                return Err(ViewError::ArgumentError {
                    function: ty.name.clone(),
                    index: shape.arg_count() + position,
                    label,
                    source: Box::new(ViewError::InvalidInitializer {
                        type_name: ty.name.clone(),
                        expected: "integer, number or object".into(),
                        received: other.describe(),
                    }),
                });
            }
        };
        let member = Member::from_descriptor(&desc, &ty.name, little_endian)?;
        end = desc.bit_offset / 8 + member.stride();
        align = align.max(slot_align);
        members.push(member);
    }
    Ok(Rc::new(RuntimeType {
        id: ty.id,
        name: ty.name.clone(),
        kind: StructureKind::VariadicStruct,
        byte_size: round_up(end, align),
        align,
        flags,
        shape: Shape::ArgStruct(ArgStructShape {
            members,
            variadic: true,
        }),
    }))
}

fn scalar_class(member_type: MemberType) -> ArgClass {
    match member_type {
        MemberType::Bool => ArgClass::Bool,
        MemberType::Int => ArgClass::Int,
        MemberType::Float => ArgClass::Float,
        MemberType::Object => ArgClass::Object,
        _ => ArgClass::Uint,
    }
}

/// Attribute table for every slot of `ty`, return value included.
pub fn attributes(env: &Env, ty: &RuntimeType) -> Result<Vec<ArgAttributes>> {
    let Shape::ArgStruct(shape) = &ty.shape else {
        return Err(ViewError::Unsupported(format!(
            "{} is not an argument struct",
            ty.name
        )));
    };
    shape
        .members
        .iter()
        .map(|member| {
            let offset = member.bit_offset / 8;
            let Some(structure) = member.structure.filter(|_| member.is_object()) else {
                return Ok(ArgAttributes {
                    offset,
                    bit_size: member.bit_size,
                    alignment: member.stride().next_power_of_two(),
                    class: scalar_class(member.member_type),
                });
            };
            let target = env.ty(structure)?;
            let (bit_size, class) = match &target.shape {
                Shape::Primitive(p) => (p.value.bit_size, scalar_class(p.value.member_type)),
                _ => (member.byte_size * 8, ArgClass::Object),
            };
            Ok(ArgAttributes {
                offset,
                bit_size,
                alignment: target.align,
                class,
            })
        })
        .collect()
}
