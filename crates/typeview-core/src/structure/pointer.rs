//! Pointers: single, many, slice and opaque-target.
//!
//! A pointer's own bytes hold an address word, followed by a length word for
//! slice pointers. Where the pointer lives decides how its target is tracked:
//!
//! - Resident pointers (in fixed memory) are the address word. Every
//!   dereference re-reads it and re-derives the target view when address or
//!   length moved; assignment writes the new address through immediately.
//! - Host pointers keep the target view itself. The address word stays zero
//!   until a call exports the target, and is only consulted when no target is
//!   linked (after the foreign side redirected the pointer).
//!
//! Targets inside freed foreign regions are refused as stale instead of read.

use std::rc::Rc;

use typeview_membrane::TemporalState;
use typeview_membrane::linear::{word_from_bytes, word_to_bytes};

use crate::error::{Result, ViewError};
use crate::layout::{StructureDescriptor, TypeId};
use crate::structure::members::Member;
use crate::structure::{DefineContext, RuntimeType, Shape};
use crate::value::Value;
use crate::view::View;

#[derive(Debug)]
pub struct PointerShape {
    pub target: TypeId,
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<PointerShape> {
    let target: Member = cx.first_member(desc)?;
    let target = target.structure.ok_or_else(|| {
        ViewError::Unsupported(format!("{}: pointer without target type", desc.name))
    })?;
    Ok(PointerShape { target })
}

fn word_layout(view: &View) -> (usize, bool, bool) {
    let config = view.env().config();
    (
        config.address_size,
        config.endianness.is_little(),
        view.runtime_type().flags.is_slice,
    )
}

/// Address and length words as stored in the pointer's bytes.
pub(crate) fn read_words(view: &View) -> Result<(usize, usize)> {
    let (size, little_endian, has_length) = word_layout(view);
    let decode = |bytes: &[u8], at: usize| {
        bytes
            .get(at..at + size)
            .map_or(0, |raw| usize::try_from(word_from_bytes(raw, little_endian)).unwrap_or(usize::MAX))
    };
    Ok(view.window().read(|bytes| {
        let address = decode(bytes, 0);
        let length = if has_length { decode(bytes, size) } else { 0 };
        (address, length)
    })?)
}

/// Store the address (and length) words, bypassing read-only checks.
pub(crate) fn write_words(view: &View, address: usize, length: usize) -> Result<()> {
    let (size, little_endian, has_length) = word_layout(view);
    let address = word_to_bytes(address as u64, size, little_endian);
    let length = word_to_bytes(length as u64, size, little_endian);
    view.window().write(|bytes| {
        if let Some(dest) = bytes.get_mut(..size) {
            dest.copy_from_slice(&address);
        }
        if has_length && let Some(dest) = bytes.get_mut(size..size * 2) {
            dest.copy_from_slice(&length);
        }
    })?;
    Ok(())
}

/// True when the pointer refers to something.
pub(crate) fn is_linked(view: &View) -> Result<bool> {
    if !view.is_fixed() && view.pointer_slot().borrow().target.is_some() {
        return Ok(true);
    }
    Ok(read_words(view)?.0 != 0)
}

fn ensure_live(view: &View, address: usize) -> Result<()> {
    let facts = view.env().module().registry().classify(address);
    if facts.temporal == TemporalState::Freed {
        return Err(ViewError::StalePointer {
            type_name: view.type_name().to_owned(),
            address,
        });
    }
    Ok(())
}

/// Element count of the target at `address`.
fn target_length(view: &View, target: &RuntimeType, address: usize, stored: usize) -> Result<usize> {
    if view.runtime_type().flags.is_slice {
        return Ok(stored);
    }
    match &target.shape {
        Shape::Slice(seq) => match seq.sentinel {
            Some(sentinel) => scan_sentinel(view, address, seq.stride(), sentinel.value),
            None => Ok(1),
        },
        _ => Ok(1),
    }
}

/// Count elements before the first sentinel in foreign memory.
fn scan_sentinel(view: &View, address: usize, stride: usize, sentinel: i128) -> Result<usize> {
    let memory = view.env().module().memory();
    let little_endian = view.env().config().endianness.is_little();
    let width = (stride * 8).min(127);
    let mask = (1_i128 << width) - 1;
    let limit = memory.size().saturating_sub(address) / stride.max(1);
    for index in 0..limit {
        let raw = memory.read(address + index * stride, stride.min(8))?;
        if i128::from(word_from_bytes(&raw, little_endian)) == sentinel & mask {
            return Ok(index);
        }
    }
    Err(ViewError::MissingSentinel {
        type_name: view.type_name().to_owned(),
        sentinel,
    })
}

fn guard(view: &View, target: View) -> View {
    if view.runtime_type().flags.is_const || view.is_read_only() {
        target.read_only_alias()
    } else {
        target
    }
}

pub(crate) fn target(view: &View, shape: &PointerShape) -> Result<Option<View>> {
    if !view.is_fixed() {
        let cached = view.pointer_slot().borrow().target.clone();
        if let Some(target) = cached {
            if let Some(address) = target.address()
                && !target.window().is_live()
            {
                return Err(ViewError::StalePointer {
                    type_name: view.type_name().to_owned(),
                    address,
                });
            }
            return Ok(Some(guard(view, target)));
        }
    }
    let (address, stored) = read_words(view)?;
    if address == 0 {
        if view.is_fixed() {
            view.pointer_slot().borrow_mut().unlink();
        }
        return Ok(None);
    }
    ensure_live(view, address)?;
    let ty = view.env().ty(shape.target)?;
    let length = target_length(view, &ty, address, stored)?;
    let cached = view.pointer_slot().borrow().target.clone();
    let target = match cached {
        Some(target) if target.address() == Some(address) && target.len() == length => target,
        _ => {
            let target = view.env().view_at(shape.target, address, Some(length))?;
            view.pointer_slot().borrow_mut().link(target.clone());
            target
        }
    };
    Ok(Some(guard(view, target)))
}

fn set_target(view: &View, target: View) -> Result<()> {
    if view.is_fixed() && !target.is_fixed() {
        return Err(ViewError::FixedMemoryTargetRequired {
            type_name: view.type_name().to_owned(),
        });
    }
    let address = if view.is_fixed() {
        target.address().unwrap_or(0)
    } else {
        0
    };
    write_words(view, address, target.len())?;
    view.pointer_slot().borrow_mut().link(target);
    Ok(())
}

fn unset(view: &View) -> Result<()> {
    if !view.runtime_type().flags.is_nullable {
        return Err(ViewError::NullPointer {
            type_name: view.type_name().to_owned(),
        });
    }
    view.pointer_slot().borrow_mut().unlink();
    write_words(view, 0, 0)
}

pub(crate) fn assign(view: &View, shape: &PointerShape, value: &Value) -> Result<()> {
    let flags = view.runtime_type().flags;
    match value {
        Value::Null => unset(view),
        Value::View(other) => match &other.runtime_type().shape {
            Shape::Pointer(source) if source.target == shape.target => {
                if other.runtime_type().flags.is_const && !flags.is_const {
                    return Err(ViewError::ConstantConstraint {
                        type_name: view.type_name().to_owned(),
                    });
                }
                match other.target()? {
                    Some(target) => set_target(view, target),
                    None => unset(view),
                }
            }
            _ if other.type_id() == shape.target => {
                if other.is_read_only() && !flags.is_const {
                    return Err(ViewError::ReadOnlyTarget {
                        type_name: view.type_name().to_owned(),
                    });
                }
                set_target(view, other.clone())
            }
            _ => Err(ViewError::NoCastingToPointer {
                type_name: view.type_name().to_owned(),
                received: value.describe(),
            }),
        },
        plain => {
            let target_ty = view.env().ty(shape.target)?;
            if !matches!(target_ty.shape, Shape::Slice(_)) {
                return Err(ViewError::NoCastingToPointer {
                    type_name: view.type_name().to_owned(),
                    received: plain.describe(),
                });
            }
            let target = if view.is_fixed() {
                view.env().create_fixed(shape.target, plain.clone())?
            } else {
                view.env().create(shape.target, plain.clone())?
            };
            if flags.is_const {
                target.make_read_only();
            }
            set_target(view, target)
        }
    }
}

/// Re-derive the target of a slice pointer with `length` elements.
pub(crate) fn set_length(view: &View, shape: &PointerShape, length: usize) -> Result<()> {
    if !view.runtime_type().flags.is_slice {
        return Err(ViewError::Unsupported(format!(
            "{} is not a slice pointer",
            view.type_name()
        )));
    }
    view.ensure_writable()?;
    let ty = view.env().ty(shape.target)?;
    if view.is_fixed() {
        let (address, _) = read_words(view)?;
        check_capacity(view, &ty, address, length)?;
        write_words(view, address, length)?;
        return Ok(());
    }
    let full = {
        let slot = view.pointer_slot().borrow();
        slot.full.clone().or_else(|| slot.target.clone())
    };
    let full = match full {
        Some(full) => full,
        None => match target(view, shape)? {
            Some(target) => target,
            None => {
                return Err(ViewError::NullPointer {
                    type_name: view.type_name().to_owned(),
                });
            }
        },
    };
    if let Some(address) = full.address() {
        check_capacity(view, &ty, address, length)?;
        let target = view.env().view_at(shape.target, address, Some(length))?;
        if full.is_read_only() {
            target.make_read_only();
        }
        write_words(view, 0, length)?;
        let mut slot = view.pointer_slot().borrow_mut();
        slot.target = Some(target);
        if slot.full.is_none() {
            slot.full = Some(full);
        }
        return Ok(());
    }
    let size = ty.instance_size(length);
    if size > full.window().len() {
        return Err(ViewError::OutOfBound {
            type_name: view.type_name().to_owned(),
            index: length,
            length: full.len(),
        });
    }
    let window = full.window().sub(0, size)?;
    let target = View::new(view.env().clone(), Rc::clone(&ty), window, length);
    if full.is_read_only() {
        target.make_read_only();
    }
    write_words(view, 0, length)?;
    let mut slot = view.pointer_slot().borrow_mut();
    slot.target = Some(target);
    if slot.full.is_none() {
        slot.full = Some(full);
    }
    Ok(())
}

fn check_capacity(view: &View, ty: &RuntimeType, address: usize, length: usize) -> Result<()> {
    if address == 0 {
        return Err(ViewError::NullPointer {
            type_name: view.type_name().to_owned(),
        });
    }
    ensure_live(view, address)?;
    let facts = view.env().module().registry().classify(address);
    if let Some(remaining) = facts.remaining
        && ty.instance_size(length) > remaining
    {
        return Err(ViewError::OutOfBound {
            type_name: view.type_name().to_owned(),
            index: length,
            length: remaining / ty.instance_size(1).max(1),
        });
    }
    Ok(())
}

/// Point at `address` after the foreign side redirected the pointer. The
/// target is re-derived on the next dereference.
pub(crate) fn relink(view: &View, address: usize, length: usize) -> Result<()> {
    if !view.is_fixed() {
        view.pointer_slot().borrow_mut().unlink();
    }
    write_words(view, address, length)
}
