//! Contiguous sequences: fixed-length arrays and the element storage behind
//! slices.
//!
//! A sentinel-terminated sequence of length `n` stores `n + 1` elements, the
//! last one holding the terminator. The terminator must appear exactly once,
//! at the final position, on bulk initialization and on element assignment.

use typeview_membrane::ByteWindow;

use crate::error::{Result, ViewError};
use crate::layout::{MemberType, SentinelDescriptor, StructureDescriptor};
use crate::structure::{DefineContext, Shape};
use crate::structure::members::Member;
use crate::value::Value;
use crate::view::View;

#[derive(Debug)]
pub struct SequenceShape {
    pub element: Member,
    /// Fixed element count; `None` for slices.
    pub length: Option<usize>,
    pub sentinel: Option<SentinelDescriptor>,
}

impl SequenceShape {
    #[must_use]
    pub fn stride(&self) -> usize {
        self.element.stride()
    }

    #[must_use]
    pub fn sentinel_slots(&self) -> usize {
        usize::from(self.sentinel.is_some())
    }

    /// Element width when the sequence can hold text.
    #[must_use]
    pub fn text_width(&self) -> Option<usize> {
        let numeric = matches!(self.element.member_type, MemberType::Uint | MemberType::Int);
        match self.element.bit_size {
            8 | 16 if numeric && self.element.stride() * 8 == self.element.bit_size => {
                Some(self.element.bit_size)
            }
            _ => None,
        }
    }

    fn base_bit(&self, index: usize) -> usize {
        index * self.stride() * 8
    }
}

pub(crate) fn sequence(desc: &StructureDescriptor, cx: &DefineContext<'_>, length: Option<usize>) -> Result<SequenceShape> {
    let element = cx.first_member(desc)?;
    if element.stride() == 0 {
        return Err(ViewError::Unsupported(format!(
            "{}: zero-sized elements",
            desc.name
        )));
    }
    if desc.sentinel.is_some() && !element.is_scalar() {
        return Err(ViewError::Unsupported(format!(
            "{}: sentinel on non-scalar elements",
            desc.name
        )));
    }
    Ok(SequenceShape {
        element,
        length,
        sentinel: desc.sentinel,
    })
}

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<SequenceShape> {
    let length = desc.length.ok_or_else(|| {
        ViewError::Unsupported(format!("{}: array without length", desc.name))
    })?;
    sequence(desc, cx, Some(length))
}

fn out_of_bound(view: &View, index: usize) -> ViewError {
    ViewError::OutOfBound {
        type_name: view.type_name().to_owned(),
        index,
        length: view.len(),
    }
}

pub(crate) fn at(view: &View, shape: &SequenceShape, index: usize) -> Result<Value> {
    if index >= view.len() {
        return Err(out_of_bound(view, index));
    }
    view.read_member(&shape.element, index, shape.base_bit(index))
}

pub(crate) fn set_at(view: &View, shape: &SequenceShape, index: usize, value: &Value) -> Result<()> {
    view.ensure_writable()?;
    if index >= view.len() {
        return Err(out_of_bound(view, index));
    }
    if let Some(sentinel) = shape.sentinel
        && sentinel.is_required
        && value.as_int() == Some(sentinel.value)
    {
        return Err(ViewError::MisplacedSentinel {
            type_name: view.type_name().to_owned(),
            sentinel: sentinel.value,
            index,
            last: view.len(),
        });
    }
    view.write_member(&shape.element, index, shape.base_bit(index), value)
}

/// Check that `items` carries the terminator at its final position only.
fn check_sentinel(view: &View, sentinel: SentinelDescriptor, items: &[Option<i128>]) -> Result<()> {
    let last = items.len().saturating_sub(1);
    if items.last().copied().flatten() != Some(sentinel.value) {
        return Err(ViewError::MissingSentinel {
            type_name: view.type_name().to_owned(),
            sentinel: sentinel.value,
        });
    }
    if sentinel.is_required
        && let Some(index) = items[..last].iter().position(|v| *v == Some(sentinel.value))
    {
        return Err(ViewError::MisplacedSentinel {
            type_name: view.type_name().to_owned(),
            sentinel: sentinel.value,
            index,
            last,
        });
    }
    Ok(())
}

fn write_sentinel(view: &View, shape: &SequenceShape) -> Result<()> {
    if let Some(sentinel) = shape.sentinel {
        let index = view.len();
        view.write_member(&shape.element, index, shape.base_bit(index), &Value::Int(sentinel.value))?;
    }
    Ok(())
}

fn encode_text(shape: &SequenceShape, text: &str) -> Option<Vec<Value>> {
    match shape.text_width()? {
        8 => Some(text.bytes().map(Value::from).collect()),
        _ => Some(text.encode_utf16().map(Value::from).collect()),
    }
}

pub(crate) fn assign(view: &View, shape: &SequenceShape, value: &Value) -> Result<()> {
    let length = view.len();
    let stored = length + shape.sentinel_slots();
    match value {
        Value::List(items) => {
            if items.len() != stored {
                if shape.sentinel.is_some() && items.len() == length {
                    return Err(ViewError::MissingSentinel {
                        type_name: view.type_name().to_owned(),
                        sentinel: shape.sentinel.map_or(0, |s| s.value),
                    });
                }
                return Err(ViewError::ArrayLengthMismatch {
                    type_name: view.type_name().to_owned(),
                    expected: stored,
                    received: items.len(),
                });
            }
            if let Some(sentinel) = shape.sentinel {
                let ints: Vec<Option<i128>> = items.iter().map(Value::as_int).collect();
                check_sentinel(view, sentinel, &ints)?;
            }
            for (index, item) in items.iter().enumerate() {
                view.write_member(&shape.element, index, shape.base_bit(index), item)?;
            }
            Ok(())
        }
        Value::String(text) => {
            let units = encode_text(shape, text).ok_or_else(|| ViewError::InvalidInitializer {
                type_name: view.type_name().to_owned(),
                expected: "list of elements".into(),
                received: value.describe(),
            })?;
            if units.len() != length {
                return Err(ViewError::ArrayLengthMismatch {
                    type_name: view.type_name().to_owned(),
                    expected: length,
                    received: units.len(),
                });
            }
            if let Some(sentinel) = shape.sentinel
                && sentinel.is_required
                && let Some(index) = units.iter().position(|u| u.as_int() == Some(sentinel.value))
            {
                return Err(ViewError::MisplacedSentinel {
                    type_name: view.type_name().to_owned(),
                    sentinel: sentinel.value,
                    index,
                    last: length,
                });
            }
            for (index, unit) in units.iter().enumerate() {
                view.write_member(&shape.element, index, shape.base_bit(index), unit)?;
            }
            write_sentinel(view, shape)
        }
        Value::Bytes(bytes) => {
            let expected = stored * shape.stride();
            if bytes.len() != expected {
                return Err(ViewError::ArrayLengthMismatch {
                    type_name: view.type_name().to_owned(),
                    expected,
                    received: bytes.len(),
                });
            }
            if let Some(sentinel) = shape.sentinel {
                let staged = ByteWindow::host_from(bytes.clone(), 1);
                let ints = (0..stored)
                    .map(|i| {
                        shape
                            .element
                            .read(&staged, shape.base_bit(i), view.type_name())
                            .map(|v| v.as_int())
                    })
                    .collect::<Result<Vec<_>>>()?;
                check_sentinel(view, sentinel, &ints)?;
            }
            view.window().copy_from_slice(bytes)?;
            Ok(())
        }
        Value::Int(count) if usize::try_from(*count).ok() == Some(length) => {
            view.window().reset()?;
            write_sentinel(view, shape)
        }
        Value::Null => Err(ViewError::MissingInitializer {
            type_name: view.type_name().to_owned(),
        }),
        Value::View(other) => copy_elements(view, shape, other),
        other => Err(ViewError::InvalidInitializer {
            type_name: view.type_name().to_owned(),
            expected: "list, string or bytes".into(),
            received: other.describe(),
        }),
    }
}

/// Element-wise copy from another sequence of equal length.
fn copy_elements(view: &View, shape: &SequenceShape, other: &View) -> Result<()> {
    let sequence = matches!(
        other.runtime_type().shape,
        Shape::Array(_) | Shape::Slice(_) | Shape::Vector(_)
    );
    if !sequence {
        return Err(ViewError::InvalidInitializer {
            type_name: view.type_name().to_owned(),
            expected: "list, string or bytes".into(),
            received: Value::View(other.clone()).describe(),
        });
    }
    if other.len() != view.len() {
        return Err(ViewError::ArrayLengthMismatch {
            type_name: view.type_name().to_owned(),
            expected: view.len(),
            received: other.len(),
        });
    }
    for index in 0..view.len() {
        let item = other.at(index)?;
        view.write_member(&shape.element, index, shape.base_bit(index), &item)?;
    }
    write_sentinel(view, shape)
}

pub(crate) fn string(view: &View, shape: &SequenceShape) -> Result<String> {
    let width = shape.text_width().ok_or_else(|| {
        ViewError::Unsupported(format!("{} is not a text sequence", view.type_name()))
    })?;
    if width == 8 {
        let bytes = view.window().read(|b| b[..view.len()].to_vec())?;
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }
    let units = (0..view.len())
        .map(|i| {
            view.read_member(&shape.element, i, shape.base_bit(i))
                .map(|v| v.as_int().and_then(|n| u16::try_from(n).ok()).unwrap_or(0xFFFD))
        })
        .collect::<Result<Vec<u16>>>()?;
    Ok(String::from_utf16_lossy(&units))
}
