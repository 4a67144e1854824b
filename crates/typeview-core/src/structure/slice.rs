//! Variable-length sequences. A slice instance's length is fixed when it is
//! constructed, from the initializer's shape.

use std::rc::Rc;

use crate::error::{Result, ViewError};
use crate::layout::StructureDescriptor;
use crate::structure::array::{SequenceShape, sequence};
use crate::structure::{DefineContext, RuntimeType};
use crate::value::Value;

pub(crate) fn define(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<SequenceShape> {
    sequence(desc, cx, None)
}

/// Element count implied by `init`.
pub(crate) fn initial_length(ty: &Rc<RuntimeType>, shape: &SequenceShape, init: &Value) -> Result<usize> {
    let sentinel = shape.sentinel_slots();
    match init {
        Value::List(items) => Ok(items.len().saturating_sub(sentinel)),
        Value::String(text) => match shape.text_width() {
            Some(8) => Ok(text.len()),
            Some(_) => Ok(text.encode_utf16().count()),
            None => Err(ViewError::InvalidInitializer {
                type_name: ty.name.clone(),
                expected: "list of elements".into(),
                received: init.describe(),
            }),
        },
        Value::Bytes(bytes) => {
            let stride = shape.stride();
            if bytes.len() % stride != 0 {
                return Err(ViewError::ArrayLengthMismatch {
                    type_name: ty.name.clone(),
                    expected: bytes.len().next_multiple_of(stride),
                    received: bytes.len(),
                });
            }
            Ok((bytes.len() / stride).saturating_sub(sentinel))
        }
        Value::Int(count) => usize::try_from(*count).map_err(|_| ViewError::InvalidInitializer {
            type_name: ty.name.clone(),
            expected: "element count".into(),
            received: init.describe(),
        }),
        Value::View(other) => Ok(other.len()),
        Value::Null => Err(ViewError::MissingInitializer {
            type_name: ty.name.clone(),
        }),
        other => Err(ViewError::InvalidInitializer {
            type_name: ty.name.clone(),
            expected: "list, string, bytes or element count".into(),
            received: other.describe(),
        }),
    }
}
