//! Opaque types: layout unknown to the host. They exist only as pointer
//! targets; construction and value access are refused by the view layer.

use crate::error::{Result, ViewError};
use crate::layout::StructureDescriptor;

pub(crate) fn define(desc: &StructureDescriptor) -> Result<()> {
    if !desc.members.is_empty() {
        return Err(ViewError::Unsupported(format!(
            "{}: opaque type with members",
            desc.name
        )));
    }
    Ok(())
}
