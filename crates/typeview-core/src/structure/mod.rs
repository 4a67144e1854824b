//! Runtime types and the per-kind structure factories.
//!
//! A [`RuntimeType`] is the compiled form of a [`StructureDescriptor`]: member
//! accessors resolved, kind-specific metadata extracted into a [`Shape`].
//! Shapes refer to other types only by [`TypeId`], so descriptors may point
//! forward (or at themselves) within one definition batch.

pub mod arg_struct;
pub mod array;
pub mod enumeration;
pub mod error_set;
pub mod error_union;
pub mod members;
pub mod opaque;
pub mod optional;
pub mod pointer;
pub mod primitive;
pub mod slice;
pub mod structs;
pub mod union;
pub mod vector;

use std::rc::Rc;

use crate::env::Env;
use crate::error::{Result, ViewError};
use crate::error_registry::ErrorRegistry;
use crate::layout::{StructureDescriptor, StructureFlags, StructureKind, TypeId};
use crate::value::Value;
use crate::view::View;

pub use arg_struct::{ArgAttributes, ArgClass, ArgStructShape};
pub use array::SequenceShape;
pub use enumeration::EnumShape;
pub use error_set::ErrorSetShape;
pub use error_union::ErrorUnionShape;
pub use members::Member;
pub use optional::OptionalShape;
pub use pointer::PointerShape;
pub use primitive::PrimitiveShape;
pub use structs::StructShape;
pub use union::{UnionShape, UnionVariant};
pub use vector::VectorShape;

/// Kind-specific metadata of a runtime type.
#[derive(Debug)]
pub enum Shape {
    Primitive(PrimitiveShape),
    Array(SequenceShape),
    Slice(SequenceShape),
    Vector(VectorShape),
    Struct(StructShape),
    Union(UnionShape),
    Optional(OptionalShape),
    ErrorUnion(ErrorUnionShape),
    ErrorSet(ErrorSetShape),
    Enum(EnumShape),
    Pointer(PointerShape),
    Opaque,
    ArgStruct(ArgStructShape),
    Function { args: TypeId },
}

/// A defined foreign type.
#[derive(Debug)]
pub struct RuntimeType {
    pub id: TypeId,
    pub name: String,
    pub kind: StructureKind,
    pub byte_size: usize,
    pub align: usize,
    pub flags: StructureFlags,
    pub shape: Shape,
}

impl RuntimeType {
    /// Kinds whose instances read back as plain values when used as members.
    #[must_use]
    pub fn is_value_kind(&self) -> bool {
        matches!(
            self.kind,
            StructureKind::Primitive
                | StructureKind::Optional
                | StructureKind::ErrorUnion
                | StructureKind::Enum
                | StructureKind::ErrorSet
        )
    }

    /// Element count an instance gets when its length is implied by the type.
    #[must_use]
    pub fn default_length(&self, byte_len: usize) -> usize {
        match &self.shape {
            Shape::Array(seq) => seq.length.unwrap_or(0),
            Shape::Slice(seq) => {
                let stride = seq.stride().max(1);
                (byte_len / stride).saturating_sub(seq.sentinel_slots())
            }
            Shape::Vector(vector) => vector.length,
            _ => 1,
        }
    }

    /// Bytes an instance of `length` elements occupies.
    #[must_use]
    pub fn instance_size(&self, length: usize) -> usize {
        match &self.shape {
            Shape::Slice(seq) => (length + seq.sentinel_slots()) * seq.stride(),
            _ => self.byte_size,
        }
    }
}

/// Inputs shared by every factory while compiling a descriptor.
pub(crate) struct DefineContext<'a> {
    pub id: TypeId,
    pub little_endian: bool,
    pub errors: &'a ErrorRegistry,
}

impl DefineContext<'_> {
    pub(crate) fn members(&self, desc: &StructureDescriptor) -> Result<Vec<Member>> {
        desc.members
            .iter()
            .map(|m| Member::from_descriptor(m, &desc.name, self.little_endian))
            .collect()
    }

    pub(crate) fn first_member(&self, desc: &StructureDescriptor) -> Result<Member> {
        let member = desc.members.first().ok_or_else(|| {
            ViewError::Unsupported(format!("{}: descriptor has no members", desc.name))
        })?;
        Member::from_descriptor(member, &desc.name, self.little_endian)
    }
}

/// Compile `desc` into a runtime type with id `cx.id`.
pub(crate) fn build(desc: &StructureDescriptor, cx: &DefineContext<'_>) -> Result<RuntimeType> {
    let shape = match desc.kind {
        StructureKind::Primitive => Shape::Primitive(primitive::define(desc, cx)?),
        StructureKind::Array => Shape::Array(array::define(desc, cx)?),
        StructureKind::Slice => Shape::Slice(slice::define(desc, cx)?),
        StructureKind::Vector => Shape::Vector(vector::define(desc, cx)?),
        StructureKind::Struct | StructureKind::ExternStruct | StructureKind::PackedStruct => {
            Shape::Struct(structs::define(desc, cx)?)
        }
        StructureKind::ExternUnion | StructureKind::BareUnion | StructureKind::TaggedUnion => {
            Shape::Union(union::define(desc, cx)?)
        }
        StructureKind::Optional => Shape::Optional(optional::define(desc, cx)?),
        StructureKind::ErrorUnion => Shape::ErrorUnion(error_union::define(desc, cx)?),
        StructureKind::ErrorSet => Shape::ErrorSet(error_set::define(desc, cx)?),
        StructureKind::Enum => Shape::Enum(enumeration::define(desc, cx)?),
        StructureKind::Pointer => Shape::Pointer(pointer::define(desc, cx)?),
        StructureKind::Opaque => {
            opaque::define(desc)?;
            Shape::Opaque
        }
        StructureKind::ArgStruct | StructureKind::VariadicStruct => {
            Shape::ArgStruct(arg_struct::define(desc, cx)?)
        }
        StructureKind::Function => {
            let args = cx.first_member(desc)?.structure.ok_or_else(|| {
                ViewError::Unsupported(format!("{}: function without argument struct", desc.name))
            })?;
            Shape::Function { args }
        }
    };
    Ok(RuntimeType {
        id: cx.id,
        name: desc.name.clone(),
        kind: desc.kind,
        byte_size: desc.byte_size,
        align: desc.align.max(1),
        flags: desc.flags,
        shape,
    })
}

/// Allocate and initialize an instance of `ty`.
pub(crate) fn construct(env: &Env, ty: Rc<RuntimeType>, init: &Value, fixed: bool) -> Result<View> {
    match &ty.shape {
        Shape::Opaque => {
            return Err(ViewError::OpaqueConstruction {
                type_name: ty.name.clone(),
            });
        }
        Shape::Function { .. } => {
            return Err(ViewError::Unsupported(format!(
                "{}: functions are not constructible",
                ty.name
            )));
        }
        _ => {}
    }
    let length = match &ty.shape {
        Shape::Slice(seq) => slice::initial_length(&ty, seq, init)?,
        _ => ty.default_length(ty.byte_size),
    };
    let window = env.allocate(ty.instance_size(length), ty.align, fixed)?;
    let view = View::new(env.clone(), ty, window, length);
    if let Err(err) = view.assign(init.clone()) {
        if let Some(address) = view.address() {
            env.free(address)?;
        }
        return Err(err);
    }
    Ok(view)
}
