#![allow(dead_code)]

use std::rc::Rc;

use typeview_core::{
    Env, HostedModule, MembraneConfig, MemberDescriptor, MemberFlags, MemberType,
    StructureDescriptor, StructureFlags, StructureKind, TypeId,
};

pub fn hosted_with(config: MembraneConfig) -> (Env, Rc<HostedModule>) {
    let module = Rc::new(HostedModule::new(config));
    let env = Env::new(Rc::clone(&module), config);
    (env, module)
}

pub fn hosted() -> (Env, Rc<HostedModule>) {
    hosted_with(MembraneConfig::default())
}

pub fn primitive(env: &Env, name: &str, member_type: MemberType, bits: usize) -> TypeId {
    let bytes = bits.div_ceil(8);
    env.define(
        &StructureDescriptor::new(name, StructureKind::Primitive, bytes, bytes)
            .member(MemberDescriptor::scalar("value", member_type, 0, bits)),
    )
    .expect("primitive")
}

pub fn i32_type(env: &Env) -> TypeId {
    primitive(env, "i32", MemberType::Int, 32)
}

pub fn u8_type(env: &Env) -> TypeId {
    primitive(env, "u8", MemberType::Uint, 8)
}

/// `extern struct { x: i32, y: i32 }`
pub fn point(env: &Env) -> TypeId {
    env.define(
        &StructureDescriptor::new("Point", StructureKind::ExternStruct, 8, 4)
            .member(MemberDescriptor::scalar("x", MemberType::Int, 0, 32))
            .member(MemberDescriptor::scalar("y", MemberType::Int, 4, 32)),
    )
    .expect("point")
}

pub fn pointer_flags() -> StructureFlags {
    StructureFlags {
        has_pointer: true,
        is_single: true,
        ..StructureFlags::default()
    }
}

/// Single-item pointer to `target`.
pub fn pointer_to(env: &Env, name: &str, target: TypeId, flags: StructureFlags) -> TypeId {
    env.define(
        &StructureDescriptor::new(name, StructureKind::Pointer, 4, 4)
            .with_flags(flags)
            .member(MemberDescriptor::object("target", target, 0, 4)),
    )
    .expect("pointer")
}

/// `[]T` element storage for a scalar element.
pub fn slice_of(env: &Env, name: &str, member_type: MemberType, bits: usize) -> TypeId {
    let bytes = bits.div_ceil(8);
    env.define(
        &StructureDescriptor::new(name, StructureKind::Slice, bytes, bytes)
            .member(MemberDescriptor::scalar("element", member_type, 0, bits)),
    )
    .expect("slice")
}

/// Fat pointer (address and length words) to `slice`.
pub fn slice_pointer(env: &Env, name: &str, slice: TypeId, is_const: bool) -> TypeId {
    env.define(
        &StructureDescriptor::new(name, StructureKind::Pointer, 8, 4)
            .with_flags(StructureFlags {
                has_pointer: true,
                is_slice: true,
                is_const,
                ..StructureFlags::default()
            })
            .member(MemberDescriptor::object("target", slice, 0, 8)),
    )
    .expect("slice pointer")
}

pub fn required() -> MemberFlags {
    MemberFlags {
        is_required: true,
        ..MemberFlags::default()
    }
}
