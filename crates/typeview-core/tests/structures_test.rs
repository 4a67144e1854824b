mod common;

use common::{hosted, hosted_with, i32_type, point, pointer_flags, pointer_to, required, slice_of, u8_type};
use typeview_core::{
    ErrorKind, MembraneConfig, MemberDescriptor, MemberFlags, MemberType, SafetyLevel,
    StructureDescriptor, StructureFlags, StructureKind, TypeId, Value, ViewError,
};

#[test]
fn struct_round_trip_and_copy() {
    let (env, _module) = hosted();
    let pair = env
        .define(
            &StructureDescriptor::new("Pair", StructureKind::Struct, 8, 4)
                .member(MemberDescriptor::scalar("number1", MemberType::Int, 0, 32))
                .member(MemberDescriptor::scalar("number2", MemberType::Int, 4, 32)),
        )
        .expect("define");
    let a = env
        .create(pair, Value::record([("number1", 5), ("number2", 55)]))
        .expect("create");
    assert_eq!(a.get("number1").expect("number1"), Value::Int(5));
    assert_eq!(a.get("number2").expect("number2"), Value::Int(55));

    let b = env
        .create(pair, Value::record([("number1", 1), ("number2", 2)]))
        .expect("create");
    a.assign(&b).expect("copy");
    assert_eq!(a.bytes().expect("bytes"), b.bytes().expect("bytes"));
    assert_eq!(a.get("number2").expect("number2"), Value::Int(2));
    assert!(!a.same_object(&b));
}

#[test]
fn rejected_record_leaves_struct_unchanged() {
    let (env, _module) = hosted();
    let p = point(&env);
    for fixed in [false, true] {
        let v = if fixed {
            env.create_fixed(p, Value::record([("x", 1), ("y", 2)]))
        } else {
            env.create(p, Value::record([("x", 1), ("y", 2)]))
        }
        .expect("create");
        let before = v.bytes().expect("bytes");

        let err = v
            .assign(Value::record([("x", Value::Int(10)), ("y", Value::Int(1_i128 << 40))]))
            .expect_err("y overflows");
        assert_eq!(err.kind(), ErrorKind::Overflow, "fixed={fixed}: {err:?}");
        assert_eq!(v.bytes().expect("bytes"), before, "fixed={fixed}");
        assert_eq!(v.get("x").expect("x"), Value::Int(1), "fixed={fixed}");
    }
}

#[test]
fn struct_initializers_are_checked() {
    let (env, _module) = hosted();
    let p = point(&env);
    let missing = env.create(p, Value::record([("x", 1)])).expect_err("y missing");
    assert!(matches!(&missing, ViewError::MissingMembers { members, .. } if members == &["y"]));
    let unknown = env
        .create(p, Value::record([("x", 1), ("y", 2), ("z", 3)]))
        .expect_err("z unknown");
    assert!(matches!(unknown, ViewError::NoProperty { ref name, .. } if name == "z"));
    assert!(matches!(env.create(p, Value::Null), Err(ViewError::MissingInitializer { .. })));
    let overflow = env
        .create(p, Value::record([("x", 1_i64 << 40), ("y", 0)]))
        .expect_err("overflow");
    assert_eq!(overflow.kind(), ErrorKind::Overflow);
}

#[test]
fn template_fills_optional_members() {
    let (env, _module) = hosted();
    let ty = env
        .define(
            &StructureDescriptor::new("Defaults", StructureKind::Struct, 8, 4)
                .member(MemberDescriptor::scalar("x", MemberType::Int, 0, 32))
                .member(MemberDescriptor::scalar("y", MemberType::Int, 4, 32).with_flags(required()))
                .with_template(vec![1, 0, 0, 0, 2, 0, 0, 0]),
        )
        .expect("define");
    let v = env.create(ty, Value::record([("y", 9)])).expect("create");
    assert_eq!(v.get("x").expect("x"), Value::Int(1));
    assert_eq!(v.get("y").expect("y"), Value::Int(9));
    let defaults = env.create(ty, Value::Null).expect("template only");
    assert_eq!(defaults.get("y").expect("y"), Value::Int(2));
    let missing = env.create(ty, Value::record([("x", 3)])).expect_err("y is required");
    assert!(matches!(missing, ViewError::MissingMembers { .. }));
}

#[test]
fn read_only_member_rejects_writes() {
    let (env, _module) = hosted();
    let ty = env
        .define(
            &StructureDescriptor::new("Versioned", StructureKind::Struct, 4, 4).member(
                MemberDescriptor::scalar("version", MemberType::Uint, 0, 32).with_flags(MemberFlags {
                    is_read_only: true,
                    ..MemberFlags::default()
                }),
            ),
        )
        .expect("define");
    let v = env.create(ty, Value::record([("version", 3)])).expect("create");
    assert!(matches!(v.set("version", 4), Err(ViewError::ReadOnly { .. })));
    assert_eq!(v.get("version").expect("version"), Value::Int(3));
}

#[test]
fn packed_struct_uses_backing_integer() {
    let (env, _module) = hosted();
    let ty = env
        .define(
            &StructureDescriptor::new("Flags", StructureKind::PackedStruct, 1, 1)
                .member(MemberDescriptor::packed("mode", MemberType::Uint, 0, 3))
                .member(MemberDescriptor::packed("enabled", MemberType::Bool, 3, 1))
                .member(MemberDescriptor::packed("level", MemberType::Uint, 4, 4))
                .member(MemberDescriptor::scalar("", MemberType::Uint, 0, 8).unnamed()),
        )
        .expect("define");
    let v = env.create(ty, 0b1010_1101_u8).expect("from integer");
    assert_eq!(v.get("mode").expect("mode"), Value::Int(5));
    assert_eq!(v.get("enabled").expect("enabled"), Value::Bool(true));
    assert_eq!(v.get("level").expect("level"), Value::Int(10));
    v.set("enabled", false).expect("clear");
    assert_eq!(v.to_int().expect("backing"), Value::Int(0b1010_0101));
    let names: Vec<String> = v.entries().expect("entries").into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["mode", "enabled", "level"]);
}

#[test]
fn nested_objects_are_cached_children() {
    let (env, _module) = hosted();
    let p = point(&env);
    let line = env
        .define(
            &StructureDescriptor::new("Line", StructureKind::ExternStruct, 16, 4)
                .member(MemberDescriptor::object("from", p, 0, 8))
                .member(MemberDescriptor::object("to", p, 8, 8)),
        )
        .expect("define");
    let v = env
        .create(
            line,
            Value::record([
                ("from", Value::record([("x", 1), ("y", 2)])),
                ("to", Value::record([("x", 3), ("y", 4)])),
            ]),
        )
        .expect("create");
    let to = v.get("to").expect("to");
    let again = v.get("to").expect("to");
    assert_eq!(to, again);
    let to = to.as_view().expect("view").clone();
    to.set("x", 30).expect("write through child");
    assert_eq!(&v.bytes().expect("bytes")[8..12], &30_i32.to_le_bytes());
}

#[test]
fn sentinel_slice_from_text() {
    let (env, _module) = hosted();
    let text = env
        .define(
            &StructureDescriptor::new("[:0]u8", StructureKind::Slice, 1, 1)
                .member(MemberDescriptor::scalar("element", MemberType::Uint, 0, 8))
                .with_sentinel(0, true),
        )
        .expect("define");
    let hello = env.create(text, "Hello").expect("create");
    assert_eq!(hello.len(), 5);
    assert_eq!(hello.bytes().expect("bytes"), [72, 101, 108, 108, 111, 0]);
    assert_eq!(hello.string().expect("string"), "Hello");

    assert!(matches!(
        hello.set_at(2, 0),
        Err(ViewError::MisplacedSentinel { index: 2, .. })
    ));
    assert!(matches!(
        env.create(text, Value::list([1, 0, 2, 0])),
        Err(ViewError::MisplacedSentinel { index: 1, .. })
    ));
    assert!(matches!(
        env.create(text, Value::list([1, 2, 3])),
        Err(ViewError::MissingSentinel { sentinel: 0, .. })
    ));
}

#[test]
fn arrays_check_length_and_bounds() {
    let (env, _module) = hosted();
    let ty = env
        .define(
            &StructureDescriptor::new("[4]i16", StructureKind::Array, 8, 2)
                .with_length(4)
                .member(MemberDescriptor::scalar("element", MemberType::Int, 0, 16)),
        )
        .expect("define");
    let a = env.create(ty, Value::list([1, -2, 3, -4])).expect("create");
    assert_eq!(a.at(1).expect("at"), Value::Int(-2));
    assert!(matches!(a.at(4), Err(ViewError::OutOfBound { index: 4, length: 4, .. })));
    assert!(matches!(
        env.create(ty, Value::list([1, 2])),
        Err(ViewError::ArrayLengthMismatch { expected: 4, received: 2, .. })
    ));
    let items: Vec<Value> = typeview_core::Indexable::iterate(&a)
        .collect::<Result<_, _>>()
        .expect("iterate");
    assert_eq!(items, [Value::Int(1), Value::Int(-2), Value::Int(3), Value::Int(-4)]);
}

#[test]
fn bool_vector_packs_lanes() {
    let (env, _module) = hosted();
    let ty = env
        .define(
            &StructureDescriptor::new("@Vector(4, bool)", StructureKind::Vector, 1, 1)
                .with_length(4)
                .member(MemberDescriptor::scalar("element", MemberType::Bool, 0, 1)),
        )
        .expect("define");
    let v = env.create(ty, Value::list([true, false, true, true])).expect("create");
    assert_eq!(v.bytes().expect("bytes"), [0b1101]);
    assert_eq!(v.at(1).expect("lane"), Value::Bool(false));
    v.set_at(1, true).expect("set lane");
    assert_eq!(v.bytes().expect("bytes"), [0b1111]);
}

fn selector_enum(env: &typeview_core::Env) -> TypeId {
    env.define(
        &StructureDescriptor::new("Tag", StructureKind::Enum, 1, 1)
            .member(MemberDescriptor::scalar("value", MemberType::Uint, 0, 8))
            .item("int", 0)
            .item("float", 1),
    )
    .expect("enum")
}

#[test]
fn tagged_union_exposes_active_member_only() {
    let (env, _module) = hosted();
    let tag = selector_enum(&env);
    let ty = env
        .define(
            &StructureDescriptor::new("Number", StructureKind::TaggedUnion, 16, 8)
                .member(MemberDescriptor::scalar("int", MemberType::Int, 0, 32))
                .member(MemberDescriptor::scalar("float", MemberType::Float, 0, 64))
                .member(MemberDescriptor::object("tag", tag, 8, 1).with_flags(MemberFlags {
                    is_selector: true,
                    ..MemberFlags::default()
                })),
        )
        .expect("define");
    let n = env.create(ty, Value::record([("float", 1.5)])).expect("create");
    assert_eq!(n.active().expect("active"), Some("float".to_owned()));
    assert_eq!(n.get("float").expect("float"), Value::Float(1.5));
    assert_eq!(n.get("int").expect("inactive"), Value::Null);
    n.set("int", 7).expect("switch");
    assert_eq!(n.active().expect("active"), Some("int".to_owned()));
    assert_eq!(n.get("float").expect("inactive"), Value::Null);
    assert_eq!(n.entries().expect("entries").len(), 1);
    assert!(matches!(
        env.create(ty, Value::record([("int", Value::from(1)), ("float", Value::from(2.0))])),
        Err(ViewError::InvalidInitializer { .. })
    ));
}

fn bare_union(env: &typeview_core::Env) -> TypeId {
    env.define(
        &StructureDescriptor::new("Bare", StructureKind::BareUnion, 8, 4)
            .member(MemberDescriptor::scalar("a", MemberType::Int, 0, 32))
            .member(MemberDescriptor::scalar("b", MemberType::Float, 0, 32))
            .member(MemberDescriptor::scalar("index", MemberType::Uint, 4, 8).with_flags(MemberFlags {
                is_selector: true,
                ..MemberFlags::default()
            })),
    )
    .expect("bare union")
}

#[test]
fn bare_union_checks_depend_on_safety_level() {
    let (env, _module) = hosted_with(MembraneConfig::default().with_safety(SafetyLevel::Checked));
    let u = env.create(bare_union(&env), Value::record([("a", 1)])).expect("create");
    assert!(matches!(
        u.get("b"),
        Err(ViewError::InactiveUnionMember { ref member, ref active, .. }) if member == "b" && active == "a"
    ));

    let (env, _module) = hosted_with(MembraneConfig::default().with_safety(SafetyLevel::Unchecked));
    let u = env.create(bare_union(&env), Value::record([("a", 0x3F80_0000)])).expect("create");
    assert_eq!(u.get("b").expect("reinterpreted"), Value::Float(1.0));
}

#[test]
fn optional_with_flag_tracks_presence() {
    let (env, _module) = hosted();
    let ty = env
        .define(
            &StructureDescriptor::new("?i32", StructureKind::Optional, 8, 4)
                .member(MemberDescriptor::scalar("value", MemberType::Int, 0, 32))
                .member(MemberDescriptor::scalar("present", MemberType::Bool, 4, 8)),
        )
        .expect("define");
    let o = env.create(ty, 0).expect("zero is present");
    assert_eq!(o.value().expect("value"), Value::Int(0));
    o.assign(Value::Null).expect("clear");
    assert_eq!(o.value().expect("value"), Value::Null);
    assert!(o.bytes().expect("bytes").iter().all(|&b| b == 0));
}

#[test]
fn optional_pointer_clears_its_target() {
    let (env, _module) = hosted();
    let p = point(&env);
    let ptr = pointer_to(&env, "*Point", p, pointer_flags());
    let ty = env
        .define(
            &StructureDescriptor::new("?*Point", StructureKind::Optional, 4, 4)
                .with_flags(StructureFlags {
                    has_pointer: true,
                    ..StructureFlags::default()
                })
                .member(MemberDescriptor::object("value", ptr, 0, 4)),
        )
        .expect("define");
    let target = env.create(p, Value::record([("x", 1), ("y", 2)])).expect("point");
    let o = env.create(ty, &target).expect("create");
    let inner = o.value().expect("present");
    let inner = inner.as_view().expect("pointer view");
    assert!(inner.target().expect("target").expect("linked").same_object(&target));
    o.assign(Value::Null).expect("clear");
    assert_eq!(o.value().expect("absent"), Value::Null);
}

#[test]
fn flagless_optional_needs_spare_encoding() {
    let (env, _module) = hosted();
    let err = env
        .define(
            &StructureDescriptor::new("?u8", StructureKind::Optional, 1, 1)
                .member(MemberDescriptor::scalar("value", MemberType::Uint, 0, 8)),
        )
        .expect_err("zero is a valid u8");
    assert!(matches!(err, ViewError::Unsupported(_)), "{err:?}");

    let set = error_set(&env, "ParseError", &[("Empty", 3)]);
    let ty = env
        .define(
            &StructureDescriptor::new("?ParseError", StructureKind::Optional, 2, 2)
                .member(MemberDescriptor::scalar("value", MemberType::Uint, 0, 16).with_structure(set)),
        )
        .expect("error numbers are never zero");
    let o = env.create(ty, Value::Null).expect("absent");
    assert_eq!(o.value().expect("absent"), Value::Null);
}

fn error_set(env: &typeview_core::Env, name: &str, items: &[(&str, i128)]) -> TypeId {
    let mut desc = StructureDescriptor::new(name, StructureKind::ErrorSet, 2, 2)
        .member(MemberDescriptor::scalar("value", MemberType::Uint, 0, 16));
    for (item, number) in items {
        desc = desc.item(item, *number);
    }
    env.define(&desc).expect("error set")
}

#[test]
fn error_sets_share_error_identity() {
    let (env, _module) = hosted();
    let io = error_set(&env, "IoError", &[("FileNotFound", 10), ("AccessDenied", 11)]);
    let narrow = error_set(&env, "OpenError", &[("FileNotFound", 10)]);
    let a = env.error_of(io, "FileNotFound").expect("member");
    let b = env.error_of(narrow, 10).expect("member");
    assert!(a.same(&b));
    assert_eq!(a.message(), "File not found");
    assert!(env.is_error_subset(narrow, io));
    assert!(!env.is_error_subset(io, narrow));
    assert!(matches!(
        env.error_of(narrow, "AccessDenied"),
        Err(ViewError::NotInErrorSet { .. })
    ));

    let stored = env.create(io, Value::Error(b)).expect("create");
    assert_eq!(stored.value().expect("value"), Value::Error(a));
}

#[test]
fn error_union_assignments_are_atomic() {
    let (env, _module) = hosted();
    let set = error_set(&env, "ParseError", &[("Unexpected", 3)]);
    let p = point(&env);
    let ptr = pointer_to(&env, "*Point", p, pointer_flags());
    let ty = env
        .define(
            &StructureDescriptor::new("ParseError!*Point", StructureKind::ErrorUnion, 8, 4)
                .with_flags(StructureFlags {
                    has_pointer: true,
                    ..StructureFlags::default()
                })
                .member(MemberDescriptor::object("value", ptr, 0, 4))
                .member(MemberDescriptor::scalar("error", MemberType::Uint, 4, 16).with_structure(set)),
        )
        .expect("define");
    let target = env.create(p, Value::record([("x", 1), ("y", 2)])).expect("point");
    let eu = env.create(ty, &target).expect("create");
    assert!(eu.value().expect("ok").as_view().is_some());

    let err = env.error_of(set, "Unexpected").expect("error");
    eu.assign(Value::Error(err.clone())).expect("store error");
    match eu.value() {
        Err(ViewError::Foreign(found)) => assert!(found.same(&err)),
        other => panic!("expected foreign error, got {other:?}"),
    }
    assert_eq!(&eu.bytes().expect("bytes")[..4], &[0, 0, 0, 0]);

    let other = env.error_of(error_set(&env, "Other", &[("Nope", 99)]), "Nope").expect("error");
    assert!(matches!(eu.assign(Value::Error(other)), Err(ViewError::NotInErrorSet { .. })));

    eu.assign(&target).expect("back to a value");
    assert_eq!(&eu.bytes().expect("bytes")[4..6], &[0, 0]);
}

#[test]
fn closed_enum_casts() {
    let (env, _module) = hosted();
    let tag = selector_enum(&env);
    let by_name = env.enum_item(tag, "float").expect("by name");
    let by_value = env.enum_item(tag, 1).expect("by value");
    assert_eq!(by_name, by_value);
    assert_eq!(by_name.to_string(), "float");
    assert!(matches!(env.enum_item(tag, 7), Err(ViewError::EnumNotFound { .. })));
    assert!(matches!(env.enum_item(tag, 300), Err(ViewError::Overflow { .. })));
    let stored = env.create(tag, by_name.clone()).expect("create");
    assert_eq!(stored.value().expect("value"), Value::Enum(by_name));
    assert_eq!(stored.to_int().expect("int"), Value::Int(1));
}

#[test]
fn open_enum_synthesizes_stable_items() {
    let (env, _module) = hosted();
    let ty = env
        .define(
            &StructureDescriptor::new("Open", StructureKind::Enum, 1, 1)
                .with_flags(StructureFlags {
                    is_open: true,
                    ..StructureFlags::default()
                })
                .member(MemberDescriptor::scalar("value", MemberType::Uint, 0, 8))
                .item("known", 1),
        )
        .expect("define");
    let a = env.create(ty, 42).expect("create");
    let first = a.value().expect("value");
    let second = env.create(ty, 42).expect("create").value().expect("value");
    assert_eq!(first, second);
    let Value::Enum(item) = first else {
        panic!("expected enum item");
    };
    assert_eq!(item.name(), None);
    assert_eq!(item.value(), 42);
}

#[test]
fn read_only_propagates_to_children() {
    let (env, _module) = hosted();
    let p = point(&env);
    let line = env
        .define(
            &StructureDescriptor::new("Segment", StructureKind::ExternStruct, 16, 4)
                .member(MemberDescriptor::object("from", p, 0, 8))
                .member(MemberDescriptor::object("to", p, 8, 8)),
        )
        .expect("define");
    let v = env.create(line, Value::Null).expect_err("needs members");
    assert_eq!(v.kind(), ErrorKind::Initialization);
    let v = env
        .create(
            line,
            Value::record([
                ("from", Value::record([("x", 1), ("y", 2)])),
                ("to", Value::record([("x", 3), ("y", 4)])),
            ]),
        )
        .expect("create");
    let alias = v.read_only_alias();
    let child = alias.get("from").expect("from");
    let child = child.as_view().expect("view");
    assert!(child.is_read_only());
    assert!(matches!(child.set("x", 9), Err(ViewError::ReadOnly { .. })));
    v.get("from")
        .expect("from")
        .as_view()
        .expect("view")
        .set("x", 9)
        .expect("origin stays writable");
    assert_eq!(child.get("x").expect("x"), Value::Int(9));
}

#[test]
fn opaque_types_refuse_construction() {
    let (env, _module) = hosted();
    let ty = env
        .define(&StructureDescriptor::new("Handle", StructureKind::Opaque, 0, 1))
        .expect("define");
    assert!(matches!(env.create(ty, Value::Null), Err(ViewError::OpaqueConstruction { .. })));
}

#[test]
fn identical_descriptors_share_a_type() {
    let (env, _module) = hosted();
    let a = i32_type(&env);
    let b = i32_type(&env);
    let c = u8_type(&env);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(env.find("u8"), Some(c));
    let s = slice_of(&env, "[]i32", MemberType::Int, 32);
    let view = env.create(s, Value::list([1, 2, 3])).expect("slice");
    assert_eq!(view.len(), 3);
    assert_eq!(view.bytes().expect("bytes").len(), 12);
}
