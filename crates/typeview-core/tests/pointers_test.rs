mod common;

use common::{hosted, point, pointer_flags, pointer_to, slice_of, slice_pointer};
use typeview_core::{Indexable, MemberType, StructureFlags, Value, ViewError};

fn point_value(x: i32, y: i32) -> Value {
    Value::record([("x", x), ("y", y)])
}

fn point_bytes(x: i32, y: i32) -> Vec<u8> {
    let mut bytes = x.to_le_bytes().to_vec();
    bytes.extend_from_slice(&y.to_le_bytes());
    bytes
}

#[test]
fn pointer_forwards_member_access_to_its_target() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());

    let target = env.create(point, point_value(1, 2)).expect("point");
    let p = env.create(ptr, &target).expect("pointer");
    assert_eq!(p.get("x").expect("x"), Value::Int(1));
    p.set("y", 9).expect("set through pointer");
    assert_eq!(target.get("y").expect("y"), Value::Int(9));

    let linked = p.target().expect("target").expect("non-null");
    assert!(linked.same_object(&target));
}

#[test]
fn null_is_refused_unless_nullable() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());
    let nullable = pointer_to(
        &env,
        "?*Point",
        point,
        StructureFlags {
            is_nullable: true,
            ..pointer_flags()
        },
    );

    let err = env.create(ptr, Value::Null).expect_err("null into non-nullable");
    assert!(matches!(err, ViewError::NullPointer { .. }), "{err:?}");

    let p = env.create(nullable, Value::Null).expect("nullable null");
    assert!(p.target().expect("target").is_none());
    let err = p.get("x").expect_err("deref null");
    assert!(matches!(err, ViewError::NullPointer { .. }), "{err:?}");
}

#[test]
fn const_pointers_guard_their_targets() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());
    let const_ptr = pointer_to(
        &env,
        "*const Point",
        point,
        StructureFlags {
            is_const: true,
            ..pointer_flags()
        },
    );

    let target = env.create(point, point_value(3, 4)).expect("point");
    let cp = env.create(const_ptr, &target).expect("const pointer");
    assert_eq!(cp.get("x").expect("x"), Value::Int(3));
    let err = cp.set("x", 5).expect_err("write through const pointer");
    assert!(matches!(err, ViewError::ReadOnly { .. }), "{err:?}");
    assert_eq!(target.get("x").expect("x"), Value::Int(3));

    let err = env.create(ptr, &cp).expect_err("const into mutable");
    assert!(matches!(err, ViewError::ConstantConstraint { .. }), "{err:?}");

    let err = env
        .create(ptr, target.read_only_alias())
        .expect_err("read-only target into mutable");
    assert!(matches!(err, ViewError::ReadOnlyTarget { .. }), "{err:?}");

    env.create(const_ptr, target.read_only_alias())
        .expect("read-only target into const pointer");
}

#[test]
fn single_pointers_do_not_construct_targets() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());

    let err = env.create(ptr, point_value(1, 1)).expect_err("plain record");
    assert!(matches!(err, ViewError::NoCastingToPointer { .. }), "{err:?}");
}

#[test]
fn slice_pointer_builds_target_from_plain_list() {
    let (env, _module) = hosted();
    let slice = slice_of(&env, "[]i32", MemberType::Int, 32);
    let sp = slice_pointer(&env, "[]i32 ptr", slice, false);

    let p = env.create(sp, Value::list([1, 2, 3])).expect("auto-construct");
    assert_eq!(Indexable::length(&p), 3);
    assert_eq!(p.at(1).expect("at"), Value::Int(2));
    p.set_at(2, 30).expect("set_at");
    assert_eq!(p.at(2).expect("at"), Value::Int(30));
}

#[test]
fn const_slice_pointer_target_is_read_only() {
    let (env, _module) = hosted();
    let slice = slice_of(&env, "[]u8", MemberType::Uint, 8);
    let sp = slice_pointer(&env, "[]const u8", slice, true);

    let p = env.create(sp, Value::list([104_u8, 105])).expect("construct");
    assert_eq!(p.string().expect("text"), "hi");
    let err = p.set_at(0, 0_u8).expect_err("const slice");
    assert!(matches!(err, ViewError::ReadOnly { .. }), "{err:?}");
}

#[test]
fn set_length_stays_within_host_target() {
    let (env, _module) = hosted();
    let slice = slice_of(&env, "[]i32", MemberType::Int, 32);
    let sp = slice_pointer(&env, "[]i32 ptr", slice, false);

    let p = env.create(sp, Value::list([1, 2, 3, 4, 5])).expect("construct");
    p.set_length(3).expect("shrink");
    assert_eq!(Indexable::length(&p), 3);
    assert_eq!(p.at(2).expect("at"), Value::Int(3));
    assert!(p.at(3).is_err());

    p.set_length(5).expect("regrow to assigned length");
    assert_eq!(p.at(4).expect("at"), Value::Int(5));

    let err = p.set_length(6).expect_err("past the assigned target");
    assert!(matches!(err, ViewError::OutOfBound { .. }), "{err:?}");
    assert_eq!(Indexable::length(&p), 5);
}

#[test]
fn set_length_on_fixed_target_is_bounded_by_its_allocation() {
    let (env, _module) = hosted();
    let slice = slice_of(&env, "[]i32", MemberType::Int, 32);
    let sp = slice_pointer(&env, "[]i32 ptr", slice, false);

    let fixed = env.create_fixed(slice, Value::list([1, 2, 3, 4])).expect("fixed");
    let p = env.create(sp, &fixed).expect("pointer");
    p.set_length(2).expect("shrink");
    assert_eq!(Indexable::length(&p), 2);
    assert_eq!(p.at(1).expect("at"), Value::Int(2));

    let err = p.set_length(1000).expect_err("beyond allocation");
    assert!(matches!(err, ViewError::OutOfBound { .. }), "{err:?}");
}

#[test]
fn set_length_requires_slice_pointer() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());
    let target = env.create(point, point_value(0, 0)).expect("point");
    let p = env.create(ptr, &target).expect("pointer");
    assert!(matches!(p.set_length(1), Err(ViewError::Unsupported(_))));
}

#[test]
fn freed_fixed_target_is_stale() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());

    let target = env.create_fixed(point, point_value(5, 6)).expect("fixed point");
    let address = target.address().expect("fixed address");
    let p = env.create(ptr, &target).expect("pointer");
    assert_eq!(p.get("x").expect("live"), Value::Int(5));

    env.free(address).expect("free");
    let err = p.target().expect_err("freed target");
    assert!(
        matches!(err, ViewError::StalePointer { address: a, .. } if a == address),
        "{err:?}"
    );
}

#[test]
fn reused_address_does_not_revive_freed_target() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());

    let target = env.create_fixed(point, point_value(5, 6)).expect("fixed point");
    let _neighbour = env.create_fixed(point, point_value(0, 0)).expect("neighbour");
    let address = target.address().expect("fixed address");
    let p = env.create(ptr, &target).expect("pointer");

    env.free(address).expect("free");
    let reused = env.create_fixed(point, point_value(7, 8)).expect("reuse");
    assert_eq!(reused.address(), Some(address));

    let err = p.target().expect_err("old target");
    assert!(matches!(err, ViewError::StalePointer { .. }), "{err:?}");
    assert!(target.get("x").is_err());
    assert_eq!(reused.get("x").expect("fresh"), Value::Int(7));
}

#[test]
fn fixed_pointer_requires_fixed_target() {
    let (env, _module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());

    let host = env.create(point, point_value(1, 2)).expect("host point");
    let err = env.create_fixed(ptr, &host).expect_err("host target");
    assert!(
        matches!(err, ViewError::FixedMemoryTargetRequired { .. }),
        "{err:?}"
    );
}

#[test]
fn resident_pointer_follows_foreign_writes() {
    let (env, module) = hosted();
    let point = point(&env);
    let ptr = pointer_to(&env, "*Point", point, pointer_flags());

    let first = env.create_fixed(point, point_value(1, 2)).expect("first");
    let p = env.create_fixed(ptr, &first).expect("resident pointer");
    let first_address = first.address().expect("address");
    let word = p.bytes().expect("pointer bytes");
    assert_eq!(word, (first_address as u32).to_le_bytes());

    let second = module.place(&point_bytes(7, 8), 4).expect("place");
    module
        .heap()
        .memory()
        .write(p.address().expect("pointer address"), &(second as u32).to_le_bytes())
        .expect("redirect");
    let target = p.target().expect("target").expect("non-null");
    assert_eq!(target.address(), Some(second));
    assert_eq!(p.get("x").expect("x"), Value::Int(7));
    assert_eq!(p.get("y").expect("y"), Value::Int(8));
}
