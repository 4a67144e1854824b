mod common;

use std::rc::Rc;

use common::hosted;
use serde_json::json;
use typeview_core::{
    FunctionExport, HookEvent, HostedCall, MemberDescriptor, MemberType, ModuleExports,
    StructureDescriptor, StructureFlags, StructureKind, TypeId, Value, VariableExport, ViewError,
};

fn exports(origin: usize) -> ModuleExports {
    ModuleExports {
        structures: vec![
            StructureDescriptor::new("i32", StructureKind::Primitive, 4, 4)
                .member(MemberDescriptor::scalar("value", MemberType::Int, 0, 32)),
            StructureDescriptor::new("Point", StructureKind::ExternStruct, 8, 4)
                .member(MemberDescriptor::scalar("x", MemberType::Int, 0, 32))
                .member(MemberDescriptor::scalar("y", MemberType::Int, 4, 32)),
            StructureDescriptor::new("add args", StructureKind::ArgStruct, 12, 4)
                .member(MemberDescriptor::scalar("retval", MemberType::Int, 0, 32))
                .member(MemberDescriptor::scalar("a", MemberType::Int, 4, 32))
                .member(MemberDescriptor::scalar("b", MemberType::Int, 8, 32)),
        ],
        variables: vec![
            VariableExport {
                name: "counter".into(),
                structure: TypeId(0),
                address: None,
                is_const: false,
            },
            VariableExport {
                name: "origin".into(),
                structure: TypeId(1),
                address: Some(origin),
                is_const: true,
            },
        ],
        functions: vec![FunctionExport {
            name: "add".into(),
            thunk: 0,
            function: None,
            args_structure: TypeId(2),
        }],
    }
}

#[test]
fn bound_namespace_reads_and_writes_module_state() {
    let (env, module) = hosted();
    let counter = module.place(&5_i32.to_le_bytes(), 4).expect("counter");
    module.export("counter", counter);
    let mut origin_bytes = 3_i32.to_le_bytes().to_vec();
    origin_bytes.extend_from_slice(&4_i32.to_le_bytes());
    let origin = module.place(&origin_bytes, 4).expect("origin");
    module.register("add", |call: &HostedCall<'_>| {
        let sum = call.arg_uint(4, 4)? + call.arg_uint(8, 4)?;
        call.set_arg_uint(0, 4, sum)
    });

    let ns = env.bind(&exports(origin)).expect("bind");
    assert_eq!(ns.names(), ["add", "counter", "origin"]);
    assert_eq!(ns.get("counter").expect("counter"), Value::Int(5));
    assert_eq!(ns.get("add").expect("function"), Value::String("add".into()));

    ns.set("counter", 6).expect("set");
    assert_eq!(
        module.heap().memory().read(counter, 4).expect("read"),
        6_i32.to_le_bytes()
    );

    let origin_view = ns.variable("origin").expect("origin");
    assert_eq!(origin_view.get("y").expect("y"), Value::Int(4));
    let err = origin_view.set("x", 0).expect_err("const export");
    assert!(matches!(err, ViewError::ReadOnly { .. }), "{err:?}");

    let sum = ns.call("add", vec![Value::Int(2), Value::Int(3)]).expect("call");
    assert_eq!(sum.ready(), Some(Value::Int(5)));

    let err = ns.get("missing").expect_err("unknown name");
    assert!(matches!(err, ViewError::NoProperty { .. }), "{err:?}");
    assert_eq!(ns.type_id("Point").map(|id| env.ty(id).expect("type").name.clone()), Some("Point".to_owned()));
}

#[test]
fn unresolved_exports_fail_to_bind() {
    let (env, _module) = hosted();
    let err = env.bind(&exports(0x100)).expect_err("counter not exported");
    assert!(matches!(err, ViewError::Unsupported(_)), "{err:?}");
}

#[test]
fn hooks_route_requests_by_event() {
    let (env, _module) = hosted();
    assert!(env.dispatch_hook(HookEvent::Open, &Value::Null).is_none());
    let previous = env.on(
        HookEvent::Open,
        Rc::new(|payload| match payload.as_str() {
            Some(path) if path.starts_with("/virtual/") => Ok(Value::Int(3)),
            _ => Ok(Value::Bool(false)),
        }),
    );
    assert!(previous.is_none());

    let handled = env
        .dispatch_hook(HookEvent::Open, &Value::from("/virtual/a.txt"))
        .expect("installed");
    assert_eq!(handled.expect("handled"), Value::Int(3));
    let declined = env
        .dispatch_hook(HookEvent::Open, &Value::from("/etc/passwd"))
        .expect("installed");
    assert_eq!(declined.expect("handled"), Value::Bool(false));
    assert!(env.dispatch_hook(HookEvent::Stat, &Value::Null).is_none());
}

#[test]
fn normalize_marks_cycles_with_references() {
    let (env, _module) = hosted();
    let ids = env
        .define_batch(&[
            StructureDescriptor::new("Node", StructureKind::ExternStruct, 8, 4)
                .with_flags(StructureFlags {
                    has_pointer: true,
                    ..StructureFlags::default()
                })
                .member(MemberDescriptor::scalar("value", MemberType::Int, 0, 32))
                .member(MemberDescriptor::object("next", TypeId(1), 4, 4)),
            StructureDescriptor::new("?*Node", StructureKind::Pointer, 4, 4)
                .with_flags(StructureFlags {
                    has_pointer: true,
                    is_single: true,
                    is_nullable: true,
                    ..StructureFlags::default()
                })
                .member(MemberDescriptor::object("target", TypeId(0), 0, 4)),
        ])
        .expect("batch");
    let node = ids[0];

    let head = env
        .create(node, Value::record([("value", Value::Int(1)), ("next", Value::Null)]))
        .expect("node");
    assert_eq!(head.normalize().expect("plain"), json!({ "value": 1, "next": null }));

    head.set("next", &head).expect("self link");
    assert_eq!(
        head.normalize().expect("cyclic"),
        json!({ "value": 1, "next": { "$ref": "$" } })
    );
}

#[test]
fn normalize_renders_sequences_and_wide_integers() {
    let (env, _module) = hosted();
    let wide = env
        .define(
            &StructureDescriptor::new("Wide", StructureKind::ExternStruct, 24, 8)
                .member(MemberDescriptor::scalar("big", MemberType::Uint, 0, 128))
                .member(MemberDescriptor::scalar("ratio", MemberType::Float, 16, 64)),
        )
        .expect("wide");
    let v = env
        .create(
            wide,
            Value::record([("big", Value::Int(1_i128 << 100)), ("ratio", Value::Float(0.5))]),
        )
        .expect("create");
    assert_eq!(
        v.normalize().expect("plain"),
        json!({ "big": (1_i128 << 100).to_string(), "ratio": 0.5 })
    );
}

#[test]
fn definitions_and_calls_are_logged() {
    let (env, _module) = hosted();
    common::point(&env);
    let records = env.drain_logs();
    assert!(records.iter().any(|r| r.symbol == "define"), "{records:?}");
    assert!(env.drain_logs().is_empty());
}

#[test]
fn normalize_marks_unreadable_values_at_the_top() {
    let (env, _module) = hosted();
    let codes = env
        .define(
            &StructureDescriptor::new("Codes", StructureKind::ErrorSet, 2, 2)
                .member(MemberDescriptor::scalar("value", MemberType::Uint, 0, 16))
                .item("Busy", 5),
        )
        .expect("error set");
    let unknown = env.from_bytes(codes, 9_u16.to_le_bytes().to_vec()).expect("bytes");
    let err = unknown.value().expect_err("9 is not in the set");
    assert!(matches!(err, ViewError::NotInErrorSet { .. }), "{err:?}");
    assert_eq!(
        unknown.normalize().expect("marker"),
        json!({ "error": err.to_string() })
    );

    let known = env.from_bytes(codes, 5_u16.to_le_bytes().to_vec()).expect("bytes");
    assert_eq!(known.normalize().expect("marker"), json!({ "error": "Busy" }));
}
