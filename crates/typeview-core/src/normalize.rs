//! Plain JSON rendition of an object graph.
//!
//! Objects reached twice render as `{"$ref": path}` pointing at their first
//! occurrence, so cyclic graphs terminate. Errors become `{"error": message}`,
//! enum items their name, and integers or floats JSON cannot carry exactly
//! become strings.

use std::collections::HashMap;

use serde_json::{Map, Number, Value as Json, json};

use crate::error::{Result, ViewError};
use crate::layout::TypeId;
use crate::structure::Shape;
use crate::value::Value;
use crate::view::View;

type Seen = HashMap<(TypeId, (usize, usize), usize), String>;

pub(crate) fn normalize(view: &View) -> Result<Json> {
    walk_view(view, "$", &mut Seen::new())
}

fn error_marker(err: &ViewError) -> Json {
    match err {
        ViewError::Foreign(err) => json!({ "error": err.message() }),
        other => json!({ "error": other.to_string() }),
    }
}

fn walk_view(view: &View, path: &str, seen: &mut Seen) -> Result<Json> {
    let key = (view.type_id(), view.window().identity(), view.len());
    if let Some(first) = seen.get(&key) {
        return Ok(json!({ "$ref": first }));
    }
    match &view.runtime_type().shape {
        Shape::Opaque | Shape::Function { .. } => Ok(Json::Null),
        Shape::Primitive(_)
        | Shape::Enum(_)
        | Shape::ErrorSet(_)
        | Shape::Optional(_)
        | Shape::ErrorUnion(_) => match view.value() {
            Ok(value) => walk_value(&value, path, seen),
            Err(err) => Ok(error_marker(&err)),
        },
        Shape::Pointer(_) => {
            seen.insert(key, path.to_owned());
            match view.target()? {
                Some(target) => walk_view(&target, path, seen),
                None => Ok(Json::Null),
            }
        }
        Shape::Array(_) | Shape::Slice(_) | Shape::Vector(_) => {
            seen.insert(key, path.to_owned());
            let mut items = Vec::with_capacity(view.len());
            for index in 0..view.len() {
                let item_path = format!("{path}[{index}]");
                items.push(match view.at(index) {
                    Ok(value) => walk_value(&value, &item_path, seen)?,
                    Err(err) => error_marker(&err),
                });
            }
            Ok(Json::Array(items))
        }
        Shape::Struct(_) | Shape::Union(_) | Shape::ArgStruct(_) => {
            seen.insert(key, path.to_owned());
            let mut object = Map::new();
            for (name, entry) in view.entries()? {
                let entry_path = format!("{path}.{name}");
                let rendered = match entry {
                    Ok(value) => walk_value(&value, &entry_path, seen)?,
                    Err(err) => error_marker(&err),
                };
                object.insert(name, rendered);
            }
            Ok(Json::Object(object))
        }
    }
}

fn walk_value(value: &Value, path: &str, seen: &mut Seen) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => i64::try_from(*i)
            .map(Json::from)
            .or_else(|_| u64::try_from(*i).map(Json::from))
            .unwrap_or_else(|_| Json::String(i.to_string())),
        Value::BigInt(big) => Json::String(big.to_string()),
        Value::Float(f) => Number::from_f64(*f).map_or_else(|| Json::String(f.to_string()), Json::Number),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::List(items) => Json::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| walk_value(item, &format!("{path}[{i}]"), seen))
                .collect::<Result<_>>()?,
        ),
        Value::Record(fields) => {
            let mut object = Map::new();
            for (name, field) in fields {
                object.insert(name.clone(), walk_value(field, &format!("{path}.{name}"), seen)?);
            }
            Json::Object(object)
        }
        Value::View(view) => walk_view(view, path, seen)?,
        Value::Enum(item) => match item.name() {
            Some(name) => Json::String(name.to_owned()),
            None => walk_value(&Value::Int(item.value()), path, seen)?,
        },
        Value::Error(err) => json!({ "error": err.message() }),
    })
}
