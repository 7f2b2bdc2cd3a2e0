//! removal of computed-only fields
use crate::schema::{is_path_computed_only, SchemaBlock};
use crate::value::Attrs;
use serde_json::Value;

/// Strips every field that can not be set in configuration
///
/// Objects and arrays that end up empty collapse to `None`, as do nulls. Without a schema the
/// value is returned unchanged.
pub fn filter_computed(value: &Value, schema: Option<&SchemaBlock>) -> Option<Value> {
    match schema {
        None => Some(value.clone()),
        Some(schema) => filter_path(value, schema, &mut vec![]),
    }
}

/// [filter_computed] for the root attributes of a resource
pub fn filter_computed_attrs(attrs: &Attrs, schema: Option<&SchemaBlock>) -> Attrs {
    match filter_computed(&Value::Object(attrs.clone()), schema) {
        Some(Value::Object(attrs)) => attrs,
        _ => Attrs::new(),
    }
}

fn filter_path<'v>(
    value: &'v Value,
    schema: &SchemaBlock,
    path: &mut Vec<&'v str>,
) -> Option<Value> {
    if is_path_computed_only(schema, path) {
        return None;
    }

    match value {
        Value::Null => None,
        Value::Object(object) => {
            let mut out = Attrs::new();
            for (key, value) in object {
                path.push(key);
                if let Some(value) = filter_path(value, schema, path) {
                    out.insert(key.clone(), value);
                }
                path.pop();
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        Value::Array(items) => {
            let out: Vec<_> = items
                .iter()
                .filter_map(|item| filter_path(item, schema, path))
                .collect();
            (!out.is_empty()).then_some(Value::Array(out))
        }
        scalar => Some(scalar.clone()),
    }
}
