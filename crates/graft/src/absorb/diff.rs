//! schema aware minimal diff
use crate::schema::{nested_schema_for, should_render_as_block, SchemaBlock};
use crate::value::{values_equal, Attrs};
use serde_json::Value;

/// Fields of `after` that differ from `before`
///
/// Singleton nested blocks are diffed recursively so only their changed fields remain. Every
/// other field (attributes, collections and blocks with several instances) is captured with its
/// full `after` value, since removal operates on whole fields.
pub fn diff_minimal(before: &Attrs, after: &Attrs, schema: &SchemaBlock) -> Attrs {
    let mut result = Attrs::new();

    for (key, after_value) in after {
        let Some(before_value) = before.get(key) else {
            result.insert(key.clone(), after_value.clone());
            continue;
        };

        if values_equal(before_value, after_value) {
            continue;
        }

        if should_render_as_block(Some(schema), key) {
            if let Some((before_block, after_block)) =
                single_block(before_value).zip(single_block(after_value))
            {
                match nested_schema_for(Some(schema), key) {
                    Some(nested) => {
                        let diffed = diff_minimal(before_block, after_block, &nested);
                        if !diffed.is_empty() {
                            result.insert(key.clone(), Value::Object(diffed));
                        }
                    }
                    None => {
                        result.insert(key.clone(), after_value.clone());
                    }
                }
                continue;
            }
        }

        result.insert(key.clone(), after_value.clone());
    }

    result
}

/// The one block instance of a value, either a bare object or a one-element array of it
fn single_block(value: &Value) -> Option<&Attrs> {
    match value {
        Value::Object(object) => Some(object),
        Value::Array(items) if items.len() == 1 => items[0].as_object(),
        _ => None,
    }
}
