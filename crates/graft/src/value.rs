//! plan value helpers
//!
//! Plan and schema documents describe attribute values as JSON. The absorb pipeline keeps them as
//! [serde_json::Value] until a block gets rendered, at which point [to_expression] turns them into
//! HCL expressions.
//!
//! Conversion rules:
//! - `null`, booleans and strings map to their HCL literal
//! - integers stay integers, everything else becomes a float
//! - arrays become tuples (`[...]`)
//! - objects become object expressions, keys are written bare when they are valid identifiers
//!   and quoted otherwise
use hcl::{Expression, Identifier, ObjectKey};
use serde_json::Value;

/// Attribute name → value, as found in plan documents
pub type Attrs = serde_json::Map<String, Value>;

pub fn to_expression(value: &Value) -> Expression {
    match value {
        Value::Null => Expression::Null,
        Value::Bool(bool) => Expression::Bool(*bool),
        Value::Number(num) => number(num),
        Value::String(s) => Expression::String(s.clone()),
        Value::Array(array) => Expression::Array(array.iter().map(to_expression).collect()),
        Value::Object(object) => {
            let mut out: hcl::Object<ObjectKey, Expression> = Default::default();
            for (key, value) in object {
                out.insert(object_key(key), to_expression(value));
            }
            Expression::Object(out)
        }
    }
}

fn number(num: &serde_json::Number) -> Expression {
    if let Some(int) = num.as_i64() {
        return Expression::Number(hcl::Number::from(int));
    }

    if let Some(uint) = num.as_u64() {
        return Expression::Number(hcl::Number::from(uint));
    }

    num.as_f64()
        .and_then(hcl::Number::from_f64)
        .map(Expression::Number)
        .unwrap_or(Expression::Null)
}

/// Object key that is written bare when possible
pub fn object_key(key: &str) -> ObjectKey {
    if is_identifier(key) {
        ObjectKey::Identifier(Identifier::unchecked(key))
    } else {
        quoted_key(key)
    }
}

/// Object key that is always written as a quoted string
pub fn quoted_key(key: &str) -> ObjectKey {
    ObjectKey::Expression(Expression::String(key.to_string()))
}

fn is_identifier(key: &str) -> bool {
    if matches!(key, "null" | "true" | "false") {
        return false;
    }

    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Structural equality
///
/// Same as `==` except that numbers compare by numeric value, so `30` and `30.0` are equal.
/// Arrays are order-sensitive, objects compare by key.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, a)| b.get(key).is_some_and(|b| values_equal(a, b)))
        }
        _ => a == b,
    }
}

pub(crate) fn is_empty_string(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.is_empty())
}
