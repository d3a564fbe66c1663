//! Filter expressions and the declarative query compiler.
//!
//! A filter is sent to the feed service as a JSON-encoded AST in array form,
//! e.g. `["equals",["field","meta","key"],["value","test"]]`. Callers build
//! filters from a declarative query object: reserved `$`-keys address
//! document metadata, every other key addresses a path inside the document
//! value.
//!
//! ```text
//! { $key?: Literal|Cmp, $mutationType?: Literal|Cmp, $expiry?: Literal|Cmp,
//!   $lockTime?: Literal|Cmp,
//!   <field>: Literal | { $lt|$gt|$lte|$gte: value } | nested-object }
//! ```

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Errors from the declarative query compiler.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter query must be a JSON object")]
    NotAnObject,

    #[error("unsupported filter value at `{path}`")]
    UnsupportedValue { path: String },
}

/// A field path, always rooted at `meta` or `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    fn meta(field: &str) -> Self {
        Self(vec!["meta".to_owned(), field.to_owned()])
    }

    fn value() -> Self {
        Self(vec!["value".to_owned()])
    }

    fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_owned());
        Self(segments)
    }

    fn dotted(&self) -> String {
        self.0.join(".")
    }

    fn to_json(&self) -> Value {
        let mut parts = vec![Value::from("field")];
        parts.extend(self.0.iter().map(|s| Value::from(s.as_str())));
        Value::Array(parts)
    }
}

/// A compiled filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Equals(FieldPath, Value),
    LessThan(FieldPath, Value),
    GreaterThan(FieldPath, Value),
    LessEqual(FieldPath, Value),
    GreaterEqual(FieldPath, Value),
    And(Vec<FilterExpr>),
}

impl FilterExpr {
    /// Serializes the expression to its wire JSON form.
    pub fn to_json(&self) -> Value {
        match self {
            FilterExpr::Equals(path, value) => {
                json!(["equals", path.to_json(), ["value", value]])
            }
            FilterExpr::LessThan(path, value) => {
                json!(["lessthan", path.to_json(), ["value", value]])
            }
            FilterExpr::GreaterThan(path, value) => {
                json!(["greaterthan", path.to_json(), ["value", value]])
            }
            FilterExpr::LessEqual(path, value) => {
                json!(["lessequal", path.to_json(), ["value", value]])
            }
            FilterExpr::GreaterEqual(path, value) => {
                json!(["greaterequal", path.to_json(), ["value", value]])
            }
            FilterExpr::And(parts) => {
                let mut arr = vec![Value::from("and")];
                arr.extend(parts.iter().map(FilterExpr::to_json));
                Value::Array(arr)
            }
        }
    }

    /// Serializes the expression to the opaque filter bytes carried by
    /// `streamAddFilter`.
    pub fn to_wire(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

/// Combines clauses; a conjunction is only built for two or more parts, so an
/// empty `and` node is never constructed. Nested conjunctions are flattened.
fn combine(parts: Vec<FilterExpr>) -> Option<FilterExpr> {
    let mut flat = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            FilterExpr::And(sub) => flat.extend(sub),
            other => flat.push(other),
        }
    }
    match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(FilterExpr::And(flat)),
    }
}

/// Reserved top-level keys and the metadata fields they address.
const META_KEYS: [(&str, &str); 4] = [
    ("$key", "key"),
    ("$mutationType", "mutationType"),
    ("$expiry", "expiry"),
    ("$lockTime", "lockTime"),
];

/// Compiles a declarative query into a filter expression.
///
/// `Ok(None)` means match-all: an empty query registers an empty filter and
/// watches everything.
pub fn compile(query: &Value) -> Result<Option<FilterExpr>, FilterError> {
    let object = query.as_object().ok_or(FilterError::NotAnObject)?;

    let mut parts = Vec::new();
    for (key, field) in META_KEYS {
        if let Some(expr) = object.get(key) {
            if let Some(part) = compile_part(expr, &FieldPath::meta(field))? {
                parts.push(part);
            }
        }
    }

    if let Some(part) = compile_object(object, &FieldPath::value())? {
        parts.push(part);
    }

    Ok(combine(parts))
}

fn compile_part(expr: &Value, path: &FieldPath) -> Result<Option<FilterExpr>, FilterError> {
    match expr {
        Value::String(_) | Value::Number(_) => {
            Ok(Some(FilterExpr::Equals(path.clone(), expr.clone())))
        }
        Value::Object(object) => compile_object(object, path),
        _ => Err(FilterError::UnsupportedValue {
            path: path.dotted(),
        }),
    }
}

fn compile_object(
    object: &Map<String, Value>,
    path: &FieldPath,
) -> Result<Option<FilterExpr>, FilterError> {
    let mut parts = Vec::new();

    if let Some(value) = object.get("$lt") {
        parts.push(FilterExpr::LessThan(path.clone(), value.clone()));
    }
    if let Some(value) = object.get("$gt") {
        parts.push(FilterExpr::GreaterThan(path.clone(), value.clone()));
    }
    if let Some(value) = object.get("$lte") {
        parts.push(FilterExpr::LessEqual(path.clone(), value.clone()));
    }
    if let Some(value) = object.get("$gte") {
        parts.push(FilterExpr::GreaterEqual(path.clone(), value.clone()));
    }

    for (key, value) in object {
        if key.starts_with('$') {
            continue;
        }
        if let Some(part) = compile_part(value, &path.child(key))? {
            parts.push(part);
        }
    }

    Ok(combine(parts))
}
