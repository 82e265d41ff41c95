//! Runtime instance validation
//!
//! Validation checks an instance against a version's shape and every declared
//! invariant, accumulating all violations rather than stopping at the first.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::{LineageError, Result};
use crate::invariant::CompiledInvariant;
use crate::lineage::Lineage;
use crate::schema::{join_path, value_kind, FieldType, ObjectShape};
use crate::version::SchemaVersion;

/// A single way in which an instance fails its schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Dotted path of the offending field; empty for the instance root
    pub path: String,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required field is absent
    Missing,
    /// The value's type does not match the declared type
    TypeMismatch { expected: String, actual: String },
    /// The field is not declared and undeclared members are forbidden
    NotPermitted,
    /// A declared invariant does not hold
    Invariant { rule: String, actual: Option<String> },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { &self.path };
        match &self.kind {
            ViolationKind::Missing => write!(f, "{path}: required field is missing"),
            ViolationKind::TypeMismatch { expected, actual } => {
                write!(f, "{path}: expected {expected}, got {actual}")
            }
            ViolationKind::NotPermitted => write!(f, "{path}: field is not permitted"),
            ViolationKind::Invariant { rule, actual: Some(actual) } => {
                write!(f, "{path}: invariant '{rule}' violated by {actual}")
            }
            ViolationKind::Invariant { rule, actual: None } => {
                write!(f, "{path}: invariant '{rule}' violated")
            }
        }
    }
}

/// The complete set of violations found for one instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    /// Whether any violation concerns the given path
    pub fn mentions(&self, path: &str) -> bool {
        self.0.iter().any(|v| v.path == path)
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{} violation(s): {}", self.0.len(), rendered.join("; "))
    }
}

impl IntoIterator for Violations {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Lineage {
    /// All violations of `instance` against a version, in deterministic order
    ///
    /// Fails only when the version does not exist.
    pub fn violations(&self, instance: &Value, version: SchemaVersion) -> Result<Violations> {
        Ok(Violations(self.schema(version)?.violations(instance)))
    }

    /// Validate an instance against a version
    pub fn validate(&self, instance: &Value, version: SchemaVersion) -> Result<()> {
        let violations = self.violations(instance, version)?;
        if violations.is_empty() {
            Ok(())
        } else {
            Err(LineageError::SchemaInvalid(violations))
        }
    }
}

/// Collect all shape and invariant violations of `instance`
pub fn collect_violations(
    instance: &Value,
    shape: &ObjectShape,
    invariants: &[CompiledInvariant],
) -> Vec<Violation> {
    let mut violations = Vec::new();
    match instance {
        Value::Object(_) => check_object(instance, shape, "", &mut violations),
        other => violations.push(Violation {
            path: String::new(),
            kind: ViolationKind::TypeMismatch {
                expected: "object".to_string(),
                actual: describe(other),
            },
        }),
    }
    for invariant in invariants {
        invariant.check(instance, &mut violations);
    }
    violations
}

/// Whether a value is an instance of `ty`, nested members included
pub(crate) fn conforms(value: &Value, ty: &FieldType) -> bool {
    let mut out = Vec::new();
    check_value(value, ty, "", &mut out);
    out.is_empty()
}

fn check_object(instance: &Value, shape: &ObjectShape, prefix: &str, out: &mut Vec<Violation>) {
    let Some(members) = instance.as_object() else {
        return;
    };

    for field in &shape.fields {
        let path = join_path(prefix, &field.name);
        match members.get(&field.name) {
            Some(value) => check_value(value, &field.ty, &path, out),
            None if field.required => out.push(Violation {
                path,
                kind: ViolationKind::Missing,
            }),
            None => {}
        }
    }

    if !shape.additional_fields {
        for name in members.keys() {
            if shape.field(name).is_none() {
                out.push(Violation {
                    path: join_path(prefix, name),
                    kind: ViolationKind::NotPermitted,
                });
            }
        }
    }
}

fn check_value(value: &Value, ty: &FieldType, path: &str, out: &mut Vec<Violation>) {
    let matches = match (ty, value) {
        (FieldType::Any, _) => true,
        (FieldType::Null, Value::Null) => true,
        (FieldType::Boolean, Value::Bool(_)) => true,
        (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldType::Number, Value::Number(_)) => true,
        (FieldType::String, Value::String(_)) => true,
        (FieldType::Enum(values), Value::String(s)) => values.contains(s),
        (FieldType::Array(items), Value::Array(elements)) => {
            for (idx, element) in elements.iter().enumerate() {
                check_value(element, items, &format!("{path}[{idx}]"), out);
            }
            true
        }
        (FieldType::Object(inner), Value::Object(_)) => {
            check_object(value, inner, path, out);
            true
        }
        _ => false,
    };

    if !matches {
        out.push(Violation {
            path: path.to_string(),
            kind: ViolationKind::TypeMismatch {
                expected: ty.to_string(),
                actual: describe(value),
            },
        });
    }
}

fn describe(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.len() > 64 {
        value_kind(value).to_string()
    } else {
        format!("{} {}", value_kind(value), rendered)
    }
}
