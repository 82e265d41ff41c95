//! Per-version declared invariants
//!
//! Invariants are declared alongside a version's shape and address fields by
//! dotted path. Apart from `required`, an invariant only constrains a field
//! when that field is present in the instance.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{LineageError, Result};
use crate::path;
use crate::schema::{value_kind, FieldType, ObjectShape};
use crate::validate::{conforms, Violation, ViolationKind};

/// A declared rule every valid instance of a version must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Invariant {
    /// The field must be present
    Required { field: String },
    /// The field's value must have a type that is a subtype of `type`
    SubtypeOf {
        field: String,
        #[serde(rename = "type")]
        ty: FieldType,
    },
    /// The field must equal one of the listed values
    OneOf { field: String, values: Vec<Value> },
    /// The string field must match a regular expression
    Pattern { field: String, pattern: String },
    /// The numeric field must lie within inclusive bounds
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// The string or array field must have a length within inclusive bounds
    Length {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
    },
}

impl Invariant {
    /// The dotted path this invariant constrains
    pub fn field(&self) -> &str {
        match self {
            Invariant::Required { field }
            | Invariant::SubtypeOf { field, .. }
            | Invariant::OneOf { field, .. }
            | Invariant::Pattern { field, .. }
            | Invariant::Range { field, .. }
            | Invariant::Length { field, .. } => field,
        }
    }

    /// Check the invariant against a version's own shape and prepare it for use
    pub fn compile(&self, shape: &ObjectShape) -> Result<CompiledInvariant> {
        let field = self.field();
        if shape.field_at(field).is_none() {
            return Err(LineageError::invalid(format!(
                "invariant '{self}' references field '{field}' which is not declared"
            )));
        }

        let pattern = match self {
            Invariant::Pattern { pattern, .. } => Some(Regex::new(pattern).map_err(|e| {
                LineageError::invalid(format!("invariant '{self}' has an invalid pattern: {e}"))
            })?),
            Invariant::Range {
                min: Some(min),
                max: Some(max),
                ..
            } if min > max => {
                return Err(LineageError::invalid(format!(
                    "invariant '{self}' has min greater than max"
                )))
            }
            Invariant::Length {
                min: Some(min),
                max: Some(max),
                ..
            } if min > max => {
                return Err(LineageError::invalid(format!(
                    "invariant '{self}' has min greater than max"
                )))
            }
            _ => None,
        };

        Ok(CompiledInvariant {
            invariant: self.clone(),
            pattern,
        })
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invariant::Required { field } => write!(f, "{field} is required"),
            Invariant::SubtypeOf { field, ty } => write!(f, "{field} is a subtype of {ty}"),
            Invariant::OneOf { field, values } => {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{field} is one of [{}]", values.join(", "))
            }
            Invariant::Pattern { field, pattern } => write!(f, "{field} matches /{pattern}/"),
            Invariant::Range { field, min, max } => {
                write!(f, "{field} is within {}", bounds(min, max))
            }
            Invariant::Length { field, min, max } => {
                write!(f, "length of {field} is within {}", bounds(min, max))
            }
        }
    }
}

fn bounds<T: fmt::Display>(min: &Option<T>, max: &Option<T>) -> String {
    let lo = min.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-inf".to_string());
    let hi = max.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "inf".to_string());
    format!("[{lo}, {hi}]")
}

/// An invariant checked for consistency against its version, ready to evaluate
#[derive(Debug, Clone)]
pub struct CompiledInvariant {
    invariant: Invariant,
    pattern: Option<Regex>,
}

impl CompiledInvariant {
    pub fn invariant(&self) -> &Invariant {
        &self.invariant
    }

    /// Evaluate against an instance, appending any violation
    pub fn check(&self, instance: &Value, violations: &mut Vec<Violation>) {
        let field = self.invariant.field();
        let value = match path::get(instance, field) {
            Some(value) => value,
            None => {
                if matches!(self.invariant, Invariant::Required { .. }) {
                    violations.push(self.violation());
                }
                return;
            }
        };

        let holds = match &self.invariant {
            Invariant::Required { .. } => true,
            Invariant::SubtypeOf { ty, .. } => conforms(value, ty),
            Invariant::OneOf { values, .. } => values.contains(value),
            Invariant::Pattern { .. } => match (value.as_str(), &self.pattern) {
                (Some(s), Some(re)) => re.is_match(s),
                _ => false,
            },
            Invariant::Range { min, max, .. } => match value.as_f64() {
                Some(n) => min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m),
                None => false,
            },
            Invariant::Length { min, max, .. } => {
                let len = match value {
                    Value::String(s) => Some(s.chars().count()),
                    Value::Array(items) => Some(items.len()),
                    _ => None,
                };
                match len {
                    Some(len) => min.map_or(true, |m| len >= m) && max.map_or(true, |m| len <= m),
                    None => false,
                }
            }
        };

        if !holds {
            let mut violation = self.violation();
            if let ViolationKind::Invariant { actual, .. } = &mut violation.kind {
                *actual = Some(format!("{} {}", value_kind(value), value));
            }
            violations.push(violation);
        }
    }

    fn violation(&self) -> Violation {
        Violation {
            path: self.invariant.field().to_string(),
            kind: ViolationKind::Invariant {
                rule: self.invariant.to_string(),
                actual: None,
            },
        }
    }
}
