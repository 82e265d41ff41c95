//! Structural schema model
//!
//! A schema version's shape is an ordered list of fields, each with a
//! [`FieldType`] and an optionality flag. Shapes are declared in a small
//! JSON-Schema-like subset:
//!
//! ```json
//! {
//!   "type": "object",
//!   "properties": {
//!     "id":   { "type": "string" },
//!     "info": { "type": "object", "properties": { "version": { "type": "string" } } }
//!   },
//!   "required": ["id"]
//! }
//! ```
//!
//! Field order is the declaration order of `properties` and is the order of
//! every deterministic scan (validation, assignability, compatibility).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{LineageError, Result};

/// Type of a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Accepts any value
    Any,
    Null,
    Boolean,
    /// Whole numbers; a subtype of `Number`
    Integer,
    Number,
    String,
    /// A closed set of strings; a subtype of `String`
    Enum(Vec<String>),
    Array(Box<FieldType>),
    Object(ObjectShape),
}

impl FieldType {
    /// Structural subtyping: every value of `self` is a value of `other`
    pub fn is_subtype_of(&self, other: &FieldType) -> bool {
        match (self, other) {
            (_, FieldType::Any) => true,
            (FieldType::Any, _) => false,
            (FieldType::Integer, FieldType::Number) => true,
            (FieldType::Enum(_), FieldType::String) => true,
            (FieldType::Enum(a), FieldType::Enum(b)) => a.iter().all(|v| b.contains(v)),
            (FieldType::Array(a), FieldType::Array(b)) => a.is_subtype_of(b),
            (FieldType::Object(a), FieldType::Object(b)) => b.subsumes(a).is_ok(),
            (a, b) => a == b,
        }
    }

    /// The narrowest type describing a concrete value
    pub fn of_value(value: &Value) -> FieldType {
        match value {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
            Value::Number(_) => FieldType::Number,
            Value::String(_) => FieldType::String,
            Value::Array(_) => FieldType::Array(Box::new(FieldType::Any)),
            Value::Object(map) => FieldType::Object(ObjectShape {
                fields: map
                    .iter()
                    .map(|(name, v)| FieldDef::required(name, FieldType::of_value(v)))
                    .collect(),
                additional_fields: true,
            }),
        }
    }

    /// The smallest type that both `self` and `other` are subtypes of
    pub fn join(&self, other: &FieldType) -> FieldType {
        if self.is_subtype_of(other) {
            other.clone()
        } else if other.is_subtype_of(self) {
            self.clone()
        } else {
            match (self, other) {
                (
                    FieldType::Integer | FieldType::Number,
                    FieldType::Integer | FieldType::Number,
                ) => FieldType::Number,
                (FieldType::Enum(a), FieldType::Enum(b)) => {
                    let mut values = a.clone();
                    values.extend(b.iter().filter(|v| !a.contains(v)).cloned());
                    FieldType::Enum(values)
                }
                (
                    FieldType::Enum(_) | FieldType::String,
                    FieldType::Enum(_) | FieldType::String,
                ) => FieldType::String,
                _ => FieldType::Any,
            }
        }
    }

    /// Parse a field type from its JSON declaration
    pub fn from_json(decl: &Value) -> Result<FieldType> {
        let obj = decl.as_object().ok_or_else(|| {
            LineageError::InvalidFormat(format!("type declaration must be an object, got {decl}"))
        })?;

        if let Some(values) = obj.get("enum") {
            let values = values
                .as_array()
                .ok_or_else(|| LineageError::InvalidFormat("'enum' must be an array".to_string()))?
                .iter()
                .map(|v| {
                    v.as_str().map(String::from).ok_or_else(|| {
                        LineageError::InvalidFormat(format!("enum values must be strings, got {v}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(FieldType::Enum(values));
        }

        let type_name = match obj.get("type") {
            None if obj.contains_key("properties") => "object",
            None => return Ok(FieldType::Any),
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(LineageError::InvalidFormat(format!(
                    "'type' must be a string, got {other}"
                )))
            }
        };

        match type_name {
            "any" => Ok(FieldType::Any),
            "null" => Ok(FieldType::Null),
            "boolean" => Ok(FieldType::Boolean),
            "integer" => Ok(FieldType::Integer),
            "number" => Ok(FieldType::Number),
            "string" => Ok(FieldType::String),
            "array" => {
                let items = match obj.get("items") {
                    Some(items) => FieldType::from_json(items)?,
                    None => FieldType::Any,
                };
                Ok(FieldType::Array(Box::new(items)))
            }
            "object" => Ok(FieldType::Object(ObjectShape::from_json(decl)?)),
            other => Err(LineageError::InvalidFormat(format!("unknown type '{other}'"))),
        }
    }

    /// Render back into the declaration subset
    pub fn to_json(&self) -> Value {
        match self {
            FieldType::Any => Value::Object(Map::new()),
            FieldType::Null => serde_json::json!({ "type": "null" }),
            FieldType::Boolean => serde_json::json!({ "type": "boolean" }),
            FieldType::Integer => serde_json::json!({ "type": "integer" }),
            FieldType::Number => serde_json::json!({ "type": "number" }),
            FieldType::String => serde_json::json!({ "type": "string" }),
            FieldType::Enum(values) => serde_json::json!({ "type": "string", "enum": values }),
            FieldType::Array(items) => {
                serde_json::json!({ "type": "array", "items": items.to_json() })
            }
            FieldType::Object(shape) => shape.to_json(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectShape> {
        match self {
            FieldType::Object(shape) => Some(shape),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Any => write!(f, "any"),
            FieldType::Null => write!(f, "null"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Number => write!(f, "number"),
            FieldType::String => write!(f, "string"),
            FieldType::Enum(values) => write!(f, "enum[{}]", values.join("|")),
            FieldType::Array(items) => write!(f, "array<{items}>"),
            FieldType::Object(_) => write!(f, "object"),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let decl = Value::deserialize(deserializer)?;
        FieldType::from_json(&decl).map_err(serde::de::Error::custom)
    }
}

impl Serialize for ObjectShape {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectShape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let decl = Value::deserialize(deserializer)?;
        ObjectShape::from_json(&decl).map_err(serde::de::Error::custom)
    }
}

/// Short name for the JSON kind of a value, used in diagnostics
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single field definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Where a shape comparison failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    /// Dotted path of the offending field
    pub field: String,
    pub reason: String,
}

impl fmt::Display for ShapeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}' {}", self.field, self.reason)
    }
}

/// The structure of an object: ordered fields plus whether unknown members are allowed
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectShape {
    pub fields: Vec<FieldDef>,
    pub additional_fields: bool,
}

impl Default for ObjectShape {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            additional_fields: true,
        }
    }
}

impl ObjectShape {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            additional_fields: true,
        }
    }

    /// Forbid members not declared in `fields`
    pub fn closed(mut self) -> Self {
        self.additional_fields = false;
        self
    }

    /// Parse an object shape from its JSON declaration
    pub fn from_json(decl: &Value) -> Result<ObjectShape> {
        let obj = decl.as_object().ok_or_else(|| {
            LineageError::InvalidFormat(format!("shape must be an object, got {decl}"))
        })?;

        if let Some(t) = obj.get("type") {
            if t.as_str() != Some("object") {
                return Err(LineageError::InvalidFormat(format!(
                    "shape must have type 'object', got {t}"
                )));
            }
        }

        let required: Vec<&str> = match obj.get("required") {
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str().ok_or_else(|| {
                        LineageError::InvalidFormat(format!(
                            "'required' entries must be strings, got {n}"
                        ))
                    })
                })
                .collect::<Result<_>>()?,
            Some(other) => {
                return Err(LineageError::InvalidFormat(format!(
                    "'required' must be an array, got {other}"
                )))
            }
            None => Vec::new(),
        };

        let mut fields = Vec::new();
        if let Some(props) = obj.get("properties") {
            let props = props.as_object().ok_or_else(|| {
                LineageError::InvalidFormat("'properties' must be an object".to_string())
            })?;
            for (name, prop) in props {
                let ty = FieldType::from_json(prop)?;
                fields.push(FieldDef {
                    name: name.clone(),
                    ty,
                    required: required.contains(&name.as_str()),
                    default: prop.get("default").cloned(),
                    description: prop
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(String::from),
                });
            }
        }

        if let Some(missing) = required.iter().find(|r| !fields.iter().any(|f| f.name == **r)) {
            return Err(LineageError::InvalidFormat(format!(
                "required field '{missing}' is not declared in properties"
            )));
        }

        let additional_fields = match obj.get("additionalProperties") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(LineageError::InvalidFormat(format!(
                    "'additionalProperties' must be a boolean, got {other}"
                )))
            }
        };

        Ok(ObjectShape {
            fields,
            additional_fields,
        })
    }

    /// Render back into the declaration subset
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut decl = field.ty.to_json();
            if let Value::Object(map) = &mut decl {
                if let Some(default) = &field.default {
                    map.insert("default".to_string(), default.clone());
                }
                if let Some(description) = &field.description {
                    map.insert("description".to_string(), Value::String(description.clone()));
                }
            }
            properties.insert(field.name.clone(), decl);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        let mut out = serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
        if !self.additional_fields {
            out["additionalProperties"] = Value::Bool(false);
        }
        out
    }

    /// Look up a direct field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by dotted path (e.g. `info.version`)
    pub fn field_at(&self, path: &str) -> Option<&FieldDef> {
        let mut shape = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let field = shape.field(segment)?;
            if segments.peek().is_none() {
                return Some(field);
            }
            shape = field.ty.as_object()?;
        }
        None
    }

    /// Whether an instance of this shape may carry a member at a dotted path
    pub fn admits(&self, path: &str) -> bool {
        let (head, rest) = match path.split_once('.') {
            None => (path, None),
            Some((head, rest)) => (head, Some(rest)),
        };
        match (self.field(head), rest) {
            (Some(_), None) => true,
            (Some(field), Some(rest)) => match &field.ty {
                FieldType::Object(inner) => inner.admits(rest),
                FieldType::Any => true,
                _ => false,
            },
            (None, _) => self.additional_fields,
        }
    }

    pub fn field_at_mut(&mut self, path: &str) -> Option<&mut FieldDef> {
        match path.split_once('.') {
            None => self.fields.iter_mut().find(|f| f.name == path),
            Some((head, rest)) => match &mut self.fields.iter_mut().find(|f| f.name == head)?.ty {
                FieldType::Object(inner) => inner.field_at_mut(rest),
                _ => None,
            },
        }
    }

    /// Remove the field at a dotted path, returning it
    pub fn remove_at(&mut self, path: &str) -> Option<FieldDef> {
        match path.split_once('.') {
            None => {
                let idx = self.fields.iter().position(|f| f.name == path)?;
                Some(self.fields.remove(idx))
            }
            Some((head, rest)) => match &mut self.fields.iter_mut().find(|f| f.name == head)?.ty {
                FieldType::Object(inner) => inner.remove_at(rest),
                _ => None,
            },
        }
    }

    /// Insert or replace the field at a dotted path
    ///
    /// Missing intermediate objects are created with the given optionality.
    /// Intermediates declared with a non-object type are left alone.
    pub fn upsert_at(&mut self, path: &str, mut def: FieldDef) {
        match path.split_once('.') {
            None => {
                def.name = path.to_string();
                match self.fields.iter_mut().find(|f| f.name == path) {
                    Some(existing) => *existing = def,
                    None => self.fields.push(def),
                }
            }
            Some((head, rest)) => {
                if self.field(head).is_none() {
                    self.fields.push(FieldDef {
                        name: head.to_string(),
                        ty: FieldType::Object(ObjectShape::default()),
                        required: def.required,
                        default: None,
                        description: None,
                    });
                }
                if let Some(FieldType::Object(inner)) = self
                    .fields
                    .iter_mut()
                    .find(|f| f.name == head)
                    .map(|f| &mut f.ty)
                {
                    inner.upsert_at(rest, def);
                }
            }
        }
    }

    /// Check that every instance valid under `other` is also valid under `self`
    ///
    /// Returns the first mismatch in a deterministic scan: `self`'s required
    /// fields first, then `other`'s fields, both in declaration order.
    pub fn subsumes(&self, other: &ObjectShape) -> std::result::Result<(), ShapeMismatch> {
        self.subsumes_at(other, "")
    }

    fn subsumes_at(
        &self,
        other: &ObjectShape,
        prefix: &str,
    ) -> std::result::Result<(), ShapeMismatch> {
        for field in self.fields.iter().filter(|f| f.required) {
            match other.field(&field.name) {
                None => {
                    return Err(ShapeMismatch {
                        field: join_path(prefix, &field.name),
                        reason: "is required but not present".to_string(),
                    })
                }
                Some(theirs) if !theirs.required => {
                    return Err(ShapeMismatch {
                        field: join_path(prefix, &field.name),
                        reason: "is required but may be absent".to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        for theirs in &other.fields {
            let path = join_path(prefix, &theirs.name);
            match self.field(&theirs.name) {
                Some(ours) => {
                    if let (FieldType::Object(a), FieldType::Object(b)) = (&ours.ty, &theirs.ty) {
                        a.subsumes_at(b, &path)?;
                    } else if !theirs.ty.is_subtype_of(&ours.ty) {
                        return Err(ShapeMismatch {
                            field: path,
                            reason: format!(
                                "has type {} which is not a subtype of {}",
                                theirs.ty, ours.ty
                            ),
                        });
                    }
                }
                None if !self.additional_fields => {
                    return Err(ShapeMismatch {
                        field: path,
                        reason: "is not permitted".to_string(),
                    })
                }
                None => {}
            }
        }

        if other.additional_fields && !self.additional_fields {
            return Err(ShapeMismatch {
                field: if prefix.is_empty() { "*".to_string() } else { format!("{prefix}.*") },
                reason: "admits undeclared members which are not permitted".to_string(),
            });
        }

        Ok(())
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
