//! Lenses between adjacent schema versions
//!
//! A [`Lens`] connects a lower version to the version directly above it and
//! carries one transform per direction. Transforms are total: they accept any
//! JSON value and always produce one, never mutating their input.
//!
//! Lenses are usually declared as a list of [`LensOp`]s, which also describe
//! how they reshape a schema so the lineage can check minor-version
//! compatibility statically. Arbitrary transforms can be supplied through
//! [`LensTransform`].
//!
//! Whether a direction loses information is declared: see [`Lossiness`].
//! Assembly also marks a direction lossy when it writes a member that
//! instances of its source version may already carry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::path;
use crate::schema::{FieldDef, FieldType, ObjectShape};
use crate::version::SchemaVersion;

/// A total transformation of instances in one direction of a lens
pub trait LensTransform: Send + Sync + fmt::Debug {
    /// Produce a new instance from `instance`
    fn apply(&self, instance: &Value) -> Value;

    /// How this transform reshapes a schema, if it can describe that statically
    fn shape_image(&self, _shape: &ObjectShape) -> Option<ObjectShape> {
        None
    }

    /// Whether this transform overwrites or drops data
    fn may_lose_data(&self) -> bool {
        false
    }

    /// Whether this transform writes a member that instances of `source` may
    /// already carry, so the opposite direction cannot tell the two apart
    fn shadows(&self, _source: &ObjectShape) -> bool {
        false
    }
}

/// A single declarative lens operation on a dotted field path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LensOp {
    /// Set `field` to `default` when absent
    AddField { field: String, default: Value },
    RemoveField { field: String },
    /// Move `from` to `to`; nothing happens when `from` is absent
    RenameField { from: String, to: String },
    /// Set `field` to `value` unconditionally
    SetField { field: String, value: Value },
    /// Copy `from` to `to`; nothing happens when `from` is absent
    CopyField { from: String, to: String },
    /// Replace string values of `field` through `mapping`
    ///
    /// Unmapped strings become `fallback` when it is given and are kept
    /// otherwise. Non-string values are kept.
    MapValues {
        field: String,
        mapping: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Value>,
    },
}

impl LensOp {
    fn apply(&self, instance: &mut Value) {
        match self {
            LensOp::AddField { field, default } => {
                if path::get(instance, field).is_none() {
                    path::insert(instance, field, default.clone());
                }
            }
            LensOp::RemoveField { field } => {
                path::remove(instance, field);
            }
            LensOp::RenameField { from, to } => {
                if let Some(value) = path::remove(instance, from) {
                    path::insert(instance, to, value);
                }
            }
            LensOp::SetField { field, value } => {
                path::insert(instance, field, value.clone());
            }
            LensOp::CopyField { from, to } => {
                if let Some(value) = path::get(instance, from).cloned() {
                    path::insert(instance, to, value);
                }
            }
            LensOp::MapValues {
                field,
                mapping,
                fallback,
            } => {
                let replacement = match path::get(instance, field) {
                    Some(Value::String(s)) => mapping.get(s).or(fallback.as_ref()).cloned(),
                    _ => None,
                };
                if let Some(replacement) = replacement {
                    path::insert(instance, field, replacement);
                }
            }
        }
    }

    fn reshape(&self, shape: &mut ObjectShape) {
        match self {
            LensOp::AddField { field, default } => {
                let default_ty = FieldType::of_value(default);
                match shape.field_at_mut(field) {
                    Some(existing) => {
                        existing.ty = existing.ty.join(&default_ty);
                        existing.required = true;
                    }
                    None => {
                        let def = FieldDef::required(field.as_str(), default_ty)
                            .with_default(default.clone());
                        shape.upsert_at(field, def);
                    }
                }
            }
            LensOp::RemoveField { field } => {
                shape.remove_at(field);
            }
            LensOp::RenameField { from, to } => {
                if let Some(def) = shape.remove_at(from) {
                    shape.upsert_at(to, def);
                }
            }
            LensOp::SetField { field, value } => {
                let def = FieldDef::required(field.as_str(), FieldType::of_value(value));
                shape.upsert_at(field, def);
            }
            LensOp::CopyField { from, to } => {
                if let Some(def) = shape.field_at(from).cloned() {
                    shape.upsert_at(to, def);
                }
            }
            LensOp::MapValues {
                field,
                mapping,
                fallback,
            } => {
                if let Some(existing) = shape.field_at_mut(field) {
                    let ty = mapping
                        .values()
                        .chain(fallback.iter())
                        .fold(existing.ty.clone(), |ty, v| ty.join(&FieldType::of_value(v)));
                    existing.ty = ty;
                }
            }
        }
    }

    fn may_lose_data(&self) -> bool {
        matches!(
            self,
            LensOp::RemoveField { .. } | LensOp::SetField { .. } | LensOp::MapValues { .. }
        )
    }

    fn shadows(&self, source: &ObjectShape) -> bool {
        match self {
            LensOp::AddField { field, .. } => source.admits(field),
            LensOp::RenameField { to, .. } | LensOp::CopyField { to, .. } => source.admits(to),
            _ => false,
        }
    }
}

/// A sequence of [`LensOp`]s applied left to right
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpChain(pub Vec<LensOp>);

impl LensTransform for OpChain {
    fn apply(&self, instance: &Value) -> Value {
        let mut out = instance.clone();
        for op in &self.0 {
            op.apply(&mut out);
        }
        out
    }

    fn shape_image(&self, shape: &ObjectShape) -> Option<ObjectShape> {
        let mut image = shape.clone();
        for op in &self.0 {
            op.reshape(&mut image);
        }
        Some(image)
    }

    fn may_lose_data(&self) -> bool {
        self.0.iter().any(LensOp::may_lose_data)
    }

    fn shadows(&self, source: &ObjectShape) -> bool {
        self.0.iter().any(|op| op.shadows(source))
    }
}

/// A transform backed by a plain function
pub struct FnTransform<F>(pub F);

impl<F> fmt::Debug for FnTransform<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnTransform")
    }
}

impl<F> LensTransform for FnTransform<F>
where
    F: Fn(&Value) -> Value + Send + Sync,
{
    fn apply(&self, instance: &Value) -> Value {
        (self.0)(instance)
    }
}

/// Which directions of a lens may lose information
///
/// A direction is lossy when taking it and then the opposite direction may
/// not reproduce the original instance. For a lens that adds a defaulted
/// field going up, `reverse` is lossy (the field's value is dropped on the
/// way down) while `forward` is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lossiness {
    #[serde(default)]
    pub forward: bool,
    #[serde(default)]
    pub reverse: bool,
}

impl Lossiness {
    pub const LOSSLESS: Lossiness = Lossiness {
        forward: false,
        reverse: false,
    };

    pub const LOSSY_REVERSE: Lossiness = Lossiness {
        forward: false,
        reverse: true,
    };

    pub fn in_direction(&self, direction: Direction) -> bool {
        match direction {
            Direction::Forward => self.forward,
            Direction::Reverse => self.reverse,
        }
    }
}

/// Direction of travel through a lens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Lower version to higher version
    Forward,
    /// Higher version to lower version
    Reverse,
}

/// A bidirectional transform between two adjacent versions
#[derive(Debug, Clone)]
pub struct Lens {
    lower: SchemaVersion,
    higher: SchemaVersion,
    forward: Arc<dyn LensTransform>,
    reverse: Arc<dyn LensTransform>,
    lossiness: Lossiness,
}

impl Lens {
    pub fn new(
        lower: SchemaVersion,
        higher: SchemaVersion,
        forward: impl LensTransform + 'static,
        reverse: impl LensTransform + 'static,
        lossiness: Lossiness,
    ) -> Self {
        Self {
            lower,
            higher,
            forward: Arc::new(forward),
            reverse: Arc::new(reverse),
            lossiness,
        }
    }

    /// Build a lens from declarative operation lists
    pub fn from_ops(
        lower: SchemaVersion,
        higher: SchemaVersion,
        forward: Vec<LensOp>,
        reverse: Vec<LensOp>,
        lossiness: Lossiness,
    ) -> Self {
        Self::new(lower, higher, OpChain(forward), OpChain(reverse), lossiness)
    }

    /// Build a lens from plain functions
    pub fn from_fns<F, R>(
        lower: SchemaVersion,
        higher: SchemaVersion,
        forward: F,
        reverse: R,
        lossiness: Lossiness,
    ) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
        R: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self::new(lower, higher, FnTransform(forward), FnTransform(reverse), lossiness)
    }

    pub fn lower(&self) -> SchemaVersion {
        self.lower
    }

    pub fn higher(&self) -> SchemaVersion {
        self.higher
    }

    pub fn lossiness(&self) -> Lossiness {
        self.lossiness
    }

    pub fn transform(&self, direction: Direction) -> &dyn LensTransform {
        match direction {
            Direction::Forward => self.forward.as_ref(),
            Direction::Reverse => self.reverse.as_ref(),
        }
    }

    /// Translate one step in the given direction
    pub fn apply(&self, direction: Direction, instance: &Value) -> Value {
        self.transform(direction).apply(instance)
    }

    /// Mark directions whose transform shadows members the source version admits
    ///
    /// Returns the directions that were not already declared lossy.
    pub(crate) fn absorb_shadowing(
        &mut self,
        lower: &ObjectShape,
        higher: &ObjectShape,
    ) -> Vec<Direction> {
        let mut marked = Vec::new();
        if !self.lossiness.forward && self.forward.shadows(lower) {
            self.lossiness.forward = true;
            marked.push(Direction::Forward);
        }
        if !self.lossiness.reverse && self.reverse.shadows(higher) {
            self.lossiness.reverse = true;
            marked.push(Direction::Reverse);
        }
        marked
    }

    /// Directions whose transform drops or overwrites data without being declared lossy
    pub fn undeclared_losses(&self) -> Vec<Direction> {
        [Direction::Forward, Direction::Reverse]
            .into_iter()
            .filter(|d| self.transform(*d).may_lose_data() && !self.lossiness.in_direction(*d))
            .collect()
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.lower, self.higher)
    }
}
