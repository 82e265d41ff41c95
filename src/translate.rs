//! Translation of instances between versions of a lineage
//!
//! Translation always walks the lens chain one step at a time: ascending
//! paths use forward transforms, descending paths use reverse transforms.
//! There are no shortcuts between non-adjacent versions, so adding a version
//! only ever requires lenses to its neighbours.

use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::error::Result;
use crate::lens::{Direction, Lens};
use crate::lineage::Lineage;
use crate::version::SchemaVersion;

/// One lens application within a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TranslationStep {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub direction: Direction,
    /// Whether the lens is declared lossy in this direction
    pub lossy: bool,
}

/// The outcome of translating an instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    pub instance: Value,
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub steps: Vec<TranslationStep>,
}

impl Translation {
    /// Whether any step taken may have dropped information
    pub fn is_lossy(&self) -> bool {
        self.steps.iter().any(|s| s.lossy)
    }

    pub fn into_instance(self) -> Value {
        self.instance
    }
}

impl Lineage {
    /// The lenses, with directions, that lead from one version to another
    pub fn lens_path(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<(&Lens, Direction)>> {
        let start = self.position(from)?;
        let end = self.position(to)?;
        let lenses = self.lenses();

        let path = if start <= end {
            lenses[start..end]
                .iter()
                .map(|lens| (lens, Direction::Forward))
                .collect()
        } else {
            lenses[end..start]
                .iter()
                .rev()
                .map(|lens| (lens, Direction::Reverse))
                .collect()
        };
        Ok(path)
    }

    /// Translate an instance from one version to another
    ///
    /// The input is never modified; every step produces a new value. Depending
    /// on the lineage's [`TranslationPolicy`](crate::TranslationPolicy) the
    /// input and output are validated against their versions.
    ///
    /// Translating to the same version returns the input unchanged, but only
    /// once it has passed input validation: with the default policy an
    /// invalid instance fails with `SchemaInvalid` even when `from == to`.
    pub fn translate(
        &self,
        instance: &Value,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Translation> {
        let path = self.lens_path(from, to)?;
        let policy = self.policy();

        if policy.validate_input {
            self.validate(instance, from)?;
        }

        let mut current = instance.clone();
        let mut steps = Vec::with_capacity(path.len());
        for (lens, direction) in path {
            let (step_from, step_to) = match direction {
                Direction::Forward => (lens.lower(), lens.higher()),
                Direction::Reverse => (lens.higher(), lens.lower()),
            };
            trace!(
                lineage = %self.name(),
                from = %step_from,
                to = %step_to,
                ?direction,
                "applying lens"
            );
            current = lens.apply(direction, &current);
            steps.push(TranslationStep {
                from: step_from,
                to: step_to,
                direction,
                lossy: lens.lossiness().in_direction(direction),
            });
        }

        if policy.validate_output {
            self.validate(&current, to)?;
        }

        Ok(Translation {
            instance: current,
            from,
            to,
            steps,
        })
    }

    /// Whether translating `from -> to -> from` is guaranteed to reproduce the input
    pub fn is_lossless(&self, from: SchemaVersion, to: SchemaVersion) -> Result<bool> {
        Ok(self
            .lens_path(from, to)?
            .iter()
            .all(|(lens, direction)| !lens.lossiness().in_direction(*direction)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineageError;
    use crate::lens::{LensOp, Lossiness};
    use crate::lineage::{LineageBuilder, TranslationPolicy};
    use crate::schema::ObjectShape;
    use crate::version::sv;
    use serde_json::json;

    fn shape(decl: Value) -> ObjectShape {
        ObjectShape::from_json(&decl).unwrap()
    }

    fn lineage() -> Lineage {
        LineageBuilder::new("plugindef")
            .schema(sv(0, 0), shape(json!({
                "properties": { "name": { "type": "string" } },
                "required": ["name"],
                "additionalProperties": false
            })))
            .schema(sv(0, 1), shape(json!({
                "properties": { "name": { "type": "string" }, "type": { "type": "string" } },
                "required": ["name", "type"],
                "additionalProperties": false
            })))
            .schema(sv(1, 0), shape(json!({
                "properties": { "title": { "type": "string" }, "type": { "type": "string" } },
                "required": ["title", "type"],
                "additionalProperties": false
            })))
            .lens(Lens::from_ops(
                sv(0, 0),
                sv(0, 1),
                vec![LensOp::AddField { field: "type".into(), default: json!("unknown") }],
                vec![LensOp::RemoveField { field: "type".into() }],
                Lossiness::LOSSY_REVERSE,
            ))
            .lens(Lens::from_ops(
                sv(0, 1),
                sv(1, 0),
                vec![LensOp::RenameField { from: "name".into(), to: "title".into() }],
                vec![LensOp::RenameField { from: "title".into(), to: "name".into() }],
                Lossiness::LOSSLESS,
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_identity() {
        let l = lineage();
        let x = json!({ "name": "x", "type": "panel" });
        let t = l.translate(&x, sv(0, 1), sv(0, 1)).unwrap();
        assert_eq!(t.instance, x);
        assert!(t.steps.is_empty());
    }

    #[test]
    fn test_forward_chain() {
        let t = lineage().translate(&json!({ "name": "x" }), sv(0, 0), sv(1, 0)).unwrap();
        assert_eq!(t.instance, json!({ "type": "unknown", "title": "x" }));
        assert_eq!(t.steps.len(), 2);
        assert!(!t.is_lossy());
    }

    #[test]
    fn test_reverse_chain_is_lossy() {
        let t = lineage()
            .translate(&json!({ "title": "x", "type": "custom" }), sv(1, 0), sv(0, 0))
            .unwrap();
        assert_eq!(t.instance, json!({ "name": "x" }));
        assert_eq!(t.steps[0].direction, Direction::Reverse);
        assert!(t.is_lossy());
    }

    #[test]
    fn test_unknown_versions() {
        let l = lineage();
        let err = l.translate(&json!({ "name": "x" }), sv(0, 0), sv(0, 7)).unwrap_err();
        assert!(matches!(err, LineageError::SchemaNotExist(v) if v == sv(0, 7)));
        let err = l.translate(&json!({ "name": "x" }), sv(9, 0), sv(0, 0)).unwrap_err();
        assert!(matches!(err, LineageError::SchemaNotExist(v) if v == sv(9, 0)));
    }

    #[test]
    fn test_invalid_input_is_rejected_and_lineage_reusable() {
        let l = lineage();
        let err = l.translate(&json!({ "name": 1 }), sv(0, 0), sv(0, 1)).unwrap_err();
        assert!(matches!(err, LineageError::SchemaInvalid(_)));
        assert!(l.translate(&json!({ "name": "ok" }), sv(0, 0), sv(0, 1)).is_ok());
    }

    #[test]
    fn test_policy_without_input_validation() {
        let l = lineage()
            .with_policy(TranslationPolicy { validate_input: false, validate_output: false });
        let t = l.translate(&json!({ "name": 1 }), sv(0, 0), sv(0, 1)).unwrap();
        assert_eq!(t.instance, json!({ "name": 1, "type": "unknown" }));
    }

    #[test]
    fn test_is_lossless() {
        let l = lineage();
        assert!(l.is_lossless(sv(0, 0), sv(1, 0)).unwrap());
        assert!(!l.is_lossless(sv(1, 0), sv(0, 0)).unwrap());
        assert!(l.is_lossless(sv(1, 0), sv(0, 1)).unwrap());
    }

    #[test]
    fn test_identity_on_invalid_instance_follows_policy() {
        let invalid = json!({ "name": 1 });
        let err = lineage().translate(&invalid, sv(0, 0), sv(0, 0)).unwrap_err();
        assert!(matches!(err, LineageError::SchemaInvalid(_)));

        let lenient = lineage()
            .with_policy(TranslationPolicy { validate_input: false, validate_output: false });
        assert_eq!(lenient.translate(&invalid, sv(0, 0), sv(0, 0)).unwrap().instance, invalid);
    }

    #[test]
    fn test_output_validation_rejects_bad_result() {
        let wrong_default = LineageBuilder::new("wrong")
            .schema(sv(0, 0), shape(json!({
                "properties": { "name": { "type": "string" } },
                "additionalProperties": false
            })))
            .schema(sv(0, 1), shape(json!({
                "properties": { "name": { "type": "string" }, "size": { "type": "integer" } },
                "required": ["size"],
                "additionalProperties": false
            })))
            .lens(Lens::from_ops(
                sv(0, 0),
                sv(0, 1),
                vec![LensOp::AddField { field: "size".into(), default: json!("large") }],
                vec![LensOp::RemoveField { field: "size".into() }],
                Lossiness::LOSSY_REVERSE,
            ))
            .policy(TranslationPolicy { validate_input: true, validate_output: true })
            .build()
            .unwrap();

        let err = wrong_default.translate(&json!({ "name": "x" }), sv(0, 0), sv(0, 1)).unwrap_err();
        match err {
            LineageError::SchemaInvalid(violations) => assert!(violations.mentions("size")),
            other => panic!("expected SchemaInvalid, got {other:?}"),
        }

        let unchecked = wrong_default.with_policy(TranslationPolicy::default());
        let t = unchecked.translate(&json!({ "name": "x" }), sv(0, 0), sv(0, 1)).unwrap();
        assert_eq!(t.instance, json!({ "name": "x", "size": "large" }));
    }

    #[test]
    fn test_open_lower_shape_makes_defaulting_lossy() {
        let open = LineageBuilder::new("open")
            .schema(sv(0, 0), shape(json!({
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            })))
            .schema(sv(0, 1), shape(json!({
                "properties": { "name": { "type": "string" }, "type": { "type": "string" } },
                "required": ["name", "type"]
            })))
            .lens(Lens::from_ops(
                sv(0, 0),
                sv(0, 1),
                vec![LensOp::AddField { field: "type".into(), default: json!("unknown") }],
                vec![LensOp::RemoveField { field: "type".into() }],
                Lossiness::LOSSY_REVERSE,
            ))
            .build()
            .unwrap();

        assert!(!open.is_lossless(sv(0, 0), sv(0, 1)).unwrap());

        // An extra member under 0.0 survives the upgrade but is dropped on the way back
        let x = json!({ "name": "x", "type": "custom" });
        let up = open.translate(&x, sv(0, 0), sv(0, 1)).unwrap();
        assert!(up.is_lossy());
        let back = open.translate(&up.instance, sv(0, 1), sv(0, 0)).unwrap();
        assert_eq!(back.instance, json!({ "name": "x" }));
        assert_ne!(back.instance, x);
    }
}
