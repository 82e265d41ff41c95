//! Lineage assembly
//!
//! A [`Lineage`] is the complete, validated version history of one named
//! schema: an ordered sequence of [`SchemaNode`]s and exactly one [`Lens`]
//! per adjacent pair. Assembly is all-or-nothing; a `Lineage` value always
//! satisfies these rules:
//!
//! 1. Versions are unique, strictly ascending, start at `0.0`, and each one
//!    is the next minor or next major version of its predecessor.
//! 2. Every adjacent pair is connected by exactly one lens, and no lens
//!    refers to a non-adjacent or unknown version.
//! 3. Every invariant refers to a field declared by its own version.
//! 4. Within a major version, the reverse lens of each minor bump maps the
//!    newer shape into something the older shape accepts.
//!
//! Once assembled a lineage is immutable and can be shared freely across
//! threads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::declaration::LineageDeclaration;
use crate::error::{LineageError, Result};
use crate::invariant::{CompiledInvariant, Invariant};
use crate::lens::{Direction, Lens};
use crate::schema::ObjectShape;
use crate::validate::{collect_violations, Violation};
use crate::version::SchemaVersion;

/// Checks applied around every translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationPolicy {
    /// Validate the instance against the source version before translating
    #[serde(default = "default_true")]
    pub validate_input: bool,
    /// Validate the result against the target version after translating
    #[serde(default)]
    pub validate_output: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TranslationPolicy {
    fn default() -> Self {
        Self {
            validate_input: true,
            validate_output: false,
        }
    }
}

/// One immutable schema version within a lineage
#[derive(Debug, Clone)]
pub struct SchemaNode {
    version: SchemaVersion,
    shape: ObjectShape,
    invariants: Vec<CompiledInvariant>,
}

impl SchemaNode {
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn shape(&self) -> &ObjectShape {
        &self.shape
    }

    pub fn invariants(&self) -> impl Iterator<Item = &Invariant> {
        self.invariants.iter().map(CompiledInvariant::invariant)
    }

    /// All violations of this version's shape and invariants
    pub fn violations(&self, instance: &Value) -> Vec<Violation> {
        collect_violations(instance, &self.shape, &self.invariants)
    }
}

/// A validated, immutable schema lineage
#[derive(Debug, Clone)]
pub struct Lineage {
    name: String,
    nodes: Vec<SchemaNode>,
    /// `lenses[i]` connects `nodes[i]` and `nodes[i + 1]`
    lenses: Vec<Lens>,
    primary: usize,
    checksum: Option<Checksum>,
    policy: TranslationPolicy,
}

impl Lineage {
    /// Assemble and validate a lineage from its declaration
    pub fn assemble(declaration: LineageDeclaration) -> Result<Lineage> {
        declaration.check_format()?;
        LineageBuilder::from_declaration(declaration).build()
    }

    /// Parse, checksum and assemble a lineage from raw declaration bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Lineage> {
        let checksum = Checksum::from_bytes(bytes);
        let declaration = LineageDeclaration::from_slice(bytes)?;
        LineageBuilder::from_declaration(declaration)
            .checksum(checksum)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All versions in ascending order
    pub fn versions(&self) -> Vec<SchemaVersion> {
        self.nodes.iter().map(|n| n.version).collect()
    }

    pub fn schemas(&self) -> &[SchemaNode] {
        &self.nodes
    }

    /// Lenses in ascending order, one per adjacent pair
    pub fn lenses(&self) -> &[Lens] {
        &self.lenses
    }

    pub fn has_version(&self, version: SchemaVersion) -> bool {
        self.position(version).is_ok()
    }

    /// Get the schema for a version
    pub fn schema(&self, version: SchemaVersion) -> Result<&SchemaNode> {
        self.position(version).map(|idx| &self.nodes[idx])
    }

    /// The lowest version
    pub fn first_version(&self) -> SchemaVersion {
        self.nodes[0].version
    }

    /// The highest version
    pub fn latest_version(&self) -> SchemaVersion {
        self.nodes[self.nodes.len() - 1].version
    }

    /// The version designated for binding to host types
    pub fn primary_version(&self) -> SchemaVersion {
        self.nodes[self.primary].version
    }

    pub fn primary_schema(&self) -> &SchemaNode {
        &self.nodes[self.primary]
    }

    /// Checksum of the declaration bytes, when assembled from bytes
    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn policy(&self) -> TranslationPolicy {
        self.policy
    }

    /// Copy of this lineage with a different translation policy
    pub fn with_policy(mut self, policy: TranslationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn position(&self, version: SchemaVersion) -> Result<usize> {
        self.nodes
            .binary_search_by(|n| n.version.cmp(&version))
            .map_err(|_| LineageError::SchemaNotExist(version))
    }
}

/// Incremental, programmatic construction of a [`Lineage`]
///
/// Useful when lenses need transforms that cannot be declared as data.
#[derive(Debug, Default)]
pub struct LineageBuilder {
    name: String,
    schemas: Vec<(SchemaVersion, ObjectShape, Vec<Invariant>)>,
    lenses: Vec<Lens>,
    primary: Option<SchemaVersion>,
    checksum: Option<Checksum>,
    policy: TranslationPolicy,
}

impl LineageBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_declaration(declaration: LineageDeclaration) -> Self {
        let mut builder = Self::new(declaration.name);
        builder.primary = declaration.primary;
        for schema in declaration.schemas {
            builder =
                builder.schema_with_invariants(schema.version, schema.shape, schema.invariants);
        }
        for lens in declaration.lenses {
            builder = builder.lens(Lens::from_ops(
                lens.from,
                lens.to,
                lens.forward,
                lens.reverse,
                lens.lossy,
            ));
        }
        builder
    }

    /// Append a schema version
    pub fn schema(self, version: SchemaVersion, shape: ObjectShape) -> Self {
        self.schema_with_invariants(version, shape, Vec::new())
    }

    pub fn schema_with_invariants(
        mut self,
        version: SchemaVersion,
        shape: ObjectShape,
        invariants: Vec<Invariant>,
    ) -> Self {
        self.schemas.push((version, shape, invariants));
        self
    }

    pub fn lens(mut self, lens: Lens) -> Self {
        self.lenses.push(lens);
        self
    }

    pub fn primary(mut self, version: SchemaVersion) -> Self {
        self.primary = Some(version);
        self
    }

    pub fn policy(mut self, policy: TranslationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Validate everything and produce the lineage
    pub fn build(self) -> Result<Lineage> {
        let name = self.name;
        debug!(
            lineage = %name,
            schemas = self.schemas.len(),
            lenses = self.lenses.len(),
            "assembling lineage"
        );

        let versions: Vec<SchemaVersion> = self.schemas.iter().map(|(v, _, _)| *v).collect();
        check_sequence(&name, &versions)?;

        let mut lenses = connect_lenses(&name, &versions, self.lenses)?;

        let mut nodes = Vec::with_capacity(self.schemas.len());
        for (version, shape, invariants) in self.schemas {
            let invariants = invariants
                .iter()
                .map(|inv| inv.compile(&shape))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| match e {
                    LineageError::InvalidLineage(reason) => {
                        LineageError::invalid(format!("{name} {version}: {reason}"))
                    }
                    other => other,
                })?;
            nodes.push(SchemaNode {
                version,
                shape,
                invariants,
            });
        }

        for (pair, lens) in nodes.windows(2).zip(lenses.iter_mut()) {
            for direction in lens.absorb_shadowing(&pair[0].shape, &pair[1].shape) {
                info!(
                    lineage = %name,
                    lens = %lens,
                    ?direction,
                    "lens writes a member the source version already admits; marked lossy"
                );
            }
        }

        check_compatibility(&name, &nodes, &lenses)?;

        let primary = match self.primary {
            Some(version) => versions
                .iter()
                .position(|v| *v == version)
                .ok_or(LineageError::SchemaNotExist(version))?,
            None => 0,
        };

        info!(
            lineage = %name,
            versions = nodes.len(),
            latest = %versions[versions.len() - 1],
            primary = %versions[primary],
            checksum = self.checksum.as_ref().map(|c| c.short()).unwrap_or("-"),
            "lineage assembled"
        );

        Ok(Lineage {
            name,
            nodes,
            lenses,
            primary,
            checksum: self.checksum,
            policy: self.policy,
        })
    }
}

fn check_sequence(name: &str, versions: &[SchemaVersion]) -> Result<()> {
    let first = versions
        .first()
        .ok_or_else(|| LineageError::invalid(format!("{name} declares no schemas")))?;

    if *first != SchemaVersion::ZERO {
        return Err(LineageError::invalid(format!(
            "{name}: first version must be {}, found {first}",
            SchemaVersion::ZERO
        )));
    }

    for pair in versions.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next == prev {
            return Err(LineageError::invalid(format!("{name}: duplicate version {next}")));
        }
        if next < prev {
            return Err(LineageError::invalid(format!(
                "{name}: version {next} is declared after {prev}"
            )));
        }
        if !prev.is_successor(&next) {
            return Err(LineageError::invalid(format!(
                "{name}: version {next} cannot follow {prev}, expected {} or {}",
                prev.next_minor(),
                prev.next_major()
            )));
        }
    }

    debug!(lineage = %name, "version sequence ok");
    Ok(())
}

fn connect_lenses(
    name: &str,
    versions: &[SchemaVersion],
    declared: Vec<Lens>,
) -> Result<Vec<Lens>> {
    let positions: HashMap<SchemaVersion, usize> =
        versions.iter().enumerate().map(|(i, v)| (*v, i)).collect();
    let mut slots: Vec<Option<Lens>> = vec![None; versions.len().saturating_sub(1)];

    for lens in declared {
        let unknown = |v: SchemaVersion| {
            LineageError::invalid(format!("{name}: lens {lens} references unknown version {v}"))
        };
        let lower = *positions.get(&lens.lower()).ok_or_else(|| unknown(lens.lower()))?;
        let higher = *positions.get(&lens.higher()).ok_or_else(|| unknown(lens.higher()))?;
        if higher != lower + 1 {
            return Err(LineageError::invalid(format!(
                "{name}: lens {lens} must connect a version to the one directly after it"
            )));
        }
        if slots[lower].is_some() {
            return Err(LineageError::invalid(format!("{name}: duplicate lens {lens}")));
        }
        for direction in lens.undeclared_losses() {
            warn!(
                lineage = %name,
                lens = %lens,
                ?direction,
                "lens drops or overwrites data but is not declared lossy"
            );
        }
        slots[lower] = Some(lens);
    }

    let lenses = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or(LineageError::LensIncomplete {
                lower: versions[i],
                higher: versions[i + 1],
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(lineage = %name, lenses = lenses.len(), "lens chain complete");
    Ok(lenses)
}

fn check_compatibility(name: &str, nodes: &[SchemaNode], lenses: &[Lens]) -> Result<()> {
    for (pair, lens) in nodes.windows(2).zip(lenses) {
        let (older, newer) = (&pair[0], &pair[1]);
        if !newer.version.is_minor_bump_from(&older.version) {
            continue;
        }

        let image = lens
            .transform(Direction::Reverse)
            .shape_image(&newer.shape)
            .unwrap_or_else(|| newer.shape.clone());

        older.shape.subsumes(&image).map_err(|mismatch| {
            LineageError::invalid(format!(
                "{name}: {} is not backward compatible with {}: after the reverse lens, {mismatch}",
                newer.version, older.version
            ))
        })?;
        debug!(
            lineage = %name,
            from = %older.version,
            to = %newer.version,
            "minor bump compatible"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::{LensOp, Lossiness};
    use crate::version::sv;
    use serde_json::json;

    fn name_shape() -> ObjectShape {
        ObjectShape::from_json(&json!({
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        }))
        .unwrap()
    }

    fn typed_shape() -> ObjectShape {
        ObjectShape::from_json(&json!({
            "properties": {
                "name": { "type": "string" },
                "type": { "type": "string", "default": "unknown" }
            },
            "required": ["name", "type"]
        }))
        .unwrap()
    }

    fn type_lens() -> Lens {
        Lens::from_ops(
            sv(0, 0),
            sv(0, 1),
            vec![LensOp::AddField { field: "type".into(), default: json!("unknown") }],
            vec![LensOp::RemoveField { field: "type".into() }],
            Lossiness::LOSSY_REVERSE,
        )
    }

    fn identity(lower: SchemaVersion, higher: SchemaVersion) -> Lens {
        Lens::from_ops(lower, higher, vec![], vec![], Lossiness::LOSSLESS)
    }

    #[test]
    fn test_assemble_two_versions() {
        let lineage = LineageBuilder::new("plugindef")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 1), typed_shape())
            .lens(type_lens())
            .build()
            .unwrap();

        assert_eq!(lineage.versions(), vec![sv(0, 0), sv(0, 1)]);
        assert_eq!(lineage.primary_version(), sv(0, 0));
        assert_eq!(lineage.latest_version(), sv(0, 1));
        assert!(lineage.checksum().is_none());
    }

    #[test]
    fn test_empty_lineage_is_invalid() {
        let err = LineageBuilder::new("empty").build().unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(_)));
    }

    #[test]
    fn test_duplicate_version() {
        let err = LineageBuilder::new("dup")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 0), name_shape())
            .build()
            .unwrap_err();
        assert!(
            matches!(err, LineageError::InvalidLineage(ref r) if r.contains("duplicate version"))
        );
    }

    #[test]
    fn test_out_of_order_version() {
        let err = LineageBuilder::new("order")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 2), name_shape())
            .schema(sv(0, 1), name_shape())
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(_)));
    }

    #[test]
    fn test_version_gap() {
        let err = LineageBuilder::new("gap")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 2), name_shape())
            .lens(identity(sv(0, 0), sv(0, 2)))
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(ref r) if r.contains("cannot follow")));
    }

    #[test]
    fn test_must_start_at_zero() {
        let err = LineageBuilder::new("late")
            .schema(sv(1, 0), name_shape())
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(_)));
    }

    #[test]
    fn test_huge_versions_are_rejected_without_overflow() {
        let decl = json!({
            "name": "huge",
            "schemas": [
                { "version": "0.18446744073709551615", "shape": {} },
                { "version": "1.0", "shape": {} }
            ]
        });
        let err = Lineage::from_slice(decl.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(ref r) if r.contains("first version")));

        let decl = json!({
            "name": "huge",
            "schemas": [
                { "version": "0.0", "shape": {} },
                { "version": "18446744073709551615.18446744073709551615", "shape": {} }
            ]
        });
        let err = Lineage::from_slice(decl.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(ref r) if r.contains("cannot follow")));
    }

    #[test]
    fn test_missing_lens() {
        let err = LineageBuilder::new("missing")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 1), name_shape())
            .schema(sv(1, 0), name_shape())
            .lens(identity(sv(0, 0), sv(0, 1)))
            .build()
            .unwrap_err();
        match err {
            LineageError::LensIncomplete { lower, higher } => {
                assert_eq!((lower, higher), (sv(0, 1), sv(1, 0)));
            }
            other => panic!("expected LensIncomplete, got {other:?}"),
        }
    }

    #[test]
    fn test_lens_to_unknown_version() {
        let err = LineageBuilder::new("unknown")
            .schema(sv(0, 0), name_shape())
            .lens(identity(sv(0, 0), sv(0, 1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(_)));
    }

    #[test]
    fn test_non_adjacent_and_backwards_lenses() {
        let base = || {
            LineageBuilder::new("adj")
                .schema(sv(0, 0), name_shape())
                .schema(sv(0, 1), name_shape())
                .schema(sv(0, 2), name_shape())
                .lens(identity(sv(0, 0), sv(0, 1)))
                .lens(identity(sv(0, 1), sv(0, 2)))
        };

        let err = base().lens(identity(sv(0, 0), sv(0, 2))).build().unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(_)));

        let err = LineageBuilder::new("backwards")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 1), name_shape())
            .lens(identity(sv(0, 1), sv(0, 0)))
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(_)));
    }

    #[test]
    fn test_duplicate_lens() {
        let err = LineageBuilder::new("twice")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 1), typed_shape())
            .lens(type_lens())
            .lens(type_lens())
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(ref r) if r.contains("duplicate lens")));
    }

    #[test]
    fn test_inconsistent_invariant() {
        let err = LineageBuilder::new("inv")
            .schema_with_invariants(
                sv(0, 0),
                name_shape(),
                vec![Invariant::Required { field: "type".into() }],
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(ref r) if r.contains("'type'")));
    }

    #[test]
    fn test_incompatible_minor_bump() {
        // 0.1 renames `name` without a reverse lens that restores it
        let renamed = ObjectShape::from_json(&json!({
            "properties": { "title": { "type": "string" } },
            "required": ["title"]
        }))
        .unwrap();

        let err = LineageBuilder::new("rename")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 1), renamed.clone())
            .lens(identity(sv(0, 0), sv(0, 1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidLineage(ref r) if r.contains("'name'")));

        // The same change is fine with a lens that renames both ways
        let lineage = LineageBuilder::new("rename")
            .schema(sv(0, 0), name_shape())
            .schema(sv(0, 1), renamed.clone())
            .lens(Lens::from_ops(
                sv(0, 0),
                sv(0, 1),
                vec![LensOp::RenameField { from: "name".into(), to: "title".into() }],
                vec![LensOp::RenameField { from: "title".into(), to: "name".into() }],
                Lossiness::LOSSLESS,
            ))
            .build();
        assert!(lineage.is_ok());

        // And as a major bump it is not checked at all
        let lineage = LineageBuilder::new("rename")
            .schema(sv(0, 0), name_shape())
            .schema(sv(1, 0), renamed)
            .lens(identity(sv(0, 0), sv(1, 0)))
            .build();
        assert!(lineage.is_ok());
    }

    #[test]
    fn test_primary_must_exist() {
        let err = LineageBuilder::new("primary")
            .schema(sv(0, 0), name_shape())
            .primary(sv(0, 5))
            .build()
            .unwrap_err();
        assert!(matches!(err, LineageError::SchemaNotExist(v) if v == sv(0, 5)));
    }

    #[test]
    fn test_schema_lookup() {
        let lineage = LineageBuilder::new("lookup")
            .schema(sv(0, 0), name_shape())
            .build()
            .unwrap();
        assert!(lineage.schema(sv(0, 0)).is_ok());
        assert!(matches!(lineage.schema(sv(3, 0)), Err(LineageError::SchemaNotExist(_))));
    }

    #[test]
    fn test_lineage_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Lineage>();
    }
}
