//! Lineage declaration format
//!
//! The raw, serializable form of a lineage as produced by a schema source:
//!
//! ```json
//! {
//!   "format": "1.0.0",
//!   "name": "plugindef",
//!   "schemas": [
//!     {
//!       "version": "0.0",
//!       "shape": { "properties": { "name": { "type": "string" } }, "required": ["name"] }
//!     },
//!     {
//!       "version": "0.1",
//!       "shape": {
//!         "properties": { "name": { "type": "string" }, "type": { "type": "string" } }
//!       }
//!     }
//!   ],
//!   "lenses": [
//!     {
//!       "from": "0.0", "to": "0.1",
//!       "forward": [ { "op": "add_field", "field": "type", "default": "unknown" } ],
//!       "reverse": [ { "op": "remove_field", "field": "type" } ],
//!       "lossy": { "reverse": true }
//!     }
//!   ]
//! }
//! ```

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{LineageError, Result};
use crate::invariant::Invariant;
use crate::lens::{LensOp, Lossiness};
use crate::schema::ObjectShape;
use crate::version::SchemaVersion;

/// Declaration format versions this crate understands
pub const SUPPORTED_FORMAT: &str = "^1";

fn default_format() -> Version {
    Version::new(1, 0, 0)
}

/// A complete lineage declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageDeclaration {
    /// Version of the declaration format itself
    #[serde(default = "default_format")]
    pub format: Version,
    /// Name of the data shape this lineage describes
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The version bound to host types; defaults to the first version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<SchemaVersion>,
    /// Schema versions in ascending order
    pub schemas: Vec<SchemaDeclaration>,
    #[serde(default)]
    pub lenses: Vec<LensDeclaration>,
}

/// One schema version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDeclaration {
    pub version: SchemaVersion,
    pub shape: ObjectShape,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invariants: Vec<Invariant>,
}

/// One lens between adjacent versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LensDeclaration {
    /// The lower version
    pub from: SchemaVersion,
    /// The version directly after `from`
    pub to: SchemaVersion,
    #[serde(default)]
    pub forward: Vec<LensOp>,
    #[serde(default)]
    pub reverse: Vec<LensOp>,
    #[serde(default)]
    pub lossy: Lossiness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LineageDeclaration {
    /// Parse a declaration from raw JSON bytes and check its format version
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let decl: LineageDeclaration = serde_json::from_slice(bytes)?;
        decl.check_format()?;
        Ok(decl)
    }

    /// Reject declarations written for an incompatible format
    pub fn check_format(&self) -> Result<()> {
        let supported = VersionReq::parse(SUPPORTED_FORMAT)?;
        if supported.matches(&self.format) {
            Ok(())
        } else {
            Err(LineageError::UnsupportedFormat {
                found: self.format.to_string(),
                expected: SUPPORTED_FORMAT.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::sv;

    const MINIMAL: &str = r#"{
        "name": "thing",
        "schemas": [
            { "version": "0.0", "shape": { "properties": { "a": { "type": "string" } } } }
        ]
    }"#;

    #[test]
    fn test_defaults() {
        let decl = LineageDeclaration::from_slice(MINIMAL.as_bytes()).unwrap();
        assert_eq!(decl.format, Version::new(1, 0, 0));
        assert!(decl.primary.is_none());
        assert!(decl.lenses.is_empty());
        assert_eq!(decl.schemas[0].version, sv(0, 0));
    }

    #[test]
    fn test_unsupported_format() {
        let raw = MINIMAL.replacen('{', r#"{ "format": "2.0.0","#, 1);
        let err = LineageDeclaration::from_slice(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, LineageError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_bad_shape_is_a_json_error() {
        let raw = MINIMAL.replace(r#""type": "string""#, r#""type": "text""#);
        let err = LineageDeclaration::from_slice(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, LineageError::Json(_)));
    }

    #[test]
    fn test_lens_declaration() {
        let lens: LensDeclaration = serde_json::from_str(
            r#"{ "from": "0.0", "to": "0.1",
                 "forward": [ { "op": "add_field", "field": "t", "default": "x" } ],
                 "lossy": { "reverse": true } }"#,
        )
        .unwrap();
        assert_eq!(lens.forward.len(), 1);
        assert!(lens.reverse.is_empty());
        assert_eq!(lens.lossy, Lossiness::LOSSY_REVERSE);
    }
}
