//! Schema Lineage
//!
//! Versioned schema histories with bidirectional lenses between adjacent
//! versions. A lineage is declared once, assembled and checked as a whole,
//! and then used to validate instances, translate them between any two
//! versions, and bind its primary version to a Rust type.
//!
//! ## Features
//!
//! - **Strict Versioning**: `major.minor` versions with no gaps, starting at `0.0`
//! - **Lenses**: Declarative or programmatic transforms in both directions
//! - **Compatibility Checking**: Minor bumps must stay readable by the older shape
//! - **Invariants**: Field constraints checked on every validation
//! - **Type Binding**: Compile-in host types checked against the primary schema
//!
//! ## Example
//!
//! ```text
//! lineages/
//! ├── plugindef.lineage.json
//! └── core/
//!     └── dashboard.lineage.json
//! ```
//!
//! ```no_run
//! use schema_lineage::{load_lineage, sv, DirectorySource};
//! use serde_json::json;
//!
//! let source = DirectorySource::new("lineages");
//! let lineage = load_lineage(&source, "plugindef")?;
//! let translated = lineage.translate(&json!({ "name": "x" }), sv(0, 0), sv(0, 1))?;
//! println!("{}", translated.instance);
//! # Ok::<(), schema_lineage::LineageError>(())
//! ```

pub mod bind;
pub mod checksum;
pub mod config;
pub mod declaration;
pub mod error;
pub mod invariant;
pub mod lens;
pub mod lineage;
pub mod path;
pub mod schema;
pub mod source;
pub mod translate;
pub mod validate;
pub mod version;

pub use bind::{ConvergentLineage, HostField, HostType, TypeBinder, TypeBinding, TypeDescriptor};
pub use checksum::Checksum;
pub use config::{LineageConfig, OutputFormat};
pub use declaration::{LensDeclaration, LineageDeclaration, SchemaDeclaration};
pub use error::{LineageError, Result};
pub use invariant::Invariant;
pub use lens::{Direction, FnTransform, Lens, LensOp, LensTransform, Lossiness, OpChain};
pub use lineage::{Lineage, LineageBuilder, SchemaNode, TranslationPolicy};
pub use schema::{FieldDef, FieldType, ObjectShape, ShapeMismatch};
pub use source::{
    load_convergent, load_lineage, load_lineage_with, DirectorySource, EmbeddedSource,
    MemorySource, SchemaSource,
};
pub use translate::{Translation, TranslationStep};
pub use validate::{Violation, ViolationKind, Violations};
pub use version::{sv, SchemaVersion};
