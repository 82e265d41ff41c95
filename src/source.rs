//! Schema sources
//!
//! A [`SchemaSource`] supplies raw lineage declaration bytes by identifier.
//! Sources are passed explicitly to the loaders; nothing is read from global
//! state. Declarations are stored as `<id>.lineage.json`, where `id` may
//! contain `/` to address nested directories.

use include_dir::Dir;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

use crate::bind::{ConvergentLineage, HostType, TypeBinder};
use crate::error::{LineageError, Result};
use crate::lineage::{Lineage, TranslationPolicy};

/// File suffix of lineage declarations
pub const LINEAGE_SUFFIX: &str = ".lineage.json";

/// Provides raw lineage declarations by identifier
pub trait SchemaSource {
    /// Human-readable description for diagnostics
    fn describe(&self) -> String;

    /// Raw declaration bytes for a lineage
    fn load(&self, id: &str) -> Result<Vec<u8>>;

    /// Identifiers of all lineages this source provides, sorted
    fn list(&self) -> Result<Vec<String>>;
}

fn file_name(id: &str) -> String {
    format!("{id}{LINEAGE_SUFFIX}")
}

/// Ids are relative `/`-separated names; `.`, `..`, empty and absolute
/// segments would escape or alias the source root.
fn check_id(id: &str) -> Result<()> {
    let relative = !id.is_empty()
        && id.split('/').all(|seg| !matches!(seg, "" | ".") && !seg.contains('\\'))
        && Path::new(id).components().all(|c| matches!(c, Component::Normal(_)));
    if relative {
        Ok(())
    } else {
        Err(LineageError::InvalidFormat(format!("invalid lineage id '{id}'")))
    }
}

fn id_from_relative(path: &Path) -> Option<String> {
    let relative = path.to_str()?.replace('\\', "/");
    relative.strip_suffix(LINEAGE_SUFFIX).map(String::from)
}

/// Lineage declarations in a filesystem directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SchemaSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    fn load(&self, id: &str) -> Result<Vec<u8>> {
        check_id(id)?;
        let path = self.root.join(file_name(id));
        if !path.is_file() {
            return Err(LineageError::SourceNotFound {
                id: id.to_string(),
                source_name: self.describe(),
            });
        }
        debug!(path = %path.display(), "reading lineage declaration");
        Ok(fs::read(&path)?)
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter() {
            let entry = entry.map_err(|e| LineageError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(id) = entry
                .path()
                .strip_prefix(&self.root)
                .ok()
                .and_then(id_from_relative)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Lineage declarations compiled into the binary with `include_dir!`
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    dir: &'static Dir<'static>,
}

impl EmbeddedSource {
    pub const fn new(dir: &'static Dir<'static>) -> Self {
        Self { dir }
    }
}

fn collect_embedded(dir: &Dir<'_>, ids: &mut Vec<String>) {
    for file in dir.files() {
        if let Some(id) = id_from_relative(file.path()) {
            ids.push(id);
        }
    }
    for sub in dir.dirs() {
        collect_embedded(sub, ids);
    }
}

impl SchemaSource for EmbeddedSource {
    fn describe(&self) -> String {
        "embedded bundle".to_string()
    }

    fn load(&self, id: &str) -> Result<Vec<u8>> {
        self.dir
            .get_file(file_name(id))
            .map(|file| file.contents().to_vec())
            .ok_or_else(|| LineageError::SourceNotFound {
                id: id.to_string(),
                source_name: self.describe(),
            })
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        collect_embedded(self.dir, &mut ids);
        ids.sort();
        Ok(ids)
    }
}

/// Lineage declarations held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    declarations: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(id, bytes);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.declarations.insert(id.into(), bytes.into());
    }
}

impl SchemaSource for MemorySource {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn load(&self, id: &str) -> Result<Vec<u8>> {
        self.declarations
            .get(id)
            .cloned()
            .ok_or_else(|| LineageError::SourceNotFound {
                id: id.to_string(),
                source_name: self.describe(),
            })
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.declarations.keys().cloned().collect())
    }
}

/// Load and assemble a lineage from a source
pub fn load_lineage(source: &dyn SchemaSource, id: &str) -> Result<Lineage> {
    let bytes = source.load(id)?;
    Lineage::from_slice(&bytes)
}

/// Load a lineage with an explicit translation policy
pub fn load_lineage_with(
    source: &dyn SchemaSource,
    id: &str,
    policy: TranslationPolicy,
) -> Result<Lineage> {
    Ok(load_lineage(source, id)?.with_policy(policy))
}

/// Load a lineage and bind its primary schema to `T`
pub fn load_convergent<T: HostType>(
    source: &dyn SchemaSource,
    id: &str,
) -> Result<ConvergentLineage<T>> {
    let lineage = load_lineage(source, id)?;
    TypeBinder::new().bind::<T>(Arc::new(lineage))
}
