//! Configuration for lineage tooling
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (lineage.toml)
//! - Environment variables (LINEAGE__*)
//!
//! ## Example config file (lineage.toml):
//! ```toml
//! [source]
//! dir = "./lineages"
//!
//! [translation]
//! validate_input = true
//! validate_output = false
//!
//! [output]
//! format = "pretty"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::lineage::TranslationPolicy;
use crate::source::DirectorySource;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageConfig {
    #[serde(default)]
    pub source: SourceConfig,

    /// Validation applied around translations
    #[serde(default)]
    pub translation: TranslationPolicy,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Where lineage declarations are read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory holding `<id>.lineage.json` files
    #[serde(default = "default_source_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

impl OutputFormat {
    pub fn render<T: Serialize>(self, value: &T) -> serde_json::Result<String> {
        match self {
            OutputFormat::Pretty => serde_json::to_string_pretty(value),
            OutputFormat::Compact => serde_json::to_string(value),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("lineages")
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: default_source_dir(),
        }
    }
}

impl LineageConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the default locations
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        for location in ["lineage.toml", ".lineage.toml", "config/lineage.toml"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("dev", "lineage", "schema-lineage") {
            let xdg_config = dirs.config_dir().join("lineage.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // LINEAGE__SOURCE__DIR, LINEAGE__TRANSLATION__VALIDATE_OUTPUT, ...
        builder = builder.add_source(
            Environment::with_prefix("LINEAGE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Source directory, resolved against the working directory
    pub fn source_dir(&self) -> PathBuf {
        if self.source.dir.is_absolute() {
            self.source.dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.source.dir)
        }
    }

    pub fn directory_source(&self) -> DirectorySource {
        DirectorySource::new(self.source_dir())
    }
}
