//! Schema Lineage CLI
//!
//! Checks lineage declarations and validates or translates instances.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use schema_lineage::{
    load_lineage_with, Checksum, Lineage, LineageConfig, LineageError, SchemaSource, SchemaVersion,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-lineage")]
#[command(about = "Check schema lineages and translate instances between versions")]
struct Cli {
    /// Directory holding lineage declarations (overrides config)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Explicit config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit compact JSON
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a lineage and report whether it is well formed
    Check {
        /// Lineage identifier
        id: String,
        /// Fail unless the declaration has this checksum
        #[arg(long)]
        expect: Option<Checksum>,
    },

    /// List the versions of a lineage
    Versions {
        id: String,
    },

    /// Validate an instance file against one version
    Validate {
        id: String,
        /// Version to validate against (defaults to the primary version)
        #[arg(short, long)]
        version: Option<SchemaVersion>,
        /// Instance JSON file
        file: PathBuf,
    },

    /// Translate an instance file between versions
    Translate {
        id: String,
        #[arg(short, long)]
        from: SchemaVersion,
        /// Target version (defaults to the primary version)
        #[arg(short, long)]
        to: Option<SchemaVersion>,
        file: PathBuf,
    },

    /// List all lineages in the source directory
    List,
}

#[derive(Serialize)]
struct CheckReport<'a> {
    lineage: &'a str,
    status: &'static str,
    versions: Vec<String>,
    primary: Option<String>,
    checksum: Option<String>,
    error: Option<String>,
    code: Option<&'static str>,
    checked_at: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn read_instance(path: &Path) -> anyhow::Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// Returns whether the command succeeded
fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config =
        LineageConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.dir {
        config.source.dir = dir;
    }
    if cli.compact {
        config.output.format = schema_lineage::OutputFormat::Compact;
    }

    let source = config.directory_source();
    debug!(source = %source.describe(), "using lineage source");
    let load = |id: &str| -> schema_lineage::Result<Lineage> {
        load_lineage_with(&source, id, config.translation)
    };
    let format = config.output.format;

    match cli.command {
        Commands::Check { id, expect } => {
            let report = match load(&id) {
                Ok(lineage) => {
                    let pinned = expect.filter(|e| lineage.checksum() != Some(e));
                    CheckReport {
                        lineage: &id,
                        status: if pinned.is_some() { "changed" } else { "ok" },
                        versions: lineage.versions().iter().map(ToString::to_string).collect(),
                        primary: Some(lineage.primary_version().to_string()),
                        checksum: lineage.checksum().map(|c| c.to_string()),
                        error: pinned.map(|e| {
                            format!("declaration checksum differs from pinned {}", e.short())
                        }),
                        code: None,
                        checked_at: Utc::now().to_rfc3339(),
                    }
                }
                Err(e @ LineageError::SourceNotFound { .. }) => return Err(e.into()),
                Err(e) => CheckReport {
                    lineage: &id,
                    status: "invalid",
                    versions: Vec::new(),
                    primary: None,
                    checksum: None,
                    error: Some(e.to_string()),
                    code: Some(e.code()),
                    checked_at: Utc::now().to_rfc3339(),
                },
            };
            println!("{}", format.render(&report)?);
            Ok(report.error.is_none())
        }

        Commands::Versions { id } => {
            let lineage = load(&id)?;
            let versions: Vec<Value> = lineage
                .schemas()
                .iter()
                .map(|node| {
                    let fields: Vec<&str> =
                        node.shape().fields.iter().map(|f| f.name.as_str()).collect();
                    let invariants: Vec<String> =
                        node.invariants().map(|i| i.to_string()).collect();
                    json!({
                        "version": node.version().to_string(),
                        "primary": node.version() == lineage.primary_version(),
                        "fields": fields,
                        "invariants": invariants,
                    })
                })
                .collect();
            println!("{}", format.render(&versions)?);
            Ok(true)
        }

        Commands::Validate { id, version, file } => {
            let lineage = load(&id)?;
            let version = version.unwrap_or_else(|| lineage.primary_version());
            let instance = read_instance(&file)?;
            let violations = lineage.violations(&instance, version)?;
            let valid = violations.is_empty();
            let report = json!({
                "lineage": id,
                "version": version.to_string(),
                "valid": valid,
                "violations": violations,
            });
            println!("{}", format.render(&report)?);
            Ok(valid)
        }

        Commands::Translate { id, from, to, file } => {
            let lineage = load(&id)?;
            let to = to.unwrap_or_else(|| lineage.primary_version());
            let instance = read_instance(&file)?;
            let translation = match lineage.translate(&instance, from, to) {
                Ok(t) => t,
                Err(LineageError::SchemaInvalid(violations)) => {
                    eprintln!("{violations}");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };
            if translation.is_lossy() {
                eprintln!("warning: translation {from} -> {to} may have dropped data");
            }
            println!("{}", format.render(&translation.instance)?);
            Ok(true)
        }

        Commands::List => {
            if !source.root().exists() {
                bail!("lineage directory {} does not exist", source.root().display());
            }
            let ids = source.list()?;
            println!("{}", format.render(&ids)?);
            Ok(true)
        }
    }
}
