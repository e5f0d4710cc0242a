//! Load/save helpers for the installed-state and lock files.
//!
//! Both files hold an [`InstalledRepository`]. Loading validates the JSON
//! against the embedded schema before deserializing; writing is atomic.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::installed::InstalledRepository;
use crate::io::filesystem::Filesystem;

const REPOSITORY_SCHEMA: &str = include_str!("../../schemas/repository.v1.schema.json");

/// Load a repository file. A missing file is an empty repository.
pub fn load_repository(path: &Path) -> Result<InstalledRepository> {
    debug!(path = %path.display(), "loading repository");
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "repository file missing, starting empty");
            return Ok(InstalledRepository::new());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read repository {}", path.display()));
        }
    };
    parse_repository(&contents).with_context(|| format!("load repository {}", path.display()))
}

/// Parse and validate repository JSON.
pub fn parse_repository(contents: &str) -> Result<InstalledRepository> {
    let value: Value = serde_json::from_str(contents).context("parse repository json")?;
    validate_schema(&value)?;
    let repository: InstalledRepository =
        serde_json::from_value(value).context("deserialize repository")?;
    debug!(plugins = repository.len(), "repository loaded");
    Ok(repository)
}

/// Atomically write a repository as pretty JSON with a trailing newline.
pub fn write_repository(path: &Path, repository: &InstalledRepository) -> Result<()> {
    debug!(path = %path.display(), plugins = repository.len(), "writing repository");
    let mut buf = serde_json::to_string_pretty(repository).context("serialize repository")?;
    buf.push('\n');
    Filesystem.write_atomic(path, buf.as_bytes())
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(REPOSITORY_SCHEMA).context("parse repository schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    if !messages.is_empty() {
        return Err(anyhow!(
            "repository schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
