//! Updater configuration stored in `.updater.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::constraint::Constraint;
use crate::core::types::{DesiredConfig, DesiredPlugin, is_valid_name};
use crate::io::dependency_manager::DependencyLayout;

pub const DEFAULT_CONFIG_FILE: &str = ".updater.toml";

/// Updater configuration (TOML).
///
/// Meant to be edited by humans. Missing fields default to values that work
/// for a composer-based project with plugins under `.updater/plugins`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Catalog locations (URL or path), consulted in order.
    pub repositories: Vec<String>,

    /// Where plugin directories live. Relative paths are taken from the project root.
    pub install_root: PathBuf,
    pub installed_path: PathBuf,
    pub lock_path: PathBuf,

    /// Download cache for remote artifacts and catalogs.
    pub cache_dir: Option<PathBuf>,

    /// Keys that may be imported when a signature names an unknown key.
    /// Empty allows any key.
    pub trusted_keys: Vec<String>,

    pub gpg: GpgConfig,
    pub download: DownloadConfig,
    pub dependency_manager: DependencyManagerConfig,

    /// Desired plugins, in declaration order.
    pub plugins: IndexMap<String, DesiredPlugin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GpgConfig {
    pub binary: PathBuf,
    pub keyserver: String,
    pub timeout_secs: u64,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gpg"),
            keyserver: "hkps://keys.openpgp.org".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DependencyManagerConfig {
    /// Program and leading arguments (e.g. `["composer"]`).
    pub command: Vec<String>,
    pub manifest: String,
    pub lock: String,
    pub vendor_dir: String,
    pub timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for DependencyManagerConfig {
    fn default() -> Self {
        let layout = DependencyLayout::default();
        Self {
            command: vec!["composer".to_string()],
            manifest: layout.manifest,
            lock: layout.lock,
            vendor_dir: layout.vendor_dir,
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl DependencyManagerConfig {
    pub fn layout(&self) -> DependencyLayout {
        DependencyLayout {
            manifest: self.manifest.clone(),
            lock: self.lock.clone(),
            vendor_dir: self.vendor_dir.clone(),
        }
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            install_root: PathBuf::from(".updater/plugins"),
            installed_path: PathBuf::from(".updater/installed.json"),
            lock_path: PathBuf::from(".updater.lock"),
            cache_dir: None,
            trusted_keys: Vec::new(),
            gpg: GpgConfig::default(),
            download: DownloadConfig::default(),
            dependency_manager: DependencyManagerConfig::default(),
            plugins: IndexMap::new(),
        }
    }
}

impl UpdaterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gpg.timeout_secs == 0 {
            return Err(anyhow!("gpg.timeout_secs must be > 0"));
        }
        if self.download.timeout_secs == 0 {
            return Err(anyhow!("download.timeout_secs must be > 0"));
        }
        let dm = &self.dependency_manager;
        if dm.command.is_empty() || dm.command[0].trim().is_empty() {
            return Err(anyhow!("dependency_manager.command must be a non-empty array"));
        }
        if dm.timeout_secs == 0 {
            return Err(anyhow!("dependency_manager.timeout_secs must be > 0"));
        }
        if dm.output_limit_bytes == 0 {
            return Err(anyhow!("dependency_manager.output_limit_bytes must be > 0"));
        }
        for (field, value) in [
            ("manifest", &dm.manifest),
            ("lock", &dm.lock),
            ("vendor_dir", &dm.vendor_dir),
        ] {
            if !is_plain_name(value) {
                return Err(anyhow!(
                    "dependency_manager.{} must be a plain file name, got '{}'",
                    field,
                    value
                ));
            }
        }
        for (name, plugin) in &self.plugins {
            if !is_valid_name(name) {
                return Err(anyhow!("plugin name '{}' is not a valid directory name", name));
            }
            Constraint::parse(&plugin.version)
                .map_err(|err| anyhow!("plugins.{}.version: {}", name, err))?;
            for (tool, tool_override) in &plugin.tools {
                if !is_valid_name(tool) {
                    return Err(anyhow!("tool name '{}' of plugin {} is invalid", tool, name));
                }
                if let Some(version) = &tool_override.version {
                    Constraint::parse(version)
                        .map_err(|err| anyhow!("plugins.{}.tools.{}.version: {}", name, tool, err))?;
                }
            }
        }
        Ok(())
    }

    pub fn desired(&self) -> DesiredConfig {
        self.plugins.clone()
    }

    /// Resolve every configured path against `root`.
    pub fn paths(&self, root: &Path) -> UpdaterPaths {
        let install_root = root.join(&self.install_root);
        UpdaterPaths {
            gnupg_home: install_root.join(".gnupg"),
            install_root,
            installed_path: root.join(&self.installed_path),
            lock_path: root.join(&self.lock_path),
            cache_dir: self.cache_dir.as_ref().map(|dir| root.join(dir)),
        }
    }

    pub fn gpg_timeout(&self) -> Duration {
        Duration::from_secs(self.gpg.timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download.timeout_secs)
    }

    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_manager.timeout_secs)
    }
}

fn is_plain_name(value: &str) -> bool {
    !value.trim().is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
}

/// Absolute locations derived from a config and a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterPaths {
    pub install_root: PathBuf,
    pub installed_path: PathBuf,
    pub lock_path: PathBuf,
    pub cache_dir: Option<PathBuf>,
    /// Private keyring used for signature checks.
    pub gnupg_home: PathBuf,
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `UpdaterConfig::default()`.
pub fn load_config(path: &Path) -> Result<UpdaterConfig> {
    if !path.exists() {
        let cfg = UpdaterConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: UpdaterConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
