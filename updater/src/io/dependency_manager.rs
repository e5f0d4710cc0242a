//! Adapter for the external dependency manager (composer by default).
//!
//! Each plugin directory doubles as a dependency-manager project: the update
//! engine synthesizes a manifest from the merged requirements, the runner
//! installs into the vendor directory, and the lock file it produces is
//! captured as the plugin's dependency-lock blob.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::io::filesystem::Filesystem;
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

static OPERATIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)operations:\s*(\d+)\s+installs?,\s*(\d+)\s+updates?,\s*(\d+)\s+removals?")
        .expect("operations regex is valid")
});

/// Abstraction over dependency managers. `dir` is a plugin directory that
/// already holds a manifest.
pub trait DependencyManagerRunner {
    fn install(&self, dir: &Path) -> Result<()>;
    fn update(&self, dir: &Path) -> Result<()>;
    /// Dry-run check whether `update` would change anything.
    fn is_update_required(&self, dir: &Path) -> Result<bool>;
}

/// Runner invoking a composer-compatible command line.
#[derive(Debug, Clone)]
pub struct CommandDependencyManager {
    /// Program and leading arguments, e.g. `["composer"]` or `["php", "composer.phar"]`.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandDependencyManager {
    fn run(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("dependency manager command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(leading).args(args).current_dir(dir);
        debug!(dir = %dir.display(), ?args, "running dependency manager");
        run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {} {}", program, args.join(" ")))
    }
}

impl DependencyManagerRunner for CommandDependencyManager {
    #[instrument(skip(self), fields(dir = %dir.display()))]
    fn install(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["install", "--no-interaction"])?
            .ensure_success("dependency install")
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    fn update(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["update", "--no-interaction"])?
            .ensure_success("dependency update")
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    fn is_update_required(&self, dir: &Path) -> Result<bool> {
        let output = self.run(dir, &["update", "--dry-run", "--no-interaction"])?;
        output.ensure_success("dependency update --dry-run")?;
        let required = dry_run_reports_changes(&output.combined_text());
        debug!(required, "dependency dry-run finished");
        Ok(required)
    }
}

/// True if dry-run output announces at least one install, update or removal.
pub fn dry_run_reports_changes(output: &str) -> bool {
    OPERATIONS.captures_iter(output).any(|caps| {
        (1..=3).any(|idx| {
            caps.get(idx)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .is_some_and(|count| count > 0)
        })
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    require: IndexMap<String, String>,
}

/// File names of a dependency-manager project inside a plugin directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyLayout {
    pub manifest: String,
    pub lock: String,
    pub vendor_dir: String,
}

impl Default for DependencyLayout {
    fn default() -> Self {
        Self {
            manifest: "composer.json".to_string(),
            lock: "composer.lock".to_string(),
            vendor_dir: "vendor".to_string(),
        }
    }
}

impl DependencyLayout {
    pub fn manifest_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.manifest)
    }

    pub fn lock_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.lock)
    }

    pub fn vendor_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.vendor_dir)
    }

    /// Whether anything of a dependency installation is left in `dir`.
    pub fn is_present(&self, fs: &Filesystem, dir: &Path) -> bool {
        fs.exists(&self.manifest_path(dir)) || fs.exists(&self.vendor_path(dir))
    }

    /// Write the synthesized manifest for `plugin`.
    pub fn write_manifest(
        &self,
        fs: &Filesystem,
        dir: &Path,
        plugin: &str,
        requirements: &IndexMap<String, String>,
    ) -> Result<()> {
        let manifest = Manifest {
            name: format!("{}/dependencies", plugin),
            description: format!("Dependencies of plugin {}", plugin),
            require: requirements.clone(),
        };
        let mut buf = serde_json::to_string_pretty(&manifest).context("serialize manifest")?;
        buf.push('\n');
        let path = self.manifest_path(dir);
        info!(plugin, path = %path.display(), packages = requirements.len(), "writing manifest");
        fs.write(&path, buf.as_bytes())
    }

    /// Requirements declared by the manifest on disk, `None` if there is none.
    pub fn read_requirements(
        &self,
        fs: &Filesystem,
        dir: &Path,
    ) -> Result<Option<IndexMap<String, String>>> {
        let path = self.manifest_path(dir);
        let Some(contents) = fs.read_to_string_opt(&path)? else {
            return Ok(None);
        };
        let manifest: Manifest = serde_json::from_str(&contents)
            .with_context(|| format!("parse manifest {}", path.display()))?;
        Ok(Some(manifest.require))
    }

    pub fn read_lock(&self, fs: &Filesystem, dir: &Path) -> Result<Option<String>> {
        fs.read_to_string_opt(&self.lock_path(dir))
    }

    pub fn write_lock(&self, fs: &Filesystem, dir: &Path, blob: &str) -> Result<()> {
        fs.write(&self.lock_path(dir), blob.as_bytes())
    }

    /// Delete manifest, lock file and vendor directory.
    pub fn remove(&self, fs: &Filesystem, dir: &Path) -> Result<()> {
        fs.remove_file(&self.manifest_path(dir))?;
        fs.remove_file(&self.lock_path(dir))?;
        fs.remove_dir_all(&self.vendor_path(dir))
    }
}

/// Same packages with the same constraints, declaration order ignored.
pub fn same_requirements(a: &IndexMap<String, String>, b: &IndexMap<String, String>) -> bool {
    let a: BTreeMap<_, _> = a.iter().collect();
    let b: BTreeMap<_, _> = b.iter().collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn dry_run_output_is_classified() {
        assert!(dry_run_reports_changes(
            "Loading composer repositories\nPackage operations: 0 installs, 1 update, 0 removals\n"
        ));
        assert!(dry_run_reports_changes(
            "Lock file operations: 2 installs, 0 updates, 0 removals"
        ));
        assert!(!dry_run_reports_changes(
            "Package operations: 0 installs, 0 updates, 0 removals"
        ));
        assert!(!dry_run_reports_changes("Nothing to install, update or remove"));
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = DependencyLayout::default();
        let fs = Filesystem;
        let reqs = requirements(&[("vendor/lib", "^1.2"), ("other/pkg", "~2.0")]);

        assert_eq!(layout.read_requirements(&fs, temp.path()).expect("read"), None);
        layout
            .write_manifest(&fs, temp.path(), "foo", &reqs)
            .expect("write");
        let raw = std::fs::read_to_string(layout.manifest_path(temp.path())).expect("raw");
        assert!(raw.contains("\"name\": \"foo/dependencies\""));

        let read = layout
            .read_requirements(&fs, temp.path())
            .expect("read")
            .expect("present");
        assert_eq!(read, reqs);
        assert!(layout.is_present(&fs, temp.path()));
    }

    #[test]
    fn remove_clears_manifest_lock_and_vendor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = DependencyLayout::default();
        let fs = Filesystem;
        layout
            .write_manifest(&fs, temp.path(), "foo", &requirements(&[("a/b", "*")]))
            .expect("manifest");
        layout.write_lock(&fs, temp.path(), "{}").expect("lock");
        fs.write(&layout.vendor_path(temp.path()).join("autoload.php"), b"<?php")
            .expect("vendor");

        layout.remove(&fs, temp.path()).expect("remove");
        assert!(!layout.is_present(&fs, temp.path()));
        assert!(!layout.lock_path(temp.path()).exists());
    }

    #[test]
    fn requirement_sets_compare_without_order() {
        let a = requirements(&[("a/b", "^1"), ("c/d", "^2")]);
        let b = requirements(&[("c/d", "^2"), ("a/b", "^1")]);
        let c = requirements(&[("a/b", "^1"), ("c/d", "^3")]);
        assert!(same_requirements(&a, &b));
        assert!(!same_requirements(&a, &c));
    }

    #[cfg(unix)]
    #[test]
    fn command_runner_reports_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandDependencyManager {
            command: vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()],
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1024,
        };
        let err = runner.install(temp.path()).expect_err("failing command");
        assert!(format!("{err:#}").contains("dependency install"));
    }

    #[cfg(unix)]
    #[test]
    fn command_runner_reads_dry_run_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandDependencyManager {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'Package operations: 1 install, 0 updates, 0 removals'".to_string(),
            ],
            timeout: Duration::from_secs(5),
            output_limit_bytes: 1024,
        };
        assert!(runner.is_update_required(temp.path()).expect("dry run"));
    }
}
