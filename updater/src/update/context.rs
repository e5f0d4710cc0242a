//! Capability bag shared by every task during one execution run.

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::installed::{InstalledPlugin, InstalledRepository};
use crate::core::types::ToolVersion;
use crate::error::UpdateError;
use crate::io::dependency_manager::{DependencyLayout, DependencyManagerRunner};
use crate::io::download::Downloader;
use crate::io::filesystem::Filesystem;
use crate::io::signature::SignatureVerifier;

/// Collaborators plus the two repositories being rebuilt.
///
/// `installed` and `lock` start empty; each task re-adds what should exist
/// after the run. Tasks reach the filesystem, network, gpg and the
/// dependency manager only through this struct.
pub struct UpdateContext<'a> {
    pub install_root: PathBuf,
    pub fs: Filesystem,
    pub downloader: &'a dyn Downloader,
    pub verifier: &'a dyn SignatureVerifier,
    pub dependency_manager: &'a dyn DependencyManagerRunner,
    pub layout: DependencyLayout,
    pub installed: InstalledRepository,
    pub lock: InstalledRepository,
}

impl<'a> UpdateContext<'a> {
    pub fn new(
        install_root: PathBuf,
        downloader: &'a dyn Downloader,
        verifier: &'a dyn SignatureVerifier,
        dependency_manager: &'a dyn DependencyManagerRunner,
        layout: DependencyLayout,
    ) -> Self {
        Self {
            install_root,
            fs: Filesystem,
            downloader,
            verifier,
            dependency_manager,
            layout,
            installed: InstalledRepository::new(),
            lock: InstalledRepository::new(),
        }
    }

    pub fn plugin_dir(&self, plugin: &str) -> Result<PathBuf> {
        self.resolve(plugin)
    }

    /// Absolute path of a location stored relative to the install root.
    /// Locations that could leave the install root are rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        let contained = path.components().next().is_some()
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !contained {
            return Err(UpdateError::filesystem(
                self.install_root.join(path),
                "location escapes the install root",
            )
            .into());
        }
        Ok(self.install_root.join(path))
    }

    /// Register a plugin in both repositories.
    pub fn register_plugin(&mut self, installed: InstalledPlugin, locked: InstalledPlugin) -> Result<()> {
        self.installed.add_plugin(installed).map_err(|err| anyhow!(err))?;
        self.lock.add_plugin(locked).map_err(|err| anyhow!(err))?;
        Ok(())
    }

    /// Register a tool under an already registered plugin.
    pub fn register_tool(&mut self, plugin: &str, installed: ToolVersion, locked: ToolVersion) -> Result<()> {
        self.installed
            .plugin_mut(plugin)
            .ok_or_else(|| anyhow!("tool {} registered before plugin {}", installed.name, plugin))?
            .add_tool(installed)
            .map_err(|err| anyhow!(err))?;
        self.lock
            .plugin_mut(plugin)
            .ok_or_else(|| anyhow!("tool {} registered before plugin {} in lock", locked.name, plugin))?
            .add_tool(locked)
            .map_err(|err| anyhow!(err))?;
        Ok(())
    }

    /// Record the dependency-manager lock blob of a registered plugin.
    pub fn set_dependency_lock(&mut self, plugin: &str, blob: Option<String>) -> Result<()> {
        for repository in [&mut self.installed, &mut self.lock] {
            let entry = repository
                .plugin_mut(plugin)
                .ok_or_else(|| anyhow!("dependencies handled before plugin {}", plugin))?;
            entry.dependency_lock = blob.clone();
        }
        Ok(())
    }
}

/// Install-root relative location of a plugin artifact.
pub fn plugin_artifact_location(plugin: &str, remote: &str) -> String {
    format!("{}/plugin.{}", plugin, artifact_extension(remote))
}

/// Install-root relative location of a tool artifact.
pub fn tool_artifact_location(plugin: &str, tool: &ToolVersion, remote: &str) -> String {
    format!(
        "{}/tools/{}~{}.{}",
        plugin,
        tool.name,
        tool.version,
        artifact_extension(remote)
    )
}

pub fn signature_location(artifact: &str) -> String {
    format!("{}.asc", artifact)
}

/// File extension of the last path segment of a URL or path, `bin` if none.
pub fn artifact_extension(location: &str) -> &str {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => "bin",
    }
}
