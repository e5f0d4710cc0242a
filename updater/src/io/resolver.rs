//! Version resolution against catalogs and the lock file.
//!
//! The [`Resolver`] trait turns a name plus constraint into a concrete
//! descriptor. [`CatalogResolver`] picks the highest matching version from
//! one or more JSON catalogs; [`LockedResolver`] answers from the lock file
//! and falls through when the locked version no longer satisfies.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use semver::Version;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::core::constraint::{Constraint, parse_version, satisfies};
use crate::core::installed::InstalledRepository;
use crate::core::types::{PluginVersion, ToolVersion};
use crate::error::UpdateError;
use crate::io::download::{Downloader, resolve_location};

/// Abstraction over version sources.
pub trait Resolver {
    /// Resolve a plugin. Failures are [`UpdateError::Resolution`].
    fn resolve_plugin_version(&self, name: &str, constraint: &str) -> Result<PluginVersion>;

    /// Resolve a tool required by `plugin`.
    fn resolve_tool_version(
        &self,
        plugin: &str,
        tool: &str,
        constraint: &str,
    ) -> Result<ToolVersion>;
}

trait Versioned {
    fn version_str(&self) -> &str;
}

impl Versioned for PluginVersion {
    fn version_str(&self) -> &str {
        &self.version
    }
}

impl Versioned for ToolVersion {
    fn version_str(&self) -> &str {
        &self.version
    }
}

/// On-disk catalog format.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
    plugins: BTreeMap<String, Vec<PluginVersion>>,
    tools: BTreeMap<String, Vec<ToolVersion>>,
}

/// Resolver over the union of one or more catalogs.
#[derive(Debug, Default)]
pub struct CatalogResolver {
    plugins: BTreeMap<String, Vec<PluginVersion>>,
    tools: BTreeMap<String, Vec<ToolVersion>>,
}

impl CatalogResolver {
    /// Fetch and merge catalogs in order. Earlier catalogs win ties.
    #[instrument(skip_all, fields(catalogs = locations.len()))]
    pub fn load(downloader: &dyn Downloader, locations: &[String]) -> Result<Self> {
        let mut resolver = Self::default();
        for location in locations {
            let bytes = downloader.fetch(location)?;
            let text = String::from_utf8(bytes)
                .with_context(|| format!("catalog {} is not UTF-8", location))?;
            resolver
                .add_catalog(location, &text)
                .with_context(|| format!("load catalog {}", location))?;
        }
        info!(
            plugins = resolver.plugins.len(),
            tools = resolver.tools.len(),
            "catalogs loaded"
        );
        Ok(resolver)
    }

    /// Parse one catalog document; relative artifact and signature locations
    /// are resolved against `location`.
    pub fn add_catalog(&mut self, location: &str, contents: &str) -> Result<()> {
        let catalog: CatalogFile = serde_json::from_str(contents).context("parse catalog json")?;
        for (name, versions) in catalog.plugins {
            let entries = self.plugins.entry(name.clone()).or_default();
            for mut version in versions {
                version.name = name.clone();
                version.artifact_path = resolve_location(location, &version.artifact_path);
                version.signature_reference = version
                    .signature_reference
                    .map(|sig| resolve_location(location, &sig));
                entries.push(version);
            }
        }
        for (name, versions) in catalog.tools {
            let entries = self.tools.entry(name.clone()).or_default();
            for mut version in versions {
                version.name = name.clone();
                version.artifact_path = version
                    .artifact_path
                    .map(|path| resolve_location(location, &path));
                version.signature_reference = version
                    .signature_reference
                    .map(|sig| resolve_location(location, &sig));
                entries.push(version);
            }
        }
        Ok(())
    }
}

impl Resolver for CatalogResolver {
    fn resolve_plugin_version(&self, name: &str, constraint: &str) -> Result<PluginVersion> {
        let subject = format!("plugin {} ({})", name, constraint);
        let candidates = self
            .plugins
            .get(name)
            .ok_or_else(|| UpdateError::resolution(&subject, "not found in any catalog"))?;
        let found = highest_matching(candidates, constraint)
            .map_err(|reason| UpdateError::resolution(&subject, reason))?;
        debug!(plugin = name, version = %found.version, "resolved plugin");
        Ok(found.clone())
    }

    fn resolve_tool_version(
        &self,
        plugin: &str,
        tool: &str,
        constraint: &str,
    ) -> Result<ToolVersion> {
        let subject = format!("tool {} ({}) required by plugin {}", tool, constraint, plugin);
        let candidates = self
            .tools
            .get(tool)
            .ok_or_else(|| UpdateError::resolution(&subject, "not found in any catalog"))?;
        let found = highest_matching(candidates, constraint)
            .map_err(|reason| UpdateError::resolution(&subject, reason))?;
        debug!(plugin, tool, version = %found.version, "resolved tool");
        Ok(found.clone())
    }
}

/// Highest version satisfying `constraint`; the first entry wins on equal
/// versions.
fn highest_matching<'a, T: Versioned>(
    candidates: &'a [T],
    constraint: &str,
) -> Result<&'a T, String> {
    let constraint = Constraint::parse(constraint)?;
    let mut best: Option<(Version, &T)> = None;
    for candidate in candidates {
        let Ok(version) = parse_version(candidate.version_str()) else {
            continue;
        };
        if !constraint.matches(&version) {
            continue;
        }
        if best.as_ref().is_none_or(|(current, _)| version > *current) {
            best = Some((version, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
        .ok_or_else(|| "no version satisfies the constraint".to_string())
}

/// Resolver answering from a lock file, falling through to `fallback` when
/// an entry is missing or no longer satisfies its constraint.
pub struct LockedResolver<'a> {
    lock: InstalledRepository,
    fallback: Option<&'a dyn Resolver>,
}

impl<'a> LockedResolver<'a> {
    pub fn new(lock: InstalledRepository, fallback: Option<&'a dyn Resolver>) -> Self {
        Self { lock, fallback }
    }
}

impl Resolver for LockedResolver<'_> {
    fn resolve_plugin_version(&self, name: &str, constraint: &str) -> Result<PluginVersion> {
        if let Some(locked) = self.lock.plugin(name)
            && satisfies(&locked.version.version, constraint)
        {
            debug!(plugin = name, version = %locked.version.version, "resolved from lock");
            return Ok(locked.version.clone());
        }
        match self.fallback {
            Some(fallback) => fallback.resolve_plugin_version(name, constraint),
            None => Err(UpdateError::resolution(
                format!("plugin {} ({})", name, constraint),
                "not locked and no catalog configured",
            )
            .into()),
        }
    }

    fn resolve_tool_version(
        &self,
        plugin: &str,
        tool: &str,
        constraint: &str,
    ) -> Result<ToolVersion> {
        if let Some(locked) = self.lock.plugin(plugin).and_then(|p| p.tool(tool))
            && satisfies(&locked.version, constraint)
        {
            debug!(plugin, tool, version = %locked.version, "resolved from lock");
            return Ok(locked.clone());
        }
        match self.fallback {
            Some(fallback) => fallback.resolve_tool_version(plugin, tool, constraint),
            None => Err(UpdateError::resolution(
                format!("tool {} ({}) required by plugin {}", tool, constraint, plugin),
                "not locked and no catalog configured",
            )
            .into()),
        }
    }
}
