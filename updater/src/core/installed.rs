//! Installed-state repository.
//!
//! The repository is the aggregate root of everything that is installed:
//! plugins keyed by name, and per plugin the tools keyed by name. The same
//! shape is used for the lock file, where artifact locations are remote.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{PluginVersion, ToolVersion};

/// A plugin present on disk together with its installed tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    #[serde(flatten)]
    pub version: PluginVersion,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolVersion>,
    /// Opaque lock blob produced by the dependency manager.
    #[serde(default)]
    pub dependency_lock: Option<String>,
    /// Built-in plugins are never removed.
    #[serde(default, skip_serializing_if = "is_false")]
    pub built_in: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl InstalledPlugin {
    pub fn new(version: PluginVersion) -> Self {
        Self {
            version,
            tools: BTreeMap::new(),
            dependency_lock: None,
            built_in: false,
        }
    }

    pub fn built_in(version: PluginVersion) -> Self {
        Self {
            built_in: true,
            ..Self::new(version)
        }
    }

    pub fn with_dependency_lock(mut self, lock: Option<String>) -> Self {
        self.dependency_lock = lock;
        self
    }

    pub fn name(&self) -> &str {
        &self.version.name
    }

    pub fn is_built_in(&self) -> bool {
        self.built_in
    }

    pub fn tool(&self, name: &str) -> Option<&ToolVersion> {
        self.tools.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Register a tool. A tool name appears at most once per plugin.
    pub fn add_tool(&mut self, tool: ToolVersion) -> Result<(), String> {
        if self.tools.contains_key(&tool.name) {
            return Err(format!(
                "tool '{}' already registered for plugin '{}'",
                tool.name, self.version.name
            ));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }
}

/// Name-unique mapping of installed plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, InstalledPlugin>", into = "BTreeMap<String, InstalledPlugin>")]
pub struct InstalledRepository {
    plugins: BTreeMap<String, InstalledPlugin>,
}

impl From<BTreeMap<String, InstalledPlugin>> for InstalledRepository {
    /// Names are not serialized inside entries; restore them from the keys.
    fn from(mut plugins: BTreeMap<String, InstalledPlugin>) -> Self {
        for (name, plugin) in &mut plugins {
            plugin.version.name = name.clone();
            for (tool_name, tool) in &mut plugin.tools {
                tool.name = tool_name.clone();
            }
        }
        Self { plugins }
    }
}

impl From<InstalledRepository> for BTreeMap<String, InstalledPlugin> {
    fn from(repository: InstalledRepository) -> Self {
        repository.plugins
    }
}

impl InstalledRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. A plugin name appears at most once.
    pub fn add_plugin(&mut self, plugin: InstalledPlugin) -> Result<(), String> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(format!("plugin '{}' already registered", name));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn plugin(&self, name: &str) -> Option<&InstalledPlugin> {
        self.plugins.get(name)
    }

    pub fn plugin_mut(&mut self, name: &str) -> Option<&mut InstalledPlugin> {
        self.plugins.get_mut(name)
    }

    /// Plugins in name order.
    pub fn plugins(&self) -> impl Iterator<Item = &InstalledPlugin> {
        self.plugins.values()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{plugin_version, tool_version};

    #[test]
    fn add_plugin_rejects_duplicate_names() {
        let mut repo = InstalledRepository::new();
        repo.add_plugin(InstalledPlugin::new(plugin_version("foo", "1.0.0")))
            .expect("first add");
        let err = repo
            .add_plugin(InstalledPlugin::new(plugin_version("foo", "2.0.0")))
            .expect_err("duplicate");
        assert!(err.contains("foo"));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn add_tool_rejects_duplicate_names() {
        let mut plugin = InstalledPlugin::new(plugin_version("foo", "1.0.0"));
        plugin.add_tool(tool_version("bar", "1.0.0")).expect("add");
        assert!(plugin.add_tool(tool_version("bar", "2.0.0")).is_err());
        assert_eq!(plugin.tool("bar").expect("tool").version, "1.0.0");
    }

    #[test]
    fn deserialize_restores_names_from_keys() {
        let mut plugin = InstalledPlugin::built_in(plugin_version("foo", "1.0.0"));
        plugin.add_tool(tool_version("bar", "0.3.0")).expect("add");
        let mut repo = InstalledRepository::new();
        repo.add_plugin(plugin).expect("add");

        let json = serde_json::to_string(&repo).expect("serialize");
        assert!(!json.contains("\"name\""));
        let loaded: InstalledRepository = serde_json::from_str(&json).expect("parse");

        let foo = loaded.plugin("foo").expect("foo");
        assert_eq!(foo.name(), "foo");
        assert!(foo.is_built_in());
        assert_eq!(foo.tool("bar").expect("bar").name, "bar");
        assert_eq!(loaded, repo);
    }

    #[test]
    fn built_in_flag_is_omitted_when_false() {
        let mut repo = InstalledRepository::new();
        repo.add_plugin(InstalledPlugin::new(plugin_version("foo", "1.0.0")))
            .expect("add");
        let json = serde_json::to_string(&repo).expect("serialize");
        assert!(!json.contains("builtIn"));
        assert!(json.contains("\"dependencyLock\":null"));
    }
}
