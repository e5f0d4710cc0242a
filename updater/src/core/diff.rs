//! Diff rules turning resolved versions plus installed state into tasks.
//!
//! Each function covers one level of the plugin -> tools -> dependencies
//! recursion and is free of I/O; the calculator resolves versions and probes
//! the dependency manifest before calling in here.

use indexmap::IndexMap;

use crate::core::constraint::satisfies;
use crate::core::installed::{InstalledPlugin, InstalledRepository};
use crate::core::task::Task;
use crate::core::types::{DesiredConfig, DesiredPlugin, PluginVersion, ToolVersion};

/// A declared tool requirement after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub version: ToolVersion,
    pub constraint: String,
    pub signed: bool,
}

/// What is on disk for a plugin's dependency manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// No manifest present.
    Absent,
    /// A manifest is present but declares a different requirement set.
    Stale,
    /// The manifest matches; `update_required` is the dry-run verdict.
    Current { update_required: bool },
}

/// Upgrade rule for plugins.
///
/// A missing hash on either side counts as changed, so a plugin without a
/// declared hash is reinstalled on every run.
pub fn plugin_needs_upgrade(
    installed: &PluginVersion,
    desired: &PluginVersion,
    constraint: &str,
    force: bool,
) -> bool {
    if force || !satisfies(&installed.version, constraint) {
        return true;
    }
    match (&installed.hash, &desired.hash) {
        (Some(old), Some(new)) => !old.matches(new),
        _ => true,
    }
}

/// Upgrade rule for tools.
///
/// Unlike plugins, a desired tool without a hash is kept when its version
/// still satisfies the constraint (native tools never carry one).
pub fn tool_needs_upgrade(
    installed: &ToolVersion,
    desired: &ToolVersion,
    constraint: &str,
    force: bool,
) -> bool {
    if force || !satisfies(&installed.version, constraint) {
        return true;
    }
    match &desired.hash {
        None => false,
        Some(new) => installed.hash.as_ref().is_none_or(|old| !old.matches(new)),
    }
}

/// Plugin-level task for one desired plugin.
pub fn diff_plugin(
    resolved: &PluginVersion,
    desired: &DesiredPlugin,
    installed: Option<&InstalledPlugin>,
    force: bool,
) -> Task {
    match installed {
        None => Task::InstallPlugin {
            version: resolved.clone(),
            signed: desired.signed,
        },
        Some(old) if plugin_needs_upgrade(&old.version, resolved, &desired.version, force) => {
            Task::UpgradePlugin {
                version: resolved.clone(),
                old: old.clone(),
                signed: desired.signed,
            }
        }
        Some(old) => Task::KeepPlugin {
            installed: old.clone(),
            resolved: resolved.clone(),
        },
    }
}

/// Tool-level tasks for one plugin: install/upgrade/keep per requirement,
/// then removal of installed tools that are no longer required.
pub fn diff_tools(
    plugin: &str,
    resolved: &[ResolvedTool],
    installed: Option<&InstalledPlugin>,
    force: bool,
) -> Vec<Task> {
    let mut tasks = Vec::new();

    for tool in resolved {
        let name = &tool.version.name;
        let task = match installed.and_then(|p| p.tool(name)) {
            None => Task::InstallTool {
                plugin: plugin.to_string(),
                version: tool.version.clone(),
                signed: tool.signed,
            },
            Some(old) if tool_needs_upgrade(old, &tool.version, &tool.constraint, force) => {
                Task::UpgradeTool {
                    plugin: plugin.to_string(),
                    version: tool.version.clone(),
                    old: old.clone(),
                    signed: tool.signed,
                }
            }
            Some(old) => Task::KeepTool {
                plugin: plugin.to_string(),
                installed: old.clone(),
                resolved: tool.version.clone(),
            },
        };
        tasks.push(task);
    }

    if let Some(installed) = installed {
        for old in installed.tools.values() {
            if !resolved.iter().any(|tool| tool.version.name == old.name) {
                tasks.push(Task::RemoveTool {
                    plugin: plugin.to_string(),
                    version: old.clone(),
                });
            }
        }
    }

    tasks
}

/// Combined dependency-manager requirements of a plugin and its tools.
///
/// Plugin declarations come first and win over tool declarations of the same
/// package.
pub fn merge_dependency_requirements(
    plugin: &PluginVersion,
    tools: &[ResolvedTool],
) -> IndexMap<String, String> {
    let mut merged = plugin.requirements.dependency.clone();
    for tool in tools {
        for (package, constraint) in &tool.version.requirements.dependency {
            merged
                .entry(package.clone())
                .or_insert_with(|| constraint.clone());
        }
    }
    merged
}

/// Dependency-level task for one plugin, if any.
pub fn diff_dependencies(
    plugin: &str,
    requirements: &IndexMap<String, String>,
    state: DependencyState,
    previous_lock: Option<&str>,
) -> Option<Task> {
    if requirements.is_empty() {
        return match state {
            DependencyState::Absent => None,
            _ => Some(Task::RemoveDependencies {
                plugin: plugin.to_string(),
            }),
        };
    }

    match state {
        DependencyState::Absent => Some(Task::InstallDependencies {
            plugin: plugin.to_string(),
            requirements: requirements.clone(),
            lock: previous_lock.map(str::to_string),
        }),
        DependencyState::Stale
        | DependencyState::Current {
            update_required: true,
        } => Some(Task::UpdateDependencies {
            plugin: plugin.to_string(),
            requirements: requirements.clone(),
        }),
        DependencyState::Current {
            update_required: false,
        } => None,
    }
}

/// Final pass: remove installed plugins that are no longer desired.
///
/// Built-in plugins are never removed; they are carried over with keep tasks
/// so that they survive the rebuild of the installed repository.
pub fn diff_removals(desired: &DesiredConfig, installed: &InstalledRepository) -> Vec<Task> {
    let mut tasks = Vec::new();
    for plugin in installed.plugins() {
        if desired.contains_key(plugin.name()) {
            continue;
        }
        if plugin.is_built_in() {
            tasks.push(Task::KeepPlugin {
                installed: plugin.clone(),
                resolved: plugin.version.clone(),
            });
            for tool in plugin.tools.values() {
                tasks.push(Task::KeepTool {
                    plugin: plugin.name().to_string(),
                    installed: tool.clone(),
                    resolved: tool.clone(),
                });
            }
            continue;
        }
        tasks.push(Task::RemovePlugin {
            version: plugin.version.clone(),
        });
    }
    tasks
}
