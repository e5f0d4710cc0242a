//! Planned units of update work.
//!
//! A [`Task`] is created once by the calculator and consumed once by the
//! executor. Each variant carries exactly the data its execution needs.

use indexmap::IndexMap;

use crate::core::constraint::parse_version;
use crate::core::installed::InstalledPlugin;
use crate::core::types::{PluginVersion, ToolVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    InstallPlugin {
        version: PluginVersion,
        signed: bool,
    },
    /// Replace `old` by `version`; the old artifact is deleted first.
    UpgradePlugin {
        version: PluginVersion,
        old: InstalledPlugin,
        signed: bool,
    },
    /// Re-register `installed` as-is; `resolved` feeds the lock file.
    KeepPlugin {
        installed: InstalledPlugin,
        resolved: PluginVersion,
    },
    RemovePlugin {
        version: PluginVersion,
    },
    InstallTool {
        plugin: String,
        version: ToolVersion,
        signed: bool,
    },
    UpgradeTool {
        plugin: String,
        version: ToolVersion,
        old: ToolVersion,
        signed: bool,
    },
    KeepTool {
        plugin: String,
        installed: ToolVersion,
        resolved: ToolVersion,
    },
    RemoveTool {
        plugin: String,
        version: ToolVersion,
    },
    /// Synthesize the manifest and install. `lock` is a previously captured
    /// lock blob to install from, if any.
    InstallDependencies {
        plugin: String,
        requirements: IndexMap<String, String>,
        lock: Option<String>,
    },
    UpdateDependencies {
        plugin: String,
        requirements: IndexMap<String, String>,
    },
    RemoveDependencies {
        plugin: String,
    },
}

impl Task {
    /// Name of the plugin this task belongs to.
    pub fn plugin_name(&self) -> &str {
        match self {
            Task::InstallPlugin { version, .. }
            | Task::UpgradePlugin { version, .. }
            | Task::RemovePlugin { version } => &version.name,
            Task::KeepPlugin { installed, .. } => installed.name(),
            Task::InstallTool { plugin, .. }
            | Task::UpgradeTool { plugin, .. }
            | Task::KeepTool { plugin, .. }
            | Task::RemoveTool { plugin, .. }
            | Task::InstallDependencies { plugin, .. }
            | Task::UpdateDependencies { plugin, .. }
            | Task::RemoveDependencies { plugin } => plugin,
        }
    }

    /// True for tasks that leave the installed tree untouched.
    pub fn is_keep(&self) -> bool {
        matches!(self, Task::KeepPlugin { .. } | Task::KeepTool { .. })
    }

    /// What the task will do, for plans and dry runs.
    pub fn purpose_description(&self) -> String {
        match self {
            Task::InstallPlugin { version, .. } => format!(
                "will install plugin {} in version {}",
                version.name, version.version
            ),
            Task::UpgradePlugin { version, old, .. } => format!(
                "will {} plugin {} from version {} to version {}",
                Direction::of(&old.version.version, &version.version).verb(),
                version.name,
                old.version.version,
                version.version
            ),
            Task::KeepPlugin { installed, .. } => format!(
                "will keep plugin {} in version {}",
                installed.name(),
                installed.version.version
            ),
            Task::RemovePlugin { version } => format!(
                "will remove plugin {} version {}",
                version.name, version.version
            ),
            Task::InstallTool {
                plugin, version, ..
            } => format!(
                "will install tool {} in version {} (plugin {})",
                version.name, version.version, plugin
            ),
            Task::UpgradeTool {
                plugin,
                version,
                old,
                ..
            } => format!(
                "will {} tool {} from version {} to version {} (plugin {})",
                Direction::of(&old.version, &version.version).verb(),
                version.name,
                old.version,
                version.version,
                plugin
            ),
            Task::KeepTool {
                plugin, installed, ..
            } => format!(
                "will keep tool {} in version {} (plugin {})",
                installed.name, installed.version, plugin
            ),
            Task::RemoveTool { plugin, version } => format!(
                "will remove tool {} version {} (plugin {})",
                version.name, version.version, plugin
            ),
            Task::InstallDependencies {
                plugin,
                requirements,
                ..
            } => format!(
                "will install {} dependencies of plugin {}",
                requirements.len(),
                plugin
            ),
            Task::UpdateDependencies {
                plugin,
                requirements,
            } => format!(
                "will update {} dependencies of plugin {}",
                requirements.len(),
                plugin
            ),
            Task::RemoveDependencies { plugin } => {
                format!("will remove dependencies of plugin {}", plugin)
            }
        }
    }

    /// What the task is doing, printed while it executes.
    pub fn progress_description(&self) -> String {
        match self {
            Task::InstallPlugin { version, .. } => format!(
                "Installing plugin {} version {}",
                version.name, version.version
            ),
            Task::UpgradePlugin { version, old, .. } => format!(
                "{} plugin {} from version {} to version {}",
                Direction::of(&old.version.version, &version.version).progressive(),
                version.name,
                old.version.version,
                version.version
            ),
            Task::KeepPlugin { installed, .. } => format!(
                "Keeping plugin {} version {}",
                installed.name(),
                installed.version.version
            ),
            Task::RemovePlugin { version } => format!(
                "Removing plugin {} version {}",
                version.name, version.version
            ),
            Task::InstallTool {
                plugin, version, ..
            } => format!(
                "Installing tool {} version {} for plugin {}",
                version.name, version.version, plugin
            ),
            Task::UpgradeTool {
                plugin,
                version,
                old,
                ..
            } => format!(
                "{} tool {} from version {} to version {} for plugin {}",
                Direction::of(&old.version, &version.version).progressive(),
                version.name,
                old.version,
                version.version,
                plugin
            ),
            Task::KeepTool {
                plugin, installed, ..
            } => format!(
                "Keeping tool {} version {} for plugin {}",
                installed.name, installed.version, plugin
            ),
            Task::RemoveTool { plugin, version } => format!(
                "Removing tool {} version {} from plugin {}",
                version.name, version.version, plugin
            ),
            Task::InstallDependencies { plugin, .. } => {
                format!("Installing dependencies of plugin {}", plugin)
            }
            Task::UpdateDependencies { plugin, .. } => {
                format!("Updating dependencies of plugin {}", plugin)
            }
            Task::RemoveDependencies { plugin } => {
                format!("Removing dependencies of plugin {}", plugin)
            }
        }
    }
}

/// Whether a replacement moves to a higher or a lower version. Same-version
/// reinstalls and unparseable versions count as upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    fn of(old: &str, new: &str) -> Self {
        match (parse_version(old), parse_version(new)) {
            (Ok(old), Ok(new)) if new < old => Direction::Downgrade,
            _ => Direction::Upgrade,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Direction::Upgrade => "upgrade",
            Direction::Downgrade => "downgrade",
        }
    }

    fn progressive(self) -> &'static str {
        match self {
            Direction::Upgrade => "Upgrading",
            Direction::Downgrade => "Downgrading",
        }
    }
}
