//! Orchestration of an update run: calculation, per-task execution and
//! persistence of the resulting repositories.

pub mod artifact;
pub mod calculator;
pub mod context;
mod dependencies;
pub mod executor;
mod plugin;
mod tool;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::task::Task;
use crate::update::context::UpdateContext;

impl Task {
    /// Perform this task against `ctx`.
    #[instrument(skip_all, fields(plugin = self.plugin_name()))]
    pub fn execute(&self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        info!("{}", self.progress_description());
        let result = match self {
            Task::InstallPlugin { version, signed } => plugin::install(ctx, version, *signed, None),
            Task::UpgradePlugin {
                version,
                old,
                signed,
            } => plugin::upgrade(ctx, version, old, *signed),
            Task::KeepPlugin {
                installed,
                resolved,
            } => plugin::keep(ctx, installed, resolved),
            Task::RemovePlugin { version } => plugin::remove(ctx, version),
            Task::InstallTool {
                plugin,
                version,
                signed,
            } => tool::install(ctx, plugin, version, *signed),
            Task::UpgradeTool {
                plugin,
                version,
                old,
                signed,
            } => tool::upgrade(ctx, plugin, version, old, *signed),
            Task::KeepTool {
                plugin,
                installed,
                resolved,
            } => tool::keep(ctx, plugin, installed, resolved),
            Task::RemoveTool { version, .. } => tool::remove(ctx, version),
            Task::InstallDependencies {
                plugin,
                requirements,
                lock,
            } => dependencies::install(ctx, plugin, requirements, lock.as_deref()),
            Task::UpdateDependencies {
                plugin,
                requirements,
            } => dependencies::update(ctx, plugin, requirements),
            Task::RemoveDependencies { plugin } => dependencies::remove(ctx, plugin),
        };
        result.with_context(|| self.progress_description())
    }
}
