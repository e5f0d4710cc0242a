//! Execution of dependency-manager tasks.

use anyhow::Result;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::error::UpdateError;
use crate::update::context::UpdateContext;

/// Write the manifest, seed the previous lock blob if any, and install.
pub(crate) fn install(
    ctx: &mut UpdateContext<'_>,
    plugin: &str,
    requirements: &IndexMap<String, String>,
    lock: Option<&str>,
) -> Result<()> {
    let dir = ctx.plugin_dir(plugin)?;
    ctx.layout.write_manifest(&ctx.fs, &dir, plugin, requirements)?;
    if let Some(blob) = lock {
        debug!(plugin, "installing from previous lock");
        ctx.layout.write_lock(&ctx.fs, &dir, blob)?;
    }
    ctx.dependency_manager
        .install(&dir)
        .map_err(|err| UpdateError::dependency_manager(plugin, format!("{:#}", err)))?;
    capture_lock(ctx, plugin)
}

pub(crate) fn update(
    ctx: &mut UpdateContext<'_>,
    plugin: &str,
    requirements: &IndexMap<String, String>,
) -> Result<()> {
    let dir = ctx.plugin_dir(plugin)?;
    ctx.layout.write_manifest(&ctx.fs, &dir, plugin, requirements)?;
    ctx.dependency_manager
        .update(&dir)
        .map_err(|err| UpdateError::dependency_manager(plugin, format!("{:#}", err)))?;
    capture_lock(ctx, plugin)
}

/// Delete manifest, lock and vendor directory and forget the lock blob.
pub(crate) fn remove(ctx: &mut UpdateContext<'_>, plugin: &str) -> Result<()> {
    let dir = ctx.plugin_dir(plugin)?;
    ctx.layout.remove(&ctx.fs, &dir)?;
    ctx.set_dependency_lock(plugin, None)
}

fn capture_lock(ctx: &mut UpdateContext<'_>, plugin: &str) -> Result<()> {
    let dir = ctx.plugin_dir(plugin)?;
    let blob = ctx.layout.read_lock(&ctx.fs, &dir)?;
    info!(plugin, captured = blob.is_some(), "dependency lock");
    ctx.set_dependency_lock(plugin, blob)
}
