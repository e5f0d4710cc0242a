//! Execution of tool-level tasks.

use anyhow::Result;
use tracing::debug;

use crate::core::types::ToolVersion;
use crate::update::artifact::{ArtifactRequest, install_artifact, remove_artifact};
use crate::update::context::{UpdateContext, tool_artifact_location};

pub(crate) fn install(
    ctx: &mut UpdateContext<'_>,
    plugin: &str,
    version: &ToolVersion,
    signed: bool,
) -> Result<()> {
    let Some(url) = version.artifact_path.as_deref() else {
        debug!(plugin, tool = %version.name, "tool has no artifact, registering only");
        return ctx.register_tool(plugin, version.relocated(None, None), version.clone());
    };

    let location = tool_artifact_location(plugin, version, url);
    let signature = install_artifact(
        ctx,
        &ArtifactRequest {
            subject: format!("tool {} {} (plugin {})", version.name, version.version, plugin),
            url,
            signature_url: version.signature_reference.as_deref(),
            hash: version.hash.as_ref(),
            signed,
            location: location.clone(),
        },
    )?;
    ctx.register_tool(
        plugin,
        version.relocated(Some(location), signature),
        version.clone(),
    )
}

pub(crate) fn upgrade(
    ctx: &mut UpdateContext<'_>,
    plugin: &str,
    version: &ToolVersion,
    old: &ToolVersion,
    signed: bool,
) -> Result<()> {
    remove(ctx, old)?;
    install(ctx, plugin, version, signed)
}

pub(crate) fn keep(
    ctx: &mut UpdateContext<'_>,
    plugin: &str,
    installed: &ToolVersion,
    resolved: &ToolVersion,
) -> Result<()> {
    debug!(plugin, tool = %installed.name, "keeping tool");
    ctx.register_tool(plugin, installed.clone(), resolved.clone())
}

/// Delete the tool artifact and signature, if it has any.
pub(crate) fn remove(ctx: &mut UpdateContext<'_>, version: &ToolVersion) -> Result<()> {
    match version.artifact_path.as_deref() {
        Some(location) => remove_artifact(ctx, location, version.signature_reference.as_deref()),
        None => Ok(()),
    }
}
