//! Execution of plugin-level tasks.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::debug;

use crate::core::installed::InstalledPlugin;
use crate::core::types::PluginVersion;
use crate::update::artifact::{ArtifactRequest, install_artifact, remove_artifact};
use crate::update::context::{UpdateContext, plugin_artifact_location};

/// Download and register a plugin. `carried` supplies the built-in flag and
/// dependency lock of the plugin being replaced, if any.
pub(crate) fn install(
    ctx: &mut UpdateContext<'_>,
    version: &PluginVersion,
    signed: bool,
    carried: Option<&InstalledPlugin>,
) -> Result<()> {
    let location = plugin_artifact_location(&version.name, &version.artifact_path);
    let signature = install_artifact(
        ctx,
        &ArtifactRequest {
            subject: format!("plugin {} {}", version.name, version.version),
            url: &version.artifact_path,
            signature_url: version.signature_reference.as_deref(),
            hash: version.hash.as_ref(),
            signed,
            location: location.clone(),
        },
    )?;

    let built_in = carried.is_some_and(InstalledPlugin::is_built_in);
    let dependency_lock = carried.and_then(|old| old.dependency_lock.clone());

    let mut installed = InstalledPlugin::new(version.relocated(location, signature))
        .with_dependency_lock(dependency_lock.clone());
    installed.built_in = built_in;
    let mut locked = InstalledPlugin::new(version.clone()).with_dependency_lock(dependency_lock);
    locked.built_in = built_in;
    ctx.register_plugin(installed, locked)
}

/// Delete the old artifact and signature, then install the new version.
pub(crate) fn upgrade(
    ctx: &mut UpdateContext<'_>,
    version: &PluginVersion,
    old: &InstalledPlugin,
    signed: bool,
) -> Result<()> {
    remove_artifact(
        ctx,
        &old.version.artifact_path,
        old.version.signature_reference.as_deref(),
    )?;
    install(ctx, version, signed, Some(old))
}

/// Re-register an installed plugin unchanged; its tools are re-added by their
/// own tasks.
pub(crate) fn keep(
    ctx: &mut UpdateContext<'_>,
    installed: &InstalledPlugin,
    resolved: &PluginVersion,
) -> Result<()> {
    debug!(plugin = installed.name(), "keeping plugin");
    let kept = InstalledPlugin {
        tools: BTreeMap::new(),
        ..installed.clone()
    };
    let mut locked = InstalledPlugin::new(resolved.clone())
        .with_dependency_lock(installed.dependency_lock.clone());
    locked.built_in = installed.is_built_in();
    ctx.register_plugin(kept, locked)
}

/// Delete the plugin directory. Absence from the new repository is the removal.
pub(crate) fn remove(ctx: &mut UpdateContext<'_>, version: &PluginVersion) -> Result<()> {
    let dir = ctx.plugin_dir(&version.name)?;
    ctx.fs.remove_dir_all(&dir)
}
