//! Update calculation: resolve desired plugins and diff them against the
//! installed repository.

use std::path::PathBuf;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use tracing::{debug, info, instrument};

use crate::core::diff::{
    DependencyState, ResolvedTool, diff_dependencies, diff_plugin, diff_removals, diff_tools,
    merge_dependency_requirements,
};
use crate::core::installed::InstalledRepository;
use crate::core::task::Task;
use crate::core::types::{DesiredConfig, DesiredPlugin, PluginVersion, is_valid_name};
use crate::error::UpdateError;
use crate::io::dependency_manager::{DependencyLayout, DependencyManagerRunner, same_requirements};
use crate::io::filesystem::Filesystem;
use crate::io::resolver::Resolver;

pub struct UpdateCalculator<'a> {
    installed: &'a InstalledRepository,
    lock: Option<&'a InstalledRepository>,
    resolver: &'a dyn Resolver,
    dependency_manager: &'a dyn DependencyManagerRunner,
    layout: DependencyLayout,
    install_root: PathBuf,
    fs: Filesystem,
}

impl<'a> UpdateCalculator<'a> {
    pub fn new(
        installed: &'a InstalledRepository,
        resolver: &'a dyn Resolver,
        dependency_manager: &'a dyn DependencyManagerRunner,
        layout: DependencyLayout,
        install_root: PathBuf,
    ) -> Self {
        Self {
            installed,
            lock: None,
            resolver,
            dependency_manager,
            layout,
            install_root,
            fs: Filesystem,
        }
    }

    /// Use dependency lock blobs from `lock` when installing dependencies of
    /// a plugin at its locked version.
    pub fn with_lock(mut self, lock: &'a InstalledRepository) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Ordered task list turning the installed state into `desired`.
    ///
    /// Plugins are processed in input order; for each one the plugin task is
    /// followed by its tool tasks and at most one dependency task. Removals
    /// of undesired plugins come last. Any resolution failure aborts the
    /// whole calculation.
    #[instrument(skip(self, desired), fields(plugins = desired.len()))]
    pub fn calculate(&self, desired: &DesiredConfig, force_reinstall: bool) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for (name, plugin) in desired {
            tasks.extend(self.plugin_tasks(name, plugin, force_reinstall)?);
        }
        tasks.extend(diff_removals(desired, self.installed));

        info!(
            tasks = tasks.len(),
            changes = tasks.iter().filter(|task| !task.is_keep()).count(),
            "update calculated"
        );
        Ok(tasks)
    }

    fn plugin_tasks(&self, name: &str, desired: &DesiredPlugin, force: bool) -> Result<Vec<Task>> {
        let mut resolved = self.resolver.resolve_plugin_version(name, &desired.version)?;
        resolved.name = name.to_string();
        debug!(plugin = name, version = %resolved.version, "plugin resolved");

        let installed = self.installed.plugin(name);
        let mut tasks = vec![diff_plugin(&resolved, desired, installed, force)];

        let tools = self.resolve_tools(&resolved, desired)?;
        tasks.extend(diff_tools(name, &tools, installed, force));

        let requirements = merge_dependency_requirements(&resolved, &tools);
        let state = self.dependency_state(name, &requirements)?;
        let previous_lock = self.previous_dependency_lock(&resolved);
        tasks.extend(diff_dependencies(name, &requirements, state, previous_lock));
        Ok(tasks)
    }

    /// Resolve every tool the plugin declares, applying config overrides.
    fn resolve_tools(&self, plugin: &PluginVersion, desired: &DesiredPlugin) -> Result<Vec<ResolvedTool>> {
        let mut tools = Vec::with_capacity(plugin.requirements.tool.len());
        for (tool, requirement) in &plugin.requirements.tool {
            if !is_valid_name(tool) {
                return Err(UpdateError::resolution(
                    format!("tool '{}' of plugin {}", tool, plugin.name),
                    "tool name is not a valid directory name",
                )
                .into());
            }
            let overrides = desired.tools.get(tool);
            let constraint = overrides
                .and_then(|o| o.version.clone())
                .unwrap_or_else(|| requirement.constraint.clone());
            let signed = overrides
                .and_then(|o| o.signed)
                .unwrap_or(requirement.signed);

            let mut version = self
                .resolver
                .resolve_tool_version(&plugin.name, tool, &constraint)?;
            version.name = tool.clone();
            debug!(plugin = %plugin.name, tool = %tool, version = %version.version, "tool resolved");
            tools.push(ResolvedTool {
                version,
                constraint,
                signed,
            });
        }
        Ok(tools)
    }

    /// Probe the plugin directory for an existing dependency installation.
    fn dependency_state(
        &self,
        plugin: &str,
        requirements: &IndexMap<String, String>,
    ) -> Result<DependencyState> {
        let dir = self.install_root.join(plugin);
        let on_disk = self
            .layout
            .read_requirements(&self.fs, &dir)
            .with_context(|| format!("inspect dependencies of plugin {}", plugin))?;

        let Some(on_disk) = on_disk else {
            if requirements.is_empty() && self.layout.is_present(&self.fs, &dir) {
                return Ok(DependencyState::Stale);
            }
            return Ok(DependencyState::Absent);
        };
        if requirements.is_empty() || !same_requirements(&on_disk, requirements) {
            return Ok(DependencyState::Stale);
        }
        let update_required = self
            .dependency_manager
            .is_update_required(&dir)
            .map_err(|err| UpdateError::dependency_manager(plugin, format!("{:#}", err)))?;
        Ok(DependencyState::Current { update_required })
    }

    fn previous_dependency_lock(&self, resolved: &PluginVersion) -> Option<&'a str> {
        self.lock?
            .plugin(&resolved.name)
            .filter(|locked| locked.version.version == resolved.version)
            .and_then(|locked| locked.dependency_lock.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::installed::InstalledPlugin;
    use crate::core::types::{Hash, HashType, ToolOverride, ToolRequirement};
    use crate::test_support::{
        ScriptedDependencyManager, ScriptedResolver, plugin_version, tool_version,
    };

    fn desired(pairs: &[(&str, &str)]) -> DesiredConfig {
        pairs
            .iter()
            .map(|(name, constraint)| (name.to_string(), DesiredPlugin::new(*constraint, true)))
            .collect()
    }

    fn calculate(
        installed: &InstalledRepository,
        resolver: &ScriptedResolver,
        manager: &ScriptedDependencyManager,
        root: &std::path::Path,
        desired: &DesiredConfig,
    ) -> Vec<Task> {
        UpdateCalculator::new(
            installed,
            resolver,
            manager,
            DependencyLayout::default(),
            root.to_path_buf(),
        )
        .calculate(desired, false)
        .expect("calculate")
    }

    /// Install order is plugin, then tools, then dependencies.
    #[test]
    fn fresh_install_emits_plugin_tools_and_dependencies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut foo = plugin_version("foo", "1.0.0");
        foo.requirements
            .tool
            .insert("bar".to_string(), ToolRequirement::new("^2.0", true));
        foo.requirements
            .dependency
            .insert("vendor/lib".to_string(), "^1.0".to_string());
        let resolver = ScriptedResolver::default()
            .with_plugin(foo)
            .with_tool(tool_version("bar", "2.3.0"));
        let manager = ScriptedDependencyManager::default();

        let tasks = calculate(
            &InstalledRepository::new(),
            &resolver,
            &manager,
            temp.path(),
            &desired(&[("foo", "^1.0.0")]),
        );
        assert_eq!(tasks.len(), 3);
        assert!(matches!(tasks[0], Task::InstallPlugin { signed: true, .. }));
        assert!(matches!(&tasks[1], Task::InstallTool { version, .. } if version.version == "2.3.0"));
        assert!(
            matches!(&tasks[2], Task::InstallDependencies { requirements, lock: None, .. } if requirements["vendor/lib"] == "^1.0")
        );
    }

    #[test]
    fn resolution_failure_aborts_calculation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolver = ScriptedResolver::default().with_plugin(plugin_version("foo", "1.0.0"));
        let manager = ScriptedDependencyManager::default();
        let err = UpdateCalculator::new(
            &InstalledRepository::new(),
            &resolver,
            &manager,
            DependencyLayout::default(),
            temp.path().to_path_buf(),
        )
        .calculate(&desired(&[("foo", "^1.0"), ("missing", "*")]), false)
        .expect_err("missing plugin");
        assert!(matches!(
            crate::error::classify(&err),
            Some(UpdateError::Resolution { .. })
        ));
    }

    #[test]
    fn tool_overrides_replace_constraint_and_signed_flag() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut foo = plugin_version("foo", "1.0.0");
        foo.requirements
            .tool
            .insert("bar".to_string(), ToolRequirement::new("^2.0", true));
        let resolver = ScriptedResolver::default()
            .with_plugin(foo)
            .with_tool(tool_version("bar", "3.1.0"));
        let manager = ScriptedDependencyManager::default();
        let mut config = desired(&[("foo", "*")]);
        config.get_mut("foo").expect("foo").tools.insert(
            "bar".to_string(),
            ToolOverride {
                version: Some("^3.0".to_string()),
                signed: Some(false),
            },
        );

        let tasks = calculate(&InstalledRepository::new(), &resolver, &manager, temp.path(), &config);
        assert!(matches!(
            &tasks[1],
            Task::InstallTool { version, signed: false, .. } if version.version == "3.1.0"
        ));
    }

    #[test]
    fn matching_manifest_asks_the_dependency_manager() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut foo = plugin_version("foo", "1.0.0");
        foo.hash = Some(Hash::new(HashType::Sha256, "aa"));
        foo.requirements
            .dependency
            .insert("vendor/lib".to_string(), "^1.0".to_string());
        let layout = DependencyLayout::default();
        layout
            .write_manifest(
                &Filesystem,
                &temp.path().join("foo"),
                "foo",
                &foo.requirements.dependency,
            )
            .expect("manifest");

        let mut installed = InstalledRepository::new();
        installed
            .add_plugin(InstalledPlugin::new(foo.clone()))
            .expect("add");
        let resolver = ScriptedResolver::default().with_plugin(foo);

        let idle = ScriptedDependencyManager::default();
        let tasks = calculate(&installed, &resolver, &idle, temp.path(), &desired(&[("foo", "^1.0")]));
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].is_keep());

        let outdated = ScriptedDependencyManager::default().requiring_update();
        let tasks = calculate(&installed, &resolver, &outdated, temp.path(), &desired(&[("foo", "^1.0")]));
        assert!(matches!(tasks[1], Task::UpdateDependencies { .. }));
    }

    #[test]
    fn leftover_manifest_without_requirements_is_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = DependencyLayout::default();
        let mut old = IndexMap::new();
        old.insert("vendor/lib".to_string(), "^1.0".to_string());
        layout
            .write_manifest(&Filesystem, &temp.path().join("foo"), "foo", &old)
            .expect("manifest");
        let resolver = ScriptedResolver::default().with_plugin(plugin_version("foo", "1.0.0"));
        let manager = ScriptedDependencyManager::default();

        let tasks = calculate(
            &InstalledRepository::new(),
            &resolver,
            &manager,
            temp.path(),
            &desired(&[("foo", "*")]),
        );
        assert!(matches!(tasks.last(), Some(Task::RemoveDependencies { plugin }) if plugin == "foo"));
    }

    #[test]
    fn locked_dependency_blob_is_reused_for_the_locked_version() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut foo = plugin_version("foo", "1.0.0");
        foo.requirements
            .dependency
            .insert("vendor/lib".to_string(), "^1.0".to_string());
        let mut lock = InstalledRepository::new();
        lock.add_plugin(
            InstalledPlugin::new(foo.clone()).with_dependency_lock(Some("{\"packages\":[]}".to_string())),
        )
        .expect("add");
        let resolver = ScriptedResolver::default().with_plugin(foo);
        let manager = ScriptedDependencyManager::default();
        let installed = InstalledRepository::new();

        let tasks = UpdateCalculator::new(
            &installed,
            &resolver,
            &manager,
            DependencyLayout::default(),
            temp.path().to_path_buf(),
        )
        .with_lock(&lock)
        .calculate(&desired(&[("foo", "^1.0")]), true)
        .expect("calculate");
        assert!(matches!(
            &tasks[1],
            Task::InstallDependencies { lock: Some(blob), .. } if blob == "{\"packages\":[]}"
        ));
    }

    #[test]
    fn force_reinstall_upgrades_plugin_and_every_required_tool() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut foo = plugin_version("foo", "1.0.0");
        foo.hash = Some(Hash::new(HashType::Sha256, "aa"));
        for tool in ["bar", "baz"] {
            foo.requirements
                .tool
                .insert(tool.to_string(), ToolRequirement::new("*", true));
        }
        let mut old = InstalledPlugin::new(foo.clone());
        old.add_tool(tool_version("bar", "2.0.0")).expect("bar");
        old.add_tool(tool_version("baz", "1.0.0")).expect("baz");
        let mut installed = InstalledRepository::new();
        installed.add_plugin(old).expect("add");
        let resolver = ScriptedResolver::default()
            .with_plugin(foo)
            .with_tool(tool_version("bar", "2.0.0"))
            .with_tool(tool_version("baz", "1.0.0"));
        let manager = ScriptedDependencyManager::default();
        let calculator = UpdateCalculator::new(
            &installed,
            &resolver,
            &manager,
            DependencyLayout::default(),
            temp.path().to_path_buf(),
        );
        let config = desired(&[("foo", "^1.0")]);

        let unforced = calculator.calculate(&config, false).expect("calculate");
        assert!(unforced.iter().all(Task::is_keep));

        let forced = calculator.calculate(&config, true).expect("calculate");
        assert_eq!(forced.len(), 3);
        assert!(matches!(forced[0], Task::UpgradePlugin { .. }));
        let upgraded: Vec<&str> = forced[1..]
            .iter()
            .filter_map(|task| match task {
                Task::UpgradeTool { version, .. } => Some(version.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(upgraded, ["bar", "baz"]);
    }

    #[test]
    fn tool_names_that_are_not_directory_names_fail_resolution() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut foo = plugin_version("foo", "1.0.0");
        foo.requirements
            .tool
            .insert("../../escaped".to_string(), ToolRequirement::new("*", false));
        let resolver = ScriptedResolver::default()
            .with_plugin(foo)
            .with_tool(tool_version("../../escaped", "1.0.0"));
        let manager = ScriptedDependencyManager::default();
        let err = UpdateCalculator::new(
            &InstalledRepository::new(),
            &resolver,
            &manager,
            DependencyLayout::default(),
            temp.path().to_path_buf(),
        )
        .calculate(&desired(&[("foo", "*")]), false)
        .expect_err("invalid tool name");
        assert!(matches!(
            crate::error::classify(&err),
            Some(UpdateError::Resolution { .. })
        ));
    }
}
