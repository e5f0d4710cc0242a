//! Sequential task execution and persistence of the new repositories.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::installed::InstalledRepository;
use crate::core::task::Task;
use crate::io::dependency_manager::{DependencyLayout, DependencyManagerRunner};
use crate::io::download::Downloader;
use crate::io::signature::SignatureVerifier;
use crate::io::state_store::write_repository;
use crate::update::context::UpdateContext;

/// Repositories written by a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub installed: InstalledRepository,
    pub lock: InstalledRepository,
}

pub struct UpdateExecutor<'a> {
    pub install_root: PathBuf,
    pub installed_path: PathBuf,
    pub lock_path: PathBuf,
    pub layout: DependencyLayout,
    pub downloader: &'a dyn Downloader,
    pub verifier: &'a dyn SignatureVerifier,
    pub dependency_manager: &'a dyn DependencyManagerRunner,
}

impl UpdateExecutor<'_> {
    pub fn execute(&self, tasks: &[Task]) -> Result<ExecutionOutcome> {
        self.execute_with(tasks, &mut |_| {})
    }

    /// Execute `tasks` in order, calling `progress` before each one.
    ///
    /// The first failure stops the run and nothing is persisted, leaving the
    /// previous installed-state and lock files authoritative.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub fn execute_with(
        &self,
        tasks: &[Task],
        progress: &mut dyn FnMut(&Task),
    ) -> Result<ExecutionOutcome> {
        let mut ctx = UpdateContext::new(
            self.install_root.clone(),
            self.downloader,
            self.verifier,
            self.dependency_manager,
            self.layout.clone(),
        );

        for task in tasks {
            progress(task);
            task.execute(&mut ctx)?;
        }

        write_repository(&self.installed_path, &ctx.installed)?;
        write_repository(&self.lock_path, &ctx.lock)?;
        info!(
            plugins = ctx.installed.len(),
            installed = %self.installed_path.display(),
            lock = %self.lock_path.display(),
            "update executed"
        );
        Ok(ExecutionOutcome {
            installed: ctx.installed,
            lock: ctx.lock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::installed::InstalledPlugin;
    use crate::core::types::{Hash, HashType};
    use crate::error::{UpdateError, classify};
    use crate::test_support::{
        MapDownloader, ScriptedDependencyManager, ScriptedVerifier, plugin_version, tool_version,
    };

    const KEY: &str = "8A03EA3B385DBAA1D3CE2E5231C7E470E2138192";

    struct Fixture {
        temp: tempfile::TempDir,
        downloader: MapDownloader,
        verifier: ScriptedVerifier,
        manager: ScriptedDependencyManager,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                temp: tempfile::tempdir().expect("tempdir"),
                downloader: MapDownloader::default(),
                verifier: ScriptedVerifier::trusting(&[KEY]),
                manager: ScriptedDependencyManager::default(),
            }
        }

        fn root(&self) -> PathBuf {
            self.temp.path().join("plugins")
        }

        fn executor(&self) -> UpdateExecutor<'_> {
            UpdateExecutor {
                install_root: self.root(),
                installed_path: self.temp.path().join("installed.json"),
                lock_path: self.temp.path().join("updater.lock"),
                layout: DependencyLayout::default(),
                downloader: &self.downloader,
                verifier: &self.verifier,
                dependency_manager: &self.manager,
            }
        }
    }

    #[test]
    fn install_plugin_downloads_verifies_and_registers() {
        let mut fixture = Fixture::new();
        let content = b"<?php // foo 1.0.0".to_vec();
        let mut foo = plugin_version("foo", "1.0.0");
        foo.hash = Some(Hash::of(HashType::Sha256, &content));
        foo.signature_reference = Some("https://repo.invalid/foo-1.0.0.php.asc".to_string());
        fixture.downloader.insert(&foo.artifact_path, content.clone());
        fixture.downloader.insert(
            "https://repo.invalid/foo-1.0.0.php.asc",
            ScriptedVerifier::sign(KEY, &content),
        );

        let outcome = fixture
            .executor()
            .execute(&[Task::InstallPlugin {
                version: foo.clone(),
                signed: true,
            }])
            .expect("execute");

        let installed = outcome.installed.plugin("foo").expect("installed");
        assert_eq!(installed.version.artifact_path, "foo/plugin.php");
        assert_eq!(
            installed.version.signature_reference.as_deref(),
            Some("foo/plugin.php.asc")
        );
        assert!(fixture.root().join("foo/plugin.php").is_file());
        assert_eq!(outcome.lock.plugin("foo").expect("locked").version, foo);
        assert!(fixture.temp.path().join("installed.json").is_file());
        assert!(fixture.temp.path().join("updater.lock").is_file());
    }

    #[test]
    fn hash_mismatch_removes_artifact() {
        let mut fixture = Fixture::new();
        let mut foo = plugin_version("foo", "1.0.0");
        foo.hash = Some(Hash::new(HashType::Sha256, "00"));
        fixture.downloader.insert(&foo.artifact_path, b"tampered".to_vec());

        let err = fixture
            .executor()
            .execute(&[Task::InstallPlugin {
                version: foo,
                signed: false,
            }])
            .expect_err("hash mismatch");
        assert!(matches!(classify(&err), Some(UpdateError::Integrity { .. })));
        assert!(!fixture.root().join("foo/plugin.php").exists());
        assert!(!fixture.temp.path().join("installed.json").exists());
    }

    #[test]
    fn unknown_key_is_imported_once_and_retried() {
        let mut fixture = Fixture::new();
        fixture.verifier = ScriptedVerifier::trusting(&[]).with_importable(KEY);
        let content = b"<?php".to_vec();
        let mut foo = plugin_version("foo", "1.0.0");
        foo.signature_reference = Some("https://repo.invalid/foo.asc".to_string());
        fixture.downloader.insert(&foo.artifact_path, content.clone());
        fixture
            .downloader
            .insert("https://repo.invalid/foo.asc", ScriptedVerifier::sign(KEY, &content));

        fixture
            .executor()
            .execute(&[Task::InstallPlugin {
                version: foo,
                signed: true,
            }])
            .expect("execute");
        assert_eq!(fixture.verifier.imports(), vec![KEY.to_string()]);
    }

    #[test]
    fn unimportable_key_fails_and_cleans_up() {
        let mut fixture = Fixture::new();
        fixture.verifier = ScriptedVerifier::trusting(&[]);
        let content = b"<?php".to_vec();
        let mut foo = plugin_version("foo", "1.0.0");
        foo.signature_reference = Some("https://repo.invalid/foo.asc".to_string());
        fixture.downloader.insert(&foo.artifact_path, content.clone());
        fixture
            .downloader
            .insert("https://repo.invalid/foo.asc", ScriptedVerifier::sign(KEY, &content));

        let err = fixture
            .executor()
            .execute(&[Task::InstallPlugin {
                version: foo,
                signed: true,
            }])
            .expect_err("untrusted key");
        assert!(matches!(classify(&err), Some(UpdateError::Integrity { .. })));
        assert_eq!(fixture.verifier.imports().len(), 1);
        assert!(!fixture.root().join("foo/plugin.php").exists());
        assert!(!fixture.root().join("foo/plugin.php.asc").exists());
    }

    #[test]
    fn republished_artifact_replaces_cached_copy() {
        let fixture = Fixture::new();
        let downloader = crate::io::download::HttpDownloader::new(
            std::time::Duration::from_secs(5),
            Some(fixture.temp.path().join("cache")),
        )
        .expect("downloader");
        let executor = UpdateExecutor {
            downloader: &downloader,
            ..fixture.executor()
        };
        let source = fixture.temp.path().join("foo-1.0.0.php");
        let install = |content: &[u8]| {
            let mut foo = plugin_version("foo", "1.0.0");
            foo.artifact_path = source.display().to_string();
            foo.hash = Some(Hash::of(HashType::Sha256, content));
            executor.execute(&[Task::InstallPlugin {
                version: foo,
                signed: false,
            }])
        };

        std::fs::write(&source, b"first build").expect("publish");
        install(b"first build").expect("first install");

        std::fs::write(&source, b"second build").expect("republish");
        for _ in 0..2 {
            install(b"second build").expect("reinstall");
            assert_eq!(
                std::fs::read(fixture.root().join("foo/plugin.php")).expect("artifact"),
                b"second build"
            );
        }
    }

    fn tool_tasks(tool: crate::core::types::ToolVersion, signed: bool) -> Vec<Task> {
        vec![
            Task::InstallPlugin {
                version: plugin_version("foo", "1.0.0"),
                signed: false,
            },
            Task::InstallTool {
                plugin: "foo".to_string(),
                version: tool,
                signed,
            },
        ]
    }

    #[test]
    fn tool_hash_mismatch_removes_tool_artifact() {
        let mut fixture = Fixture::new();
        let foo = plugin_version("foo", "1.0.0");
        let mut bar = tool_version("bar", "2.0.0");
        bar.hash = Some(Hash::new(HashType::Sha256, "00"));
        fixture.downloader.insert(&foo.artifact_path, b"<?php".to_vec());
        fixture.downloader.insert(
            bar.artifact_path.as_deref().expect("artifact"),
            b"tampered".to_vec(),
        );

        let err = fixture
            .executor()
            .execute(&tool_tasks(bar, false))
            .expect_err("hash mismatch");
        assert!(matches!(classify(&err), Some(UpdateError::Integrity { .. })));
        assert!(!fixture.root().join("foo/tools/bar~2.0.0.phar").exists());
        assert!(!fixture.temp.path().join("installed.json").exists());
    }

    #[test]
    fn signed_tool_without_signature_is_rejected() {
        let mut fixture = Fixture::new();
        let foo = plugin_version("foo", "1.0.0");
        let bar = tool_version("bar", "2.0.0");
        fixture.downloader.insert(&foo.artifact_path, b"<?php".to_vec());
        fixture.downloader.insert(
            bar.artifact_path.as_deref().expect("artifact"),
            b"#!/usr/bin/env php".to_vec(),
        );

        let err = fixture
            .executor()
            .execute(&tool_tasks(bar, true))
            .expect_err("missing signature");
        assert!(matches!(classify(&err), Some(UpdateError::Integrity { .. })));
        assert!(!fixture.root().join("foo/tools/bar~2.0.0.phar").exists());
    }

    #[test]
    fn tool_locations_cannot_leave_the_install_root() {
        let mut fixture = Fixture::new();
        let foo = plugin_version("foo", "1.0.0");
        let escaped = tool_version("../../escaped", "1.0.0");
        fixture.downloader.insert(&foo.artifact_path, b"<?php".to_vec());
        fixture.downloader.insert(
            escaped.artifact_path.as_deref().expect("artifact"),
            b"payload".to_vec(),
        );

        let err = fixture
            .executor()
            .execute(&tool_tasks(escaped, false))
            .expect_err("escaping location");
        assert!(matches!(classify(&err), Some(UpdateError::Filesystem { .. })));
        assert!(!fixture.root().join("escaped~1.0.0.phar").exists());
        assert!(!fixture.temp.path().join("escaped~1.0.0.phar").exists());
    }

    #[test]
    fn keep_tasks_rebuild_repository_without_io() {
        let fixture = Fixture::new();
        let mut old = InstalledPlugin::new(plugin_version("foo", "1.0.0"))
            .with_dependency_lock(Some("{}".to_string()));
        old.version.artifact_path = "foo/plugin.php".to_string();
        let tool = tool_version("bar", "2.0.0");
        old.add_tool(tool.clone()).expect("tool");

        let outcome = fixture
            .executor()
            .execute(&[
                Task::KeepPlugin {
                    installed: old.clone(),
                    resolved: plugin_version("foo", "1.0.0"),
                },
                Task::KeepTool {
                    plugin: "foo".to_string(),
                    installed: tool.clone(),
                    resolved: tool,
                },
            ])
            .expect("execute");
        assert_eq!(outcome.installed.plugin("foo"), Some(&old));
        assert_eq!(
            outcome.lock.plugin("foo").expect("lock").dependency_lock.as_deref(),
            Some("{}")
        );
        assert!(fixture.downloader.fetched().is_empty());
    }

    #[test]
    fn native_tools_are_registered_without_download() {
        let fixture = Fixture::new();
        let foo = plugin_version("foo", "1.0.0");
        let native = crate::core::types::ToolVersion {
            artifact_path: None,
            ..tool_version("php", "8.2.0")
        };
        let outcome = fixture
            .executor()
            .execute(&[
                Task::KeepPlugin {
                    installed: InstalledPlugin::new(foo.clone()),
                    resolved: foo,
                },
                Task::InstallTool {
                    plugin: "foo".to_string(),
                    version: native,
                    signed: true,
                },
            ])
            .expect("execute");
        let tool = outcome
            .installed
            .plugin("foo")
            .and_then(|p| p.tool("php"))
            .expect("tool");
        assert_eq!(tool.artifact_path, None);
        assert!(fixture.downloader.fetched().is_empty());
    }

    #[test]
    fn dependency_tasks_capture_and_clear_lock_blob() {
        let fixture = Fixture::new();
        let foo = plugin_version("foo", "1.0.0");
        let mut requirements = indexmap::IndexMap::new();
        requirements.insert("vendor/lib".to_string(), "^1.0".to_string());
        let keep = Task::KeepPlugin {
            installed: InstalledPlugin::new(foo.clone()),
            resolved: foo,
        };

        let outcome = fixture
            .executor()
            .execute(&[
                keep.clone(),
                Task::InstallDependencies {
                    plugin: "foo".to_string(),
                    requirements,
                    lock: None,
                },
            ])
            .expect("install");
        let blob = outcome
            .installed
            .plugin("foo")
            .and_then(|p| p.dependency_lock.clone())
            .expect("lock blob");
        assert!(blob.contains("vendor/lib"));
        assert_eq!(fixture.manager.calls(), vec!["install foo".to_string()]);

        let outcome = fixture
            .executor()
            .execute(&[
                keep,
                Task::RemoveDependencies {
                    plugin: "foo".to_string(),
                },
            ])
            .expect("remove");
        assert_eq!(outcome.installed.plugin("foo").expect("foo").dependency_lock, None);
        assert!(!fixture.root().join("foo/composer.json").exists());
    }

    #[test]
    fn failing_dependency_manager_is_classified() {
        let mut fixture = Fixture::new();
        fixture.manager = ScriptedDependencyManager::default().failing();
        let foo = plugin_version("foo", "1.0.0");
        let mut requirements = indexmap::IndexMap::new();
        requirements.insert("vendor/lib".to_string(), "^1.0".to_string());

        let err = fixture
            .executor()
            .execute(&[
                Task::KeepPlugin {
                    installed: InstalledPlugin::new(foo.clone()),
                    resolved: foo,
                },
                Task::UpdateDependencies {
                    plugin: "foo".to_string(),
                    requirements,
                },
            ])
            .expect_err("failing manager");
        assert!(matches!(
            classify(&err),
            Some(UpdateError::DependencyManager { .. })
        ));
    }
}
