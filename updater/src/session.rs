//! Wiring of configuration to concrete collaborators for CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::core::task::Task;
use crate::io::config::{DEFAULT_CONFIG_FILE, UpdaterConfig, UpdaterPaths, load_config};
use crate::io::dependency_manager::CommandDependencyManager;
use crate::io::download::HttpDownloader;
use crate::io::filesystem::Filesystem;
use crate::io::resolver::{CatalogResolver, LockedResolver, Resolver};
use crate::io::signature::GpgVerifier;
use crate::io::state_store::load_repository;
use crate::update::calculator::UpdateCalculator;
use crate::update::executor::{ExecutionOutcome, UpdateExecutor};

/// How desired versions are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Prefer the lock file. Without one, resolve from catalogs and verify
    /// every artifact again.
    Install { force_reinstall: bool },
    /// Re-resolve from catalogs, ignoring locked versions.
    Update { force_reinstall: bool },
}

/// A project root with its loaded configuration.
#[derive(Debug, Clone)]
pub struct Session {
    pub root: PathBuf,
    pub config: UpdaterConfig,
    pub paths: UpdaterPaths,
}

impl Session {
    /// Load `config_path` (default `<root>/.updater.toml`).
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE));
        let config = load_config(&config_path)?;
        let paths = config.paths(root);
        debug!(root = %root.display(), config = %config_path.display(), "session loaded");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            paths,
        })
    }

    pub fn downloader(&self) -> Result<HttpDownloader> {
        HttpDownloader::new(self.config.download_timeout(), self.paths.cache_dir.clone())
    }

    pub fn verifier(&self) -> GpgVerifier {
        GpgVerifier {
            binary: self.config.gpg.binary.clone(),
            home: self.paths.gnupg_home.clone(),
            keyserver: self.config.gpg.keyserver.clone(),
            trusted_keys: self.config.trusted_keys.clone(),
            timeout: self.config.gpg_timeout(),
        }
    }

    pub fn dependency_manager(&self) -> CommandDependencyManager {
        CommandDependencyManager {
            command: self.config.dependency_manager.command.clone(),
            timeout: self.config.dependency_timeout(),
            output_limit_bytes: self.config.dependency_manager.output_limit_bytes,
        }
    }

    /// Calculate the task list for the configured plugins.
    pub fn plan(&self, mode: PlanMode) -> Result<Vec<Task>> {
        let installed = load_repository(&self.paths.installed_path)?;
        let lock = load_repository(&self.paths.lock_path)?;
        let downloader = self.downloader()?;
        let manager = self.dependency_manager();

        let catalog = if self.config.repositories.is_empty() {
            None
        } else {
            Some(
                CatalogResolver::load(&downloader, &self.config.repositories)
                    .context("load catalogs")?,
            )
        };
        let catalog_ref = catalog.as_ref().map(|catalog| catalog as &dyn Resolver);
        let require_catalog = || {
            catalog_ref.ok_or_else(|| anyhow!("no repositories configured in {}", DEFAULT_CONFIG_FILE))
        };

        let locked;
        let (resolver, force): (&dyn Resolver, bool) = match mode {
            PlanMode::Install { force_reinstall } if Filesystem.exists(&self.paths.lock_path) => {
                info!(lock = %self.paths.lock_path.display(), "resolving through lock file");
                locked = LockedResolver::new(lock.clone(), catalog_ref);
                (&locked, force_reinstall)
            }
            PlanMode::Install { .. } => {
                info!("no lock file, verifying every artifact");
                (require_catalog()?, true)
            }
            PlanMode::Update { force_reinstall } => (require_catalog()?, force_reinstall),
        };

        UpdateCalculator::new(
            &installed,
            resolver,
            &manager,
            self.config.dependency_manager.layout(),
            self.paths.install_root.clone(),
        )
        .with_lock(&lock)
        .calculate(&self.config.desired(), force)
    }

    /// Execute `tasks` with the real collaborators.
    pub fn apply(&self, tasks: &[Task], progress: &mut dyn FnMut(&Task)) -> Result<ExecutionOutcome> {
        let downloader = self.downloader()?;
        let verifier = self.verifier();
        let manager = self.dependency_manager();
        UpdateExecutor {
            install_root: self.paths.install_root.clone(),
            installed_path: self.paths.installed_path.clone(),
            lock_path: self.paths.lock_path.clone(),
            layout: self.config.dependency_manager.layout(),
            downloader: &downloader,
            verifier: &verifier,
            dependency_manager: &manager,
        }
        .execute_with(tasks, progress)
    }
}
