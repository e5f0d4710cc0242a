//! Test-only builders and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Result, anyhow};

use crate::core::constraint::satisfies;
use crate::core::hash::hex_digest;
use crate::core::types::{HashType, PluginVersion, Requirements, ToolRequirements, ToolVersion};
use crate::error::UpdateError;
use crate::io::dependency_manager::{DependencyLayout, DependencyManagerRunner};
use crate::io::download::Downloader;
use crate::io::resolver::Resolver;
use crate::io::signature::{SignatureStatus, SignatureVerifier};

/// Deterministic plugin descriptor without hash or signature.
pub fn plugin_version(name: &str, version: &str) -> PluginVersion {
    PluginVersion {
        name: name.to_string(),
        version: version.to_string(),
        api_version: "1.0.0".to_string(),
        requirements: Requirements::default(),
        artifact_path: format!("https://repo.invalid/{}-{}.php", name, version),
        signature_reference: None,
        hash: None,
    }
}

/// Deterministic tool descriptor with a downloadable artifact.
pub fn tool_version(name: &str, version: &str) -> ToolVersion {
    ToolVersion {
        name: name.to_string(),
        version: version.to_string(),
        requirements: ToolRequirements::default(),
        artifact_path: Some(format!("https://repo.invalid/{}-{}.phar", name, version)),
        signature_reference: None,
        hash: None,
    }
}

/// Resolver answering from fixed descriptors, one per name.
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    plugins: BTreeMap<String, PluginVersion>,
    tools: BTreeMap<String, ToolVersion>,
}

impl ScriptedResolver {
    pub fn with_plugin(mut self, version: PluginVersion) -> Self {
        self.plugins.insert(version.name.clone(), version);
        self
    }

    pub fn with_tool(mut self, version: ToolVersion) -> Self {
        self.tools.insert(version.name.clone(), version);
        self
    }
}

impl Resolver for ScriptedResolver {
    fn resolve_plugin_version(&self, name: &str, constraint: &str) -> Result<PluginVersion> {
        self.plugins
            .get(name)
            .filter(|version| satisfies(&version.version, constraint))
            .cloned()
            .ok_or_else(|| UpdateError::resolution(format!("plugin {}", name), constraint).into())
    }

    fn resolve_tool_version(&self, plugin: &str, tool: &str, constraint: &str) -> Result<ToolVersion> {
        self.tools
            .get(tool)
            .filter(|version| satisfies(&version.version, constraint))
            .cloned()
            .ok_or_else(|| {
                UpdateError::resolution(format!("tool {} of {}", tool, plugin), constraint).into()
            })
    }
}

/// Downloader serving bytes from memory and recording every fetch.
#[derive(Debug, Default)]
pub struct MapDownloader {
    files: BTreeMap<String, Vec<u8>>,
    fetched: RefCell<Vec<String>>,
}

impl MapDownloader {
    pub fn insert(&mut self, url: &str, bytes: Vec<u8>) {
        self.files.insert(url.to_string(), bytes);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }
}

impl Downloader for MapDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetched.borrow_mut().push(url.to_string());
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| UpdateError::transport(url, "not found").into())
    }
}

/// Verifier accepting signatures made with [`ScriptedVerifier::sign`].
///
/// A signature names its key; keys outside the keyring report
/// [`SignatureStatus::UnknownKey`] until imported, and only keys marked
/// importable can be imported.
#[derive(Debug, Default)]
pub struct ScriptedVerifier {
    keyring: RefCell<BTreeSet<String>>,
    importable: BTreeSet<String>,
    imports: RefCell<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn trusting(keys: &[&str]) -> Self {
        Self {
            keyring: RefCell::new(keys.iter().map(|key| key.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn with_importable(mut self, key: &str) -> Self {
        self.importable.insert(key.to_string());
        self
    }

    /// Signature over `content` by `key`.
    pub fn sign(key: &str, content: &[u8]) -> Vec<u8> {
        format!("{}:{}", key, hex_digest(HashType::Sha256, content)).into_bytes()
    }

    pub fn imports(&self) -> Vec<String> {
        self.imports.borrow().clone()
    }
}

impl SignatureVerifier for ScriptedVerifier {
    fn verify(&self, content: &[u8], signature: &[u8]) -> Result<SignatureStatus> {
        let text = String::from_utf8_lossy(signature);
        let Some((key, digest)) = text.split_once(':') else {
            return Ok(SignatureStatus::Invalid {
                reason: "malformed signature".to_string(),
            });
        };
        if digest != hex_digest(HashType::Sha256, content) {
            return Ok(SignatureStatus::Invalid {
                reason: format!("bad signature from key {}", key),
            });
        }
        if !self.keyring.borrow().contains(key) {
            return Ok(SignatureStatus::UnknownKey {
                fingerprint: key.to_string(),
            });
        }
        Ok(SignatureStatus::Valid {
            fingerprint: key.to_string(),
        })
    }

    fn import_key(&self, fingerprint: &str) -> Result<()> {
        self.imports.borrow_mut().push(fingerprint.to_string());
        if !self.importable.contains(fingerprint) {
            return Err(anyhow!("key {} is not trusted", fingerprint));
        }
        self.keyring.borrow_mut().insert(fingerprint.to_string());
        Ok(())
    }
}

/// Dependency manager that copies the manifest into the lock file.
#[derive(Debug, Default)]
pub struct ScriptedDependencyManager {
    update_required: Cell<bool>,
    fail: bool,
    calls: RefCell<Vec<String>>,
}

impl ScriptedDependencyManager {
    pub fn requiring_update(self) -> Self {
        self.update_required.set(true);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Calls as `"<operation> <plugin dir name>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, operation: &str, dir: &Path) -> Result<()> {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.borrow_mut().push(format!("{} {}", operation, name));
        if self.fail {
            return Err(anyhow!("{} exited with status Some(2)", operation));
        }
        Ok(())
    }

    fn write_lock(&self, dir: &Path) -> Result<()> {
        let layout = DependencyLayout::default();
        let manifest = std::fs::read_to_string(layout.manifest_path(dir))?;
        std::fs::write(layout.lock_path(dir), manifest)?;
        self.update_required.set(false);
        Ok(())
    }
}

impl DependencyManagerRunner for ScriptedDependencyManager {
    fn install(&self, dir: &Path) -> Result<()> {
        self.record("install", dir)?;
        self.write_lock(dir)
    }

    fn update(&self, dir: &Path) -> Result<()> {
        self.record("update", dir)?;
        self.write_lock(dir)
    }

    fn is_update_required(&self, dir: &Path) -> Result<bool> {
        self.record("dry-run", dir)?;
        Ok(self.update_required.get())
    }
}
