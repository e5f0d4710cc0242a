//! Shared deterministic types for the update engine.
//!
//! Version descriptors are immutable value objects. They are produced by a
//! resolver (desired side) or deserialized from the installed-state file
//! (installed side) and are replaced, never edited, when a plugin or tool
//! changes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::hash;

/// Whether `name` can name a plugin or tool directory entry below the install
/// root. Dot-prefixed names are reserved for the updater's own files.
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

/// Digest algorithm used for an artifact hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashType {
    #[serde(rename = "sha-256")]
    Sha256,
    #[serde(rename = "sha-384")]
    Sha384,
    #[serde(rename = "sha-512")]
    Sha512,
}

impl HashType {
    pub fn as_str(self) -> &'static str {
        match self {
            HashType::Sha256 => "sha-256",
            HashType::Sha384 => "sha-384",
            HashType::Sha512 => "sha-512",
        }
    }
}

/// Content hash of an artifact (`{"type": "sha-256", "value": "<hex>"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    #[serde(rename = "type")]
    pub kind: HashType,
    pub value: String,
}

impl Hash {
    pub fn new(kind: HashType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into().to_ascii_lowercase(),
        }
    }

    /// Hash `content` with `kind`.
    pub fn of(kind: HashType, content: &[u8]) -> Self {
        Self::new(kind, hash::hex_digest(kind, content))
    }

    /// Same algorithm and same digest (hex compared case-insensitively).
    pub fn matches(&self, other: &Hash) -> bool {
        self.kind == other.kind && self.value.eq_ignore_ascii_case(&other.value)
    }

    /// Returns true if `content` hashes to this value.
    pub fn verify(&self, content: &[u8]) -> bool {
        self.value
            .eq_ignore_ascii_case(&hash::hex_digest(self.kind, content))
    }
}

/// A tool requirement declared by a plugin version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequirement {
    pub constraint: String,
    #[serde(default = "default_signed")]
    pub signed: bool,
}

impl ToolRequirement {
    pub fn new(constraint: impl Into<String>, signed: bool) -> Self {
        Self {
            constraint: constraint.into(),
            signed,
        }
    }
}

fn default_signed() -> bool {
    true
}

/// Requirements of a plugin version: tools it wraps and packages handed to
/// the external dependency manager. Both maps are name-unique and keep
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub tool: IndexMap<String, ToolRequirement>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub dependency: IndexMap<String, String>,
}

/// Requirements of a tool version (dependency-manager packages only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolRequirements {
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub dependency: IndexMap<String, String>,
}

/// A resolved plugin version.
///
/// `artifact_path` and `signature_reference` are remote locations when the
/// descriptor comes from a catalog or the lock file, and paths relative to
/// the install root when it comes from the installed-state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginVersion {
    #[serde(skip)]
    pub name: String,
    pub version: String,
    pub api_version: String,
    #[serde(default)]
    pub requirements: Requirements,
    pub artifact_path: String,
    #[serde(default)]
    pub signature_reference: Option<String>,
    #[serde(default)]
    pub hash: Option<Hash>,
}

impl PluginVersion {
    /// Copy of this descriptor pointing at a different artifact location.
    pub fn relocated(&self, artifact_path: String, signature_reference: Option<String>) -> Self {
        Self {
            artifact_path,
            signature_reference,
            ..self.clone()
        }
    }
}

/// A resolved tool version. Tools without an artifact (native tools) carry
/// no artifact, signature or hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolVersion {
    #[serde(skip)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub requirements: ToolRequirements,
    #[serde(default)]
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub signature_reference: Option<String>,
    #[serde(default)]
    pub hash: Option<Hash>,
}

impl ToolVersion {
    pub fn relocated(
        &self,
        artifact_path: Option<String>,
        signature_reference: Option<String>,
    ) -> Self {
        Self {
            artifact_path,
            signature_reference,
            ..self.clone()
        }
    }
}

/// Desired state for one plugin as declared in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredPlugin {
    /// Version constraint.
    pub version: String,
    /// Whether the plugin artifact must carry a valid signature.
    pub signed: bool,
    /// Per-tool overrides of the plugin's declared tool requirements.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub tools: IndexMap<String, ToolOverride>,
}

impl Default for DesiredPlugin {
    fn default() -> Self {
        Self {
            version: "*".to_string(),
            signed: true,
            tools: IndexMap::new(),
        }
    }
}

impl DesiredPlugin {
    pub fn new(version: impl Into<String>, signed: bool) -> Self {
        Self {
            version: version.into(),
            signed,
            tools: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOverride {
    pub version: Option<String>,
    pub signed: Option<bool>,
}

/// Desired plugins keyed by name, in caller-supplied order.
pub type DesiredConfig = IndexMap<String, DesiredPlugin>;
