//! Error taxonomy of the update engine.
//!
//! Fallible functions return `anyhow::Result`; these variants are raised as
//! the root cause so callers can classify a failure with
//! `err.downcast_ref::<UpdateError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    /// No version satisfies a constraint. Aborts calculation.
    #[error("cannot resolve {subject}: {reason}")]
    Resolution { subject: String, reason: String },

    /// Hash mismatch or rejected signature. The artifact is removed first.
    #[error("integrity check failed for {subject}: {reason}")]
    Integrity { subject: String, reason: String },

    #[error("download of {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("dependency manager failed for plugin {plugin}: {reason}")]
    DependencyManager { plugin: String, reason: String },

    #[error("filesystem operation on {} failed: {reason}", .path.display())]
    Filesystem { path: PathBuf, reason: String },
}

impl UpdateError {
    pub fn resolution(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn integrity(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn dependency_manager(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyManager {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Filesystem {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Find the taxonomy error in an `anyhow` chain, if any.
pub fn classify(err: &anyhow::Error) -> Option<&UpdateError> {
    err.chain().find_map(|cause| cause.downcast_ref::<UpdateError>())
}
