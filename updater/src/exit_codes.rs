//! Stable exit codes for updater CLI commands.

use crate::error::{UpdateError, classify};

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, invalid state files or any other unclassified error.
pub const INVALID: i32 = 1;
/// A desired plugin or tool has no version satisfying its constraint.
pub const RESOLUTION: i32 = 2;
/// An artifact failed its hash or signature check.
pub const INTEGRITY: i32 = 3;
/// A download failed.
pub const TRANSPORT: i32 = 4;
/// The dependency manager failed.
pub const DEPENDENCY_MANAGER: i32 = 5;
/// A filesystem write or delete failed.
pub const FILESYSTEM: i32 = 6;

/// Exit code for a failed command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match classify(err) {
        Some(UpdateError::Resolution { .. }) => RESOLUTION,
        Some(UpdateError::Integrity { .. }) => INTEGRITY,
        Some(UpdateError::Transport { .. }) => TRANSPORT,
        Some(UpdateError::DependencyManager { .. }) => DEPENDENCY_MANAGER,
        Some(UpdateError::Filesystem { .. }) => FILESYSTEM,
        None => INVALID,
    }
}
