//! Filesystem handle used by tasks.
//!
//! Every failure is reported as [`UpdateError::Filesystem`]. Deletes tolerate
//! missing targets and writes overwrite existing files, so a re-run after a
//! failed run does not trip over leftovers.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Filesystem;

impl Filesystem {
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|err| UpdateError::filesystem(path, err.to_string()))?;
        Ok(())
    }

    /// Write `contents`, creating parent directories and replacing any existing file.
    pub fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        fs::write(path, contents).map_err(|err| UpdateError::filesystem(path, err.to_string()))?;
        Ok(())
    }

    /// Write via a sibling temp file and rename, so readers never see a partial file.
    pub fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| UpdateError::filesystem(path, "path has no parent directory"))?;
        self.create_dir_all(parent)?;
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = parent.join(tmp_name);
        fs::write(&tmp_path, contents)
            .map_err(|err| UpdateError::filesystem(&tmp_path, err.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|err| UpdateError::filesystem(path, err.to_string()))?;
        Ok(())
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path).map_err(|err| UpdateError::filesystem(path, err.to_string()))?)
    }

    /// Read a UTF-8 file, `None` if it does not exist.
    pub fn read_to_string_opt(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(UpdateError::filesystem(path, err.to_string()).into()),
        }
    }

    /// Remove a file; a missing file is not an error.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed file");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UpdateError::filesystem(path, err.to_string()).into()),
        }
    }

    /// Remove a directory tree; a missing directory is not an error.
    pub fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed directory");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UpdateError::filesystem(path, err.to_string()).into()),
        }
    }
}
