use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::dfu::DirFirmwareSource;
use crate::settings::UpdaterSettings;

/// Test context with temporary directory management.
/// Automatically cleans up when dropped.
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a fresh temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the root path of the temporary directory
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a file with binary content at the given relative path
    pub fn create_file_bytes(&self, relative_path: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Create a directory at the given relative path
    pub fn create_dir(&self, relative_path: &str) -> PathBuf {
        let path = self.root().join(relative_path);
        fs::create_dir_all(&path).expect("Failed to create dir");
        path
    }

    /// Write `<version>.bin` into the bundled firmware directory
    pub fn create_bundled_firmware(&self, version: &str, content: &[u8]) -> PathBuf {
        self.create_file_bytes(&format!("bundled/{}.bin", version), content)
    }

    /// Settings pointing both firmware directories into this context
    pub fn settings(&self) -> UpdaterSettings {
        UpdaterSettings {
            preferred_firmware_dir: Some(self.path("preferred")),
            bundled_firmware_dir: self.path("bundled"),
            ..UpdaterSettings::default()
        }
    }

    /// Directory-backed firmware source over this context
    pub fn firmware_source(&self) -> DirFirmwareSource {
        self.settings().firmware_source()
    }

    /// Get full path for a relative path
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
