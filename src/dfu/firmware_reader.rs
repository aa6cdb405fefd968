//! Firmware image lookup.
//!
//! Images are plain binaries named `<version><suffix>` (e.g. `V8.bin`).
//! The preferred directory is searched first, then the bundled directory
//! that ships with the application.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(test)]
use mockall::automock;

use super::config::FIRMWARE_SUFFIX;
use super::error::{DfuError, DfuResult};

/// Where an image was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageOrigin {
    Preferred,
    Bundled,
}

/// A loaded firmware binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub version: String,
    pub suffix: String,
    pub data: Vec<u8>,
    /// Lowercase hex SHA-256 of `data`.
    pub sha256: String,
    pub origin: ImageOrigin,
}

impl FirmwareImage {
    pub fn new(version: &str, suffix: &str, data: Vec<u8>, origin: ImageOrigin) -> Self {
        let sha256 = calculate_sha256(&data);
        Self {
            version: version.to_string(),
            suffix: suffix.to_string(),
            data,
            sha256,
            origin,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.version, self.suffix)
    }
}

/// Resolves a version tag to image bytes.
#[cfg_attr(test, automock)]
pub trait FirmwareSource: Send {
    fn load(&self, version: &str) -> DfuResult<FirmwareImage>;
}

/// Calculate the SHA-256 digest of a byte slice.
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Check that a version tag is a bare file stem.
///
/// Rejects separators, `..` and anything outside `[A-Za-z0-9._-]`.
pub fn is_valid_version_tag(version: &str) -> bool {
    !version.is_empty()
        && !version.contains("..")
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Directory-backed firmware lookup.
#[derive(Debug, Clone)]
pub struct DirFirmwareSource {
    preferred_dir: Option<PathBuf>,
    bundled_dir: PathBuf,
    suffix: String,
}

impl DirFirmwareSource {
    pub fn new(preferred_dir: Option<PathBuf>, bundled_dir: impl Into<PathBuf>) -> Self {
        Self {
            preferred_dir,
            bundled_dir: bundled_dir.into(),
            suffix: FIRMWARE_SUFFIX.to_string(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Candidate locations in lookup order.
    fn candidates(&self, file_name: &str) -> Vec<(PathBuf, ImageOrigin)> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(dir) = &self.preferred_dir {
            candidates.push((dir.join(file_name), ImageOrigin::Preferred));
        }
        candidates.push((self.bundled_dir.join(file_name), ImageOrigin::Bundled));
        candidates
    }

    fn not_found(&self, version: &str) -> DfuError {
        DfuError::ImageNotFound {
            version: version.to_string(),
            suffix: self.suffix.clone(),
        }
    }

    fn read_image(&self, path: &Path, version: &str, origin: ImageOrigin) -> DfuResult<FirmwareImage> {
        let data = fs::read(path)?;
        if data.is_empty() {
            return Err(DfuError::EmptyImage {
                version: version.to_string(),
            });
        }
        let image = FirmwareImage::new(version, &self.suffix, data, origin);
        info!(
            "Loaded firmware {} ({} bytes, sha256 {}) from {}",
            image.file_name(),
            image.len(),
            image.sha256,
            path.display()
        );
        Ok(image)
    }
}

impl FirmwareSource for DirFirmwareSource {
    fn load(&self, version: &str) -> DfuResult<FirmwareImage> {
        if !is_valid_version_tag(version) {
            debug!("Rejecting firmware version tag {:?}", version);
            return Err(self.not_found(version));
        }

        let file_name = format!("{}{}", version, self.suffix);
        let mut last_error = None;
        for (path, origin) in self.candidates(&file_name) {
            if !path.is_file() {
                debug!("Firmware not at {}", path.display());
                continue;
            }
            match self.read_image(&path, version, origin) {
                Err(DfuError::Io(e)) if origin == ImageOrigin::Preferred => {
                    warn!(
                        "Could not read {}: {}, falling back to bundled firmware",
                        path.display(),
                        e
                    );
                    last_error = Some(DfuError::Io(e));
                }
                result => return result,
            }
        }

        Err(last_error.unwrap_or_else(|| self.not_found(version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestContext;

    fn source(ctx: &TestContext) -> DirFirmwareSource {
        DirFirmwareSource::new(Some(ctx.path("preferred")), ctx.path("bundled"))
    }

    #[test]
    fn test_calculate_sha256_known_value() {
        assert_eq!(
            calculate_sha256(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_prefers_preferred_directory() {
        let ctx = TestContext::new();
        ctx.create_file_bytes("preferred/V8.bin", &[1, 2, 3]);
        ctx.create_file_bytes("bundled/V8.bin", &[9, 9]);

        let image = source(&ctx).load("V8").unwrap();

        assert_eq!(image.origin, ImageOrigin::Preferred);
        assert_eq!(image.data, vec![1, 2, 3]);
        assert_eq!(image.file_name(), "V8.bin");
        assert_eq!(image.sha256, calculate_sha256(&[1, 2, 3]));
    }

    #[test]
    fn test_falls_back_to_bundled_directory() {
        let ctx = TestContext::new();
        ctx.create_dir("preferred");
        ctx.create_file_bytes("bundled/V9.bin", &[4, 5]);

        let image = source(&ctx).load("V9").unwrap();

        assert_eq!(image.origin, ImageOrigin::Bundled);
        assert_eq!(image.len(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreadable_preferred_image_falls_back_to_bundled() {
        let ctx = TestContext::new();
        ctx.create_dir("preferred");
        // Exists as a regular file but every read fails
        std::os::unix::fs::symlink("/proc/self/mem", ctx.path("preferred/V8.bin")).unwrap();
        ctx.create_file_bytes("bundled/V8.bin", &[1, 2, 3]);

        let image = source(&ctx).load("V8").unwrap();

        assert_eq!(image.origin, ImageOrigin::Bundled);
        assert_eq!(image.data, vec![1, 2, 3]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreadable_preferred_image_without_fallback_is_io_error() {
        let ctx = TestContext::new();
        ctx.create_dir("preferred");
        ctx.create_dir("bundled");
        std::os::unix::fs::symlink("/proc/self/mem", ctx.path("preferred/V8.bin")).unwrap();

        let err = source(&ctx).load("V8").unwrap_err();

        assert!(matches!(err, DfuError::Io(_)));
    }

    #[test]
    fn test_without_preferred_directory() {
        let ctx = TestContext::new();
        ctx.create_file_bytes("bundled/V10.bin", &[7]);

        let image = DirFirmwareSource::new(None, ctx.path("bundled"))
            .load("V10")
            .unwrap();
        assert_eq!(image.origin, ImageOrigin::Bundled);
    }

    #[test]
    fn test_missing_image() {
        let ctx = TestContext::new();
        ctx.create_dir("bundled");

        let err = source(&ctx).load("V99").unwrap_err();

        assert!(matches!(err, DfuError::ImageNotFound { .. }));
        assert_eq!(err.to_string(), "Firmware file V99.bin not found");
    }

    #[test]
    fn test_empty_image() {
        let ctx = TestContext::new();
        ctx.create_file_bytes("bundled/V8.bin", &[]);

        let err = source(&ctx).load("V8").unwrap_err();
        assert!(matches!(err, DfuError::EmptyImage { .. }));
    }

    #[test]
    fn test_path_like_tags_are_not_found() {
        let ctx = TestContext::new();
        ctx.create_file_bytes("secret.bin", &[1]);
        ctx.create_file_bytes("bundled/V8.bin", &[1]);

        for tag in ["../secret", "sub/V8", "", "V8 ", "..", "V8\\x"] {
            let err = source(&ctx).load(tag).unwrap_err();
            assert!(
                matches!(err, DfuError::ImageNotFound { .. }),
                "tag {:?} should be rejected",
                tag
            );
        }
    }

    #[test]
    fn test_custom_suffix() {
        let ctx = TestContext::new();
        ctx.create_file_bytes("bundled/V8.img", &[1]);

        let image = source(&ctx).with_suffix(".img").load("V8").unwrap();
        assert_eq!(image.suffix, ".img");
    }

    #[test]
    fn test_valid_version_tags() {
        assert!(is_valid_version_tag("V8"));
        assert!(is_valid_version_tag("V10-rc_1.2"));
        assert!(!is_valid_version_tag("a/b"));
        assert!(!is_valid_version_tag("a..b"));
    }
}
