use std::collections::HashMap;

use crate::dfu::{DfuError, DfuResult, FirmwareImage, FirmwareSource, ImageOrigin, TransferObserver};

/// In-memory firmware images keyed by version
#[derive(Debug, Clone, Default)]
pub struct MemoryFirmwareSource {
    images: HashMap<String, Vec<u8>>,
}

impl MemoryFirmwareSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, version: &str, data: Vec<u8>) -> Self {
        self.images.insert(version.to_string(), data);
        self
    }
}

impl FirmwareSource for MemoryFirmwareSource {
    fn load(&self, version: &str) -> DfuResult<FirmwareImage> {
        let data = self
            .images
            .get(version)
            .ok_or_else(|| DfuError::ImageNotFound {
                version: version.to_string(),
                suffix: ".bin".to_string(),
            })?;
        if data.is_empty() {
            return Err(DfuError::EmptyImage {
                version: version.to_string(),
            });
        }
        Ok(FirmwareImage::new(version, ".bin", data.clone(), ImageOrigin::Bundled))
    }
}

/// Records every link-closed notification
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub closed: Vec<bool>,
}

impl TransferObserver for RecordingObserver {
    fn on_link_closed(&mut self, update_completed: bool) {
        self.closed.push(update_completed);
    }
}

/// Firmware bytes with a recognizable pattern
pub fn firmware_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
