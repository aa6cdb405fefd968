//! Updater settings with persistence.
//!
//! This module provides:
//! - `UpdaterSettings` struct for timing, transfer and firmware lookup
//! - Persistence to JSON file in app data directory
//!
//! ## Extensibility
//!
//! To add a new setting:
//! 1. Add the field to `UpdaterSettings` with a default in `Default`
//! 2. Clamp it in `normalized()` if it has a valid range
//! 3. Keep the camelCase key stable, since existing settings files and
//!    snapshot consumers read it

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::dfu::config::{
    clamp_chunk_batch_size, DEFAULT_CHUNK_BATCH_SIZE, DEFAULT_FIRMWARE_VERSION,
    DEVICE_NAME_PATTERNS, FIRMWARE_DIR_NAME, FIRMWARE_SUFFIX, KNOWN_FIRMWARE_VERSIONS,
    MIN_REBOOT_BUDGET_TICKS, PORT_SCAN_INTERVAL, REBOOT_BUDGET_TICKS,
    REBOOT_TICK_INTERVAL, RESUME_SCAN_DELAY, STATUS_POLL_INTERVAL, TRANSFER_NAME_PATTERNS,
};
use crate::dfu::{is_valid_version_tag, DfuResult, DirFirmwareSource};

/// Shortest accepted timer interval.
const MIN_INTERVAL_MS: u64 = 100;

/// Updater configuration.
///
/// Missing fields fall back to their defaults, so older settings files keep
/// loading after new fields are added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdaterSettings {
    /// Interval between MIDI destination scans.
    pub scan_interval_ms: u64,

    /// Interval between DFU status polls.
    pub status_poll_interval_ms: u64,

    /// Length of one reboot countdown tick.
    pub reboot_tick_ms: u64,

    /// Countdown ticks allowed between the enable command and the BLE scan.
    pub reboot_budget_ticks: u32,

    /// Delay before MIDI scanning resumes after a completed update.
    pub resume_scan_delay_ms: u64,

    /// Chunks written per flow-control cycle (1-4).
    pub chunk_batch_size: u8,

    /// Substrings identifying the device among MIDI destinations.
    pub device_name_patterns: Vec<String>,

    /// Substrings identifying the device among BLE advertisements.
    /// Empty accepts any peripheral.
    pub transfer_name_patterns: Vec<String>,

    /// Directory searched before the bundled firmware.
    pub preferred_firmware_dir: Option<PathBuf>,

    /// Firmware shipped with the application.
    pub bundled_firmware_dir: PathBuf,

    /// Firmware file suffix.
    pub firmware_suffix: String,

    /// Version tags offered for flashing.
    pub firmware_versions: Vec<String>,

    /// Version preselected from `firmware_versions`.
    pub default_firmware_version: String,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            scan_interval_ms: PORT_SCAN_INTERVAL.as_millis() as u64,
            status_poll_interval_ms: STATUS_POLL_INTERVAL.as_millis() as u64,
            reboot_tick_ms: REBOOT_TICK_INTERVAL.as_millis() as u64,
            reboot_budget_ticks: REBOOT_BUDGET_TICKS,
            resume_scan_delay_ms: RESUME_SCAN_DELAY.as_millis() as u64,
            chunk_batch_size: DEFAULT_CHUNK_BATCH_SIZE,
            device_name_patterns: DEVICE_NAME_PATTERNS.iter().map(|p| p.to_string()).collect(),
            transfer_name_patterns: TRANSFER_NAME_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            preferred_firmware_dir: None,
            bundled_firmware_dir: PathBuf::from(FIRMWARE_DIR_NAME),
            firmware_suffix: FIRMWARE_SUFFIX.to_string(),
            firmware_versions: KNOWN_FIRMWARE_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            default_firmware_version: DEFAULT_FIRMWARE_VERSION.to_string(),
        }
    }
}

impl UpdaterSettings {
    /// Copy with every value pulled into its supported range.
    pub fn normalized(mut self) -> Self {
        self.scan_interval_ms = self.scan_interval_ms.max(MIN_INTERVAL_MS);
        self.status_poll_interval_ms = self.status_poll_interval_ms.max(MIN_INTERVAL_MS);
        self.reboot_tick_ms = self.reboot_tick_ms.max(MIN_INTERVAL_MS);
        self.reboot_budget_ticks = self.reboot_budget_ticks.max(MIN_REBOOT_BUDGET_TICKS);
        self.chunk_batch_size = clamp_chunk_batch_size(self.chunk_batch_size);
        if self.device_name_patterns.is_empty() {
            warn!("No MIDI device name patterns configured, using defaults");
            self.device_name_patterns = Self::default().device_name_patterns;
        }
        if self.firmware_suffix.is_empty() {
            self.firmware_suffix = FIRMWARE_SUFFIX.to_string();
        }
        self.firmware_versions.retain(|v| is_valid_version_tag(v));
        if self.firmware_versions.is_empty() {
            warn!("No valid firmware versions configured, using defaults");
            self.firmware_versions = Self::default().firmware_versions;
        }
        if !self.firmware_versions.contains(&self.default_firmware_version) {
            self.default_firmware_version = self.firmware_versions[0].clone();
        }
        self
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn reboot_tick(&self) -> Duration {
        Duration::from_millis(self.reboot_tick_ms)
    }

    pub fn resume_scan_delay(&self) -> Duration {
        Duration::from_millis(self.resume_scan_delay_ms)
    }

    /// Build the default directory-backed firmware source.
    pub fn firmware_source(&self) -> DirFirmwareSource {
        DirFirmwareSource::new(
            self.preferred_firmware_dir.clone(),
            self.bundled_firmware_dir.clone(),
        )
        .with_suffix(self.firmware_suffix.clone())
    }

    /// Check if these settings differ from defaults.
    pub fn has_non_default_settings(&self) -> bool {
        *self != Self::default()
    }
}

/// Settings file name stored in app data directory.
const SETTINGS_FILENAME: &str = "updater_settings.json";

/// Manages persistence of updater settings to JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager for the given app data directory.
    pub fn new(app_data_dir: &Path) -> Self {
        let settings_file_path = app_data_dir.join(SETTINGS_FILENAME);
        Self { settings_file_path }
    }

    /// Load settings from disk, returning defaults if file doesn't exist.
    pub fn load(&self) -> DfuResult<UpdaterSettings> {
        if !self.settings_file_path.exists() {
            debug!(
                "No settings at {}, using defaults",
                self.settings_file_path.display()
            );
            return Ok(UpdaterSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(UpdaterSettings::default());
        }

        let settings: UpdaterSettings = serde_json::from_str(&contents)?;
        Ok(settings.normalized())
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &UpdaterSettings) -> DfuResult<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_file_path, contents)?;

        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}
