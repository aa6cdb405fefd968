//! Classification of DFU status values reported over MIDI CC#90.
//!
//! This is the only place a raw status byte is interpreted.

use serde::{Deserialize, Serialize};

use super::config::{
    DEVICE_DISPLAY_NAME, STATUS_ENABLED_NOT_ACTIVE, STATUS_NORMAL, STATUS_UPDATE_READY,
    STATUS_VERSION_MAX, STATUS_VERSION_MIN,
};

/// Semantic device state decoded from a status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "value")]
pub enum DfuStatusCode {
    /// Running application firmware.
    Normal,
    /// DFU requested, bootloader not active yet.
    EnabledNotActive,
    /// Running application firmware, reporting its version.
    NormalWithVersion(u8),
    /// In DFU mode, ready for the BLE transfer.
    UpdateReady,
    /// Anything else.
    Unrecognized(u8),
}

impl DfuStatusCode {
    /// Classify a raw status value. Every byte maps to exactly one code.
    pub fn classify(value: u8) -> Self {
        match value {
            STATUS_NORMAL => DfuStatusCode::Normal,
            STATUS_ENABLED_NOT_ACTIVE => DfuStatusCode::EnabledNotActive,
            STATUS_VERSION_MIN..=STATUS_VERSION_MAX => DfuStatusCode::NormalWithVersion(value),
            STATUS_UPDATE_READY => DfuStatusCode::UpdateReady,
            other => DfuStatusCode::Unrecognized(other),
        }
    }

    /// Whether the device reports it is ready to receive firmware.
    pub fn is_update_ready(&self) -> bool {
        matches!(self, DfuStatusCode::UpdateReady)
    }

    /// Firmware version carried by the status, if any.
    pub fn firmware_version(&self) -> Option<u8> {
        match self {
            DfuStatusCode::NormalWithVersion(version) => Some(*version),
            _ => None,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        match self {
            DfuStatusCode::Normal => format!("{} is in normal mode", DEVICE_DISPLAY_NAME),
            DfuStatusCode::EnabledNotActive => "DFU mode enabled but not active".into(),
            DfuStatusCode::NormalWithVersion(version) => format!(
                "{} is in normal mode, running V{}",
                DEVICE_DISPLAY_NAME, version
            ),
            DfuStatusCode::UpdateReady => format!("{} is in DFU mode", DEVICE_DISPLAY_NAME),
            DfuStatusCode::Unrecognized(value) => format!("Unknown status code: {}", value),
        }
    }
}

/// Classify a raw status value.
pub fn classify(value: u8) -> DfuStatusCode {
    DfuStatusCode::classify(value)
}
