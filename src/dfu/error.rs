//! Error types for the SWIFT update handshake and BLE transfer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for DFU operations.
pub type DfuResult<T> = Result<T, DfuError>;

/// Errors that can occur during DFU operations.
#[derive(Debug, Error)]
pub enum DfuError {
    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error for persisted settings.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A MIDI command was issued with no destination selected.
    #[error("MIDI destination not found or not selected")]
    NoDestinationSelected,

    /// The MIDI port rejected an outgoing message.
    #[error("Failed to send MIDI message: {reason}")]
    MidiSend { reason: String },

    /// No firmware image exists for the requested version.
    #[error("Firmware file {version}{suffix} not found")]
    ImageNotFound { version: String, suffix: String },

    /// The firmware image exists but holds no data.
    #[error("Firmware file {version} is empty")]
    EmptyImage { version: String },

    /// Operation is not valid in the current transfer state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Configuration change attempted during a transfer.
    #[error("Cannot change settings while a transfer is in progress")]
    TransferInProgress,

    /// BLE connection or bonding failed.
    #[error("Failed to connect: {reason}")]
    LinkConnectFailed { reason: String },

    /// A BLE write failed.
    #[error("Write failed: {reason}")]
    LinkWriteFailed { reason: String },

    /// BLE link dropped during an operation.
    #[error("Device disconnected during {operation}")]
    LinkDisconnected { operation: String },

    /// The updater event loop has shut down.
    #[error("Updater is not running")]
    UpdaterStopped,
}

/// Why a transfer ended in the failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    ImageNotFound,
    LinkConnectFailed,
    LinkWriteFailed,
    LinkDisconnected,
}

impl DfuError {
    /// Map a transfer-fatal error to the reason recorded in the session state.
    ///
    /// Returns `None` for errors that never end a transfer.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            DfuError::ImageNotFound { .. } | DfuError::EmptyImage { .. } => {
                Some(FailureReason::ImageNotFound)
            }
            DfuError::LinkConnectFailed { .. } => Some(FailureReason::LinkConnectFailed),
            DfuError::LinkWriteFailed { .. } => Some(FailureReason::LinkWriteFailed),
            DfuError::LinkDisconnected { .. } => Some(FailureReason::LinkDisconnected),
            _ => None,
        }
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            DfuError::Io(_) => "DFU-002",
            DfuError::Json(_) => "DFU-004",
            DfuError::NoDestinationSelected => "DFU-010",
            DfuError::MidiSend { .. } => "DFU-011",
            DfuError::ImageNotFound { .. } => "DFU-040",
            DfuError::EmptyImage { .. } => "DFU-041",
            DfuError::InvalidState { .. } => "DFU-060",
            DfuError::TransferInProgress => "DFU-061",
            DfuError::LinkConnectFailed { .. } => "DFU-050",
            DfuError::LinkDisconnected { .. } => "DFU-051",
            DfuError::LinkWriteFailed { .. } => "DFU-052",
            DfuError::UpdaterStopped => "DFU-070",
        }
    }
}
