//! Firmware update for the SWIFT over MIDI and BLE.
//!
//! # Update Overview
//!
//! The update process consists of:
//! 1. **Device Detection** - Find the SWIFT among MIDI destinations by name
//! 2. **Mode Request** - Send CC#91 and start the reboot countdown
//! 3. **Confirmation** - Poll CC#90 until the device reports 127 (DFU mode)
//! 4. **BLE Connect** - Scan, connect and bond on the transfer link
//! 5. **Firmware Transfer** - Stream `<version>.bin` in flow-controlled batches
//! 6. **Restart** - The device drops the link and reboots into the new firmware
//!
//! Every component here is a synchronous state machine. The event loop in
//! [`crate::updater`] owns them and feeds them ticks, MIDI messages and
//! link events one at a time.

pub mod config;
mod device;
mod error;
mod firmware_reader;
mod handshake;
mod midi;
mod reboot;
mod session;
mod status;
mod timer;
mod transport;

// Device detection
pub use device::{DevicePresence, DeviceScanner, ScanOutcome};

// Errors
pub use error::{DfuError, DfuResult, FailureReason};

// Firmware lookup
pub use firmware_reader::{
    calculate_sha256, is_valid_version_tag, DirFirmwareSource, FirmwareImage, FirmwareSource,
    ImageOrigin,
};

// Handshake
pub use handshake::{HandshakeState, ModeTransitionController, StatusOutcome};
pub use midi::{decode_packet, CommandLink, MidiMessage};
pub use reboot::{RebootAction, RebootSequencer, RebootState};
pub use status::{classify, DfuStatusCode};

// Transfer
pub use session::{TransferConfig, TransferObserver, TransferSession, TransferSnapshot, TransferState};
pub use transport::{BleLink, LinkEvent, Peripheral};

// Scheduling
pub use timer::{Timer, TimerDriver, TimerKind, TimerSpec};

#[cfg(test)]
pub use firmware_reader::MockFirmwareSource;
#[cfg(test)]
pub use transport::MockBleLink;
