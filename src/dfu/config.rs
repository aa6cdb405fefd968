//! Configuration constants for the SWIFT update handshake and BLE transfer.

use std::time::Duration;

// ============================================================================
// MIDI Command/Status Link
// ============================================================================

/// Control Change status byte on channel 1 (0xB0-0xBF for channels 1-16).
pub const MIDI_CONTROL_CHANGE: u8 = 0xB0;

/// Mask selecting the message type nibble of a MIDI status byte.
pub const MIDI_STATUS_TYPE_MASK: u8 = 0xF0;

/// CC#90: DFU mode status (request and response).
pub const CC_DFU_STATUS: u8 = 0x5A;

/// CC#91: enable DFU mode.
pub const CC_DFU_ENABLE: u8 = 0x5B;

/// Value sent with the enable command. The device treats it as advisory.
pub const DFU_ENABLE_VALUE: u8 = 1;

/// Value sent with a status poll. Ignored by the device.
pub const STATUS_POLL_VALUE: u8 = 0;

/// Name substrings identifying the device among MIDI destinations.
pub const DEVICE_NAME_PATTERNS: &[&str] = &["XIAO_ESP32S3", "SWIFT"];

/// Product name used in status descriptions.
pub const DEVICE_DISPLAY_NAME: &str = "SWIFT";

// ============================================================================
// Status Codes
// ============================================================================

/// Device running its application firmware.
pub const STATUS_NORMAL: u8 = 0;

/// DFU mode requested but the bootloader is not active yet.
pub const STATUS_ENABLED_NOT_ACTIVE: u8 = 1;

/// Lowest status value that carries the running firmware version.
pub const STATUS_VERSION_MIN: u8 = 6;

/// Highest status value that carries the running firmware version.
pub const STATUS_VERSION_MAX: u8 = 126;

/// Device is in DFU mode and ready for a BLE transfer.
pub const STATUS_UPDATE_READY: u8 = 127;

// ============================================================================
// Timing
// ============================================================================

/// Interval between MIDI destination scans.
pub const PORT_SCAN_INTERVAL: Duration = Duration::from_millis(2000);

/// Interval between DFU status polls.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Length of one reboot countdown tick.
pub const REBOOT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Countdown budget, in ticks, after sending the enable command.
pub const REBOOT_BUDGET_TICKS: u32 = 10;

/// Polling stops this many ticks into the countdown.
pub const POLL_STOP_MARGIN_TICKS: u32 = 3;

/// Smallest accepted countdown budget. Keeps the polling cutoff ahead of expiry.
pub const MIN_REBOOT_BUDGET_TICKS: u32 = POLL_STOP_MARGIN_TICKS + 1;

/// Delay before scanning MIDI again once the device restarts after an update.
pub const RESUME_SCAN_DELAY: Duration = Duration::from_millis(5000);

// ============================================================================
// BLE Transfer
// ============================================================================

/// Smallest number of chunks written per flow-control cycle.
pub const MIN_CHUNK_BATCH_SIZE: u8 = 1;

/// Largest number of chunks written per flow-control cycle.
pub const MAX_CHUNK_BATCH_SIZE: u8 = 4;

/// Default number of chunks written per flow-control cycle.
pub const DEFAULT_CHUNK_BATCH_SIZE: u8 = 4;

/// ATT header bytes consumed from each write.
pub const ATT_HEADER_LEN: usize = 3;

/// Chunk size for the minimum BLE MTU (23 - ATT header).
pub const MIN_CHUNK_SIZE: usize = 20;

/// Name substrings identifying the device among BLE advertisements.
pub const TRANSFER_NAME_PATTERNS: &[&str] = &["XIAO_ESP32S3", "SWIFT"];

// ============================================================================
// Firmware Images
// ============================================================================

/// Firmware versions offered for flashing.
pub const KNOWN_FIRMWARE_VERSIONS: &[&str] = &["V8", "V9", "V10"];

/// Version selected when nothing else was chosen.
pub const DEFAULT_FIRMWARE_VERSION: &str = "V8";

/// File suffix of firmware binaries.
pub const FIRMWARE_SUFFIX: &str = ".bin";

/// Preferred directory name for firmware binaries.
pub const FIRMWARE_DIR_NAME: &str = "firmware";

// ============================================================================
// Helper Functions
// ============================================================================

/// Clamp a requested batch size into the supported range.
pub fn clamp_chunk_batch_size(requested: u8) -> u8 {
    requested.clamp(MIN_CHUNK_BATCH_SIZE, MAX_CHUNK_BATCH_SIZE)
}

/// Chunk size that fits a single write for the negotiated MTU.
pub fn chunk_size_for_mtu(mtu: usize) -> usize {
    std::cmp::max(MIN_CHUNK_SIZE, mtu.saturating_sub(ATT_HEADER_LEN))
}

/// Check if a MIDI destination name belongs to a known device.
pub fn matches_name_pattern<S: AsRef<str>>(name: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| name.contains(pattern.as_ref()))
}
