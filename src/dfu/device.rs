//! Device detection on the MIDI command link.
//!
//! Detects the SWIFT by matching MIDI destination names against known
//! substrings.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::config::matches_name_pattern;
use crate::traits::MidiEndpoint;

/// Reachability of the device on the command link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePresence {
    Unknown,
    Scanning,
    Connected,
    Disconnected,
}

/// Result of one periodic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Check skipped because DFU mode is confirmed.
    Suppressed,
    /// Device newly found; the endpoint should be selected.
    Connected(MidiEndpoint),
    /// Device was already connected and is still present.
    StillConnected,
    /// No matching destination is visible.
    Disconnected,
}

/// Periodic presence check over the MIDI destinations.
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    presence: DevicePresence,
    patterns: Vec<String>,
    scan_count: u32,
    device_name: String,
}

impl DeviceScanner {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            presence: DevicePresence::Unknown,
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            scan_count: 0,
            device_name: String::new(),
        }
    }

    /// Run one check against the currently visible destinations.
    ///
    /// While DFU mode is confirmed the device is expected to vanish from
    /// MIDI, so presence is left untouched.
    pub fn scan(&mut self, destinations: &[MidiEndpoint], dfu_confirmed: bool) -> ScanOutcome {
        if dfu_confirmed {
            return ScanOutcome::Suppressed;
        }

        self.scan_count += 1;
        let previous = self.presence;
        self.presence = DevicePresence::Scanning;

        let found = destinations
            .iter()
            .find(|destination| matches_name_pattern(&destination.name, self.patterns.as_slice()));

        match found {
            None => {
                if previous != DevicePresence::Disconnected {
                    info!(
                        "No MIDI destination matches any of: {}",
                        self.patterns.join(", ")
                    );
                }
                self.presence = DevicePresence::Disconnected;
                self.device_name.clear();
                ScanOutcome::Disconnected
            }
            Some(endpoint) if previous != DevicePresence::Connected => {
                info!("Device connected: {}", endpoint.name);
                self.presence = DevicePresence::Connected;
                self.device_name = endpoint.name.clone();
                ScanOutcome::Connected(endpoint.clone())
            }
            Some(_) => {
                debug!("MIDI scan #{}: device still present", self.scan_count);
                self.presence = DevicePresence::Connected;
                ScanOutcome::StillConnected
            }
        }
    }

    /// Forget the current device so the next scan reselects it.
    pub fn reset(&mut self) {
        self.presence = DevicePresence::Unknown;
        self.device_name.clear();
    }

    pub fn presence(&self) -> DevicePresence {
        self.presence
    }

    pub fn scan_count(&self) -> u32 {
        self.scan_count
    }

    /// Name of the connected destination, empty when not connected.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Get a display label for the connection.
    pub fn connection_status_message(&self) -> String {
        match self.presence {
            DevicePresence::Unknown => "Initializing...".into(),
            DevicePresence::Scanning => {
                format!("Searching for device... (Scan #{})", self.scan_count)
            }
            DevicePresence::Connected => format!("Connected to {} via USB", self.device_name),
            DevicePresence::Disconnected => "Device not found (Retrying...)".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfu::config::DEVICE_NAME_PATTERNS;

    fn destinations(names: &[&str]) -> Vec<MidiEndpoint> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| MidiEndpoint::new(i as u32, *name))
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let scanner = DeviceScanner::new(DEVICE_NAME_PATTERNS);
        assert_eq!(scanner.presence(), DevicePresence::Unknown);
        assert_eq!(scanner.connection_status_message(), "Initializing...");
    }

    #[test]
    fn test_connects_on_first_match() {
        let mut scanner = DeviceScanner::new(DEVICE_NAME_PATTERNS);
        let visible = destinations(&["IAC Driver Bus 1", "SWIFT Bluetooth"]);

        let outcome = scanner.scan(&visible, false);

        assert_eq!(outcome, ScanOutcome::Connected(visible[1].clone()));
        assert_eq!(scanner.presence(), DevicePresence::Connected);
        assert_eq!(
            scanner.connection_status_message(),
            "Connected to SWIFT Bluetooth via USB"
        );
    }

    #[test]
    fn test_does_not_reconnect_while_connected() {
        let mut scanner = DeviceScanner::new(DEVICE_NAME_PATTERNS);
        let visible = destinations(&["XIAO_ESP32S3"]);

        assert!(matches!(scanner.scan(&visible, false), ScanOutcome::Connected(_)));
        assert_eq!(scanner.scan(&visible, false), ScanOutcome::StillConnected);
        assert_eq!(scanner.scan(&visible, false), ScanOutcome::StillConnected);
        assert_eq!(scanner.presence(), DevicePresence::Connected);
        assert_eq!(scanner.scan_count(), 3);
    }

    #[test]
    fn test_disconnect_and_reconnect() {
        let mut scanner = DeviceScanner::new(DEVICE_NAME_PATTERNS);
        let visible = destinations(&["SWIFT"]);

        scanner.scan(&visible, false);
        assert_eq!(scanner.scan(&[], false), ScanOutcome::Disconnected);
        assert_eq!(scanner.presence(), DevicePresence::Disconnected);
        assert_eq!(scanner.device_name(), "");
        assert_eq!(
            scanner.connection_status_message(),
            "Device not found (Retrying...)"
        );

        assert!(matches!(scanner.scan(&visible, false), ScanOutcome::Connected(_)));
    }

    #[test]
    fn test_suppressed_while_dfu_confirmed() {
        let mut scanner = DeviceScanner::new(DEVICE_NAME_PATTERNS);
        scanner.scan(&destinations(&["SWIFT"]), false);

        // Device reboots into DFU and vanishes from MIDI
        assert_eq!(scanner.scan(&[], true), ScanOutcome::Suppressed);
        assert_eq!(scanner.presence(), DevicePresence::Connected);
        assert_eq!(scanner.scan_count(), 1);
    }

    #[test]
    fn test_custom_patterns() {
        let mut scanner = DeviceScanner::new(&["Bench Unit".to_string()]);
        assert_eq!(
            scanner.scan(&destinations(&["SWIFT"]), false),
            ScanOutcome::Disconnected
        );
        assert!(matches!(
            scanner.scan(&destinations(&["Bench Unit 2"]), false),
            ScanOutcome::Connected(_)
        ));
    }
}
