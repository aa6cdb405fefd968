//! MIDI command/status link.
//!
//! Commands and status travel as 3-byte Control Change messages:
//! `[0xB0, control number, value]`.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use super::config::{
    CC_DFU_ENABLE, CC_DFU_STATUS, DFU_ENABLE_VALUE, MIDI_CONTROL_CHANGE, MIDI_STATUS_TYPE_MASK,
    STATUS_POLL_VALUE,
};
use super::error::DfuError;
use crate::traits::{MidiEndpoint, MidiPort};

/// A decoded Control Change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiMessage {
    pub control: u8,
    pub value: u8,
}

impl MidiMessage {
    pub fn new(control: u8, value: u8) -> Self {
        Self { control, value }
    }

    /// Wire bytes for this message on channel 1.
    pub fn to_bytes(&self) -> [u8; 3] {
        [MIDI_CONTROL_CHANGE, self.control, self.value]
    }

    /// Whether this is a DFU status message.
    pub fn is_status(&self) -> bool {
        self.control == CC_DFU_STATUS
    }
}

/// Check if a status byte is a Control Change on any channel.
pub fn is_control_change(status: u8) -> bool {
    status & MIDI_STATUS_TYPE_MASK == MIDI_CONTROL_CHANGE
}

/// Extract every Control Change message from a raw MIDI packet.
///
/// Bytes that do not start a complete Control Change are skipped.
pub fn decode_packet(data: &[u8]) -> Vec<MidiMessage> {
    let mut messages = Vec::new();
    let mut index = 0;

    while index < data.len() {
        let status = data[index];
        if is_control_change(status) && index + 2 < data.len() {
            let message = MidiMessage::new(data[index + 1], data[index + 2]);
            trace!(
                "Received MIDI CC #{} with value {} (channel {})",
                message.control,
                message.value,
                status & 0x0F
            );
            messages.push(message);
            index += 3;
        } else {
            index += 1;
        }
    }

    messages
}

/// Outgoing side of the command link, bound to one selected destination.
pub struct CommandLink<P: MidiPort> {
    port: P,
    selected: Option<MidiEndpoint>,
}

impl<P: MidiPort> CommandLink<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            selected: None,
        }
    }

    /// Enumerate destinations visible to the host.
    pub fn destinations(&self) -> Vec<MidiEndpoint> {
        self.port.destinations()
    }

    pub fn select(&mut self, endpoint: MidiEndpoint) {
        debug!("Selected MIDI destination: {}", endpoint.name);
        self.selected = Some(endpoint);
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&MidiEndpoint> {
        self.selected.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.selected.is_some()
    }

    /// Send a Control Change to the selected destination.
    ///
    /// Never fails towards the caller: a missing destination or a port error
    /// is logged and the message dropped.
    pub fn send(&mut self, control: u8, value: u8) {
        let Some(endpoint) = self.selected.as_ref() else {
            warn!(
                "{} (dropping CC #{} value {})",
                DfuError::NoDestinationSelected,
                control,
                value
            );
            return;
        };

        let message = MidiMessage::new(control, value);
        match self.port.send(endpoint, message.to_bytes()) {
            Ok(()) => debug!(
                "Sent MIDI message: CC #{} value {} to {}",
                control, value, endpoint.name
            ),
            Err(e) => warn!("MIDI send to {} failed: {}", endpoint.name, e),
        }
    }

    /// Ask the device to reboot into DFU mode.
    pub fn send_enable_update_mode(&mut self) {
        self.send(CC_DFU_ENABLE, DFU_ENABLE_VALUE);
    }

    /// Ask the device to report its DFU status.
    pub fn send_status_poll(&mut self) {
        self.send(CC_DFU_STATUS, STATUS_POLL_VALUE);
    }
}
