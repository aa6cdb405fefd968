use serde::{Deserialize, Serialize};

use crate::dfu::DfuResult;

#[cfg(test)]
use mockall::automock;

/// A MIDI destination as enumerated by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEndpoint {
    /// Host-assigned endpoint reference.
    pub id: u32,
    /// Display name (e.g. "SWIFT Bluetooth").
    pub name: String,
}

impl MidiEndpoint {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Abstraction over the host MIDI system (CoreMIDI, ALSA, WinMM...).
/// Inbound packets are pushed through `EventSender::midi_packet`, so this
/// trait only covers enumeration and output.
#[cfg_attr(test, automock)]
pub trait MidiPort: Send {
    /// Enumerate the destinations currently visible to the host.
    fn destinations(&self) -> Vec<MidiEndpoint>;

    /// Send one 3-byte message to a destination.
    fn send(&mut self, endpoint: &MidiEndpoint, message: [u8; 3]) -> DfuResult<()>;
}
