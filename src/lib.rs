//! Core of the Shiftwave SWIFT firmware updater.
//!
//! The SWIFT is commanded into DFU mode over MIDI (CC#91), confirmed by
//! polling its status (CC#90), and then receives the new firmware over BLE.
//! Platform MIDI and BLE stacks plug in through [`traits::MidiPort`] and
//! [`dfu::BleLink`]; [`updater::Updater`] runs everything on one tokio task.

pub mod dfu;
pub mod settings;
pub mod traits;
pub mod updater;

#[cfg(test)]
mod test_helpers;

pub use dfu::{DfuError, DfuResult};
pub use settings::{SettingsManager, UpdaterSettings};
pub use updater::{Command, Event, EventSender, Updater, UpdaterHandle, UpdaterSnapshot};
