//! BLE transport layer for the firmware transfer.
//!
//! Provides a trait-based abstraction over the host BLE stack,
//! enabling both real hardware and mock testing. Calls on the trait only
//! issue requests; their outcomes come back asynchronously as
//! [`LinkEvent`]s through the updater's event channel.

use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use super::error::DfuResult;

/// A BLE peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    /// Stack-specific peripheral identifier.
    pub id: String,
    /// Advertised local name.
    pub name: String,
}

impl Peripheral {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Asynchronous notifications from the BLE stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A peripheral was discovered while scanning.
    Discovered(Peripheral),
    /// Connection established with the negotiated ATT MTU.
    Connected { mtu: usize },
    /// Connection attempt failed.
    ConnectFailed { reason: String },
    /// Pairing/encryption completed.
    Bonded,
    /// Pairing failed or was rejected.
    BondFailed { reason: String },
    /// One previously issued write has been accepted by the link layer.
    WriteCompleted,
    /// A previously issued write failed.
    WriteFailed { reason: String },
    /// The link dropped (either side).
    Disconnected,
}

/// Trait for BLE transfer link operations.
///
/// Each write issued through [`BleLink::write`] is answered by exactly one
/// `WriteCompleted` or `WriteFailed` event, which is what the chunk loop
/// uses as its flow-control credit.
#[cfg_attr(test, automock)]
pub trait BleLink: Send {
    /// Begin discovery of peripherals.
    fn start_scan(&mut self) -> DfuResult<()>;

    /// Stop discovery. Safe to call when not scanning.
    fn stop_scan(&mut self);

    /// Connect to a discovered peripheral.
    fn connect(&mut self, peripheral: &Peripheral) -> DfuResult<()>;

    /// Request pairing/bonding on the active connection.
    ///
    /// Stacks that already hold a bond may answer with `Bonded` right away.
    fn bond(&mut self) -> DfuResult<()>;

    /// Queue one chunk for writing on the firmware characteristic.
    fn write(&mut self, chunk: &[u8]) -> DfuResult<()>;

    /// Tear down the active connection. Safe to call when not connected.
    fn disconnect(&mut self);

    /// Discard persisted bonding/identity for the peripheral.
    fn forget_bond(&mut self);
}
