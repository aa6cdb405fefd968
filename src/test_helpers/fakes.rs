use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dfu::{BleLink, DfuError, DfuResult, Peripheral, TimerDriver, TimerKind, TimerSpec};
use crate::traits::{MidiEndpoint, MidiPort};

// ============================================================================
// Timers
// ============================================================================

#[derive(Debug, Default)]
struct ManualTimerState {
    armed: HashMap<TimerKind, TimerSpec>,
    arm_counts: HashMap<TimerKind, usize>,
}

/// Timer driver that records arm/disarm calls instead of scheduling.
///
/// Tests deliver ticks by hand using the recorded generation.
#[derive(Debug, Clone, Default)]
pub struct ManualTimers {
    state: Arc<Mutex<ManualTimerState>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self) -> Arc<dyn TimerDriver> {
        Arc::new(self.clone())
    }

    /// Generation of the armed instance, `None` when disarmed.
    pub fn generation(&self, kind: TimerKind) -> Option<u64> {
        self.spec(kind).map(|spec| spec.generation)
    }

    pub fn spec(&self, kind: TimerKind) -> Option<TimerSpec> {
        self.state.lock().unwrap().armed.get(&kind).copied()
    }

    /// How many times `kind` was armed.
    pub fn arm_count(&self, kind: TimerKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .arm_counts
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }
}

impl TimerDriver for ManualTimers {
    fn arm(&self, spec: TimerSpec) {
        let mut state = self.state.lock().unwrap();
        *state.arm_counts.entry(spec.kind).or_insert(0) += 1;
        state.armed.insert(spec.kind, spec);
    }

    fn disarm(&self, kind: TimerKind) {
        self.state.lock().unwrap().armed.remove(&kind);
    }
}

// ============================================================================
// MIDI
// ============================================================================

/// MIDI port with a mutable destination list that records sent messages.
#[derive(Debug, Clone, Default)]
pub struct FakeMidiPort {
    destinations: Arc<Mutex<Vec<MidiEndpoint>>>,
    sent: Arc<Mutex<Vec<[u8; 3]>>>,
}

impl FakeMidiPort {
    pub fn with_destinations(names: &[&str]) -> Self {
        let port = Self::default();
        port.set_destinations(names);
        port
    }

    pub fn set_destinations(&self, names: &[&str]) {
        *self.destinations.lock().unwrap() = names
            .iter()
            .enumerate()
            .map(|(i, name)| MidiEndpoint::new(i as u32 + 1, *name))
            .collect();
    }

    /// Shared log of sent messages.
    pub fn sent(&self) -> Arc<Mutex<Vec<[u8; 3]>>> {
        self.sent.clone()
    }
}

impl MidiPort for FakeMidiPort {
    fn destinations(&self) -> Vec<MidiEndpoint> {
        self.destinations.lock().unwrap().clone()
    }

    fn send(&mut self, endpoint: &MidiEndpoint, message: [u8; 3]) -> DfuResult<()> {
        let visible = self
            .destinations
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.id == endpoint.id);
        if !visible {
            return Err(DfuError::MidiSend {
                reason: format!("{} is gone", endpoint.name),
            });
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// ============================================================================
// BLE
// ============================================================================

/// One call made on the fake BLE link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    StartScan,
    StopScan,
    Connect(String),
    Bond,
    Write(usize),
    Disconnect,
    ForgetBond,
}

#[derive(Debug, Default)]
struct FakeBleState {
    calls: Vec<LinkCall>,
    writes: Vec<Vec<u8>>,
    fail_scan: bool,
    fail_writes: bool,
}

/// BLE link that records calls. Events are fed to the session by the test.
#[derive(Debug, Clone, Default)]
pub struct FakeBleLink {
    state: Arc<Mutex<FakeBleState>>,
}

impl FakeBleLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn fail_scan(&self, fail: bool) {
        self.state.lock().unwrap().fail_scan = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    fn record(&self, call: LinkCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl BleLink for FakeBleLink {
    fn start_scan(&mut self) -> DfuResult<()> {
        self.record(LinkCall::StartScan);
        if self.state.lock().unwrap().fail_scan {
            return Err(DfuError::LinkConnectFailed {
                reason: "Bluetooth is powered off".into(),
            });
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.record(LinkCall::StopScan);
    }

    fn connect(&mut self, peripheral: &Peripheral) -> DfuResult<()> {
        self.record(LinkCall::Connect(peripheral.id.clone()));
        Ok(())
    }

    fn bond(&mut self) -> DfuResult<()> {
        self.record(LinkCall::Bond);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> DfuResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(DfuError::LinkWriteFailed {
                reason: "characteristic not writable".into(),
            });
        }
        state.calls.push(LinkCall::Write(chunk.len()));
        state.writes.push(chunk.to_vec());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.record(LinkCall::Disconnect);
    }

    fn forget_bond(&mut self) {
        self.record(LinkCall::ForgetBond);
    }
}
