//! The updater event loop.
//!
//! One tokio task owns the handshake controller, the reboot countdown and
//! the transfer session. Everything that can change them (timer ticks,
//! inbound MIDI, BLE link events, caller commands) arrives as an [`Event`]
//! on a single channel and is applied in order. State is published to
//! observers through a watch channel after every event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::dfu::{
    decode_packet, BleLink, DevicePresence, DfuError, DfuResult, FailureReason, FirmwareSource,
    HandshakeState, LinkEvent, MidiMessage, ModeTransitionController, RebootAction,
    RebootSequencer, RebootState, StatusOutcome, TimerDriver, TimerKind, TimerSpec,
    TransferConfig, TransferSession, TransferSnapshot, TransferState,
};
use crate::settings::UpdaterSettings;
use crate::traits::MidiPort;

/// Caller requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RequestUpdateMode,
    StartScanning,
    SendFile { version: String },
    SetChunkBatchSize(u8),
    Disconnect { forget: bool },
    CheckHardware,
    Shutdown,
}

/// Everything the event loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Tick { kind: TimerKind, generation: u64 },
    Midi(MidiMessage),
    Link(LinkEvent),
    Command(Command),
}

/// Entry point for platform adapters (MIDI input, BLE stack callbacks).
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Decode a raw MIDI packet and queue every Control Change in it.
    ///
    /// Returns false once the updater has stopped.
    pub fn midi_packet(&self, data: &[u8]) -> bool {
        decode_packet(data)
            .into_iter()
            .all(|message| self.send(Event::Midi(message)))
    }

    pub fn midi_message(&self, message: MidiMessage) -> bool {
        self.send(Event::Midi(message))
    }

    pub fn link_event(&self, event: LinkEvent) -> bool {
        self.send(Event::Link(event))
    }

    fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Coarse progress through the whole update, for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "data", rename_all = "camelCase")]
pub enum UpdateStage {
    SearchingDevice,
    DeviceConnected,
    EnteringUpdateMode { remaining_ticks: u32 },
    UpdateModeConfirmed,
    ConfirmationTimedOut,
    ConnectingBle,
    ReadyToTransfer,
    Uploading { sent: usize, total: usize },
    Complete,
    Failed(FailureReason),
}

impl UpdateStage {
    /// Derive the stage from component states. The transfer link wins once
    /// it is active.
    pub fn derive(
        presence: DevicePresence,
        handshake: HandshakeState,
        transfer: TransferState,
    ) -> Self {
        match transfer {
            TransferState::Scanning | TransferState::Connecting | TransferState::Bonding => {
                return UpdateStage::ConnectingBle
            }
            TransferState::Ready => return UpdateStage::ReadyToTransfer,
            TransferState::Transferring {
                bytes_sent,
                bytes_total,
            } => {
                return UpdateStage::Uploading {
                    sent: bytes_sent,
                    total: bytes_total,
                }
            }
            TransferState::Completed => return UpdateStage::Complete,
            TransferState::Failed(reason) => return UpdateStage::Failed(reason),
            TransferState::Idle => {}
        }

        match handshake {
            HandshakeState::AwaitingConfirmation { remaining_ticks } => {
                UpdateStage::EnteringUpdateMode { remaining_ticks }
            }
            HandshakeState::Confirmed => UpdateStage::UpdateModeConfirmed,
            HandshakeState::TimedOut => UpdateStage::ConfirmationTimedOut,
            HandshakeState::Idle if presence == DevicePresence::Connected => {
                UpdateStage::DeviceConnected
            }
            HandshakeState::Idle => UpdateStage::SearchingDevice,
        }
    }

    /// Get a percentage estimate for this stage.
    pub fn percent(&self) -> f32 {
        match self {
            UpdateStage::SearchingDevice => 0.0,
            UpdateStage::DeviceConnected => 2.0,
            UpdateStage::EnteringUpdateMode { .. } => 5.0,
            UpdateStage::UpdateModeConfirmed | UpdateStage::ConfirmationTimedOut => 8.0,
            UpdateStage::ConnectingBle => 10.0,
            UpdateStage::ReadyToTransfer => 12.0,
            UpdateStage::Uploading { sent, total } => {
                if *total == 0 {
                    12.0
                } else {
                    12.0 + (*sent as f32 / *total as f32) * 88.0
                }
            }
            UpdateStage::Complete => 100.0,
            // Failures don't affect progress percentage
            UpdateStage::Failed(_) => -1.0,
        }
    }

    /// Get a human-readable message for this stage.
    pub fn message(&self) -> String {
        match self {
            UpdateStage::SearchingDevice => "Searching for device...".into(),
            UpdateStage::DeviceConnected => "Device connected".into(),
            UpdateStage::EnteringUpdateMode { remaining_ticks } => {
                format!("Rebooting into update mode... ({}s)", remaining_ticks)
            }
            UpdateStage::UpdateModeConfirmed => "Update mode confirmed".into(),
            UpdateStage::ConfirmationTimedOut => "Update mode not confirmed".into(),
            UpdateStage::ConnectingBle => "Connecting over Bluetooth...".into(),
            UpdateStage::ReadyToTransfer => "Ready to send firmware".into(),
            UpdateStage::Uploading { sent, total } => {
                let percent = if *total == 0 {
                    0
                } else {
                    (sent * 100) / total
                };
                format!("Uploading firmware... {}%", percent)
            }
            UpdateStage::Complete => "Update complete!".into(),
            UpdateStage::Failed(reason) => format!("Update failed: {:?}", reason),
        }
    }
}

/// Everything observers see, published after each event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterSnapshot {
    pub stage: UpdateStage,
    pub stage_message: String,
    pub percent: f32,
    pub presence: DevicePresence,
    pub midi_connected: bool,
    pub device_name: String,
    pub connection_status: String,
    pub handshake: HandshakeState,
    pub reboot: RebootState,
    pub dfu_status: String,
    pub device_firmware_version: Option<u8>,
    pub transfer: TransferSnapshot,
}

/// Caller side of a running updater.
#[derive(Debug, Clone)]
pub struct UpdaterHandle {
    events: EventSender,
    snapshot: watch::Receiver<UpdaterSnapshot>,
    firmware_versions: Vec<String>,
    default_firmware_version: String,
}

impl UpdaterHandle {
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Latest published state.
    pub fn snapshot(&self) -> UpdaterSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdaterSnapshot> {
        self.snapshot.clone()
    }

    /// Version tags offered for flashing.
    pub fn firmware_versions(&self) -> &[String] {
        &self.firmware_versions
    }

    pub fn default_firmware_version(&self) -> &str {
        &self.default_firmware_version
    }

    pub fn request_update_mode(&self) -> DfuResult<()> {
        self.command(Command::RequestUpdateMode)
    }

    pub fn start_scanning(&self) -> DfuResult<()> {
        self.command(Command::StartScanning)
    }

    pub fn send_file(&self, version: &str) -> DfuResult<()> {
        self.command(Command::SendFile {
            version: version.to_string(),
        })
    }

    pub fn set_chunk_batch_size(&self, size: u8) -> DfuResult<()> {
        self.command(Command::SetChunkBatchSize(size))
    }

    pub fn disconnect(&self, forget: bool) -> DfuResult<()> {
        self.command(Command::Disconnect { forget })
    }

    pub fn check_hardware(&self) -> DfuResult<()> {
        self.command(Command::CheckHardware)
    }

    pub fn shutdown(&self) -> DfuResult<()> {
        self.command(Command::Shutdown)
    }

    fn command(&self, command: Command) -> DfuResult<()> {
        if self.events.send(Event::Command(command)) {
            Ok(())
        } else {
            Err(DfuError::UpdaterStopped)
        }
    }
}

/// Schedules timer ticks as tokio tasks posting into the event channel.
///
/// Holds only a weak sender so a forgotten timer never keeps the loop alive.
pub struct TokioTimerDriver {
    events: mpsc::WeakUnboundedSender<Event>,
    tasks: Mutex<HashMap<TimerKind, AbortHandle>>,
}

impl TokioTimerDriver {
    pub fn new(events: mpsc::WeakUnboundedSender<Event>) -> Self {
        Self {
            events,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn post(events: &mpsc::WeakUnboundedSender<Event>, spec: TimerSpec) -> bool {
        match events.upgrade() {
            Some(tx) => tx
                .send(Event::Tick {
                    kind: spec.kind,
                    generation: spec.generation,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl TimerDriver for TokioTimerDriver {
    fn arm(&self, spec: TimerSpec) {
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            if spec.repeating {
                let mut interval = time::interval_at(Instant::now() + spec.period, spec.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if !Self::post(&events, spec) {
                        break;
                    }
                }
            } else {
                time::sleep(spec.period).await;
                Self::post(&events, spec);
            }
        });

        let previous = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.kind, task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn disarm(&self, kind: TimerKind) {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Owns every component and applies events to them one at a time.
pub struct Updater<P: MidiPort, L: BleLink, F: FirmwareSource> {
    controller: ModeTransitionController<P>,
    reboot: RebootSequencer,
    session: TransferSession<L, F>,
    events: mpsc::UnboundedReceiver<Event>,
    snapshot: watch::Sender<UpdaterSnapshot>,
}

impl<P: MidiPort, L: BleLink, F: FirmwareSource> Updater<P, L, F> {
    /// Build the updater and the handle used to drive it. Nothing runs until
    /// [`Updater::run`] is awaited.
    pub fn new(port: P, link: L, firmware: F, settings: &UpdaterSettings) -> (Self, UpdaterHandle) {
        let settings = settings.clone().normalized();
        let (tx, rx) = mpsc::unbounded_channel();
        let driver: Arc<dyn TimerDriver> = Arc::new(TokioTimerDriver::new(tx.downgrade()));

        let controller = ModeTransitionController::new(port, &settings, driver.clone());
        let reboot = RebootSequencer::new(settings.reboot_budget_ticks, settings.reboot_tick(), driver);
        let session = TransferSession::new(
            link,
            firmware,
            TransferConfig::new(settings.chunk_batch_size),
            settings.transfer_name_patterns.as_slice(),
        );

        let initial = build_snapshot(&controller, &reboot, &session);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let updater = Self {
            controller,
            reboot,
            session,
            events: rx,
            snapshot: snapshot_tx,
        };
        let handle = UpdaterHandle {
            events: EventSender { tx },
            snapshot: snapshot_rx,
            firmware_versions: settings.firmware_versions.clone(),
            default_firmware_version: settings.default_firmware_version.clone(),
        };
        (updater, handle)
    }

    /// Process events until shutdown or until every sender is dropped.
    pub async fn run(mut self) {
        info!("Updater started");
        self.controller.start_hardware_check();
        self.publish();

        while let Some(event) = self.events.recv().await {
            if !self.handle(event) {
                break;
            }
            self.publish();
        }

        self.shutdown();
        self.publish();
        info!("Updater stopped");
    }

    /// Apply one event. Returns false when the loop should stop.
    pub fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Tick { kind, generation } => self.on_tick(kind, generation),
            Event::Midi(message) => self.on_midi(message),
            Event::Link(event) => self.session.handle_link_event(event, &mut self.controller),
            Event::Command(Command::Shutdown) => return false,
            Event::Command(command) => self.on_command(command),
        }
        true
    }

    fn on_tick(&mut self, kind: TimerKind, generation: u64) {
        if kind != TimerKind::Reboot {
            self.controller.on_timer(kind, generation);
            return;
        }

        let confirmed = self.controller.is_confirmed();
        match self.reboot.on_timer(generation, confirmed) {
            Some(RebootAction::Continue { remaining }) => self.controller.countdown(remaining),
            Some(RebootAction::StopPolling { remaining }) => {
                self.controller.countdown(remaining);
                self.controller.stop_polling();
            }
            Some(RebootAction::Confirmed) => {
                debug!("Reboot countdown ended by confirmation");
            }
            Some(RebootAction::TimedOut) => {
                warn!("DFU mode not confirmed in time, scanning for device over BLE anyway");
                self.controller.mark_timed_out();
                self.controller.stop_polling();
                self.session.start_scanning();
            }
            None => {}
        }
    }

    fn on_midi(&mut self, message: MidiMessage) {
        match self.controller.handle_message(message) {
            StatusOutcome::Confirmed => {
                info!("Starting BLE scan for update");
                self.session.start_scanning();
            }
            StatusOutcome::AlreadyConfirmed
            | StatusOutcome::Described(_)
            | StatusOutcome::Ignored => {}
        }
    }

    fn on_command(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::RequestUpdateMode => self.controller.request_update_mode(&mut self.reboot),
            Command::StartScanning => self.session.start_scanning(),
            Command::SendFile { version } => {
                if let Err(e) = self.session.send_file(&version) {
                    debug!("Send of {} rejected: {}", version, e);
                }
            }
            Command::SetChunkBatchSize(size) => {
                if let Ok(applied) = self.session.set_chunk_batch_size(size) {
                    info!("Chunk batch size set to {}", applied);
                }
            }
            Command::Disconnect { forget } => self.session.disconnect(forget, &mut self.controller),
            Command::CheckHardware => self.controller.check_hardware(),
            Command::Shutdown => {}
        }
    }

    /// Cancel every timer and drop the link without forgetting the bond.
    fn shutdown(&mut self) {
        self.session.disconnect(false, &mut self.controller);
        self.reboot.cancel();
        self.controller.shutdown();
    }

    fn publish(&self) {
        self.snapshot
            .send_replace(build_snapshot(&self.controller, &self.reboot, &self.session));
    }

    pub fn snapshot(&self) -> UpdaterSnapshot {
        build_snapshot(&self.controller, &self.reboot, &self.session)
    }
}

fn build_snapshot<P: MidiPort, L: BleLink, F: FirmwareSource>(
    controller: &ModeTransitionController<P>,
    reboot: &RebootSequencer,
    session: &TransferSession<L, F>,
) -> UpdaterSnapshot {
    let transfer = session.snapshot();
    let stage = UpdateStage::derive(controller.presence(), controller.handshake(), transfer.state);
    UpdaterSnapshot {
        stage,
        stage_message: stage.message(),
        percent: stage.percent(),
        presence: controller.presence(),
        midi_connected: controller.is_midi_connected(),
        device_name: controller.device_name().to_string(),
        connection_status: controller.connection_status_message(),
        handshake: controller.handshake(),
        reboot: reboot.state(),
        dfu_status: controller.status_message().to_string(),
        device_firmware_version: controller.device_version(),
        transfer,
    }
}
