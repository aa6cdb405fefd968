//! Chunked firmware transfer over the BLE link.
//!
//! The session walks `Idle → Scanning → Connecting → Bonding → Ready →
//! Transferring → {Completed, Failed}`. Link operations are requests; their
//! outcomes arrive as [`LinkEvent`]s fed through [`TransferSession::handle_link_event`].
//!
//! Flow control: up to `chunk_batch_size` writes are issued at once, and the
//! next batch only goes out after every write of the current one reported
//! `WriteCompleted`.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::config::{
    chunk_size_for_mtu, clamp_chunk_batch_size, matches_name_pattern, DEFAULT_CHUNK_BATCH_SIZE,
    MIN_CHUNK_SIZE,
};
use super::error::{DfuError, DfuResult, FailureReason};
use super::firmware_reader::{FirmwareImage, FirmwareSource};
use super::transport::{BleLink, LinkEvent, Peripheral};

/// Transfer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data")]
pub enum TransferState {
    Idle,
    Scanning,
    Connecting,
    Bonding,
    Ready,
    Transferring { bytes_sent: usize, bytes_total: usize },
    Completed,
    Failed(FailureReason),
}

impl TransferState {
    /// Label used in logs and rejection messages.
    pub fn label(&self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Scanning => "scanning",
            TransferState::Connecting => "connecting",
            TransferState::Bonding => "bonding",
            TransferState::Ready => "ready",
            TransferState::Transferring { .. } => "transferring",
            TransferState::Completed => "completed",
            TransferState::Failed(_) => "failed",
        }
    }
}

/// Tunables for the chunk loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    pub chunk_batch_size: u8,
}

impl TransferConfig {
    pub fn new(chunk_batch_size: u8) -> Self {
        Self {
            chunk_batch_size: clamp_chunk_batch_size(chunk_batch_size),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_BATCH_SIZE)
    }
}

/// Callback for the owner of the command link.
pub trait TransferObserver {
    /// The transfer link closed. `update_completed` is true when the device
    /// dropped the link after accepting a complete image.
    fn on_link_closed(&mut self, update_completed: bool);
}

/// Read-only view of the session for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub state: TransferState,
    pub name: String,
    pub connected: bool,
    pub transfer_ongoing: bool,
    pub progress_percent: f64,
    pub kb_per_second: f64,
    pub elapsed_seconds: f64,
    pub error_message: Option<String>,
    pub last_failure: Option<FailureReason>,
    pub chunk_batch_size: u8,
    pub firmware_version: Option<String>,
    pub firmware_sha256: Option<String>,
}

/// Owns the BLE link and streams one firmware image at a time.
pub struct TransferSession<L: BleLink, F: FirmwareSource> {
    link: L,
    firmware: F,
    config: TransferConfig,
    name_patterns: Vec<String>,
    state: TransferState,
    name: String,
    connected: bool,
    bonded: bool,
    chunk_size: usize,
    image: Option<FirmwareImage>,
    /// Offset of the first byte not yet handed to the link.
    next_offset: usize,
    in_flight: usize,
    started_at: Option<Instant>,
    progress_percent: f64,
    kb_per_second: f64,
    elapsed_seconds: f64,
    error_message: Option<String>,
    last_failure: Option<FailureReason>,
}

impl<L: BleLink, F: FirmwareSource> TransferSession<L, F> {
    pub fn new<S: AsRef<str>>(link: L, firmware: F, config: TransferConfig, name_patterns: &[S]) -> Self {
        Self {
            link,
            firmware,
            config,
            name_patterns: name_patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            state: TransferState::Idle,
            name: String::new(),
            connected: false,
            bonded: false,
            chunk_size: MIN_CHUNK_SIZE,
            image: None,
            next_offset: 0,
            in_flight: 0,
            started_at: None,
            progress_percent: 0.0,
            kb_per_second: 0.0,
            elapsed_seconds: 0.0,
            error_message: None,
            last_failure: None,
        }
    }

    // ------------------------------------------------------------------------
    // Caller operations
    // ------------------------------------------------------------------------

    /// Start discovering the device on the BLE link.
    pub fn start_scanning(&mut self) {
        let allowed = match self.state {
            TransferState::Idle => true,
            TransferState::Completed | TransferState::Failed(_) => !self.connected,
            _ => false,
        };
        if !allowed {
            debug!("Ignoring BLE scan request while {}", self.state.label());
            return;
        }

        self.error_message = None;
        self.last_failure = None;
        self.state = TransferState::Scanning;
        info!("Scanning for device on BLE");
        if let Err(e) = self.link.start_scan() {
            self.fail(
                FailureReason::LinkConnectFailed,
                DfuError::LinkConnectFailed {
                    reason: e.to_string(),
                },
            );
        }
    }

    /// Tear the link down and return to `Idle`.
    ///
    /// With `forget`, bonding state is discarded as well. The observer hears
    /// about the closed link, so a disconnect after `Completed` still hands
    /// the device back to MIDI detection.
    pub fn disconnect(&mut self, forget: bool, observer: &mut dyn TransferObserver) {
        info!(
            "Disconnecting BLE link{} while {}",
            if forget { " and forgetting bond" } else { "" },
            self.state.label()
        );
        if self.state == TransferState::Scanning {
            self.link.stop_scan();
        }
        self.link.disconnect();
        if forget {
            self.link.forget_bond();
        }

        let was_connected = self.connected;
        let update_completed = self.state == TransferState::Completed;
        self.state = TransferState::Idle;
        self.name.clear();
        self.connected = false;
        self.bonded = false;
        self.chunk_size = MIN_CHUNK_SIZE;
        self.image = None;
        self.next_offset = 0;
        self.in_flight = 0;
        self.started_at = None;
        self.progress_percent = 0.0;
        self.kb_per_second = 0.0;
        self.elapsed_seconds = 0.0;
        self.error_message = None;

        if was_connected || update_completed {
            observer.on_link_closed(update_completed);
        }
    }

    /// Load the image for `version` and start streaming it.
    ///
    /// A missing or empty image leaves the link connected and the session
    /// `Ready`, with the failure recorded.
    pub fn send_file(&mut self, version: &str) -> DfuResult<()> {
        let link_ready = self.connected && self.bonded;
        let allowed = match self.state {
            TransferState::Ready => true,
            TransferState::Completed | TransferState::Failed(_) => link_ready,
            _ => false,
        };
        if !allowed {
            let err = match self.state {
                TransferState::Transferring { .. } => DfuError::TransferInProgress,
                state => DfuError::InvalidState {
                    operation: "send firmware",
                    state: state.label().to_string(),
                },
            };
            warn!("{}", err);
            self.error_message = Some(err.to_string());
            return Err(err);
        }

        let image = match self.firmware.load(version) {
            Ok(image) => image,
            Err(err) => {
                warn!("[{}] {}", err.error_code(), err);
                self.state = TransferState::Ready;
                self.error_message = Some(err.to_string());
                self.last_failure = err.failure_reason().or(Some(FailureReason::ImageNotFound));
                return Err(err);
            }
        };
        if image.is_empty() {
            let err = DfuError::EmptyImage {
                version: version.to_string(),
            };
            self.state = TransferState::Ready;
            self.error_message = Some(err.to_string());
            self.last_failure = Some(FailureReason::ImageNotFound);
            return Err(err);
        }

        let bytes_total = image.len();
        info!(
            "Sending {} ({} bytes) in chunks of {} x {}",
            image.file_name(),
            bytes_total,
            self.config.chunk_batch_size,
            self.chunk_size
        );

        self.image = Some(image);
        self.next_offset = 0;
        self.in_flight = 0;
        self.progress_percent = 0.0;
        self.kb_per_second = 0.0;
        self.elapsed_seconds = 0.0;
        self.error_message = None;
        self.last_failure = None;
        self.started_at = Some(Instant::now());
        self.state = TransferState::Transferring {
            bytes_sent: 0,
            bytes_total,
        };

        self.issue_batch();
        Ok(())
    }

    /// Change the number of chunks per flow-control cycle.
    ///
    /// Rejected while transferring. Returns the applied (clamped) value.
    pub fn set_chunk_batch_size(&mut self, requested: u8) -> DfuResult<u8> {
        if self.is_transferring() {
            let err = DfuError::TransferInProgress;
            warn!("{}", err);
            self.error_message = Some(err.to_string());
            return Err(err);
        }

        let applied = clamp_chunk_batch_size(requested);
        if applied != requested {
            debug!("Chunk batch size {} clamped to {}", requested, applied);
        }
        self.config.chunk_batch_size = applied;
        Ok(applied)
    }

    // ------------------------------------------------------------------------
    // Link events
    // ------------------------------------------------------------------------

    /// Apply one asynchronous link notification.
    pub fn handle_link_event(&mut self, event: LinkEvent, observer: &mut dyn TransferObserver) {
        match event {
            LinkEvent::Discovered(peripheral) => self.on_discovered(peripheral),
            LinkEvent::Connected { mtu } => self.on_connected(mtu),
            LinkEvent::ConnectFailed { reason } => {
                if matches!(self.state, TransferState::Connecting | TransferState::Bonding) {
                    self.connected = false;
                    self.fail(
                        FailureReason::LinkConnectFailed,
                        DfuError::LinkConnectFailed { reason },
                    );
                }
            }
            LinkEvent::Bonded => {
                if self.state == TransferState::Bonding {
                    self.bonded = true;
                    self.state = TransferState::Ready;
                    info!("Bonded with {}, ready for transfer", self.name);
                }
            }
            LinkEvent::BondFailed { reason } => {
                if self.state == TransferState::Bonding {
                    self.link.disconnect();
                    self.connected = false;
                    self.fail(
                        FailureReason::LinkConnectFailed,
                        DfuError::LinkConnectFailed { reason },
                    );
                }
            }
            LinkEvent::WriteCompleted => self.on_write_completed(),
            LinkEvent::WriteFailed { reason } => {
                if self.is_transferring() {
                    self.in_flight = 0;
                    self.fail(
                        FailureReason::LinkWriteFailed,
                        DfuError::LinkWriteFailed { reason },
                    );
                }
            }
            LinkEvent::Disconnected => self.on_disconnected(observer),
        }
    }

    fn on_discovered(&mut self, peripheral: Peripheral) {
        if self.state != TransferState::Scanning {
            return;
        }
        if !self.name_patterns.is_empty()
            && !matches_name_pattern(&peripheral.name, self.name_patterns.as_slice())
        {
            debug!("Ignoring BLE peripheral {}", peripheral.name);
            return;
        }

        info!("Found {} ({}), connecting", peripheral.name, peripheral.id);
        self.link.stop_scan();
        self.name = peripheral.name.clone();
        self.state = TransferState::Connecting;
        if let Err(e) = self.link.connect(&peripheral) {
            self.fail(
                FailureReason::LinkConnectFailed,
                DfuError::LinkConnectFailed {
                    reason: e.to_string(),
                },
            );
        }
    }

    fn on_connected(&mut self, mtu: usize) {
        if self.state != TransferState::Connecting {
            debug!("Unexpected BLE connect while {}", self.state.label());
            return;
        }

        self.connected = true;
        self.chunk_size = chunk_size_for_mtu(mtu);
        self.state = TransferState::Bonding;
        debug!("Connected with MTU {}, chunk size {}", mtu, self.chunk_size);

        if let Err(e) = self.link.bond() {
            self.link.disconnect();
            self.connected = false;
            self.fail(
                FailureReason::LinkConnectFailed,
                DfuError::LinkConnectFailed {
                    reason: e.to_string(),
                },
            );
        }
    }

    fn on_write_completed(&mut self) {
        let TransferState::Transferring { bytes_total, .. } = self.state else {
            debug!("Write completion while {}", self.state.label());
            return;
        };
        if self.in_flight == 0 {
            warn!("Write completion with no write in flight");
            return;
        }

        self.in_flight -= 1;
        if self.in_flight > 0 {
            return;
        }

        // Whole batch acknowledged
        let bytes_sent = self.next_offset;
        self.state = TransferState::Transferring {
            bytes_sent,
            bytes_total,
        };
        self.update_progress(bytes_sent, bytes_total);

        if bytes_sent >= bytes_total {
            self.complete();
        } else {
            self.issue_batch();
        }
    }

    fn on_disconnected(&mut self, observer: &mut dyn TransferObserver) {
        let was_connected = self.connected;
        self.connected = false;
        self.bonded = false;
        self.in_flight = 0;

        match self.state {
            TransferState::Completed => {
                info!("Device disconnected after firmware update");
                self.state = TransferState::Idle;
                observer.on_link_closed(true);
            }
            TransferState::Transferring { .. } => {
                self.fail(
                    FailureReason::LinkDisconnected,
                    DfuError::LinkDisconnected {
                        operation: "firmware transfer".into(),
                    },
                );
                observer.on_link_closed(false);
            }
            TransferState::Connecting | TransferState::Bonding => {
                self.fail(
                    FailureReason::LinkConnectFailed,
                    DfuError::LinkDisconnected {
                        operation: "connection setup".into(),
                    },
                );
                observer.on_link_closed(false);
            }
            TransferState::Ready => {
                info!("Device disconnected");
                self.state = TransferState::Idle;
                observer.on_link_closed(false);
            }
            TransferState::Failed(_) if was_connected => observer.on_link_closed(false),
            TransferState::Idle | TransferState::Scanning | TransferState::Failed(_) => {}
        }
    }

    // ------------------------------------------------------------------------
    // Chunk loop
    // ------------------------------------------------------------------------

    /// Hand the next batch of chunks to the link.
    fn issue_batch(&mut self) {
        let Some(image) = self.image.as_ref() else {
            return;
        };
        let total = image.data.len();
        let mut write_error = None;

        for _ in 0..self.config.chunk_batch_size {
            if self.next_offset >= total {
                break;
            }
            let end = (self.next_offset + self.chunk_size).min(total);
            if let Err(e) = self.link.write(&image.data[self.next_offset..end]) {
                write_error = Some(e);
                break;
            }
            self.next_offset = end;
            self.in_flight += 1;
        }

        if let Some(e) = write_error {
            self.in_flight = 0;
            self.fail(
                FailureReason::LinkWriteFailed,
                DfuError::LinkWriteFailed {
                    reason: e.to_string(),
                },
            );
        }
    }

    fn update_progress(&mut self, bytes_sent: usize, bytes_total: usize) {
        let percent = if bytes_total == 0 {
            0.0
        } else {
            bytes_sent as f64 / bytes_total as f64 * 100.0
        };
        // Never move backwards within one transfer
        self.progress_percent = self.progress_percent.max(percent);

        if let Some(started) = self.started_at {
            self.elapsed_seconds = started.elapsed().as_secs_f64();
            self.kb_per_second = if self.elapsed_seconds > 0.0 {
                bytes_sent as f64 / 1024.0 / self.elapsed_seconds
            } else {
                0.0
            };
        }
    }

    fn complete(&mut self) {
        self.progress_percent = 100.0;
        self.state = TransferState::Completed;
        if let Some(image) = &self.image {
            info!(
                "Firmware {} sent in {:.1}s ({:.1} KB/s)",
                image.file_name(),
                self.elapsed_seconds,
                self.kb_per_second
            );
        }
    }

    fn fail(&mut self, reason: FailureReason, err: DfuError) {
        warn!("[{}] {} ({:?})", err.error_code(), err, reason);
        self.state = TransferState::Failed(reason);
        self.error_message = Some(err.to_string());
        self.last_failure = Some(reason);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_transferring(&self) -> bool {
        matches!(self.state, TransferState::Transferring { .. })
    }

    pub fn progress_percent(&self) -> f64 {
        self.progress_percent
    }

    pub fn kb_per_second(&self) -> f64 {
        self.kb_per_second
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.last_failure
    }

    pub fn config(&self) -> TransferConfig {
        self.config
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            state: self.state,
            name: self.name.clone(),
            connected: self.connected,
            transfer_ongoing: self.is_transferring(),
            progress_percent: self.progress_percent,
            kb_per_second: self.kb_per_second,
            elapsed_seconds: self.elapsed_seconds,
            error_message: self.error_message.clone(),
            last_failure: self.last_failure,
            chunk_batch_size: self.config.chunk_batch_size,
            firmware_version: self.image.as_ref().map(|i| i.version.clone()),
            firmware_sha256: self.image.as_ref().map(|i| i.sha256.clone()),
        }
    }
}
