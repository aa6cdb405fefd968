//! Mode-transition handshake over the MIDI command link.
//!
//! Orchestrates the path from "device running application firmware" to
//! "device confirmed in DFU mode":
//! 1. Periodic MIDI destination scan (device presence)
//! 2. Enable command (CC#91) plus the reboot countdown
//! 3. Status polling (CC#90) until the device answers 127
//!
//! Every side effect is an explicit step inside a transition; nothing
//! happens because a field changed.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::device::{DevicePresence, DeviceScanner, ScanOutcome};
use super::midi::{CommandLink, MidiMessage};
use super::reboot::RebootSequencer;
use super::session::TransferObserver;
use super::status::DfuStatusCode;
use super::timer::{Timer, TimerDriver, TimerKind};
use crate::settings::UpdaterSettings;
use crate::traits::MidiPort;

/// Where the enable/confirm handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data")]
pub enum HandshakeState {
    Idle,
    AwaitingConfirmation { remaining_ticks: u32 },
    Confirmed,
    TimedOut,
}

/// Result of handling one inbound MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Not a DFU status message.
    Ignored,
    /// Status recorded as a description only.
    Described(DfuStatusCode),
    /// DFU mode confirmed by this message.
    Confirmed,
    /// DFU mode was already confirmed; nothing changed.
    AlreadyConfirmed,
}

/// Drives the device into DFU mode and confirms it got there.
pub struct ModeTransitionController<P: MidiPort> {
    link: CommandLink<P>,
    scanner: DeviceScanner,
    handshake: HandshakeState,
    last_status: Option<DfuStatusCode>,
    status_message: String,
    device_version: Option<u8>,
    scan_timer: Timer,
    poll_timer: Timer,
    resume_timer: Timer,
}

impl<P: MidiPort> ModeTransitionController<P> {
    pub fn new(port: P, settings: &UpdaterSettings, driver: Arc<dyn TimerDriver>) -> Self {
        Self {
            link: CommandLink::new(port),
            scanner: DeviceScanner::new(settings.device_name_patterns.as_slice()),
            handshake: HandshakeState::Idle,
            last_status: None,
            status_message: "Checking status...".into(),
            device_version: None,
            scan_timer: Timer::repeating(
                TimerKind::PortScan,
                settings.scan_interval(),
                driver.clone(),
            ),
            poll_timer: Timer::repeating(
                TimerKind::StatusPoll,
                settings.status_poll_interval(),
                driver.clone(),
            ),
            resume_timer: Timer::one_shot(TimerKind::ResumeScan, settings.resume_scan_delay(), driver),
        }
    }

    // ------------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------------

    /// Check for the device now, then keep checking periodically.
    pub fn start_hardware_check(&mut self) {
        self.resume_timer.stop();
        self.check_hardware();
        self.scan_timer.start();
    }

    /// One presence check over the current MIDI destinations.
    pub fn check_hardware(&mut self) {
        let destinations = self.link.destinations();
        match self.scanner.scan(&destinations, self.is_confirmed()) {
            ScanOutcome::Suppressed | ScanOutcome::StillConnected => {}
            ScanOutcome::Connected(endpoint) => {
                self.link.select(endpoint);
                self.start_polling();
            }
            ScanOutcome::Disconnected => {
                self.link.clear_selection();
                self.stop_polling();
                if self.handshake != HandshakeState::Idle {
                    debug!("Device gone from MIDI, resetting handshake");
                }
                self.handshake = HandshakeState::Idle;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    /// Command the device into DFU mode and start the reboot countdown.
    pub fn request_update_mode(&mut self, reboot: &mut RebootSequencer) {
        info!("Sending firmware update mode command");
        self.link.send_enable_update_mode();
        reboot.start();
        self.handshake = HandshakeState::AwaitingConfirmation {
            remaining_ticks: reboot.budget(),
        };
        self.start_polling();
    }

    /// Mirror the countdown into the handshake state.
    pub fn countdown(&mut self, remaining_ticks: u32) {
        if let HandshakeState::AwaitingConfirmation { .. } = self.handshake {
            self.handshake = HandshakeState::AwaitingConfirmation { remaining_ticks };
        }
    }

    /// The countdown expired without a confirming status.
    pub fn mark_timed_out(&mut self) {
        if !self.is_confirmed() {
            self.handshake = HandshakeState::TimedOut;
        }
    }

    /// Classify an inbound message and apply it.
    pub fn handle_message(&mut self, message: MidiMessage) -> StatusOutcome {
        if !message.is_status() {
            debug!("Ignoring MIDI CC #{}", message.control);
            return StatusOutcome::Ignored;
        }

        let code = DfuStatusCode::classify(message.value);
        self.last_status = Some(code);
        self.status_message = code.description();

        match code {
            DfuStatusCode::UpdateReady if self.is_confirmed() => StatusOutcome::AlreadyConfirmed,
            DfuStatusCode::UpdateReady => {
                self.stop_polling();
                self.handshake = HandshakeState::Confirmed;
                info!("Device confirmed DFU mode active and ready for firmware update");
                StatusOutcome::Confirmed
            }
            DfuStatusCode::Unrecognized(value) => {
                warn!("Device returned unexpected DFU status code: {}", value);
                StatusOutcome::Described(code)
            }
            other => {
                if let Some(version) = other.firmware_version() {
                    self.device_version = Some(version);
                }
                debug!("DFU status update: {}", self.status_message);
                StatusOutcome::Described(other)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Status polling
    // ------------------------------------------------------------------------

    /// Poll now and every poll interval, replacing any running poll timer.
    pub fn start_polling(&mut self) {
        if !self.link.is_connected() {
            debug!("Cannot start DFU status polling: device not connected");
            return;
        }
        self.poll_timer.start();
        self.poll_status();
    }

    pub fn stop_polling(&mut self) {
        if self.poll_timer.stop() {
            debug!("Stopped DFU status polling");
        }
    }

    pub fn poll_status(&mut self) {
        if self.link.is_connected() {
            self.link.send_status_poll();
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Route a tick owned by this controller. Returns false for other kinds.
    pub fn on_timer(&mut self, kind: TimerKind, generation: u64) -> bool {
        match kind {
            TimerKind::PortScan => {
                if self.scan_timer.accept(generation) {
                    self.check_hardware();
                }
            }
            TimerKind::StatusPoll => {
                if self.poll_timer.accept(generation) {
                    self.poll_status();
                }
            }
            TimerKind::ResumeScan => {
                if self.resume_timer.accept(generation) {
                    info!("Resuming device scan after update");
                    self.start_hardware_check();
                }
            }
            TimerKind::Reboot => return false,
        }
        true
    }

    /// Cancel every timer owned by the controller.
    pub fn shutdown(&mut self) {
        self.scan_timer.stop();
        self.poll_timer.stop();
        self.resume_timer.stop();
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    pub fn is_confirmed(&self) -> bool {
        self.handshake == HandshakeState::Confirmed
    }

    pub fn presence(&self) -> DevicePresence {
        self.scanner.presence()
    }

    pub fn is_midi_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn device_name(&self) -> &str {
        self.scanner.device_name()
    }

    pub fn connection_status_message(&self) -> String {
        self.scanner.connection_status_message()
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn last_status(&self) -> Option<DfuStatusCode> {
        self.last_status
    }

    /// Firmware version last reported by the device in normal mode.
    pub fn device_version(&self) -> Option<u8> {
        self.device_version
    }

    pub fn is_polling(&self) -> bool {
        self.poll_timer.is_running()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_timer.is_running()
    }
}

impl<P: MidiPort> TransferObserver for ModeTransitionController<P> {
    fn on_link_closed(&mut self, update_completed: bool) {
        if !update_completed {
            return;
        }

        info!("Device disconnected after completing firmware update - resetting DFU mode");
        self.handshake = HandshakeState::Idle;
        self.device_version = None;
        self.status_message = "Firmware update completed. Device restarting...".into();
        self.scanner.reset();
        self.link.clear_selection();
        self.scan_timer.stop();
        self.stop_polling();
        self.resume_timer.start();
    }
}
