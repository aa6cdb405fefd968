//! Single-instance scheduled ticks with generation-based cancellation.
//!
//! Every periodic concern (port scan, status poll, reboot countdown, resume
//! delay) owns exactly one [`Timer`]. Starting it again replaces the running
//! instance: the generation is bumped, the driver re-arms, and any tick still
//! in flight from the old instance is rejected by [`Timer::accept`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The scheduled concerns in the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    PortScan,
    StatusPoll,
    Reboot,
    ResumeScan,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerKind::PortScan => "port scan",
            TimerKind::StatusPoll => "status poll",
            TimerKind::Reboot => "reboot countdown",
            TimerKind::ResumeScan => "resume scan",
        };
        f.write_str(name)
    }
}

/// What the driver needs to schedule ticks for one timer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    pub kind: TimerKind,
    pub generation: u64,
    pub period: Duration,
    pub repeating: bool,
}

/// Backend that turns armed timers into `Tick` events on the event loop.
///
/// `arm` must replace any instance already armed for the same kind.
pub trait TimerDriver: Send + Sync {
    fn arm(&self, spec: TimerSpec);
    fn disarm(&self, kind: TimerKind);
}

/// One cancellation-token-bearing scheduled task.
pub struct Timer {
    kind: TimerKind,
    period: Duration,
    repeating: bool,
    generation: u64,
    armed: bool,
    driver: Arc<dyn TimerDriver>,
}

impl Timer {
    /// A timer that ticks every `period` until stopped.
    pub fn repeating(kind: TimerKind, period: Duration, driver: Arc<dyn TimerDriver>) -> Self {
        Self::new(kind, period, true, driver)
    }

    /// A timer that ticks once, `delay` after being started.
    pub fn one_shot(kind: TimerKind, delay: Duration, driver: Arc<dyn TimerDriver>) -> Self {
        Self::new(kind, delay, false, driver)
    }

    fn new(kind: TimerKind, period: Duration, repeating: bool, driver: Arc<dyn TimerDriver>) -> Self {
        Self {
            kind,
            period,
            repeating,
            generation: 0,
            armed: false,
            driver,
        }
    }

    /// Start (or restart) the timer. Returns the new generation.
    pub fn start(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.armed = true;
        self.driver.arm(TimerSpec {
            kind: self.kind,
            generation: self.generation,
            period: self.period,
            repeating: self.repeating,
        });
        self.generation
    }

    /// Stop the timer. Returns false if it was not running.
    pub fn stop(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.armed = false;
        self.generation = self.generation.wrapping_add(1);
        self.driver.disarm(self.kind);
        true
    }

    /// Validate a tick against the live instance.
    ///
    /// A one-shot timer disarms itself on its accepted tick.
    pub fn accept(&mut self, generation: u64) -> bool {
        if !self.armed || generation != self.generation {
            log::trace!(
                "Dropping stale {} tick (generation {}, live {})",
                self.kind,
                generation,
                self.generation
            );
            return false;
        }
        if !self.repeating {
            self.armed = false;
            self.driver.disarm(self.kind);
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.armed
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("kind", &self.kind)
            .field("period", &self.period)
            .field("repeating", &self.repeating)
            .field("generation", &self.generation)
            .field("armed", &self.armed)
            .finish()
    }
}
