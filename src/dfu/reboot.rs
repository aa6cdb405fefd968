//! Countdown between "enable DFU" and "confirmed or timed out".

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::config::{MIN_REBOOT_BUDGET_TICKS, POLL_STOP_MARGIN_TICKS};
use super::timer::{Timer, TimerDriver, TimerKind};

/// Countdown progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data")]
pub enum RebootState {
    Idle,
    Rebooting { remaining: u32 },
    Confirmed,
    TimedOut,
}

/// What the owner must do after a countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootAction {
    /// Keep waiting.
    Continue { remaining: u32 },
    /// Near the end of the window: stop status polling.
    StopPolling { remaining: u32 },
    /// DFU mode was confirmed before expiry.
    Confirmed,
    /// Budget exhausted without confirmation: start the BLE scan anyway.
    TimedOut,
}

/// Bounded countdown that bridges the enable command and the BLE scan.
#[derive(Debug)]
pub struct RebootSequencer {
    state: RebootState,
    budget: u32,
    timer: Timer,
}

impl RebootSequencer {
    pub fn new(budget: u32, tick: Duration, driver: Arc<dyn TimerDriver>) -> Self {
        Self {
            state: RebootState::Idle,
            budget: budget.max(MIN_REBOOT_BUDGET_TICKS),
            timer: Timer::repeating(TimerKind::Reboot, tick, driver),
        }
    }

    /// Start a fresh countdown, replacing any running one.
    pub fn start(&mut self) {
        if self.is_rebooting() {
            debug!("Restarting reboot countdown");
        }
        self.state = RebootState::Rebooting {
            remaining: self.budget,
        };
        self.timer.start();
        info!("Rebooting device into DFU mode ({} ticks)", self.budget);
    }

    /// Stop the countdown without an outcome.
    pub fn cancel(&mut self) {
        self.timer.stop();
        if self.is_rebooting() {
            self.state = RebootState::Idle;
        }
    }

    /// Handle a tick event from the timer driver. Stale ticks yield `None`.
    pub fn on_timer(&mut self, generation: u64, dfu_confirmed: bool) -> Option<RebootAction> {
        if !self.timer.accept(generation) {
            return None;
        }
        self.tick(dfu_confirmed)
    }

    /// Advance the countdown by one tick.
    ///
    /// Confirmation is checked before decrementing, so a status processed
    /// earlier in the same pass always wins over expiry.
    pub fn tick(&mut self, dfu_confirmed: bool) -> Option<RebootAction> {
        let RebootState::Rebooting { remaining } = self.state else {
            return None;
        };

        if dfu_confirmed {
            self.timer.stop();
            self.state = RebootState::Confirmed;
            info!("DFU mode confirmed with {} ticks to spare", remaining);
            return Some(RebootAction::Confirmed);
        }

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.timer.stop();
            self.state = RebootState::TimedOut;
            info!("Reboot countdown expired without confirmation");
            return Some(RebootAction::TimedOut);
        }

        self.state = RebootState::Rebooting { remaining };
        if remaining == self.poll_cutoff() {
            debug!("Countdown at {}: stopping status polling", remaining);
            Some(RebootAction::StopPolling { remaining })
        } else {
            Some(RebootAction::Continue { remaining })
        }
    }

    /// Remaining-tick value at which polling stops.
    fn poll_cutoff(&self) -> u32 {
        self.budget - POLL_STOP_MARGIN_TICKS
    }

    pub fn state(&self) -> RebootState {
        self.state
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn is_rebooting(&self) -> bool {
        matches!(self.state, RebootState::Rebooting { .. })
    }

    pub fn remaining(&self) -> Option<u32> {
        match self.state {
            RebootState::Rebooting { remaining } => Some(remaining),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ManualTimers;

    fn sequencer(budget: u32) -> (RebootSequencer, ManualTimers) {
        let timers = ManualTimers::new();
        let sequencer = RebootSequencer::new(budget, Duration::from_secs(1), timers.driver());
        (sequencer, timers)
    }

    #[test]
    fn test_countdown_without_confirmation() {
        let (mut reboot, timers) = sequencer(10);
        reboot.start();

        let mut ticks = 0;
        let mut stop_polling = 0;
        let mut timed_out = 0;
        let mut last_remaining = 10;

        while reboot.is_rebooting() {
            let generation = timers.generation(TimerKind::Reboot).unwrap();
            match reboot.on_timer(generation, false).unwrap() {
                RebootAction::Continue { remaining } => {
                    assert_eq!(remaining, last_remaining - 1);
                    last_remaining = remaining;
                }
                RebootAction::StopPolling { remaining } => {
                    assert_eq!(remaining, 7);
                    assert_eq!(remaining, last_remaining - 1);
                    last_remaining = remaining;
                    stop_polling += 1;
                }
                RebootAction::TimedOut => {
                    assert_eq!(last_remaining, 1);
                    timed_out += 1;
                }
                RebootAction::Confirmed => panic!("unexpected confirmation"),
            }
            ticks += 1;
            assert!(ticks <= 10, "countdown ran past its budget");
        }

        assert_eq!(ticks, 10);
        assert_eq!(stop_polling, 1);
        assert_eq!(timed_out, 1);
        assert_eq!(reboot.state(), RebootState::TimedOut);
        assert_eq!(timers.generation(TimerKind::Reboot), None);
    }

    #[test]
    fn test_confirmation_wins_over_expiry() {
        let (mut reboot, _timers) = sequencer(10);
        reboot.start();

        for _ in 0..5 {
            reboot.tick(false);
        }
        assert_eq!(reboot.remaining(), Some(5));

        assert_eq!(reboot.tick(true), Some(RebootAction::Confirmed));
        assert_eq!(reboot.state(), RebootState::Confirmed);
        // Further ticks (e.g. already queued) do nothing
        assert_eq!(reboot.tick(false), None);
    }

    #[test]
    fn test_confirmed_on_last_tick_skips_timeout() {
        let (mut reboot, _timers) = sequencer(4);
        reboot.start();
        for _ in 0..3 {
            reboot.tick(false);
        }
        assert_eq!(reboot.remaining(), Some(1));
        assert_eq!(reboot.tick(true), Some(RebootAction::Confirmed));
    }

    #[test]
    fn test_restart_replaces_countdown() {
        let (mut reboot, timers) = sequencer(10);
        reboot.start();
        let stale = timers.generation(TimerKind::Reboot).unwrap();
        reboot.tick(false);
        reboot.tick(false);

        reboot.start();
        assert_eq!(reboot.remaining(), Some(10));
        assert_eq!(reboot.on_timer(stale, false), None);
        assert_eq!(reboot.remaining(), Some(10));
        assert_eq!(timers.arm_count(TimerKind::Reboot), 2);
    }

    #[test]
    fn test_budget_is_clamped() {
        let (reboot, _timers) = sequencer(1);
        assert_eq!(reboot.budget(), MIN_REBOOT_BUDGET_TICKS);
    }

    #[test]
    fn test_cancel() {
        let (mut reboot, timers) = sequencer(10);
        reboot.start();
        let generation = timers.generation(TimerKind::Reboot).unwrap();
        reboot.cancel();

        assert_eq!(reboot.state(), RebootState::Idle);
        assert_eq!(reboot.on_timer(generation, false), None);
        assert_eq!(timers.generation(TimerKind::Reboot), None);
    }
}
