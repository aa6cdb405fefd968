//! Shared fakes, fixtures and temp-dir handling for unit tests.

pub mod fakes;
pub mod fixtures;
pub mod temp;

pub use fakes::{FakeBleLink, FakeMidiPort, LinkCall, ManualTimers};
pub use fixtures::{firmware_bytes, MemoryFirmwareSource, RecordingObserver};
pub use temp::TestContext;

/// Route `log` output to the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
