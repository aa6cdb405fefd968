pub mod midi;

pub use midi::{MidiEndpoint, MidiPort};

#[cfg(test)]
pub use midi::MockMidiPort;
