pub mod drum_machine;
pub mod drum_synth;
pub mod looper;
pub mod metronome;
pub mod polyphony;
pub mod voice;
pub mod wurlitzer;

pub use drum_machine::{DrumInstrument, DrumMachine};
pub use looper::{Looper, LooperState};
pub use polyphony::{PolyphonyManager, MAX_POLYPHONY};
pub use wurlitzer::WurlitzerEngine;
