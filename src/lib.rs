pub mod engine {
  pub mod audio;
  pub mod dsp;
  pub mod graph;
  pub mod messages;
  pub mod modules;
  pub mod state;
}
mod controller;

pub use controller::SynthController;
pub use engine::dsp::chorus::ChorusMode;
pub use engine::dsp::oscillator::Waveform;
pub use engine::modules::drum_machine::DrumInstrument;
pub use engine::modules::looper::LooperState;
