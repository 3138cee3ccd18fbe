// Control messages for the audio engine.
//
// Every control-surface operation becomes one of these; the audio callback
// drains them at buffer start, so writes are ordered ahead of the frames
// that follow. Values are clamped at ingestion by the controller; the
// engine side only routes.

use crossbeam_channel::Sender;

use crate::engine::dsp::chorus::ChorusMode;
use crate::engine::dsp::oscillator::Waveform;
use crate::engine::modules::drum_machine::DrumInstrument;

#[derive(Clone, Debug)]
pub enum SynthParam {
    Waveform(Waveform),
    WaveformEnabled(Waveform, bool),
    PulseWidth(f32),
    SubOscLevel(f32),
    NoiseLevel(f32),
    FilterCutoff(f32),
    FilterResonance(f32),
    FilterEnvAmount(f32),
    FilterKeyTracking(f32),
    HpfCutoff(f32),
    Attack(f32),
    Decay(f32),
    Sustain(f32),
    Release(f32),
    LfoRate(f32),
    LfoPitchDepth(f32),
    LfoFilterDepth(f32),
    LfoPwmDepth(f32),
    GlideTime(f32),
    GlideEnabled(bool),
    UnisonEnabled(bool),
    UnisonVoices(usize),
    UnisonDetune(f32),
    ChorusMode(ChorusMode),
    TremoloRate(f32),
    TremoloDepth(f32),
    ReverbSize(f32),
    ReverbMix(f32),
    DelayTime(f32),
    DelayFeedback(f32),
    DelayMix(f32),
}

#[derive(Clone, Debug)]
pub enum WurliParam {
    TremoloRate(f32),
    TremoloDepth(f32),
    ChorusMode(ChorusMode),
    ReverbSize(f32),
    ReverbMix(f32),
    DelayTime(f32),
    DelayFeedback(f32),
    DelayMix(f32),
    Volume(f32),
}

#[derive(Clone, Debug)]
pub enum DrumMsg {
    Bpm(f32),
    MasterEnabled(bool),
    InstrumentEnabled(DrumInstrument, bool),
    Step { instrument: DrumInstrument, step: usize, velocity: f32 },
    InstrumentVolume(DrumInstrument, f32),
    ResetPattern,
    Volume(f32),
}

#[derive(Clone, Debug)]
pub enum LooperMsg {
    /// Zero-filled buffers allocated by the controller; the engine swaps
    /// them into the track and ships the old ones back for dropping.
    StartRecording { track: usize, buffer_l: Vec<f32>, buffer_r: Vec<f32> },
    StartPlayback,
    StopPlayback,
    CancelRecording,
    ClearTrack(usize),
    ClearAllTracks,
    TrackVolume(usize, f32),
    TrackMuted(usize, bool),
    TrackSolo(usize, bool),
    BarCount(usize),
    /// Offline mixdown: the engine fills `buffer` from the masked tracks
    /// and sends it back on `reply`.
    ExportMixdown { track_mask: u32, buffer: Vec<f32>, reply: Sender<Vec<f32>> },
}

#[derive(Clone, Debug)]
pub enum EngineMsg {
    NoteOn { note: u8, freq: f32, velocity: f32 },
    NoteOff { note: u8 },
    AllNotesOff,
    WurlitzerMode(bool),
    SynthVolume(f32),
    MetronomeVolume(f32),
    Synth(SynthParam),
    Wurli(WurliParam),
    Drum(DrumMsg),
    Looper(LooperMsg),
    Quit,
}
