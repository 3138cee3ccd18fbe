// Count-in metronome.
//
// Snare click once per beat, used while the looper is in pre-count or
// recording. Exactly one trigger per beat, including the first.

use crate::engine::modules::drum_synth::DrumSynth;

const CLICK_GAIN: f32 = 1.8;

pub struct Metronome {
    synth: DrumSynth,
    sample_rate: f32,
    bpm: f32,
    running: bool,

    current_beat: u32,
    sample_counter: f32,
    samples_per_beat: f32,
}

impl Metronome {
    pub fn new(sample_rate: f32) -> Self {
        let mut metronome = Self {
            synth: DrumSynth::new(sample_rate),
            sample_rate,
            bpm: 100.0,
            running: false,
            current_beat: 0,
            sample_counter: 0.0,
            samples_per_beat: 0.0,
        };
        metronome.update_timing();
        metronome
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm.clamp(30.0, 300.0);
        self.update_timing();
    }

    pub fn start(&mut self) {
        self.running = true;
        self.current_beat = 0;
        self.sample_counter = 0.0;
        self.synth.trigger_snare(1.0);
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_beat(&self) -> u32 {
        self.current_beat
    }

    fn update_timing(&mut self) {
        self.samples_per_beat = self.sample_rate * 60.0 / self.bpm;
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        // Render even when stopped so the last click can ring out.
        let output = self.synth.next_sample() * CLICK_GAIN;

        if self.running {
            self.sample_counter += 1.0;
            if self.sample_counter >= self.samples_per_beat {
                self.sample_counter -= self.samples_per_beat;
                self.current_beat = (self.current_beat + 1) % 4;
                self.synth.trigger_snare(1.0);
            }
        }

        output
    }
}
