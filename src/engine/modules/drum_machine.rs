// 16-step drum sequencer driving the drum synth.
//
// Three instruments, each with a velocity pattern (0.0 = off), an enable
// flag and a volume. The step clock keeps its fractional sample remainder
// across step boundaries so long runs never drift off the grid.

use serde::{Deserialize, Serialize};

use crate::engine::modules::drum_synth::DrumSynth;

pub const PATTERN_STEPS: usize = 16;
pub const INSTRUMENT_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrumInstrument {
    Kick = 0,
    Snare = 1,
    HiHat = 2,
}

impl DrumInstrument {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(DrumInstrument::Kick),
            1 => Some(DrumInstrument::Snare),
            2 => Some(DrumInstrument::HiHat),
            _ => None,
        }
    }
}

// Accents on the downbeats, ghosts in between.
const DEFAULT_HIHAT_VELOCITIES: [f32; PATTERN_STEPS] = [
    1.0, 0.5, 0.7, 0.4, //
    0.9, 0.5, 0.6, 0.4, //
    1.0, 0.5, 0.7, 0.4, //
    0.9, 0.5, 0.6, 0.45,
];

pub struct DrumMachine {
    synth: DrumSynth,
    sample_rate: f32,

    enabled: bool,
    patterns: [[f32; PATTERN_STEPS]; INSTRUMENT_COUNT],
    instrument_enabled: [bool; INSTRUMENT_COUNT],
    instrument_volume: [f32; INSTRUMENT_COUNT],
    volume: f32,
    bpm: f32,

    current_step: usize,
    sample_counter: f32,
    samples_per_sixteenth: f32,
}

impl DrumMachine {
    pub fn new(sample_rate: f32) -> Self {
        let mut machine = Self {
            synth: DrumSynth::new(sample_rate),
            sample_rate,
            enabled: false,
            patterns: [[0.0; PATTERN_STEPS]; INSTRUMENT_COUNT],
            instrument_enabled: [true; INSTRUMENT_COUNT],
            instrument_volume: [1.0; INSTRUMENT_COUNT],
            volume: 0.7,
            bpm: 100.0,
            current_step: 0,
            sample_counter: 0.0,
            samples_per_sixteenth: 0.0,
        };
        machine.reset_to_default_pattern();
        machine.update_step_timing();
        machine
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            // Starting playback: snap to the top of the bar.
            self.current_step = 0;
            self.sample_counter = 0.0;
            self.trigger_step(0);
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm.clamp(60.0, 200.0);
        self.update_step_timing();
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_instrument_enabled(&mut self, instrument: DrumInstrument, enabled: bool) {
        self.instrument_enabled[instrument as usize] = enabled;
    }

    pub fn set_instrument_volume(&mut self, instrument: DrumInstrument, volume: f32) {
        self.instrument_volume[instrument as usize] = volume.clamp(0.0, 1.0);
    }

    pub fn instrument_volume(&self, instrument: DrumInstrument) -> f32 {
        self.instrument_volume[instrument as usize]
    }

    pub fn set_step(&mut self, instrument: DrumInstrument, step: usize, velocity: f32) {
        if step < PATTERN_STEPS {
            self.patterns[instrument as usize][step] = velocity.clamp(0.0, 1.0);
        }
    }

    pub fn step(&self, instrument: DrumInstrument, step: usize) -> f32 {
        if step < PATTERN_STEPS {
            self.patterns[instrument as usize][step]
        } else {
            0.0
        }
    }

    pub fn toggle_step(&mut self, instrument: DrumInstrument, step: usize) {
        if step < PATTERN_STEPS {
            let cell = &mut self.patterns[instrument as usize][step];
            *cell = if *cell > 0.0 { 0.0 } else { 1.0 };
        }
    }

    pub fn reset_to_default_pattern(&mut self) {
        self.patterns = [[0.0; PATTERN_STEPS]; INSTRUMENT_COUNT];
        // Kick on 1 and 3, snare on 2 and 4.
        self.patterns[DrumInstrument::Kick as usize][0] = 1.0;
        self.patterns[DrumInstrument::Kick as usize][8] = 1.0;
        self.patterns[DrumInstrument::Snare as usize][4] = 1.0;
        self.patterns[DrumInstrument::Snare as usize][12] = 1.0;
        self.patterns[DrumInstrument::HiHat as usize] = DEFAULT_HIHAT_VELOCITIES;
    }

    /// Snap the sequencer back to step 0 (loop-start sync).
    pub fn reset_beat(&mut self) {
        self.current_step = 0;
        self.sample_counter = 0.0;
        self.trigger_step(0);
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn samples_per_sixteenth(&self) -> f32 {
        self.samples_per_sixteenth
    }

    fn update_step_timing(&mut self) {
        let samples_per_beat = self.sample_rate * 60.0 / self.bpm;
        self.samples_per_sixteenth = samples_per_beat / 4.0;
    }

    fn trigger_step(&mut self, step: usize) {
        for i in 0..INSTRUMENT_COUNT {
            if !self.instrument_enabled[i] {
                continue;
            }
            let velocity = self.patterns[i][step] * self.instrument_volume[i];
            if velocity <= 0.0 {
                continue;
            }
            match i {
                0 => self.synth.trigger_kick(velocity),
                1 => self.synth.trigger_snare(velocity),
                _ => self.synth.trigger_hihat(velocity),
            }
        }
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if !self.enabled {
            // Keep rendering so already-triggered hits decay naturally.
            return self.synth.next_sample() * self.volume;
        }

        self.sample_counter += 1.0;
        if self.sample_counter >= self.samples_per_sixteenth {
            // Keep the fractional remainder so timing error never accumulates.
            self.sample_counter -= self.samples_per_sixteenth;
            self.current_step = (self.current_step + 1) % PATTERN_STEPS;
            let step = self.current_step;
            self.trigger_step(step);
        }

        self.synth.next_sample() * self.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    #[test]
    fn step_round_trip_clamps() {
        let mut machine = DrumMachine::new(SR);
        machine.set_step(DrumInstrument::Kick, 3, 2.5);
        assert_eq!(machine.step(DrumInstrument::Kick, 3), 1.0);
        machine.set_step(DrumInstrument::Kick, 3, -1.0);
        assert_eq!(machine.step(DrumInstrument::Kick, 3), 0.0);
        machine.set_step(DrumInstrument::Snare, 7, 0.6);
        assert_eq!(machine.step(DrumInstrument::Snare, 7), 0.6);
    }

    #[test]
    fn toggle_step_flips_between_zero_and_one() {
        let mut machine = DrumMachine::new(SR);
        machine.set_step(DrumInstrument::Snare, 2, 0.0);
        machine.toggle_step(DrumInstrument::Snare, 2);
        assert_eq!(machine.step(DrumInstrument::Snare, 2), 1.0);
        machine.toggle_step(DrumInstrument::Snare, 2);
        assert_eq!(machine.step(DrumInstrument::Snare, 2), 0.0);
        // A partial velocity zeroes first, then comes back as full.
        machine.set_step(DrumInstrument::Snare, 2, 0.4);
        machine.toggle_step(DrumInstrument::Snare, 2);
        assert_eq!(machine.step(DrumInstrument::Snare, 2), 0.0);
        machine.toggle_step(DrumInstrument::Snare, 2);
        assert_eq!(machine.step(DrumInstrument::Snare, 2), 1.0);
    }

    #[test]
    fn bpm_is_clamped_and_timing_matches() {
        let mut machine = DrumMachine::new(SR);
        machine.set_bpm(250.0);
        assert_eq!(machine.bpm(), 200.0);
        machine.set_bpm(120.0);
        let expected = SR * 60.0 / (120.0 * 4.0);
        assert!((machine.samples_per_sixteenth() - expected).abs() < 1.0);
    }

    #[test]
    fn default_pattern_has_the_classic_backbeat() {
        let machine = DrumMachine::new(SR);
        assert_eq!(machine.step(DrumInstrument::Kick, 0), 1.0);
        assert_eq!(machine.step(DrumInstrument::Kick, 8), 1.0);
        assert_eq!(machine.step(DrumInstrument::Kick, 4), 0.0);
        assert_eq!(machine.step(DrumInstrument::Snare, 4), 1.0);
        assert_eq!(machine.step(DrumInstrument::Snare, 12), 1.0);
        for s in 0..PATTERN_STEPS {
            assert!(machine.step(DrumInstrument::HiHat, s) > 0.0);
        }
    }

    #[test]
    fn sequencer_advances_sixteen_steps_per_bar() {
        let mut machine = DrumMachine::new(SR);
        machine.set_bpm(120.0);
        machine.set_enabled(true);
        // One bar at 120 BPM is two seconds.
        for _ in 0..(SR * 2.0) as usize {
            machine.next_sample();
        }
        // After exactly one bar the counter is back near step 0.
        assert!(machine.current_step() == 0 || machine.current_step() == 15);
    }

    #[test]
    fn fractional_timing_does_not_drift() {
        // 130 BPM gives a non-integer samples-per-sixteenth.
        let mut machine = DrumMachine::new(SR);
        machine.set_bpm(130.0);
        machine.set_enabled(true);
        let per_step = machine.samples_per_sixteenth();
        let steps = 64 * 16;
        let total = (per_step * steps as f32) as usize;
        let mut transitions = 0;
        let mut last_step = machine.current_step();
        for _ in 0..total {
            machine.next_sample();
            if machine.current_step() != last_step {
                transitions += 1;
                last_step = machine.current_step();
            }
        }
        // With remainder preservation the step count stays within one step
        // of the ideal grid even after 64 bars.
        assert!((transitions as i64 - steps as i64).abs() <= 1, "drifted: {}", transitions);
    }
}
