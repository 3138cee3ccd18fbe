// BBD-style stereo chorus.
//
// A single mono delay line with two interpolated read taps; the LFO pushes
// one tap later while pulling the other earlier, which is what spreads the
// image. Two classic modes plus bypass.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChorusMode {
    Off = 0,
    ModeI = 1,
    ModeII = 2,
}

impl ChorusMode {
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => ChorusMode::ModeI,
            2 => ChorusMode::ModeII,
            _ => ChorusMode::Off,
        }
    }
}

#[derive(Clone, Copy)]
struct ModeParams {
    rate: f32,       // LFO rate in Hz
    depth: f32,      // modulation depth in seconds
    base_delay: f32, // base delay in seconds
    wet_mix: f32,
}

const MODE_I: ModeParams = ModeParams { rate: 0.5, depth: 0.0015, base_delay: 0.006, wet_mix: 0.5 };
const MODE_II: ModeParams = ModeParams { rate: 0.8, depth: 0.003, base_delay: 0.008, wet_mix: 0.6 };

#[derive(Clone)]
pub struct Chorus {
    sample_rate: f32,
    mode: ChorusMode,
    params: ModeParams,

    delay_line: Vec<f32>,
    write_index: usize,
    lfo_phase: f32,
}

impl Chorus {
    pub fn new(sample_rate: f32) -> Self {
        // 50 ms of headroom covers both modes at full depth.
        let size = (0.05 * sample_rate) as usize;
        Self {
            sample_rate,
            mode: ChorusMode::Off,
            params: MODE_I,
            delay_line: vec![0.0; size.max(2)],
            write_index: 0,
            lfo_phase: 0.0,
        }
    }

    pub fn set_mode(&mut self, mode: ChorusMode) {
        self.mode = mode;
        self.params = match mode {
            ChorusMode::ModeII => MODE_II,
            _ => MODE_I,
        };
    }

    pub fn mode(&self) -> ChorusMode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.delay_line.fill(0.0);
        self.write_index = 0;
        self.lfo_phase = 0.0;
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> (f32, f32) {
        if self.mode == ChorusMode::Off {
            return (input, input);
        }

        self.delay_line[self.write_index] = input;

        let lfo = (self.lfo_phase * TAU).sin();

        let base = self.params.base_delay * self.sample_rate;
        let depth = self.params.depth * self.sample_rate;
        let max_delay = (self.delay_line.len() - 1) as f32;

        // Inverted modulation between channels creates the stereo spread.
        let delay_l = (base + lfo * depth).clamp(1.0, max_delay);
        let delay_r = (base - lfo * depth).clamp(1.0, max_delay);

        let wet_l = self.read_interpolated(delay_l);
        let wet_r = self.read_interpolated(delay_r);

        let wet = self.params.wet_mix;
        let dry = 1.0 - wet * 0.5;

        self.write_index = (self.write_index + 1) % self.delay_line.len();
        self.lfo_phase += self.params.rate / self.sample_rate;
        if self.lfo_phase >= 1.0 {
            self.lfo_phase -= 1.0;
        }

        (input * dry + wet_l * wet, input * dry + wet_r * wet)
    }

    #[inline]
    fn read_interpolated(&self, delay_samples: f32) -> f32 {
        let len = self.delay_line.len();
        let mut read_pos = self.write_index as f32 - delay_samples;
        if read_pos < 0.0 {
            read_pos += len as f32;
        }
        let index0 = read_pos as usize % len;
        let index1 = (index0 + 1) % len;
        let frac = read_pos - read_pos.floor();
        self.delay_line[index0] * (1.0 - frac) + self.delay_line[index1] * frac
    }
}
