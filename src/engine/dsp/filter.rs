// Voice filter: resonant biquad low-pass followed by a one-pole high-pass.
//
// Resonance maps to Q with a steep ramp in the last 5% of the range so the
// filter can be pushed into self-oscillation. Cutoff changes are smoothed
// and coefficients recomputed only while the smoothed value is still more
// than 1 Hz away from its target.

use std::f32::consts::PI;

#[derive(Clone)]
pub struct VoiceFilter {
    sample_rate: f32,

    cutoff: f32,
    target_cutoff: f32,
    resonance: f32,
    smoothing: f32,

    // Biquad coefficients (feedforward a*, feedback b*) and DF1 state.
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,

    hpf_cutoff: f32,
    hpf_coeff: f32,
    hpf_state: f32,
    bass_boost: f32,

    key_tracking: f32,
    note_frequency: f32,
}

impl VoiceFilter {
    pub fn new(sample_rate: f32) -> Self {
        let mut filter = Self {
            sample_rate,
            cutoff: 10000.0,
            target_cutoff: 10000.0,
            resonance: 0.0,
            smoothing: 0.001,
            a0: 1.0,
            a1: 0.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            hpf_cutoff: 0.0,
            hpf_coeff: 0.0,
            hpf_state: 0.0,
            bass_boost: 1.2,
            key_tracking: 0.0,
            note_frequency: 440.0,
        };
        filter.calculate_lpf_coefficients();
        filter.calculate_hpf_coefficient();
        filter
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.calculate_lpf_coefficients();
        self.calculate_hpf_coefficient();
    }

    #[inline]
    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        self.target_cutoff = cutoff_hz.clamp(20.0, 20000.0);
    }

    pub fn set_resonance(&mut self, resonance: f32) {
        self.resonance = resonance.clamp(0.0, 1.0);
        self.calculate_lpf_coefficients();
    }

    pub fn set_hpf_cutoff(&mut self, cutoff_hz: f32) {
        self.hpf_cutoff = cutoff_hz.clamp(0.0, 1000.0);
        self.calculate_hpf_coefficient();
    }

    pub fn set_key_tracking(&mut self, amount: f32) {
        self.key_tracking = amount.clamp(0.0, 1.0);
    }

    pub fn set_note_frequency(&mut self, freq: f32) {
        self.note_frequency = freq;
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
        self.hpf_state = 0.0;
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        // Key tracking relative to middle C, 2 kHz per octave at full amount.
        let mut effective_cutoff = self.target_cutoff;
        if self.key_tracking > 0.0 {
            let octave_offset = (self.note_frequency / 261.63).log2();
            effective_cutoff += octave_offset * 2000.0 * self.key_tracking;
        }
        effective_cutoff = effective_cutoff.clamp(20.0, 20000.0);

        if (self.cutoff - effective_cutoff).abs() > 1.0 {
            self.cutoff += (effective_cutoff - self.cutoff) * self.smoothing;
            self.calculate_lpf_coefficients();
        }

        let mut lpf = self.a0 * input + self.a1 * self.x1 + self.a2 * self.x2
            - self.b1 * self.y1
            - self.b2 * self.y2;

        lpf = Self::soft_saturate(lpf);

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = lpf;

        // Resonance boosts level; pull the output back proportionally.
        lpf *= 1.0 / (1.0 + self.resonance * 2.0);

        if self.hpf_cutoff < 1.0 {
            // HPF parked at zero doubles as a gentle bass lift.
            lpf * self.bass_boost
        } else {
            self.hpf_state += self.hpf_coeff * (lpf - self.hpf_state);
            lpf - self.hpf_state
        }
    }

    #[inline]
    fn soft_saturate(x: f32) -> f32 {
        let abs = x.abs();
        if abs <= 0.8 {
            return x;
        }
        let compressed = 0.8 + 0.2 * ((abs - 0.8) * 3.0).tanh();
        compressed.copysign(x)
    }

    fn calculate_lpf_coefficients(&mut self) {
        let q = if self.resonance < 0.95 {
            0.707 + self.resonance * 15.0
        } else {
            // Last 5% ramps into self-oscillation territory.
            let t = (self.resonance - 0.95) / 0.05;
            15.0 + t * 35.0
        };

        let fc = self.cutoff.min(self.sample_rate * 0.499);
        let omega = 2.0 * PI * fc / self.sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        self.a0 = b0 / a0;
        self.a1 = b1 / a0;
        self.a2 = b2 / a0;
        self.b1 = a1 / a0;
        self.b2 = a2 / a0;
    }

    fn calculate_hpf_coefficient(&mut self) {
        if self.hpf_cutoff < 1.0 {
            self.hpf_coeff = 0.0;
        } else {
            let fc = self.hpf_cutoff.min(self.sample_rate * 0.499);
            self.hpf_coeff = 1.0 - (-2.0 * PI * fc / self.sample_rate).exp();
        }
    }
}
