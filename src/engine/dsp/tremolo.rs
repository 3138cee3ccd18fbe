// Vactrol-style tremolo.
//
// Sine-driven gain modulation with a one-pole lag on the gain itself,
// mimicking the LED/LDR response of an electric-piano tremolo circuit.

use std::f32::consts::TAU;

#[derive(Clone)]
pub struct Tremolo {
    sample_rate: f32,
    rate: f32,
    depth: f32,
    phase: f32,
    phase_increment: f32,
    current_mod: f32,
    smoothing_coeff: f32,
}

impl Tremolo {
    pub fn new(sample_rate: f32) -> Self {
        let mut tremolo = Self {
            sample_rate,
            rate: 5.0,
            depth: 0.0,
            phase: 0.0,
            phase_increment: 0.0,
            current_mod: 1.0,
            smoothing_coeff: 0.999,
        };
        tremolo.configure(sample_rate);
        tremolo
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.configure(sample_rate);
    }

    fn configure(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        // ~8 ms lag, the inherent response time of the LDR.
        let smoothing_ms = 8.0;
        self.smoothing_coeff = (-1.0 / (smoothing_ms * 0.001 * sample_rate)).exp();
        self.update_phase_increment();
    }

    pub fn set_rate(&mut self, rate_hz: f32) {
        self.rate = rate_hz.clamp(0.5, 10.0);
        self.update_phase_increment();
    }

    pub fn set_depth(&mut self, depth: f32) {
        self.depth = depth.clamp(0.0, 1.0);
    }

    fn update_phase_increment(&mut self) {
        self.phase_increment = self.rate / self.sample_rate;
    }

    #[inline]
    fn advance(&mut self) -> f32 {
        let lfo = (self.phase * TAU).sin();
        // Full depth drops the level to ~30% at the trough.
        let mod_range = self.depth * 0.70;
        let target = 1.0 - mod_range * 0.5 * (1.0 - lfo);
        self.current_mod =
            self.current_mod * self.smoothing_coeff + target * (1.0 - self.smoothing_coeff);
        self.phase += self.phase_increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        self.current_mod
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        if self.depth < 0.001 {
            return input;
        }
        input * self.advance()
    }

    #[inline]
    pub fn process_stereo(&mut self, left: f32, right: f32) -> (f32, f32) {
        if self.depth < 0.001 {
            return (left, right);
        }
        let gain = self.advance();
        (left * gain, right * gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_depth_is_transparent() {
        let mut tremolo = Tremolo::new(48000.0);
        tremolo.set_depth(0.0);
        assert_eq!(tremolo.process(0.5), 0.5);
    }

    #[test]
    fn full_depth_modulates_gain() {
        let mut tremolo = Tremolo::new(48000.0);
        tremolo.set_depth(1.0);
        tremolo.set_rate(8.0);
        let mut min = 1.0f32;
        let mut max = 0.0f32;
        for _ in 0..48000 {
            let y = tremolo.process(1.0);
            min = min.min(y);
            max = max.max(y);
        }
        assert!(min < 0.5, "trough too shallow: {}", min);
        assert!(max > 0.9, "peak too low: {}", max);
    }
}
