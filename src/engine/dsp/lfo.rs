// Global modulation LFO.
//
// Single triangle oscillator shared by every voice; depth controls map the
// raw value onto pitch (semitones), filter cutoff and pulse width.

#[derive(Clone)]
pub struct Lfo {
    sample_rate: f32,
    rate: f32,
    phase: f32,
    phase_increment: f32,
    value: f32,

    pitch_depth: f32,
    filter_depth: f32,
    pwm_depth: f32,
}

impl Lfo {
    pub fn new(sample_rate: f32) -> Self {
        let mut lfo = Self {
            sample_rate,
            rate: 1.0,
            phase: 0.0,
            phase_increment: 0.0,
            value: 0.0,
            pitch_depth: 0.0,
            filter_depth: 0.0,
            pwm_depth: 0.0,
        };
        lfo.update_phase_increment();
        lfo
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.update_phase_increment();
    }

    pub fn set_rate(&mut self, rate_hz: f32) {
        self.rate = rate_hz.clamp(0.1, 20.0);
        self.update_phase_increment();
    }

    pub fn set_pitch_depth(&mut self, depth: f32) {
        self.pitch_depth = depth.clamp(0.0, 1.0);
    }

    pub fn set_filter_depth(&mut self, depth: f32) {
        self.filter_depth = depth.clamp(0.0, 1.0);
    }

    pub fn set_pwm_depth(&mut self, depth: f32) {
        self.pwm_depth = depth.clamp(0.0, 1.0);
    }

    fn update_phase_increment(&mut self) {
        self.phase_increment = self.rate / self.sample_rate;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.value = 0.0;
    }

    #[inline]
    pub fn tick(&mut self) {
        self.value = if self.phase < 0.5 {
            4.0 * self.phase - 1.0
        } else {
            3.0 - 4.0 * self.phase
        };
        self.phase += self.phase_increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
    }

    /// Pitch deviation in semitones, up to +-2 at full depth.
    #[inline]
    pub fn pitch_mod(&self) -> f32 {
        self.value * self.pitch_depth * 2.0
    }

    /// Bipolar filter modulation, scaled to Hz by the voice.
    #[inline]
    pub fn filter_mod(&self) -> f32 {
        self.value * self.filter_depth
    }

    /// Pulse-width offset, up to +-0.4 to keep the width in a safe range.
    #[inline]
    pub fn pwm_mod(&self) -> f32 {
        self.value * self.pwm_depth * 0.4
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}
