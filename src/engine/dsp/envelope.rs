// ADSR envelope generator.
//
// Linear attack and release, leaky-integrator decay toward the sustain
// level. Retriggerable: a new gate-on restarts the attack from the current
// level so fast repeated notes stay click-free.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Clone)]
pub struct Envelope {
    sample_rate: f32,

    attack_time: f32,
    decay_time: f32,
    sustain_level: f32,
    release_time: f32,

    attack_rate: f32,
    decay_rate: f32,
    release_rate: f32,

    level: f32,
    stage: EnvelopeStage,
}

impl Envelope {
    pub fn new(sample_rate: f32) -> Self {
        let mut env = Self {
            sample_rate,
            attack_time: 0.01,
            decay_time: 0.1,
            sustain_level: 0.7,
            release_time: 0.3,
            attack_rate: 0.0,
            decay_rate: 0.0,
            release_rate: 0.0,
            level: 0.0,
            stage: EnvelopeStage::Idle,
        };
        env.recalculate_rates();
        env
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recalculate_rates();
    }

    pub fn set_attack(&mut self, time: f32) {
        self.attack_time = time.max(0.001);
        self.attack_rate = self.rate_for(self.attack_time);
    }

    pub fn set_decay(&mut self, time: f32) {
        self.decay_time = time.max(0.001);
        self.decay_rate = self.rate_for(self.decay_time);
    }

    pub fn set_sustain(&mut self, level: f32) {
        self.sustain_level = level.clamp(0.0, 1.0);
    }

    pub fn set_release(&mut self, time: f32) {
        self.release_time = time.max(0.001);
        self.release_rate = self.rate_for(self.release_time);
    }

    pub fn gate(&mut self, on: bool) {
        if on {
            // Attack from the current level, not from zero.
            self.stage = EnvelopeStage::Attack;
        } else if self.stage != EnvelopeStage::Idle {
            self.stage = EnvelopeStage::Release;
        }
    }

    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    fn recalculate_rates(&mut self) {
        self.attack_rate = self.rate_for(self.attack_time);
        self.decay_rate = self.rate_for(self.decay_time);
        self.release_rate = self.rate_for(self.release_time);
    }

    #[inline]
    fn rate_for(&self, time: f32) -> f32 {
        1.0 / (time * self.sample_rate)
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle => {
                self.level = 0.0;
            }
            EnvelopeStage::Attack => {
                self.level += self.attack_rate;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                self.level -= self.decay_rate * (self.level - self.sustain_level + 0.001);
                if self.level <= self.sustain_level + 0.0001 {
                    self.level = self.sustain_level;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => {
                self.level = self.sustain_level;
            }
            EnvelopeStage::Release => {
                self.level -= self.release_rate;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }

        self.level = self.level.clamp(0.0, 1.0);
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    #[test]
    fn full_cycle_reaches_idle() {
        let mut env = Envelope::new(SR);
        env.set_attack(0.01);
        env.set_decay(0.05);
        env.set_sustain(0.5);
        env.set_release(0.1);

        env.gate(true);
        for _ in 0..(SR * 0.5) as usize {
            env.next_sample();
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert!((env.level() - 0.5).abs() < 0.01);

        env.gate(false);
        // Release time plus a 10 ms margin.
        for _ in 0..(SR * 0.11) as usize {
            env.next_sample();
        }
        assert!(!env.is_active());
        assert!(env.level() < 1e-3);
    }

    #[test]
    fn attack_hits_one_at_the_expected_time() {
        let mut env = Envelope::new(SR);
        env.set_attack(0.1);
        env.set_sustain(1.0);
        env.gate(true);
        let samples = (SR * 0.1) as usize;
        let mut level = 0.0;
        for _ in 0..samples + 2 {
            level = env.next_sample();
        }
        assert!((level - 1.0).abs() < 1e-3);
    }

    #[test]
    fn retrigger_keeps_current_level() {
        let mut env = Envelope::new(SR);
        env.set_attack(0.1);
        env.gate(true);
        for _ in 0..1000 {
            env.next_sample();
        }
        let before = env.level();
        assert!(before > 0.0);

        env.gate(true);
        let after = env.next_sample();
        assert!(after >= before, "retrigger reset the level");
    }

    #[test]
    fn minimum_time_is_one_millisecond() {
        let mut env = Envelope::new(SR);
        env.set_attack(0.0);
        env.gate(true);
        // 1 ms at 48 kHz is 48 samples; the ramp must not be instantaneous.
        let first = env.next_sample();
        assert!(first < 0.1);
    }
}
