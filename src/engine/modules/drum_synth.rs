// Analog-style drum voice synthesis.
//
// Kick: pitch-swept sine with a short noise click. Snare: low sine body
// plus bandpass-filtered noise rattle. Hi-hat: six inharmonic squares,
// high-passed, with a noise sizzle layer. Everything is synthesized on
// trigger; there is no sample playback.

use std::f32::consts::{PI, TAU};

const KICK_START_FREQ: f32 = 150.0;
const KICK_END_FREQ: f32 = 55.0;
const KICK_PITCH_DECAY: f32 = 0.0008;
const KICK_AMP_DECAY: f32 = 0.00005;
const KICK_CLICK_MS: f32 = 2.0;

const SNARE_BODY_FREQ: f32 = 200.0;
const SNARE_TONE_DECAY: f32 = 0.00035;
const SNARE_NOISE_DECAY: f32 = 0.00045;
const SNARE_BODY_MIX: f32 = 0.85;
const SNARE_NOISE_MIX: f32 = 0.15;
const SNARE_BP_FREQ: f32 = 3500.0;
const SNARE_BP_Q: f32 = 0.7;

const HIHAT_FREQS: [f32; 6] = [205.3, 369.6, 304.4, 522.7, 800.0, 1127.0];
const HIHAT_AMP_DECAY: f32 = 0.0006;
const HIHAT_HP_FREQ: f32 = 7000.0;
const HIHAT_TONE_MIX: f32 = 0.6;
const HIHAT_NOISE_MIX: f32 = 0.4;

#[derive(Clone, Copy, Default)]
struct KickState {
    active: bool,
    phase: f32,
    pitch_env: f32,
    amp_env: f32,
    velocity: f32,
    sample_count: u32,
}

#[derive(Clone, Copy, Default)]
struct SnareState {
    active: bool,
    body_phase: f32,
    tone_env: f32,
    noise_env: f32,
    velocity: f32,
    bp_low: f32,
    bp_band: f32,
}

#[derive(Clone, Copy, Default)]
struct HiHatState {
    active: bool,
    phases: [f32; 6],
    amp_env: f32,
    velocity: f32,
    hp_state: f32,
    noise_hp_state: f32,
}

pub struct DrumSynth {
    sample_rate: f32,
    rng: u32,
    kick: KickState,
    snare: SnareState,
    hihat: HiHatState,
}

impl DrumSynth {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            rng: 0x2545f491,
            kick: KickState::default(),
            snare: SnareState::default(),
            hihat: HiHatState::default(),
        }
    }

    pub fn trigger_kick(&mut self, velocity: f32) {
        // Exponential velocity curve for a natural dynamic response.
        self.kick.velocity = velocity.clamp(0.0, 1.0).powi(2);
        self.kick.active = true;
        self.kick.phase = 0.0;
        self.kick.pitch_env = 1.0;
        self.kick.amp_env = 1.0;
        self.kick.sample_count = 0;
    }

    pub fn trigger_snare(&mut self, velocity: f32) {
        self.snare.velocity = velocity.clamp(0.0, 1.0).powi(2);
        self.snare.active = true;
        self.snare.body_phase = 0.0;
        self.snare.tone_env = 1.0;
        self.snare.noise_env = 1.0;
        self.snare.bp_low = 0.0;
        self.snare.bp_band = 0.0;
    }

    pub fn trigger_hihat(&mut self, velocity: f32) {
        // Floor at 0.3 so ghost notes still speak.
        self.hihat.velocity = velocity.clamp(0.3, 1.0);
        self.hihat.active = true;
        self.hihat.amp_env = 1.0;
        self.hihat.phases = [0.0; 6];
        self.hihat.hp_state = 0.0;
        self.hihat.noise_hp_state = 0.0;
    }

    pub fn is_active(&self) -> bool {
        self.kick.active || self.snare.active || self.hihat.active
    }

    #[inline]
    fn noise(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x as f32) * 2.3283064365e-10 * 2.0 - 1.0
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let mut output = 0.0;
        if self.kick.active {
            output += self.kick_sample();
        }
        if self.snare.active {
            output += self.snare_sample();
        }
        if self.hihat.active {
            output += self.hihat_sample();
        }
        output
    }

    fn kick_sample(&mut self) -> f32 {
        let freq = KICK_END_FREQ + (KICK_START_FREQ - KICK_END_FREQ) * self.kick.pitch_env;

        let mut sample = (self.kick.phase * TAU).sin();

        let click_samples = (KICK_CLICK_MS / 1000.0) * self.sample_rate;
        if (self.kick.sample_count as f32) < click_samples {
            let click_env = 1.0 - self.kick.sample_count as f32 / click_samples;
            sample += self.noise() * click_env * 0.15;
        }

        sample *= self.kick.amp_env;

        self.kick.phase += freq / self.sample_rate;
        if self.kick.phase >= 1.0 {
            self.kick.phase -= 1.0;
        }

        let scale = self.sample_rate / 48000.0;
        self.kick.pitch_env *= 1.0 - KICK_PITCH_DECAY * scale;
        self.kick.amp_env *= 1.0 - KICK_AMP_DECAY * scale;
        self.kick.sample_count += 1;

        if self.kick.amp_env < 0.001 {
            self.kick.active = false;
        }

        sample * self.kick.velocity
    }

    fn snare_sample(&mut self) -> f32 {
        let body = (self.snare.body_phase * TAU).sin();
        let tone = body * SNARE_BODY_MIX * self.snare.tone_env;

        // State-variable bandpass keeps the rattle in the mids.
        let raw_noise = self.noise();
        let f = 2.0 * (PI * SNARE_BP_FREQ / self.sample_rate).sin();
        let q = 1.0 / SNARE_BP_Q;
        self.snare.bp_low += f * self.snare.bp_band;
        let bp_high = raw_noise - self.snare.bp_low - q * self.snare.bp_band;
        self.snare.bp_band += f * bp_high;

        let noise = self.snare.bp_band * SNARE_NOISE_MIX * self.snare.noise_env;

        let sample = tone + noise;

        self.snare.body_phase += SNARE_BODY_FREQ / self.sample_rate;
        if self.snare.body_phase >= 1.0 {
            self.snare.body_phase -= 1.0;
        }

        let scale = self.sample_rate / 48000.0;
        self.snare.tone_env *= 1.0 - SNARE_TONE_DECAY * scale;
        self.snare.noise_env *= 1.0 - SNARE_NOISE_DECAY * scale;

        if self.snare.tone_env < 0.001 && self.snare.noise_env < 0.001 {
            self.snare.active = false;
        }

        sample * self.snare.velocity
    }

    fn hihat_sample(&mut self) -> f32 {
        let mut tone_sum = 0.0;
        for (phase, freq) in self.hihat.phases.iter_mut().zip(HIHAT_FREQS.iter()) {
            tone_sum += if *phase < 0.5 { 1.0 } else { -1.0 };
            *phase += freq / self.sample_rate;
            if *phase >= 1.0 {
                *phase -= 1.0;
            }
        }
        tone_sum /= 6.0;

        let hp_coeff = 1.0 - (-TAU * HIHAT_HP_FREQ / self.sample_rate).exp();
        self.hihat.hp_state += hp_coeff * (tone_sum - self.hihat.hp_state);
        let filtered_tone = tone_sum - self.hihat.hp_state;

        let noise = self.noise();
        self.hihat.noise_hp_state += hp_coeff * (noise - self.hihat.noise_hp_state);
        let filtered_noise = noise - self.hihat.noise_hp_state;

        let mut sample = filtered_tone * HIHAT_TONE_MIX + filtered_noise * HIHAT_NOISE_MIX;
        sample *= self.hihat.amp_env * self.hihat.velocity;

        let scale = self.sample_rate / 48000.0;
        self.hihat.amp_env *= 1.0 - HIHAT_AMP_DECAY * scale;

        if self.hihat.amp_env < 0.001 {
            self.hihat.active = false;
        }

        sample * 0.175
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    #[test]
    fn silent_until_triggered() {
        let mut synth = DrumSynth::new(SR);
        assert!(!synth.is_active());
        for _ in 0..100 {
            assert_eq!(synth.next_sample(), 0.0);
        }
    }

    #[test]
    fn kick_decays_and_deactivates() {
        let mut synth = DrumSynth::new(SR);
        synth.trigger_kick(1.0);
        let mut peak = 0.0f32;
        for _ in 0..SR as usize * 4 {
            peak = peak.max(synth.next_sample().abs());
            if !synth.is_active() {
                break;
            }
        }
        assert!(peak > 0.5, "kick too quiet: {}", peak);
        assert!(!synth.kick.active, "kick never decayed");
    }

    #[test]
    fn kick_velocity_curve_is_exponential() {
        let mut synth = DrumSynth::new(SR);
        synth.trigger_kick(0.5);
        assert!((synth.kick.velocity - 0.25).abs() < 1e-6);
    }

    #[test]
    fn hihat_velocity_is_floored() {
        let mut synth = DrumSynth::new(SR);
        synth.trigger_hihat(0.0);
        assert!((synth.hihat.velocity - 0.3).abs() < 1e-6);
        synth.trigger_hihat(2.0);
        assert!((synth.hihat.velocity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn snare_mixes_tone_and_noise() {
        let mut synth = DrumSynth::new(SR);
        synth.trigger_snare(1.0);
        let mut energy = 0.0f32;
        for _ in 0..4800 {
            let s = synth.next_sample();
            assert!(s.is_finite());
            energy += s * s;
        }
        assert!(energy > 0.1, "snare produced almost no energy");
    }

    #[test]
    fn voices_overlap_without_blowup() {
        let mut synth = DrumSynth::new(SR);
        synth.trigger_kick(1.0);
        synth.trigger_snare(1.0);
        synth.trigger_hihat(1.0);
        for _ in 0..9600 {
            let s = synth.next_sample();
            assert!(s.abs() < 3.0, "sum ran away: {}", s);
        }
    }
}
