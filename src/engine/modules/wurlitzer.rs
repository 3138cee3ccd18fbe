// Electric-piano backend.
//
// Reed-piano physical model: fundamental plus two stretched harmonics, an
// FM "bark" transient, tine partials and hammer noise, each shaped by its
// own envelope derived from velocity. The engine runs a parallel 12-voice
// bank into the classic chain tremolo -> chorus -> delay -> reverb.

use std::f32::consts::TAU;

use crate::engine::dsp::chorus::{Chorus, ChorusMode};
use crate::engine::dsp::delay::StereoDelay;
use crate::engine::dsp::reverb::Reverb;
use crate::engine::dsp::tremolo::Tremolo;

pub const WURLI_MAX_VOICES: usize = 12;

const TINE_INHARMONICITY: f32 = 1.0005;
const FEEDBACK_AMOUNT: f32 = 0.08;

#[derive(Clone, Copy, PartialEq, Eq)]
enum EnvStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Per-partial envelope with exponential decay and release.
#[derive(Clone, Copy)]
struct PartialEnv {
    level: f32,
    attack_rate: f32,
    decay_rate: f32,
    sustain_level: f32,
    release_rate: f32,
    stage: EnvStage,
}

impl PartialEnv {
    fn new() -> Self {
        Self {
            level: 0.0,
            attack_rate: 0.0,
            decay_rate: 0.0,
            sustain_level: 0.0,
            release_rate: 0.0,
            stage: EnvStage::Idle,
        }
    }

    fn trigger(&mut self, attack: f32, decay: f32, sustain: f32, release: f32, sr: f32) {
        self.level = 0.0;
        self.sustain_level = sustain;
        self.attack_rate = if attack > 0.0005 { 1.0 / (attack * sr) } else { 1.0 };
        self.decay_rate = if decay > 0.001 { 1.0 / (decay * sr) } else { 0.01 };
        self.release_rate = if release > 0.001 { 1.0 / (release * sr) } else { 0.01 };
        self.stage = EnvStage::Attack;
    }

    fn release(&mut self) {
        if self.stage != EnvStage::Idle && self.stage != EnvStage::Release {
            self.stage = EnvStage::Release;
        }
    }

    #[inline]
    fn process(&mut self) -> f32 {
        match self.stage {
            EnvStage::Idle => {}
            EnvStage::Attack => {
                self.level += self.attack_rate;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvStage::Decay;
                }
            }
            EnvStage::Decay => {
                self.level -= self.decay_rate * (self.level - self.sustain_level + 0.001);
                if self.level <= self.sustain_level + 0.001 {
                    self.level = self.sustain_level;
                    self.stage = EnvStage::Sustain;
                }
            }
            EnvStage::Sustain => {
                self.level = self.sustain_level;
            }
            EnvStage::Release => {
                self.level -= self.release_rate * (self.level + 0.001);
                if self.level <= 0.0005 {
                    self.level = 0.0;
                    self.stage = EnvStage::Idle;
                }
            }
        }
        self.level
    }

    fn is_active(&self) -> bool {
        self.stage != EnvStage::Idle || self.level > 0.0005
    }
}

#[derive(Clone)]
pub struct WurlitzerVoice {
    sample_rate: f32,
    midi_note: Option<u8>,
    frequency: f32,
    velocity: f32,
    active: bool,

    // Phase accumulators: fundamental, octave, 3rd harmonic, FM modulator.
    phase1: f32,
    phase2: f32,
    phase3: f32,
    phase4: f32,

    amp_env: PartialEnv,
    bark_env: PartialEnv,
    harmonic_env: PartialEnv,
    tine_env: PartialEnv,

    fundamental_level: f32,
    second_harmonic_level: f32,
    third_harmonic_level: f32,
    bark_intensity: f32,

    feedback: f32,
    dc_blocker: f32,
    rng: u32,
}

impl WurlitzerVoice {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            midi_note: None,
            frequency: 440.0,
            velocity: 0.7,
            active: false,
            phase1: 0.0,
            phase2: 0.0,
            phase3: 0.0,
            phase4: 0.0,
            amp_env: PartialEnv::new(),
            bark_env: PartialEnv::new(),
            harmonic_env: PartialEnv::new(),
            tine_env: PartialEnv::new(),
            fundamental_level: 0.6,
            second_harmonic_level: 0.25,
            third_harmonic_level: 0.15,
            bark_intensity: 0.0,
            feedback: 0.0,
            dc_blocker: 0.0,
            rng: 0x9e3779b9,
        }
    }

    pub fn note_on(&mut self, midi_note: u8, frequency: f32, velocity: f32) {
        self.midi_note = Some(midi_note);
        self.frequency = frequency;
        self.velocity = velocity.clamp(0.0, 1.0);
        self.active = true;

        self.phase1 = 0.0;
        self.phase2 = 0.0;
        self.phase3 = 0.0;
        self.phase4 = 0.0;
        self.feedback = 0.0;
        self.dc_blocker = 0.0;
        self.rng = (midi_note as u32).wrapping_mul(747796405).wrapping_add(2891336453);

        self.setup_envelopes(self.velocity);
    }

    pub fn note_off(&mut self) {
        self.amp_env.release();
        self.bark_env.release();
        self.harmonic_env.release();
        self.tine_env.release();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn midi_note(&self) -> Option<u8> {
        self.midi_note
    }

    /// Velocity shapes every envelope: hard hits bark faster and decay
    /// quicker, soft hits swell in and ring longer.
    fn setup_envelopes(&mut self, velocity: f32) {
        let sr = self.sample_rate;

        let attack_time = 0.008 + (1.0 - velocity) * 0.012; // 8-20 ms
        let decay_time = 2.0 + (1.0 - velocity) * 1.5; // 2.0-3.5 s
        self.amp_env.trigger(attack_time, decay_time, 0.0, 0.35, sr);

        let bark_decay = 0.04 + (1.0 - velocity) * 0.03; // 40-70 ms
        self.bark_env.trigger(0.003, bark_decay, 0.0, 0.02, sr);
        self.bark_intensity = 0.08 + velocity * 0.12;

        let harmonic_decay = 0.5 + (1.0 - velocity) * 0.3;
        self.harmonic_env.trigger(0.005, harmonic_decay, 0.12, 0.25, sr);

        let tine_decay = 1.2 + velocity * 0.5;
        self.tine_env.trigger(0.008, tine_decay, 0.15, 0.3, sr);

        self.fundamental_level = 0.65 + (1.0 - velocity) * 0.10;
        self.second_harmonic_level = 0.12 + velocity * 0.10;
        self.third_harmonic_level = 0.05 + velocity * 0.08;
    }

    #[inline]
    fn sine(phase: f32) -> f32 {
        (phase * TAU).sin()
    }

    // Reed-amp saturation: cubic below the rails, asymptotic above.
    #[inline]
    fn soft_clip(x: f32) -> f32 {
        if x > 1.0 {
            1.0 - 1.0 / (x + 1.0)
        } else if x < -1.0 {
            -1.0 + 1.0 / (-x + 1.0)
        } else {
            x - (x * x * x) / 6.0
        }
    }

    #[inline]
    fn hammer_noise(&mut self) -> f32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x as f32) * 2.3283064365e-10 * 2.0 - 1.0
    }

    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        if !self.active {
            return 0.0;
        }

        let amp_env = self.amp_env.process();
        let bark_env = self.bark_env.process();
        let harmonic_env = self.harmonic_env.process();
        let tine_env = self.tine_env.process();

        if !self.amp_env.is_active() {
            self.active = false;
            return 0.0;
        }

        let phase_inc = self.frequency / self.sample_rate;

        // FM bark on the fundamental's phase, strongest right at the hit.
        let bark_mod = Self::sine(self.phase4) * self.bark_intensity * bark_env * 0.8;
        let hammer =
            self.hammer_noise() * bark_env * bark_env * 0.03 * self.bark_intensity;

        let mut fundamental =
            Self::sine(self.phase1 + bark_mod + self.feedback * FEEDBACK_AMOUNT);
        fundamental *= self.fundamental_level * amp_env;

        let mut second = Self::sine(self.phase2 * TINE_INHARMONICITY);
        second *= self.second_harmonic_level * harmonic_env * amp_env;

        let mut third = Self::sine(self.phase3 * TINE_INHARMONICITY * TINE_INHARMONICITY);
        third *= self.third_harmonic_level * harmonic_env * amp_env;

        // Bell-like ring from the reed's upper partials.
        let mut tine = Self::sine(self.phase1 * 4.997) * 0.025;
        tine += Self::sine(self.phase1 * 5.994) * 0.015;
        tine *= tine_env * amp_env * (0.6 + self.velocity * 0.3);

        let mut sample = fundamental + second + third + tine + hammer;

        sample = Self::soft_clip(sample * 1.1) * 0.85;

        let dc_blocked = sample - self.dc_blocker;
        self.dc_blocker = self.dc_blocker * 0.999 + sample * 0.001;
        sample = dc_blocked;

        self.feedback = sample;

        self.phase1 += phase_inc;
        self.phase2 += phase_inc * 2.0;
        self.phase3 += phase_inc * 3.0;
        self.phase4 += phase_inc * 6.0;
        if self.phase1 >= 1.0 {
            self.phase1 -= 1.0;
        }
        if self.phase2 >= 1.0 {
            self.phase2 -= 1.0;
        }
        if self.phase3 >= 1.0 {
            self.phase3 -= 1.0;
        }
        if self.phase4 >= 1.0 {
            self.phase4 -= 1.0;
        }

        sample
    }

    #[cfg(test)]
    fn amp_attack_seconds(&self) -> f32 {
        1.0 / (self.amp_env.attack_rate * self.sample_rate)
    }

    #[cfg(test)]
    fn amp_decay_seconds(&self) -> f32 {
        1.0 / (self.amp_env.decay_rate * self.sample_rate)
    }
}

pub struct WurlitzerEngine {
    voices: [WurlitzerVoice; WURLI_MAX_VOICES],
    voice_age: [u64; WURLI_MAX_VOICES],
    age_counter: u64,

    tremolo: Tremolo,
    chorus: Chorus,
    delay: StereoDelay,
    reverb: Reverb,

    volume: f32,
}

impl WurlitzerEngine {
    pub fn new(sample_rate: f32) -> Self {
        let mut delay = StereoDelay::new(sample_rate);
        delay.set_time(0.25);
        delay.set_mix(0.0);
        let mut reverb = Reverb::new(sample_rate);
        reverb.set_size(0.3);
        reverb.set_mix(0.0);
        let mut tremolo = Tremolo::new(sample_rate);
        tremolo.set_rate(5.0);
        tremolo.set_depth(0.0);

        Self {
            voices: std::array::from_fn(|_| WurlitzerVoice::new(sample_rate)),
            voice_age: [0; WURLI_MAX_VOICES],
            age_counter: 0,
            tremolo,
            chorus: Chorus::new(sample_rate),
            delay,
            reverb,
            volume: 0.7,
        }
    }

    pub fn note_on(&mut self, midi_note: u8, frequency: f32, velocity: f32) {
        if let Some(index) = self.find_voice_with_note(midi_note) {
            self.voices[index].note_on(midi_note, frequency, velocity);
            self.age_counter += 1;
            self.voice_age[index] = self.age_counter;
            return;
        }

        let index = self.find_free_voice().unwrap_or_else(|| self.steal_oldest_voice());
        self.voices[index].note_on(midi_note, frequency, velocity);
        self.age_counter += 1;
        self.voice_age[index] = self.age_counter;
    }

    pub fn note_off(&mut self, midi_note: u8) {
        for voice in &mut self.voices {
            if voice.midi_note() == Some(midi_note) && voice.is_active() {
                voice.note_off();
            }
        }
    }

    pub fn all_notes_off(&mut self) {
        for voice in &mut self.voices {
            if voice.is_active() {
                voice.note_off();
            }
        }
    }

    pub fn set_tremolo_rate(&mut self, rate_hz: f32) {
        self.tremolo.set_rate(rate_hz);
    }

    pub fn set_tremolo_depth(&mut self, depth: f32) {
        self.tremolo.set_depth(depth);
    }

    pub fn set_chorus_mode(&mut self, mode: ChorusMode) {
        self.chorus.set_mode(mode);
    }

    pub fn set_reverb_size(&mut self, size: f32) {
        self.reverb.set_size(size);
    }

    pub fn set_reverb_mix(&mut self, mix: f32) {
        self.reverb.set_mix(mix);
    }

    pub fn set_delay_time(&mut self, time: f32) {
        self.delay.set_time(time);
    }

    pub fn set_delay_feedback(&mut self, feedback: f32) {
        self.delay.set_feedback(feedback);
    }

    pub fn set_delay_mix(&mut self, mix: f32) {
        self.delay.set_mix(mix);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    #[inline]
    pub fn process(&mut self) -> (f32, f32) {
        let mut sum = 0.0;
        let mut active = 0;
        for voice in &mut self.voices {
            if voice.is_active() {
                sum += voice.next_sample();
                active += 1;
            }
        }

        if active > 1 {
            sum /= (active as f32).sqrt();
        }
        sum *= self.volume;

        // Signature chain: tremolo first, on the mono signal.
        let tremoloed = self.tremolo.process(sum);
        let (mut left, mut right) = self.chorus.process(tremoloed);
        (left, right) = self.delay.process(left, right);
        (left, right) = self.reverb.process(left, right);

        (left.tanh(), right.tanh())
    }

    fn find_free_voice(&self) -> Option<usize> {
        self.voices.iter().position(|v| !v.is_active())
    }

    fn find_voice_with_note(&self, midi_note: u8) -> Option<usize> {
        self.voices
            .iter()
            .position(|v| v.is_active() && v.midi_note() == Some(midi_note))
    }

    fn steal_oldest_voice(&self) -> usize {
        let mut oldest_index = 0;
        let mut oldest_age = u64::MAX;
        for (i, &age) in self.voice_age.iter().enumerate() {
            if age < oldest_age {
                oldest_age = age;
                oldest_index = i;
            }
        }
        oldest_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    #[test]
    fn velocity_scales_the_amp_envelope() {
        let mut voice = WurlitzerVoice::new(SR);

        voice.note_on(60, 261.63, 1.0);
        assert!((voice.amp_attack_seconds() - 0.008).abs() < 0.008 * 0.05);
        assert!((voice.amp_decay_seconds() - 2.0).abs() < 2.0 * 0.05);

        voice.note_on(60, 261.63, 0.0);
        assert!((voice.amp_attack_seconds() - 0.020).abs() < 0.020 * 0.05);
        assert!((voice.amp_decay_seconds() - 3.5).abs() < 3.5 * 0.05);
    }

    #[test]
    fn voice_decays_to_silence_after_release() {
        let mut voice = WurlitzerVoice::new(SR);
        voice.note_on(60, 261.63, 0.8);
        for _ in 0..4800 {
            voice.next_sample();
        }
        voice.note_off();
        // Exponential release at 0.35 s needs a few time constants to fall
        // under the active threshold.
        for _ in 0..(SR * 3.0) as usize {
            voice.next_sample();
        }
        assert!(!voice.is_active());
    }

    #[test]
    fn output_contains_no_dc() {
        let mut voice = WurlitzerVoice::new(SR);
        voice.note_on(48, 130.81, 1.0);
        // Skip the transient, then average a full second.
        for _ in 0..4800 {
            voice.next_sample();
        }
        let mut acc = 0.0f64;
        for _ in 0..48000 {
            acc += voice.next_sample() as f64;
        }
        assert!((acc / 48000.0).abs() < 0.01, "DC offset: {}", acc / 48000.0);
    }

    #[test]
    fn engine_steals_when_full() {
        let mut engine = WurlitzerEngine::new(SR);
        for note in 40..(40 + WURLI_MAX_VOICES as u8) {
            engine.note_on(note, 220.0, 0.7);
        }
        assert_eq!(engine.active_voice_count(), WURLI_MAX_VOICES);
        engine.note_on(80, 880.0, 0.7);
        assert_eq!(engine.active_voice_count(), WURLI_MAX_VOICES);
    }

    #[test]
    fn engine_output_is_bounded() {
        let mut engine = WurlitzerEngine::new(SR);
        for note in 48..60 {
            engine.note_on(note, 261.63, 1.0);
        }
        for _ in 0..9600 {
            let (l, r) = engine.process();
            assert!(l.abs() <= 1.0 && r.abs() <= 1.0);
        }
    }
}
