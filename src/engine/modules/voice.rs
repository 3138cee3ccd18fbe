// Subtractive synth voice.
//
// Main oscillator stack + square sub-oscillator an octave down + white
// noise, through the resonant filter, shaped by independent amplitude and
// filter envelopes. Glide, unison detune and the global LFO all act on the
// per-sample frequency.

use crate::engine::dsp::envelope::Envelope;
use crate::engine::dsp::filter::VoiceFilter;
use crate::engine::dsp::oscillator::{Oscillator, Waveform};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Active,
    Releasing,
}

#[derive(Clone)]
pub struct Voice {
    oscillator: Oscillator,
    sub_oscillator: Oscillator,
    filter: VoiceFilter,
    amp_envelope: Envelope,
    filter_envelope: Envelope,

    rng: u32,
    noise_level: f32,
    sub_osc_level: f32,

    state: VoiceState,
    midi_note: Option<u8>,
    sample_rate: f32,

    target_frequency: f32,
    current_frequency: f32,
    glide_time: f32,
    glide_coeff: f32,
    glide_enabled: bool,
    first_note: bool,

    detune_ratio: f32,

    filter_base_cutoff: f32,
    filter_env_amount: f32,

    lfo_pitch_mod: f32,
    lfo_filter_mod: f32,
    lfo_pwm_mod: f32,
    base_pulse_width: f32,
}

impl Voice {
    pub fn new(sample_rate: f32) -> Self {
        let mut sub_oscillator = Oscillator::new(sample_rate);
        sub_oscillator.set_waveform(Waveform::Square);

        let mut amp_envelope = Envelope::new(sample_rate);
        amp_envelope.set_attack(0.01);
        amp_envelope.set_decay(0.2);
        amp_envelope.set_sustain(0.7);
        amp_envelope.set_release(0.3);

        // Filter envelope is snappier for a percussive sweep.
        let mut filter_envelope = Envelope::new(sample_rate);
        filter_envelope.set_attack(0.005);
        filter_envelope.set_decay(0.3);
        filter_envelope.set_sustain(0.3);
        filter_envelope.set_release(0.2);

        Self {
            oscillator: Oscillator::new(sample_rate),
            sub_oscillator,
            filter: VoiceFilter::new(sample_rate),
            amp_envelope,
            filter_envelope,
            rng: 0x12345678,
            noise_level: 0.0,
            sub_osc_level: 0.0,
            state: VoiceState::Idle,
            midi_note: None,
            sample_rate,
            target_frequency: 440.0,
            current_frequency: 440.0,
            glide_time: 0.0,
            glide_coeff: 1.0,
            glide_enabled: false,
            first_note: true,
            detune_ratio: 1.0,
            filter_base_cutoff: 10000.0,
            filter_env_amount: 0.0,
            lfo_pitch_mod: 0.0,
            lfo_filter_mod: 0.0,
            lfo_pwm_mod: 0.0,
            base_pulse_width: 0.5,
        }
    }

    pub fn note_on(&mut self, midi_note: u8, frequency: f32) {
        self.midi_note = Some(midi_note);
        self.target_frequency = frequency;

        if !(self.glide_enabled && !self.first_note && self.glide_time > 0.0) {
            // No glide: jump straight to the target.
            self.current_frequency = frequency;
        }
        self.first_note = false;

        let detuned = self.current_frequency * self.detune_ratio;
        self.oscillator.set_frequency(detuned);
        self.sub_oscillator.set_frequency(detuned * 0.5);
        self.filter.set_note_frequency(frequency);

        // Reseed noise per note so stolen voices restart deterministically.
        self.rng = (midi_note as u32).wrapping_mul(747796405).wrapping_add(2891336453);

        self.oscillator.reset();
        self.sub_oscillator.reset();
        self.filter.reset();
        self.amp_envelope.gate(true);
        self.filter_envelope.gate(true);
        self.state = VoiceState::Active;
    }

    pub fn note_off(&mut self) {
        self.amp_envelope.gate(false);
        self.filter_envelope.gate(false);
        self.state = VoiceState::Releasing;
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.oscillator.set_waveform(waveform);
    }

    pub fn set_waveform_enabled(&mut self, waveform: Waveform, enabled: bool) {
        self.oscillator.set_waveform_enabled(waveform, enabled);
    }

    pub fn set_pulse_width(&mut self, width: f32) {
        self.base_pulse_width = width.clamp(0.1, 0.9);
    }

    pub fn set_sub_osc_level(&mut self, level: f32) {
        self.sub_osc_level = level.clamp(0.0, 1.0);
    }

    pub fn set_noise_level(&mut self, level: f32) {
        self.noise_level = level.clamp(0.0, 1.0);
    }

    pub fn set_filter_cutoff(&mut self, cutoff_hz: f32) {
        self.filter_base_cutoff = cutoff_hz;
    }

    pub fn set_filter_resonance(&mut self, resonance: f32) {
        self.filter.set_resonance(resonance);
    }

    pub fn set_filter_env_amount(&mut self, amount: f32) {
        self.filter_env_amount = amount;
    }

    pub fn set_filter_key_tracking(&mut self, amount: f32) {
        self.filter.set_key_tracking(amount);
    }

    pub fn set_hpf_cutoff(&mut self, cutoff_hz: f32) {
        self.filter.set_hpf_cutoff(cutoff_hz);
    }

    pub fn set_attack(&mut self, time: f32) {
        self.amp_envelope.set_attack(time);
    }

    pub fn set_decay(&mut self, time: f32) {
        self.amp_envelope.set_decay(time);
    }

    pub fn set_sustain(&mut self, level: f32) {
        self.amp_envelope.set_sustain(level);
    }

    pub fn set_release(&mut self, time: f32) {
        self.amp_envelope.set_release(time);
    }

    pub fn set_glide_time(&mut self, time: f32) {
        self.glide_time = time.clamp(0.0, 2.0);
        self.update_glide_coefficient();
    }

    pub fn set_glide_enabled(&mut self, enabled: bool) {
        self.glide_enabled = enabled;
        if !enabled {
            self.first_note = true;
        }
    }

    /// Detune in cents, used by unison stacking.
    pub fn set_detune(&mut self, cents: f32) {
        self.detune_ratio = (2.0f32).powf(cents / 1200.0);
    }

    pub fn apply_lfo_pitch_mod(&mut self, semitones: f32) {
        self.lfo_pitch_mod = semitones;
    }

    pub fn apply_lfo_filter_mod(&mut self, amount: f32) {
        self.lfo_filter_mod = amount;
    }

    pub fn apply_lfo_pwm_mod(&mut self, amount: f32) {
        self.lfo_pwm_mod = amount;
    }

    pub fn is_active(&self) -> bool {
        self.state != VoiceState::Idle
    }

    pub fn midi_note(&self) -> Option<u8> {
        self.midi_note
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn frequency(&self) -> f32 {
        self.target_frequency
    }

    fn update_glide_coefficient(&mut self) {
        if self.glide_time <= 0.0 {
            self.glide_coeff = 1.0;
        } else {
            // Reach ~99% of the target in 5 time constants.
            let tau = self.glide_time / 5.0;
            self.glide_coeff = 1.0 - (-1.0 / (tau * self.sample_rate)).exp();
        }
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
        if self.state == VoiceState::Idle {
            return 0.0;
        }

        if self.glide_enabled && self.glide_time > 0.0 {
            self.current_frequency +=
                (self.target_frequency - self.current_frequency) * self.glide_coeff;
        } else {
            self.current_frequency = self.target_frequency;
        }

        let pitch_ratio = (2.0f32).powf(self.lfo_pitch_mod / 12.0);
        let modulated_freq = self.current_frequency * self.detune_ratio * pitch_ratio;
        self.oscillator.set_frequency(modulated_freq);
        self.sub_oscillator.set_frequency(modulated_freq * 0.5);

        let pulse_width = (self.base_pulse_width + self.lfo_pwm_mod).clamp(0.1, 0.9);
        self.oscillator.set_pulse_width(pulse_width);

        let main = self.oscillator.next_sample();
        let sub = self.sub_oscillator.next_sample() * self.sub_osc_level;
        let noise = self.noise() * self.noise_level;

        let mut sample = main + sub + noise;
        // Normalize for the extra sources so stacking stays level.
        sample /= 1.0 + self.sub_osc_level * 0.5 + self.noise_level * 0.5;

        let amp_env = self.amp_envelope.next_sample();
        let filter_env = self.filter_envelope.next_sample();

        let env_mod = filter_env * self.filter_env_amount * 10000.0;
        let lfo_mod = self.lfo_filter_mod * 5000.0;
        let cutoff = (self.filter_base_cutoff + env_mod + lfo_mod).clamp(20.0, 20000.0);
        self.filter.set_cutoff(cutoff);

        sample = self.filter.process(sample);
        sample *= amp_env;

        if !self.amp_envelope.is_active() {
            self.state = VoiceState::Idle;
            self.midi_note = None;
            self.first_note = true;
        }

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    #[test]
    fn idle_voice_is_silent() {
        let mut voice = Voice::new(SR);
        for _ in 0..100 {
            assert_eq!(voice.next_sample(), 0.0);
        }
    }

    #[test]
    fn note_lifecycle() {
        let mut voice = Voice::new(SR);
        voice.set_release(0.05);
        voice.note_on(69, 440.0);
        assert_eq!(voice.state(), VoiceState::Active);
        assert_eq!(voice.midi_note(), Some(69));

        let mut peak = 0.0f32;
        for _ in 0..4800 {
            peak = peak.max(voice.next_sample().abs());
        }
        assert!(peak > 0.01, "active voice produced no signal");

        voice.note_off();
        assert_eq!(voice.state(), VoiceState::Releasing);

        // Release time plus 10 ms of margin.
        for _ in 0..(SR * 0.06) as usize {
            voice.next_sample();
        }
        assert_eq!(voice.state(), VoiceState::Idle);
        assert_eq!(voice.midi_note(), None);
    }

    #[test]
    fn glide_moves_gradually() {
        let mut voice = Voice::new(SR);
        voice.set_glide_enabled(true);
        voice.set_glide_time(0.5);
        voice.note_on(60, 261.63);
        for _ in 0..100 {
            voice.next_sample();
        }
        voice.note_on(72, 523.25);
        voice.next_sample();
        // One sample in, the frequency must still be near the origin note.
        assert!(voice.current_frequency < 300.0);
        for _ in 0..(SR as usize) {
            voice.next_sample();
        }
        assert!((voice.current_frequency - 523.25).abs() < 5.0);
    }

    #[test]
    fn detune_shifts_pitch_ratio() {
        let mut voice = Voice::new(SR);
        voice.set_detune(1200.0);
        assert!((voice.detune_ratio - 2.0).abs() < 1e-4);
        voice.set_detune(0.0);
        assert!((voice.detune_ratio - 1.0).abs() < 1e-6);
    }
}
