// Polyphonic voice manager for the subtractive bank.
//
// Fixed table of voices with oldest-age stealing, a shared LFO, unison
// stacking with cent spread, smoothed auto-gain against the active voice
// count, and a stereo chorus on the summed output.

use crate::engine::dsp::chorus::{Chorus, ChorusMode};
use crate::engine::dsp::lfo::Lfo;
use crate::engine::dsp::oscillator::{Waveform, WAVEFORM_COUNT};
use crate::engine::dsp::soft_limit;
use crate::engine::modules::voice::{Voice, VoiceState};

pub const MAX_POLYPHONY: usize = 12;

const AUTO_GAIN_SMOOTHING: f32 = 0.9995;

/// Snapshot of the control parameters, applied to a voice whenever it is
/// (re)assigned so stolen voices come up with current settings.
#[derive(Clone, Copy)]
pub struct SynthParams {
    pub enabled_waveforms: [bool; WAVEFORM_COUNT],
    pub pulse_width: f32,
    pub sub_osc_level: f32,
    pub noise_level: f32,
    pub filter_cutoff: f32,
    pub filter_resonance: f32,
    pub filter_env_amount: f32,
    pub filter_key_tracking: f32,
    pub hpf_cutoff: f32,
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
    pub glide_time: f32,
    pub glide_enabled: bool,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            enabled_waveforms: [false, false, true, false], // saw
            pulse_width: 0.5,
            sub_osc_level: 0.0,
            noise_level: 0.0,
            filter_cutoff: 10000.0,
            filter_resonance: 0.0,
            filter_env_amount: 0.3,
            filter_key_tracking: 0.0,
            hpf_cutoff: 0.0,
            attack: 0.01,
            decay: 0.2,
            sustain: 0.7,
            release: 0.3,
            glide_time: 0.0,
            glide_enabled: false,
        }
    }
}

pub struct PolyphonyManager {
    voices: [Voice; MAX_POLYPHONY],
    voice_age: [u64; MAX_POLYPHONY],
    age_counter: u64,

    lfo: Lfo,
    chorus: Chorus,
    params: SynthParams,

    unison_enabled: bool,
    unison_voices: usize,
    unison_detune: f32,

    master_gain: f32,
    current_auto_gain: f32,
}

impl PolyphonyManager {
    pub fn new(sample_rate: f32) -> Self {
        let params = SynthParams::default();
        let mut manager = Self {
            voices: std::array::from_fn(|_| Voice::new(sample_rate)),
            voice_age: [0; MAX_POLYPHONY],
            age_counter: 0,
            lfo: Lfo::new(sample_rate),
            chorus: Chorus::new(sample_rate),
            params,
            unison_enabled: false,
            unison_voices: 4,
            unison_detune: 10.0,
            master_gain: 0.7,
            current_auto_gain: 1.0,
        };
        for i in 0..MAX_POLYPHONY {
            manager.apply_params_to_voice(i);
        }
        manager
    }

    pub fn note_on(&mut self, midi_note: u8, frequency: f32) {
        if self.unison_enabled {
            self.note_on_unison(midi_note, frequency);
            return;
        }

        // Same note still sounding: retrigger in place.
        if let Some(index) = self.find_voice_with_note(midi_note) {
            self.voices[index].note_on(midi_note, frequency);
            self.age_counter += 1;
            self.voice_age[index] = self.age_counter;
            return;
        }

        let index = self.find_free_voice().unwrap_or_else(|| self.steal_oldest_voice());
        self.apply_params_to_voice(index);
        self.voices[index].set_detune(0.0);
        self.voices[index].note_on(midi_note, frequency);
        self.age_counter += 1;
        self.voice_age[index] = self.age_counter;
    }

    pub fn note_off(&mut self, midi_note: u8) {
        for voice in &mut self.voices {
            if voice.midi_note() == Some(midi_note) && voice.state() == VoiceState::Active {
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

    fn note_on_unison(&mut self, midi_note: u8, frequency: f32) {
        // Retrigger every slot already carrying this note.
        if self.find_voice_with_note(midi_note).is_some() {
            for i in 0..MAX_POLYPHONY {
                if self.voices[i].midi_note() == Some(midi_note) {
                    self.voices[i].note_on(midi_note, frequency);
                    self.age_counter += 1;
                    self.voice_age[i] = self.age_counter;
                }
            }
            return;
        }

        let slots = self.unison_voices.min(MAX_POLYPHONY);
        for v in 0..slots {
            let index = self.find_free_voice().unwrap_or_else(|| self.steal_oldest_voice());
            self.apply_params_to_voice(index);
            self.voices[index].set_detune(self.unison_detune_for(v, slots));
            self.voices[index].note_on(midi_note, frequency);
            self.age_counter += 1;
            self.voice_age[index] = self.age_counter;
        }
    }

    fn unison_detune_for(&self, slot: usize, total: usize) -> f32 {
        if total <= 1 {
            return 0.0;
        }
        // Spread the slots evenly across +-detune cents.
        let spread = self.unison_detune;
        let step = spread * 2.0 / (total - 1) as f32;
        -spread + step * slot as f32
    }

    // ===== parameter surface =====

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.params.enabled_waveforms = [false; WAVEFORM_COUNT];
        self.params.enabled_waveforms[waveform as usize] = true;
        for voice in &mut self.voices {
            voice.set_waveform(waveform);
        }
    }

    pub fn set_waveform_enabled(&mut self, waveform: Waveform, enabled: bool) {
        self.params.enabled_waveforms[waveform as usize] = enabled;
        for voice in &mut self.voices {
            voice.set_waveform_enabled(waveform, enabled);
        }
    }

    pub fn set_pulse_width(&mut self, width: f32) {
        self.params.pulse_width = width;
        for voice in &mut self.voices {
            voice.set_pulse_width(width);
        }
    }

    pub fn set_sub_osc_level(&mut self, level: f32) {
        self.params.sub_osc_level = level;
        for voice in &mut self.voices {
            voice.set_sub_osc_level(level);
        }
    }

    pub fn set_noise_level(&mut self, level: f32) {
        self.params.noise_level = level;
        for voice in &mut self.voices {
            voice.set_noise_level(level);
        }
    }

    pub fn set_filter_cutoff(&mut self, cutoff_hz: f32) {
        self.params.filter_cutoff = cutoff_hz;
        for voice in &mut self.voices {
            voice.set_filter_cutoff(cutoff_hz);
        }
    }

    pub fn set_filter_resonance(&mut self, resonance: f32) {
        self.params.filter_resonance = resonance;
        for voice in &mut self.voices {
            voice.set_filter_resonance(resonance);
        }
    }

    pub fn set_filter_env_amount(&mut self, amount: f32) {
        self.params.filter_env_amount = amount;
        for voice in &mut self.voices {
            voice.set_filter_env_amount(amount);
        }
    }

    pub fn set_filter_key_tracking(&mut self, amount: f32) {
        self.params.filter_key_tracking = amount;
        for voice in &mut self.voices {
            voice.set_filter_key_tracking(amount);
        }
    }

    pub fn set_hpf_cutoff(&mut self, cutoff_hz: f32) {
        self.params.hpf_cutoff = cutoff_hz;
        for voice in &mut self.voices {
            voice.set_hpf_cutoff(cutoff_hz);
        }
    }

    pub fn set_attack(&mut self, time: f32) {
        self.params.attack = time;
        for voice in &mut self.voices {
            voice.set_attack(time);
        }
    }

    pub fn set_decay(&mut self, time: f32) {
        self.params.decay = time;
        for voice in &mut self.voices {
            voice.set_decay(time);
        }
    }

    pub fn set_sustain(&mut self, level: f32) {
        self.params.sustain = level;
        for voice in &mut self.voices {
            voice.set_sustain(level);
        }
    }

    pub fn set_release(&mut self, time: f32) {
        self.params.release = time;
        for voice in &mut self.voices {
            voice.set_release(time);
        }
    }

    pub fn set_glide_time(&mut self, time: f32) {
        self.params.glide_time = time;
        for voice in &mut self.voices {
            voice.set_glide_time(time);
        }
    }

    pub fn set_glide_enabled(&mut self, enabled: bool) {
        self.params.glide_enabled = enabled;
        for voice in &mut self.voices {
            voice.set_glide_enabled(enabled);
        }
    }

    pub fn set_lfo_rate(&mut self, rate_hz: f32) {
        self.lfo.set_rate(rate_hz);
    }

    pub fn set_lfo_pitch_depth(&mut self, depth: f32) {
        self.lfo.set_pitch_depth(depth);
    }

    pub fn set_lfo_filter_depth(&mut self, depth: f32) {
        self.lfo.set_filter_depth(depth);
    }

    pub fn set_lfo_pwm_depth(&mut self, depth: f32) {
        self.lfo.set_pwm_depth(depth);
    }

    pub fn set_chorus_mode(&mut self, mode: ChorusMode) {
        self.chorus.set_mode(mode);
    }

    pub fn set_unison_enabled(&mut self, enabled: bool) {
        if self.unison_enabled != enabled {
            // Voice-per-note bookkeeping changes shape; drop everything.
            self.all_notes_off();
        }
        self.unison_enabled = enabled;
    }

    pub fn set_unison_voices(&mut self, count: usize) {
        self.unison_voices = count.clamp(1, 8);
    }

    pub fn set_unison_detune(&mut self, cents: f32) {
        self.unison_detune = cents.clamp(0.0, 50.0);
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 1.0);
    }

    // ===== queries =====

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn active_notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.voices.iter().filter(|v| v.is_active()).filter_map(|v| v.midi_note())
    }

    // ===== audio =====

    #[inline]
    pub fn next_sample(&mut self) -> (f32, f32) {
        self.lfo.tick();
        let pitch_mod = self.lfo.pitch_mod();
        let filter_mod = self.lfo.filter_mod();
        let pwm_mod = self.lfo.pwm_mod();

        let mut sum = 0.0;
        let mut active = 0;
        for voice in &mut self.voices {
            if voice.is_active() {
                voice.apply_lfo_pitch_mod(pitch_mod);
                voice.apply_lfo_filter_mod(filter_mod);
                voice.apply_lfo_pwm_mod(pwm_mod);
                sum += voice.next_sample();
                active += 1;
            }
        }

        let target_auto_gain =
            if active > 1 { 1.0 / (active as f32).sqrt() } else { 1.0 };
        self.current_auto_gain = self.current_auto_gain * AUTO_GAIN_SMOOTHING
            + target_auto_gain * (1.0 - AUTO_GAIN_SMOOTHING);

        sum *= self.current_auto_gain * self.master_gain;
        sum = soft_limit(sum);

        self.chorus.process(sum)
    }

    // ===== allocation =====

    fn find_free_voice(&self) -> Option<usize> {
        self.voices.iter().position(|v| !v.is_active())
    }

    fn find_voice_with_note(&self, midi_note: u8) -> Option<usize> {
        self.voices
            .iter()
            .position(|v| v.midi_note() == Some(midi_note) && v.is_active())
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

    fn apply_params_to_voice(&mut self, index: usize) {
        let p = self.params;
        let voice = &mut self.voices[index];
        for w in 0..WAVEFORM_COUNT {
            voice.set_waveform_enabled(Waveform::from_index(w), p.enabled_waveforms[w]);
        }
        voice.set_pulse_width(p.pulse_width);
        voice.set_sub_osc_level(p.sub_osc_level);
        voice.set_noise_level(p.noise_level);
        voice.set_filter_cutoff(p.filter_cutoff);
        voice.set_filter_resonance(p.filter_resonance);
        voice.set_filter_env_amount(p.filter_env_amount);
        voice.set_filter_key_tracking(p.filter_key_tracking);
        voice.set_hpf_cutoff(p.hpf_cutoff);
        voice.set_attack(p.attack);
        voice.set_decay(p.decay);
        voice.set_sustain(p.sustain);
        voice.set_release(p.release);
        voice.set_glide_time(p.glide_time);
        voice.set_glide_enabled(p.glide_enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    fn midi_freq(note: u8) -> f32 {
        440.0 * (2.0f32).powf((note as f32 - 69.0) / 12.0)
    }

    #[test]
    fn allocates_one_voice_per_note() {
        let mut manager = PolyphonyManager::new(SR);
        for note in 60..72 {
            manager.note_on(note, midi_freq(note));
        }
        assert_eq!(manager.active_voice_count(), 12);
        let mut notes: Vec<u8> = manager.active_notes().collect();
        notes.sort_unstable();
        assert_eq!(notes, (60..72).collect::<Vec<u8>>());
    }

    #[test]
    fn steals_the_oldest_voice_when_full() {
        let mut manager = PolyphonyManager::new(SR);
        for note in 60..72 {
            manager.note_on(note, midi_freq(note));
        }
        // Table is full; the next note must evict MIDI 60, the oldest.
        manager.note_on(72, midi_freq(72));
        assert_eq!(manager.active_voice_count(), 12);
        let mut notes: Vec<u8> = manager.active_notes().collect();
        notes.sort_unstable();
        assert_eq!(notes, (61..73).collect::<Vec<u8>>());
    }

    #[test]
    fn retrigger_does_not_consume_a_second_voice() {
        let mut manager = PolyphonyManager::new(SR);
        manager.note_on(64, midi_freq(64));
        manager.note_on(64, midi_freq(64));
        assert_eq!(manager.active_voice_count(), 1);
    }

    #[test]
    fn unison_allocates_the_requested_slots() {
        let mut manager = PolyphonyManager::new(SR);
        manager.set_unison_enabled(true);
        manager.set_unison_voices(4);
        manager.set_unison_detune(20.0);
        manager.note_on(60, midi_freq(60));
        assert_eq!(manager.active_voice_count(), 4);

        manager.note_off(60);
        for _ in 0..(SR * 0.4) as usize {
            manager.next_sample();
        }
        assert_eq!(manager.active_voice_count(), 0);
    }

    #[test]
    fn unison_detune_spreads_symmetrically() {
        let mut manager = PolyphonyManager::new(SR);
        manager.set_unison_detune(30.0);
        assert_eq!(manager.unison_detune_for(0, 4), -30.0);
        assert_eq!(manager.unison_detune_for(3, 4), 30.0);
        let inner = manager.unison_detune_for(1, 4);
        assert!((inner + 10.0).abs() < 1e-4);
    }

    #[test]
    fn all_notes_off_silences_the_bank() {
        let mut manager = PolyphonyManager::new(SR);
        manager.set_release(0.02);
        for note in 60..66 {
            manager.note_on(note, midi_freq(note));
        }
        manager.all_notes_off();
        for _ in 0..(SR * 0.05) as usize {
            manager.next_sample();
        }
        assert_eq!(manager.active_voice_count(), 0);
        let (l, r) = manager.next_sample();
        assert_eq!((l, r), (0.0, 0.0));
    }

    #[test]
    fn output_is_limited() {
        let mut manager = PolyphonyManager::new(SR);
        manager.set_sustain(1.0);
        for note in 48..60 {
            manager.note_on(note, midi_freq(note));
        }
        for _ in 0..48000 {
            let (l, r) = manager.next_sample();
            assert!(l.abs() <= 1.0 && r.abs() <= 1.0, "limiter failed: {} {}", l, r);
        }
    }
}
