// Per-frame evaluation of the audio graph.
//
// One of two tone backends feeds the frame: the subtractive bank (with its
// tremolo -> delay -> reverb chain and a bass shelf) or the electric-piano
// bank (which carries its own chain). The looper records and plays around
// whichever is active; drums and the count-in metronome are mixed last at
// fixed gain ratios, then the frame is hard-clipped.

use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::engine::dsp::delay::StereoDelay;
use crate::engine::dsp::reverb::Reverb;
use crate::engine::dsp::tremolo::Tremolo;
use crate::engine::messages::{DrumMsg, EngineMsg, LooperMsg, SynthParam, WurliParam};
use crate::engine::modules::drum_machine::DrumMachine;
use crate::engine::modules::looper::{Looper, LooperState, MAX_TRACKS};
use crate::engine::modules::metronome::Metronome;
use crate::engine::modules::polyphony::PolyphonyManager;
use crate::engine::modules::wurlitzer::WurlitzerEngine;
use crate::engine::state::EngineStatus;

// Gain staging: the sum of every source at maximum stays under the clip
// point, so the safety clamp almost never engages.
const SYNTH_GAIN: f32 = 0.09;
const DRUM_GAIN: f32 = 1.08;

const BASS_SHELF_COEFF: f32 = 0.02;
const BASS_BOOST_AMOUNT: f32 = 0.4;

pub struct EngineGraph {
    sample_rate: f32,

    polyphony: PolyphonyManager,
    wurlitzer: WurlitzerEngine,
    drum_machine: DrumMachine,
    looper: Looper,
    metronome: Metronome,

    synth_tremolo: Tremolo,
    synth_delay: StereoDelay,
    synth_reverb: Reverb,
    bass_shelf_l: f32,
    bass_shelf_r: f32,

    wurlitzer_mode: bool,
    synth_volume: f32,
    metronome_volume: f32,
    drum_enabled_by_user: bool,

    status: Arc<EngineStatus>,
}

impl EngineGraph {
    pub fn new(sample_rate: f32, status: Arc<EngineStatus>, reclaim_tx: Sender<Vec<f32>>) -> Self {
        let mut synth_tremolo = Tremolo::new(sample_rate);
        synth_tremolo.set_rate(5.0);
        synth_tremolo.set_depth(0.0);

        let mut synth_delay = StereoDelay::new(sample_rate);
        synth_delay.set_time(0.3);
        synth_delay.set_feedback(0.3);
        synth_delay.set_mix(0.0);

        let mut synth_reverb = Reverb::new(sample_rate);
        synth_reverb.set_size(0.5);
        synth_reverb.set_mix(0.0);

        let mut looper = Looper::new(sample_rate);
        looper.set_reclaim_sender(reclaim_tx);

        Self {
            sample_rate,
            polyphony: PolyphonyManager::new(sample_rate),
            wurlitzer: WurlitzerEngine::new(sample_rate),
            drum_machine: DrumMachine::new(sample_rate),
            looper,
            metronome: Metronome::new(sample_rate),
            synth_tremolo,
            synth_delay,
            synth_reverb,
            bass_shelf_l: 0.0,
            bass_shelf_r: 0.0,
            wurlitzer_mode: false,
            synth_volume: 0.7,
            metronome_volume: 0.3,
            drum_enabled_by_user: false,
            status,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn looper(&self) -> &Looper {
        &self.looper
    }

    pub fn polyphony(&self) -> &PolyphonyManager {
        &self.polyphony
    }

    // ===== message dispatch =====

    pub fn apply(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::NoteOn { note, freq, velocity } => {
                if self.wurlitzer_mode {
                    self.wurlitzer.note_on(note, freq, velocity);
                } else {
                    self.polyphony.note_on(note, freq);
                }
            }
            EngineMsg::NoteOff { note } => {
                if self.wurlitzer_mode {
                    self.wurlitzer.note_off(note);
                } else {
                    self.polyphony.note_off(note);
                }
            }
            EngineMsg::AllNotesOff => {
                self.polyphony.all_notes_off();
                self.wurlitzer.all_notes_off();
            }
            EngineMsg::WurlitzerMode(enabled) => {
                if self.wurlitzer_mode != enabled {
                    self.wurlitzer_mode = enabled;
                    // Kill everything so no note hangs across the switch.
                    self.polyphony.all_notes_off();
                    self.wurlitzer.all_notes_off();
                }
            }
            EngineMsg::SynthVolume(volume) => self.synth_volume = volume,
            EngineMsg::MetronomeVolume(volume) => self.metronome_volume = volume,
            EngineMsg::Synth(param) => self.apply_synth_param(param),
            EngineMsg::Wurli(param) => self.apply_wurli_param(param),
            EngineMsg::Drum(msg) => self.apply_drum_msg(msg),
            EngineMsg::Looper(msg) => self.apply_looper_msg(msg),
            EngineMsg::Quit => {}
        }
        // Transport commands change looper state; reflect it right away so
        // control-side queries between buffers see the transition.
        self.publish_status();
    }

    fn apply_synth_param(&mut self, param: SynthParam) {
        match param {
            SynthParam::Waveform(w) => self.polyphony.set_waveform(w),
            SynthParam::WaveformEnabled(w, enabled) => {
                self.polyphony.set_waveform_enabled(w, enabled)
            }
            SynthParam::PulseWidth(v) => self.polyphony.set_pulse_width(v),
            SynthParam::SubOscLevel(v) => self.polyphony.set_sub_osc_level(v),
            SynthParam::NoiseLevel(v) => self.polyphony.set_noise_level(v),
            SynthParam::FilterCutoff(v) => self.polyphony.set_filter_cutoff(v),
            SynthParam::FilterResonance(v) => self.polyphony.set_filter_resonance(v),
            SynthParam::FilterEnvAmount(v) => self.polyphony.set_filter_env_amount(v),
            SynthParam::FilterKeyTracking(v) => self.polyphony.set_filter_key_tracking(v),
            SynthParam::HpfCutoff(v) => self.polyphony.set_hpf_cutoff(v),
            SynthParam::Attack(v) => self.polyphony.set_attack(v),
            SynthParam::Decay(v) => self.polyphony.set_decay(v),
            SynthParam::Sustain(v) => self.polyphony.set_sustain(v),
            SynthParam::Release(v) => self.polyphony.set_release(v),
            SynthParam::LfoRate(v) => self.polyphony.set_lfo_rate(v),
            SynthParam::LfoPitchDepth(v) => self.polyphony.set_lfo_pitch_depth(v),
            SynthParam::LfoFilterDepth(v) => self.polyphony.set_lfo_filter_depth(v),
            SynthParam::LfoPwmDepth(v) => self.polyphony.set_lfo_pwm_depth(v),
            SynthParam::GlideTime(v) => self.polyphony.set_glide_time(v),
            SynthParam::GlideEnabled(v) => self.polyphony.set_glide_enabled(v),
            SynthParam::UnisonEnabled(v) => self.polyphony.set_unison_enabled(v),
            SynthParam::UnisonVoices(v) => self.polyphony.set_unison_voices(v),
            SynthParam::UnisonDetune(v) => self.polyphony.set_unison_detune(v),
            SynthParam::ChorusMode(mode) => self.polyphony.set_chorus_mode(mode),
            SynthParam::TremoloRate(v) => self.synth_tremolo.set_rate(v),
            SynthParam::TremoloDepth(v) => self.synth_tremolo.set_depth(v),
            SynthParam::ReverbSize(v) => self.synth_reverb.set_size(v),
            SynthParam::ReverbMix(v) => self.synth_reverb.set_mix(v),
            SynthParam::DelayTime(v) => self.synth_delay.set_time(v),
            SynthParam::DelayFeedback(v) => self.synth_delay.set_feedback(v),
            SynthParam::DelayMix(v) => self.synth_delay.set_mix(v),
        }
    }

    fn apply_wurli_param(&mut self, param: WurliParam) {
        match param {
            WurliParam::TremoloRate(v) => self.wurlitzer.set_tremolo_rate(v),
            WurliParam::TremoloDepth(v) => self.wurlitzer.set_tremolo_depth(v),
            WurliParam::ChorusMode(mode) => self.wurlitzer.set_chorus_mode(mode),
            WurliParam::ReverbSize(v) => self.wurlitzer.set_reverb_size(v),
            WurliParam::ReverbMix(v) => self.wurlitzer.set_reverb_mix(v),
            WurliParam::DelayTime(v) => self.wurlitzer.set_delay_time(v),
            WurliParam::DelayFeedback(v) => self.wurlitzer.set_delay_feedback(v),
            WurliParam::DelayMix(v) => self.wurlitzer.set_delay_mix(v),
            WurliParam::Volume(v) => self.wurlitzer.set_volume(v),
        }
    }

    fn apply_drum_msg(&mut self, msg: DrumMsg) {
        match msg {
            DrumMsg::Bpm(bpm) => {
                self.drum_machine.set_bpm(bpm);
                // Looper and metronome stay on the same grid.
                let clamped = self.drum_machine.bpm();
                self.looper.set_bpm(clamped);
                self.metronome.set_bpm(clamped);
            }
            DrumMsg::MasterEnabled(enabled) => {
                self.drum_enabled_by_user = enabled;
                if enabled && self.looper.state() == LooperState::Playing {
                    // Joining mid-loop: land on the loop's downbeat.
                    self.drum_machine.reset_beat();
                }
                self.drum_machine.set_enabled(enabled);
            }
            DrumMsg::InstrumentEnabled(instrument, enabled) => {
                self.drum_machine.set_instrument_enabled(instrument, enabled)
            }
            DrumMsg::Step { instrument, step, velocity } => {
                self.drum_machine.set_step(instrument, step, velocity)
            }
            DrumMsg::InstrumentVolume(instrument, volume) => {
                self.drum_machine.set_instrument_volume(instrument, volume)
            }
            DrumMsg::ResetPattern => self.drum_machine.reset_to_default_pattern(),
            DrumMsg::Volume(volume) => self.drum_machine.set_volume(volume),
        }
    }

    fn apply_looper_msg(&mut self, msg: LooperMsg) {
        match msg {
            LooperMsg::StartRecording { track, buffer_l, buffer_r } => {
                if self.looper.start_recording_track(track, buffer_l, buffer_r) {
                    self.metronome.set_bpm(self.drum_machine.bpm());
                    self.metronome.start();
                }
            }
            LooperMsg::StartPlayback => {
                self.metronome.stop();
                if self.drum_enabled_by_user {
                    self.drum_machine.reset_beat();
                }
                self.looper.start_playback();
            }
            LooperMsg::StopPlayback => {
                self.looper.stop_playback();
                self.metronome.stop();
            }
            LooperMsg::CancelRecording => {
                self.looper.cancel_recording();
                self.metronome.stop();
            }
            LooperMsg::ClearTrack(track) => self.looper.clear_track(track),
            LooperMsg::ClearAllTracks => {
                self.looper.clear_all_tracks();
                self.metronome.stop();
            }
            LooperMsg::TrackVolume(track, volume) => self.looper.set_track_volume(track, volume),
            LooperMsg::TrackMuted(track, muted) => self.looper.set_track_muted(track, muted),
            LooperMsg::TrackSolo(track, solo) => self.looper.set_track_solo(track, solo),
            LooperMsg::BarCount(bars) => self.looper.set_bar_count(bars),
            LooperMsg::ExportMixdown { track_mask, mut buffer, reply } => {
                self.looper.mix_into(track_mask, &mut buffer);
                let _ = reply.try_send(buffer);
            }
        }
    }

    // ===== audio =====

    #[inline]
    pub fn render_frame(&mut self) -> (f32, f32) {
        let (mut synth_l, mut synth_r) = if self.wurlitzer_mode {
            self.wurlitzer.process()
        } else {
            let (l, r) = self.polyphony.next_sample();
            let (l, r) = self.synth_tremolo.process_stereo(l, r);
            let (l, r) = self.synth_delay.process(l, r);
            let (mut l, mut r) = self.synth_reverb.process(l, r);

            // Low shelf: extract the bass with a one-pole and add it back.
            self.bass_shelf_l += BASS_SHELF_COEFF * (l - self.bass_shelf_l);
            self.bass_shelf_r += BASS_SHELF_COEFF * (r - self.bass_shelf_r);
            l += self.bass_shelf_l * BASS_BOOST_AMOUNT;
            r += self.bass_shelf_r * BASS_BOOST_AMOUNT;
            (l, r)
        };

        synth_l *= self.synth_volume;
        synth_r *= self.synth_volume;

        let (loop_l, loop_r) = self.looper.process(synth_l, synth_r);

        let looper_state = self.looper.state();
        let needs_metronome =
            looper_state == LooperState::PreCount || looper_state == LooperState::Recording;

        if !needs_metronome && self.metronome.is_running() {
            self.metronome.stop();
        }
        let metronome_sample = if needs_metronome { self.metronome.next_sample() } else { 0.0 };

        // The sequencer yields to the count-in click while tracking.
        let drum_sample = if self.drum_enabled_by_user && !needs_metronome {
            self.drum_machine.next_sample()
        } else {
            0.0
        };

        let synth_mix_l = (synth_l + loop_l) * SYNTH_GAIN;
        let synth_mix_r = (synth_r + loop_r) * SYNTH_GAIN;
        let drum_mix = drum_sample * DRUM_GAIN;
        let metro_mix = metronome_sample * self.metronome_volume;

        let final_l = (synth_mix_l + drum_mix + metro_mix).clamp(-1.0, 1.0);
        let final_r = (synth_mix_r + drum_mix + metro_mix).clamp(-1.0, 1.0);

        self.publish_status();

        (final_l, final_r)
    }

    fn publish_status(&self) {
        let mut content_mask = 0u32;
        for track in 0..MAX_TRACKS {
            if self.looper.track_has_content(track) {
                content_mask |= 1 << track;
            }
        }
        self.status.publish_looper(
            self.looper.state(),
            self.looper.current_beat(),
            self.looper.current_bar(),
            self.looper.active_recording_track(),
            content_mask,
            self.looper.used_track_count(),
            self.looper.loop_length_samples(),
            self.looper.is_length_locked(),
        );
        let voices = if self.wurlitzer_mode {
            self.wurlitzer.active_voice_count()
        } else {
            self.polyphony.active_voice_count()
        };
        self.status.publish_voices(voices);
        self.status.publish_drum_step(self.drum_machine.current_step());
    }
}
