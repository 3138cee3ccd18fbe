// Control-surface facade over the audio engine.
//
// Owns the engine thread (which in turn owns the cpal stream and the whole
// audio graph) and the message channel into the callback. Continuous
// parameters are clamped here at ingestion; state-illegal commands are
// logged and dropped. Synchronous getters answer from control-side
// authoritative copies (drum pattern, track mixers, tempo) or from the
// engine's atomic status mirror (looper transport state).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};

use crate::engine::audio::AudioEngine;
use crate::engine::dsp::chorus::ChorusMode;
use crate::engine::dsp::oscillator::Waveform;
use crate::engine::messages::{DrumMsg, EngineMsg, LooperMsg, SynthParam, WurliParam};
use crate::engine::modules::drum_machine::{DrumInstrument, INSTRUMENT_COUNT, PATTERN_STEPS};
use crate::engine::modules::looper::{LooperState, MAX_BARS, MAX_TRACKS, MIN_BARS};
use crate::engine::state::EngineStatus;

enum HostCmd {
    Shutdown,
}

pub struct SynthController {
    tx: Sender<EngineMsg>,
    ctl_tx: Sender<HostCmd>,
    status: Arc<EngineStatus>,
    sample_rate: f32,

    engine_thread: Option<JoinHandle<()>>,
    reclaim_thread: Option<JoinHandle<()>>,

    // Control-side authoritative copies for synchronous getters.
    drum_pattern: [[f32; PATTERN_STEPS]; INSTRUMENT_COUNT],
    drum_instrument_volume: [f32; INSTRUMENT_COUNT],
    drum_bpm: f32,
    bar_count: usize,
    track_volume: [f32; MAX_TRACKS],
    track_muted: [bool; MAX_TRACKS],
    track_solo: [bool; MAX_TRACKS],
}

impl SynthController {
    /// Open the output device and start the engine thread. Returns once the
    /// stream is up or the device reports an error.
    pub fn start() -> Result<Self, String> {
        let status = Arc::new(EngineStatus::new());
        // Displaced loop buffers come back here to be dropped off the
        // audio thread.
        let (reclaim_tx, reclaim_rx) = bounded::<Vec<f32>>(MAX_TRACKS * 4);
        let (ctl_tx, ctl_rx) = unbounded::<HostCmd>();
        let (boot_tx, boot_rx) = bounded::<Result<(Sender<EngineMsg>, f32), String>>(1);

        let status_for_engine = status.clone();
        let engine_thread = std::thread::spawn(move || {
            // The cpal stream must live and die on this thread.
            let mut engine = match AudioEngine::new(status_for_engine, reclaim_tx) {
                Ok(engine) => engine,
                Err(e) => {
                    let _ = boot_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = engine.start() {
                let _ = boot_tx.send(Err(e));
                return;
            }
            let _ = boot_tx.send(Ok((engine.sender(), engine.sr)));

            loop {
                match ctl_rx.recv_timeout(Duration::from_millis(250)) {
                    Ok(HostCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        engine.restart_if_requested();
                    }
                }
            }
            engine.stop();
        });

        let (tx, sample_rate) = match boot_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(boot)) => boot,
            Ok(Err(e)) => {
                let _ = engine_thread.join();
                return Err(e);
            }
            Err(_) => return Err("engine thread did not start".to_string()),
        };

        let reclaim_thread = std::thread::spawn(move || {
            // Drain until the engine side hangs up; dropping here keeps
            // deallocation off the audio thread.
            while reclaim_rx.recv().is_ok() {}
        });

        log::info!("synth engine running at {} Hz", sample_rate);

        let mut pattern = [[0.0; PATTERN_STEPS]; INSTRUMENT_COUNT];
        Self::default_pattern(&mut pattern);

        Ok(Self {
            tx,
            ctl_tx,
            status,
            sample_rate,
            engine_thread: Some(engine_thread),
            reclaim_thread: Some(reclaim_thread),
            drum_pattern: pattern,
            drum_instrument_volume: [1.0; INSTRUMENT_COUNT],
            drum_bpm: 100.0,
            bar_count: 4,
            track_volume: [0.7; MAX_TRACKS],
            track_muted: [false; MAX_TRACKS],
            track_solo: [false; MAX_TRACKS],
        })
    }

    fn default_pattern(pattern: &mut [[f32; PATTERN_STEPS]; INSTRUMENT_COUNT]) {
        *pattern = [[0.0; PATTERN_STEPS]; INSTRUMENT_COUNT];
        pattern[DrumInstrument::Kick as usize][0] = 1.0;
        pattern[DrumInstrument::Kick as usize][8] = 1.0;
        pattern[DrumInstrument::Snare as usize][4] = 1.0;
        pattern[DrumInstrument::Snare as usize][12] = 1.0;
        pattern[DrumInstrument::HiHat as usize] = [
            1.0, 0.5, 0.7, 0.4, 0.9, 0.5, 0.6, 0.4, 1.0, 0.5, 0.7, 0.4, 0.9, 0.5, 0.6, 0.45,
        ];
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    fn send(&self, msg: EngineMsg) {
        let _ = self.tx.send(msg);
    }

    // ===== notes =====

    pub fn note_on(&self, midi_note: u8, frequency: f32) {
        self.note_on_with_velocity(midi_note, frequency, 0.7);
    }

    pub fn note_on_with_velocity(&self, midi_note: u8, frequency: f32, velocity: f32) {
        self.send(EngineMsg::NoteOn {
            note: midi_note,
            freq: frequency.max(0.0),
            velocity: velocity.clamp(0.0, 1.0),
        });
    }

    pub fn note_off(&self, midi_note: u8) {
        self.send(EngineMsg::NoteOff { note: midi_note });
    }

    pub fn all_notes_off(&self) {
        self.send(EngineMsg::AllNotesOff);
    }

    // ===== mode =====

    pub fn set_wurlitzer_mode(&self, enabled: bool) {
        self.send(EngineMsg::WurlitzerMode(enabled));
    }

    // ===== oscillator =====

    pub fn set_waveform(&self, waveform: Waveform) {
        self.send(EngineMsg::Synth(SynthParam::Waveform(waveform)));
    }

    pub fn toggle_waveform(&self, waveform: Waveform, enabled: bool) {
        self.send(EngineMsg::Synth(SynthParam::WaveformEnabled(waveform, enabled)));
    }

    pub fn set_pulse_width(&self, width: f32) {
        self.send(EngineMsg::Synth(SynthParam::PulseWidth(width.clamp(0.01, 0.99))));
    }

    pub fn set_sub_osc_level(&self, level: f32) {
        self.send(EngineMsg::Synth(SynthParam::SubOscLevel(level.clamp(0.0, 1.0))));
    }

    pub fn set_noise_level(&self, level: f32) {
        self.send(EngineMsg::Synth(SynthParam::NoiseLevel(level.clamp(0.0, 1.0))));
    }

    // ===== filter =====

    pub fn set_filter_cutoff(&self, cutoff_hz: f32) {
        self.send(EngineMsg::Synth(SynthParam::FilterCutoff(cutoff_hz.clamp(20.0, 20000.0))));
    }

    pub fn set_filter_resonance(&self, resonance: f32) {
        self.send(EngineMsg::Synth(SynthParam::FilterResonance(resonance.clamp(0.0, 1.0))));
    }

    pub fn set_filter_envelope_amount(&self, amount: f32) {
        self.send(EngineMsg::Synth(SynthParam::FilterEnvAmount(amount.clamp(0.0, 1.0))));
    }

    pub fn set_filter_key_tracking(&self, amount: f32) {
        self.send(EngineMsg::Synth(SynthParam::FilterKeyTracking(amount.clamp(0.0, 1.0))));
    }

    pub fn set_hpf_cutoff(&self, cutoff_hz: f32) {
        self.send(EngineMsg::Synth(SynthParam::HpfCutoff(cutoff_hz.clamp(0.0, 1000.0))));
    }

    // ===== amplitude envelope =====

    pub fn set_attack(&self, seconds: f32) {
        self.send(EngineMsg::Synth(SynthParam::Attack(seconds.max(0.001))));
    }

    pub fn set_decay(&self, seconds: f32) {
        self.send(EngineMsg::Synth(SynthParam::Decay(seconds.max(0.001))));
    }

    pub fn set_sustain(&self, level: f32) {
        self.send(EngineMsg::Synth(SynthParam::Sustain(level.clamp(0.0, 1.0))));
    }

    pub fn set_release(&self, seconds: f32) {
        self.send(EngineMsg::Synth(SynthParam::Release(seconds.max(0.001))));
    }

    // ===== LFO =====

    pub fn set_lfo_rate(&self, rate_hz: f32) {
        self.send(EngineMsg::Synth(SynthParam::LfoRate(rate_hz.clamp(0.1, 20.0))));
    }

    pub fn set_lfo_pitch_depth(&self, depth: f32) {
        self.send(EngineMsg::Synth(SynthParam::LfoPitchDepth(depth.clamp(0.0, 1.0))));
    }

    pub fn set_lfo_filter_depth(&self, depth: f32) {
        self.send(EngineMsg::Synth(SynthParam::LfoFilterDepth(depth.clamp(0.0, 1.0))));
    }

    pub fn set_lfo_pwm_depth(&self, depth: f32) {
        self.send(EngineMsg::Synth(SynthParam::LfoPwmDepth(depth.clamp(0.0, 1.0))));
    }

    // ===== glide =====

    pub fn set_glide_time(&self, seconds: f32) {
        self.send(EngineMsg::Synth(SynthParam::GlideTime(seconds.clamp(0.0, 2.0))));
    }

    pub fn set_glide_enabled(&self, enabled: bool) {
        self.send(EngineMsg::Synth(SynthParam::GlideEnabled(enabled)));
    }

    // ===== unison =====

    pub fn set_unison_enabled(&self, enabled: bool) {
        self.send(EngineMsg::Synth(SynthParam::UnisonEnabled(enabled)));
    }

    pub fn set_unison_voices(&self, count: usize) {
        self.send(EngineMsg::Synth(SynthParam::UnisonVoices(count.clamp(1, 8))));
    }

    pub fn set_unison_detune(&self, cents: f32) {
        self.send(EngineMsg::Synth(SynthParam::UnisonDetune(cents.clamp(0.0, 50.0))));
    }

    // ===== synth effects =====

    pub fn set_chorus_mode(&self, mode: ChorusMode) {
        self.send(EngineMsg::Synth(SynthParam::ChorusMode(mode)));
    }

    pub fn set_synth_tremolo_rate(&self, rate_hz: f32) {
        self.send(EngineMsg::Synth(SynthParam::TremoloRate(rate_hz)));
    }

    pub fn set_synth_tremolo_depth(&self, depth: f32) {
        self.send(EngineMsg::Synth(SynthParam::TremoloDepth(depth.clamp(0.0, 1.0))));
    }

    pub fn set_synth_reverb_size(&self, size: f32) {
        self.send(EngineMsg::Synth(SynthParam::ReverbSize(size.clamp(0.0, 1.0))));
    }

    pub fn set_synth_reverb_mix(&self, mix: f32) {
        self.send(EngineMsg::Synth(SynthParam::ReverbMix(mix.clamp(0.0, 1.0))));
    }

    pub fn set_synth_delay_time(&self, seconds: f32) {
        self.send(EngineMsg::Synth(SynthParam::DelayTime(seconds)));
    }

    pub fn set_synth_delay_feedback(&self, feedback: f32) {
        self.send(EngineMsg::Synth(SynthParam::DelayFeedback(feedback)));
    }

    pub fn set_synth_delay_mix(&self, mix: f32) {
        self.send(EngineMsg::Synth(SynthParam::DelayMix(mix.clamp(0.0, 1.0))));
    }

    // ===== wurlitzer effects =====

    pub fn set_wurli_tremolo_rate(&self, rate_hz: f32) {
        self.send(EngineMsg::Wurli(WurliParam::TremoloRate(rate_hz)));
    }

    pub fn set_wurli_tremolo_depth(&self, depth: f32) {
        self.send(EngineMsg::Wurli(WurliParam::TremoloDepth(depth.clamp(0.0, 1.0))));
    }

    pub fn set_wurli_chorus_mode(&self, mode: ChorusMode) {
        self.send(EngineMsg::Wurli(WurliParam::ChorusMode(mode)));
    }

    pub fn set_wurli_reverb_size(&self, size: f32) {
        self.send(EngineMsg::Wurli(WurliParam::ReverbSize(size.clamp(0.0, 1.0))));
    }

    pub fn set_wurli_reverb_mix(&self, mix: f32) {
        self.send(EngineMsg::Wurli(WurliParam::ReverbMix(mix.clamp(0.0, 1.0))));
    }

    pub fn set_wurli_delay_time(&self, seconds: f32) {
        self.send(EngineMsg::Wurli(WurliParam::DelayTime(seconds)));
    }

    pub fn set_wurli_delay_feedback(&self, feedback: f32) {
        self.send(EngineMsg::Wurli(WurliParam::DelayFeedback(feedback)));
    }

    pub fn set_wurli_delay_mix(&self, mix: f32) {
        self.send(EngineMsg::Wurli(WurliParam::DelayMix(mix.clamp(0.0, 1.0))));
    }

    pub fn set_wurli_volume(&self, volume: f32) {
        self.send(EngineMsg::Wurli(WurliParam::Volume(volume.clamp(0.0, 1.0))));
    }

    // ===== volumes =====

    pub fn set_synth_volume(&self, volume: f32) {
        self.send(EngineMsg::SynthVolume(volume.clamp(0.0, 1.0)));
    }

    pub fn set_drum_volume(&self, volume: f32) {
        self.send(EngineMsg::Drum(DrumMsg::Volume(volume.clamp(0.0, 1.0))));
    }

    pub fn set_metronome_volume(&self, volume: f32) {
        self.send(EngineMsg::MetronomeVolume(volume.clamp(0.0, 2.0)));
    }

    // ===== drum machine =====

    pub fn set_drum_bpm(&mut self, bpm: f32) {
        self.drum_bpm = bpm.clamp(60.0, 200.0);
        self.send(EngineMsg::Drum(DrumMsg::Bpm(self.drum_bpm)));
    }

    pub fn drum_bpm(&self) -> f32 {
        self.drum_bpm
    }

    pub fn set_drum_enabled(&self, enabled: bool) {
        self.send(EngineMsg::Drum(DrumMsg::MasterEnabled(enabled)));
    }

    pub fn set_drum_instrument_enabled(&self, instrument: DrumInstrument, enabled: bool) {
        self.send(EngineMsg::Drum(DrumMsg::InstrumentEnabled(instrument, enabled)));
    }

    pub fn set_drum_step(&mut self, instrument: DrumInstrument, step: usize, velocity: f32) {
        if step >= PATTERN_STEPS {
            log::warn!("drum step {} out of range, ignored", step);
            return;
        }
        let velocity = velocity.clamp(0.0, 1.0);
        self.drum_pattern[instrument as usize][step] = velocity;
        self.send(EngineMsg::Drum(DrumMsg::Step { instrument, step, velocity }));
    }

    pub fn drum_step(&self, instrument: DrumInstrument, step: usize) -> f32 {
        if step < PATTERN_STEPS {
            self.drum_pattern[instrument as usize][step]
        } else {
            0.0
        }
    }

    pub fn toggle_drum_step(&mut self, instrument: DrumInstrument, step: usize) {
        if step >= PATTERN_STEPS {
            log::warn!("drum step {} out of range, ignored", step);
            return;
        }
        let current = self.drum_pattern[instrument as usize][step];
        let next = if current > 0.0 { 0.0 } else { 1.0 };
        self.set_drum_step(instrument, step, next);
    }

    pub fn set_drum_instrument_volume(&mut self, instrument: DrumInstrument, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.drum_instrument_volume[instrument as usize] = volume;
        self.send(EngineMsg::Drum(DrumMsg::InstrumentVolume(instrument, volume)));
    }

    pub fn drum_instrument_volume(&self, instrument: DrumInstrument) -> f32 {
        self.drum_instrument_volume[instrument as usize]
    }

    pub fn reset_drum_pattern(&mut self) {
        Self::default_pattern(&mut self.drum_pattern);
        self.send(EngineMsg::Drum(DrumMsg::ResetPattern));
    }

    pub fn drum_current_step(&self) -> usize {
        self.status.drum_step()
    }

    // ===== looper =====

    pub fn start_recording(&self) {
        self.start_recording_track(0);
    }

    pub fn start_recording_track(&self, track_index: usize) {
        if track_index >= MAX_TRACKS {
            log::warn!("looper track {} out of range, ignored", track_index);
            return;
        }
        if self.status.track_has_content(track_index) {
            log::warn!("looper track {} already has content, clear it first", track_index);
            return;
        }
        let state = self.status.looper_state();
        if state == LooperState::PreCount || state == LooperState::Recording {
            log::warn!("looper already recording, ignored");
            return;
        }

        let length = self.target_loop_length();
        if length == 0 {
            log::warn!("looper has no valid loop length");
            return;
        }

        // Allocation happens here on the control thread; the callback only
        // swaps the vectors in.
        let buffer_l = vec![0.0f32; length];
        let buffer_r = vec![0.0f32; length];
        self.send(EngineMsg::Looper(LooperMsg::StartRecording {
            track: track_index,
            buffer_l,
            buffer_r,
        }));
        log::info!("looper pre-count started for track {}", track_index);
    }

    fn target_loop_length(&self) -> usize {
        if self.status.loop_length_locked() {
            return self.status.loop_length_samples() as usize;
        }
        let seconds_per_beat = 60.0 / self.drum_bpm;
        let samples_per_beat = (seconds_per_beat * self.sample_rate) as i64;
        (samples_per_beat * 4 * self.bar_count as i64) as usize
    }

    pub fn start_playback(&self) {
        self.send(EngineMsg::Looper(LooperMsg::StartPlayback));
    }

    pub fn stop_playback(&self) {
        self.send(EngineMsg::Looper(LooperMsg::StopPlayback));
    }

    pub fn cancel_recording(&self) {
        self.send(EngineMsg::Looper(LooperMsg::CancelRecording));
    }

    pub fn clear_loop(&mut self) {
        self.clear_all_tracks();
    }

    pub fn clear_track(&mut self, track_index: usize) {
        if track_index >= MAX_TRACKS {
            log::warn!("looper track {} out of range, ignored", track_index);
            return;
        }
        if self.status.looper_active_track() == Some(track_index) {
            log::warn!("looper track {} is recording, clear ignored", track_index);
            return;
        }
        self.track_volume[track_index] = 0.7;
        self.track_muted[track_index] = false;
        self.track_solo[track_index] = false;
        self.send(EngineMsg::Looper(LooperMsg::ClearTrack(track_index)));
    }

    pub fn clear_all_tracks(&mut self) {
        self.track_volume = [0.7; MAX_TRACKS];
        self.track_muted = [false; MAX_TRACKS];
        self.track_solo = [false; MAX_TRACKS];
        self.send(EngineMsg::Looper(LooperMsg::ClearAllTracks));
    }

    pub fn set_track_volume(&mut self, track_index: usize, volume: f32) {
        if track_index >= MAX_TRACKS {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.track_volume[track_index] = volume;
        self.send(EngineMsg::Looper(LooperMsg::TrackVolume(track_index, volume)));
    }

    pub fn set_track_muted(&mut self, track_index: usize, muted: bool) {
        if track_index >= MAX_TRACKS {
            return;
        }
        self.track_muted[track_index] = muted;
        self.send(EngineMsg::Looper(LooperMsg::TrackMuted(track_index, muted)));
    }

    pub fn set_track_solo(&mut self, track_index: usize, solo: bool) {
        if track_index >= MAX_TRACKS {
            return;
        }
        self.track_solo[track_index] = solo;
        self.send(EngineMsg::Looper(LooperMsg::TrackSolo(track_index, solo)));
    }

    pub fn track_volume(&self, track_index: usize) -> f32 {
        self.track_volume.get(track_index).copied().unwrap_or(0.0)
    }

    pub fn is_track_muted(&self, track_index: usize) -> bool {
        self.track_muted.get(track_index).copied().unwrap_or(false)
    }

    pub fn is_track_solo(&self, track_index: usize) -> bool {
        self.track_solo.get(track_index).copied().unwrap_or(false)
    }

    pub fn set_bar_count(&mut self, bars: usize) {
        self.bar_count = bars.clamp(MIN_BARS, MAX_BARS);
        self.send(EngineMsg::Looper(LooperMsg::BarCount(self.bar_count)));
    }

    pub fn bar_count(&self) -> usize {
        self.bar_count
    }

    // ===== looper queries =====

    pub fn looper_state(&self) -> LooperState {
        self.status.looper_state()
    }

    pub fn looper_has_loop(&self) -> bool {
        self.status.used_track_count() > 0
    }

    pub fn looper_current_beat(&self) -> u32 {
        self.status.looper_beat()
    }

    pub fn looper_current_bar(&self) -> u32 {
        self.status.looper_bar()
    }

    pub fn looper_track_has_content(&self, track_index: usize) -> bool {
        self.status.track_has_content(track_index)
    }

    pub fn looper_active_recording_track(&self) -> Option<usize> {
        self.status.looper_active_track()
    }

    pub fn looper_used_track_count(&self) -> usize {
        self.status.used_track_count()
    }

    pub fn looper_buffer_size(&self) -> usize {
        self.status.loop_length_samples() as usize * 2
    }

    pub fn active_voice_count(&self) -> usize {
        self.status.active_voice_count()
    }

    /// Interleaved stereo mixdown of the masked tracks (bit 0 = track 0),
    /// for offline consumption. Empty if nothing is recorded yet.
    pub fn get_mixed_buffer(&self, track_mask: u32) -> Vec<f32> {
        let length = self.status.loop_length_samples() as usize;
        if length == 0 || self.status.used_track_count() == 0 {
            return Vec::new();
        }
        let buffer = vec![0.0f32; length * 2];
        let (reply_tx, reply_rx) = bounded(1);
        self.send(EngineMsg::Looper(LooperMsg::ExportMixdown {
            track_mask,
            buffer,
            reply: reply_tx,
        }));
        match reply_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(buffer) => buffer,
            Err(_) => {
                log::warn!("loop mixdown timed out");
                Vec::new()
            }
        }
    }
}

impl Drop for SynthController {
    fn drop(&mut self) {
        self.send(EngineMsg::Quit);
        let _ = self.ctl_tx.send(HostCmd::Shutdown);
        if let Some(handle) = self.engine_thread.take() {
            let _ = handle.join();
        }
        // Engine is gone, so the reclaim sender is dropped and the reaper
        // unblocks.
        if let Some(handle) = self.reclaim_thread.take() {
            let _ = handle.join();
        }
    }
}
