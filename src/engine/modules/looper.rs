// Four-track sample-accurate looper.
//
// All tracks share one musical grid: the first completed recording locks
// the loop length and every later track records against it. A four-beat
// pre-count runs before the record window opens; existing tracks keep
// playing through pre-count and recording so overdubs line up by ear.
//
// Real-time rule: nothing here allocates on the audio path. Fresh track
// buffers arrive with the start-recording call (allocated on the control
// thread) and displaced buffers leave through the reclaim channel to be
// dropped over there.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

pub const MAX_TRACKS: usize = 4;
pub const PRE_COUNT_BEATS: i64 = 4;
pub const MIN_BARS: usize = 1;
pub const MAX_BARS: usize = 8;
pub const DEFAULT_BARS: usize = 4;
pub const BEATS_PER_BAR: i64 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LooperState {
    Idle = 0,
    PreCount = 1,
    Recording = 2,
    Stopped = 3,
    Playing = 4,
}

impl LooperState {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => LooperState::PreCount,
            2 => LooperState::Recording,
            3 => LooperState::Stopped,
            4 => LooperState::Playing,
            _ => LooperState::Idle,
        }
    }
}

struct LoopTrack {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    has_content: bool,
    volume: f32,
    muted: bool,
    solo: bool,
}

impl LoopTrack {
    fn new() -> Self {
        Self {
            buffer_l: Vec::new(),
            buffer_r: Vec::new(),
            has_content: false,
            volume: 0.7,
            muted: false,
            solo: false,
        }
    }
}

pub struct Looper {
    state: LooperState,
    sample_rate: f32,
    bpm: f32,
    bars: usize,

    tracks: [LoopTrack; MAX_TRACKS],
    active_recording_track: Option<usize>,

    samples_per_beat: i64,
    samples_per_bar: i64,
    loop_length_samples: i64,
    loop_length_locked: bool,

    record_position: i64,
    playback_position: i64,
    pre_count_position: i64,

    current_beat: i64,
    current_bar: i64,

    reclaim_tx: Option<Sender<Vec<f32>>>,
}

impl Looper {
    pub fn new(sample_rate: f32) -> Self {
        let mut looper = Self {
            state: LooperState::Idle,
            sample_rate,
            bpm: 100.0,
            bars: DEFAULT_BARS,
            tracks: std::array::from_fn(|_| LoopTrack::new()),
            active_recording_track: None,
            samples_per_beat: 0,
            samples_per_bar: 0,
            loop_length_samples: 0,
            loop_length_locked: false,
            record_position: 0,
            playback_position: 0,
            pre_count_position: 0,
            current_beat: 0,
            current_bar: 0,
            reclaim_tx: None,
        };
        looper.update_timing();
        looper
    }

    /// Displaced buffers are pushed through this channel instead of being
    /// dropped in the audio callback.
    pub fn set_reclaim_sender(&mut self, tx: Sender<Vec<f32>>) {
        self.reclaim_tx = Some(tx);
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm.clamp(30.0, 300.0);
        self.update_timing();
    }

    pub fn set_bar_count(&mut self, bars: usize) {
        if self.state == LooperState::PreCount || self.state == LooperState::Recording {
            return;
        }
        self.bars = bars.clamp(MIN_BARS, MAX_BARS);
        self.update_timing();
    }

    pub fn bar_count(&self) -> usize {
        self.bars
    }

    fn update_timing(&mut self) {
        let seconds_per_beat = 60.0 / self.bpm;
        self.samples_per_beat = (seconds_per_beat * self.sample_rate) as i64;
        self.samples_per_bar = self.samples_per_beat * BEATS_PER_BAR;
        // The first completed recording freezes the length.
        if !self.loop_length_locked {
            self.loop_length_samples = self.samples_per_bar * self.bars as i64;
        }
    }

    // ===== transport =====

    /// Begin the pre-count for a track. The buffers must be zero-filled and
    /// at least `loop_length_samples` long; they were allocated off the
    /// audio thread.
    pub fn start_recording_track(
        &mut self,
        track_index: usize,
        buffer_l: Vec<f32>,
        buffer_r: Vec<f32>,
    ) -> bool {
        if track_index >= MAX_TRACKS
            || self.tracks[track_index].has_content
            || self.state == LooperState::Recording
            || self.state == LooperState::PreCount
        {
            self.reclaim(buffer_l);
            self.reclaim(buffer_r);
            return false;
        }

        if !self.loop_length_locked {
            self.update_timing();
        }

        let needed = self.loop_length_samples as usize;
        if buffer_l.len() < needed || buffer_r.len() < needed {
            self.reclaim(buffer_l);
            self.reclaim(buffer_r);
            return false;
        }

        let track = &mut self.tracks[track_index];
        let old_l = std::mem::replace(&mut track.buffer_l, buffer_l);
        let old_r = std::mem::replace(&mut track.buffer_r, buffer_r);
        self.reclaim(old_l);
        self.reclaim(old_r);

        self.active_recording_track = Some(track_index);
        self.state = LooperState::PreCount;
        self.pre_count_position = 0;
        self.record_position = 0;
        self.current_beat = 0;
        self.current_bar = 0;
        true
    }

    pub fn start_playback(&mut self) {
        if self.has_any_loop() && self.state == LooperState::Stopped {
            self.state = LooperState::Playing;
            self.playback_position = 0;
            self.current_beat = 0;
            self.current_bar = 0;
        }
    }

    pub fn stop_playback(&mut self) {
        if self.state == LooperState::Playing {
            self.state = LooperState::Stopped;
            self.playback_position = 0;
        }
    }

    pub fn cancel_recording(&mut self) {
        if self.state != LooperState::PreCount && self.state != LooperState::Recording {
            return;
        }
        // The active track never got content; its buffers stay parked for
        // the next attempt.
        self.active_recording_track = None;
        self.record_position = 0;
        self.state = if self.has_any_loop() { LooperState::Stopped } else { LooperState::Idle };
    }

    pub fn clear_track(&mut self, track_index: usize) {
        if track_index >= MAX_TRACKS {
            return;
        }
        if self.active_recording_track == Some(track_index)
            && (self.state == LooperState::PreCount || self.state == LooperState::Recording)
        {
            return;
        }

        let track = &mut self.tracks[track_index];
        track.has_content = false;
        track.volume = 0.7;
        track.muted = false;
        track.solo = false;

        if !self.has_any_loop() {
            self.state = LooperState::Idle;
            self.loop_length_locked = false;
            self.playback_position = 0;
            self.update_timing();
        }
    }

    pub fn clear_all_tracks(&mut self) {
        if self.state == LooperState::Playing {
            self.stop_playback();
        }
        for track in &mut self.tracks {
            track.has_content = false;
            track.volume = 0.7;
            track.muted = false;
            track.solo = false;
        }
        self.state = LooperState::Idle;
        self.active_recording_track = None;
        self.loop_length_locked = false;
        self.playback_position = 0;
        self.record_position = 0;
        self.current_beat = 0;
        self.current_bar = 0;
        self.update_timing();
    }

    // ===== track controls =====

    pub fn set_track_volume(&mut self, track_index: usize, volume: f32) {
        if let Some(track) = self.tracks.get_mut(track_index) {
            track.volume = volume.clamp(0.0, 1.0);
        }
    }

    pub fn set_track_muted(&mut self, track_index: usize, muted: bool) {
        if let Some(track) = self.tracks.get_mut(track_index) {
            track.muted = muted;
        }
    }

    pub fn set_track_solo(&mut self, track_index: usize, solo: bool) {
        if let Some(track) = self.tracks.get_mut(track_index) {
            track.solo = solo;
        }
    }

    // ===== queries =====

    pub fn state(&self) -> LooperState {
        self.state
    }

    pub fn has_any_loop(&self) -> bool {
        self.tracks.iter().any(|t| t.has_content)
    }

    pub fn track_has_content(&self, track_index: usize) -> bool {
        self.tracks.get(track_index).map_or(false, |t| t.has_content)
    }

    pub fn track_volume(&self, track_index: usize) -> f32 {
        self.tracks.get(track_index).map_or(0.0, |t| t.volume)
    }

    pub fn is_track_muted(&self, track_index: usize) -> bool {
        self.tracks.get(track_index).map_or(false, |t| t.muted)
    }

    pub fn is_track_solo(&self, track_index: usize) -> bool {
        self.tracks.get(track_index).map_or(false, |t| t.solo)
    }

    pub fn used_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.has_content).count()
    }

    pub fn active_recording_track(&self) -> Option<usize> {
        self.active_recording_track
    }

    pub fn current_beat(&self) -> i64 {
        self.current_beat
    }

    pub fn current_bar(&self) -> i64 {
        self.current_bar
    }

    pub fn loop_length_samples(&self) -> i64 {
        self.loop_length_samples
    }

    pub fn is_length_locked(&self) -> bool {
        self.loop_length_locked
    }

    pub fn playback_position(&self) -> i64 {
        self.playback_position
    }

    pub fn samples_per_beat(&self) -> i64 {
        self.samples_per_beat
    }

    // ===== audio =====

    /// Feed one frame of (post-volume) synth output; returns the loop
    /// playback to be added to the mix.
    #[inline]
    pub fn process(&mut self, synth_l: f32, synth_r: f32) -> (f32, f32) {
        match self.state {
            LooperState::PreCount => self.process_pre_count(),
            LooperState::Recording => self.process_recording(synth_l, synth_r),
            LooperState::Playing => self.process_playing(),
            LooperState::Idle | LooperState::Stopped => (0.0, 0.0),
        }
    }

    fn process_pre_count(&mut self) -> (f32, f32) {
        let mut out = (0.0, 0.0);

        // Existing tracks keep looping underneath the count-in.
        if self.has_any_loop() {
            out = self.mix_tracks_at(self.playback_position, None);
            self.playback_position += 1;
            if self.loop_length_samples > 0 && self.playback_position >= self.loop_length_samples {
                self.playback_position = 0;
            }
        }

        self.pre_count_position += 1;
        let beat = self.pre_count_position / self.samples_per_beat;
        self.current_beat = beat.min(PRE_COUNT_BEATS);

        if self.pre_count_position >= self.samples_per_beat * PRE_COUNT_BEATS {
            self.state = LooperState::Recording;
            self.record_position = 0;
            self.playback_position = 0;
            self.current_beat = 0;
            self.current_bar = 0;
        }

        out
    }

    fn process_recording(&mut self, synth_l: f32, synth_r: f32) -> (f32, f32) {
        let record_pos = self.record_position;

        if let Some(active) = self.active_recording_track {
            if record_pos < self.loop_length_samples {
                let track = &mut self.tracks[active];
                track.buffer_l[record_pos as usize] = synth_l;
                track.buffer_r[record_pos as usize] = synth_r;
            }
        }

        // Monitor the other tracks at the same grid position.
        let out = self.mix_tracks_at(record_pos, self.active_recording_track);

        self.record_position += 1;
        self.update_beat_bar(self.record_position);

        if self.record_position >= self.loop_length_samples {
            if let Some(active) = self.active_recording_track {
                self.tracks[active].has_content = true;
            }
            self.loop_length_locked = true;
            self.state = LooperState::Stopped;
            self.active_recording_track = None;
            self.playback_position = 0;
            self.current_beat = 0;
            self.current_bar = 0;
        }

        out
    }

    fn process_playing(&mut self) -> (f32, f32) {
        let out = self.mix_tracks_at(self.playback_position, None);

        self.playback_position += 1;
        self.update_beat_bar(self.playback_position);

        if self.playback_position >= self.loop_length_samples {
            self.playback_position = 0;
            self.current_beat = 0;
            self.current_bar = 0;
        }

        out
    }

    #[inline]
    fn mix_tracks_at(&self, position: i64, skip: Option<usize>) -> (f32, f32) {
        let any_solo = self.tracks.iter().any(|t| t.has_content && t.solo);
        let mut left = 0.0;
        let mut right = 0.0;
        for (i, track) in self.tracks.iter().enumerate() {
            if Some(i) == skip || !track.has_content || track.muted {
                continue;
            }
            if any_solo && !track.solo {
                continue;
            }
            let pos = position as usize;
            if pos < track.buffer_l.len() {
                left += track.buffer_l[pos] * track.volume;
                right += track.buffer_r[pos] * track.volume;
            }
        }
        (left, right)
    }

    fn update_beat_bar(&mut self, position: i64) {
        if self.samples_per_beat <= 0 {
            return;
        }
        let total_beats = position / self.samples_per_beat;
        self.current_beat = total_beats % BEATS_PER_BAR;
        self.current_bar = (total_beats / BEATS_PER_BAR) % self.bars as i64;
    }

    /// Sum the masked tracks into an interleaved stereo buffer. `out` must
    /// hold `2 * loop_length_samples` floats.
    pub fn mix_into(&self, track_mask: u32, out: &mut [f32]) {
        let length = self.loop_length_samples as usize;
        let frames = (out.len() / 2).min(length);
        for frame in 0..frames {
            let mut left = 0.0;
            let mut right = 0.0;
            for (i, track) in self.tracks.iter().enumerate() {
                if track_mask & (1 << i) == 0 || !track.has_content {
                    continue;
                }
                if frame < track.buffer_l.len() {
                    left += track.buffer_l[frame] * track.volume;
                    right += track.buffer_r[frame] * track.volume;
                }
            }
            out[frame * 2] = left.clamp(-1.0, 1.0);
            out[frame * 2 + 1] = right.clamp(-1.0, 1.0);
        }
    }

    fn reclaim(&self, buffer: Vec<f32>) {
        if buffer.capacity() == 0 {
            return;
        }
        if let Some(tx) = &self.reclaim_tx {
            // If the channel is gone the drop happens here; only possible
            // during teardown when glitches no longer matter.
            let _ = tx.try_send(buffer);
        }
    }
}
