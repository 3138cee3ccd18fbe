// Status mirror shared between the audio callback and control threads.
//
// The callback publishes with relaxed stores each frame; control threads
// read with scalar loads. Small tears between fields are acceptable for
// UI-grade status, which is all this carries.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU8, Ordering};

use crate::engine::modules::looper::LooperState;

#[derive(Default)]
pub struct EngineStatus {
    looper_state: AtomicU8,
    looper_beat: AtomicU32,
    looper_bar: AtomicU32,
    looper_active_track: AtomicI32,
    looper_content_mask: AtomicU32,
    looper_used_tracks: AtomicU32,
    loop_length_samples: AtomicI64,
    loop_length_locked: AtomicBool,
    active_voices: AtomicU32,
    drum_step: AtomicU32,
}

impl EngineStatus {
    pub fn new() -> Self {
        let status = Self::default();
        status.looper_active_track.store(-1, Ordering::Relaxed);
        status
    }

    // ===== callback-side publishers =====

    pub(crate) fn publish_looper(
        &self,
        state: LooperState,
        beat: i64,
        bar: i64,
        active_track: Option<usize>,
        content_mask: u32,
        used_tracks: usize,
        loop_length: i64,
        locked: bool,
    ) {
        self.looper_state.store(state as u8, Ordering::Relaxed);
        self.looper_beat.store(beat as u32, Ordering::Relaxed);
        self.looper_bar.store(bar as u32, Ordering::Relaxed);
        self.looper_active_track
            .store(active_track.map_or(-1, |t| t as i32), Ordering::Relaxed);
        self.looper_content_mask.store(content_mask, Ordering::Relaxed);
        self.looper_used_tracks.store(used_tracks as u32, Ordering::Relaxed);
        self.loop_length_samples.store(loop_length, Ordering::Relaxed);
        self.loop_length_locked.store(locked, Ordering::Relaxed);
    }

    pub(crate) fn publish_voices(&self, active: usize) {
        self.active_voices.store(active as u32, Ordering::Relaxed);
    }

    pub(crate) fn publish_drum_step(&self, step: usize) {
        self.drum_step.store(step as u32, Ordering::Relaxed);
    }

    // ===== control-side readers =====

    pub fn looper_state(&self) -> LooperState {
        LooperState::from_code(self.looper_state.load(Ordering::Relaxed))
    }

    pub fn looper_beat(&self) -> u32 {
        self.looper_beat.load(Ordering::Relaxed)
    }

    pub fn looper_bar(&self) -> u32 {
        self.looper_bar.load(Ordering::Relaxed)
    }

    pub fn looper_active_track(&self) -> Option<usize> {
        let t = self.looper_active_track.load(Ordering::Relaxed);
        if t < 0 {
            None
        } else {
            Some(t as usize)
        }
    }

    pub fn track_has_content(&self, track_index: usize) -> bool {
        self.looper_content_mask.load(Ordering::Relaxed) & (1 << track_index) != 0
    }

    pub fn used_track_count(&self) -> usize {
        self.looper_used_tracks.load(Ordering::Relaxed) as usize
    }

    pub fn loop_length_samples(&self) -> i64 {
        self.loop_length_samples.load(Ordering::Relaxed)
    }

    pub fn loop_length_locked(&self) -> bool {
        self.loop_length_locked.load(Ordering::Relaxed)
    }

    pub fn active_voice_count(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed) as usize
    }

    pub fn drum_step(&self) -> usize {
        self.drum_step.load(Ordering::Relaxed) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looper_round_trip() {
        let status = EngineStatus::new();
        assert_eq!(status.looper_state(), LooperState::Idle);
        assert_eq!(status.looper_active_track(), None);

        status.publish_looper(LooperState::Recording, 2, 1, Some(3), 0b0101, 2, 192000, true);
        assert_eq!(status.looper_state(), LooperState::Recording);
        assert_eq!(status.looper_beat(), 2);
        assert_eq!(status.looper_bar(), 1);
        assert_eq!(status.looper_active_track(), Some(3));
        assert!(status.track_has_content(0));
        assert!(!status.track_has_content(1));
        assert!(status.track_has_content(2));
        assert_eq!(status.used_track_count(), 2);
        assert_eq!(status.loop_length_samples(), 192000);
        assert!(status.loop_length_locked());
    }
}
