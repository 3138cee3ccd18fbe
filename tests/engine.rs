// End-to-end scenarios driven through the engine graph, no audio device
// required. The graph is fed control messages exactly as the callback
// would apply them, and the rendered frames are inspected directly.

use std::sync::Arc;

use crossbeam_channel::unbounded;
use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;

use polyloop::engine::graph::EngineGraph;
use polyloop::engine::messages::{DrumMsg, EngineMsg, LooperMsg, SynthParam};
use polyloop::engine::state::EngineStatus;
use polyloop::{DrumInstrument, LooperState, Waveform};

const SR: f32 = 48000.0;

fn make_graph() -> (EngineGraph, Arc<EngineStatus>) {
    let status = Arc::new(EngineStatus::new());
    let (reclaim_tx, reclaim_rx) = unbounded();
    // Keep the receiver alive for the duration of the test.
    std::mem::forget(reclaim_rx);
    (EngineGraph::new(SR, status.clone(), reclaim_tx), status)
}

fn midi_freq(note: u8) -> f32 {
    440.0 * (2.0f32).powf((note as f32 - 69.0) / 12.0)
}

fn render(graph: &mut EngineGraph, frames: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(frames);
    for _ in 0..frames {
        let (l, _r) = graph.render_frame();
        out.push(l);
    }
    out
}

/// Hann-windowed FFT magnitude spectrum.
fn spectrum(samples: &[f32]) -> Vec<f32> {
    let n = samples.len();
    let mut buf: Vec<Complex32> = samples
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let w = 0.5 * (1.0 - (std::f32::consts::TAU * i as f32 / (n - 1) as f32).cos());
            Complex32::new(x * w, 0.0)
        })
        .collect();
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buf);
    buf[..n / 2].iter().map(|c| c.norm()).collect()
}

/// Peak frequency via parabolic interpolation around the strongest bin.
fn peak_frequency(mags: &[f32], sample_rate: f32, fft_len: usize) -> f32 {
    let peak = mags
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    let alpha = mags[peak - 1].max(1e-12).ln();
    let beta = mags[peak].max(1e-12).ln();
    let gamma = mags[peak + 1].max(1e-12).ln();
    let delta = 0.5 * (alpha - gamma) / (alpha - 2.0 * beta + gamma);
    (peak as f32 + delta) * sample_rate / fft_len as f32
}

#[test]
fn single_note_sine_is_spectrally_clean() {
    let (mut graph, _status) = make_graph();
    graph.apply(EngineMsg::Synth(SynthParam::Waveform(Waveform::Sine)));
    graph.apply(EngineMsg::Synth(SynthParam::Attack(0.01)));
    graph.apply(EngineMsg::Synth(SynthParam::Decay(0.001)));
    graph.apply(EngineMsg::Synth(SynthParam::Sustain(1.0)));
    graph.apply(EngineMsg::Synth(SynthParam::Release(0.1)));
    graph.apply(EngineMsg::NoteOn { note: 69, freq: 440.0, velocity: 0.7 });

    // Let the attack and filter smoothing settle.
    render(&mut graph, (SR * 0.1) as usize);

    let n = 65536;
    let samples = render(&mut graph, n);
    let mags = spectrum(&samples);

    let freq = peak_frequency(&mags, SR, n);
    assert!((freq - 440.0).abs() < 0.3, "peak at {} Hz", freq);

    // The fundamental towers over everything away from it.
    let peak_bin = (440.0 / SR * n as f32).round() as usize;
    let peak_mag = mags[peak_bin - 1..=peak_bin + 1].iter().cloned().fold(0.0f32, f32::max);
    let floor = mags
        .iter()
        .enumerate()
        .filter(|(i, _)| (*i as isize - peak_bin as isize).unsigned_abs() > 6)
        .map(|(_, &m)| m)
        .fold(0.0f32, f32::max);
    let ratio_db = 20.0 * (peak_mag / floor.max(1e-12)).log10();
    assert!(ratio_db >= 24.0, "spectral floor only {} dB down", ratio_db);
}

#[test]
fn twelve_note_polyphony_steals_the_oldest() {
    let (mut graph, _status) = make_graph();
    for note in 60..72 {
        graph.apply(EngineMsg::NoteOn { note, freq: midi_freq(note), velocity: 0.7 });
    }
    render(&mut graph, (SR * 0.2) as usize);
    assert_eq!(graph.polyphony().active_voice_count(), 12);

    graph.apply(EngineMsg::NoteOn { note: 72, freq: midi_freq(72), velocity: 0.7 });
    let mut notes: Vec<u8> = graph.polyphony().active_notes().collect();
    notes.sort_unstable();
    assert_eq!(notes, (61..73).collect::<Vec<u8>>());
}

#[test]
fn loop_record_and_playback_round_trip() {
    let (mut graph, status) = make_graph();
    graph.apply(EngineMsg::Drum(DrumMsg::Bpm(120.0)));
    graph.apply(EngineMsg::Looper(LooperMsg::BarCount(2)));
    graph.apply(EngineMsg::MetronomeVolume(0.0));
    graph.apply(EngineMsg::Synth(SynthParam::Waveform(Waveform::Sine)));
    graph.apply(EngineMsg::Synth(SynthParam::Sustain(1.0)));
    graph.apply(EngineMsg::Synth(SynthParam::Release(0.1)));
    graph.apply(EngineMsg::NoteOn { note: 69, freq: 440.0, velocity: 0.7 });

    // 2 bars at 120 BPM.
    let length = 192000usize;
    graph.apply(EngineMsg::Looper(LooperMsg::StartRecording {
        track: 0,
        buffer_l: vec![0.0; length],
        buffer_r: vec![0.0; length],
    }));
    assert_eq!(status.looper_state(), LooperState::PreCount);

    // Pre-count: 4 beats of 24000 samples.
    render(&mut graph, 96000);
    assert_eq!(status.looper_state(), LooperState::Recording);

    let recorded = render(&mut graph, length);
    assert_eq!(status.looper_state(), LooperState::Stopped);
    assert!(status.track_has_content(0));
    assert!(status.loop_length_locked());
    assert_eq!(status.loop_length_samples(), length as i64);

    // Silence the live synth, then play the loop back at unity volume.
    graph.apply(EngineMsg::NoteOff { note: 69 });
    render(&mut graph, (SR * 0.4) as usize);
    graph.apply(EngineMsg::Looper(LooperMsg::TrackVolume(0, 1.0)));
    graph.apply(EngineMsg::Looper(LooperMsg::StartPlayback));
    assert_eq!(status.looper_state(), LooperState::Playing);

    let played = render(&mut graph, length);
    for i in 0..length {
        assert!(
            (played[i] - recorded[i]).abs() <= 1e-7,
            "frame {} differs: {} vs {}",
            i,
            played[i],
            recorded[i]
        );
    }

    // The second pass starts over from position zero.
    let wrapped = render(&mut graph, 1000);
    for i in 0..1000 {
        assert!((wrapped[i] - recorded[i]).abs() <= 1e-7, "wrap frame {} differs", i);
    }
}

#[test]
fn pre_count_gates_recording_and_clicks_each_beat() {
    let (mut graph, status) = make_graph();
    graph.apply(EngineMsg::Drum(DrumMsg::Bpm(120.0)));
    graph.apply(EngineMsg::Looper(LooperMsg::BarCount(1)));

    let length = 96000usize;
    graph.apply(EngineMsg::Looper(LooperMsg::StartRecording {
        track: 0,
        buffer_l: vec![0.0; length],
        buffer_r: vec![0.0; length],
    }));

    let samples_per_beat = 24000usize;
    for beat in 0..4 {
        assert_eq!(status.looper_state(), LooperState::PreCount, "beat {}", beat);
        let onset = render(&mut graph, 4000);
        let onset_peak = onset.iter().fold(0.0f32, |a, &x| a.max(x.abs()));
        let tail = render(&mut graph, samples_per_beat - 4000);
        let tail_peak =
            tail[tail.len() - 2000..].iter().fold(0.0f32, |a, &x| a.max(x.abs()));
        assert!(onset_peak > 0.01, "no click on pre-count beat {}", beat);
        assert!(
            onset_peak > tail_peak * 3.0,
            "beat {} click does not stand out: {} vs {}",
            beat,
            onset_peak,
            tail_peak
        );
    }

    // Exactly at the end of the fourth beat the record window opens.
    assert_eq!(status.looper_state(), LooperState::Recording);
}

#[test]
fn default_drum_pattern_lands_on_the_grid() {
    let (mut graph, _status) = make_graph();
    graph.apply(EngineMsg::Drum(DrumMsg::Bpm(120.0)));
    graph.apply(EngineMsg::Drum(DrumMsg::ResetPattern));
    graph.apply(EngineMsg::Drum(DrumMsg::MasterEnabled(true)));

    // One bar = 16 steps of 6000 samples at 120 BPM.
    let bar = render(&mut graph, 96000);
    let step_len = 6000usize;

    let mut onset_peaks = Vec::new();
    for step in 0..16 {
        let start = step * step_len;
        let onset =
            bar[start..start + 1000].iter().fold(0.0f32, |a, &x| a.max(x.abs()));
        onset_peaks.push(onset);
        assert!(onset > 0.003, "step {} silent: {}", step, onset);
    }

    // Kick steps (0, 8) dominate hi-hat-only steps.
    for &kick_step in &[0usize, 8] {
        for &hat_step in &[2usize, 6, 10, 14] {
            assert!(
                onset_peaks[kick_step] > onset_peaks[hat_step],
                "kick step {} ({}) not louder than hat step {} ({})",
                kick_step,
                onset_peaks[kick_step],
                hat_step,
                onset_peaks[hat_step]
            );
        }
    }
    // Snare steps (4, 12) are also strong onsets.
    for &snare_step in &[4usize, 12] {
        assert!(onset_peaks[snare_step] > onset_peaks[snare_step + 1]);
    }
}

#[test]
fn drums_pause_during_count_in_and_recording() {
    let (mut graph, status) = make_graph();
    graph.apply(EngineMsg::Drum(DrumMsg::Bpm(120.0)));
    graph.apply(EngineMsg::Drum(DrumMsg::MasterEnabled(true)));
    graph.apply(EngineMsg::MetronomeVolume(0.0));
    graph.apply(EngineMsg::Looper(LooperMsg::BarCount(1)));

    // Let the drums run, then start a recording; with the metronome muted
    // and no synth playing, pre-count frames must be silent because the
    // sequencer yields during the count-in.
    render(&mut graph, 24000);
    graph.apply(EngineMsg::Looper(LooperMsg::StartRecording {
        track: 0,
        buffer_l: vec![0.0; 96000],
        buffer_r: vec![0.0; 96000],
    }));
    assert_eq!(status.looper_state(), LooperState::PreCount);

    // Skip the decay tail of the last drum hit, then expect silence.
    render(&mut graph, 24000);
    let quiet = render(&mut graph, 48000);
    let peak = quiet.iter().fold(0.0f32, |a, &x| a.max(x.abs()));
    assert!(peak < 1e-3, "drums leaked into the count-in: {}", peak);
}

#[test]
fn wurlitzer_mode_switch_kills_all_notes() {
    let (mut graph, _status) = make_graph();
    graph.apply(EngineMsg::Synth(SynthParam::Release(0.05)));
    for note in 60..66 {
        graph.apply(EngineMsg::NoteOn { note, freq: midi_freq(note), velocity: 0.7 });
    }
    assert_eq!(graph.polyphony().active_voice_count(), 6);

    graph.apply(EngineMsg::WurlitzerMode(true));
    // Voices were released; after the release tail everything is idle.
    render(&mut graph, (SR * 0.1) as usize);
    assert_eq!(graph.polyphony().active_voice_count(), 0);

    // Notes now route to the electric-piano bank.
    graph.apply(EngineMsg::NoteOn { note: 60, freq: midi_freq(60), velocity: 1.0 });
    let frames = render(&mut graph, 4800);
    let peak = frames.iter().fold(0.0f32, |a, &x| a.max(x.abs()));
    assert!(peak > 0.001, "wurlitzer bank silent after mode switch");
}

#[test]
fn output_is_always_hard_clipped() {
    let (mut graph, _status) = make_graph();
    // Worst case: everything loud at once.
    graph.apply(EngineMsg::Synth(SynthParam::Sustain(1.0)));
    graph.apply(EngineMsg::Synth(SynthParam::SubOscLevel(1.0)));
    graph.apply(EngineMsg::Synth(SynthParam::NoiseLevel(1.0)));
    graph.apply(EngineMsg::Drum(DrumMsg::MasterEnabled(true)));
    for note in 36..48 {
        graph.apply(EngineMsg::NoteOn { note, freq: midi_freq(note), velocity: 1.0 });
    }
    for _ in 0..96000 {
        let (l, r) = graph.render_frame();
        assert!((-1.0..=1.0).contains(&l));
        assert!((-1.0..=1.0).contains(&r));
    }
}

#[test]
fn mixdown_export_round_trips_through_the_graph() {
    let (mut graph, status) = make_graph();
    graph.apply(EngineMsg::Drum(DrumMsg::Bpm(120.0)));
    graph.apply(EngineMsg::Looper(LooperMsg::BarCount(1)));
    graph.apply(EngineMsg::MetronomeVolume(0.0));
    graph.apply(EngineMsg::Synth(SynthParam::Sustain(1.0)));
    graph.apply(EngineMsg::NoteOn { note: 57, freq: 220.0, velocity: 0.7 });

    let length = 96000usize;
    graph.apply(EngineMsg::Looper(LooperMsg::StartRecording {
        track: 0,
        buffer_l: vec![0.0; length],
        buffer_r: vec![0.0; length],
    }));
    render(&mut graph, 96000 + length);
    assert_eq!(status.looper_state(), LooperState::Stopped);

    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
    graph.apply(EngineMsg::Looper(LooperMsg::ExportMixdown {
        track_mask: 0b0001,
        buffer: vec![0.0; length * 2],
        reply: reply_tx,
    }));
    let mix = reply_rx.try_recv().expect("mixdown reply");
    assert_eq!(mix.len(), length * 2);
    let energy: f32 = mix.iter().map(|x| x * x).sum();
    assert!(energy > 0.0, "mixdown is silent");
}

#[test]
fn drum_step_messages_reach_the_sequencer() {
    let (mut graph, _status) = make_graph();
    // Clear the pattern, then place a single kick on step 2.
    for instrument in [DrumInstrument::Kick, DrumInstrument::Snare, DrumInstrument::HiHat] {
        for step in 0..16 {
            graph.apply(EngineMsg::Drum(DrumMsg::Step { instrument, step, velocity: 0.0 }));
        }
    }
    graph.apply(EngineMsg::Drum(DrumMsg::Step {
        instrument: DrumInstrument::Kick,
        step: 2,
        velocity: 1.0,
    }));
    graph.apply(EngineMsg::Drum(DrumMsg::Bpm(120.0)));
    graph.apply(EngineMsg::Drum(DrumMsg::MasterEnabled(true)));

    let bar = render(&mut graph, 96000);
    let step_len = 6000usize;
    let peak = |range: std::ops::Range<usize>| {
        bar[range].iter().fold(0.0f32, |a, &x| a.max(x.abs()))
    };

    // An onset shows as a jump over the window right before it; an empty
    // step only carries the monotonically decaying tail of earlier hits.
    let before_hit = peak(1 * step_len..2 * step_len);
    let at_hit = peak(2 * step_len..2 * step_len + 2000);
    assert!(at_hit > 0.05, "kick missing on its step: {}", at_hit);
    assert!(at_hit > before_hit * 3.0, "no onset jump at the kick step");

    let before_empty = peak(5 * step_len..6 * step_len);
    let at_empty = peak(6 * step_len..6 * step_len + 2000);
    assert!(at_empty <= before_empty * 1.05, "unexpected hit on an empty step");
}
