use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{graph::EngineGraph, messages::EngineMsg, state::EngineStatus};

pub const PREFERRED_SAMPLE_RATE: u32 = 48_000;
pub const CHANNEL_COUNT: u16 = 2;

// Bound on messages drained per buffer so a control-thread burst can never
// starve the render loop.
const MAX_MSGS_PER_BUFFER: usize = 24;

pub struct AudioEngine {
  tx: Sender<EngineMsg>,
  rx: Receiver<EngineMsg>,
  pub sr: f32,
  graph: Arc<Mutex<EngineGraph>>,
  stream: Option<cpal::Stream>,
  restart_pending: Arc<AtomicBool>,
  restarting: AtomicBool,
}

impl AudioEngine {
  pub fn new(status: Arc<EngineStatus>, reclaim_tx: Sender<Vec<f32>>) -> Result<Self, String> {
    let (tx, rx) = unbounded();
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| "no output device".to_string())?;
    let config = Self::pick_config(&device)?;
    let sr = config.sample_rate().0 as f32;

    Ok(Self {
      tx,
      rx,
      sr,
      graph: Arc::new(Mutex::new(EngineGraph::new(sr, status, reclaim_tx))),
      stream: None,
      restart_pending: Arc::new(AtomicBool::new(false)),
      restarting: AtomicBool::new(false),
    })
  }

  // Prefer 48 kHz stereo f32; fall back to any stereo f32 config.
  fn pick_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, String> {
    let mut chosen: Option<cpal::SupportedStreamConfig> = None;
    if let Ok(mut supported) = device.supported_output_configs() {
      for cfg_range in supported.by_ref() {
        if cfg_range.channels() != CHANNEL_COUNT { continue; }
        if cfg_range.sample_format() != cpal::SampleFormat::F32 { continue; }
        if cfg_range.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
          && cfg_range.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
        {
          chosen = Some(cfg_range.with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE)));
          break;
        }
      }
      if chosen.is_none() {
        if let Ok(supported2) = device.supported_output_configs() {
          for cfg_range in supported2 {
            if cfg_range.channels() == CHANNEL_COUNT
              && cfg_range.sample_format() == cpal::SampleFormat::F32
            {
              chosen = Some(cfg_range.with_max_sample_rate());
              break;
            }
          }
        }
      }
    }
    match chosen {
      Some(cfg) => Ok(cfg),
      None => device.default_output_config().map_err(|e| e.to_string()),
    }
  }

  pub fn start(&mut self) -> Result<(), String> {
    if self.stream.is_some() { return Ok(()); }
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| "no output device".to_string())?;
    let config = Self::pick_config(&device)?;
    let cfg: cpal::StreamConfig = config.into();
    self.sr = cfg.sample_rate.0 as f32;

    let rx = self.rx.clone();
    let graph = self.graph.clone();
    let restart_pending = self.restart_pending.clone();

    let err_fn = move |e: cpal::StreamError| {
      // Device went away (unplugged, rerouted). Flag a restart; the engine
      // thread that owns the stream performs it.
      log::warn!("audio stream error: {e}; requesting restart");
      restart_pending.store(true, Ordering::SeqCst);
    };

    let stream = device
      .build_output_stream(
        &cfg,
        move |data: &mut [f32], _| {
          let mut graph = match graph.lock() {
            Ok(g) => g,
            Err(_) => {
              data.fill(0.0);
              return;
            }
          };
          // Drain pending control messages without blocking.
          let mut drained = 0usize;
          loop {
            match rx.try_recv() {
              Ok(msg) => graph.apply(msg),
              Err(TryRecvError::Empty) => break,
              Err(TryRecvError::Disconnected) => break,
            }
            drained += 1;
            if drained >= MAX_MSGS_PER_BUFFER { break; }
          }
          // Render frames.
          for frame in data.chunks_mut(2) {
            let (l, r) = graph.render_frame();
            frame[0] = l;
            if frame.len() > 1 { frame[1] = r; }
          }
        },
        err_fn,
        None,
      )
      .map_err(|e| e.to_string())?;
    stream.play().map_err(|e| e.to_string())?;
    self.stream = Some(stream);
    log::info!("audio stream started at {} Hz", self.sr);
    Ok(())
  }

  pub fn stop(&mut self) {
    self.stream.take();
  }

  /// Called periodically by the engine thread. Rebuilds the stream once if
  /// the error callback flagged a device failure; the CAS guard keeps
  /// overlapping restarts from stacking.
  pub fn restart_if_requested(&mut self) -> bool {
    if !self.restart_pending.swap(false, Ordering::SeqCst) {
      return false;
    }
    if self
      .restarting
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      return false;
    }
    log::info!("restarting audio stream after device change");
    self.stop();
    if let Err(e) = self.start() {
      log::error!("audio stream restart failed: {e}");
    }
    self.restarting.store(false, Ordering::SeqCst);
    true
  }

  pub fn sender(&self) -> Sender<EngineMsg> {
    self.tx.clone()
  }
}

// Intentionally not Clone; the graph is shared with the audio callback.
