//! `cpal` backend: plays through the system's audio hosts
//!
//! Each playback opens its own output stream on the configured device.
//! The worker thread converts PCM to `f32` and pushes it into an `rtrb`
//! ring; the cpal callback pops from the ring and pings the worker through
//! a wake channel whenever space frees up.
//!
//! ```text
//!  worker ──push()──► rtrb ring ──pop()──► cpal callback ──► device
//!    ▲                                          │
//!    └─────────────── wake channel ◄────────────┘
//! ```
//!
//! An empty ring while data is still expected counts as an underrun: the
//! next write reports an xrun and the worker recovers before retrying.

mod device;
mod ring;

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam::channel::{self, Receiver};

use super::Playback;
use crate::driver::{Driver, DriverSetup, FinishCallback};
use crate::error::{KaError, KaResult};
use crate::proplist::PropList;
use crate::registry::{DeviceSession, PlaybackSink, Readiness, StreamFormat, Written};
use crate::sample_cache::SampleCache;

use ring::{fill_output, RingWriter, StreamFlags};

pub use device::{find_output_device, output_device_labels, DeviceSpec};

pub const NAME: &str = "cpal";

/// Ring size as a fraction of a second
const RING_SECONDS_DIVISOR: usize = 4;

/// Longest single wait for the device before rechecking state
const WAIT_SLICE: Duration = Duration::from_millis(100);

pub struct CpalDriver {
    playback: Playback,
    sink: Arc<CpalSink>,
}

pub fn open(setup: &DriverSetup<'_>) -> KaResult<Box<dyn Driver>> {
    let spec = setup.device.map(DeviceSpec::parse);
    let device = find_output_device(spec.as_ref())?;
    match device.name() {
        Ok(name) => log::info!("[CPAL] Using output device {}", name),
        Err(_) => log::info!("[CPAL] Using unnamed output device"),
    }

    Ok(Box::new(CpalDriver {
        playback: Playback::new(NAME, Arc::clone(&setup.resolver)).with_samples(SampleCache::default()),
        sink: Arc::new(CpalSink { device: RwLock::new(spec) }),
    }))
}

impl Driver for CpalDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn destroy(&self) -> KaResult<()> {
        self.playback.destroy();
        Ok(())
    }

    /// Takes effect for playbacks started afterwards
    fn change_device(&self, device: Option<&str>) -> KaResult<()> {
        let spec = device.map(DeviceSpec::parse);
        find_output_device(spec.as_ref())?;
        *self.sink.device.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = spec;
        Ok(())
    }

    fn change_props(&self, _changed: &PropList, _merged: &PropList) -> KaResult<()> {
        Ok(())
    }

    fn play(
        &self,
        id: u32,
        req: &PropList,
        ctx: &PropList,
        callback: Option<FinishCallback>,
    ) -> KaResult<()> {
        let source = self.playback.source_for(req, ctx)?;
        if source.channels() == 0 || source.channels() > 2 {
            return Err(KaError::NotSupported);
        }
        let sink: Arc<dyn PlaybackSink> = self.sink.clone();
        self.playback.play_source(id, source, sink, callback)
    }

    fn cancel(&self, id: u32) -> KaResult<()> {
        self.playback.cancel(id)
    }

    fn cache(&self, req: &PropList, ctx: &PropList) -> KaResult<()> {
        self.playback.cache(req, ctx)
    }

    fn playing(&self, id: u32) -> KaResult<bool> {
        Ok(self.playback.playing(id))
    }
}

struct CpalSink {
    device: RwLock<Option<DeviceSpec>>,
}

struct CpalSession {
    _stream: Stream,
    ring: RingWriter,
    wake: Receiver<()>,
    flags: Arc<StreamFlags>,
}

impl PlaybackSink for CpalSink {
    fn open_session(&self, format: &StreamFormat) -> KaResult<Box<dyn DeviceSession>> {
        if format.channels == 0 || format.channels > 2 {
            return Err(KaError::NotSupported);
        }

        let spec = self.device.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        let device = find_output_device(spec.as_ref())?;
        let config = pick_config(&device, format)?;
        let out_channels = config.channels as usize;

        let capacity = (format.rate as usize / RING_SECONDS_DIVISOR).max(1024) * out_channels;
        let (producer, mut consumer) = rtrb::RingBuffer::<f32>::new(capacity);
        let (wake_tx, wake_rx) = channel::bounded::<()>(1);
        let flags = Arc::new(StreamFlags::default());

        let cb_flags = Arc::clone(&flags);
        let err_flags = Arc::clone(&flags);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    fill_output(&mut consumer, data, &cb_flags);
                    let _ = wake_tx.try_send(());
                },
                move |err| {
                    log::error!("[CPAL] Stream error: {}", err);
                    err_flags.failed.store(true, Ordering::Relaxed);
                },
                None,
            )
            .map_err(|e| {
                log::warn!("[CPAL] Failed to build output stream: {}", e);
                KaError::NotAvailable
            })?;

        stream.play().map_err(|e| {
            log::warn!("[CPAL] Failed to start output stream: {}", e);
            KaError::Io
        })?;

        log::debug!(
            "[CPAL] Stream open: {} Hz, {} -> {} channels",
            format.rate,
            format.channels,
            out_channels
        );

        Ok(Box::new(CpalSession {
            _stream: stream,
            ring: RingWriter::new(producer, Arc::clone(&flags), format, out_channels),
            wake: wake_rx,
            flags,
        }))
    }
}

/// Pick an f32 output config at the source's rate, preferring the source's
/// channel count
fn pick_config(device: &cpal::Device, format: &StreamFormat) -> KaResult<StreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| {
            log::warn!("[CPAL] Could not query output configs: {}", e);
            KaError::NotAvailable
        })?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| format.rate >= c.min_sample_rate().0 && format.rate <= c.max_sample_rate().0)
        .collect();

    let wanted = format.channels;
    let best = configs
        .iter()
        .find(|c| c.channels() == wanted)
        .or_else(|| configs.iter().find(|c| c.channels() >= wanted))
        .or_else(|| configs.first())
        .ok_or(KaError::NotSupported)?;

    Ok(best.clone().with_sample_rate(SampleRate(format.rate)).config())
}

impl DeviceSession for CpalSession {
    fn wait_ready(&mut self, cancel: &Receiver<()>) -> KaResult<Readiness> {
        loop {
            if self.flags.failed.load(Ordering::Relaxed) {
                return Err(KaError::Io);
            }
            if self.ring.writable() {
                return Ok(Readiness::Writable);
            }
            crossbeam::select! {
                recv(cancel) -> _ => return Ok(Readiness::Canceled),
                recv(self.wake) -> _ => {}
                default(WAIT_SLICE) => {}
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> KaResult<Written> {
        self.ring.write(data)
    }

    fn recover(&mut self) -> KaResult<()> {
        self.ring.recover();
        Ok(())
    }

    fn drain(&mut self) -> KaResult<()> {
        self.flags.draining.store(true, Ordering::Relaxed);

        let ring_time = Duration::from_secs(1) / RING_SECONDS_DIVISOR as u32;
        let deadline = Instant::now() + ring_time + Duration::from_secs(1);
        while !self.ring.is_empty() {
            if self.flags.failed.load(Ordering::Relaxed) {
                return Err(KaError::Io);
            }
            if Instant::now() >= deadline {
                log::warn!("[CPAL] Device stopped consuming, dropping rest of stream");
                break;
            }
            let _ = self.wake.recv_timeout(WAIT_SLICE);
        }
        Ok(())
    }
}
