//! `file` backend: renders every playback into a WAV file
//!
//! The device string names the output directory. Each accepted play writes
//! `<id>-<seq>.wav` as 16-bit PCM at the source's rate and channel count.
//! Canceled playbacks leave a truncated file behind.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam::channel::Receiver;

use super::Playback;
use crate::driver::{Driver, DriverSetup, FinishCallback};
use crate::error::{KaError, KaResult};
use crate::proplist::PropList;
use crate::registry::{cancel_requested, DeviceSession, PlaybackSink, Readiness, StreamFormat, Written};
use crate::sample_cache::SampleCache;
use crate::sound_file::{map_hound_error, samples_i16, SampleType};

pub const NAME: &str = "file";

pub struct FileDriver {
    playback: Playback,
    dir: RwLock<PathBuf>,
    seq: AtomicU64,
}

pub fn open(setup: &DriverSetup<'_>) -> KaResult<Box<dyn Driver>> {
    let dir = setup.device.ok_or(KaError::NotAvailable)?;
    let dir = prepare_dir(Path::new(dir))?;
    log::info!("[FILE] Writing playbacks to {:?}", dir);

    Ok(Box::new(FileDriver {
        playback: Playback::new(NAME, Arc::clone(&setup.resolver)).with_samples(SampleCache::default()),
        dir: RwLock::new(dir),
        seq: AtomicU64::new(0),
    }))
}

fn prepare_dir(dir: &Path) -> KaResult<PathBuf> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        log::warn!("[FILE] Output directory {:?} unusable: {}", dir, e);
        return Err(KaError::NotAvailable);
    }
    Ok(dir.to_path_buf())
}

impl FileDriver {
    fn next_path(&self, id: u32) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let dir = self.dir.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        dir.join(format!("{}-{}.wav", id, seq))
    }
}

impl Driver for FileDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn destroy(&self) -> KaResult<()> {
        self.playback.destroy();
        Ok(())
    }

    fn change_device(&self, device: Option<&str>) -> KaResult<()> {
        let dir = prepare_dir(Path::new(device.ok_or(KaError::NotAvailable)?))?;
        *self.dir.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = dir;
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
        let sink = Arc::new(WavSink { path: self.next_path(id) });
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

/// One output file
struct WavSink {
    path: PathBuf,
}

struct WavSession {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_type: SampleType,
}

impl PlaybackSink for WavSink {
    fn open_session(&self, format: &StreamFormat) -> KaResult<Box<dyn DeviceSession>> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec).map_err(map_hound_error)?;
        log::debug!("[FILE] Recording to {:?}", self.path);
        Ok(Box::new(WavSession {
            writer: Some(writer),
            sample_type: format.sample_type,
        }))
    }
}

impl DeviceSession for WavSession {
    fn wait_ready(&mut self, cancel: &Receiver<()>) -> KaResult<Readiness> {
        if cancel_requested(cancel) {
            Ok(Readiness::Canceled)
        } else {
            Ok(Readiness::Writable)
        }
    }

    fn write(&mut self, data: &[u8]) -> KaResult<Written> {
        let writer = self.writer.as_mut().ok_or(KaError::State)?;
        let width = self.sample_type.bytes_per_sample();
        for sample in samples_i16(data, self.sample_type) {
            writer.write_sample(sample).map_err(map_hound_error)?;
        }
        Ok(Written::Bytes(data.len() / width * width))
    }

    fn recover(&mut self) -> KaResult<()> {
        Ok(())
    }

    fn drain(&mut self) -> KaResult<()> {
        match self.writer.take() {
            Some(writer) => writer.finalize().map_err(map_hound_error),
            None => Ok(()),
        }
    }
}
