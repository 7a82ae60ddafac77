//! Built-in backends
//!
//! Each backend is a thin [`Driver`](crate::driver::Driver) around
//! [`Playback`]: it resolves the request to a sound source, hands it to an
//! [`OperationRegistry`] together with a device-specific
//! [`PlaybackSink`], and lets the registry run the worker.

#[cfg(feature = "cpal-backend")]
pub mod cpal;
pub mod file;
pub mod null;

use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::error::{KaError, KaResult};
use crate::proplist::{props, PropList};
use crate::registry::{
    cancel_requested, DeviceSession, FinishCallback, OperationRegistry, PlaybackSink, Readiness,
    StreamFormat, Written,
};
use crate::sample_cache::{sample_key, CacheControl, SampleCache};
use crate::sound_file::{db_to_linear, parse_volume_db, DecodedSound, GainSoundFile, MemorySoundFile, SoundFile};
use crate::theme::ThemeResolver;

/// Shared per-driver playback state
pub struct Playback {
    resolver: Arc<ThemeResolver>,
    operations: OperationRegistry,
    samples: Option<SampleCache>,
}

impl Playback {
    pub fn new(name: &str, resolver: Arc<ThemeResolver>) -> Self {
        Self {
            resolver,
            operations: OperationRegistry::new(name),
            samples: None,
        }
    }

    /// Enable the in-memory sample cache (and with it `cache`)
    pub fn with_samples(mut self, samples: SampleCache) -> Self {
        self.samples = Some(samples);
        self
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub fn samples(&self) -> Option<&SampleCache> {
        self.samples.as_ref()
    }

    /// Resolve `req` and start streaming it into `sink`
    pub fn play(
        &self,
        id: u32,
        req: &PropList,
        ctx: &PropList,
        sink: Arc<dyn PlaybackSink>,
        callback: Option<FinishCallback>,
    ) -> KaResult<()> {
        let source = self.source_for(req, ctx)?;
        self.operations.start(id, source, sink, callback)
    }

    /// Start streaming an already opened source
    pub fn play_source(
        &self,
        id: u32,
        source: Box<dyn SoundFile>,
        sink: Arc<dyn PlaybackSink>,
        callback: Option<FinishCallback>,
    ) -> KaResult<()> {
        self.operations.start(id, source, sink, callback)
    }

    /// Source for `req` with its `kanberra.volume` applied
    pub fn source_for(&self, req: &PropList, ctx: &PropList) -> KaResult<Box<dyn SoundFile>> {
        let gain = volume_gain(req, ctx)?;
        let source = self.unscaled_source(req, ctx)?;
        Ok(match gain {
            Some(gain) => Box::new(GainSoundFile::new(source, gain)),
            None => source,
        })
    }

    /// Cached sample if there is one, else a freshly resolved file. With a
    /// cache-control other than `never` the resolved file is decoded and
    /// kept for later plays.
    fn unscaled_source(&self, req: &PropList, ctx: &PropList) -> KaResult<Box<dyn SoundFile>> {
        let Some(samples) = &self.samples else {
            return Ok(self.resolver.lookup_sound(ctx, req)?.file);
        };

        let control = CacheControl::from_props(req, ctx, CacheControl::Never)?;
        let key = sample_key(req, ctx);

        if let Some(sound) = key.as_deref().and_then(|k| samples.get(k)) {
            log::debug!("[PLAYBACK] Playing cached sample {:?}", key);
            return Ok(Box::new(MemorySoundFile::new(sound)));
        }

        let mut resolved = self.resolver.lookup_sound(ctx, req)?;
        match (control, key) {
            (CacheControl::Never, _) | (_, None) => Ok(resolved.file),
            (control, Some(key)) => {
                let sound = Arc::new(DecodedSound::decode(resolved.file.as_mut())?);
                samples.insert(&key, control, Arc::clone(&sound));
                Ok(Box::new(MemorySoundFile::new(sound)))
            }
        }
    }

    /// Decode the sound for `req` into the sample cache
    pub fn cache(&self, req: &PropList, ctx: &PropList) -> KaResult<()> {
        let samples = self.samples.as_ref().ok_or(KaError::NotSupported)?;
        let control = CacheControl::from_props(req, ctx, CacheControl::Permanent)?;
        let key = sample_key(req, ctx).ok_or(KaError::Invalid)?;

        if control == CacheControl::Never || samples.get(&key).is_some() {
            return Ok(());
        }

        let mut resolved = self.resolver.lookup_sound(ctx, req)?;
        let sound = DecodedSound::decode(resolved.file.as_mut())?;
        log::debug!("[PLAYBACK] Cached {} from {:?} ({} bytes)", key, resolved.path, sound.len());
        samples.insert(&key, control, Arc::new(sound));
        Ok(())
    }

    pub fn cancel(&self, id: u32) -> KaResult<()> {
        self.operations.cancel(id)
    }

    pub fn playing(&self, id: u32) -> bool {
        self.operations.playing(id)
    }

    /// Drain every outstanding playback and drop cached samples
    pub fn destroy(&self) {
        self.operations.destroy();
        if let Some(samples) = &self.samples {
            samples.clear();
        }
    }
}

/// Linear gain requested through `kanberra.volume`, `None` for unity
fn volume_gain(req: &PropList, ctx: &PropList) -> KaResult<Option<f32>> {
    let Some(value) = PropList::gets_either(props::VOLUME, req, ctx) else {
        return Ok(None);
    };
    let db = parse_volume_db(value)?;
    let gain = db_to_linear(db);
    Ok((gain != 1.0).then_some(gain))
}

/// Sink that accepts and discards everything
pub struct DiscardSink;

struct DiscardSession;

impl PlaybackSink for DiscardSink {
    fn open_session(&self, _format: &StreamFormat) -> KaResult<Box<dyn DeviceSession>> {
        Ok(Box::new(DiscardSession))
    }
}

impl DeviceSession for DiscardSession {
    fn wait_ready(&mut self, cancel: &Receiver<()>) -> KaResult<Readiness> {
        if cancel_requested(cancel) {
            Ok(Readiness::Canceled)
        } else {
            Ok(Readiness::Writable)
        }
    }

    fn write(&mut self, data: &[u8]) -> KaResult<Written> {
        Ok(Written::Bytes(data.len()))
    }

    fn recover(&mut self) -> KaResult<()> {
        Ok(())
    }

    fn drain(&mut self) -> KaResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_gain_lookup() {
        let none = PropList::new();
        assert_eq!(volume_gain(&none, &none), Ok(None));

        let unity = PropList::from_strs(&[(props::VOLUME, "0")]).unwrap();
        assert_eq!(volume_gain(&unity, &none), Ok(None));

        let ctx = PropList::from_strs(&[(props::VOLUME, "-20")]).unwrap();
        let gain = volume_gain(&none, &ctx).unwrap().unwrap();
        assert!((gain - 0.1).abs() < 1e-4);

        // The request wins over the context
        let req = PropList::from_strs(&[(props::VOLUME, "20")]).unwrap();
        let gain = volume_gain(&req, &ctx).unwrap().unwrap();
        assert!((gain - 10.0).abs() < 1e-3);

        let bad = PropList::from_strs(&[(props::VOLUME, "quiet")]).unwrap();
        assert_eq!(volume_gain(&bad, &ctx), Err(KaError::Invalid));
    }
}
