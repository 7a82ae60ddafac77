//! In-memory cache of decoded samples
//!
//! Backends that support `cache` decode a resolved sound once and keep it
//! here, keyed by event id (or file name). `permanent` entries stay until
//! removed; `volatile` entries share a bounded LRU.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

use crate::error::{KaError, KaResult};
use crate::proplist::{props, PropList};
use crate::sound_file::DecodedSound;

/// Volatile entries kept before the least recently used one is dropped
pub const DEFAULT_VOLATILE_CAPACITY: usize = 32;

/// Value of `kanberra.cache-control`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheControl {
    Never,
    Permanent,
    Volatile,
}

impl CacheControl {
    pub fn parse(value: &str) -> KaResult<Self> {
        match value {
            "never" => Ok(CacheControl::Never),
            "permanent" => Ok(CacheControl::Permanent),
            "volatile" => Ok(CacheControl::Volatile),
            _ => Err(KaError::Invalid),
        }
    }

    /// Read from the request, then the context, else `default`
    pub fn from_props(req: &PropList, ctx: &PropList, default: CacheControl) -> KaResult<Self> {
        match PropList::gets_either(props::CACHE_CONTROL, req, ctx) {
            Some(value) => Self::parse(value),
            None => Ok(default),
        }
    }
}

/// Key a request's sample is stored under: `event.id`, else `media.filename`
pub fn sample_key(req: &PropList, ctx: &PropList) -> Option<String> {
    PropList::gets_either(props::EVENT_ID, req, ctx)
        .or_else(|| PropList::gets_either(props::MEDIA_FILENAME, req, ctx))
        .map(str::to_string)
}

struct Samples {
    permanent: HashMap<String, Arc<DecodedSound>>,
    volatile: LruCache<String, Arc<DecodedSound>>,
}

pub struct SampleCache {
    samples: Mutex<Samples>,
}

impl Default for SampleCache {
    fn default() -> Self {
        Self::new(DEFAULT_VOLATILE_CAPACITY)
    }
}

impl SampleCache {
    pub fn new(volatile_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(volatile_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            samples: Mutex::new(Samples {
                permanent: HashMap::new(),
                volatile: LruCache::new(capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Samples> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Arc<DecodedSound>> {
        let mut samples = self.lock();
        if let Some(sound) = samples.permanent.get(key) {
            return Some(Arc::clone(sound));
        }
        samples.volatile.get(key).cloned()
    }

    /// Store `sound` according to `control`; `Never` stores nothing
    pub fn insert(&self, key: &str, control: CacheControl, sound: Arc<DecodedSound>) {
        let mut samples = self.lock();
        match control {
            CacheControl::Never => {}
            CacheControl::Permanent => {
                samples.volatile.pop(key);
                samples.permanent.insert(key.to_string(), sound);
            }
            CacheControl::Volatile => {
                if !samples.permanent.contains_key(key) {
                    samples.volatile.put(key.to_string(), sound);
                }
            }
        }
        log::debug!("[SAMPLES] Cached {} ({:?})", key, control);
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut samples = self.lock();
        let permanent = samples.permanent.remove(key).is_some();
        let volatile = samples.volatile.pop(key).is_some();
        permanent || volatile
    }

    pub fn clear(&self) {
        let mut samples = self.lock();
        samples.permanent.clear();
        samples.volatile.clear();
    }

    pub fn len(&self) -> usize {
        let samples = self.lock();
        samples.permanent.len() + samples.volatile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
