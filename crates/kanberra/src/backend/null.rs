//! `null` backend: accepts every request and plays nothing
//!
//! Requests are never resolved, so unlike the other backends this one has
//! no [`Playback`](super::Playback) and no sample cache. Each accepted play
//! runs through an operation registry with an empty stream, so callbacks,
//! `cancel` and `playing` behave like on a real device.

use std::sync::Arc;

use super::DiscardSink;
use crate::driver::{Driver, DriverSetup, FinishCallback};
use crate::error::{KaError, KaResult};
use crate::proplist::PropList;
use crate::registry::{OperationRegistry, PlaybackSink};
use crate::sound_file::{DecodedSound, MemorySoundFile};

pub const NAME: &str = "null";

pub struct NullDriver {
    operations: OperationRegistry,
    sink: Arc<dyn PlaybackSink>,
    silence: Arc<DecodedSound>,
}

pub fn open(_setup: &DriverSetup<'_>) -> KaResult<Box<dyn Driver>> {
    Ok(Box::new(NullDriver {
        operations: OperationRegistry::new(NAME),
        sink: Arc::new(DiscardSink),
        silence: Arc::new(DecodedSound::silent()),
    }))
}

impl Driver for NullDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn destroy(&self) -> KaResult<()> {
        self.operations.destroy();
        Ok(())
    }

    fn change_device(&self, _device: Option<&str>) -> KaResult<()> {
        Ok(())
    }

    fn change_props(&self, _changed: &PropList, _merged: &PropList) -> KaResult<()> {
        Ok(())
    }

    fn play(
        &self,
        id: u32,
        _req: &PropList,
        _ctx: &PropList,
        callback: Option<FinishCallback>,
    ) -> KaResult<()> {
        let source = Box::new(MemorySoundFile::new(Arc::clone(&self.silence)));
        self.operations.start(id, source, Arc::clone(&self.sink), callback)
    }

    fn cancel(&self, id: u32) -> KaResult<()> {
        self.operations.cancel(id)
    }

    fn cache(&self, _req: &PropList, _ctx: &PropList) -> KaResult<()> {
        Err(KaError::NotSupported)
    }

    fn playing(&self, id: u32) -> KaResult<bool> {
        Ok(self.operations.playing(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchPaths;
    use crate::driver::DriverRegistry;
    use crate::proplist::props;
    use crate::theme::ThemeResolver;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_play_completes_successfully() {
        let registry = DriverRegistry::builtin();
        let props = PropList::new();
        let setup = DriverSetup {
            driver: Some(NAME),
            device: None,
            props: &props,
            resolver: Arc::new(ThemeResolver::new(SearchPaths::new(None, Vec::new()))),
            registry: &registry,
        };
        let driver = registry.open(&setup).unwrap();

        let (tx, rx) = mpsc::channel();
        driver
            .play(
                11,
                &PropList::new(),
                &PropList::new(),
                Some(Box::new(move |id, result| tx.send((id, result)).unwrap())),
            )
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (11, Ok(())));

        // Nothing is looked up, so a sound that exists nowhere still plays
        let (tx, rx) = mpsc::channel();
        let req = PropList::from_strs(&[(props::EVENT_ID, "no-such-sound")]).unwrap();
        driver
            .play(12, &req, &PropList::new(), Some(Box::new(move |id, result| tx.send((id, result)).unwrap())))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (12, Ok(())));

        assert_eq!(driver.cache(&PropList::new(), &PropList::new()), Err(KaError::NotSupported));
        driver.destroy().unwrap();
        assert_eq!(driver.playing(11), Ok(false));
    }
}
