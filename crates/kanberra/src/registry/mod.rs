//! Operation registry: one entry per in-flight playback
//!
//! Every playback runs on its own named worker thread. Each entry carries a
//! terminal-state cell that moves from `Pending` to exactly one of
//! `Canceled` or `Completed` under the registry lock; whichever transition
//! wins takes the finish callback, so the callback fires at most once
//! regardless of how worker completion, `cancel` and `destroy` interleave.
//!
//! Callbacks are taken under the lock and invoked after it is released.
//! A callback may therefore call `cancel` or `playing` on the same driver,
//! but it must not call `destroy` (that would wait on its own worker).

mod session;
mod worker;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::sync::WaitGroup;

use crate::error::{KaError, KaResult};
use crate::sound_file::SoundFile;

pub use session::{cancel_requested, DeviceSession, PlaybackSink, Readiness, StreamFormat, Written};
pub use worker::{stream_to_device, Exit, CHUNK_BYTES, MAX_RECOVERIES, MAX_STALLS};

/// Completion notification: `(event id, terminal result)`
pub type FinishCallback = Box<dyn FnOnce(u32, KaResult<()>) + Send + 'static>;

/// Terminal-state cell of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Canceled,
    Completed(KaResult<()>),
}

struct Operation {
    id: u32,
    state: OperationState,
    callback: Option<FinishCallback>,
    /// Dropped on cancellation, which wakes the worker
    cancel_tx: Option<Sender<()>>,
}

impl Operation {
    /// Pending -> Canceled. Returns the callback if this transition won.
    fn cancel(&mut self) -> Option<Option<FinishCallback>> {
        if self.state != OperationState::Pending {
            return None;
        }
        self.state = OperationState::Canceled;
        self.cancel_tx = None;
        Some(self.callback.take())
    }

    /// Pending -> Completed. Returns the callback if this transition won.
    fn complete(&mut self, result: KaResult<()>) -> Option<Option<FinishCallback>> {
        if self.state != OperationState::Pending {
            return None;
        }
        self.state = OperationState::Completed(result);
        self.cancel_tx = None;
        Some(self.callback.take())
    }
}

struct RegistryState {
    ops: BTreeMap<u64, Operation>,
    next_key: u64,
    closed: bool,
    workers: WaitGroup,
}

struct Shared {
    state: Mutex<RegistryState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panicking callback never runs under this lock, so the state is
        // consistent even if the mutex got poisoned.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Worker exit path: complete the entry (if still pending) and unregister
    fn finish(&self, key: u64, result: KaResult<()>) {
        let won = {
            let mut state = self.lock();
            match state.ops.remove(&key) {
                Some(mut op) => op.complete(result).map(|cb| (op.id, cb)),
                None => None,
            }
        };

        if let Some((id, Some(callback))) = won {
            callback(id, result);
        }
    }
}

/// Tracks in-flight playbacks of one driver
pub struct OperationRegistry {
    name: String,
    shared: Arc<Shared>,
}

impl OperationRegistry {
    /// `name` prefixes worker thread names
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState {
                    ops: BTreeMap::new(),
                    next_key: 0,
                    closed: false,
                    workers: WaitGroup::new(),
                }),
            }),
        }
    }

    /// Register a new operation and spawn its worker
    ///
    /// On success the callback (if any) fires exactly once, later, from the
    /// worker or from `cancel`/`destroy`. On error it never fires.
    pub fn start(
        &self,
        id: u32,
        source: Box<dyn SoundFile>,
        sink: Arc<dyn PlaybackSink>,
        callback: Option<FinishCallback>,
    ) -> KaResult<()> {
        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
        let (key, workers) = self.register(id, callback, cancel_tx)?;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-play-{}", self.name, id))
            .spawn(move || run_worker(shared, key, source, sink, cancel_rx, workers));

        if let Err(e) = spawned {
            log::error!("[{}] Failed to spawn playback worker: {}", self.name, e);
            return self.abandon(key);
        }

        log::debug!("[{}] Started playback id={}", self.name, id);
        Ok(())
    }

    fn register(
        &self,
        id: u32,
        callback: Option<FinishCallback>,
        cancel_tx: Sender<()>,
    ) -> KaResult<(u64, WaitGroup)> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(KaError::State);
        }
        let key = state.next_key;
        state.next_key += 1;
        state.ops.insert(
            key,
            Operation {
                id,
                state: OperationState::Pending,
                callback,
                cancel_tx: Some(cancel_tx),
            },
        );
        Ok((key, state.workers.clone()))
    }

    /// Drop an entry whose worker never started. If `cancel` or `destroy`
    /// already took the callback the request counts as accepted.
    fn abandon(&self, key: u64) -> KaResult<()> {
        let op = self.shared.lock().ops.remove(&key);
        match op {
            Some(op) if op.state == OperationState::Pending => Err(KaError::Oom),
            _ => Ok(()),
        }
    }

    /// Cancel every pending operation with `id`. Unknown ids are not an error.
    pub fn cancel(&self, id: u32) -> KaResult<()> {
        let won: Vec<_> = {
            let mut state = self.shared.lock();
            state
                .ops
                .values_mut()
                .filter(|op| op.id == id)
                .filter_map(|op| op.cancel())
                .collect()
        };

        if !won.is_empty() {
            log::debug!("[{}] Canceled {} playback(s) with id={}", self.name, won.len(), id);
        }
        for callback in won.into_iter().flatten() {
            callback(id, Err(KaError::Canceled));
        }
        Ok(())
    }

    /// Whether any pending operation carries `id`
    pub fn playing(&self, id: u32) -> bool {
        self.shared
            .lock()
            .ops
            .values()
            .any(|op| op.id == id && op.state == OperationState::Pending)
    }

    /// Number of registered operations whose worker has not exited yet
    pub fn len(&self) -> usize {
        self.shared.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel everything with `Destroyed`, then wait for every worker to
    /// exit. Further `start` calls fail with `State`.
    pub fn destroy(&self) {
        let (won, workers) = {
            let mut state = self.shared.lock();
            state.closed = true;
            let won: Vec<_> = state
                .ops
                .values_mut()
                .filter_map(|op| op.cancel().map(|cb| (op.id, cb)))
                .collect();
            (won, std::mem::replace(&mut state.workers, WaitGroup::new()))
        };

        log::debug!("[{}] Destroying, {} playback(s) pending", self.name, won.len());
        for (id, callback) in won {
            if let Some(callback) = callback {
                callback(id, Err(KaError::Destroyed));
            }
        }

        workers.wait();
    }
}

fn run_worker(
    shared: Arc<Shared>,
    key: u64,
    mut source: Box<dyn SoundFile>,
    sink: Arc<dyn PlaybackSink>,
    cancel: Receiver<()>,
    _workers: WaitGroup,
) {
    let result = match stream_to_device(sink.as_ref(), source.as_mut(), &cancel) {
        Ok(Exit::Finished) => Ok(()),
        Ok(Exit::Canceled) => Err(KaError::Canceled),
        Err(e) => {
            log::warn!("Playback failed: {}", e);
            Err(e)
        }
    };
    shared.finish(key, result);
    // `_workers` drops here, after any callback has returned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound_file::{DecodedSound, MemorySoundFile, SampleType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sink whose sessions accept `chunk` bytes per write, sleeping `delay`
    /// each time, after failing the first `xruns` writes
    struct TestSink {
        chunk: usize,
        delay: Duration,
        xruns: usize,
        block_forever: bool,
        fail_open: Option<KaError>,
        written: Arc<AtomicUsize>,
    }

    impl Default for TestSink {
        fn default() -> Self {
            Self {
                chunk: 64,
                delay: Duration::ZERO,
                xruns: 0,
                block_forever: false,
                fail_open: None,
                written: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct TestSession {
        chunk: usize,
        delay: Duration,
        xruns: usize,
        block_forever: bool,
        written: Arc<AtomicUsize>,
    }

    impl PlaybackSink for TestSink {
        fn open_session(&self, _format: &StreamFormat) -> KaResult<Box<dyn DeviceSession>> {
            if let Some(e) = self.fail_open {
                return Err(e);
            }
            Ok(Box::new(TestSession {
                chunk: self.chunk,
                delay: self.delay,
                xruns: self.xruns,
                block_forever: self.block_forever,
                written: Arc::clone(&self.written),
            }))
        }
    }

    impl DeviceSession for TestSession {
        fn wait_ready(&mut self, cancel: &Receiver<()>) -> KaResult<Readiness> {
            if self.block_forever {
                // Only cancellation ends the wait
                let _ = cancel.recv();
                return Ok(Readiness::Canceled);
            }
            if cancel_requested(cancel) {
                return Ok(Readiness::Canceled);
            }
            Ok(Readiness::Writable)
        }

        fn write(&mut self, data: &[u8]) -> KaResult<Written> {
            if self.xruns > 0 {
                self.xruns -= 1;
                return Ok(Written::Xrun);
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            let n = data.len().min(self.chunk);
            self.written.fetch_add(n, Ordering::SeqCst);
            Ok(Written::Bytes(n))
        }

        fn recover(&mut self) -> KaResult<()> {
            Ok(())
        }

        fn drain(&mut self) -> KaResult<()> {
            Ok(())
        }
    }

    /// Session that only takes whole frames, like a device ring
    struct FrameSink {
        frame: usize,
        written: Arc<AtomicUsize>,
    }

    struct FrameSession {
        frame: usize,
        written: Arc<AtomicUsize>,
    }

    impl PlaybackSink for FrameSink {
        fn open_session(&self, _format: &StreamFormat) -> KaResult<Box<dyn DeviceSession>> {
            Ok(Box::new(FrameSession {
                frame: self.frame,
                written: Arc::clone(&self.written),
            }))
        }
    }

    impl DeviceSession for FrameSession {
        fn wait_ready(&mut self, cancel: &Receiver<()>) -> KaResult<Readiness> {
            if cancel_requested(cancel) {
                return Ok(Readiness::Canceled);
            }
            Ok(Readiness::Writable)
        }

        fn write(&mut self, data: &[u8]) -> KaResult<Written> {
            let n = data.len() - data.len() % self.frame;
            self.written.fetch_add(n, Ordering::SeqCst);
            Ok(Written::Bytes(n))
        }

        fn recover(&mut self) -> KaResult<()> {
            Ok(())
        }

        fn drain(&mut self) -> KaResult<()> {
            Ok(())
        }
    }

    /// Hands out its bytes as-is, without rounding to frames
    struct RawSource {
        data: Vec<u8>,
        pos: usize,
    }

    impl SoundFile for RawSource {
        fn channels(&self) -> u16 {
            2
        }

        fn rate(&self) -> u32 {
            8000
        }

        fn sample_type(&self) -> SampleType {
            SampleType::S16Ne
        }

        fn channel_map(&self) -> &[crate::sound_file::ChannelPosition] {
            &[]
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn read(&mut self, buf: &mut [u8]) -> KaResult<usize> {
            let n = (self.data.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn source(bytes: usize) -> Box<dyn SoundFile> {
        let sound = DecodedSound {
            channels: 1,
            rate: 8000,
            sample_type: SampleType::S16Ne,
            channel_map: Vec::new(),
            data: vec![0u8; bytes],
        };
        Box::new(MemorySoundFile::new(Arc::new(sound)))
    }

    fn wait_idle(registry: &OperationRegistry) {
        for _ in 0..500 {
            if registry.is_empty() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("playback did not finish");
    }

    fn recording_callback(log: &Arc<Mutex<Vec<(u32, KaResult<()>)>>>) -> Option<FinishCallback> {
        let log = Arc::clone(log);
        Some(Box::new(move |id, result| log.lock().unwrap().push((id, result))))
    }

    #[test]
    fn test_completion_fires_callback_once() {
        let registry = OperationRegistry::new("test");
        let sink = Arc::new(TestSink::default());
        let written = Arc::clone(&sink.written);
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.start(7, source(1000), sink, recording_callback(&log)).unwrap();
        wait_idle(&registry);
        registry.destroy();

        assert_eq!(*log.lock().unwrap(), vec![(7, Ok(()))]);
        assert_eq!(written.load(Ordering::SeqCst), 1000);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_trailing_partial_frame_finishes() {
        let stereo = DecodedSound {
            channels: 2,
            rate: 8000,
            sample_type: SampleType::S16Ne,
            channel_map: Vec::new(),
            data: vec![1u8; 6],
        };
        let sources: Vec<Box<dyn SoundFile>> = vec![
            Box::new(MemorySoundFile::new(Arc::new(stereo))),
            Box::new(RawSource { data: vec![1u8; 10], pos: 0 }),
        ];

        for source in sources {
            let registry = OperationRegistry::new("test");
            let written = Arc::new(AtomicUsize::new(0));
            let sink = Arc::new(FrameSink { frame: 4, written: Arc::clone(&written) });
            let log = Arc::new(Mutex::new(Vec::new()));

            registry.start(1, source, sink, recording_callback(&log)).unwrap();
            wait_idle(&registry);
            registry.destroy();

            assert_eq!(*log.lock().unwrap(), vec![(1, Ok(()))]);
            assert_eq!(written.load(Ordering::SeqCst) % 4, 0);
            assert!(!registry.playing(1));
        }
    }

    #[test]
    fn test_device_that_never_accepts_fails_with_io() {
        let registry = OperationRegistry::new("test");
        let sink = Arc::new(TestSink { chunk: 0, ..Default::default() });
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.start(2, source(256), sink, recording_callback(&log)).unwrap();
        wait_idle(&registry);
        registry.destroy();

        assert_eq!(*log.lock().unwrap(), vec![(2, Err(KaError::Io))]);
    }

    #[test]
    fn test_abandoned_start_respects_earlier_cancel() {
        let registry = OperationRegistry::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));

        // Worker never spawned, nobody else touched the entry
        let (tx, _rx) = channel::bounded(1);
        let (key, _workers) = registry.register(1, recording_callback(&log), tx).unwrap();
        assert_eq!(registry.abandon(key), Err(KaError::Oom));
        assert!(log.lock().unwrap().is_empty());

        // A cancel slipped in before the spawn failure was noticed
        let (tx, _rx) = channel::bounded(1);
        let (key, _workers) = registry.register(2, recording_callback(&log), tx).unwrap();
        registry.cancel(2).unwrap();
        assert_eq!(registry.abandon(key), Ok(()));
        assert_eq!(*log.lock().unwrap(), vec![(2, Err(KaError::Canceled))]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_xruns_are_recovered() {
        let registry = OperationRegistry::new("test");
        let sink = Arc::new(TestSink { xruns: 3, ..Default::default() });
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.start(1, source(256), sink, recording_callback(&log)).unwrap();
        wait_idle(&registry);
        registry.destroy();

        assert_eq!(*log.lock().unwrap(), vec![(1, Ok(()))]);
    }

    #[test]
    fn test_persistent_xruns_fail_with_io() {
        let registry = OperationRegistry::new("test");
        let sink = Arc::new(TestSink { xruns: MAX_RECOVERIES + 1, ..Default::default() });
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.start(1, source(256), sink, recording_callback(&log)).unwrap();
        wait_idle(&registry);
        registry.destroy();

        assert_eq!(*log.lock().unwrap(), vec![(1, Err(KaError::Io))]);
    }

    #[test]
    fn test_session_open_failure_reaches_callback() {
        let registry = OperationRegistry::new("test");
        let sink = Arc::new(TestSink { fail_open: Some(KaError::NotAvailable), ..Default::default() });
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.start(3, source(256), sink, recording_callback(&log)).unwrap();
        wait_idle(&registry);
        registry.destroy();

        assert_eq!(*log.lock().unwrap(), vec![(3, Err(KaError::NotAvailable))]);
    }

    #[test]
    fn test_cancel_blocks_further_io() {
        let registry = OperationRegistry::new("test");
        let sink = Arc::new(TestSink { block_forever: true, ..Default::default() });
        let written = Arc::clone(&sink.written);
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.start(5, source(4096), sink, recording_callback(&log)).unwrap();
        assert!(registry.playing(5));
        assert!(!registry.playing(6));

        registry.cancel(5).unwrap();
        assert!(!registry.playing(5));
        assert_eq!(*log.lock().unwrap(), vec![(5, Err(KaError::Canceled))]);

        registry.destroy();
        assert_eq!(written.load(Ordering::SeqCst), 0);
        // Destroy found nothing pending, so no second callback
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_unknown_id_is_ok() {
        let registry = OperationRegistry::new("test");
        assert_eq!(registry.cancel(42), Ok(()));
    }

    #[test]
    fn test_destroy_drains_all_callbacks() {
        let registry = OperationRegistry::new("test");
        let sink: Arc<dyn PlaybackSink> = Arc::new(TestSink { block_forever: true, ..Default::default() });
        let log = Arc::new(Mutex::new(Vec::new()));

        for id in 0..5 {
            registry
                .start(id, source(512), Arc::clone(&sink), recording_callback(&log))
                .unwrap();
        }
        registry.destroy();

        let mut seen = log.lock().unwrap().clone();
        seen.sort_by_key(|(id, _)| *id);
        let expected: Vec<_> = (0..5).map(|id| (id, Err(KaError::Destroyed))).collect();
        assert_eq!(seen, expected);
        assert!(registry.is_empty());

        assert_eq!(
            registry.start(9, source(16), sink, None),
            Err(KaError::State)
        );
    }

    #[test]
    fn test_racing_cancels_fire_exactly_once() {
        for round in 0..50u64 {
            let registry = Arc::new(OperationRegistry::new("race"));
            let sink = Arc::new(TestSink {
                chunk: 32,
                delay: Duration::from_micros(50),
                ..Default::default()
            });
            let fired = Arc::new(AtomicUsize::new(0));
            let outcome = Arc::new(Mutex::new(None));

            let cb_fired = Arc::clone(&fired);
            let cb_outcome = Arc::clone(&outcome);
            registry
                .start(
                    1,
                    source(512),
                    sink,
                    Some(Box::new(move |_, result| {
                        cb_fired.fetch_add(1, Ordering::SeqCst);
                        *cb_outcome.lock().unwrap() = Some(result);
                    })),
                )
                .unwrap();

            let cancelers: Vec<_> = (0..4)
                .map(|n| {
                    let registry = Arc::clone(&registry);
                    thread::spawn(move || {
                        thread::sleep(Duration::from_micros((round * 37 + n * 113) % 900));
                        registry.cancel(1).unwrap();
                    })
                })
                .collect();
            for handle in cancelers {
                handle.join().unwrap();
            }
            registry.destroy();

            assert_eq!(fired.load(Ordering::SeqCst), 1, "round {}", round);
            let result = outcome.lock().unwrap().take().unwrap();
            assert!(
                result == Ok(()) || result == Err(KaError::Canceled),
                "round {}: {:?}",
                round,
                result
            );
        }
    }

    #[test]
    fn test_operation_state_transitions() {
        let mut op = Operation {
            id: 1,
            state: OperationState::Pending,
            callback: None,
            cancel_tx: None,
        };
        assert!(op.complete(Ok(())).is_some());
        assert_eq!(op.state, OperationState::Completed(Ok(())));
        assert!(op.cancel().is_none());
        assert!(op.complete(Err(KaError::Io)).is_none());
        assert_eq!(op.state, OperationState::Completed(Ok(())));
    }
}
