//! Strategy interface between the generic worker loop and a device
//!
//! A backend provides a [`PlaybackSink`] that opens one [`DeviceSession`]
//! per playback. The worker owns the lifecycle; the session only knows how
//! to wait for its device, write one chunk, recover from an xrun and drain.

use crossbeam::channel::{Receiver, TryRecvError};

use crate::error::KaResult;
use crate::sound_file::{ChannelPosition, SampleType, SoundFile};

/// What woke a waiting worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Writable,
    Canceled,
}

/// Outcome of one device write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    /// Bytes accepted (possibly 0 when the device is momentarily full)
    Bytes(usize),
    /// Transient overrun/underrun: recover, then retry the same chunk
    Xrun,
}

/// Format of the stream a session is opened for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub rate: u32,
    pub sample_type: SampleType,
    pub channel_map: Vec<ChannelPosition>,
}

impl StreamFormat {
    pub fn of(file: &dyn SoundFile) -> Self {
        Self {
            channels: file.channels(),
            rate: file.rate(),
            sample_type: file.sample_type(),
            channel_map: file.channel_map().to_vec(),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.sample_type.bytes_per_sample()
    }
}

/// Opens device sessions. Shared by every playback of one driver.
pub trait PlaybackSink: Send + Sync + 'static {
    /// Called on the worker thread, so the session itself need not be `Send`
    fn open_session(&self, format: &StreamFormat) -> KaResult<Box<dyn DeviceSession>>;
}

/// One open playback stream on a device
pub trait DeviceSession {
    /// Block until the device can take data or `cancel` fires. Cancellation
    /// is signalled by a message or by the sender being dropped.
    fn wait_ready(&mut self, cancel: &Receiver<()>) -> KaResult<Readiness>;

    fn write(&mut self, data: &[u8]) -> KaResult<Written>;

    /// Device-specific recovery after [`Written::Xrun`]
    fn recover(&mut self) -> KaResult<()>;

    /// Block until everything written has been played
    fn drain(&mut self) -> KaResult<()>;
}

/// Non-blocking cancellation check for sessions that are always writable
pub fn cancel_requested(cancel: &Receiver<()>) -> bool {
    !matches!(cancel.try_recv(), Err(TryRecvError::Empty))
}
