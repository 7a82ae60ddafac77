//! Per-operation worker loop

use crossbeam::channel::Receiver;

use super::session::{PlaybackSink, Readiness, StreamFormat, Written};
use crate::error::{KaError, KaResult};
use crate::sound_file::SoundFile;

/// Bytes pulled from the source per write, rounded down to whole frames
pub const CHUNK_BYTES: usize = 16 * 1024;

/// Consecutive xruns tolerated on a single chunk before giving up
pub const MAX_RECOVERIES: usize = 16;

/// Consecutive zero-byte writes tolerated after the device reported itself
/// writable
pub const MAX_STALLS: usize = 64;

/// How a stream ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Finished,
    Canceled,
}

/// Stream `source` into a fresh session of `sink` until end of stream or
/// cancellation. On cancellation no further device I/O happens.
pub fn stream_to_device(
    sink: &dyn PlaybackSink,
    source: &mut dyn SoundFile,
    cancel: &Receiver<()>,
) -> KaResult<Exit> {
    let format = StreamFormat::of(source);
    let frame = format.frame_size();
    if frame == 0 {
        return Err(KaError::Corrupt);
    }

    let mut session = sink.open_session(&format)?;

    let mut buf = vec![0u8; (CHUNK_BYTES / frame).max(1) * frame];
    let mut start = 0;
    let mut end = 0;
    let mut recoveries = 0;
    let mut stalls = 0;

    loop {
        if session.wait_ready(cancel)? == Readiness::Canceled {
            return Ok(Exit::Canceled);
        }

        if start == end {
            let read = source.read(&mut buf)?;
            start = 0;
            end = read - read % frame;
            if end != read {
                log::debug!("Dropping {} trailing bytes of an incomplete frame", read - end);
            }
            if end == 0 {
                session.drain()?;
                return Ok(Exit::Finished);
            }
        }

        match session.write(&buf[start..end])? {
            Written::Bytes(0) => {
                stalls += 1;
                if stalls > MAX_STALLS {
                    log::warn!("Device accepted nothing for {} writes", MAX_STALLS);
                    return Err(KaError::Io);
                }
            }
            Written::Bytes(n) => {
                start += n.min(end - start);
                recoveries = 0;
                stalls = 0;
            }
            Written::Xrun => {
                recoveries += 1;
                if recoveries > MAX_RECOVERIES {
                    log::warn!("Device keeps failing after {} recoveries", MAX_RECOVERIES);
                    return Err(KaError::Io);
                }
                log::debug!("Device xrun, recovering ({}/{})", recoveries, MAX_RECOVERIES);
                session.recover()?;
            }
        }
    }
}
