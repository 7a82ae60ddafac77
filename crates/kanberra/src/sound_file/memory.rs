//! Fully decoded sounds held in memory
//!
//! Used by the sample cache: a sound is decoded once into a shared
//! [`DecodedSound`] and every playback gets its own cheap
//! [`MemorySoundFile`] cursor over it.

use std::sync::Arc;

use super::{ChannelPosition, SampleType, SoundFile, MAX_SOUND_BYTES};
use crate::error::{KaError, KaResult};

/// Immutable decoded PCM plus its format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSound {
    pub channels: u16,
    pub rate: u32,
    pub sample_type: SampleType,
    pub channel_map: Vec<ChannelPosition>,
    pub data: Vec<u8>,
}

impl DecodedSound {
    /// Drain `file` completely
    pub fn decode(file: &mut dyn SoundFile) -> KaResult<Self> {
        let mut data = Vec::with_capacity(file.size().min(MAX_SOUND_BYTES) as usize);
        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            if (data.len() + n) as u64 > MAX_SOUND_BYTES {
                return Err(KaError::TooBig);
            }
            data.extend_from_slice(&chunk[..n]);
        }

        Ok(Self {
            channels: file.channels(),
            rate: file.rate(),
            sample_type: file.sample_type(),
            channel_map: file.channel_map().to_vec(),
            data,
        })
    }

    /// Zero-length stereo stream
    pub fn silent() -> Self {
        Self {
            channels: 2,
            rate: 44100,
            sample_type: SampleType::S16Ne,
            channel_map: vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight],
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Read cursor over a shared [`DecodedSound`]
pub struct MemorySoundFile {
    sound: Arc<DecodedSound>,
    pos: usize,
}

impl MemorySoundFile {
    pub fn new(sound: Arc<DecodedSound>) -> Self {
        Self { sound, pos: 0 }
    }
}

impl SoundFile for MemorySoundFile {
    fn channels(&self) -> u16 {
        self.sound.channels
    }

    fn rate(&self) -> u32 {
        self.sound.rate
    }

    fn sample_type(&self) -> SampleType {
        self.sound.sample_type
    }

    fn channel_map(&self) -> &[ChannelPosition] {
        &self.sound.channel_map
    }

    fn size(&self) -> u64 {
        self.sound.data.len() as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> KaResult<usize> {
        let frame = self.frame_size().max(1);
        let remaining = &self.sound.data[self.pos..];
        if remaining.len() < frame {
            // An incomplete last frame is never handed out
            self.pos = self.sound.data.len();
            return Ok(0);
        }
        let mut n = remaining.len().min(buf.len());
        if n >= frame {
            n -= n % frame;
        }
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}
