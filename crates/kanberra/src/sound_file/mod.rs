//! Pull-based decoded audio sources
//!
//! Drivers never parse containers themselves. They open a [`SoundFile`] for a
//! resolved path and pull interleaved PCM bytes from it until `read` returns
//! 0. Two on-disk formats are understood: RIFF WAVE (8/16-bit PCM) and Ogg
//! Vorbis, tried in that order.

mod gain;
mod memory;
mod vorbis;
mod wav;

use std::path::Path;

use crate::error::{KaError, KaResult};

pub use gain::{db_to_linear, parse_volume_db, scale_samples, GainSoundFile};
pub use memory::{DecodedSound, MemorySoundFile};
pub(crate) use wav::map_hound_error;

/// Largest decoded stream accepted, in bytes
pub const MAX_SOUND_BYTES: u64 = 64 * 1024 * 1024;

/// Sample encoding of the bytes returned by [`SoundFile::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// Signed 16-bit, native endian
    S16Ne,
    /// Signed 16-bit, reverse (non-native) endian
    S16Re,
    /// Unsigned 8-bit
    U8,
}

impl SampleType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::S16Ne | SampleType::S16Re => 2,
            SampleType::U8 => 1,
        }
    }
}

/// Speaker position of one interleaved channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPosition {
    Mono,
    FrontLeft,
    FrontRight,
    FrontCenter,
    RearLeft,
    RearRight,
    RearCenter,
    Lfe,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    SideLeft,
    SideRight,
    TopCenter,
    TopFrontLeft,
    TopFrontRight,
    TopFrontCenter,
    TopRearLeft,
    TopRearRight,
    TopRearCenter,
}

/// A decoded audio stream
pub trait SoundFile: Send {
    fn channels(&self) -> u16;

    fn rate(&self) -> u32;

    fn sample_type(&self) -> SampleType;

    /// One position per channel, in interleaving order
    fn channel_map(&self) -> &[ChannelPosition];

    /// Total decoded size in bytes, 0 when unknown
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes of interleaved PCM. Returns 0 at end of
    /// stream. Reads always end on a frame boundary when `buf` holds at
    /// least one frame.
    fn read(&mut self, buf: &mut [u8]) -> KaResult<usize>;

    fn frame_size(&self) -> usize {
        self.channels() as usize * self.sample_type().bytes_per_sample()
    }
}

/// Open a sound file, trying WAV first and Ogg Vorbis second
pub fn open_sound_file(path: &Path) -> KaResult<Box<dyn SoundFile>> {
    // Surface NOTFOUND/ACCESS from the filesystem before any format probing
    std::fs::metadata(path)?;

    match wav::WavSoundFile::open(path) {
        Ok(w) => return Ok(Box::new(w)),
        Err(KaError::Corrupt) => {}
        Err(e) => return Err(e),
    }

    log::debug!("{:?} is not a WAVE file, trying Ogg Vorbis", path);
    let v = vorbis::VorbisSoundFile::open(path)?;
    Ok(Box::new(v))
}

/// Interpret whole samples of `data` as signed 16-bit values. A trailing
/// partial sample is ignored.
pub fn samples_i16(data: &[u8], sample_type: SampleType) -> impl Iterator<Item = i16> + '_ {
    let width = sample_type.bytes_per_sample();
    data.chunks_exact(width).map(move |s| match sample_type {
        SampleType::S16Ne => i16::from_ne_bytes([s[0], s[1]]),
        SampleType::S16Re => i16::from_ne_bytes([s[1], s[0]]),
        SampleType::U8 => ((s[0] as i16) - 128) << 8,
    })
}

/// Default channel layout for a channel count, in RIFF WAVE mask order
pub(crate) fn wave_channel_map(channels: u16) -> KaResult<Vec<ChannelPosition>> {
    use ChannelPosition::*;

    const WAVE_ORDER: [ChannelPosition; 18] = [
        FrontLeft,
        FrontRight,
        FrontCenter,
        Lfe,
        RearLeft,
        RearRight,
        FrontLeftOfCenter,
        FrontRightOfCenter,
        RearCenter,
        SideLeft,
        SideRight,
        TopCenter,
        TopFrontLeft,
        TopFrontCenter,
        TopFrontRight,
        TopRearLeft,
        TopRearCenter,
        TopRearRight,
    ];

    match channels {
        0 => Err(KaError::Corrupt),
        1 => Ok(vec![Mono]),
        n if (n as usize) <= WAVE_ORDER.len() => Ok(WAVE_ORDER[..n as usize].to_vec()),
        _ => Err(KaError::NotSupported),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_i16_conversions() {
        let ne = 1000i16.to_ne_bytes();
        assert_eq!(samples_i16(&ne, SampleType::S16Ne).collect::<Vec<_>>(), vec![1000]);
        let re = [ne[1], ne[0], 0xff];
        assert_eq!(samples_i16(&re, SampleType::S16Re).collect::<Vec<_>>(), vec![1000]);
        assert_eq!(
            samples_i16(&[0, 128, 255], SampleType::U8).collect::<Vec<_>>(),
            vec![-32768, 0, 127 << 8]
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = open_sound_file(Path::new("/nonexistent/bell.oga")).err();
        assert_eq!(err, Some(KaError::NotFound));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"definitely not audio data, just text").unwrap();
        let err = open_sound_file(&path).err();
        assert_eq!(err, Some(KaError::Corrupt));
    }

    #[test]
    fn test_open_wav_reports_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        test_util::write_wav(&path, 2, 22050, 100);

        let mut file = open_sound_file(&path).unwrap();
        assert_eq!(file.channels(), 2);
        assert_eq!(file.rate(), 22050);
        assert_eq!(file.sample_type(), SampleType::S16Ne);
        assert_eq!(file.frame_size(), 4);
        assert_eq!(file.size(), 400);
        assert_eq!(
            file.channel_map(),
            &[ChannelPosition::FrontLeft, ChannelPosition::FrontRight]
        );

        let mut buf = vec![0u8; 1024];
        let mut total = 0;
        loop {
            let n = file.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert_eq!(n % 4, 0);
            total += n;
        }
        assert_eq!(total, 400);
    }

    #[test]
    fn test_wave_channel_map() {
        assert_eq!(wave_channel_map(1).unwrap(), vec![ChannelPosition::Mono]);
        assert_eq!(wave_channel_map(6).unwrap().len(), 6);
        assert_eq!(wave_channel_map(0), Err(KaError::Corrupt));
        assert_eq!(wave_channel_map(40), Err(KaError::NotSupported));
    }
}
