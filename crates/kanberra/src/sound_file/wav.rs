//! RIFF WAVE source (8-bit and 16-bit integer PCM) via `hound`

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{wave_channel_map, ChannelPosition, SampleType, SoundFile, MAX_SOUND_BYTES};
use crate::error::{KaError, KaResult};

pub struct WavSoundFile {
    reader: hound::WavReader<BufReader<File>>,
    sample_type: SampleType,
    channel_map: Vec<ChannelPosition>,
    size: u64,
}

pub(crate) fn map_hound_error(e: hound::Error) -> KaError {
    match e {
        hound::Error::IoError(io) => io.into(),
        hound::Error::FormatError(_) => KaError::Corrupt,
        _ => KaError::NotSupported,
    }
}

impl WavSoundFile {
    pub fn open(path: &Path) -> KaResult<Self> {
        let reader = hound::WavReader::open(path).map_err(map_hound_error)?;
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int {
            return Err(KaError::NotSupported);
        }
        let sample_type = match spec.bits_per_sample {
            16 => SampleType::S16Ne,
            8 => SampleType::U8,
            _ => return Err(KaError::NotSupported),
        };
        if spec.sample_rate == 0 {
            return Err(KaError::Corrupt);
        }
        let channel_map = wave_channel_map(spec.channels)?;

        let size = reader.len() as u64 * sample_type.bytes_per_sample() as u64;
        if size > MAX_SOUND_BYTES {
            return Err(KaError::TooBig);
        }

        Ok(Self {
            reader,
            sample_type,
            channel_map,
            size,
        })
    }
}

impl SoundFile for WavSoundFile {
    fn channels(&self) -> u16 {
        self.reader.spec().channels
    }

    fn rate(&self) -> u32 {
        self.reader.spec().sample_rate
    }

    fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    fn channel_map(&self) -> &[ChannelPosition] {
        &self.channel_map
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, buf: &mut [u8]) -> KaResult<usize> {
        let bps = self.sample_type.bytes_per_sample();
        let frame = self.frame_size();
        let wanted = if buf.len() >= frame {
            (buf.len() / frame) * frame / bps
        } else {
            buf.len() / bps
        };

        let mut written = 0;
        match self.sample_type {
            SampleType::S16Ne | SampleType::S16Re => {
                for sample in self.reader.samples::<i16>().take(wanted) {
                    let s = sample.map_err(map_hound_error)?;
                    buf[written..written + 2].copy_from_slice(&s.to_ne_bytes());
                    written += 2;
                }
            }
            SampleType::U8 => {
                // hound hands out 8-bit PCM re-centered around zero
                for sample in self.reader.samples::<i8>().take(wanted) {
                    let s = sample.map_err(map_hound_error)?;
                    buf[written] = (s as i16 + 128) as u8;
                    written += 1;
                }
            }
        }
        if buf.len() >= frame {
            // Data chunk ended mid-frame
            written -= written % frame;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eight_bit_is_unsigned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u8.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [-128i8, 0, 127] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut file = WavSoundFile::open(&path).unwrap();
        assert_eq!(file.sample_type(), SampleType::U8);
        assert_eq!(file.channel_map(), &[ChannelPosition::Mono]);
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0, 128, 255]);
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_float_wav_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f32.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        assert_eq!(WavSoundFile::open(&path).err(), Some(KaError::NotSupported));
    }

    #[test]
    fn test_short_buffer_stays_frame_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("st.wav");
        super::super::test_util::write_wav(&path, 2, 8000, 10);

        let mut file = WavSoundFile::open(&path).unwrap();
        let mut buf = [0u8; 7];
        // 7 bytes hold one 4-byte stereo frame
        assert_eq!(file.read(&mut buf).unwrap(), 4);
    }
}
