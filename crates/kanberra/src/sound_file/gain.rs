//! Software volume applied while a source is read

use super::{ChannelPosition, SampleType, SoundFile};
use crate::error::{KaError, KaResult};

/// Linear factor for a gain in decibels
pub fn db_to_linear(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

/// Parse a `kanberra.volume` value (a floating point dB figure)
pub fn parse_volume_db(value: &str) -> KaResult<f64> {
    match value.trim().parse::<f64>() {
        Ok(db) if !db.is_nan() => Ok(db),
        _ => Err(KaError::Invalid),
    }
}

/// Scales every sample of the wrapped source by a fixed factor
pub struct GainSoundFile {
    inner: Box<dyn SoundFile>,
    gain: f32,
}

impl GainSoundFile {
    pub fn new(inner: Box<dyn SoundFile>, gain: f32) -> Self {
        Self { inner, gain }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl SoundFile for GainSoundFile {
    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn rate(&self) -> u32 {
        self.inner.rate()
    }

    fn sample_type(&self) -> SampleType {
        self.inner.sample_type()
    }

    fn channel_map(&self) -> &[ChannelPosition] {
        self.inner.channel_map()
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read(&mut self, buf: &mut [u8]) -> KaResult<usize> {
        let n = self.inner.read(buf)?;
        scale_samples(&mut buf[..n], self.inner.sample_type(), self.gain);
        Ok(n)
    }
}

/// Multiply whole samples of `data` by `gain` in place, saturating
pub fn scale_samples(data: &mut [u8], sample_type: SampleType, gain: f32) {
    let scale16 = |s: i16| (s as f32 * gain).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;

    match sample_type {
        SampleType::S16Ne => {
            for s in data.chunks_exact_mut(2) {
                let v = scale16(i16::from_ne_bytes([s[0], s[1]]));
                s.copy_from_slice(&v.to_ne_bytes());
            }
        }
        SampleType::S16Re => {
            for s in data.chunks_exact_mut(2) {
                let v = scale16(i16::from_ne_bytes([s[0], s[1]]).swap_bytes());
                s.copy_from_slice(&v.swap_bytes().to_ne_bytes());
            }
        }
        SampleType::U8 => {
            for b in data.iter_mut() {
                let v = (*b as f32 - 128.0) * gain + 128.0;
                *b = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound_file::{DecodedSound, MemorySoundFile};
    use std::sync::Arc;

    #[test]
    fn test_db_conversion() {
        assert_eq!(db_to_linear(0.0), 1.0);
        assert!((db_to_linear(-6.0) - 0.501).abs() < 0.001);
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-4);
        assert_eq!(db_to_linear(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume_db("-6.0"), Ok(-6.0));
        assert_eq!(parse_volume_db(" 3 "), Ok(3.0));
        assert_eq!(parse_volume_db("loud"), Err(KaError::Invalid));
        assert_eq!(parse_volume_db("-6dB"), Err(KaError::Invalid));
        assert_eq!(parse_volume_db("NaN"), Err(KaError::Invalid));
    }

    #[test]
    fn test_scaling_per_sample_type() {
        let mut ne: Vec<u8> = [1000i16, -1000, i16::MAX].iter().flat_map(|s| s.to_ne_bytes()).collect();
        scale_samples(&mut ne, SampleType::S16Ne, 0.5);
        let got: Vec<i16> = ne.chunks_exact(2).map(|s| i16::from_ne_bytes([s[0], s[1]])).collect();
        assert_eq!(got, vec![500, -500, 16384]);

        let mut re: Vec<u8> = 1000i16.swap_bytes().to_ne_bytes().to_vec();
        scale_samples(&mut re, SampleType::S16Re, 0.5);
        assert_eq!(i16::from_ne_bytes([re[0], re[1]]).swap_bytes(), 500);

        let mut u8s = vec![0u8, 128, 255];
        scale_samples(&mut u8s, SampleType::U8, 0.5);
        assert_eq!(u8s, vec![64, 128, 192]);

        let mut loud: Vec<u8> = 30000i16.to_ne_bytes().to_vec();
        scale_samples(&mut loud, SampleType::S16Ne, 2.0);
        assert_eq!(i16::from_ne_bytes([loud[0], loud[1]]), i16::MAX);
    }

    #[test]
    fn test_wrapped_source_keeps_format() {
        let sound = Arc::new(DecodedSound {
            data: [400i16, 800].iter().flat_map(|s| s.to_ne_bytes()).collect(),
            ..DecodedSound::silent()
        });
        let mut file = GainSoundFile::new(Box::new(MemorySoundFile::new(sound)), 0.25);
        assert_eq!(file.channels(), 2);
        assert_eq!(file.sample_type(), SampleType::S16Ne);

        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf).unwrap(), 4);
        assert_eq!(i16::from_ne_bytes([buf[0], buf[1]]), 100);
        assert_eq!(i16::from_ne_bytes([buf[2], buf[3]]), 200);
    }
}
