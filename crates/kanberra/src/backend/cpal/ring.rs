//! Sample ring between a playback worker and the cpal callback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{KaError, KaResult};
use crate::registry::{StreamFormat, Written};
use crate::sound_file::{samples_i16, SampleType};

/// State shared with the cpal callback
#[derive(Default)]
pub(super) struct StreamFlags {
    pub started: AtomicBool,
    pub draining: AtomicBool,
    pub underrun: AtomicBool,
    pub failed: AtomicBool,
}

/// Worker side: converts PCM frames to the device layout and pushes them
pub(super) struct RingWriter {
    producer: rtrb::Producer<f32>,
    flags: Arc<StreamFlags>,
    in_channels: usize,
    out_channels: usize,
    frame_size: usize,
    sample_type: SampleType,
}

impl RingWriter {
    pub fn new(producer: rtrb::Producer<f32>, flags: Arc<StreamFlags>, format: &StreamFormat, out_channels: usize) -> Self {
        Self {
            producer,
            flags,
            in_channels: format.channels as usize,
            out_channels,
            frame_size: format.frame_size(),
            sample_type: format.sample_type,
        }
    }

    /// Room for at least one output frame
    pub fn writable(&self) -> bool {
        self.producer.slots() >= self.out_channels
    }

    pub fn is_empty(&self) -> bool {
        self.producer.slots() == self.producer.buffer().capacity()
    }

    /// Push as many whole frames of `data` as fit. A pending underrun is
    /// reported instead of writing.
    pub fn write(&mut self, data: &[u8]) -> KaResult<Written> {
        if self.flags.underrun.swap(false, Ordering::Relaxed) {
            return Ok(Written::Xrun);
        }

        let frames = (data.len() / self.frame_size).min(self.producer.slots() / self.out_channels);
        let bytes = frames * self.frame_size;

        let samples: Vec<i16> = samples_i16(&data[..bytes], self.sample_type).collect();
        let mut out = vec![0.0f32; self.out_channels];
        for frame in samples.chunks_exact(self.in_channels) {
            to_output_frame(frame, &mut out);
            for v in &out {
                if self.producer.push(*v).is_err() {
                    return Err(KaError::Internal);
                }
            }
        }

        if bytes > 0 {
            self.flags.started.store(true, Ordering::Relaxed);
        }
        Ok(Written::Bytes(bytes))
    }

    pub fn recover(&self) {
        self.flags.underrun.store(false, Ordering::Relaxed);
    }
}

/// Callback side: fill `data` from the ring, padding with silence. Running
/// dry after the first write and before draining is an underrun.
pub(super) fn fill_output(consumer: &mut rtrb::Consumer<f32>, data: &mut [f32], flags: &StreamFlags) {
    let mut starved = false;
    for sample in data.iter_mut() {
        *sample = match consumer.pop() {
            Ok(v) => v,
            Err(_) => {
                starved = true;
                0.0
            }
        };
    }
    if starved && flags.started.load(Ordering::Relaxed) && !flags.draining.load(Ordering::Relaxed) {
        flags.underrun.store(true, Ordering::Relaxed);
    }
}

/// Map one source frame onto the device's channel layout: mono is copied to
/// every channel, stereo fills the first two (or is averaged down to mono)
pub(super) fn to_output_frame(src: &[i16], out: &mut [f32]) {
    let scale = 1.0 / 32768.0;
    match (src.len(), out.len()) {
        (1, _) => out.fill(src[0] as f32 * scale),
        (_, 1) => out[0] = (src[0] as f32 + src[1] as f32) * 0.5 * scale,
        _ => {
            out.fill(0.0);
            out[0] = src[0] as f32 * scale;
            out[1] = src[1] as f32 * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound_file::ChannelPosition;

    fn stereo() -> StreamFormat {
        StreamFormat {
            channels: 2,
            rate: 8000,
            sample_type: SampleType::S16Ne,
            channel_map: vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight],
        }
    }

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn ring(capacity: usize, out_channels: usize) -> (RingWriter, rtrb::Consumer<f32>, Arc<StreamFlags>) {
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);
        let flags = Arc::new(StreamFlags::default());
        let writer = RingWriter::new(producer, Arc::clone(&flags), &stereo(), out_channels);
        (writer, consumer, flags)
    }

    #[test]
    fn test_full_ring_takes_partial_writes() {
        // Room for three stereo frames
        let (mut writer, mut consumer, _flags) = ring(6, 2);
        let data = pcm(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

        assert_eq!(writer.write(&data).unwrap(), Written::Bytes(12));
        assert!(!writer.writable());
        assert_eq!(writer.write(&data[12..]).unwrap(), Written::Bytes(0));

        let mut out = [0.0f32; 2];
        fill_output(&mut consumer, &mut out, &StreamFlags::default());
        assert_eq!(out, [1.0 / 32768.0, 2.0 / 32768.0]);
        assert!(writer.writable());
        assert_eq!(writer.write(&data[12..]).unwrap(), Written::Bytes(4));
    }

    #[test]
    fn test_incomplete_frame_is_not_written() {
        let (mut writer, _consumer, flags) = ring(64, 2);
        assert_eq!(writer.write(&pcm(&[1])).unwrap(), Written::Bytes(0));
        assert!(writer.is_empty());
        assert!(!flags.started.load(Ordering::Relaxed));
    }

    #[test]
    fn test_underrun_reports_xrun_once() {
        let (mut writer, mut consumer, flags) = ring(64, 2);
        let data = pcm(&[100, 200]);

        // Starving before the first write is just startup latency
        let mut out = [0.0f32; 8];
        fill_output(&mut consumer, &mut out, &flags);
        assert!(!flags.underrun.load(Ordering::Relaxed));

        assert_eq!(writer.write(&data).unwrap(), Written::Bytes(4));
        fill_output(&mut consumer, &mut out, &flags);
        assert!(flags.underrun.load(Ordering::Relaxed));

        assert_eq!(writer.write(&data).unwrap(), Written::Xrun);
        writer.recover();
        assert_eq!(writer.write(&data).unwrap(), Written::Bytes(4));
    }

    #[test]
    fn test_no_underrun_while_draining() {
        let (mut writer, mut consumer, flags) = ring(64, 2);
        writer.write(&pcm(&[1, 2])).unwrap();
        flags.draining.store(true, Ordering::Relaxed);

        let mut out = [0.0f32; 8];
        fill_output(&mut consumer, &mut out, &flags);
        assert!(!flags.underrun.load(Ordering::Relaxed));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_stereo_source_on_mono_device() {
        let (mut writer, mut consumer, _flags) = ring(8, 1);
        assert_eq!(writer.write(&pcm(&[16384, 0, 0, -16384])).unwrap(), Written::Bytes(8));

        let mut out = [0.0f32; 2];
        fill_output(&mut consumer, &mut out, &StreamFlags::default());
        assert_eq!(out, [0.25, -0.25]);
    }

    #[test]
    fn test_mono_fills_every_channel() {
        let mut out = [0.0f32; 4];
        to_output_frame(&[16384], &mut out);
        assert_eq!(out, [0.5; 4]);
    }

    #[test]
    fn test_stereo_maps_front_pair() {
        let mut out = [1.0f32; 3];
        to_output_frame(&[16384, -16384], &mut out);
        assert_eq!(out, [0.5, -0.5, 0.0]);

        let mut mono = [0.0f32; 1];
        to_output_frame(&[16384, 0], &mut mono);
        assert_eq!(mono, [0.25]);
    }
}
