//! Ogg Vorbis source via `symphonia`
//!
//! Packets are decoded on demand into a small interleaved i16 buffer; only
//! one packet's worth of samples is held at a time.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{ChannelPosition, SampleType, SoundFile, MAX_SOUND_BYTES};
use crate::error::{KaError, KaResult};

/// Consecutive undecodable packets tolerated before giving up
const MAX_CONSECUTIVE_ERRORS: usize = 8;

pub struct VorbisSoundFile {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    rate: u32,
    channel_map: Vec<ChannelPosition>,
    size: u64,
    pending: Vec<i16>,
    cursor: usize,
    eof: bool,
}

fn map_symphonia_error(e: SymphoniaError) -> KaError {
    match e {
        SymphoniaError::IoError(io) => io.into(),
        SymphoniaError::LimitError(_) => KaError::TooBig,
        SymphoniaError::ResetRequired => KaError::NotSupported,
        // Unrecognized container, bad packets
        _ => KaError::Corrupt,
    }
}

const POSITIONS: [(Channels, ChannelPosition); 18] = [
    (Channels::FRONT_LEFT, ChannelPosition::FrontLeft),
    (Channels::FRONT_RIGHT, ChannelPosition::FrontRight),
    (Channels::FRONT_CENTRE, ChannelPosition::FrontCenter),
    (Channels::LFE1, ChannelPosition::Lfe),
    (Channels::REAR_LEFT, ChannelPosition::RearLeft),
    (Channels::REAR_RIGHT, ChannelPosition::RearRight),
    (Channels::REAR_CENTRE, ChannelPosition::RearCenter),
    (Channels::FRONT_LEFT_CENTRE, ChannelPosition::FrontLeftOfCenter),
    (Channels::FRONT_RIGHT_CENTRE, ChannelPosition::FrontRightOfCenter),
    (Channels::SIDE_LEFT, ChannelPosition::SideLeft),
    (Channels::SIDE_RIGHT, ChannelPosition::SideRight),
    (Channels::TOP_CENTRE, ChannelPosition::TopCenter),
    (Channels::TOP_FRONT_LEFT, ChannelPosition::TopFrontLeft),
    (Channels::TOP_FRONT_RIGHT, ChannelPosition::TopFrontRight),
    (Channels::TOP_FRONT_CENTRE, ChannelPosition::TopFrontCenter),
    (Channels::TOP_REAR_LEFT, ChannelPosition::TopRearLeft),
    (Channels::TOP_REAR_RIGHT, ChannelPosition::TopRearRight),
    (Channels::TOP_REAR_CENTRE, ChannelPosition::TopRearCenter),
];

fn channel_positions(channels: Channels) -> Vec<ChannelPosition> {
    if channels.count() == 1 {
        return vec![ChannelPosition::Mono];
    }

    channels
        .iter()
        .map(|ch| {
            POSITIONS
                .iter()
                .find(|(flag, _)| *flag == ch)
                .map(|(_, pos)| *pos)
                .unwrap_or(ChannelPosition::Mono)
        })
        .collect()
}

impl VorbisSoundFile {
    pub fn open(path: &Path) -> KaResult<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(map_symphonia_error)?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(KaError::Corrupt)?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let rate = params.sample_rate.filter(|r| *r > 0).ok_or(KaError::Corrupt)?;
        let layout = params.channels.ok_or(KaError::Corrupt)?;
        let channels = layout.count() as u16;
        if channels == 0 {
            return Err(KaError::Corrupt);
        }

        let size = params
            .n_frames
            .map(|frames| frames * channels as u64 * 2)
            .unwrap_or(0);
        if size > MAX_SOUND_BYTES {
            return Err(KaError::TooBig);
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(map_symphonia_error)?;

        log::debug!("Opened Ogg stream {:?}: {}ch @ {}Hz", path, channels, rate);

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            rate,
            channel_map: channel_positions(layout),
            size,
            pending: Vec::new(),
            cursor: 0,
            eof: false,
        })
    }

    /// Decode the next packet of our track into `pending`. Returns false at
    /// end of stream.
    fn refill(&mut self) -> KaResult<bool> {
        let mut errors = 0;

        while !self.eof {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    break;
                }
                // Chained streams are not followed
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    break;
                }
                Err(e) => return Err(map_symphonia_error(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
                    samples.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(samples.samples());
                    self.cursor = 0;
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    errors += 1;
                    log::warn!("Skipping undecodable Vorbis packet: {}", msg);
                    if errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(KaError::Corrupt);
                    }
                }
                Err(e) => return Err(map_symphonia_error(e)),
            }
        }

        Ok(false)
    }
}

impl SoundFile for VorbisSoundFile {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn sample_type(&self) -> SampleType {
        SampleType::S16Ne
    }

    fn channel_map(&self) -> &[ChannelPosition] {
        &self.channel_map
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, buf: &mut [u8]) -> KaResult<usize> {
        let frame = self.frame_size();
        let wanted = if buf.len() >= frame {
            (buf.len() / frame) * frame / 2
        } else {
            buf.len() / 2
        };

        let mut written = 0;
        while written / 2 < wanted {
            if self.cursor >= self.pending.len() && !self.refill()? {
                break;
            }
            let take = (wanted - written / 2).min(self.pending.len() - self.cursor);
            for s in &self.pending[self.cursor..self.cursor + take] {
                buf[written..written + 2].copy_from_slice(&s.to_ne_bytes());
                written += 2;
            }
            self.cursor += take;
        }
        Ok(written)
    }
}
