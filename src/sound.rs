// src/sound.rs

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::decode::{DecodeCapability, DecodeOptions, Decoded, DecoderList};
use crate::source::DecodeSource;

/// Decoded PCM, interleaved, normalised to `[-1, 1]`.
/// Loaded once and handed to the audio backend, which owns playback.
#[derive(Clone, PartialEq)]
pub struct RawAudio {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: usize,
}

impl AudioInfo {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }
}

impl RawAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration(&self) -> Duration {
        self.info().duration()
    }
}

impl Decoded for RawAudio {
    type Info = AudioInfo;

    fn info(&self) -> AudioInfo {
        AudioInfo {
            channels: self.channels,
            sample_rate: self.sample_rate,
            frames: self.frames(),
        }
    }
}

// Don't print every sample.
impl fmt::Debug for RawAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAudio")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

// ---------- WAV ----------

/// RIFF/WAVE via `hound`. Integer samples are scaled by their bit depth.
#[derive(Debug, Default)]
pub struct WavDecoder;

impl DecodeCapability<RawAudio> for WavDecoder {
    fn name(&self) -> &str {
        "wav"
    }

    fn decode(&self, source: &mut DecodeSource, _options: &DecodeOptions) -> anyhow::Result<RawAudio> {
        let mut reader = hound::WavReader::new(source)?;
        let spec = reader.spec();

        let samples: Result<Vec<f32>, _> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect(),
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|s| s as f32 / max_value))
                    .collect()
            }
        };
        let samples = samples.map_err(|e| anyhow!("failed to read WAV samples: {}", e))?;

        Ok(RawAudio {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            samples,
        })
    }
}

// ---------- Symphonia ----------

/// Everything symphonia can probe (OGG/Vorbis, FLAC, MP3, ...).
#[derive(Debug, Default)]
pub struct SymphoniaDecoder {
    extension: Option<String>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes with a file-extension hint first.
    pub fn with_extension(extension: &str) -> Self {
        Self {
            extension: Some(extension.to_ascii_lowercase()),
        }
    }
}

impl DecodeCapability<RawAudio> for SymphoniaDecoder {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn decode(&self, source: &mut DecodeSource, _options: &DecodeOptions) -> anyhow::Result<RawAudio> {
        let bytes = source.read_remaining()?;
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = &self.extension {
            hint.with_extension(ext);
        }
        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;
        let mut format_reader = probed.format;

        let track = format_reader
            .default_track()
            .ok_or_else(|| anyhow!("no default audio track"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("unknown sample rate"))?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| anyhow!("unknown channel count"))?;

        let dec_opts: DecoderOptions = Default::default();
        let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &dec_opts)?;

        let mut samples = Vec::<f32>::new();
        loop {
            match format_reader.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != track_id {
                        continue;
                    }
                    match decoder.decode(&packet) {
                        Ok(decoded) => {
                            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                            buf.copy_interleaved_ref(decoded);
                            samples.extend_from_slice(buf.samples());
                        }
                        // A corrupt packet is skipped, not fatal.
                        Err(symphonia::core::errors::Error::DecodeError(e)) => {
                            log::debug!("skipping undecodable packet: {}", e);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                // End of stream.
                Err(symphonia::core::errors::Error::IoError(_)) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(RawAudio {
            channels: channels.count() as u16,
            sample_rate,
            samples,
        })
    }
}

/// WAV first (cheap header check), then symphonia's probe.
pub fn default_audio_decoders() -> DecoderList<RawAudio> {
    vec![Arc::new(WavDecoder), Arc::new(SymphoniaDecoder::new())]
}
