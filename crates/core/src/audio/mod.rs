use std::{fs::File, path::Path};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use crate::{BeatMapError, Result};

/// Decoded audio owned by a generation run.
///
/// Samples are stored down-mixed to mono since every analysis stage works on a
/// single channel. The original channel count is kept for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioTrack {
    /// Creates a mono track from raw samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(BeatMapError::InvalidInput("sample rate must be positive"));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels: 1,
        })
    }

    /// Creates a track from interleaved frames, averaging the channels.
    pub fn from_interleaved(interleaved: &[f32], channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(BeatMapError::InvalidInput("channel count must be positive"));
        }

        let width = channels as usize;
        let samples = interleaved
            .chunks_exact(width)
            .map(|frame| frame.iter().sum::<f32>() / width as f32)
            .collect();

        let mut track = Self::new(samples, sample_rate)?;
        track.channels = channels;
        Ok(track)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns a copy resampled to `target_rate` with linear interpolation.
    pub fn resampled(&self, target_rate: u32) -> Result<Self> {
        if target_rate == 0 {
            return Err(BeatMapError::InvalidInput("sample rate must be positive"));
        }
        if target_rate == self.sample_rate || self.samples.is_empty() {
            return Ok(Self {
                samples: self.samples.clone(),
                sample_rate: target_rate,
                channels: self.channels,
            });
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let out_len = ((self.samples.len() as f64) / ratio).floor() as usize;
        let last = self.samples.len() - 1;
        let samples = (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let left = (pos.floor() as usize).min(last);
                let right = (left + 1).min(last);
                let frac = (pos - left as f64) as f32;
                self.samples[left] * (1.0 - frac) + self.samples[right] * frac
            })
            .collect();

        debug!(
            from = self.sample_rate,
            to = target_rate,
            "resampled audio track"
        );

        Ok(Self {
            samples,
            sample_rate: target_rate,
            channels: self.channels,
        })
    }
}

/// Decodes an audio file into an [`AudioTrack`].
///
/// WAV goes through hound. Ogg Vorbis (including `.egg`), MP3 and FLAC go
/// through symphonia's format detection.
pub fn decode(path: &Path) -> Result<AudioTrack> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("wav") | Some("wave") => decode_wav(path),
        Some("ogg") | Some("egg") => decode_compressed(path, "ogg"),
        Some(ext @ ("mp3" | "flac")) => decode_compressed(path, ext),
        Some(other) => Err(BeatMapError::UnsupportedFormat(other.to_string())),
        None => Err(BeatMapError::UnsupportedFormat(format!(
            "{} has no file extension",
            path.display()
        ))),
    }
}

fn decode_error(path: &Path, err: impl std::fmt::Display) -> BeatMapError {
    BeatMapError::AudioDecode(format!("{}: {err}", path.display()))
}

fn decode_compressed(path: &Path, hint_extension: &str) -> Result<AudioTrack> {
    let source = File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(hint_extension);

    let detected = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_error(path, e))?;
    let mut format = detected.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error(path, "no decodable audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error(path, e))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(decode_error(path, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                channels.get_or_insert(spec.channels.count() as u16);

                let buf = buffer.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, spec)
                });
                if buf.capacity() < decoded.capacity() * spec.channels.count() {
                    *buf = SampleBuffer::new(decoded.capacity() as u64, spec);
                }
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            // Corrupt packets are dropped, the rest of the stream is kept.
            Err(SymphoniaError::DecodeError(_)) => skipped += 1,
            Err(e) => return Err(decode_error(path, e)),
        }
    }

    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped undecodable packets");
    }

    let sample_rate = sample_rate.ok_or_else(|| decode_error(path, "unknown sample rate"))?;
    let channels = channels.ok_or_else(|| decode_error(path, "unknown channel layout"))?;

    debug!(
        path = %path.display(),
        channels,
        sample_rate,
        frames = interleaved.len() / channels.max(1) as usize,
        "decoded compressed audio"
    );

    AudioTrack::from_interleaved(&interleaved, channels, sample_rate)
}

fn decode_wav(path: &Path) -> Result<AudioTrack> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| BeatMapError::AudioDecode(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| BeatMapError::AudioDecode(e.to_string()))?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(BeatMapError::AudioDecode(format!(
                    "unsupported bit depth {}",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| BeatMapError::AudioDecode(e.to_string()))?
        }
    };

    debug!(
        path = %path.display(),
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        "decoded wav"
    );

    AudioTrack::from_interleaved(&interleaved, spec.channels, spec.sample_rate)
}
