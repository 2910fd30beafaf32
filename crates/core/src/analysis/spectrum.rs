use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{BeatMapError, Result};

/// Floor applied to power values before taking logarithms.
pub const POWER_AMIN: f64 = 1e-10;
/// Floor applied to amplitude values before taking logarithms.
pub const AMPLITUDE_AMIN: f64 = 1e-5;
/// Dynamic range kept below the loudest value when converting to dB.
pub const TOP_DB: f64 = 80.0;

/// Power spectrogram laid out as `frames[time][bin]`.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub frames: Vec<Vec<f32>>,
}

impl Spectrogram {
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn bin_frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.sample_rate as f64 / self.n_fft as f64
    }
}

/// Short-time Fourier transform driver.
///
/// Frames are centred: the signal is zero-padded by half a window on both
/// sides so that frame `t` is centred on sample `t * hop_length`.
pub struct SpectralAnalyzer {
    n_fft: usize,
    hop_length: usize,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectralAnalyzer {
    pub fn new(n_fft: usize, hop_length: usize) -> Result<Self> {
        if n_fft < 2 || n_fft % 2 != 0 {
            return Err(BeatMapError::InvalidInput(
                "fft size must be an even number of at least two",
            ));
        }
        if hop_length == 0 {
            return Err(BeatMapError::InvalidInput("hop length must be positive"));
        }

        Ok(Self {
            n_fft,
            hop_length,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        })
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Computes the Hann-windowed power spectrogram of `samples`.
    pub fn power_spectrogram(&mut self, samples: &[f32], sample_rate: u32) -> Result<Spectrogram> {
        if samples.is_empty() {
            return Err(BeatMapError::InvalidInput(
                "spectral analysis requires at least one sample",
            ));
        }

        let half = self.n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * half];
        padded[half..half + samples.len()].copy_from_slice(samples);

        let n_frames = 1 + (padded.len() - self.n_fft) / self.hop_length;
        let hop_length = self.hop_length;
        let n_fft = self.n_fft;
        let fft = self.prepare_fft();

        let mut frames = Vec::with_capacity(n_frames);
        for t in 0..n_frames {
            let start = t * hop_length;
            for (index, value) in padded[start..start + n_fft].iter().enumerate() {
                fft.input[index] = *value * fft.window[index];
            }

            fft.plan
                .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;
            frames.push(fft.spectrum.iter().map(|bin| bin.norm_sqr()).collect());
        }

        Ok(Spectrogram {
            sample_rate,
            n_fft,
            hop_length,
            frames,
        })
    }

    fn prepare_fft(&mut self) -> &mut FftResources {
        let size = self.n_fft;
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);
        if rebuild {
            self.fft = None;
        }

        let planner = &mut self.fft_planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                window: (0..size).map(|i| hann_value(i, size)).collect(),
                plan,
            }
        })
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
    window: Vec<f32>,
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

/// Periodic Hann window, matching the usual STFT convention.
fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / len as f32).cos()
}

/// Converts power rows to dB relative to the loudest cell, clipped to
/// [`TOP_DB`] below it.
pub fn power_to_db(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    to_db(rows, 10.0, POWER_AMIN)
}

/// Converts magnitude rows to dB relative to the loudest cell.
pub fn amplitude_to_db(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    to_db(rows, 20.0, AMPLITUDE_AMIN)
}

fn to_db(rows: &[Vec<f64>], scale: f64, amin: f64) -> Vec<Vec<f64>> {
    let reference = rows
        .iter()
        .flatten()
        .fold(0.0f64, |acc, value| acc.max(*value))
        .max(amin);
    let ref_db = scale * reference.log10();

    rows.iter()
        .map(|row| {
            row.iter()
                .map(|value| (scale * value.max(amin).log10() - ref_db).max(-TOP_DB))
                .collect()
        })
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters stored sparsely as `(first_bin, weights)`.
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    filters: Vec<(usize, Vec<f64>)>,
}

impl MelFilterBank {
    /// Builds `n_mels` area-normalised filters spanning `0..=sample_rate/2`.
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize) -> Self {
        let n_bins = n_fft / 2 + 1;
        let nyquist = sample_rate as f64 / 2.0;
        let max_mel = hz_to_mel(nyquist);
        let edges: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
            .collect();
        let bin_hz = sample_rate as f64 / n_fft as f64;

        let filters = (0..n_mels)
            .map(|m| {
                let (lo, mid, hi) = (edges[m], edges[m + 1], edges[m + 2]);
                let norm = 2.0 / (hi - lo);
                let mut first = None;
                let mut weights = Vec::new();
                for bin in 0..n_bins {
                    let f = bin as f64 * bin_hz;
                    let rising = (f - lo) / (mid - lo);
                    let falling = (hi - f) / (hi - mid);
                    let w = rising.min(falling).max(0.0) * norm;
                    if w > 0.0 {
                        if first.is_none() {
                            first = Some(bin);
                        }
                        weights.push(w);
                    } else if first.is_some() {
                        break;
                    }
                }
                (first.unwrap_or(0), weights)
            })
            .collect();

        Self { filters }
    }

    pub fn n_mels(&self) -> usize {
        self.filters.len()
    }

    pub fn apply(&self, power: &[f32]) -> Vec<f64> {
        self.filters
            .iter()
            .map(|(first, weights)| {
                weights
                    .iter()
                    .zip(&power[*first..])
                    .map(|(w, p)| w * *p as f64)
                    .sum()
            })
            .collect()
    }
}

/// Semitone-spaced log-frequency bands, a constant-Q stand-in computed from
/// the linear spectrum.
#[derive(Debug, Clone)]
pub struct LogFrequencyBank {
    bands: Vec<Vec<usize>>,
}

impl LogFrequencyBank {
    /// Lowest band centre, C1.
    pub const FMIN: f64 = 32.703_195_662_574_83;
    pub const BINS_PER_OCTAVE: usize = 12;
    pub const N_BANDS: usize = 84;

    pub fn new(sample_rate: u32, n_fft: usize) -> Self {
        let n_bins = n_fft / 2 + 1;
        let bin_hz = sample_rate as f64 / n_fft as f64;
        let half_step = 2f64.powf(1.0 / (2.0 * Self::BINS_PER_OCTAVE as f64));

        let bands = (0..Self::N_BANDS)
            .map(|band| {
                let centre =
                    Self::FMIN * 2f64.powf(band as f64 / Self::BINS_PER_OCTAVE as f64);
                let (lo, hi) = (centre / half_step, centre * half_step);
                let members: Vec<usize> = (0..n_bins)
                    .filter(|bin| {
                        let f = *bin as f64 * bin_hz;
                        f >= lo && f < hi
                    })
                    .collect();
                if members.is_empty() {
                    vec![((centre / bin_hz).round() as usize).min(n_bins - 1)]
                } else {
                    members
                }
            })
            .collect();

        Self { bands }
    }

    pub fn apply(&self, power: &[f32]) -> Vec<f64> {
        self.bands
            .iter()
            .map(|bins| bins.iter().map(|bin| power[*bin] as f64).sum())
            .collect()
    }
}

/// Orthonormal DCT-II truncated to the first `n_out` coefficients.
#[derive(Debug, Clone)]
pub struct Dct {
    basis: Vec<Vec<f64>>,
}

impl Dct {
    pub fn new(n_in: usize, n_out: usize) -> Self {
        let n = n_in as f64;
        let basis = (0..n_out.min(n_in))
            .map(|k| {
                let scale = if k == 0 {
                    (1.0 / n).sqrt()
                } else {
                    (2.0 / n).sqrt()
                };
                (0..n_in)
                    .map(|i| {
                        scale
                            * (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0)
                                / (2.0 * n))
                                .cos()
                    })
                    .collect()
            })
            .collect();

        Self { basis }
    }

    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        self.basis
            .iter()
            .map(|row| row.iter().zip(input).map(|(b, x)| b * x).sum())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn centred_frames_cover_the_signal() {
        let mut analyzer = SpectralAnalyzer::new(256, 64).unwrap();
        let spec = analyzer.power_spectrogram(&vec![0.0; 1000], 8_000).unwrap();

        assert_eq!(spec.n_frames(), 1 + 1000 / 64);
        assert_eq!(spec.frames[0].len(), spec.n_bins());
    }

    #[test]
    fn sine_energy_peaks_at_its_bin() {
        let mut analyzer = SpectralAnalyzer::new(512, 128).unwrap();
        let spec = analyzer
            .power_spectrogram(&sine(1_000.0, 8_000, 4_000), 8_000)
            .unwrap();

        let frame = &spec.frames[spec.n_frames() / 2];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin)
            .unwrap();
        assert_eq!(peak, 64);
        assert!((spec.bin_frequency(peak) - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn db_is_relative_to_peak_and_clipped() {
        let db = power_to_db(&[vec![1.0, 0.1, 0.0]]);
        assert!((db[0][0] - 0.0).abs() < 1e-9);
        assert!((db[0][1] + 10.0).abs() < 1e-9);
        assert!((db[0][2] + TOP_DB).abs() < 1e-9);
    }

    #[test]
    fn mel_filters_route_tone_to_one_region() {
        let bank = MelFilterBank::new(8_000, 512, 40);
        let mut power = vec![0.0f32; 257];
        power[64] = 1.0;
        let mel = bank.apply(&power);

        assert_eq!(bank.n_mels(), 40);
        let active = mel.iter().filter(|v| **v > 0.0).count();
        assert!((1..=2).contains(&active));
    }

    #[test]
    fn log_frequency_bands_never_empty() {
        let bank = LogFrequencyBank::new(22_050, 2048);
        let power = vec![1.0f32; 1025];
        let bands = bank.apply(&power);

        assert_eq!(bands.len(), LogFrequencyBank::N_BANDS);
        assert!(bands.iter().all(|v| *v >= 1.0));
    }

    #[test]
    fn dct_of_constant_is_dc_only() {
        let dct = Dct::new(8, 4);
        let out = dct.apply(&[2.0; 8]);
        assert!((out[0] - 2.0 * 8f64.sqrt()).abs() < 1e-9);
        assert!(out[1..].iter().all(|c| c.abs() < 1e-9));
    }
}
