//! Structural segmentation by spectral clustering of a beat-level
//! similarity graph.
//!
//! The graph mixes two views of the song: long-range repetition (mutual
//! nearest neighbours over the pitch spectrum, cleaned along time-lag
//! diagonals) and short-range timbral continuity between adjacent beats.
//! The leading eigenvectors of its normalised Laplacian are clustered with
//! k-means and every run of equal labels becomes a [`Segment`].

pub mod kmeans;
pub mod linalg;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use kmeans::{cluster_sizes, kmeans, min_max_scale, KMeansFit};
pub use linalg::symmetric_eigen;

use crate::{
    analysis::{median, BeatFeatures, BeatGrid},
    config::SegmentationConfig,
    BeatMapError, Result,
};

/// A contiguous, labelled span of the track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start of the span in seconds (inclusive).
    pub start_time: f64,
    /// End of the span in seconds (exclusive).
    pub end_time: f64,
    pub start_beat: usize,
    pub end_beat: usize,
    /// Cluster id. Segments with equal labels are musical repeats.
    pub label: usize,
}

impl Segment {
    pub fn beat_len(&self) -> usize {
        self.end_beat - self.start_beat
    }
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmentationConfig,
}

impl Segmenter {
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Partitions `[0, duration)` into labelled segments.
    pub fn segment<R: Rng + ?Sized>(
        &self,
        features: &BeatFeatures,
        grid: &BeatGrid,
        duration: f64,
        rng: &mut R,
    ) -> Result<Vec<Segment>> {
        let n = features.n_beats().min(grid.len());
        let width = self.config.recurrence_width.max(1);
        if n < 2 * width + 3 {
            warn!(beats = n, "too few beats to segment, using a single segment");
            return Ok(vec![Segment {
                start_time: 0.0,
                end_time: duration,
                start_beat: 0,
                end_beat: n,
                label: 0,
            }]);
        }

        let k = match self.config.k {
            Some(k) => k,
            None => self.resolve_k(&beat_matrix(&features.mel[..n])?, rng),
        };
        let k = k.clamp(1, n);

        let recurrence = recurrence_matrix(&beat_matrix(&features.chroma[..n])?, width);
        let recurrence = timelag_median(&recurrence, self.config.timelag_filter);
        let path = path_similarity(&beat_matrix(&features.timbre[..n])?);
        let affinity = combine(&recurrence, &path);
        let laplacian = normalized_laplacian(&affinity);

        let (_, mut vectors) = symmetric_eigen(&laplacian)?;
        median_filter_columns(&mut vectors, self.config.eigen_median);
        let embedding = normalized_embedding(&vectors, k);

        let fit = kmeans(&embedding, k, self.config.kmeans_restarts, rng)?;
        debug!(sizes = ?cluster_sizes(&fit.labels, k).to_vec(), inertia = fit.inertia, "clustered beats");
        let labels = canonical_labels(&fit.labels);
        let segments = build_segments(&labels, grid, duration);

        info!(k, segments = segments.len(), "segmented track");
        Ok(segments)
    }

    /// Estimates k, falling back to the configured default when the elbow
    /// heuristic fails or lands outside `2..=9`.
    fn resolve_k<R: Rng + ?Sized>(&self, mel: &Array2<f64>, rng: &mut R) -> usize {
        match self.estimate_k(mel, rng) {
            Ok(k) => {
                debug!(k, "estimated segment count");
                k
            }
            Err(err) => {
                warn!(%err, default_k = self.config.default_k, "falling back to default segment count");
                self.config.default_k
            }
        }
    }

    /// Picks k from the elbow of the k-means inertia curve over min-max
    /// scaled per-beat mel features (one beat per row).
    pub fn estimate_k<R: Rng + ?Sized>(&self, mel: &Array2<f64>, rng: &mut R) -> Result<usize> {
        let max_k = self.config.max_scan_k;
        if mel.nrows() < max_k {
            return Err(BeatMapError::SegmentationEstimation(format!(
                "{} beats cannot support a scan up to k={max_k}",
                mel.nrows()
            )));
        }

        let scaled = min_max_scale(mel);
        let inertias = (1..=max_k)
            .map(|k| kmeans(&scaled, k, self.config.estimation_restarts, rng).map(|fit| fit.inertia))
            .collect::<Result<Vec<f64>>>()?;

        let k = elbow(&inertias).ok_or_else(|| {
            BeatMapError::SegmentationEstimation("inertia curve has no elbow".into())
        })?;
        if !(2..=9).contains(&k) {
            return Err(BeatMapError::SegmentationEstimation(format!(
                "elbow at k={k} is outside 2..=9"
            )));
        }
        Ok(k)
    }
}

/// Stacks per-beat feature vectors into a `(beats, dims)` matrix.
pub fn beat_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let dims = rows.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), dims), flat)
        .map_err(|_| BeatMapError::InvalidInput("beat features have uneven dimensions"))
}

/// Locates the elbow of an inertia curve scanned from `k = 1`. The index of
/// the first point where the second difference of the shifted curve turns
/// is the estimate.
pub fn elbow(inertias: &[f64]) -> Option<usize> {
    if inertias.len() < 4 {
        return None;
    }
    let delta: Vec<f64> = inertias.windows(2).map(|w| w[1] - w[0]).collect();
    let f = |x: usize| inertias[x] - delta[x];

    (1..delta.len() - 1).find(|&i| f(i - 1) - f(i) < f(i) - f(i + 1))
}

/// Euclidean distance between every pair of rows.
fn pairwise_distances(features: &Array2<f64>) -> Array2<f64> {
    let n = features.nrows();
    let mut out = Array2::zeros((n, n));
    for (row, mut distances) in features.outer_iter().zip(out.outer_iter_mut()) {
        let diff = features - &row;
        distances.assign(&diff.mapv(|x| x * x).sum_axis(Axis(1)).mapv(f64::sqrt));
    }
    out
}

/// Symmetric mutual-kNN affinity graph over beat features. Beats closer than
/// `width` to each other are never linked.
pub fn recurrence_matrix(features: &Array2<f64>, width: usize) -> Array2<f64> {
    let n = features.nrows();
    let mut affinity = Array2::zeros((n, n));
    if n == 0 || n + 1 <= 2 * width {
        return affinity;
    }

    let k = 2 * ((n + 1 - 2 * width) as f64).sqrt().ceil() as usize;
    let distances = pairwise_distances(features);
    let mut linked = Array2::from_elem((n, n), false);
    let mut kth_distances = Vec::with_capacity(n);

    for (i, row) in distances.outer_iter().enumerate() {
        let mut candidates: Vec<(usize, f64)> = row
            .iter()
            .copied()
            .enumerate()
            .filter(|&(j, _)| i.abs_diff(j) >= width)
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(k);
        if let Some(last) = candidates.last() {
            kth_distances.push(last.1);
        }
        for (j, _) in candidates {
            linked[[i, j]] = true;
        }
    }

    let bandwidth = match median(&mut kth_distances) {
        bw if bw > 0.0 => bw,
        _ => 1.0,
    };

    let mutual = &linked & &linked.t();
    ndarray::Zip::from(&mut affinity)
        .and(&mutual)
        .and(&distances)
        .for_each(|a, &m, &d| {
            if m {
                *a = (-d / bandwidth).exp();
            }
        });

    affinity
}

/// Median of a sliding window over `lane`, written back in place. Windows
/// shrink at the ends.
fn shrinking_median(mut lane: ArrayViewMut1<f64>, size: usize) {
    let values = lane.to_vec();
    let half = size / 2;
    let mut window = Vec::with_capacity(size.max(1));
    for (i, out) in lane.iter_mut().enumerate() {
        window.clear();
        window.extend_from_slice(&values[i.saturating_sub(half)..(i + half + 1).min(values.len())]);
        *out = median(&mut window);
    }
}

/// Median filter along each diagonal of the matrix, i.e. along time in the
/// time-lag domain.
pub fn timelag_median(matrix: &Array2<f64>, size: usize) -> Array2<f64> {
    let n = matrix.nrows();
    let mut out = matrix.to_owned();
    for lag in 0..n {
        shrinking_median(out.slice_mut(s![..n - lag, lag..]).into_diag(), size);
        if lag > 0 {
            shrinking_median(out.slice_mut(s![lag.., ..n - lag]).into_diag(), size);
        }
    }
    out
}

/// Tridiagonal similarity between neighbouring beats' timbre.
pub fn path_similarity(features: &Array2<f64>) -> Array2<f64> {
    let n = features.nrows();
    let mut path = Array2::zeros((n, n));
    if n < 2 {
        return path;
    }

    let diff = &features.slice(s![1.., ..]) - &features.slice(s![..-1, ..]);
    let distances = diff.mapv(|x| x * x).sum_axis(Axis(1));
    let sigma = match median(&mut distances.to_vec()) {
        s if s > 0.0 => s,
        _ => 1.0,
    };

    for (i, d) in distances.iter().enumerate() {
        let sim = (-d / sigma).exp();
        path[[i, i + 1]] = sim;
        path[[i + 1, i]] = sim;
    }
    path
}

/// Degree-balanced mix of the recurrence and path graphs.
pub fn combine(recurrence: &Array2<f64>, path: &Array2<f64>) -> Array2<f64> {
    let deg_rec = recurrence.sum_axis(Axis(1));
    let deg_path = path.sum_axis(Axis(1));
    let total = &deg_path + &deg_rec;

    let numerator = deg_path.dot(&total);
    let denominator = total.dot(&total);
    let mu = if denominator > 0.0 {
        numerator / denominator
    } else {
        0.5
    };

    recurrence * mu + path * (1.0 - mu)
}

/// `I - D^-1/2 A D^-1/2`, with isolated vertices given a zero diagonal.
pub fn normalized_laplacian(affinity: &Array2<f64>) -> Array2<f64> {
    let degrees = affinity.sum_axis(Axis(1));
    let scale: Array1<f64> = degrees.mapv(|d| if d > 0.0 { 1.0 / d.sqrt() } else { 1.0 });

    let column = scale.view().insert_axis(Axis(1));
    let row = scale.view().insert_axis(Axis(0));
    let mut laplacian = -(affinity * &column * &row);
    for (i, d) in degrees.iter().enumerate() {
        if *d > 0.0 {
            laplacian[[i, i]] += 1.0;
        }
    }
    laplacian
}

/// Median filter down each column with reflected edges.
pub fn median_filter_columns(matrix: &mut Array2<f64>, size: usize) {
    let n = matrix.nrows();
    if n == 0 || size <= 1 {
        return;
    }
    let half = (size / 2) as isize;

    let reflect = |mut index: isize| -> usize {
        let len = n as isize;
        loop {
            if index < 0 {
                index = -index - 1;
            } else if index >= len {
                index = 2 * len - index - 1;
            } else {
                return index as usize;
            }
        }
    };

    let mut window = Vec::with_capacity(size);
    for mut column in matrix.columns_mut() {
        let values = column.to_vec();
        for (i, out) in column.iter_mut().enumerate() {
            window.clear();
            window.extend((-half..=half).map(|d| values[reflect(i as isize + d)]));
            *out = median(&mut window);
        }
    }
}

/// First `k` eigenvector coordinates per beat, scaled by the norm of those
/// `k` components.
pub fn normalized_embedding(vectors: &Array2<f64>, k: usize) -> Array2<f64> {
    let k = k.min(vectors.ncols());
    let mut embedding = vectors.slice(s![.., ..k]).to_owned();
    let norms = embedding.map_axis(Axis(1), |row: ArrayView1<f64>| row.dot(&row).sqrt());

    for (mut row, norm) in embedding.outer_iter_mut().zip(norms) {
        if norm > f64::EPSILON {
            row /= norm;
        } else {
            row.fill(0.0);
        }
    }
    embedding
}

/// Renumbers labels in order of first appearance.
pub fn canonical_labels(labels: &[usize]) -> Vec<usize> {
    let mut mapping: Vec<(usize, usize)> = Vec::new();
    labels
        .iter()
        .map(|label| match mapping.iter().find(|(from, _)| from == label) {
            Some((_, to)) => *to,
            None => {
                let to = mapping.len();
                mapping.push((*label, to));
                to
            }
        })
        .collect()
}

/// Turns per-beat labels into a time partition. The first segment starts at
/// zero and the last one ends at `duration`.
pub fn build_segments(labels: &[usize], grid: &BeatGrid, duration: f64) -> Vec<Segment> {
    let n = labels.len();
    let mut starts = vec![0usize];
    starts.extend((1..n).filter(|&i| labels[i] != labels[i - 1]));

    let times = grid.beat_times();
    starts
        .iter()
        .enumerate()
        .map(|(s, &start_beat)| {
            let end_beat = starts.get(s + 1).copied().unwrap_or(n);
            let start_time = if s == 0 { 0.0 } else { times[start_beat] };
            let end_time = if end_beat == n {
                duration.max(start_time)
            } else {
                times[end_beat]
            };
            Segment {
                start_time,
                end_time,
                start_beat,
                end_beat,
                label: labels[start_beat],
            }
        })
        .collect()
}
