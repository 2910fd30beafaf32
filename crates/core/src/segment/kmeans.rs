use ndarray::{Array1, Array2, Axis};
use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};

use crate::{BeatMapError, Result};

const MAX_ITERATIONS: usize = 300;

/// Best clustering found across all restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    /// One centroid per row.
    pub centroids: Array2<f64>,
    /// Sum of squared distances from each point to its centroid.
    pub inertia: f64,
}

/// Lloyd's k-means with k-means++ seeding over the rows of `data`, keeping
/// the lowest-inertia run.
pub fn kmeans<R: Rng + ?Sized>(
    data: &Array2<f64>,
    k: usize,
    restarts: usize,
    rng: &mut R,
) -> Result<KMeansFit> {
    if k == 0 {
        return Err(BeatMapError::InvalidInput("k-means needs at least one cluster"));
    }
    if k > data.nrows() {
        return Err(BeatMapError::InvalidInput(
            "k-means needs at least as many points as clusters",
        ));
    }

    let mut best: Option<KMeansFit> = None;
    for _ in 0..restarts.max(1) {
        let fit = lloyd(data, seed_centroids(data, k, rng));
        if best.as_ref().map(|b| fit.inertia < b.inertia).unwrap_or(true) {
            best = Some(fit);
        }
    }

    best.ok_or_else(|| BeatMapError::msg("k-means produced no fit"))
}

/// Squared distance from every point (row) to every centroid (row), shaped
/// `(points, centroids)`.
fn squared_distances(data: &Array2<f64>, centroids: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((data.nrows(), centroids.nrows()));
    for (centroid, mut column) in centroids.outer_iter().zip(out.columns_mut()) {
        let diff = data - &centroid;
        column.assign(&diff.mapv(|x| x * x).sum_axis(Axis(1)));
    }
    out
}

/// Index and distance of the closest centroid for each point. Ties go to the
/// lower index.
fn nearest(distances: &Array2<f64>) -> Vec<(usize, f64)> {
    distances
        .outer_iter()
        .map(|row| {
            row.iter()
                .copied()
                .enumerate()
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
        })
        .collect()
}

fn seed_centroids<R: Rng + ?Sized>(data: &Array2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let mut chosen = vec![rng.gen_range(0..data.nrows())];

    while chosen.len() < k {
        let centroids = data.select(Axis(0), &chosen);
        let weights: Vec<f64> = nearest(&squared_distances(data, &centroids))
            .into_iter()
            .map(|(_, d)| d)
            .collect();
        // All points already coincide with a centroid: any pick is as good.
        let index = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(rng),
            Err(_) => rng.gen_range(0..data.nrows()),
        };
        chosen.push(index);
    }

    data.select(Axis(0), &chosen)
}

fn lloyd(data: &Array2<f64>, mut centroids: Array2<f64>) -> KMeansFit {
    let mut labels = vec![usize::MAX; data.nrows()];

    for _ in 0..MAX_ITERATIONS {
        let assignment = nearest(&squared_distances(data, &centroids));
        let mut changed = false;
        for (label, (index, _)) in labels.iter_mut().zip(assignment) {
            if *label != index {
                *label = index;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (cluster, mut centroid) in centroids.outer_iter_mut().enumerate() {
            let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == cluster).collect();
            // Empty clusters keep their previous centroid.
            if let Some(mean) = data.select(Axis(0), &members).mean_axis(Axis(0)) {
                centroid.assign(&mean);
            }
        }
    }

    let distances = squared_distances(data, &centroids);
    let inertia = labels
        .iter()
        .enumerate()
        .map(|(point, &label)| distances[[point, label]])
        .sum();

    KMeansFit {
        labels,
        centroids,
        inertia,
    }
}

/// Scales every column into `[0, 1]`. Constant columns become zero.
pub fn min_max_scale(data: &Array2<f64>) -> Array2<f64> {
    let mut scaled = data.to_owned();
    for mut column in scaled.columns_mut() {
        let lo = column.fold(f64::INFINITY, |lo, &x| lo.min(x));
        let hi = column.fold(f64::NEG_INFINITY, |hi, &x| hi.max(x));
        if hi > lo {
            column.mapv_inplace(|x| (x - lo) / (hi - lo));
        } else {
            column.fill(0.0);
        }
    }
    scaled
}

/// Number of points carrying each label below `k`.
pub fn cluster_sizes(labels: &[usize], k: usize) -> Array1<usize> {
    let mut sizes = Array1::zeros(k);
    for &label in labels.iter().filter(|&&l| l < k) {
        sizes[label] += 1;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::create_rng;
    use ndarray::array;

    fn blobs() -> Array2<f64> {
        let mut points = Array2::zeros((20, 2));
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            points.row_mut(2 * i).assign(&array![0.0 + jitter, 0.0 - jitter]);
            points.row_mut(2 * i + 1).assign(&array![10.0 - jitter, 10.0 + jitter]);
        }
        points
    }

    #[test]
    fn separates_two_blobs() {
        let mut rng = create_rng(7);
        let fit = kmeans(&blobs(), 2, 4, &mut rng).unwrap();

        assert_ne!(fit.labels[0], fit.labels[1]);
        for pair in fit.labels.chunks(2) {
            assert_eq!(pair[0], fit.labels[0]);
            assert_eq!(pair[1], fit.labels[1]);
        }
        assert!(fit.inertia < 1.0);
        assert_eq!(cluster_sizes(&fit.labels, 2), array![10usize, 10]);
    }

    #[test]
    fn inertia_drops_with_more_clusters() {
        let mut rng = create_rng(11);
        let one = kmeans(&blobs(), 1, 2, &mut rng).unwrap();
        let two = kmeans(&blobs(), 2, 2, &mut rng).unwrap();
        assert!(two.inertia < one.inertia);
    }

    #[test]
    fn rejects_more_clusters_than_points() {
        let mut rng = create_rng(1);
        assert!(kmeans(&array![[1.0]], 2, 1, &mut rng).is_err());
    }

    #[test]
    fn min_max_scale_flattens_constant_columns() {
        let scaled = min_max_scale(&array![[1.0, 5.0], [3.0, 5.0], [2.0, 5.0]]);
        assert_eq!(scaled, array![[0.0, 0.0], [1.0, 0.0], [0.5, 0.0]]);
    }
}
