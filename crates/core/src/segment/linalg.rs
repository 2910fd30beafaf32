use ndarray::{Array1, Array2, Axis};

use crate::{BeatMapError, Result};

const MAX_SWEEPS: usize = 100;

/// Eigen-decomposition of a real symmetric matrix by cyclic Jacobi rotations.
///
/// Returns eigenvalues in ascending order and the matching eigenvectors as
/// columns, i.e. `vectors[[row, k]]` is component `row` of eigenvector `k`.
pub fn symmetric_eigen(matrix: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    if !matrix.is_square() {
        return Err(BeatMapError::InvalidInput("eigen-decomposition needs a square matrix"));
    }
    let n = matrix.nrows();

    let mut a = matrix.to_owned();
    let mut v = Array2::<f64>::eye(n);

    let total = a.iter().map(|x| x * x).sum::<f64>();
    let tolerance = (total * 1e-24).max(f64::MIN_POSITIVE);

    for _ in 0..MAX_SWEEPS {
        let diagonal = a.diag().iter().map(|x| x * x).sum::<f64>();
        let off = a.iter().map(|x| x * x).sum::<f64>() - diagonal;
        if off <= tolerance {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = if theta.abs() > 1e150 {
                    0.5 / theta
                } else {
                    let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                    sign / (theta.abs() + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                rotate(&mut a, Axis(1), p, q, c, s);
                rotate(&mut a, Axis(0), p, q, c, s);
                rotate(&mut v, Axis(1), p, q, c, s);
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| a[[x, x]].total_cmp(&a[[y, y]]).then(x.cmp(&y)));

    let values = order.iter().map(|&k| a[[k, k]]).collect::<Array1<f64>>();
    let vectors = v.select(Axis(1), &order);

    Ok((values, vectors))
}

/// Applies a Givens rotation to lanes `p` and `q` along `axis`.
fn rotate(m: &mut Array2<f64>, axis: Axis, p: usize, q: usize, c: f64, s: f64) {
    let lane_p = m.index_axis(axis, p).to_owned();
    let lane_q = m.index_axis(axis, q).to_owned();
    m.index_axis_mut(axis, p).assign(&(&lane_p * c - &lane_q * s));
    m.index_axis_mut(axis, q).assign(&(&lane_p * s + &lane_q * c));
}
