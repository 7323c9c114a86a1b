//! Classical (Torgerson) multidimensional scaling.

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::error::{ClusterError, Result};

const MAX_POWER_ITERATIONS: usize = 1000;
const POWER_TOLERANCE: f64 = 1e-10;
const EIGENVALUE_FLOOR: f64 = 1e-9;

/// Project a distance matrix to at most `n_components` Euclidean
/// coordinates.
///
/// Double-centres the squared distances and keeps the leading positive
/// eigenpairs (power iteration with deflation, deterministic start). Fails
/// when no positive eigenvalue exists.
pub fn classical_mds(distances: &Array2<f64>, n_components: usize) -> Result<Array2<f64>> {
    let n = distances.nrows();
    if distances.ncols() != n {
        return Err(ClusterError::Mds("distance matrix is not square".to_string()));
    }
    if n_components == 0 {
        return Err(ClusterError::Mds(format!(
            "cannot project {} points to 0 components",
            n
        )));
    }

    let squared = distances.mapv(|d| d * d);
    let row_means = squared.mean_axis(Axis(1)).ok_or_else(|| {
        ClusterError::Mds("cannot centre an empty matrix".to_string())
    })?;
    let grand_mean = row_means.mean().unwrap_or(0.0);
    let mut b = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            b[[i, j]] = -0.5 * (squared[[i, j]] - row_means[i] - row_means[j] + grand_mean);
        }
    }

    // Shift so every eigenvalue is non-negative; power iteration then finds
    // the algebraically largest ones.
    let shift = b
        .rows()
        .into_iter()
        .map(|r| r.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    for i in 0..n {
        b[[i, i]] += shift;
    }

    let mut columns: Vec<Array1<f64>> = Vec::new();
    for component in 0..n_components.min(n) {
        let (value, vector) = leading_eigenpair(&b, component);
        let eigenvalue = value - shift;
        if eigenvalue <= EIGENVALUE_FLOOR * shift.max(1.0) {
            break;
        }
        columns.push(&vector * eigenvalue.sqrt());
        for i in 0..n {
            for j in 0..n {
                b[[i, j]] -= value * vector[i] * vector[j];
            }
        }
    }

    if columns.is_empty() {
        return Err(ClusterError::Mds(
            "no positive eigenvalues; points are indistinguishable".to_string(),
        ));
    }
    debug!(
        "MDS: {} points projected to {} of {} requested components",
        n,
        columns.len(),
        n_components
    );

    let mut coords = Array2::zeros((n, columns.len()));
    for (c, column) in columns.iter().enumerate() {
        coords.column_mut(c).assign(column);
    }
    Ok(coords)
}

fn leading_eigenpair(matrix: &Array2<f64>, seed: usize) -> (f64, Array1<f64>) {
    let n = matrix.nrows();
    let mut v = Array1::from_shape_fn(n, |i| 1.0 + ((i + seed) % 7) as f64 / 7.0);
    let norm = v.dot(&v).sqrt();
    v /= norm;

    let mut value = 0.0;
    for _ in 0..MAX_POWER_ITERATIONS {
        let next = matrix.dot(&v);
        let norm = next.dot(&next).sqrt();
        if norm == 0.0 {
            return (0.0, v);
        }
        let next = next / norm;
        let delta = &next - &v;
        let converged = delta.dot(&delta).sqrt() <= POWER_TOLERANCE;
        v = next;
        value = v.dot(&matrix.dot(&v));
        if converged {
            break;
        }
    }
    (value, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn pairwise(coords: &Array2<f64>) -> Array2<f64> {
        let n = coords.nrows();
        Array2::from_shape_fn((n, n), |(i, j)| {
            let diff = &coords.row(i) - &coords.row(j);
            diff.dot(&diff).sqrt()
        })
    }

    #[test]
    fn test_recovers_planar_distances() {
        let points = Array2::from_shape_vec(
            (4, 2),
            vec![0.0, 0.0, 3.0, 0.0, 0.0, 4.0, 3.0, 4.0],
        )
        .unwrap();
        let d = pairwise(&points);
        let projected = classical_mds(&d, 2).unwrap();
        let d2 = pairwise(&projected);
        for (a, b) in d.iter().zip(d2.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_identical_points_fail() {
        let d = Array2::zeros((3, 3));
        assert!(matches!(classical_mds(&d, 2), Err(ClusterError::Mds(_))));
    }

    #[test]
    fn test_zero_components_fail() {
        let d = Array2::<f64>::from_elem((2, 2), 1.0);
        assert!(classical_mds(&d, 0).is_err());
    }
}
