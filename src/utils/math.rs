use ndarray::{ArrayBase, ArrayView1, Data, Dimension, Zip};

/// Dot product of two feature vectors
pub fn dot(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.dot(&b)
}

/// Euclidean norm of a feature vector
pub fn l2_norm(v: ArrayView1<f64>) -> f64 {
    v.dot(&v).sqrt()
}

/// Population variance (ddof = 0). Empty input has zero variance.
pub fn variance(values: ArrayView1<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.var(0.0)
}

/// Largest elementwise absolute difference.
///
/// Arrays of different shapes are infinitely far apart; so is any pair
/// containing a NaN.
pub fn max_abs_diff<S1, S2, D>(a: &ArrayBase<S1, D>, b: &ArrayBase<S2, D>) -> f64
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    if a.shape() != b.shape() {
        return f64::INFINITY;
    }
    Zip::from(a).and(b).fold(0.0f64, |acc, &x, &y| {
        let diff = (x - y).abs();
        if diff.is_nan() {
            f64::INFINITY
        } else {
            acc.max(diff)
        }
    })
}

/// Pearson correlation coefficient; zero when either side is constant.
pub fn pearson_correlation(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a.iter().take(n).sum::<f64>() / n as f64;
    let mean_b = b.iter().take(n).sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        cov / denom
    }
}

pub fn all_finite<S, D>(values: &ArrayBase<S, D>) -> bool
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_dot_and_norm() {
        let a = array![3.0, 4.0];
        let b = array![1.0, -1.0];
        assert_abs_diff_eq!(dot(a.view(), b.view()), -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(l2_norm(a.view()), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_variance_is_population_variance() {
        let v = array![1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(variance(v.view()), 1.25, epsilon = 1e-12);
        assert_eq!(variance(ndarray::Array1::<f64>::zeros(0).view()), 0.0);
    }

    #[test]
    fn test_max_abs_diff() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let mut b = a.clone();
        b[[1, 0]] = 2.5;
        assert_abs_diff_eq!(max_abs_diff(&a, &b), 0.5, epsilon = 1e-12);

        let c = Array2::<f64>::zeros((3, 2));
        assert_eq!(max_abs_diff(&a, &c), f64::INFINITY);

        b[[0, 0]] = f64::NAN;
        assert_eq!(max_abs_diff(&a, &b), f64::INFINITY);
    }

    #[test]
    fn test_pearson_correlation() {
        let a = array![1.0, 2.0, 3.0];
        let b = array![2.0, 4.0, 6.0];
        let c = array![3.0, 2.0, 1.0];
        assert_abs_diff_eq!(pearson_correlation(a.view(), b.view()), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pearson_correlation(a.view(), c.view()), -1.0, epsilon = 1e-12);
        let flat = array![1.0, 1.0, 1.0];
        assert_eq!(pearson_correlation(a.view(), flat.view()), 0.0);
    }
}
