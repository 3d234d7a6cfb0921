use std::fmt;

use crate::{Result, Scalar};
use ndarray::ArrayView1;

use ndarray_stats::DeviationExt;

/// A distance function usable by [`KdTree`](crate::KdTree).
///
/// Besides the distance itself, a metric must say how far apart two points are *at least* when
/// their coordinates differ by `offset` on a single axis. The search compares that bound with the
/// worst distance it currently keeps, so both numbers must be in the same units. A bound that is
/// too large makes the search miss true neighbours; a bound of zero is always correct but
/// disables pruning.
pub trait Distance {
    /// Calculate the distance between two points.
    fn distance(&self, a: ArrayView1<'_, Scalar>, b: ArrayView1<'_, Scalar>) -> Result<Scalar>;

    /// Lower bound of the distance between two points whose coordinates differ by `offset` on
    /// one axis.
    fn axis_distance(&self, offset: Scalar) -> Scalar;
}

/// Enum for distance functions in a metric space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    /// L-1 or Manhattan distance. See [\[Wikipedia\]](https://en.wikipedia.org/wiki/Taxicab_geometry).
    Manhattan,
    /// L-2 or Euclidean distance. See [\[Wikipedia\]](https://en.wikipedia.org/wiki/Euclidean_distance)
    Euclidean,
    /// Squared L-2 distance. Ranks neighbours like [`Metric::Euclidean`] without the square root.
    SquaredEuclidean,
    /// L-inf or Chebyshev distance. See [\[Wikipedia\]](https://en.wikipedia.org/wiki/Chebyshev_distance)
    Chebyshev,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Euclidean
    }
}

impl Distance for Metric {
    fn distance(&self, a: ArrayView1<'_, Scalar>, b: ArrayView1<'_, Scalar>) -> Result<Scalar> {
        let d = match self {
            Metric::Manhattan => a.l1_dist(&b)?,
            Metric::Euclidean => a.l2_dist(&b)? as Scalar,
            Metric::SquaredEuclidean => a.sq_l2_dist(&b)?,
            Metric::Chebyshev => a.linf_dist(&b)?,
        };
        Ok(d)
    }

    #[inline]
    fn axis_distance(&self, offset: Scalar) -> Scalar {
        match self {
            Metric::SquaredEuclidean => offset * offset,
            Metric::Manhattan | Metric::Euclidean | Metric::Chebyshev => offset.abs(),
        }
    }
}

/// Adapter turning a closure into a [`Distance`].
///
/// The closure must return a value at least as large as the absolute difference of any single
/// coordinate, which holds for every L-p norm with `p >= 1`. Metrics that do not satisfy this
/// should implement [`Distance`] directly.
pub struct FnMetric<F> {
    distance_fn: F,
}

impl<F> FnMetric<F>
where
    F: Fn(ArrayView1<'_, Scalar>, ArrayView1<'_, Scalar>) -> Scalar,
{
    /// Wraps a distance closure.
    pub fn new(distance_fn: F) -> Self {
        Self { distance_fn }
    }
}

impl<F> Distance for FnMetric<F>
where
    F: Fn(ArrayView1<'_, Scalar>, ArrayView1<'_, Scalar>) -> Scalar,
{
    fn distance(&self, a: ArrayView1<'_, Scalar>, b: ArrayView1<'_, Scalar>) -> Result<Scalar> {
        Ok((self.distance_fn)(a, b))
    }

    #[inline]
    fn axis_distance(&self, offset: Scalar) -> Scalar {
        offset.abs()
    }
}

impl<F> fmt::Debug for FnMetric<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMetric").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn axis_distance_is_a_lower_bound() {
        let a = array![1., 2., 3.];
        let b = array![1., -2.5, 3.];

        for metric in &[
            Metric::Manhattan,
            Metric::Euclidean,
            Metric::SquaredEuclidean,
            Metric::Chebyshev,
        ] {
            let d = metric.distance(a.view(), b.view()).unwrap();
            assert_abs_diff_eq!(d, metric.axis_distance(2. - (-2.5)), epsilon = 1e-12);
        }
    }

    #[test]
    fn squared_euclidean_matches_euclidean() {
        let a = array![0., 0.];
        let b = array![4., 3.];

        assert_abs_diff_eq!(
            Metric::SquaredEuclidean.distance(a.view(), b.view()).unwrap(),
            25.
        );
        assert_abs_diff_eq!(Metric::SquaredEuclidean.axis_distance(-3.), 9.);
    }

    fn manhattan(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        (&a - &b).mapv(f64::abs).sum()
    }

    #[test]
    fn fn_metric_calls_closure() {
        let metric = FnMetric::new(manhattan);
        let a = array![1., 2.];
        let b = array![2., 4.];

        assert_abs_diff_eq!(metric.distance(a.view(), b.view()).unwrap(), 3.);
        assert_abs_diff_eq!(metric.axis_distance(-1.5), 1.5);
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let a = array![1., 2.];
        let b = array![1., 2., 3.];

        assert!(Metric::Euclidean.distance(a.view(), b.view()).is_err());
    }
}
