use crate::errors::{CurveStage, EstimationError, EstimationResult};
use crate::models::Curve;

/// A quadratic needs three parameters, so three distinct points.
pub const MIN_POINTS: usize = 3;

/// Pivots below this are treated as a singular fit.
const PIVOT_EPSILON: f64 = 1e-12;

/// Quadratic interpolating spline. Outside the sampled range the first and last
/// pieces are continued as-is.
///
/// Segments are separated at the midpoints of consecutive abscissae, skipping the first
/// and last midpoint, so `n` points give `n - 2` quadratic pieces joined with matching
/// value and slope. Three points give a single parabola through all of them.
///
/// Each piece is stored in its local variable `u = (x - left) / width` so that the
/// linear system stays well scaled for strikes in the tens of thousands.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticSpline {
    /// Piece boundaries: first abscissa, interior knots, last abscissa.
    breaks: Vec<f64>,
    /// [a, b, c] per piece: a + b·u + c·u².
    coeffs: Vec<[f64; 3]>,
}

impl QuadraticSpline {
    /// Fit through `(xs[i], ys[i])`. `xs` must be strictly increasing.
    pub fn fit(xs: &[f64], ys: &[f64], stage: CurveStage) -> EstimationResult<Self> {
        if xs.len() != ys.len() {
            return Err(EstimationError::DegenerateCurve(format!(
                "{stage} curve: {} abscissae but {} ordinates",
                xs.len(),
                ys.len()
            )));
        }

        let n = xs.len();
        if n < MIN_POINTS {
            return Err(EstimationError::InsufficientData {
                stage,
                available: n,
                required: MIN_POINTS,
            });
        }

        if xs.iter().chain(ys).any(|v| !v.is_finite()) {
            return Err(EstimationError::DegenerateCurve(format!(
                "{stage} curve: non-finite sample"
            )));
        }

        if xs.windows(2).any(|w| w[1] <= w[0]) {
            return Err(EstimationError::DegenerateCurve(format!(
                "{stage} curve: abscissae must be strictly increasing"
            )));
        }

        let mut breaks = Vec::with_capacity(n - 1);
        breaks.push(xs[0]);
        for i in 1..n - 2 {
            breaks.push(0.5 * (xs[i] + xs[i + 1]));
        }
        breaks.push(xs[n - 1]);

        let pieces = breaks.len() - 1;
        let dim = 3 * pieces;
        let widths: Vec<f64> = breaks.windows(2).map(|w| w[1] - w[0]).collect();

        let mut matrix = vec![0.0; dim * dim];
        let mut rhs = vec![0.0; dim];
        let mut row = 0;

        // Interpolation conditions
        for (i, (&x, &y)) in xs.iter().zip(ys).enumerate() {
            let j = i.saturating_sub(1).min(pieces - 1);
            let u = (x - breaks[j]) / widths[j];
            let base = row * dim + 3 * j;
            matrix[base] = 1.0;
            matrix[base + 1] = u;
            matrix[base + 2] = u * u;
            rhs[row] = y;
            row += 1;
        }

        // Value and slope continuity at each interior knot
        for j in 0..pieces - 1 {
            let base = row * dim;
            matrix[base + 3 * j] = 1.0;
            matrix[base + 3 * j + 1] = 1.0;
            matrix[base + 3 * j + 2] = 1.0;
            matrix[base + 3 * (j + 1)] = -1.0;
            row += 1;

            let base = row * dim;
            matrix[base + 3 * j + 1] = 1.0;
            matrix[base + 3 * j + 2] = 2.0;
            matrix[base + 3 * (j + 1) + 1] = -widths[j] / widths[j + 1];
            row += 1;
        }

        debug_assert_eq!(row, dim);

        let solution = solve_dense(&mut matrix, &mut rhs, dim).ok_or_else(|| {
            EstimationError::DegenerateCurve(format!("{stage} curve: singular interpolation system"))
        })?;

        let coeffs = solution
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();

        Ok(Self { breaks, coeffs })
    }

    /// Interior knots where adjacent pieces meet.
    pub fn knots(&self) -> &[f64] {
        &self.breaks[1..self.breaks.len() - 1]
    }

    /// Index of the piece used at `x`. Points left of the data use the first piece,
    /// points right of it use the last.
    #[inline]
    fn piece_for(&self, x: f64) -> usize {
        self.knots().partition_point(|&k| k <= x)
    }
}

#[cfg(test)]
impl QuadraticSpline {
    /// First derivative of the fitted curve.
    fn slope(&self, x: f64) -> f64 {
        let j = self.piece_for(x);
        let width = self.breaks[j + 1] - self.breaks[j];
        let u = (x - self.breaks[j]) / width;
        let [_, b, c] = self.coeffs[j];
        (b + 2.0 * c * u) / width
    }

    fn pieces(&self) -> usize {
        self.coeffs.len()
    }
}

impl Curve for QuadraticSpline {
    #[inline]
    fn evaluate(&self, x: f64) -> f64 {
        let j = self.piece_for(x);
        let width = self.breaks[j + 1] - self.breaks[j];
        let u = (x - self.breaks[j]) / width;
        let [a, b, c] = self.coeffs[j];
        a + u * (b + u * c)
    }

    fn domain(&self) -> (f64, f64) {
        (self.breaks[0], self.breaks[self.breaks.len() - 1])
    }
}

/// Gaussian elimination with partial pivoting on a row-major `dim × dim` matrix.
/// Consumes both buffers. Returns None for a (numerically) singular matrix.
fn solve_dense(matrix: &mut [f64], rhs: &mut [f64], dim: usize) -> Option<Vec<f64>> {
    for col in 0..dim {
        let pivot_row = (col..dim).max_by(|&a, &b| {
            matrix[a * dim + col]
                .abs()
                .total_cmp(&matrix[b * dim + col].abs())
        })?;

        if matrix[pivot_row * dim + col].abs() < PIVOT_EPSILON {
            return None;
        }

        if pivot_row != col {
            for k in 0..dim {
                matrix.swap(col * dim + k, pivot_row * dim + k);
            }
            rhs.swap(col, pivot_row);
        }

        let pivot = matrix[col * dim + col];
        for r in col + 1..dim {
            let factor = matrix[r * dim + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..dim {
                matrix[r * dim + k] -= factor * matrix[col * dim + k];
            }
            rhs[r] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; dim];
    for r in (0..dim).rev() {
        let mut acc = rhs[r];
        for k in r + 1..dim {
            acc -= matrix[r * dim + k] * solution[k];
        }
        solution[r] = acc / matrix[r * dim + r];
    }

    Some(solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual} (tol {tol})"
        );
    }

    #[test]
    fn test_three_points_reproduced_exactly() {
        let xs = [25_000.0, 26_000.0, 27_000.0];
        let ys = [3_600.0, 2_800.0, 2_150.0];
        let spline = QuadraticSpline::fit(&xs, &ys, CurveStage::Strike).unwrap();

        assert_eq!(spline.pieces(), 1);
        for (&x, &y) in xs.iter().zip(&ys) {
            assert_close(spline.evaluate(x), y, 1e-9);
        }
    }

    #[test]
    fn test_three_points_give_the_parabola() {
        // y = 2x² - 3x + 1
        let f = |x: f64| 2.0 * x * x - 3.0 * x + 1.0;
        let xs = [0.0, 1.5, 4.0];
        let ys: Vec<f64> = xs.iter().map(|&x| f(x)).collect();
        let spline = QuadraticSpline::fit(&xs, &ys, CurveStage::Expiration).unwrap();

        for x in [-2.0, 0.7, 3.3, 9.0] {
            assert_close(spline.evaluate(x), f(x), 1e-9);
        }
    }

    #[test]
    fn test_many_points_interpolate_and_join_smoothly() {
        let xs = [18_000.0, 20_000.0, 22_000.0, 24_000.0, 25_000.0, 26_000.0, 28_000.0, 30_000.0];
        let ys = [8_400.0, 6_700.0, 5_150.0, 3_800.0, 3_200.0, 2_650.0, 1_750.0, 1_100.0];
        let spline = QuadraticSpline::fit(&xs, &ys, CurveStage::Strike).unwrap();

        assert_eq!(spline.pieces(), xs.len() - 2);
        for (&x, &y) in xs.iter().zip(&ys) {
            assert_close(spline.evaluate(x), y, 1e-6);
        }

        let eps = 1e-6;
        for &k in spline.knots() {
            assert_close(spline.evaluate(k - eps), spline.evaluate(k + eps), 1e-4);
            assert_close(spline.slope(k - eps), spline.slope(k + eps), 1e-6);
        }
    }

    #[test]
    fn test_quadratic_data_reproduced_everywhere() {
        let f = |x: f64| 0.5 * x * x - 4.0 * x + 10.0;
        let xs = [0.0, 1.0, 2.5, 3.0, 5.0, 8.0];
        let ys: Vec<f64> = xs.iter().map(|&x| f(x)).collect();
        let spline = QuadraticSpline::fit(&xs, &ys, CurveStage::Strike).unwrap();

        for x in [-1.0, 0.4, 1.75, 2.8, 4.2, 6.6, 10.0] {
            assert_close(spline.evaluate(x), f(x), 1e-8);
        }
    }

    #[test]
    fn test_extrapolation_continuous_at_edges() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [10.0, 7.0, 5.5, 5.0];
        let spline = QuadraticSpline::fit(&xs, &ys, CurveStage::Strike).unwrap();

        let eps = 1e-7;
        assert_close(spline.evaluate(1.0 - eps), 10.0, 1e-5);
        assert_close(spline.evaluate(4.0 + eps), 5.0, 1e-5);
        assert!(spline.evaluate(0.0).is_finite());
        assert!(spline.evaluate(100.0).is_finite());
    }

    #[test]
    fn test_two_points_rejected() {
        let err = QuadraticSpline::fit(&[1.0, 2.0], &[1.0, 2.0], CurveStage::Strike).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::InsufficientData { stage: CurveStage::Strike, available: 2, required: 3 }
        ));
    }

    #[test]
    fn test_duplicate_abscissae_rejected() {
        let err = QuadraticSpline::fit(&[1.0, 2.0, 2.0], &[1.0, 2.0, 3.0], CurveStage::Expiration)
            .unwrap_err();
        assert!(matches!(err, EstimationError::DegenerateCurve(_)), "got {err}");
    }
}
