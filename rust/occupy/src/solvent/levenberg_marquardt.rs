//! Small dense Levenberg-Marquardt least-squares solver for 1D curve fits.

use tracing::debug;

/// A parametric curve `y = f(x; p)` with an analytic gradient in `p`.
pub trait CurveModel {
    fn n_params(&self) -> usize;
    fn eval(&self, x: f64, params: &[f64]) -> f64;
    /// Writes `∂f/∂p_k` at `x` into `grad`.
    fn gradient(&self, x: f64, params: &[f64], grad: &mut [f64]);
}

#[derive(Debug, Clone, Copy)]
pub struct LmSettings {
    pub max_iterations: usize,
    pub initial_damping: f64,
    /// Stop once the relative decrease of the cost falls below this.
    pub tolerance: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        Self {
            max_iterations: 400,
            initial_damping: 1e-3,
            tolerance: 1e-12,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
}

fn cost<M: CurveModel>(model: &M, x: &[f64], y: &[f64], p: &[f64]) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let r = model.eval(xi, p) - yi;
            r * r
        })
        .sum()
}

/// Solve `a · v = b` in place by Gaussian elimination with partial pivoting.
fn solve_linear(a: &mut [Vec<f64>], b: &mut [f64]) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut v = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * v[k]).sum();
        v[row] = (b[row] - tail) / a[row][row];
    }
    Some(v)
}

/// Fit `model` to the points `(x, y)` starting from `guess`.
///
/// Returns `None` for a guess of the wrong length or a non-finite starting cost.
pub fn fit_curve<M: CurveModel>(
    model: &M,
    x: &[f64],
    y: &[f64],
    guess: &[f64],
    settings: LmSettings,
) -> Option<LmReport> {
    let np = model.n_params();
    if guess.len() != np {
        return None;
    }

    let mut p = guess.to_vec();
    let mut current = cost(model, x, y, &p);
    if !current.is_finite() {
        return None;
    }
    let mut lambda = settings.initial_damping;
    let mut grad = vec![0.0; np];
    let mut iterations = 0;

    while iterations < settings.max_iterations {
        iterations += 1;

        let mut jtj = vec![vec![0.0; np]; np];
        let mut jtr = vec![0.0; np];
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            let r = model.eval(xi, &p) - yi;
            model.gradient(xi, &p, &mut grad);
            for a in 0..np {
                jtr[a] += grad[a] * r;
                for b in 0..np {
                    jtj[a][b] += grad[a] * grad[b];
                }
            }
        }

        let mut improved = false;
        while lambda < 1e16 {
            let mut lhs = jtj.clone();
            for (k, row) in lhs.iter_mut().enumerate() {
                row[k] += lambda * jtj[k][k].max(1e-12);
            }
            let mut rhs: Vec<f64> = jtr.iter().map(|v| -v).collect();
            let Some(step) = solve_linear(&mut lhs, &mut rhs) else {
                lambda *= 10.0;
                continue;
            };
            let candidate: Vec<f64> = p.iter().zip(step.iter()).map(|(a, d)| a + d).collect();
            let next = cost(model, x, y, &candidate);
            if next.is_finite() && next < current {
                let decrease = (current - next) / current.max(f64::MIN_POSITIVE);
                p = candidate;
                current = next;
                lambda = (lambda / 10.0).max(1e-12);
                improved = true;
                if decrease < settings.tolerance {
                    debug!("LM converged after {} iterations", iterations);
                    return Some(LmReport {
                        params: p,
                        cost: current,
                        iterations,
                    });
                }
                break;
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    debug!(
        "LM stopped after {} iterations with cost {:.3e}",
        iterations, current
    );
    Some(LmReport {
        params: p,
        cost: current,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Line;

    impl CurveModel for Line {
        fn n_params(&self) -> usize {
            2
        }
        fn eval(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * x + p[1]
        }
        fn gradient(&self, x: f64, _p: &[f64], grad: &mut [f64]) {
            grad[0] = x;
            grad[1] = 1.0;
        }
    }

    struct Exponential;

    impl CurveModel for Exponential {
        fn n_params(&self) -> usize {
            2
        }
        fn eval(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * (p[1] * x).exp()
        }
        fn gradient(&self, x: f64, p: &[f64], grad: &mut [f64]) {
            let e = (p[1] * x).exp();
            grad[0] = e;
            grad[1] = p[0] * x * e;
        }
    }

    #[test]
    fn test_fits_a_line_exactly() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 2.0).collect();
        let report = fit_curve(&Line, &x, &y, &[0.0, 0.0], LmSettings::default()).unwrap();
        assert!((report.params[0] - 3.0).abs() < 1e-6);
        assert!((report.params[1] + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_fits_nonlinear_decay() {
        let x: Vec<f64> = (0..30).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.5 * (-1.3 * v).exp()).collect();
        let report = fit_curve(&Exponential, &x, &y, &[1.0, -0.5], LmSettings::default()).unwrap();
        assert!((report.params[0] - 2.5).abs() < 1e-4, "{:?}", report.params);
        assert!((report.params[1] + 1.3).abs() < 1e-4, "{:?}", report.params);
    }

    #[test]
    fn test_solve_linear_small_system() {
        let mut a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let mut b = vec![3.0, 5.0];
        let v = solve_linear(&mut a, &mut b).unwrap();
        assert!((v[0] - 0.8).abs() < 1e-12);
        assert!((v[1] - 1.4).abs() < 1e-12);
    }
}
