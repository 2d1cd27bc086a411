use tracing::{
    debug,
    instrument,
};

use crate::diagnostics::{
    CONFIDENCE_FIGURE,
    DiagnosticsSink,
};
use crate::errors::Result;
use crate::histogram::Histogram;
use crate::solvent::SolventModelParams;
use crate::volume::{
    Volume,
    uniscale,
};

/// Added to the histogram density before taking the content ratio.
const DENSITY_FLOOR: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct Confidence {
    /// Per-voxel confidence in [0,1].
    pub field: Volume,
    /// Confidence per histogram level, lowest intensity first.
    pub curve: Vec<f64>,
}

/// Walk from the top level down, keeping the curve non-increasing with a
/// non-decreasing drop. Everything below the first non-positive level is
/// zero.
fn enforce_monotone(curve: &mut [f64]) {
    let n = curve.len();
    if n < 2 {
        return;
    }
    let mut drop = 0.0;
    for i in (0..n - 1).rev() {
        curve[i] = curve[i].min(curve[i + 1]).min(curve[i + 1] - drop);
        drop = curve[i + 1] - curve[i];
        if i > 0 && curve[i - 1] <= 0.0 {
            curve[..i].iter_mut().for_each(|c| *c = 0.0);
            break;
        }
    }
    curve.iter_mut().for_each(|c| *c = c.clamp(0.0, 1.0));
}

/// Curve entry read by a voxel at rescaled level `u`.
#[inline]
fn curve_index(u: f32, n: usize) -> usize {
    ((u as f64 * n as f64 - 1.0) as i64).clamp(0, n as i64 - 1) as usize
}

/// Confidence that each voxel holds content rather than solvent.
///
/// The histogram of `data` is compared against the solvent component of the
/// fitted model; the excess fraction per level becomes the confidence curve,
/// which voxels then look up by their rescaled intensity. A `hedge` above 1
/// raises the curve to that power.
///
/// A voxel at rescaled level `u` reads entry `trunc(u·n − 1)` of the curve,
/// clamped to `[0, n − 1]`, one below `floor(u·n)`.
#[instrument(skip_all, fields(n_levels = n_levels))]
pub fn estimate_confidence(
    data: &Volume,
    params: &SolventModelParams,
    hedge: Option<f64>,
    n_levels: usize,
    sink: &mut DiagnosticsSink,
) -> Result<Confidence> {
    let hist = Histogram::density(data.data(), n_levels);
    let n = hist.n_bins();
    let solvent = params.solvent();

    let mut curve: Vec<f64> = hist
        .density
        .iter()
        .zip(hist.edges.iter())
        .map(|(&a, &b)| {
            let fit = solvent.eval(b).max(0.0);
            (a + DENSITY_FLOOR - fit) / (a + DENSITY_FLOOR)
        })
        .collect();
    enforce_monotone(&mut curve);
    sink.add_series(
        CONFIDENCE_FIGURE,
        "confidence",
        hist.edges[..n].to_vec(),
        curve.clone(),
    );

    if let Some(power) = hedge.filter(|&p| p > 1.0) {
        debug!("Hedging confidence with power {}", power);
        curve.iter_mut().for_each(|c| *c = c.powf(power));
        sink.add_series(
            CONFIDENCE_FIGURE,
            "hedged confidence",
            hist.edges[..n].to_vec(),
            curve.clone(),
        );
    }

    let levels = uniscale(data.data());
    let field: Vec<f32> = levels
        .iter()
        .map(|&u| {
            curve[curve_index(u, n)].clamp(0.0, 1.0) as f32
        })
        .collect();

    Ok(Confidence {
        field: data.with_data(field)?,
        curve,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvent::GaussianComponent;

    #[test]
    fn test_monotone_walk() {
        let mut curve = vec![0.3, 0.1, 0.5, 0.4, 0.9, 1.0];
        enforce_monotone(&mut curve);
        for w in curve.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert_eq!(curve[5], 1.0);
        assert_eq!(curve[4], 0.9);
    }

    #[test]
    fn test_negative_tail_zeroed() {
        let mut curve = vec![0.8, -0.5, 0.2, 0.6, 1.0];
        enforce_monotone(&mut curve);
        assert_eq!(curve[0], 0.0);
        assert_eq!(curve[1], 0.0);
        assert!(curve[2] > 0.0);
    }

    #[test]
    fn test_curve_index_sits_one_below_floor() {
        assert_eq!(curve_index(0.0, 10), 0);
        assert_eq!(curve_index(0.05, 10), 0);
        assert_eq!(curve_index(0.55, 10), 4);
        assert_eq!(curve_index(0.95, 10), 8);
        assert_eq!(curve_index(1.0, 10), 9);
    }

    fn two_population_volume() -> Volume {
        // Solvent around 0 for most voxels, content at 4 in the middle.
        let mut state = 7u64;
        Volume::from_fn(32, 1.0, |x, y, z| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let u1 = ((state >> 11) as f64 / (1u64 << 53) as f64).max(1e-12);
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let u2 = (state >> 11) as f64 / (1u64 << 53) as f64;
            let noise = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            let inside = (8..24).contains(&x) && (8..24).contains(&y) && (8..24).contains(&z);
            (noise * 0.5 + if inside { 4.0 } else { 0.0 }) as f32
        })
    }

    #[test]
    fn test_confidence_curve_properties() {
        let data = two_population_volume();
        let outside = 1.0 - (16.0f64 / 32.0).powi(3);
        // Density of the solvent peak in the full-volume histogram.
        let height = outside / (0.5 * (2.0 * std::f64::consts::PI).sqrt());
        let params = SolventModelParams {
            components: vec![GaussianComponent {
                scale: height,
                mean: 0.0,
                sigma: 0.5,
            }],
        };
        let mut sink = DiagnosticsSink::new();
        let conf = estimate_confidence(&data, &params, None, 200, &mut sink).unwrap();

        assert_eq!(conf.curve.len(), 200);
        for w in conf.curve.windows(2) {
            assert!(w[0] <= w[1] + 1e-12);
        }
        for w in conf.curve.windows(3) {
            if w[0] > 0.0 {
                assert!(w[1] - w[0] >= w[2] - w[1] - 1e-12);
            }
        }
        assert!(conf.field.data().iter().all(|c| (0.0..=1.0).contains(c)));
        let (mut inside, mut solvent) = (Vec::new(), Vec::new());
        for z in 0..32 {
            for y in 0..32 {
                for x in 0..32 {
                    let c = conf.field.get(x, y, z) as f64;
                    if [x, y, z].iter().all(|i| (8..24).contains(i)) {
                        inside.push(c);
                    } else {
                        solvent.push(c);
                    }
                }
            }
        }
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        assert!(mean(&inside) > 0.9);
        assert!(mean(&solvent) < 0.2);
        assert!(sink.figure(CONFIDENCE_FIGURE).is_some());
    }

    #[test]
    fn test_hedge_lowers_confidence() {
        let data = two_population_volume();
        let params = SolventModelParams {
            components: vec![GaussianComponent {
                scale: 0.7,
                mean: 0.0,
                sigma: 0.5,
            }],
        };
        let mut sink = DiagnosticsSink::disabled();
        let plain = estimate_confidence(&data, &params, None, 100, &mut sink).unwrap();
        let hedged = estimate_confidence(&data, &params, Some(3.0), 100, &mut sink).unwrap();
        for (p, h) in plain.field.data().iter().zip(hedged.field.data().iter()) {
            assert!(h <= p);
        }
    }
}
