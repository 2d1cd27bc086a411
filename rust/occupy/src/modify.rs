//! Scale-dependent modification of map intensities.
//!
//! An input voxel is read as full-scale intensity times its estimated scale.
//! Amplification raises partial scales toward full, attenuation pushes them
//! toward zero, and the sigmoid does both around a pivot scale that maps to
//! itself.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{
    Distribution,
    Normal,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    instrument,
};

use crate::diagnostics::{
    DiagnosticsSink,
    MODIFICATION_FIGURE,
};
use crate::errors::{
    OccupyError,
    Result,
};
use crate::histogram::linspace;
use crate::volume::Volume;

/// Scales at or below this are left unmodified unless configured otherwise.
pub const DEFAULT_SCALE_THRESHOLD: f32 = 0.05;

/// Resolution of the sigmoid lookup table.
pub const SIGMOID_LEVELS: usize = 1000;

/// Sentinel for thresholded scale values; its magnitude keeps them unmodified.
const UNMODIFIED: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModificationMode {
    /// Output follows `scale^(1/power)`.
    Amplify { power: f64 },
    /// Output follows `scale^power`.
    Attenuate { power: f64 },
    /// Output follows a sigmoid of order `power` that keeps `pivot` fixed.
    Sigmoid { power: f64, pivot: f64 },
}

impl ModificationMode {
    /// Build a mode from optional settings, of which exactly one must be set.
    /// A sigmoid needs both its power and its pivot.
    pub fn from_options(
        amplify: Option<f64>,
        attenuate: Option<f64>,
        sigmoid: Option<f64>,
        pivot: Option<f64>,
    ) -> Result<Self> {
        let mode = match (amplify, attenuate, sigmoid) {
            (Some(power), None, None) => ModificationMode::Amplify { power },
            (None, Some(power), None) => ModificationMode::Attenuate { power },
            (None, None, Some(power)) => {
                let pivot = pivot.ok_or_else(|| {
                    OccupyError::config("sigmoid modification requires a pivot")
                })?;
                ModificationMode::Sigmoid { power, pivot }
            }
            _ => {
                return Err(OccupyError::config(format!(
                    "a modification performs exactly one action: amplify={}, attenuate={}, sigmoid={}",
                    amplify.is_some(),
                    attenuate.is_some(),
                    sigmoid.is_some()
                )));
            }
        };
        mode.validate()?;
        Ok(mode)
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            ModificationMode::Amplify { power } | ModificationMode::Attenuate { power } => {
                if !(power > 1.0) || !power.is_finite() {
                    return Err(OccupyError::config(format!(
                        "gamma power must exceed 1, got {}",
                        power
                    )));
                }
            }
            ModificationMode::Sigmoid { power, pivot } => {
                if !(power >= 1.0) || !power.is_finite() {
                    return Err(OccupyError::config(format!(
                        "sigmoid power must be at least 1, got {}",
                        power
                    )));
                }
                if !(pivot > 0.0 && pivot < 1.0) {
                    return Err(OccupyError::config(format!(
                        "sigmoid pivot must lie in (0,1), got {}",
                        pivot
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn power(&self) -> f64 {
        match *self {
            ModificationMode::Amplify { power }
            | ModificationMode::Attenuate { power }
            | ModificationMode::Sigmoid { power, .. } => power,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModificationMode::Amplify { .. } => "amplify",
            ModificationMode::Attenuate { .. } => "attenuate",
            ModificationMode::Sigmoid { .. } => "sigmoid",
        }
    }

    /// Output file prefix, e.g. `attn_2.0` or `sigm_3.0-0.25`.
    pub fn file_prefix(&self) -> String {
        match *self {
            ModificationMode::Amplify { power } => format!("ampl_{:.1}", power),
            ModificationMode::Attenuate { power } => format!("attn_{:.1}", power),
            ModificationMode::Sigmoid { power, pivot } => format!("sigm_{:.1}-{:.2}", power, pivot),
        }
    }

    /// Whether removed intensity is refilled with synthetic solvent.
    pub fn refills_solvent(&self) -> bool {
        !matches!(self, ModificationMode::Amplify { .. })
    }
}

/// Keep scales above `threshold`; mark the rest with the unmodified sentinel.
pub fn threshold_scale_map(scale: &[f32], threshold: f32) -> Vec<f32> {
    scale
        .iter()
        .map(|&s| if s > threshold { s } else { UNMODIFIED })
        .collect()
}

/// Gamma modification factor `|s|^(1/γ - 1)` when amplifying or
/// `|s|^(γ - 1)` when attenuating.
pub fn modify_scale_gamma(thresholded: &[f32], gamma: f64, amplify: bool) -> Result<Vec<f32>> {
    if !(gamma > 1.0) {
        return Err(OccupyError::config(format!(
            "gamma-exponentiation of scale by {} is not permitted",
            gamma
        )));
    }
    let exponent = (if amplify { 1.0 / gamma - 1.0 } else { gamma - 1.0 }) as f32;
    Ok(thresholded.iter().map(|s| s.abs().powf(exponent)).collect())
}

/// Midpoint for which the order-`order` sigmoid maps `pivot` onto itself.
pub fn sigmoid_effective_mu(pivot: f64, order: f64) -> f64 {
    let k = (1.0 / pivot - 1.0).powf(-1.0 / order) * (1.0 - pivot) / pivot;
    1.0 / (1.0 + k)
}

/// `1 / (1 + (μ(1-x) / (x(1-μ)))^m)` on [0,1], made non-decreasing.
pub fn sigmoid_scale(x: &[f64], mu: f64, order: f64) -> Vec<f64> {
    let mut out: Vec<f64> = x
        .iter()
        .map(|&x| {
            if x <= 0.0 {
                return 0.0;
            }
            let ratio = (mu * (1.0 - x) / (x * (1.0 - mu))).powf(order);
            (1.0 / (ratio + 1.0)).clamp(0.0, 1.0)
        })
        .collect();
    for i in 1..out.len() {
        if out[i] < out[i - 1] {
            out[i] = out[i - 1];
        }
    }
    out
}

/// Sigmoid transfer table over `n` evenly spaced scales in [0,1].
pub fn scale_mapping_sigmoid(pivot: f64, order: f64, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mu = sigmoid_effective_mu(pivot, order);
    let x = linspace(0.0, 1.0, n);
    let s = sigmoid_scale(&x, mu, order);
    (x, s)
}

/// Sigmoid modification factor: the table value at the voxel scale divided
/// by that scale. Scales at or below `threshold` are left unmodified.
pub fn modify_scale_sigmoid(scale: &[f32], threshold: f32, power: f64, pivot: f64) -> Vec<f32> {
    let (_, table) = scale_mapping_sigmoid(pivot, power, SIGMOID_LEVELS + 1);
    scale
        .iter()
        .map(|&s| {
            if s > threshold && s > 0.0 {
                let index = ((s.abs() as f64 * SIGMOID_LEVELS as f64).round() as usize)
                    .min(SIGMOID_LEVELS);
                (table[index] / s as f64) as f32
            } else {
                1.0
            }
        })
        .collect()
}

/// Modification factor per voxel for `mode`.
pub fn modification_factor(scale: &[f32], mode: &ModificationMode, threshold: f32) -> Result<Vec<f32>> {
    mode.validate()?;
    match *mode {
        ModificationMode::Amplify { power } => {
            modify_scale_gamma(&threshold_scale_map(scale, threshold), power, true)
        }
        ModificationMode::Attenuate { power } => {
            modify_scale_gamma(&threshold_scale_map(scale, threshold), power, false)
        }
        ModificationMode::Sigmoid { power, pivot } => {
            Ok(modify_scale_sigmoid(scale, threshold, power, pivot))
        }
    }
}

#[derive(Debug, Clone)]
pub struct Modified {
    pub map: Volume,
    /// Per-voxel factor applied to the input.
    pub modification: Volume,
}

/// Apply a scale-dependent modification to `data`.
///
/// With `fake_solvent`, intensity removed by the modification is refilled
/// with it in proportion to `1 - modification`.
#[instrument(skip_all, fields(mode = mode.name()))]
pub fn modify(
    data: &Volume,
    scale: &Volume,
    mode: &ModificationMode,
    threshold: f32,
    fake_solvent: Option<&Volume>,
    sink: &mut DiagnosticsSink,
) -> Result<Modified> {
    if !(0.0..1.0).contains(&threshold) {
        return Err(OccupyError::config(format!(
            "scale threshold must lie in [0,1), got {}",
            threshold
        )));
    }
    info!(
        "Modifying with {} (power {:.2}), scales at or below {:.1}% untouched",
        mode.name(),
        mode.power(),
        100.0 * threshold
    );

    let factor = modification_factor(scale.data(), mode, threshold)?;
    let modification = scale.with_data(factor)?;
    let mut map = data.zip_map(&modification, |d, m| d * m)?;

    if let Some(fake) = fake_solvent {
        debug!("Refilling attenuated regions with synthetic solvent");
        let refill = fake.zip_map(&modification, |f, m| f * (1.0 - m).clamp(0.0, 1.0))?;
        map = map.zip_map(&refill, |m, r| m + r)?;
    }

    record_transfer(mode, threshold, sink);
    Ok(Modified { map, modification })
}

fn record_transfer(mode: &ModificationMode, threshold: f32, sink: &mut DiagnosticsSink) {
    if !sink.is_enabled() {
        return;
    }
    let x = linspace(0.0, 1.0, 101);
    let scales: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    if let Ok(factor) = modification_factor(&scales, mode, threshold) {
        let y = x.iter().zip(factor.iter()).map(|(&s, &f)| s * f as f64).collect();
        sink.add_series(MODIFICATION_FIGURE, &mode.file_prefix(), x, y);
    }
    sink.add_marker(MODIFICATION_FIGURE, "scale threshold", threshold as f64);
    if let ModificationMode::Sigmoid { pivot, .. } = mode {
        sink.add_marker(MODIFICATION_FIGURE, "pivot", *pivot);
    }
}

/// Gaussian noise drawn from the solvent model, seeded for reproducibility
/// when `seed` is given.
pub fn fake_solvent(n: usize, voxel_size: f32, mu: f64, sigma: f64, seed: Option<u64>) -> Result<Volume> {
    let normal = Normal::new(mu, sigma.abs()).map_err(|e| {
        OccupyError::config(format!(
            "cannot draw solvent from N({}, {}): {}",
            mu, sigma, e
        ))
    })?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let data = (0..n * n * n)
        .map(|_| normal.sample(&mut rng) as f32)
        .collect();
    Volume::new(n, voxel_size, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_mode() {
        assert!(ModificationMode::from_options(Some(2.0), Some(2.0), None, None).is_err());
        assert!(ModificationMode::from_options(None, None, None, None).is_err());
        assert!(ModificationMode::from_options(None, None, Some(2.0), None).is_err());
        assert_eq!(
            ModificationMode::from_options(None, Some(3.0), None, None).unwrap(),
            ModificationMode::Attenuate { power: 3.0 }
        );
        assert!(ModificationMode::from_options(Some(1.0), None, None, None).is_err());
        assert!(ModificationMode::from_options(None, None, Some(2.0), Some(1.0)).is_err());
    }

    #[test]
    fn test_threshold_marks_low_scale() {
        let t = threshold_scale_map(&[0.0, 0.05, 0.06, 1.0], 0.05);
        assert_eq!(t, vec![-1.0, -1.0, 0.06, 1.0]);
    }

    #[test]
    fn test_gamma_exponents() {
        let a = modify_scale_gamma(&[0.25, -1.0, 1.0], 2.0, true).unwrap();
        assert!((a[0] - 2.0).abs() < 1e-6);
        assert_eq!(a[1], 1.0);
        assert_eq!(a[2], 1.0);
        let b = modify_scale_gamma(&[0.25], 2.0, false).unwrap();
        assert!((b[0] - 0.25).abs() < 1e-7);
        assert!(modify_scale_gamma(&[0.5], 1.0, true).is_err());
    }

    #[test]
    fn test_sigmoid_fixed_point() {
        for pivot in [0.1, 0.25, 0.5, 0.8] {
            for order in [1.0, 2.0, 5.5, 10.0] {
                let mu = sigmoid_effective_mu(pivot, order);
                let s = sigmoid_scale(&[pivot], mu, order);
                assert!((s[0] - pivot).abs() < 1e-9, "pivot {} order {}", pivot, order);
            }
        }
    }

    #[test]
    fn test_sigmoid_table_shape() {
        let (x, s) = scale_mapping_sigmoid(0.3, 4.0, 101);
        assert_eq!(x.len(), 101);
        assert_eq!(s[0], 0.0);
        assert!((s[100] - 1.0).abs() < 1e-12);
        assert!(s.windows(2).all(|w| w[0] <= w[1]));
        assert!(s[10] < x[10]);
        assert!(s[60] > x[60]);
    }

    #[test]
    fn test_sigmoid_keeps_pivot_and_threshold() {
        let m = modify_scale_sigmoid(&[0.25, 0.01, 0.0], 0.05, 3.0, 0.25);
        assert!((m[0] - 1.0).abs() < 1e-5);
        assert_eq!(m[1], 1.0);
        assert_eq!(m[2], 1.0);
    }

    #[test]
    fn test_full_scale_untouched_by_amplify() {
        let data = Volume::from_fn(4, 1.0, |x, y, z| (x * y + z) as f32 - 3.0);
        let scale = data.map(|_| 1.0);
        let mut sink = DiagnosticsSink::disabled();
        for power in [1.5, 2.0, 10.0] {
            let out = modify(
                &data,
                &scale,
                &ModificationMode::Amplify { power },
                DEFAULT_SCALE_THRESHOLD,
                None,
                &mut sink,
            )
            .unwrap();
            assert_eq!(out.map.data(), data.data());
        }
    }

    #[test]
    fn test_attenuate_half_scale() {
        let data = Volume::from_fn(4, 1.0, |x, y, z| (x + 2 * y + 3 * z) as f32);
        let scale = data.map(|_| 0.5);
        let mut sink = DiagnosticsSink::new();
        let out = modify(
            &data,
            &scale,
            &ModificationMode::Attenuate { power: 2.0 },
            DEFAULT_SCALE_THRESHOLD,
            None,
            &mut sink,
        )
        .unwrap();
        for (o, d) in out.map.data().iter().zip(data.data().iter()) {
            assert!((o - d * 0.5).abs() < 1e-6);
        }
        assert!(out.modification.data().iter().all(|&m| (m - 0.5).abs() < 1e-7));
        assert!(sink.figure(MODIFICATION_FIGURE).is_some());
    }

    #[test]
    fn test_fake_solvent_refills() {
        let data = Volume::zeros(4, 1.0);
        let scale = data.map(|_| 0.5);
        let fake = data.map(|_| 2.0);
        let mut sink = DiagnosticsSink::disabled();
        let out = modify(
            &data,
            &scale,
            &ModificationMode::Attenuate { power: 3.0 },
            DEFAULT_SCALE_THRESHOLD,
            Some(&fake),
            &mut sink,
        )
        .unwrap();
        // modification 0.25, refill 2 * 0.75
        assert!(out.map.data().iter().all(|&v| (v - 1.5).abs() < 1e-6));
    }

    #[test]
    fn test_fake_solvent_seeded() {
        let a = fake_solvent(8, 1.0, 0.5, 0.1, Some(3)).unwrap();
        let b = fake_solvent(8, 1.0, 0.5, 0.1, Some(3)).unwrap();
        assert_eq!(a.data(), b.data());
        assert!((a.mean() - 0.5).abs() < 0.02);
        assert!(fake_solvent(8, 1.0, 0.0, f64::NAN, None).is_err());
    }
}
