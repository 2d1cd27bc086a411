//! Gaussian solvent model fitted to the intensity histogram of a map.
//!
//! The fitted model yields four intensity thresholds bracketing the solvent
//! peak and feeds the confidence estimate. [`suppress`] blends modified and
//! unmodified maps by that confidence.

pub mod levenberg_marquardt;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    warn,
};

use crate::diagnostics::{
    DiagnosticsSink,
    SOLVENT_FIGURE,
};
use crate::errors::{
    OccupyError,
    Result,
};
use crate::histogram::{
    Histogram,
    linspace,
};
use crate::radial_mask::RadialMask;
use crate::volume::Volume;
use levenberg_marquardt::{
    CurveModel,
    LmSettings,
    fit_curve,
};

/// Tolerance used to keep model ratios finite.
const FIT_TOLERANCE: f64 = 0.001;

/// Content or solvent fraction regarded as negligible in the threshold scans.
const NEGLIGIBLE_FRACTION: f64 = 0.01;

/// Sigma substituted for a degenerate zero-width component.
const MIN_SIGMA: f64 = 0.001;

/// Broad content component seed width, as a fraction of the data range.
const CONTENT_WIDTH_DIVISOR: f64 = 20.0;

/// One Gaussian component `scale * exp(-(x - mean)² / (2 sigma²))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub scale: f64,
    pub mean: f64,
    pub sigma: f64,
}

impl GaussianComponent {
    pub fn eval(&self, x: f64) -> f64 {
        one_component(x, self.scale, self.mean, self.sigma)
    }
}

/// Single Gaussian; a zero sigma is replaced by a small positive one.
pub fn one_component(x: f64, c: f64, mu: f64, sigma: f64) -> f64 {
    let sigma = if sigma == 0.0 { MIN_SIGMA } else { sigma };
    c * (-(x - mu).powi(2) / (2.0 * sigma * sigma)).exp()
}

/// Sum of two Gaussians.
pub fn two_component(x: f64, first: &GaussianComponent, second: &GaussianComponent) -> f64 {
    first.eval(x) + second.eval(x)
}

/// Number of Gaussian components in the solvent model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolventComponents {
    #[default]
    #[serde(rename = "one")]
    One,
    #[serde(rename = "two")]
    Two,
}

impl SolventComponents {
    fn count(self) -> usize {
        match self {
            SolventComponents::One => 1,
            SolventComponents::Two => 2,
        }
    }
}

struct GaussianMixture {
    components: usize,
}

impl CurveModel for GaussianMixture {
    fn n_params(&self) -> usize {
        3 * self.components
    }

    fn eval(&self, x: f64, p: &[f64]) -> f64 {
        p.chunks_exact(3)
            .map(|c| one_component(x, c[0], c[1], c[2]))
            .sum()
    }

    fn gradient(&self, x: f64, p: &[f64], grad: &mut [f64]) {
        for (c, g) in p.chunks_exact(3).zip(grad.chunks_exact_mut(3)) {
            let sigma = if c[2] == 0.0 { MIN_SIGMA } else { c[2] };
            let d = x - c[1];
            let e = (-(d * d) / (2.0 * sigma * sigma)).exp();
            g[0] = e;
            g[1] = c[0] * e * d / (sigma * sigma);
            g[2] = c[0] * e * d * d / (sigma * sigma * sigma);
        }
    }
}

/// Fitted solvent model. The first component is the solvent peak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolventModelParams {
    pub components: Vec<GaussianComponent>,
}

impl SolventModelParams {
    pub fn solvent(&self) -> GaussianComponent {
        self.components[0]
    }

    pub fn eval(&self, x: f64) -> f64 {
        match self.components.as_slice() {
            [solvent] => solvent.eval(x),
            [solvent, content] => two_component(x, solvent, content),
            rest => rest.iter().map(|c| c.eval(x)).sum(),
        }
    }
}

/// Intensity thresholds `[low, mid-low, mid-high, high]` around the solvent peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolventLimits(pub [f64; 4]);

impl SolventLimits {
    /// Lowest value where the model exceeds unit density.
    pub fn low(&self) -> f64 {
        self.0[0]
    }
    /// Where solvent first makes up a non-negligible fraction.
    pub fn mid_low(&self) -> f64 {
        self.0[1]
    }
    /// Content at 1% of solvent.
    pub fn mid_high(&self) -> f64 {
        self.0[2]
    }
    /// Solvent drop to 0% (edge).
    pub fn high(&self) -> f64 {
        self.0[3]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolventFit {
    pub limits: SolventLimits,
    pub params: SolventModelParams,
}

/// Fit a 1- or 2-Gaussian solvent model to the histogram of `data`.
///
/// Seeds the solvent peak at the histogram mode, its height at the mode
/// density and its width at the 1/e drop, refines by least squares, then
/// scans the fitted model from both ends of the domain for the four
/// [`SolventLimits`]. The downward scans (high, mid-high) failing to stop
/// before the first level is a [`OccupyError::ModelBounds`]; the upward scans
/// settle on the last level.
pub fn fit_solvent_to_histogram(
    data: &[f32],
    n_levels: usize,
    components: SolventComponents,
    sink: &mut DiagnosticsSink,
) -> Result<SolventFit> {
    if data.is_empty() {
        return Err(OccupyError::ModelBounds {
            threshold: "solvent sample",
            context: "no voxels available to fit the solvent model".to_string(),
        });
    }
    if n_levels < 3 {
        return Err(OccupyError::config(format!(
            "solvent fit needs at least 3 histogram levels, got {}",
            n_levels
        )));
    }

    let hist = Histogram::density(data, n_levels);
    let a = &hist.density;
    let b = &hist.edges;
    let d_domain = hist.bin_width();

    let peak_index = hist.mode_index();
    let solvent_peak = b[peak_index];
    let solvent_scale = a[peak_index];
    let mut c = peak_index;
    while c < n_levels - 1 && a[c] >= solvent_scale / std::f64::consts::E {
        c += 1;
    }
    let solvent_width = ((c - peak_index) as f64 * d_domain).max(d_domain);

    let low = b[0];
    let high = b[n_levels];
    let domain = linspace(low, high, n_levels);

    let mut guess = vec![solvent_scale, solvent_peak, solvent_width];
    if components == SolventComponents::Two {
        let mean = data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64;
        guess.extend([
            solvent_scale / 10.0,
            mean,
            (high - low) / CONTENT_WIDTH_DIVISOR,
        ]);
    }

    let model = GaussianMixture {
        components: components.count(),
    };
    let report = fit_curve(&model, &domain, a, &guess, LmSettings::default()).ok_or_else(|| {
        OccupyError::ModelBounds {
            threshold: "fit",
            context: "non-finite solvent model cost".to_string(),
        }
    })?;
    if report.params.iter().any(|p| !p.is_finite()) {
        return Err(OccupyError::ModelBounds {
            threshold: "fit",
            context: format!("non-finite solvent parameters {:?}", report.params),
        });
    }

    let params = SolventModelParams {
        components: report
            .params
            .chunks_exact(3)
            .map(|c| GaussianComponent {
                scale: c[0],
                mean: c[1],
                sigma: c[2].abs(),
            })
            .collect(),
    };
    debug!(
        "Solvent model fitted in {} iterations: {:?}",
        report.iterations, params
    );

    let solvent_model: Vec<f64> = domain.iter().map(|&x| params.eval(x)).collect();
    let model_max = solvent_model.iter().copied().fold(f64::MIN, f64::max);
    let floor = FIT_TOLERANCE * FIT_TOLERANCE;
    let fit: Vec<f64> = solvent_model
        .iter()
        .map(|&m| m.max(floor).min(model_max.max(floor)))
        .collect();

    let content_fraction: Vec<f64> = a
        .iter()
        .zip(fit.iter())
        .map(|(&h, &f)| (h + FIT_TOLERANCE - f) / (h + FIT_TOLERANCE))
        .collect();

    let limits = solvent_thresholds(&solvent_model, &content_fraction, b)?;

    if sink.is_enabled() {
        let centers: Vec<f64> = b[..n_levels].to_vec();
        sink.add_series(SOLVENT_FIGURE, "data", centers, a.clone());
        let guess_model = GaussianMixture { components: 1 };
        sink.add_series(
            SOLVENT_FIGURE,
            "solvent guess",
            domain.clone(),
            domain
                .iter()
                .map(|&x| guess_model.eval(x, &guess[..3]))
                .collect(),
        );
        sink.add_series(SOLVENT_FIGURE, "solvent fit", domain, fit);
        sink.add_marker(SOLVENT_FIGURE, "solvent edge", limits.high());
        sink.add_marker(SOLVENT_FIGURE, "content 1% of solvent", limits.mid_high());
    }

    info!(
        "Detected data limits for solvent: {:.4} : {:.4} : {:.4} : {:.4}",
        limits.0[0], limits.0[1], limits.0[2], limits.0[3]
    );
    Ok(SolventFit { limits, params })
}

/// Scan the fitted model for the four solvent thresholds.
fn solvent_thresholds(
    solvent_model: &[f64],
    content_fraction: &[f64],
    edges: &[f64],
) -> Result<SolventLimits> {
    let n = solvent_model.len();
    let tol3 = FIT_TOLERANCE.powi(3);
    let out_of_domain = |threshold: &'static str| OccupyError::ModelBounds {
        threshold,
        context: format!("scanned all {} histogram levels", n),
    };

    let mut high = n - 1;
    while solvent_model[high] < tol3 && high > 0 {
        high -= 1;
    }
    if high == 0 {
        return Err(out_of_domain("high"));
    }

    let mut mid_high = n - 1;
    while content_fraction[mid_high] > NEGLIGIBLE_FRACTION && mid_high > 0 {
        mid_high -= 1;
    }
    if mid_high == 0 {
        return Err(out_of_domain("midhigh"));
    }

    let mut mid_low = 0;
    while 1.0 - content_fraction[mid_low] > NEGLIGIBLE_FRACTION && mid_low < n - 1 {
        mid_low += 1;
    }
    if mid_low == n - 1 {
        warn!("Solvent fraction never drops below 1%, mid-low threshold set to the domain edge");
    }

    // A density model whose peak stays below 1 never crosses; the scan then
    // settles on the last level.
    let mut low = 0;
    while solvent_model[low] < 1.0 && low < n - 1 {
        low += 1;
    }
    if low == n - 1 {
        debug!("Solvent model stays below unit density, low threshold at the domain edge");
    }

    Ok(SolventLimits([
        edges[low],
        edges[mid_low],
        edges[mid_high + 1],
        edges[high],
    ]))
}

/// Blend a modified map with the unmodified one by voxel confidence.
///
/// `out = modified * confidence`, plus `unmodified * (1 - confidence)` unless
/// solvent is excluded.
pub fn suppress(
    modified: &Volume,
    unmodified: &Volume,
    confidence: &Volume,
    exclude_solvent: bool,
) -> Result<Volume> {
    let weighted = modified.zip_map(confidence, |m, c| m * c)?;
    if exclude_solvent {
        debug!("Not retaining input solvent");
        return Ok(weighted);
    }
    debug!("Retaining solvent from input");
    let retained = unmodified.zip_map(confidence, |u, c| u * (1.0 - c))?;
    weighted.zip_map(&retained, |w, r| w + r)
}

fn variance(values: &[f32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    Some(values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n)
}

/// Pick the solvent sample from a user solvent definition.
///
/// The definition may cover either the content or the solvent; whichever
/// side (above or below 0.5, inside `radial`) has the smaller variance is
/// taken as solvent.
pub fn smallest_variance_region(
    data: &Volume,
    definition: &Volume,
    radial: &RadialMask,
) -> Result<Vec<f32>> {
    if definition.n() != data.n() || radial.size() != data.n() || radial.dim() != 3 {
        return Err(OccupyError::InputShape {
            shape: definition.shape(),
            context: "Solvent definition",
        });
    }
    let mut above = Vec::new();
    let mut below = Vec::new();
    for ((&v, &d), &inside) in data
        .data()
        .iter()
        .zip(definition.data().iter())
        .zip(radial.values().iter())
    {
        if !inside {
            continue;
        }
        if d > 0.5 {
            above.push(v);
        } else {
            below.push(v);
        }
    }
    match (variance(&above), variance(&below)) {
        (Some(va), Some(vb)) => {
            if va < vb {
                info!("Solvent definition covers solvent ({} voxels)", above.len());
                Ok(above)
            } else {
                info!("Solvent definition covers content ({} solvent voxels)", below.len());
                Ok(below)
            }
        }
        (Some(_), None) => {
            warn!("Solvent definition leaves no voxels on its low side");
            Ok(above)
        }
        (None, Some(_)) => {
            warn!("Solvent definition leaves no voxels on its high side");
            Ok(below)
        }
        (None, None) => Err(OccupyError::config(
            "solvent definition selects no voxels inside the radial mask",
        )),
    }
}
