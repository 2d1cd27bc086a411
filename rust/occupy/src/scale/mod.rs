//! Local scale estimation.
//!
//! The scale of a voxel is the maximum over a spherical neighbourhood,
//! divided by a robust estimate of full-scale intensity. That normalization
//! constant is either a fraction of the global maximum or the largest
//! τ-percentile found over a grid of tiles.

pub mod dilation;
pub mod kernel;
pub mod tiling;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::errors::{
    OccupyError,
    Result,
};
use crate::radial_mask::RadialMask;
use crate::volume::Volume;

pub use dilation::grey_dilation;
pub use kernel::{
    max_kernel_radius,
    set_tau,
    spherical_kernel,
};
pub use tiling::{
    DEFAULT_N_TILES,
    DEFAULT_TILE_SIZE,
    TileDiagnostics,
    TileExtremum,
    TilePolicy,
    Tiling,
    compute_tiling,
    percentile_scan,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    /// `tau * max(data)`.
    Naive,
    /// Largest per-tile τ-percentile.
    #[default]
    Tiled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileSettings {
    pub n_tiles: usize,
    pub tile_size: Option<usize>,
    pub policy: TilePolicy,
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            n_tiles: DEFAULT_N_TILES,
            tile_size: Some(DEFAULT_TILE_SIZE),
            policy: TilePolicy::Sphere,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScaleField {
    /// Per-voxel scale in [0,1].
    pub scale: Volume,
    pub full_scale: f32,
    /// Only set for tiled normalization.
    pub tiles: Option<TileDiagnostics>,
}

#[instrument(skip_all, fields(n = data.n(), tau = tau))]
pub fn estimate(
    data: &Volume,
    kernel: &RadialMask,
    tau: f64,
    tiles: &TileSettings,
    mode: NormalizationMode,
) -> Result<ScaleField> {
    if !(tau > 0.0 && tau <= 1.0) {
        return Err(OccupyError::config(format!(
            "tau must lie in (0,1], got {}",
            tau
        )));
    }
    if kernel.dim() != 3 {
        return Err(OccupyError::config("the scale kernel must be three-dimensional"));
    }

    let (full_scale, diagnostics) = match mode {
        NormalizationMode::Naive => {
            let full = (tau * data.max() as f64) as f32;
            debug!("Naive full scale {:.4}", full);
            (full, None)
        }
        NormalizationMode::Tiled => {
            let tiling = compute_tiling(data.n(), tiles.tile_size, tiles.n_tiles)?;
            let diag = percentile_scan(data, &tiling, tau, tiles.policy)?;
            info!(
                "Full scale {:.4} from tile {:?} ({} tiles of {} voxels scanned)",
                diag.max.value, diag.max.index, diag.n_scanned, tiling.tile_size
            );
            (diag.max.value, Some(diag))
        }
    };

    let local_max = grey_dilation(data, kernel);
    let scale = if full_scale > 0.0 && full_scale.is_finite() {
        local_max.map(|m| {
            let s = m / full_scale;
            if s.is_nan() { 0.0 } else { s.clamp(0.0, 1.0) }
        })
    } else {
        warn!(
            "Full scale value {} is not positive, the scale map is empty",
            full_scale
        );
        local_max.map(|_| 0.0)
    };

    Ok(ScaleField {
        scale,
        full_scale,
        tiles: diagnostics,
    })
}
