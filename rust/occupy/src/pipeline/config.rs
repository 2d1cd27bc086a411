use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;
use tracing::debug;

use crate::errors::{
    OccupyError,
    Result,
};
use crate::modify::{
    DEFAULT_SCALE_THRESHOLD,
    ModificationMode,
};
use crate::scale::{
    DEFAULT_N_TILES,
    DEFAULT_TILE_SIZE,
    TilePolicy,
};
use crate::solvent::SolventComponents;

/// Largest box processed without downscaling.
pub const DEFAULT_MAX_BOX: usize = 256;

/// What the scale map is meant to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// Scale estimated on the low-passed map, ignoring local resolution.
    #[default]
    #[serde(alias = "occ")]
    Occupancy,
    /// Scale estimated on the raw map, resolution-dependent fall-off included.
    #[serde(alias = "res")]
    Resolution,
}

impl ScaleMode {
    /// Short form used in output file names.
    pub fn tag(&self) -> &'static str {
        match self {
            ScaleMode::Occupancy => "occ",
            ScaleMode::Resolution => "res",
        }
    }
}

/// Settings for one estimation run.
///
/// Every field has a default, so a JSON file only needs the values it
/// changes. Modification powers of exactly 1 are treated as not requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupyConfig {
    pub input_map: Option<PathBuf>,
    /// Resolution of the input map [Å].
    pub resolution: Option<f32>,
    pub amplify: Option<f64>,
    pub attenuate: Option<f64>,
    pub sigmoid: Option<f64>,
    pub pivot: Option<f64>,
    /// Overrides the percentile derived from the kernel size.
    pub tau: Option<f64>,
    pub kernel_size: Option<usize>,
    /// In voxels.
    pub kernel_radius: Option<f32>,
    pub tile_size: usize,
    pub n_tiles: usize,
    pub tile_policy: TilePolicy,
    /// Low-pass applied before solvent and scale estimation [Å].
    pub lowpass_input: Option<f32>,
    /// Low-pass applied to modified outputs [Å].
    pub lowpass_output: Option<f32>,
    pub exclude_solvent: bool,
    pub max_box: usize,
    pub hedge_confidence: Option<f64>,
    /// Map marking either the solvent or the content.
    pub solvent_def: Option<PathBuf>,
    pub solvent_components: SolventComponents,
    /// Scales at or below this are not modified.
    pub scale_limit: f32,
    pub scale_mode: ScaleMode,
    pub hist_match: bool,
    /// Normalize by `tau * max` instead of the tile scan.
    pub naive_normalization: bool,
    pub output_dir: PathBuf,
    pub plot: bool,
    pub save_all_maps: bool,
    pub chimerax: bool,
    pub chimerax_silent: bool,
    pub min_vis_scale: f32,
    /// Seed for the synthetic solvent.
    pub seed: Option<u64>,
}

impl Default for OccupyConfig {
    fn default() -> Self {
        Self {
            input_map: None,
            resolution: None,
            amplify: None,
            attenuate: None,
            sigmoid: None,
            pivot: None,
            tau: None,
            kernel_size: None,
            kernel_radius: None,
            tile_size: DEFAULT_TILE_SIZE,
            n_tiles: DEFAULT_N_TILES,
            tile_policy: TilePolicy::default(),
            lowpass_input: None,
            lowpass_output: None,
            exclude_solvent: false,
            max_box: DEFAULT_MAX_BOX,
            hedge_confidence: None,
            solvent_def: None,
            solvent_components: SolventComponents::default(),
            scale_limit: DEFAULT_SCALE_THRESHOLD,
            scale_mode: ScaleMode::default(),
            hist_match: false,
            naive_normalization: false,
            output_dir: PathBuf::from("."),
            plot: false,
            save_all_maps: false,
            chimerax: false,
            chimerax_silent: false,
            min_vis_scale: 0.2,
            seed: None,
        }
    }
}

fn requested_power(name: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        None => Ok(None),
        Some(p) if p == 1.0 => {
            debug!("{} power of 1 leaves the map unchanged, skipping", name);
            Ok(None)
        }
        Some(p) if p > 1.0 && p.is_finite() => Ok(Some(p)),
        Some(p) => Err(OccupyError::config(format!(
            "{} power must be at least 1, got {}",
            name, p
        ))),
    }
}

fn positive(name: &str, value: Option<f32>) -> Result<()> {
    match value {
        Some(v) if !(v > 0.0 && v.is_finite()) => Err(OccupyError::config(format!(
            "{} must be positive, got {}",
            name, v
        ))),
        _ => Ok(()),
    }
}

impl OccupyConfig {
    /// Requested modifications, in the order amplify, attenuate, sigmoid.
    pub fn modes(&self) -> Result<Vec<ModificationMode>> {
        let mut modes = Vec::new();
        if let Some(power) = requested_power("amplify", self.amplify)? {
            modes.push(ModificationMode::Amplify { power });
        }
        if let Some(power) = requested_power("attenuate", self.attenuate)? {
            modes.push(ModificationMode::Attenuate { power });
        }
        if let Some(power) = requested_power("sigmoid", self.sigmoid)? {
            let pivot = self.pivot.ok_or_else(|| {
                OccupyError::config("sigmoid modification requires a pivot")
            })?;
            modes.push(ModificationMode::Sigmoid { power, pivot });
        }
        for mode in &modes {
            mode.validate()?;
        }
        Ok(modes)
    }

    /// Reject inconsistent settings before any file is read.
    pub fn validate(&self) -> Result<()> {
        if self.input_map.is_none() {
            return Err(OccupyError::config("no input map given"));
        }
        if self.max_box == 0 || self.max_box % 2 != 0 {
            return Err(OccupyError::config(format!(
                "max box must be even and positive, got {}",
                self.max_box
            )));
        }
        if let Some(tau) = self.tau {
            if !(tau > 0.0 && tau <= 1.0) {
                return Err(OccupyError::config(format!(
                    "tau must lie in (0,1], got {}",
                    tau
                )));
            }
        }
        if self.n_tiles == 0 || self.tile_size == 0 {
            return Err(OccupyError::config(format!(
                "tiling needs a positive tile size and count, got {} tiles of {}",
                self.n_tiles, self.tile_size
            )));
        }
        if !(0.0..1.0).contains(&self.scale_limit) {
            return Err(OccupyError::config(format!(
                "scale limit must lie in [0,1), got {}",
                self.scale_limit
            )));
        }
        if !(0.0..1.0).contains(&self.min_vis_scale) {
            return Err(OccupyError::config(format!(
                "minimum visualized scale must lie in [0,1), got {}",
                self.min_vis_scale
            )));
        }
        if let Some(hedge) = self.hedge_confidence {
            if !(hedge > 0.0 && hedge.is_finite()) {
                return Err(OccupyError::config(format!(
                    "confidence hedge must be positive, got {}",
                    hedge
                )));
            }
        }
        positive("resolution", self.resolution)?;
        positive("input low-pass", self.lowpass_input)?;
        positive("output low-pass", self.lowpass_output)?;
        positive("kernel radius", self.kernel_radius)?;
        if let Some(size) = self.kernel_size {
            if size % 2 == 0 {
                return Err(OccupyError::config(format!(
                    "kernel size must be odd, got {}",
                    size
                )));
            }
        }
        self.modes()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_input() -> OccupyConfig {
        OccupyConfig {
            input_map: Some(PathBuf::from("map.mrc")),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: OccupyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OccupyConfig::default());
        assert_eq!(config.max_box, 256);
        assert_eq!(config.tile_size, 12);
        assert_eq!(config.scale_limit, 0.05);
    }

    #[test]
    fn test_partial_json() {
        let config: OccupyConfig = serde_json::from_str(
            r#"{"input_map": "emd_1234.map", "attenuate": 3.0, "scale_mode": "res", "tile_policy": "all"}"#,
        )
        .unwrap();
        assert_eq!(config.scale_mode, ScaleMode::Resolution);
        assert_eq!(config.scale_mode.tag(), "res");
        assert_eq!(config.tile_policy, TilePolicy::All);
        assert_eq!(
            config.modes().unwrap(),
            vec![ModificationMode::Attenuate { power: 3.0 }]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_modes_in_order() {
        let config = OccupyConfig {
            amplify: Some(2.0),
            attenuate: Some(1.0),
            sigmoid: Some(4.0),
            pivot: Some(0.3),
            ..with_input()
        };
        let modes = config.modes().unwrap();
        assert_eq!(modes.len(), 2);
        assert_eq!(modes[0].name(), "amplify");
        assert_eq!(modes[1], ModificationMode::Sigmoid { power: 4.0, pivot: 0.3 });
    }

    #[test]
    fn test_invalid_settings() {
        let bad = [
            OccupyConfig::default(),
            OccupyConfig {
                amplify: Some(0.5),
                ..with_input()
            },
            OccupyConfig {
                sigmoid: Some(2.0),
                ..with_input()
            },
            OccupyConfig {
                sigmoid: Some(2.0),
                pivot: Some(1.5),
                ..with_input()
            },
            OccupyConfig {
                max_box: 255,
                ..with_input()
            },
            OccupyConfig {
                tau: Some(1.5),
                ..with_input()
            },
            OccupyConfig {
                kernel_size: Some(4),
                ..with_input()
            },
            OccupyConfig {
                scale_limit: 1.0,
                ..with_input()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{:?}", config);
        }
        assert!(with_input().validate().is_ok());
    }
}
