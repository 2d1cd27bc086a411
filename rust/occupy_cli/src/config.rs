use occupy::{
    OccupyConfig,
    ScaleMode,
    SolventComponents,
    TilePolicy,
};
use std::path::Path;
use tracing::info;

use crate::cli::{
    EstimateArgs,
    ScaleModeArg,
    SolventComponentsArg,
    TilePolicyArg,
};
use crate::error::CliError;

pub fn load_config(path: &Path) -> Result<OccupyConfig, CliError> {
    let file = std::fs::File::open(path).map_err(|e| CliError::Config {
        path: path.display().to_string(),
        msg: e.to_string(),
    })?;
    let config = serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| {
        CliError::Config {
            path: path.display().to_string(),
            msg: e.to_string(),
        }
    })?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Flags given on the command line replace values from the config file.
/// Switches can only turn a setting on.
pub fn apply_overrides(mut config: OccupyConfig, args: &EstimateArgs) -> OccupyConfig {
    if let Some(input_map) = &args.input_map {
        config.input_map = Some(input_map.clone());
    }
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = output_dir.clone();
    }
    if let Some(solvent_def) = &args.solvent_def {
        config.solvent_def = Some(solvent_def.clone());
    }
    if args.resolution.is_some() {
        config.resolution = args.resolution;
    }
    if args.amplify.is_some() {
        config.amplify = args.amplify;
    }
    if args.attenuate.is_some() {
        config.attenuate = args.attenuate;
    }
    if args.sigmoid.is_some() {
        config.sigmoid = args.sigmoid;
    }
    if args.pivot.is_some() {
        config.pivot = args.pivot;
    }
    if args.tau.is_some() {
        config.tau = args.tau;
    }
    if args.kernel_size.is_some() {
        config.kernel_size = args.kernel_size;
    }
    if args.kernel_radius.is_some() {
        config.kernel_radius = args.kernel_radius;
    }
    if args.lowpass_input.is_some() {
        config.lowpass_input = args.lowpass_input;
    }
    if args.lowpass_output.is_some() {
        config.lowpass_output = args.lowpass_output;
    }
    if args.hedge_confidence.is_some() {
        config.hedge_confidence = args.hedge_confidence;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(tile_size) = args.tile_size {
        config.tile_size = tile_size;
    }
    if let Some(n_tiles) = args.n_tiles {
        config.n_tiles = n_tiles;
    }
    if let Some(max_box) = args.max_box {
        config.max_box = max_box;
    }
    if let Some(scale_limit) = args.scale_limit {
        config.scale_limit = scale_limit;
    }
    if let Some(min_vis_scale) = args.min_vis_scale {
        config.min_vis_scale = min_vis_scale;
    }
    if let Some(policy) = args.tile_policy {
        config.tile_policy = match policy {
            TilePolicyArg::Sphere => TilePolicy::Sphere,
            TilePolicyArg::All => TilePolicy::All,
        };
    }
    if let Some(components) = args.solvent_components {
        config.solvent_components = match components {
            SolventComponentsArg::One => SolventComponents::One,
            SolventComponentsArg::Two => SolventComponents::Two,
        };
    }
    if let Some(mode) = args.scale_mode {
        config.scale_mode = match mode {
            ScaleModeArg::Occ => ScaleMode::Occupancy,
            ScaleModeArg::Res => ScaleMode::Resolution,
        };
    }
    config.exclude_solvent |= args.exclude_solvent;
    config.hist_match |= args.hist_match;
    config.naive_normalization |= args.naive_normalization;
    config.plot |= args.plot;
    config.save_all_maps |= args.save_all_maps;
    config.chimerax |= args.chimerax;
    config.chimerax_silent |= args.chimerax_silent;
    config
}
