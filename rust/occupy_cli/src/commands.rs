use std::sync::atomic::AtomicBool;

use occupy::diagnostics::{
    DiagnosticsSink,
    MODIFICATION_FIGURE,
};
use occupy::modify::{
    ModificationMode,
    scale_mapping_sigmoid,
};
use occupy::mrc::adjust_file_to_parent;
use occupy::{
    OccupyConfig,
    run,
};
use serde::Serialize;
use tracing::{
    info,
    instrument,
};

use crate::cli::{
    AdjustToParentArgs,
    EstimateArgs,
    SigmoidTableArgs,
    WriteTemplateArgs,
};
use crate::config::{
    apply_overrides,
    load_config,
};
use crate::error::CliError;

/// Main function for the 'estimate' subcommand.
#[instrument(skip_all)]
pub fn main_estimate(args: EstimateArgs) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => OccupyConfig::default(),
    };
    let config = apply_overrides(config, &args);
    info!("Using configuration: {:#?}", config);

    let cancel = AtomicBool::new(false);
    let output = run(&config, &cancel)?;

    println!("Wrote scale map {}", output.scale_map.display());
    println!("Wrote confidence map {}", output.confidence_map.display());
    for path in output
        .modified_maps
        .iter()
        .chain(output.solvent_excluded_map.iter())
    {
        println!("Wrote {}", path.display());
    }
    for warning in &output.warnings {
        println!("WARNING: {}", warning);
    }
    if output.modified_maps.is_empty() {
        println!(
            "You could also modify the map by its estimated scale, using --amplify, --attenuate or --sigmoid"
        );
    }
    if !config.exclude_solvent {
        println!("You could also exclude solvent with --exclude-solvent");
    }
    for script in &output.chimerax_scripts {
        if script.to_string_lossy().contains("_silent") {
            println!("Generate thumbnails of the output with:\nchimerax --offscreen {}", script.display());
        } else {
            println!("Visualize the output with:\nchimerax {}", script.display());
        }
    }
    Ok(())
}

const OCCUPY_CONFIG_TEMPLATE: &str = r#"{
  "_comment": "Unset values are derived from the map. Powers of 1 disable a modification.",
  "input_map": "emd_1234.map",
  "resolution": null,
  "amplify": null,
  "attenuate": 2.0,
  "sigmoid": null,
  "pivot": null,
  "tau": null,
  "kernel_size": null,
  "kernel_radius": null,
  "tile_size": 12,
  "n_tiles": 20,
  "tile_policy": "sphere",
  "lowpass_input": null,
  "lowpass_output": null,
  "exclude_solvent": false,
  "max_box": 256,
  "hedge_confidence": null,
  "solvent_def": null,
  "solvent_components": "one",
  "scale_limit": 0.05,
  "scale_mode": "occupancy",
  "hist_match": false,
  "naive_normalization": false,
  "output_dir": "occupy_out",
  "plot": false,
  "save_all_maps": false,
  "chimerax": true,
  "chimerax_silent": false,
  "min_vis_scale": 0.2,
  "seed": null
}"#;

/// Main function for the 'write-template' subcommand.
pub fn main_write_template(args: WriteTemplateArgs) -> Result<(), CliError> {
    let target_dir = args.output_path;
    std::fs::create_dir_all(&target_dir)?;

    let config_path = target_dir.join("occupy_config_template.json");
    std::fs::write(&config_path, OCCUPY_CONFIG_TEMPLATE)?;
    println!("Wrote configuration template to: {}", config_path.display());
    Ok(())
}

/// Main function for the 'adjust-to-parent' subcommand.
pub fn main_adjust_to_parent(args: AdjustToParentArgs) -> Result<(), CliError> {
    let path = adjust_file_to_parent(&args.map, &args.parent)?;
    println!(
        "Aligned {} to the grid of {}",
        path.display(),
        args.parent.display()
    );
    Ok(())
}

#[derive(Serialize)]
struct SigmoidTable {
    pivot: f64,
    power: f64,
    scale: Vec<f64>,
    mapped: Vec<f64>,
}

/// Main function for the 'sigmoid-table' subcommand.
pub fn main_sigmoid_table(args: SigmoidTableArgs) -> Result<(), CliError> {
    ModificationMode::Sigmoid {
        power: args.power,
        pivot: args.pivot,
    }
    .validate()?;
    let (scale, mapped) = scale_mapping_sigmoid(args.pivot, args.power, args.levels.max(2));

    if args.json {
        let table = SigmoidTable {
            pivot: args.pivot,
            power: args.power,
            scale,
            mapped,
        };
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    let mut sink = DiagnosticsSink::new();
    sink.add_series(MODIFICATION_FIGURE, "unmodified", scale.clone(), scale.clone());
    sink.add_series(
        MODIFICATION_FIGURE,
        &format!("sigmoid {:.2} pivot {:.2}", args.power, args.pivot),
        scale,
        mapped,
    );
    sink.add_marker(MODIFICATION_FIGURE, "pivot", args.pivot);
    println!("{}", sink.render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses() {
        let config: OccupyConfig = serde_json::from_str(OCCUPY_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.attenuate, Some(2.0));
        assert_eq!(config.max_box, 256);
        assert!(config.validate().is_ok());
        assert_eq!(config.modes().unwrap().len(), 1);
    }

    #[test]
    fn test_write_template() {
        let dir = std::env::temp_dir().join(format!("occupy_template_{}", std::process::id()));
        main_write_template(WriteTemplateArgs {
            output_path: dir.clone(),
        })
        .unwrap();
        assert!(dir.join("occupy_config_template.json").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sigmoid_table_rejects_bad_pivot() {
        let args = SigmoidTableArgs {
            pivot: 1.2,
            power: 2.0,
            levels: 100,
            json: true,
        };
        assert!(main_sigmoid_table(args).is_err());
    }
}
