use clap::{
    Parser,
    Subcommand,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate local scale and optionally modify the map by it.
    Estimate(Box<EstimateArgs>),
    /// Write a template configuration file.
    WriteTemplate(WriteTemplateArgs),
    /// Align a map's voxel size and origin to the grid of a parent map.
    AdjustToParent(AdjustToParentArgs),
    /// Print the sigmoid transfer function for a pivot and power.
    SigmoidTable(SigmoidTableArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScaleModeArg {
    /// Estimate on the low-passed map (occupancy).
    Occ,
    /// Estimate on the raw map (resolution-dependent).
    Res,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TilePolicyArg {
    Sphere,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SolventComponentsArg {
    One,
    Two,
}

#[derive(Parser, Debug, Clone, Default)]
pub struct EstimateArgs {
    /// JSON configuration file. Flags given here take precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// The map to estimate scale for.
    #[arg(short, long)]
    pub input_map: Option<PathBuf>,

    /// Resolution of the input map [Å].
    #[arg(short, long)]
    pub resolution: Option<f32>,

    /// Amplify partial scales by this power.
    #[arg(long)]
    pub amplify: Option<f64>,

    /// Attenuate partial scales by this power.
    #[arg(long)]
    pub attenuate: Option<f64>,

    /// Sigmoid modification of this order, needs --pivot.
    #[arg(long)]
    pub sigmoid: Option<f64>,

    /// Scale left unchanged by the sigmoid, in (0,1).
    #[arg(long)]
    pub pivot: Option<f64>,

    /// Percentile used for the full-scale value.
    #[arg(long)]
    pub tau: Option<f64>,

    /// Odd kernel size in voxels.
    #[arg(long)]
    pub kernel_size: Option<usize>,

    /// Kernel radius in voxels.
    #[arg(long)]
    pub kernel_radius: Option<f32>,

    /// Tile size in voxels.
    #[arg(long)]
    pub tile_size: Option<usize>,

    /// Tiles along each axis.
    #[arg(long)]
    pub n_tiles: Option<usize>,

    /// Which tiles take part in the percentile scan.
    #[arg(long, value_enum)]
    pub tile_policy: Option<TilePolicyArg>,

    /// Low-pass applied before estimation [Å].
    #[arg(long, alias = "lowpass")]
    pub lowpass_input: Option<f32>,

    /// Low-pass applied to modified outputs [Å].
    #[arg(long)]
    pub lowpass_output: Option<f32>,

    /// Remove solvent from the outputs.
    #[arg(long)]
    pub exclude_solvent: bool,

    /// Larger maps are downscaled to this box for processing.
    #[arg(long)]
    pub max_box: Option<usize>,

    /// Raise the confidence to this power.
    #[arg(long)]
    pub hedge_confidence: Option<f64>,

    /// Map marking the solvent or the content.
    #[arg(long)]
    pub solvent_def: Option<PathBuf>,

    /// Gaussians in the solvent model.
    #[arg(long, value_enum)]
    pub solvent_components: Option<SolventComponentsArg>,

    /// Scales at or below this are not modified.
    #[arg(long)]
    pub scale_limit: Option<f32>,

    /// What the scale map should capture.
    #[arg(long, value_enum)]
    pub scale_mode: Option<ScaleModeArg>,

    /// Match output histograms to the input instead of clipping to its range.
    #[arg(long)]
    pub hist_match: bool,

    /// Normalize by tau times the map maximum instead of the tile scan.
    #[arg(long)]
    pub naive_normalization: bool,

    /// Directory for every written file.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Write diagnostics and print terminal plots.
    #[arg(long)]
    pub plot: bool,

    /// Also write intermediate maps.
    #[arg(long)]
    pub save_all_maps: bool,

    /// Write a ChimeraX script for the outputs.
    #[arg(long)]
    pub chimerax: bool,

    /// Write a ChimeraX script that saves snapshots and exits.
    #[arg(long)]
    pub chimerax_silent: bool,

    /// Lower end of the scale color range.
    #[arg(long)]
    pub min_vis_scale: Option<f32>,

    /// Seed for the synthetic solvent.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct WriteTemplateArgs {
    /// The directory to write the template to.
    #[arg(short, long)]
    pub output_path: PathBuf,
}

#[derive(Parser, Debug)]
pub struct AdjustToParentArgs {
    /// The map to rewrite.
    #[arg(short, long)]
    pub map: PathBuf,

    /// The map whose grid to align to.
    #[arg(short, long)]
    pub parent: PathBuf,
}

#[derive(Parser, Debug)]
pub struct SigmoidTableArgs {
    /// Scale mapped onto itself, in (0,1).
    #[arg(short, long)]
    pub pivot: f64,

    /// Sigmoid order, at least 1.
    #[arg(short = 'g', long)]
    pub power: f64,

    /// Number of table entries.
    #[arg(short, long, default_value_t = 1000)]
    pub levels: usize,

    /// Print the table as JSON instead of a plot.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_estimate() {
        let args = Args::try_parse_from([
            "occupy",
            "estimate",
            "-i",
            "map.mrc",
            "--attenuate",
            "2",
            "--scale-mode",
            "res",
            "--lowpass",
            "6.5",
            "--exclude-solvent",
        ])
        .unwrap();
        let Some(Commands::Estimate(est)) = args.command else {
            panic!("expected the estimate subcommand");
        };
        assert_eq!(est.input_map, Some(PathBuf::from("map.mrc")));
        assert_eq!(est.attenuate, Some(2.0));
        assert_eq!(est.scale_mode, Some(ScaleModeArg::Res));
        assert_eq!(est.lowpass_input, Some(6.5));
        assert!(est.exclude_solvent);
        assert!(!est.plot);
    }

    #[test]
    fn test_parse_sigmoid_table() {
        let args = Args::try_parse_from(["occupy", "sigmoid-table", "-p", "0.3", "-g", "4"]).unwrap();
        let Some(Commands::SigmoidTable(table)) = args.command else {
            panic!("expected the sigmoid-table subcommand");
        };
        assert_eq!(table.levels, 1000);
        assert_eq!(table.power, 4.0);
    }
}
