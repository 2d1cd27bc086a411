//! End-to-end estimation run: read a map, estimate its local scale, and
//! write the scale, confidence and any modified maps next to a settings log.
//!
//! Stages run in order and each checks the cancellation flag before it
//! starts. Maps written at the processing size are aligned to the input
//! grid on write.

pub mod config;

use indicatif::{
    ProgressBar,
    ProgressStyle,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::chimerax::{
    ChimeraxScript,
    TileMarkers,
};
use crate::confidence::estimate_confidence;
use crate::diagnostics::{
    DiagnosticsSink,
    MODIFICATION_FIGURE,
};
use crate::errors::{
    OccupyError,
    Result,
};
use crate::histogram::match_histograms;
use crate::modify::{
    fake_solvent,
    modify,
    scale_mapping_sigmoid,
};
use crate::mrc::{
    MrcHeader,
    MrcMap,
    read_mrc,
    write_mrc_aligned,
};
use crate::radial_mask::{
    RadialMask,
    radial_mask,
};
use crate::scale::{
    NormalizationMode,
    ScaleField,
    TileDiagnostics,
    TileSettings,
    max_kernel_radius,
    spherical_kernel,
};
use crate::solvent::{
    SolventLimits,
    SolventModelParams,
    fit_solvent_to_histogram,
    smallest_variance_region,
    suppress,
};
use crate::spectral::{
    LowpassTarget,
    lowpass,
    lowpass_map,
};
use crate::volume::{
    Volume,
    clip_to_range,
};

pub use config::{
    DEFAULT_MAX_BOX,
    OccupyConfig,
    ScaleMode,
};

/// Histogram levels used for the solvent model and confidence.
pub const SOLVENT_LEVELS: usize = 1000;

/// Input low-pass used when neither a low-pass nor a resolution is given [Å].
pub const DEFAULT_LOWPASS: f32 = 8.0;

const MIN_KERNEL_SIZE: usize = 3;
const MAX_KERNEL_SIZE: usize = 9;

/// Lowest confident scale above which the solvent model is considered bad.
const BAD_SOLVENT_SCALE: f64 = 0.5;

/// Settings derived from the configuration and the input map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub input_size: usize,
    pub processing_size: usize,
    pub voxel_size: f32,
    pub processing_voxel_size: f32,
    /// Input low-pass [Å].
    pub lowpass: f32,
    pub kernel_size: usize,
    /// In processing voxels.
    pub kernel_radius: f32,
    pub kernel_voxels: usize,
    pub tau: f64,
    /// The tau matching the kernel, reported when a user tau is in use.
    pub recommended_tau: f64,
    /// The kernel is small enough to make the solvent model unreliable.
    pub small_kernel: bool,
}

/// What a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub scale_map: PathBuf,
    pub confidence_map: PathBuf,
    /// One map per requested modification, in request order.
    pub modified_maps: Vec<PathBuf>,
    pub solvent_excluded_map: Option<PathBuf>,
    /// Downscaled, low-passed and modification-factor maps.
    pub intermediate_maps: Vec<PathBuf>,
    pub chimerax_scripts: Vec<PathBuf>,
    pub diagnostics: Option<PathBuf>,
    pub log: PathBuf,
    pub settings: Settings,
    pub limits: SolventLimits,
    pub solvent: SolventModelParams,
    pub full_scale: f32,
    /// Mean full-scale intensity relative to the normalization constant.
    pub variability_limit: f64,
    /// Solvent edge relative to the normalization constant.
    pub lowest_confident_scale: f64,
    pub warnings: Vec<String>,
}

fn checkpoint(cancel: &AtomicBool, stage: &'static str) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        warn!("Cancelled before {}", stage);
        return Err(OccupyError::Cancelled { stage });
    }
    Ok(())
}

/// Input low-pass: the larger of the given low-pass and resolution, or
/// `max(3 voxels, 8 Å)` when neither is given.
pub fn resolve_lowpass(lowpass_input: Option<f32>, resolution: Option<f32>, voxel_size: f32) -> f32 {
    match (lowpass_input, resolution) {
        (None, None) => (3.0 * voxel_size).max(DEFAULT_LOWPASS),
        (None, Some(res)) => res,
        (Some(lp), None) => lp,
        (Some(lp), Some(res)) => {
            if res < lp {
                info!(
                    "Resolution {:.2} Å is not used, the input low-pass {:.2} Å is greater",
                    res, lp
                );
            }
            lp.max(res)
        }
    }
}

/// Odd kernel size holding the low-pass in voxels, within [3, 9].
pub fn auto_kernel_size(lowpass: f32, voxel_size: f32) -> usize {
    let fit = (lowpass / voxel_size).floor().max(0.0) as usize;
    ((fit / 2) * 2 + 1).clamp(MIN_KERNEL_SIZE, MAX_KERNEL_SIZE)
}

/// Derive low-pass, kernel and tau for a map of `n` voxels at `voxel_size`,
/// and build the kernel.
pub fn resolve_settings(
    config: &OccupyConfig,
    input_size: usize,
    input_voxel_size: f32,
    n: usize,
    voxel_size: f32,
) -> Result<(Settings, RadialMask)> {
    let lp = resolve_lowpass(config.lowpass_input, config.resolution, voxel_size);
    let kernel_size = match config.kernel_size {
        Some(size) => size,
        None => auto_kernel_size(lp, voxel_size),
    };
    let kernel_radius = match config.kernel_radius {
        Some(radius) => radius,
        None => {
            let radius = lp / (2.0 * voxel_size);
            let max = max_kernel_radius(kernel_size);
            if radius > max {
                warn!(
                    "Kernel radius {:.2} does not fit a kernel of {} voxels, using {:.2}",
                    radius, kernel_size, max
                );
                max
            } else {
                radius
            }
        }
    };

    let mut small_kernel = false;
    if kernel_size < 5 {
        small_kernel = true;
        warn!(
            "Very small kernel size ({} voxels), the solvent model may be bad. Try a kernel size of 5 or more, and/or a low-pass of {} Å or more",
            kernel_size,
            (lp * 2.0) as i32
        );
    }
    if kernel_radius < kernel_size as f32 / 4.0 {
        small_kernel = true;
        warn!(
            "Very small kernel radius ({:.2} voxels), the solvent model may be bad. Try a low-pass of {} Å or more",
            kernel_radius,
            (lp * 2.0) as i32
        );
    }

    let (kernel, recommended_tau) = spherical_kernel(kernel_size, Some(kernel_radius))?;
    let tau = match config.tau {
        Some(tau) => {
            info!("Using tau {:.4} (recommended {:.4})", tau, recommended_tau);
            tau
        }
        None => recommended_tau,
    };

    let settings = Settings {
        input_size,
        processing_size: n,
        voxel_size: input_voxel_size,
        processing_voxel_size: voxel_size,
        lowpass: lp,
        kernel_size,
        kernel_radius,
        kernel_voxels: kernel.count(),
        tau,
        recommended_tau,
        small_kernel,
    };
    Ok((settings, kernel))
}

/// Mean of `data` where the scale is full, relative to `full_scale`.
fn mean_full_scale(data: &Volume, field: &ScaleField) -> f64 {
    let (sum, count) = data
        .data()
        .iter()
        .zip(field.scale.data())
        .filter(|(_, s)| **s == 1.0)
        .fold((0.0f64, 0usize), |(sum, count), (&d, _)| (sum + d as f64, count + 1));
    if count == 0 || !(field.full_scale > 0.0) {
        debug!("No voxel at full scale, variability limit set to 1");
        return 1.0;
    }
    sum / count as f64 / field.full_scale as f64
}

/// Tile spheres in Å in the input frame.
fn tile_markers(tiles: &TileDiagnostics, parent: &MrcHeader, factor: f64) -> TileMarkers {
    let voxel_size = parent.voxel_size() as f64;
    let order = parent.checked_axis_order();
    let mut offset = [0.0f64; 3];
    for (k, &axis) in order.iter().enumerate() {
        offset[axis] = parent.start[k] as f64;
    }
    let to_angstrom = |c: [f64; 3]| [0, 1, 2].map(|k| voxel_size * (c[k] / factor + offset[k]));
    TileMarkers {
        max_center: to_angstrom(tiles.max.center),
        min_center: to_angstrom(tiles.min.center),
        radius: voxel_size * tiles.radius / factor,
    }
}

fn stage_progress(n_stages: u64) -> ProgressBar {
    let progress = ProgressBar::new(n_stages);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
    ) {
        progress.set_style(style);
    }
    progress
}

/// Output post-processing shared by every modified map: optional output
/// low-pass, upsampling to the input box, then range matching.
fn finish_output(map: Volume, config: &OccupyConfig, input: &Volume) -> Result<Volume> {
    let mut out = map;
    if let Some(resolution) = config.lowpass_output {
        out = lowpass(&out, LowpassTarget::Resolution { resolution }, false, false)?;
    }
    if out.n() != input.n() {
        out = lowpass(&out, LowpassTarget::OutputSize { size: input.n() }, true, true)?;
    }
    if config.hist_match {
        let matched = match_histograms(out.data(), input.data());
        out = out.with_data(matched)?;
    } else {
        out = clip_to_range(&out, input.range());
    }
    Ok(out)
}

/// Run the full estimation described by `config`.
///
/// Setting `cancel` aborts the run with [`OccupyError::Cancelled`] before the
/// next stage starts; files already written are kept.
#[instrument(skip_all)]
pub fn run(config: &OccupyConfig, cancel: &AtomicBool) -> Result<PipelineOutput> {
    config.validate()?;
    let modes = config.modes()?;
    let input_path = config
        .input_map
        .as_ref()
        .ok_or_else(|| OccupyError::config("no input map given"))?;
    let out_dir = config.output_dir.as_path();
    fs::create_dir_all(out_dir).map_err(|e| OccupyError::from(e).with_path(out_dir))?;

    let progress = stage_progress(6 + modes.len() as u64);
    let mut sink = if config.plot {
        DiagnosticsSink::new()
    } else {
        DiagnosticsSink::disabled()
    };
    let mut warnings = Vec::new();
    let mut intermediate_maps = Vec::new();

    checkpoint(cancel, "reading input")?;
    progress.set_message("reading input");
    let MrcMap {
        volume: input,
        header: parent,
    } = read_mrc(input_path)?;
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "map".to_string());
    let new_name = format!("{}.mrc", stem);
    let base_out_name = if config.exclude_solvent {
        format!("solExcl_{}", new_name)
    } else {
        new_name.clone()
    };
    info!("Estimating local scale of {}", input_path.display());

    let downscale = input.n() > config.max_box;
    let factor = if downscale {
        config.max_box as f64 / input.n() as f64
    } else {
        1.0
    };
    let in_data = if downscale {
        info!(
            "Downscaling {}³ input to {}³ for processing",
            input.n(),
            config.max_box
        );
        let down = lowpass(
            &input,
            LowpassTarget::OutputSize {
                size: config.max_box,
            },
            true,
            true,
        )?;
        if config.save_all_maps {
            intermediate_maps.push(write_mrc_aligned(
                out_dir.join("downscaled.mrc"),
                &down,
                Some("downscaled input"),
                &parent,
            )?);
        }
        down
    } else {
        input.clone()
    };
    let n = in_data.n();
    let voxel_size = in_data.voxel_size();
    progress.inc(1);

    let (settings, kernel) =
        resolve_settings(config, input.n(), input.voxel_size(), n, voxel_size)?;

    checkpoint(cancel, "low-pass")?;
    progress.set_message("low-pass");
    let lp_data = if settings.lowpass > 2.0 * voxel_size {
        let lp = lowpass(
            &in_data,
            LowpassTarget::Resolution {
                resolution: settings.lowpass,
            },
            false,
            false,
        )?;
        if config.save_all_maps {
            intermediate_maps.push(write_mrc_aligned(
                out_dir.join(format!("lowpass_{}", new_name)),
                &lp,
                Some("low-passed input"),
                &parent,
            )?);
        }
        Some(lp)
    } else {
        debug!(
            "Low-pass {:.2} Å is within two voxels, using the input as is",
            settings.lowpass
        );
        None
    };
    let sol_data = lp_data.as_ref().unwrap_or(&in_data);
    let scale_data = match config.scale_mode {
        ScaleMode::Occupancy => sol_data,
        ScaleMode::Resolution => &in_data,
    };
    progress.inc(1);

    checkpoint(cancel, "solvent model")?;
    progress.set_message("solvent model");
    let radial = radial_mask(n, 3, None, Some((n / 2) as f32))?;
    let sample: Vec<f32> = match &config.solvent_def {
        Some(path) => {
            let definition = read_mrc(path)?.volume;
            if definition.n() != input.n() {
                return Err(OccupyError::InputShape {
                    shape: definition.shape(),
                    context: "Solvent definition matching the input map",
                });
            }
            let definition = if downscale {
                lowpass(
                    &definition,
                    LowpassTarget::OutputSize { size: n },
                    true,
                    true,
                )?
            } else {
                definition
            };
            smallest_variance_region(sol_data, &definition, &radial)?
        }
        None => sol_data
            .data()
            .iter()
            .zip(radial.values())
            .filter(|(_, inside)| **inside)
            .map(|(&v, _)| v)
            .collect(),
    };
    let fit = fit_solvent_to_histogram(&sample, SOLVENT_LEVELS, config.solvent_components, &mut sink)?;
    drop(sample);
    progress.inc(1);

    checkpoint(cancel, "scale estimation")?;
    progress.set_message("scale estimation");
    let normalization = if config.naive_normalization {
        NormalizationMode::Naive
    } else {
        NormalizationMode::Tiled
    };
    let tile_settings = TileSettings {
        n_tiles: config.n_tiles,
        tile_size: Some(config.tile_size),
        policy: config.tile_policy,
    };
    let field = crate::scale::estimate(scale_data, &kernel, settings.tau, &tile_settings, normalization)?;
    let scale_name = if config.naive_normalization {
        format!("scale_naive_{}_{}", config.scale_mode.tag(), new_name)
    } else {
        format!("scale_{}_{}", config.scale_mode.tag(), new_name)
    };
    let scale_map = write_mrc_aligned(
        out_dir.join(&scale_name),
        &field.scale,
        Some(&format!("occupy scale: {:?}", config.scale_mode).to_lowercase()),
        &parent,
    )?;
    let variability_limit = mean_full_scale(scale_data, &field);
    let lowest_confident_scale = if field.full_scale > 0.0 {
        fit.limits.high() / field.full_scale as f64
    } else {
        f64::INFINITY
    };
    if lowest_confident_scale > BAD_SOLVENT_SCALE {
        let mut msg = "Solvent model fit is likely bad. Check output log for warnings and".to_string();
        if config.plot {
            msg.push_str(" check the solvent model");
        } else {
            msg.push_str(" run with --plot and check the solvent model");
        }
        warn!(
            "Lowest confident scale {:.3} is above {}: {}",
            lowest_confident_scale, BAD_SOLVENT_SCALE, msg
        );
        if settings.small_kernel {
            warn!("The kernel is very small, a larger low-pass may give a better solvent model");
        }
        warnings.push(msg);
    }
    progress.inc(1);

    checkpoint(cancel, "confidence")?;
    progress.set_message("confidence");
    let confidence = estimate_confidence(
        sol_data,
        &fit.params,
        config.hedge_confidence,
        SOLVENT_LEVELS,
        &mut sink,
    )?;
    drop(lp_data);
    progress.inc(1);

    let doc = if config.exclude_solvent {
        "solvent exclusion, "
    } else {
        ""
    };
    let mut modified_maps = Vec::new();
    for mode in &modes {
        checkpoint(cancel, mode.name())?;
        progress.set_message(mode.name());
        let fake = if mode.refills_solvent() && !config.exclude_solvent {
            let solvent = fit.params.solvent();
            Some(fake_solvent(
                n,
                voxel_size,
                solvent.mean,
                solvent.sigma,
                config.seed,
            )?)
        } else {
            None
        };
        let modified = modify(
            &in_data,
            &field.scale,
            mode,
            config.scale_limit,
            fake.as_ref(),
            &mut sink,
        )?;
        if config.save_all_maps {
            intermediate_maps.push(write_mrc_aligned(
                out_dir.join(format!("modification_{}_{}", mode.file_prefix(), new_name)),
                &modified.modification,
                Some("modification factor"),
                &parent,
            )?);
        }
        let suppressed = suppress(
            &modified.map,
            &in_data,
            &confidence.field,
            config.exclude_solvent,
        )?;
        let out = finish_output(suppressed, config, &input)?;
        let label = format!("{} {}{}", mode.file_prefix().replace('_', " "), doc, stem);
        modified_maps.push(write_mrc_aligned(
            out_dir.join(format!("{}_{}", mode.file_prefix(), base_out_name)),
            &out,
            Some(&label),
            &parent,
        )?);
        progress.inc(1);
    }

    let solvent_excluded_map = if modes.is_empty() && config.exclude_solvent {
        checkpoint(cancel, "solvent exclusion")?;
        let excluded = suppress(&in_data, &in_data, &confidence.field, true)?;
        let mut excluded = lowpass_map(&excluded, config.lowpass_output, voxel_size, true)?;
        if downscale {
            excluded = lowpass(
                &excluded,
                LowpassTarget::OutputSize { size: input.n() },
                true,
                true,
            )?;
        }
        Some(write_mrc_aligned(
            out_dir.join(&base_out_name),
            &excluded,
            Some("solvent exclusion"),
            &parent,
        )?)
    } else {
        None
    };

    checkpoint(cancel, "writing outputs")?;
    progress.set_message("writing outputs");
    let confidence_map = write_mrc_aligned(
        out_dir.join(format!("conf_{}", new_name)),
        &confidence.field,
        Some("occupy confidence"),
        &parent,
    )?;

    let threshold_maps = ((field.full_scale as f64 + fit.limits.high()) / 2.0) as f32;
    let tiles = field.tiles.as_ref().map(|t| tile_markers(t, &parent, factor));
    let warning_text = (!warnings.is_empty()).then(|| warnings.join(". "));
    let mut chimerax_scripts = Vec::new();
    if config.chimerax || config.chimerax_silent {
        let mut script = ChimeraxScript::new(input_path, &scale_map);
        script.outputs = modified_maps.clone();
        script.threshold_maps = Some(threshold_maps);
        script.threshold_scale = Some(variability_limit as f32);
        script.min_scale = config.min_vis_scale;
        script.warnings = warning_text;
        if config.chimerax {
            let mut interactive = script.clone();
            interactive.outputs.extend(solvent_excluded_map.iter().cloned());
            interactive.tiles = tiles;
            chimerax_scripts.push(interactive.write(out_dir)?);
        }
        if config.chimerax_silent {
            script.silent = true;
            chimerax_scripts.push(script.write(out_dir)?);
        }
    }

    let diagnostics = if sink.is_enabled() {
        if let Some(pivot) = config.pivot.filter(|p| *p > 0.0 && *p < 1.0) {
            for i in 0..5 {
                let order = 1.0 + pivot.sqrt() * 2f64.powi(i);
                let (x, y) = scale_mapping_sigmoid(pivot, order, SOLVENT_LEVELS);
                sink.add_series(MODIFICATION_FIGURE, &format!("sigmoid order {:.2}", order), x, y);
            }
        }
        let path = out_dir.join(format!("diagnostics_{}.json", stem));
        sink.save(&path)?;
        info!("\n{}", sink.render());
        Some(path)
    } else {
        None
    };

    let log = out_dir.join(format!("log_{}.txt", stem));
    let report = settings_report(
        input_path,
        &settings,
        config,
        &fit.limits,
        &fit.params,
        field.full_scale,
        variability_limit,
        lowest_confident_scale,
        &warnings,
    );
    fs::write(&log, &report).map_err(|e| OccupyError::from(e).with_path(&log))?;
    info!("\n{}", report);
    progress.inc(1);
    progress.finish_and_clear();

    if modes.is_empty() {
        info!("Done estimating local scale");
    } else {
        info!("Done estimating local scale and modifying input by local scale");
    }

    Ok(PipelineOutput {
        scale_map,
        confidence_map,
        modified_maps,
        solvent_excluded_map,
        intermediate_maps,
        chimerax_scripts,
        diagnostics,
        log,
        settings,
        limits: fit.limits,
        solvent: fit.params,
        full_scale: field.full_scale,
        variability_limit,
        lowest_confident_scale,
        warnings,
    })
}

#[allow(clippy::too_many_arguments)]
fn settings_report(
    input: &Path,
    settings: &Settings,
    config: &OccupyConfig,
    limits: &SolventLimits,
    solvent: &SolventModelParams,
    full_scale: f32,
    variability_limit: f64,
    lowest_confident_scale: f64,
    warnings: &[String],
) -> String {
    let mut s = String::new();
    // `write!` into a String cannot fail.
    let _ = writeln!(s, "--------------- I/O AND CALCULATED SETTINGS ---------------");
    let _ = writeln!(s, "Input     :        {}", input.display());
    let _ = writeln!(s, "Pix       : [A]    {:.2}", settings.voxel_size);
    let _ = writeln!(s, "Box in    : [pix]  {}", settings.input_size);
    let _ = writeln!(s, "Box proc  : [pix]  {}", settings.processing_size);
    if settings.processing_size != settings.input_size {
        let _ = writeln!(s, "Pix proc  : [A]    {:.2}", settings.processing_voxel_size);
    }
    let _ = writeln!(s, "Box radi  : [pix]  {}", settings.processing_size / 2);
    let _ = writeln!(s, "Kernel s  : [pix]  {}", settings.kernel_size);
    let _ = writeln!(s, "Kernel r  : [pix]  {:.2}", settings.kernel_radius);
    let _ = writeln!(s, "Kernel nv : [pix]  {}", settings.kernel_voxels);
    let _ = writeln!(s, "Tau       : [0,1]  {:.3}", settings.tau);
    if config.tau.is_some() {
        let _ = writeln!(s, "Tau(rec.) : [0,1]  {:.3}", settings.recommended_tau);
    }
    let _ = writeln!(s, "LP filt.  : [A]    {:.2}", settings.lowpass);
    let _ = writeln!(s, "Scale mode:        {}", config.scale_mode.tag());
    let _ = writeln!(s, "Scale lim : [0,1]  {:.3}", config.scale_limit);
    if let Some(lp) = config.lowpass_output {
        let _ = writeln!(s, "LP output : [A]    {:.2}", lp);
    }
    let _ = writeln!(s, "--------------- DETECTED LIMITS ---------------");
    let _ = writeln!(s, "Content at 1% of solvent  : {:.3}", limits.mid_high());
    let _ = writeln!(s, "Solvent drop to 0% (edge) : {:.3}", limits.high());
    let _ = writeln!(s, "Solvent peak              : {:.3}", solvent.solvent().mean);
    let _ = writeln!(s, "Full scale                : {:.3}", full_scale);
    let _ = writeln!(s, "Variability limit         : {:.3}", variability_limit);
    let _ = writeln!(s, "Scale confidence limit    : {:.3}", lowest_confident_scale);
    for warning in warnings {
        let _ = writeln!(s, "WARNING: {}", warning);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_lowpass() {
        assert_eq!(resolve_lowpass(None, None, 1.0), 8.0);
        assert_eq!(resolve_lowpass(None, None, 4.0), 12.0);
        assert_eq!(resolve_lowpass(None, Some(5.0), 1.0), 5.0);
        assert_eq!(resolve_lowpass(Some(6.0), Some(4.0), 1.0), 6.0);
        assert_eq!(resolve_lowpass(Some(6.0), Some(9.0), 1.0), 9.0);
    }

    #[test]
    fn test_auto_kernel_size() {
        assert_eq!(auto_kernel_size(8.0, 1.0), 9);
        assert_eq!(auto_kernel_size(8.0, 1.2), 7);
        assert_eq!(auto_kernel_size(8.0, 2.0), 5);
        assert_eq!(auto_kernel_size(8.0, 4.0), 3);
        assert_eq!(auto_kernel_size(30.0, 1.0), 9);
        assert_eq!(auto_kernel_size(1.0, 1.0), 3);
    }

    #[test]
    fn test_resolve_settings() {
        let config = OccupyConfig::default();
        let (settings, kernel) = resolve_settings(&config, 64, 1.0, 64, 1.0).unwrap();
        assert_eq!(settings.lowpass, 8.0);
        assert_eq!(settings.kernel_size, 9);
        assert_eq!(settings.kernel_radius, 4.0);
        assert_eq!(settings.kernel_voxels, kernel.count());
        assert_eq!(settings.tau, settings.recommended_tau);
        assert!(!settings.small_kernel);

        let coarse = OccupyConfig {
            tau: Some(0.9),
            ..Default::default()
        };
        let (settings, _) = resolve_settings(&coarse, 64, 4.0, 64, 4.0).unwrap();
        assert_eq!(settings.kernel_size, 3);
        assert!(settings.kernel_radius <= max_kernel_radius(3));
        assert!(settings.small_kernel);
        assert_eq!(settings.tau, 0.9);
    }

    #[test]
    fn test_explicit_radius_too_large() {
        let config = OccupyConfig {
            kernel_size: Some(3),
            kernel_radius: Some(6.0),
            ..Default::default()
        };
        assert!(matches!(
            resolve_settings(&config, 32, 1.0, 32, 1.0),
            Err(OccupyError::Configuration { .. })
        ));
    }

    #[test]
    fn test_tile_markers_in_angstrom() {
        let mut parent = MrcHeader::for_volume(&Volume::zeros(64, 2.0));
        parent.start = [10, 0, -4];
        let tiling = crate::scale::compute_tiling(32, Some(4), 4).unwrap();
        let extremum = |center| crate::scale::TileExtremum {
            index: [0, 0, 0],
            center,
            value: 1.0,
        };
        let tiles = TileDiagnostics {
            tiling,
            n_scanned: 8,
            max: extremum([2.0, 4.0, 6.0]),
            min: extremum([0.0, 0.0, 0.0]),
            radius: 2.0,
        };
        let markers = tile_markers(&tiles, &parent, 0.5);
        assert_eq!(markers.max_center, [2.0 * (4.0 + 10.0), 2.0 * 8.0, 2.0 * (12.0 - 4.0)]);
        assert_eq!(markers.min_center, [20.0, 0.0, -8.0]);
        assert_eq!(markers.radius, 8.0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = std::env::temp_dir().join(format!("occupy_cancel_{}", std::process::id()));
        let input = dir.join("map.mrc");
        fs::create_dir_all(&dir).unwrap();
        crate::mrc::write_mrc(&input, &Volume::zeros(8, 1.0), None).unwrap();
        let config = OccupyConfig {
            input_map: Some(input),
            output_dir: dir.clone(),
            ..Default::default()
        };
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            run(&config, &cancel),
            Err(OccupyError::Cancelled { stage: "reading input" })
        ));
        fs::remove_dir_all(&dir).ok();
    }
}
