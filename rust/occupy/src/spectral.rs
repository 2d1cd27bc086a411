//! FFT low-pass filtering and Fourier resampling of cubic volumes.

use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{
    Fft,
    FftDirection,
    FftPlanner,
};
use std::sync::Arc;
use tracing::debug;

use crate::errors::{
    OccupyError,
    Result,
};
use crate::radial_mask::{
    RadialMask,
    radial_mask,
};
use crate::volume::{
    Volume,
    require_even_cube,
};

/// Forward/inverse 3D FFT plans for one cube side length.
///
/// Lines along each axis are transformed in parallel.
pub struct Fft3d {
    n: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl Fft3d {
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n,
            forward: planner.plan_fft(n, FftDirection::Forward),
            inverse: planner.plan_fft(n, FftDirection::Inverse),
        }
    }

    pub fn forward(&self, data: &mut [Complex64]) {
        transform_axes(data, self.n, &self.forward);
    }

    /// Inverse transform, normalized by `1/n³`.
    pub fn inverse(&self, data: &mut [Complex64]) {
        transform_axes(data, self.n, &self.inverse);
        let norm = 1.0 / (self.n * self.n * self.n) as f64;
        data.par_iter_mut().for_each(|v| *v *= norm);
    }
}

fn transform_axes(data: &mut [Complex64], n: usize, fft: &Arc<dyn Fft<f64>>) {
    // x lines are contiguous
    data.par_chunks_mut(n).for_each(|line| fft.process(line));

    // y lines stay within one z slab
    data.par_chunks_mut(n * n).for_each(|slab| {
        let mut line = vec![Complex64::new(0.0, 0.0); n];
        for x in 0..n {
            for y in 0..n {
                line[y] = slab[x + n * y];
            }
            fft.process(&mut line);
            for y in 0..n {
                slab[x + n * y] = line[y];
            }
        }
    });

    // z lines stride across slabs
    let view: &[Complex64] = data;
    let lines: Vec<Vec<Complex64>> = (0..n * n)
        .into_par_iter()
        .map(|xy| {
            let mut line: Vec<Complex64> = (0..n).map(|z| view[xy + n * n * z]).collect();
            fft.process(&mut line);
            line
        })
        .collect();
    for (xy, line) in lines.into_iter().enumerate() {
        for (z, v) in line.into_iter().enumerate() {
            data[xy + n * n * z] = v;
        }
    }
}

/// Signed frequency of FFT bin `i` on an even axis of length `n`.
#[inline]
fn signed_freq(i: usize, n: usize) -> i64 {
    if i < n / 2 {
        i as i64
    } else {
        i as i64 - n as i64
    }
}

/// Bin index of signed frequency `f` on an axis of length `n`.
#[inline]
fn freq_bin(f: i64, n: usize) -> usize {
    f.rem_euclid(n as i64) as usize
}

/// What the low-pass should keep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LowpassTarget {
    /// Keep spatial frequencies down to this resolution [Å].
    Resolution { resolution: f32 },
    /// Resample to this box size, keeping every frequency the new box can hold.
    OutputSize { size: usize },
}

/// Frequency window used when zeroing or cropping the spectrum.
enum Window {
    Square(i64),
    Radial { mask: RadialMask, offset: i64 },
}

impl Window {
    fn build(square: bool, keep: i64, grid: usize) -> Result<Self> {
        if square {
            return Ok(Window::Square(keep));
        }
        let offset = (grid / 2) as i64;
        let mask = radial_mask(grid, 3, Some(offset as f32), Some(keep as f32))?;
        Ok(Window::Radial { mask, offset })
    }

    #[inline]
    fn passes(&self, fx: i64, fy: i64, fz: i64) -> bool {
        match self {
            Window::Square(keep) => fx.abs() <= *keep && fy.abs() <= *keep && fz.abs() <= *keep,
            Window::Radial { mask, offset } => mask.get(&[
                (fx + offset) as usize,
                (fy + offset) as usize,
                (fz + offset) as usize,
            ]),
        }
    }
}

fn to_spectrum(volume: &Volume) -> Vec<Complex64> {
    let mut spectrum: Vec<Complex64> = volume
        .data()
        .par_iter()
        .map(|&v| Complex64::new(v as f64, 0.0))
        .collect();
    Fft3d::new(volume.n()).forward(&mut spectrum);
    spectrum
}

fn from_spectrum(mut spectrum: Vec<Complex64>, n: usize, gain: f64) -> Vec<f32> {
    Fft3d::new(n).inverse(&mut spectrum);
    spectrum.par_iter().map(|c| (c.re * gain) as f32).collect()
}

/// Low-pass filter a cubic, even-sized volume, optionally resampling it.
///
/// With [`LowpassTarget::Resolution`] the number of kept shells is
/// `floor(n * voxel_size / resolution)` (at least one). Asking for more shells
/// than the box holds without `resample` returns the input unchanged.
/// [`LowpassTarget::OutputSize`] always resamples: the spectrum is cropped or
/// zero-padded to the new box and the voxel size rescaled to match.
///
/// Returns the filtered volume, whose voxel size is the output voxel size.
pub fn lowpass(
    input: &Volume,
    target: LowpassTarget,
    square: bool,
    resample: bool,
) -> Result<Volume> {
    let n = require_even_cube(input.shape(), "Low-pass input")?;
    let voxel_size = input.voxel_size();

    let (keep, resample) = match target {
        LowpassTarget::OutputSize { size } => {
            if size == 0 || size % 2 != 0 {
                return Err(OccupyError::config(format!(
                    "resampled output size must be even and positive, got {}",
                    size
                )));
            }
            (size / 2, true)
        }
        LowpassTarget::Resolution { resolution } => {
            if !(resolution > 0.0) {
                return Err(OccupyError::config(format!(
                    "low-pass resolution must be positive, got {}",
                    resolution
                )));
            }
            let shells = ((n as f32 * voxel_size) / resolution).floor() as usize;
            (shells.max(1), resample)
        }
    };

    if 2 * keep > n && !resample {
        debug!(
            "Low-pass to {} shells exceeds the {}-voxel box without resampling, returning input",
            keep, n
        );
        return Ok(input.clone());
    }

    let out_n = if resample { 2 * keep } else { n };
    let out_voxel = if resample {
        voxel_size * n as f32 / (2 * keep) as f32
    } else {
        voxel_size
    };
    let keep_in = keep.min(n / 2) as i64;
    let window = Window::build(square, keep_in, out_n)?;

    let spectrum = to_spectrum(input);
    let mut out = vec![Complex64::new(0.0, 0.0); out_n * out_n * out_n];

    for z in 0..n {
        let fz = signed_freq(z, n);
        for y in 0..n {
            let fy = signed_freq(y, n);
            for x in 0..n {
                let fx = signed_freq(x, n);
                let inside = if resample {
                    // The output box holds [-keep, keep) on each axis.
                    [fx, fy, fz].iter().all(|&f| f >= -keep_in && f < keep_in)
                } else {
                    true
                };
                if inside && window.passes(fx, fy, fz) {
                    let o = freq_bin(fx, out_n)
                        + out_n * (freq_bin(fy, out_n) + out_n * freq_bin(fz, out_n));
                    out[o] = spectrum[x + n * (y + n * z)];
                }
            }
        }
    }

    let gain = if resample {
        (out_n as f64 / n as f64).powi(3)
    } else {
        1.0
    };
    let data = from_spectrum(out, out_n, gain);
    Volume::new(out_n, out_voxel, data)
}

/// Fixed-size radial low-pass with `max(1, floor(2n / (cutoff / voxel_size)))` shells.
///
/// With `keep_scale` the output is stretched about its mean so that its
/// maximum equals the input maximum. A missing cutoff is a no-op.
pub fn lowpass_map(
    input: &Volume,
    cutoff: Option<f32>,
    voxel_size: f32,
    keep_scale: bool,
) -> Result<Volume> {
    let Some(cutoff) = cutoff else {
        return Ok(input.clone());
    };
    let n = require_even_cube(input.shape(), "Low-pass input")?;
    if !(cutoff > 0.0) {
        return Err(OccupyError::config(format!(
            "low-pass cutoff must be positive, got {}",
            cutoff
        )));
    }
    let cutoff_level = ((2.0 * (n as f32 / (cutoff / voxel_size))).floor() as i64).max(1);
    let window = Window::build(false, cutoff_level.min(n as i64), n)?;

    let mut spectrum = to_spectrum(input);
    for z in 0..n {
        let fz = signed_freq(z, n);
        for y in 0..n {
            let fy = signed_freq(y, n);
            for x in 0..n {
                if !window.passes(signed_freq(x, n), fy, fz) {
                    spectrum[x + n * (y + n * z)] = Complex64::new(0.0, 0.0);
                }
            }
        }
    }
    let mut out = input.with_data(from_spectrum(spectrum, n, 1.0))?;

    if keep_scale {
        let ref_max = input.max();
        let m = out.mean();
        let r_max = out.max();
        if r_max > m {
            let stretch = (ref_max - m) / (r_max - m);
            out = out.map(|v| (v - m) * stretch + m);
        }
    }
    Ok(out)
}
