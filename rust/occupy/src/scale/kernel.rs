use tracing::debug;

use crate::errors::{
    OccupyError,
    Result,
};
use crate::radial_mask::{
    RadialMask,
    radial_mask,
};

/// Bracket width at which the τ root search stops.
const TAU_TOLERANCE: f64 = 1e-12;

/// Recommended normalization percentile for a kernel sampling `n_v` voxels.
///
/// The unique root in (0,1) of `xⁿ + x − 1 = 0`: the percentile of a
/// reference distribution that equals the confidence of its own maximum over
/// `n_v` draws. Solved by Newton steps kept inside a shrinking bisection
/// bracket.
///
/// # Example
/// ```
/// use occupy::scale::set_tau;
/// assert!((set_tau(1) - 0.5).abs() < 1e-9);
/// assert!((set_tau(2) - 0.618034).abs() < 1e-6);
/// ```
pub fn set_tau(n_v: usize) -> f64 {
    let n = n_v.max(1) as f64;
    let f = |x: f64| x.powf(n) + x - 1.0;
    let df = |x: f64| n * x.powf(n - 1.0) + 1.0;

    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    let mut x = 0.5;
    for _ in 0..200 {
        let fx = f(x);
        if fx == 0.0 {
            return x;
        }
        if fx < 0.0 {
            lo = x;
        } else {
            hi = x;
        }
        if hi - lo < TAU_TOLERANCE {
            break;
        }
        let newton = x - fx / df(x);
        x = if newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }
    x
}

/// Largest radius an odd kernel of `size` may carry before its ball is
/// clipped by more than one voxel on each face.
pub fn max_kernel_radius(size: usize) -> f32 {
    (size as f32 + 2.0) / 2.0
}

/// Spherical structuring element for the max-filter and its recommended τ.
pub fn spherical_kernel(size: usize, radius: Option<f32>) -> Result<(RadialMask, f64)> {
    if size % 2 != 1 {
        return Err(OccupyError::config(format!(
            "kernels must be odd-sized, not size={}",
            size
        )));
    }
    if let Some(r) = radius {
        if !(r >= 0.0) || r > max_kernel_radius(size) {
            return Err(OccupyError::config(format!(
                "kernel radius {} requires a bigger odd-size kernel than {}",
                r, size
            )));
        }
    }
    let kernel = radial_mask(size, 3, None, radius)?;
    let n_v = kernel.count();
    if n_v == 0 {
        return Err(OccupyError::config(format!(
            "kernel of size {} and radius {:?} is empty",
            size, radius
        )));
    }
    let tau = set_tau(n_v);
    debug!("Kernel of {} voxels, recommended tau {:.4}", n_v, tau);
    Ok((kernel, tau))
}
