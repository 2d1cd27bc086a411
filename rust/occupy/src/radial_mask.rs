//! Circular and spherical masks over square/cubic grids.
//!
//! Masks double as morphological kernels for the max-filter and as
//! frequency-domain windows for the low-pass filter.

use crate::errors::{
    OccupyError,
    Result,
};

/// Boolean disk (2D) or ball (3D) sampled on a `size`-sided grid.
///
/// Stored flat with the first axis running fastest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadialMask {
    size: usize,
    dim: usize,
    values: Vec<bool>,
}

impl RadialMask {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn values(&self) -> &[bool] {
        &self.values
    }

    /// Number of voxels inside the mask.
    pub fn count(&self) -> usize {
        self.values.iter().filter(|&&v| v).count()
    }

    pub fn get(&self, coords: &[usize]) -> bool {
        let idx = coords
            .iter()
            .rev()
            .fold(0usize, |acc, &c| acc * self.size + c);
        self.values[idx]
    }

    /// Offsets (relative to the grid center voxel) of every voxel inside the mask.
    ///
    /// Only meaningful for odd sizes, where the center is a voxel.
    pub fn offsets_3d(&self) -> Vec<[isize; 3]> {
        let half = (self.size / 2) as isize;
        let s = self.size;
        let mut out = Vec::with_capacity(self.count());
        for z in 0..s {
            for y in 0..s {
                for x in 0..s {
                    if self.values[x + s * (y + s * z)] {
                        out.push([x as isize - half, y as isize - half, z as isize - half]);
                    }
                }
            }
        }
        out
    }
}

/// Create a circular (`dim == 2`) or spherical (`dim == 3`) mask.
///
/// The center defaults to the middle of the grid, `(size - 1) / 2`, which for
/// even sizes sits half a voxel below `size / 2` on every axis. The radius
/// defaults to the center value. Distances are evaluated in `f32`.
///
/// # Example
/// ```
/// use occupy::radial_mask::radial_mask;
/// let mask = radial_mask(5, 3, None, Some(1.0)).unwrap();
/// assert_eq!(mask.count(), 7);
/// ```
pub fn radial_mask(
    size: usize,
    dim: usize,
    center: Option<f32>,
    radius: Option<f32>,
) -> Result<RadialMask> {
    if dim != 2 && dim != 3 {
        return Err(OccupyError::config(format!(
            "radial masks are 2D or 3D, got dim={}",
            dim
        )));
    }
    let center = center.unwrap_or((size as f32 - 1.0) / 2.0);
    let radius = radius.unwrap_or(center);

    let sq: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            d * d
        })
        .collect();

    let mut values = Vec::with_capacity(size.pow(dim as u32));
    if dim == 2 {
        for y in 0..size {
            for x in 0..size {
                values.push((sq[x] + sq[y]).sqrt() <= radius);
            }
        }
    } else {
        for z in 0..size {
            for y in 0..size {
                for x in 0..size {
                    values.push((sq[x] + sq[y] + sq[z]).sqrt() <= radius);
                }
            }
        }
    }

    Ok(RadialMask { size, dim, values })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_mask_is_reflection_symmetric() {
        for size in [3usize, 5, 7, 9, 11] {
            for r in [0.5f32, 1.0, 1.7, 2.5, 4.0] {
                let m = radial_mask(size, 3, None, Some(r)).unwrap();
                for z in 0..size {
                    for y in 0..size {
                        for x in 0..size {
                            let v = m.get(&[x, y, z]);
                            assert_eq!(v, m.get(&[size - 1 - x, y, z]), "x-flip size {}", size);
                            assert_eq!(v, m.get(&[x, size - 1 - y, z]), "y-flip size {}", size);
                            assert_eq!(v, m.get(&[x, y, size - 1 - z]), "z-flip size {}", size);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_even_mask_is_symmetric_about_half_voxel_center() {
        let m = radial_mask(8, 2, None, None).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(m.get(&[x, y]), m.get(&[7 - x, 7 - y]));
            }
        }
        assert!(m.get(&[1, 3]));
        assert!(!m.get(&[0, 3]));
        assert!(!m.get(&[0, 0]));
    }

    #[test]
    fn test_known_counts() {
        assert_eq!(radial_mask(3, 3, None, Some(1.0)).unwrap().count(), 7);
        assert_eq!(radial_mask(3, 3, None, Some(0.0)).unwrap().count(), 1);
        assert_eq!(radial_mask(3, 2, None, Some(1.5)).unwrap().count(), 9);
        assert_eq!(radial_mask(3, 3, None, Some(2.0)).unwrap().count(), 27);
    }

    #[test]
    fn test_offsets_are_centered() {
        let m = radial_mask(3, 3, None, Some(1.0)).unwrap();
        let offsets = m.offsets_3d();
        assert_eq!(offsets.len(), 7);
        assert!(offsets.contains(&[0, 0, 0]));
        assert!(offsets.contains(&[-1, 0, 0]));
        assert!(!offsets.contains(&[1, 1, 0]));
    }

    #[test]
    fn test_bad_dim_rejected() {
        assert!(radial_mask(4, 4, None, None).is_err());
    }
}
