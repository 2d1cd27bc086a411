use rayon::prelude::*;

use crate::radial_mask::RadialMask;
use crate::volume::{
    Volume,
    idx3d,
};

/// Mirror an out-of-range coordinate back into `[0, n)`, repeating the edge
/// sample (`d c b a | a b c d | d c b a`).
#[inline]
fn reflect(i: isize, n: isize) -> usize {
    let period = 2 * n;
    let mut i = i.rem_euclid(period);
    if i >= n {
        i = period - i - 1;
    }
    i as usize
}

/// Grey-scale dilation: each voxel becomes the maximum over the kernel
/// footprint centered on it. Borders are handled by reflection.
pub fn grey_dilation(data: &Volume, kernel: &RadialMask) -> Volume {
    let n = data.n();
    let offsets = kernel.offsets_3d();
    let half = (kernel.size() / 2) as isize;
    let ni = n as isize;

    // Reflected coordinate for every (position, offset) pair along one axis.
    let span = (2 * half + 1) as usize;
    let table: Vec<usize> = (0..ni)
        .flat_map(|p| (-half..=half).map(move |d| reflect(p + d, ni)))
        .collect();
    let lookup = |p: usize, d: isize| table[p * span + (d + half) as usize];

    let src = data.data();
    let mut out = Volume::zeros(n, data.voxel_size());
    out.data_mut()
        .par_chunks_mut(n * n)
        .enumerate()
        .for_each(|(z, slab)| {
            for y in 0..n {
                for x in 0..n {
                    let mut best = f32::NEG_INFINITY;
                    for o in &offsets {
                        let v = src[idx3d(lookup(x, o[0]), lookup(y, o[1]), lookup(z, o[2]), n)];
                        if v > best {
                            best = v;
                        }
                    }
                    slab[x + n * y] = best;
                }
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radial_mask::radial_mask;

    #[test]
    fn test_reflect_repeats_edge() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!(reflect(2, 4), 2);
    }

    #[test]
    fn test_single_peak_spreads_to_footprint() {
        let mut v = Volume::zeros(8, 1.0);
        v.set(4, 4, 4, 5.0);
        let kernel = radial_mask(3, 3, None, Some(1.0)).unwrap();
        let d = grey_dilation(&v, &kernel);
        assert_eq!(d.get(4, 4, 4), 5.0);
        assert_eq!(d.get(3, 4, 4), 5.0);
        assert_eq!(d.get(4, 4, 5), 5.0);
        // Diagonal neighbours lie outside the 7-voxel cross.
        assert_eq!(d.get(3, 3, 4), 0.0);
        assert_eq!(d.get(4, 4, 6), 0.0);
    }

    #[test]
    fn test_dilation_never_decreases() {
        let v = Volume::from_fn(6, 1.0, |x, y, z| ((x * 7 + y * 3 + z * 5) % 11) as f32);
        let kernel = radial_mask(5, 3, None, Some(2.0)).unwrap();
        let d = grey_dilation(&v, &kernel);
        for (a, b) in v.data().iter().zip(d.data().iter()) {
            assert!(b >= a);
        }
    }

    #[test]
    fn test_dilation_keeps_geometry() {
        let v = Volume::from_fn(6, 1.7, |x, y, z| (x + y + z) as f32);
        let kernel = radial_mask(3, 3, None, Some(1.0)).unwrap();
        let d = grey_dilation(&v, &kernel);
        assert_eq!(d.n(), 6);
        assert_eq!(d.voxel_size(), 1.7);
        // The corner picks up its +x, +y and +z neighbours.
        assert_eq!(d.get(0, 0, 0), 1.0);
        assert_eq!(d.get(5, 5, 5), 15.0);
        assert_ne!(d.data(), v.data());
    }
}
