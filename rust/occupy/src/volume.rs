use crate::errors::{
    OccupyError,
    Result,
};

/// A cubic scalar field with a uniform voxel size.
///
/// Samples are stored flat with x running fastest, then y, then z; the same
/// order MRC files use for their data block.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    n: usize,
    voxel_size: f32,
    data: Vec<f32>,
}

/// Flat index of voxel (x, y, z) in a cube of side `n`.
#[inline(always)]
pub fn idx3d(x: usize, y: usize, z: usize, n: usize) -> usize {
    x + n * (y + n * z)
}

/// Rejects shapes that are not cubic or not even-sized.
pub fn require_even_cube(shape: [usize; 3], context: &'static str) -> Result<usize> {
    let n = shape[0];
    if shape[1] != n || shape[2] != n || n == 0 || n % 2 != 0 {
        return Err(OccupyError::InputShape { shape, context });
    }
    Ok(n)
}

impl Volume {
    pub fn new(n: usize, voxel_size: f32, data: Vec<f32>) -> Result<Self> {
        if data.len() != n * n * n {
            return Err(OccupyError::config(format!(
                "volume of side {} needs {} samples, got {}",
                n,
                n * n * n,
                data.len()
            )));
        }
        Ok(Self {
            n,
            voxel_size,
            data,
        })
    }

    pub fn zeros(n: usize, voxel_size: f32) -> Self {
        Self {
            n,
            voxel_size,
            data: vec![0.0; n * n * n],
        }
    }

    pub fn from_fn<F>(n: usize, voxel_size: f32, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(n * n * n);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    data.push(f(x, y, z));
                }
            }
        }
        Self {
            n,
            voxel_size,
            data,
        }
    }

    /// Same shape and voxel size, new samples.
    pub fn with_data(&self, data: Vec<f32>) -> Result<Self> {
        Self::new(self.n, self.voxel_size, data)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.n; 3]
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn set_voxel_size(&mut self, voxel_size: f32) {
        self.voxel_size = voxel_size;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[idx3d(x, y, z, self.n)]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: f32) {
        let n = self.n;
        self.data[idx3d(x, y, z, n)] = value;
    }

    pub fn min(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min(), self.max())
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.data.iter().map(|&v| v as f64).sum();
        (sum / self.data.len() as f64) as f32
    }

    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Self {
        Self {
            n: self.n,
            voxel_size: self.voxel_size,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Element-wise combination with another volume of the same side.
    pub fn zip_map<F: Fn(f32, f32) -> f32>(&self, other: &Volume, f: F) -> Result<Self> {
        if other.n != self.n {
            return Err(OccupyError::InputShape {
                shape: other.shape(),
                context: "Paired volume",
            });
        }
        Ok(Self {
            n: self.n,
            voxel_size: self.voxel_size,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }
}

/// Clamp `change` to the value range spanned by `reference`.
pub fn clip_to_range(change: &Volume, reference: (f32, f32)) -> Volume {
    let (lo, hi) = reference;
    change.map(|v| v.clamp(lo, hi))
}

/// Rescale to unit range and move onto [0,1].
pub fn uniscale(values: &[f32]) -> Vec<f32> {
    let lo = values.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = hi - lo;
    if !(span > 0.0) {
        return vec![0.0; values.len()];
    }
    values.iter().map(|&v| (v - lo) / span).collect()
}
