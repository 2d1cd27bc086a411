use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    info,
    warn,
};

use crate::errors::{
    OccupyError,
    Result,
};
use crate::volume::{
    Volume,
    idx3d,
};

pub const DEFAULT_N_TILES: usize = 20;
pub const DEFAULT_TILE_SIZE: usize = 12;

/// Which tiles of the grid take part in the percentile scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TilePolicy {
    /// Only tiles whose grid index lies inside the sphere inscribed in the
    /// tile grid. Corner tiles are mostly solvent.
    #[default]
    Sphere,
    All,
}

/// Placement of `n_tiles` tiles of `tile_size` voxels along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tiling {
    pub tile_size: usize,
    pub n_tiles: usize,
    pub step: usize,
    pub edge: usize,
}

impl Tiling {
    /// First voxel of tile `index` along one axis.
    pub fn start(&self, index: usize) -> usize {
        self.edge + self.step * index
    }

    /// Voxel center of tile `index` along one axis.
    pub fn center(&self, index: usize) -> f64 {
        self.start(index) as f64 + self.tile_size as f64 / 2.0
    }

    pub fn tile_volume(&self) -> usize {
        self.tile_size.pow(3)
    }

    fn retained(&self, policy: TilePolicy) -> Vec<[usize; 3]> {
        let nt = self.n_tiles;
        let half = nt as f64 / 2.0;
        let mut tiles = Vec::with_capacity(nt * nt * nt);
        for i in 0..nt {
            for j in 0..nt {
                for k in 0..nt {
                    let keep = match policy {
                        TilePolicy::All => true,
                        TilePolicy::Sphere => {
                            let r = ((i as f64 - half).powi(2)
                                + (j as f64 - half).powi(2)
                                + (k as f64 - half).powi(2))
                            .sqrt();
                            r < half - 1.0
                        }
                    };
                    if keep {
                        tiles.push([i, j, k]);
                    }
                }
            }
        }
        tiles
    }
}

/// Lay out the tile grid for a box of `n` voxels.
///
/// The tile size defaults to `n / n_tiles`. When more tiles are requested
/// than fit the box, the count is reduced to the maximum and a note logged.
pub fn compute_tiling(n: usize, tile_size: Option<usize>, n_tiles: usize) -> Result<Tiling> {
    if n_tiles == 0 {
        return Err(OccupyError::config("the tile count must be at least 1"));
    }
    let tile_size = tile_size.unwrap_or(n / n_tiles);
    if tile_size == 0 || tile_size > n {
        return Err(OccupyError::config(format!(
            "tile size {} does not fit a box of {} voxels",
            tile_size, n
        )));
    }

    let max_tiles = n - tile_size + 1;
    let mut n_tiles = n_tiles;
    if n_tiles > max_tiles {
        info!(
            "Requested {} tiles of size {} but only {} fit a box of {}, using {}",
            n_tiles, tile_size, max_tiles, n, max_tiles
        );
        n_tiles = max_tiles;
    }

    let (step, edge) = if n_tiles == 1 {
        (tile_size, (n - tile_size) / 2)
    } else {
        let spare = n as i64 - (n_tiles * tile_size) as i64;
        let step = (tile_size as i64 + spare.div_euclid(n_tiles as i64 - 1)).max(1);
        let covered = (n_tiles as i64 - 1) * step + tile_size as i64;
        let edge = (n as i64 - covered).div_euclid(2).max(0);
        (step as usize, edge as usize)
    };

    Ok(Tiling {
        tile_size,
        n_tiles,
        step,
        edge,
    })
}

/// A tile that achieved an extremum of the percentile scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileExtremum {
    pub index: [usize; 3],
    /// Voxel coordinates of the tile center.
    pub center: [f64; 3],
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDiagnostics {
    pub tiling: Tiling,
    pub n_scanned: usize,
    pub max: TileExtremum,
    pub min: TileExtremum,
    /// Radius of a tile, in voxels.
    pub radius: f64,
}

fn tile_percentile(data: &Volume, tiling: &Tiling, tile: [usize; 3], rank: usize) -> f32 {
    let n = data.n();
    let ts = tiling.tile_size;
    let [x0, y0, z0] = tile.map(|i| tiling.start(i));
    let mut values = Vec::with_capacity(tiling.tile_volume());
    for z in z0..z0 + ts {
        for y in y0..y0 + ts {
            let row = idx3d(x0, y, z, n);
            values.extend_from_slice(&data.data()[row..row + ts]);
        }
    }
    let (_, v, _) = values.select_nth_unstable_by(rank, |a, b| a.total_cmp(b));
    *v
}

/// Scan the retained tiles for their τ-percentile value and return the
/// tiles holding the largest and smallest of those.
pub fn percentile_scan(
    data: &Volume,
    tiling: &Tiling,
    tau: f64,
    policy: TilePolicy,
) -> Result<TileDiagnostics> {
    let mut tiles = tiling.retained(policy);
    if tiles.is_empty() {
        warn!(
            "No tile of a {}-tile grid lies inside the inscribed sphere, scanning all tiles",
            tiling.n_tiles
        );
        tiles = tiling.retained(TilePolicy::All);
    }
    let rank = ((tau * tiling.tile_volume() as f64).floor() as usize).min(tiling.tile_volume() - 1);

    let values: Vec<f32> = tiles
        .par_iter()
        .map(|&tile| tile_percentile(data, tiling, tile, rank))
        .collect();

    // Ties resolve to the first tile in scan order.
    let mut max_at = 0;
    let mut min_at = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[max_at] {
            max_at = i;
        }
        if v < values[min_at] {
            min_at = i;
        }
    }

    let extremum = |at: usize| {
        let index = tiles[at];
        TileExtremum {
            index,
            center: index.map(|i| tiling.center(i)),
            value: values[at],
        }
    };

    Ok(TileDiagnostics {
        tiling: *tiling,
        n_scanned: tiles.len(),
        max: extremum(max_at),
        min: extremum(min_at),
        radius: tiling.tile_size as f64 / 2.0,
    })
}
