//! MRC2014 volumetric maps.
//!
//! Only what the estimator needs: little-endian files, cubic volumes, modes
//! 0, 1, 2, 6 and 12 on read and mode 2 on write. Data is reordered to x,y,z
//! on read whatever the stored axis order.

use half::f16;
use std::fs::File;
use std::io::{
    BufReader,
    BufWriter,
    Read,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    debug,
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

pub const HEADER_BYTES: usize = 1024;
const N_LABELS: usize = 10;
const LABEL_BYTES: usize = 80;
const LABEL_OFFSET: usize = 224;
const MAP_STAMP: &[u8; 4] = b"MAP ";
const LITTLE_ENDIAN_STAMP: [u8; 4] = [0x44, 0x44, 0x00, 0x00];
const MRC2014_VERSION: i32 = 20140;

#[derive(Debug, Clone, PartialEq)]
pub struct MrcHeader {
    /// Columns, rows and sections.
    pub shape: [usize; 3],
    pub mode: i32,
    /// `nxstart`, `nystart`, `nzstart`.
    pub start: [i32; 3],
    /// Sampling along each cell edge (`mx`, `my`, `mz`).
    pub grid: [i32; 3],
    /// Cell edge lengths in Å.
    pub cell: [f32; 3],
    pub angles: [f32; 3],
    /// Axis stored along columns, rows and sections (1 = x).
    pub axis_order: [i32; 3],
    pub dmin: f32,
    pub dmax: f32,
    pub dmean: f32,
    pub rms: f32,
    pub space_group: i32,
    pub extended_bytes: usize,
    pub origin: [f32; 3],
    pub labels: Vec<String>,
}

impl MrcHeader {
    /// Header for a fresh cubic map with x,y,z axis order.
    pub fn for_volume(volume: &Volume) -> Self {
        let n = volume.n();
        let edge = n as f32 * volume.voxel_size();
        let mut header = Self {
            shape: [n; 3],
            mode: 2,
            start: [0; 3],
            grid: [n as i32; 3],
            cell: [edge; 3],
            angles: [90.0; 3],
            axis_order: [1, 2, 3],
            dmin: 0.0,
            dmax: 0.0,
            dmean: 0.0,
            rms: 0.0,
            space_group: 1,
            extended_bytes: 0,
            origin: [0.0; 3],
            labels: Vec::new(),
        };
        header.update_statistics(volume.data());
        header
    }

    /// Voxel size along x.
    pub fn voxel_size(&self) -> f32 {
        if self.grid[0] > 0 {
            self.cell[0] / self.grid[0] as f32
        } else {
            0.0
        }
    }

    pub fn set_voxel_size(&mut self, voxel_size: f32) {
        for i in 0..3 {
            self.cell[i] = voxel_size * self.grid[i] as f32;
        }
    }

    pub fn update_statistics(&mut self, data: &[f32]) {
        if data.is_empty() {
            return;
        }
        let n = data.len() as f64;
        let (lo, hi, sum) = data.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(lo, hi, sum), &v| (lo.min(v), hi.max(v), sum + v as f64),
        );
        let mean = sum / n;
        let var = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        self.dmin = lo;
        self.dmax = hi;
        self.dmean = mean as f32;
        self.rms = var.sqrt() as f32;
    }

    /// Append a label, dropping the oldest once all ten slots are used.
    pub fn add_label(&mut self, label: &str) {
        let label: String = label.chars().filter(|c| c.is_ascii()).take(LABEL_BYTES).collect();
        if self.labels.len() == N_LABELS {
            self.labels.remove(0);
        }
        self.labels.push(label);
    }

    fn parse(bytes: &[u8; HEADER_BYTES]) -> Result<Self> {
        if bytes[212] == 0x11 {
            return Err(OccupyError::MrcFormat {
                path: None,
                msg: "big-endian files are not supported".to_string(),
            });
        }
        let i = |word: usize| i32::from_le_bytes(word_bytes(bytes, word));
        let f = |word: usize| f32::from_le_bytes(word_bytes(bytes, word));

        let mut shape = [0usize; 3];
        for (k, s) in shape.iter_mut().enumerate() {
            let v = i(k);
            if v <= 0 {
                return Err(OccupyError::MrcFormat {
                    path: None,
                    msg: format!("non-positive dimension {}", v),
                });
            }
            *s = v as usize;
        }
        let extended = i(23);
        if extended < 0 {
            return Err(OccupyError::MrcFormat {
                path: None,
                msg: format!("negative extended header size {}", extended),
            });
        }

        let n_labels = (i(55).max(0) as usize).min(N_LABELS);
        let labels = (0..n_labels)
            .map(|l| {
                let start = LABEL_OFFSET + l * LABEL_BYTES;
                String::from_utf8_lossy(&bytes[start..start + LABEL_BYTES])
                    .trim_end_matches(['\0', ' '])
                    .to_string()
            })
            .collect();

        Ok(Self {
            shape,
            mode: i(3),
            start: [i(4), i(5), i(6)],
            grid: [i(7), i(8), i(9)],
            cell: [f(10), f(11), f(12)],
            angles: [f(13), f(14), f(15)],
            axis_order: [i(16), i(17), i(18)],
            dmin: f(19),
            dmax: f(20),
            dmean: f(21),
            space_group: i(22),
            extended_bytes: extended as usize,
            origin: [f(49), f(50), f(51)],
            rms: f(54),
            labels,
        })
    }

    fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut bytes = [0u8; HEADER_BYTES];
        let mut put = |word: usize, value: [u8; 4]| {
            bytes[4 * word..4 * word + 4].copy_from_slice(&value);
        };
        for k in 0..3 {
            put(k, (self.shape[k] as i32).to_le_bytes());
            put(4 + k, self.start[k].to_le_bytes());
            put(7 + k, self.grid[k].to_le_bytes());
            put(10 + k, self.cell[k].to_le_bytes());
            put(13 + k, self.angles[k].to_le_bytes());
            put(16 + k, self.axis_order[k].to_le_bytes());
            put(49 + k, self.origin[k].to_le_bytes());
        }
        put(3, self.mode.to_le_bytes());
        put(19, self.dmin.to_le_bytes());
        put(20, self.dmax.to_le_bytes());
        put(21, self.dmean.to_le_bytes());
        put(22, self.space_group.to_le_bytes());
        put(23, (self.extended_bytes as i32).to_le_bytes());
        put(27, MRC2014_VERSION.to_le_bytes());
        put(52, *MAP_STAMP);
        put(53, LITTLE_ENDIAN_STAMP);
        put(54, self.rms.to_le_bytes());
        put(55, (self.labels.len().min(N_LABELS) as i32).to_le_bytes());
        for (l, label) in self.labels.iter().take(N_LABELS).enumerate() {
            let start = LABEL_OFFSET + l * LABEL_BYTES;
            let raw = label.as_bytes();
            let len = raw.len().min(LABEL_BYTES);
            bytes[start..start + len].copy_from_slice(&raw[..len]);
        }
        bytes
    }

    /// Stored axis order as zero-based axes, or x,y,z when the header does
    /// not hold a permutation.
    pub fn checked_axis_order(&self) -> [usize; 3] {
        let mut seen = [false; 3];
        for &a in &self.axis_order {
            if (1..=3).contains(&a) {
                seen[a as usize - 1] = true;
            }
        }
        if seen.iter().all(|&s| s) {
            self.axis_order.map(|a| a as usize - 1)
        } else {
            warn!(
                "Axis order {:?} is not a permutation, assuming x,y,z",
                self.axis_order
            );
            [0, 1, 2]
        }
    }
}

fn word_bytes(bytes: &[u8; HEADER_BYTES], word: usize) -> [u8; 4] {
    [
        bytes[4 * word],
        bytes[4 * word + 1],
        bytes[4 * word + 2],
        bytes[4 * word + 3],
    ]
}

#[derive(Debug, Clone)]
pub struct MrcMap {
    pub volume: Volume,
    pub header: MrcHeader,
}

fn decode_samples(mode: i32, raw: &[u8]) -> Result<Vec<f32>> {
    let values = match mode {
        0 => raw.iter().map(|&b| b as i8 as f32).collect(),
        1 => raw
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32)
            .collect(),
        2 => raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        6 => raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as f32)
            .collect(),
        12 => raw
            .chunks_exact(2)
            .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
            .collect(),
        other => {
            return Err(OccupyError::MrcFormat {
                path: None,
                msg: format!("unsupported data mode {}", other),
            });
        }
    };
    Ok(values)
}

fn bytes_per_sample(mode: i32) -> Result<usize> {
    match mode {
        0 => Ok(1),
        1 | 6 | 12 => Ok(2),
        2 => Ok(4),
        other => Err(OccupyError::MrcFormat {
            path: None,
            msg: format!("unsupported data mode {}", other),
        }),
    }
}

/// Read a cubic map. Non-cubic and odd-sized maps are rejected.
pub fn read_mrc(path: impl AsRef<Path>) -> Result<MrcMap> {
    let path = path.as_ref();
    read_mrc_inner(path).map_err(|e| e.with_path(path))
}

fn read_mrc_inner(path: &Path) -> Result<MrcMap> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut raw_header = [0u8; HEADER_BYTES];
    reader.read_exact(&mut raw_header)?;
    let header = MrcHeader::parse(&raw_header)?;

    let n = crate::volume::require_even_cube(header.shape, "Input map")?;

    // The declared sizes must fit the file before anything is allocated.
    let sample_bytes = bytes_per_sample(header.mode)?;
    let file_bytes = reader.get_ref().metadata()?.len();
    let data_bytes = n
        .checked_mul(n)
        .and_then(|v| v.checked_mul(n))
        .and_then(|v| v.checked_mul(sample_bytes))
        .filter(|&v| {
            v.checked_add(header.extended_bytes)
                .and_then(|v| v.checked_add(HEADER_BYTES))
                .is_some_and(|total| total as u64 <= file_bytes)
        });
    let Some(data_bytes) = data_bytes else {
        return Err(OccupyError::MrcFormat {
            path: None,
            msg: format!(
                "header declares {}³ samples of mode {} after {} extended bytes, \
                 but the file holds only {} bytes",
                n, header.mode, header.extended_bytes, file_bytes
            ),
        });
    };

    let mut extended = vec![0u8; header.extended_bytes];
    reader.read_exact(&mut extended)?;

    let mut raw = vec![0u8; data_bytes];
    reader.read_exact(&mut raw)?;
    let stored = decode_samples(header.mode, &raw)?;

    let order = header.checked_axis_order();
    let data = if order == [0, 1, 2] {
        stored
    } else {
        debug!("Reordering stored axes {:?} to x,y,z", header.axis_order);
        let mut data = vec![0.0f32; stored.len()];
        let mut i = 0;
        for s in 0..n {
            for r in 0..n {
                for c in 0..n {
                    let mut xyz = [0usize; 3];
                    xyz[order[0]] = c;
                    xyz[order[1]] = r;
                    xyz[order[2]] = s;
                    data[idx3d(xyz[0], xyz[1], xyz[2], n)] = stored[i];
                    i += 1;
                }
            }
        }
        data
    };

    let mut voxel_size = header.voxel_size();
    if !(voxel_size > 0.0) {
        warn!("Map has no valid voxel size, assuming 1 Å");
        voxel_size = 1.0;
    }
    let volume = Volume::new(n, voxel_size, data)?;
    debug!(
        "Read {} ({}³, {:.3} Å/voxel, mode {})",
        path.display(),
        n,
        voxel_size,
        header.mode
    );
    Ok(MrcMap { volume, header })
}

/// `name` with its extension replaced by `.mrc`.
pub fn mrc_path(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().with_extension("mrc")
}

impl MrcMap {
    /// Write as mode 2 with refreshed statistics. Returns the written path.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = mrc_path(path);
        let mut header = self.header.clone();
        header.mode = 2;
        header.shape = [self.volume.n(); 3];
        header.axis_order = [1, 2, 3];
        header.extended_bytes = 0;
        header.update_statistics(self.volume.data());

        let write = || -> Result<()> {
            let mut writer = BufWriter::new(File::create(&path)?);
            writer.write_all(&header.to_bytes())?;
            for &v in self.volume.data() {
                writer.write_all(&v.to_le_bytes())?;
            }
            writer.flush()?;
            Ok(())
        };
        write().map_err(|e| e.with_path(&path))?;
        Ok(path)
    }
}

fn labelled_header(volume: &Volume, label: Option<&str>) -> MrcHeader {
    let mut header = MrcHeader::for_volume(volume);
    header.add_label(concat!("Created by occupy ", env!("CARGO_PKG_VERSION")));
    if let Some(label) = label {
        header.add_label(label);
    }
    header
}

/// Write `volume` to a fresh mode-2 map with an optional provenance label.
pub fn write_mrc(path: impl AsRef<Path>, volume: &Volume, label: Option<&str>) -> Result<PathBuf> {
    let map = MrcMap {
        volume: volume.clone(),
        header: labelled_header(volume, label),
    };
    let path = map.write(path)?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Like [`write_mrc`], with the header aligned to `parent` through
/// [`adjust_to_parent`] before writing.
pub fn write_mrc_aligned(
    path: impl AsRef<Path>,
    volume: &Volume,
    label: Option<&str>,
    parent: &MrcHeader,
) -> Result<PathBuf> {
    let mut header = labelled_header(volume, label);
    adjust_to_parent(&mut header, parent);
    let mut volume = volume.clone();
    volume.set_voxel_size(header.voxel_size());
    let path = MrcMap { volume, header }.write(path)?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Align a map to the grid of a parent covering the same box with different
/// sampling: the voxel size is scaled by `parent_n / child_n` and the start
/// indices by its inverse, reordered to x,y,z.
pub fn adjust_to_parent(child: &mut MrcHeader, parent: &MrcHeader) {
    let factor = parent.shape[0] as f32 / child.shape[0] as f32;
    child.set_voxel_size(parent.voxel_size() * factor);
    // Parent starts are stored per column, row and section.
    let order = parent.checked_axis_order();
    for k in 0..3 {
        child.start[order[k]] = (parent.start[k] as f32 / factor).round() as i32;
    }
    child.axis_order = [1, 2, 3];
    child.origin = parent.origin;
}

/// Rewrite the map at `path` aligned to the map at `parent`.
pub fn adjust_file_to_parent(path: impl AsRef<Path>, parent: impl AsRef<Path>) -> Result<PathBuf> {
    let parent = read_mrc(parent)?;
    let mut map = read_mrc(path.as_ref())?;
    adjust_to_parent(&mut map.header, &parent.header);
    map.volume.set_voxel_size(map.header.voxel_size());
    map.write(path.as_ref())
}
