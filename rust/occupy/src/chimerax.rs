//! ChimeraX command scripts for inspecting estimator output.

use std::fmt::Write as _;
use std::fs;
use std::path::{
    Path,
    PathBuf,
};
use tracing::info;

use crate::errors::{
    OccupyError,
    Result,
};
use crate::histogram::linspace;

const TURBO: [&str; 9] = [
    "#cc3920", "#f0682e", "#faab46", "#dcdc4b", "#a4fa4f", "#56f582", "#36d7c3", "#46a4f6",
    "#4d6edf",
];

const SNAPSHOT_SIZE: u32 = 600;
const SUPERSAMPLE: u32 = 3;

/// Spheres marking the tiles that set the largest and smallest percentile,
/// in Å.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileMarkers {
    pub max_center: [f64; 3],
    pub min_center: [f64; 3],
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChimeraxScript {
    pub input: PathBuf,
    pub scale: PathBuf,
    /// Modified maps, colored by scale and opened after the scale map.
    pub outputs: Vec<PathBuf>,
    pub threshold_maps: Option<f32>,
    pub threshold_scale: Option<f32>,
    /// Lower end of the scale color range.
    pub min_scale: f32,
    pub tiles: Option<TileMarkers>,
    /// Save four snapshots and exit instead of leaving the session open.
    pub silent: bool,
    pub warnings: Option<String>,
}

impl ChimeraxScript {
    pub fn new(input: impl Into<PathBuf>, scale: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            scale: scale.into(),
            outputs: Vec::new(),
            threshold_maps: None,
            threshold_scale: None,
            min_scale: 0.2,
            tiles: None,
            silent: false,
            warnings: None,
        }
    }

    fn ident(&self) -> String {
        let stem = self
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "map".to_string());
        if self.silent {
            format!("{}_silent", stem)
        } else {
            stem
        }
    }

    pub fn file_name(&self) -> String {
        format!("chimX_{}.cxc", self.ident())
    }

    fn palette(&self) -> (String, String) {
        let vals = linspace(0.0, 1.0, TURBO.len());
        let key_vals = linspace(self.min_scale as f64, 1.0, TURBO.len());
        let palette = vals
            .iter()
            .zip(TURBO.iter())
            .map(|(v, c)| format!("{:.2},{}", v, c))
            .collect::<Vec<_>>()
            .join(":");
        let key_labels = key_vals
            .iter()
            .map(|v| format!(" :{:.2}", v))
            .collect::<String>();
        (format!("'{}'", palette), key_labels)
    }

    pub fn render(&self) -> String {
        let mut s = String::new();
        let (palette, key_labels) = self.palette();

        // `write!` into a String cannot fail.
        let _ = writeln!(s, "open {}", self.input.display());
        if let Some(level) = self.threshold_maps {
            let _ = writeln!(s, "vol #1 level {}", level);
        }
        let _ = writeln!(s, "open {}", self.scale.display());
        if let Some(level) = self.threshold_scale {
            let _ = writeln!(s, "vol #2 level {}", level);
        }
        let _ = writeln!(s, "hide #2");

        for alias in ["scale_color", "set_scale_color_range"] {
            let _ = writeln!(
                s,
                "alias {} color sample $1 map $2 palette {} range {},1.0",
                alias, palette, self.min_scale
            );
        }
        let _ = writeln!(s, "volume #1 color #d3d7cf");
        let _ = writeln!(s, "volume #2 color #A7A7A750");
        let _ = writeln!(s, "volume #2 style mesh");
        let _ = writeln!(s, "scale_color #1 #2");

        let mut model = 2;
        for output in &self.outputs {
            model += 1;
            let _ = writeln!(s, "open {}", output.display());
            let _ = writeln!(s, "scale_color #{} #2", model);
            if let Some(level) = self.threshold_maps {
                let _ = writeln!(s, "vol #{} level {}", model, level);
            }
            let _ = writeln!(s, "hide #{}", model);
        }

        let levelled = std::iter::once(1)
            .chain(3..=model)
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(s, "alias occupy_level vol #{} level $1", levelled);

        if let Some(tiles) = &self.tiles {
            let [mx, my, mz] = tiles.max_center;
            let [nx, ny, nz] = tiles.min_center;
            let _ = writeln!(
                s,
                "alias show_max_tile shape sphere center {:.2}, {:.2}, {:.2} radius {:.2}",
                mx, my, mz, tiles.radius
            );
            let _ = writeln!(
                s,
                "alias show_min_tile shape sphere center {:.2}, {:.2}, {:.2} radius {:.2}",
                nx, ny, nz, tiles.radius
            );
            let _ = writeln!(s, "show_max_tile");
            model += 1;
            let _ = writeln!(s, "rename #{} maxTile id #{}.1", model, model);
            let _ = writeln!(s, "show_min_tile");
            let _ = writeln!(s, "rename #{} minTile id #{}.2", model + 1, model);
            let _ = writeln!(s, "color #{}.1 #4d6edf54", model);
            let _ = writeln!(s, "color #{}.2 #cc392054", model);
            let _ = writeln!(s, "hide #{}", model);
            let _ = writeln!(s, "rename #{} Tiles", model);
        }

        let _ = writeln!(
            s,
            "key {} {} size 0.5, 0.04 pos 0.25, 0.08 ticks true tickThickness 2 fontSize 20",
            palette, key_labels
        );
        let _ = writeln!(s, "lighting soft");
        let _ = writeln!(s, "set bgColor white");
        let _ = writeln!(s, "tool hide log");

        if let Some(warnings) = &self.warnings {
            let (size, pos) = if self.silent {
                (4, "x .05 y .95")
            } else {
                (20, "x .05 y .3")
            };
            let _ = writeln!(
                s,
                "2dlab text \"{}\" color black size {} {} bold true",
                warnings, size, pos
            );
            let _ = writeln!(s, "2dlab text \"X\" color black size {} x .4 y .3 bold true", 20 * size);
        }

        if self.silent {
            let ident = self.ident();
            if !self.outputs.is_empty() {
                let _ = writeln!(s, "hide #1");
            }
            let _ = writeln!(s, "hide #2");
            for rot in 1..=4 {
                if rot > 1 {
                    let _ = writeln!(s, "turn x 75");
                    let _ = writeln!(s, "turn y 35");
                    let _ = writeln!(s, "view");
                }
                let _ = writeln!(
                    s,
                    "save {}_rot{}.png supersample {} width {} height {}",
                    ident, rot, SUPERSAMPLE, SNAPSHOT_SIZE, SNAPSHOT_SIZE
                );
            }
            let _ = writeln!(s, "exit");
        } else {
            let _ = writeln!(s, "camera ortho");
        }
        s
    }

    /// Write the script into `dir`, returning its path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        fs::write(&path, self.render()).map_err(|e| OccupyError::from(e).with_path(&path))?;
        info!("Wrote ChimeraX script {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_script() {
        let script = ChimeraxScript::new("maps/emd_1234.mrc", "scale_occupancy_emd_1234.mrc");
        assert_eq!(script.file_name(), "chimX_emd_1234.cxc");
        let text = script.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "open maps/emd_1234.mrc");
        assert_eq!(lines[1], "open scale_occupancy_emd_1234.mrc");
        assert_eq!(lines[2], "hide #2");
        assert!(text.contains("palette '0.00,#cc3920:"));
        assert!(text.contains(",#f0682e:0.25,#faab46:"));
        assert!(text.contains(":1.00,#4d6edf' range"));
        assert!(text.contains("range 0.2,1.0"));
        assert!(text.contains("alias occupy_level vol #1 level $1"));
        assert!(text.contains(" :0.20 :0.30 :0.40"));
        assert_eq!(*lines.last().unwrap(), "camera ortho");
    }

    #[test]
    fn test_outputs_and_tiles_numbered() {
        let mut script = ChimeraxScript::new("in.mrc", "scale.mrc");
        script.outputs = vec![PathBuf::from("ampl_2.0_in.mrc"), PathBuf::from("attn_2.0_in.mrc")];
        script.threshold_maps = Some(0.5);
        script.tiles = Some(TileMarkers {
            max_center: [10.0, 12.0, 14.0],
            min_center: [1.0, 2.0, 3.0],
            radius: 6.0,
        });
        let text = script.render();
        assert!(text.contains("open attn_2.0_in.mrc\nscale_color #4 #2\nvol #4 level 0.5\nhide #4"));
        assert!(text.contains("alias occupy_level vol #1,3,4 level $1"));
        assert!(text.contains("center 10.00, 12.00, 14.00 radius 6.00"));
        assert!(text.contains("rename #5 maxTile id #5.1"));
        assert!(text.contains("rename #6 minTile id #5.2"));
    }

    #[test]
    fn test_silent_snapshots() {
        let mut script = ChimeraxScript::new("in.mrc", "scale.mrc");
        script.silent = true;
        script.warnings = Some("Solvent model fit is likely bad".to_string());
        assert_eq!(script.file_name(), "chimX_in_silent.cxc");
        let text = script.render();
        assert!(text.contains("size 4 x .05 y .95 bold true"));
        assert_eq!(text.matches(".png supersample 3 width 600 height 600").count(), 4);
        assert_eq!(text.matches("turn x 75").count(), 3);
        assert!(text.contains("save in_silent_rot4.png"));
        assert!(text.trim_end().ends_with("exit"));
        assert!(!text.contains("hide #1"));
    }
}
