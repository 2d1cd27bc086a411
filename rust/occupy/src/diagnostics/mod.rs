//! Collects plot series from the estimation stages.
//!
//! A [`DiagnosticsSink`] is handed by reference to each stage that has
//! something to show. It renders terminal plots and writes a JSON report.
//! A disabled sink drops everything it is given.

pub mod plotting;

use serde::{
    Deserialize,
    Serialize,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

use crate::errors::{
    OccupyError,
    Result,
};

/// Histogram, solvent model and confidence curves.
pub const SOLVENT_FIGURE: &str = "solvent_model";

/// Content confidence per intensity level.
pub const CONFIDENCE_FIGURE: &str = "confidence";

/// Scale transfer functions.
pub const MODIFICATION_FIGURE: &str = "modification";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub label: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// A labelled vertical line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub label: String,
    pub x: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    pub name: String,
    pub log_y: bool,
    pub series: Vec<Series>,
    pub markers: Vec<Marker>,
}

#[derive(Debug, Default)]
pub struct DiagnosticsSink {
    enabled: bool,
    figures: Vec<Figure>,
}

impl DiagnosticsSink {
    pub fn new() -> Self {
        Self {
            enabled: true,
            figures: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn figures(&self) -> &[Figure] {
        &self.figures
    }

    pub fn figure(&self, name: &str) -> Option<&Figure> {
        self.figures.iter().find(|f| f.name == name)
    }

    fn figure_mut(&mut self, name: &str) -> &mut Figure {
        let pos = match self.figures.iter().position(|f| f.name == name) {
            Some(pos) => pos,
            None => {
                self.figures.push(Figure {
                    name: name.to_string(),
                    log_y: name == SOLVENT_FIGURE,
                    series: Vec::new(),
                    markers: Vec::new(),
                });
                self.figures.len() - 1
            }
        };
        &mut self.figures[pos]
    }

    pub fn add_series(&mut self, figure: &str, label: &str, x: Vec<f64>, y: Vec<f64>) {
        if !self.enabled {
            return;
        }
        let len = x.len().min(y.len());
        let (mut x, mut y) = (x, y);
        x.truncate(len);
        y.truncate(len);
        self.figure_mut(figure).series.push(Series {
            label: label.to_string(),
            x,
            y,
        });
    }

    pub fn add_marker(&mut self, figure: &str, label: &str, x: f64) {
        if !self.enabled {
            return;
        }
        self.figure_mut(figure).markers.push(Marker {
            label: label.to_string(),
            x,
        });
    }

    /// Terminal rendering of every figure.
    pub fn render(&self) -> String {
        self.figures
            .iter()
            .map(|f| plotting::format_figure(f, 72, 20))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write every figure as pretty JSON. A disabled sink writes nothing.
    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let file = File::create(path).map_err(|e| OccupyError::from(e).with_path(path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.figures)?;
        info!("Wrote diagnostics to {}", path.display());
        Ok(())
    }
}
