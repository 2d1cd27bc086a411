// ANSI color codes
const COLOR_GRAY: &str = "\x1b[90m";
const COLOR_BLUE: &str = "\x1b[94m";
const COLOR_CYAN: &str = "\x1b[96m";
const COLOR_RED: &str = "\x1b[91m";
const COLOR_GREEN: &str = "\x1b[92m";
const COLOR_RESET: &str = "\x1b[0m";

const SERIES_STYLES: [(char, &str); 4] = [
    ('●', COLOR_CYAN),
    ('•', COLOR_GREEN),
    ('◆', COLOR_RED),
    ('▪', COLOR_BLUE),
];

use super::Figure;

/// Cell content of the plot canvas.
#[derive(Clone, Copy, PartialEq)]
enum Cell {
    Empty,
    Axis(char),
    Marker,
    Point(usize),
}

/// Formats a figure as a colored terminal plot.
///
/// Every series shares the axes; markers are drawn as vertical lines. With
/// `log_y`, non-positive samples are dropped.
///
/// # Arguments
/// * `figure` - Series and markers to draw
/// * `width` - Number of columns for the plot area
/// * `height` - Number of rows for the plot area
pub fn format_figure(figure: &Figure, width: usize, height: usize) -> String {
    let width = width.max(2);
    let height = height.max(2);
    let transform = |y: f64| -> Option<f64> {
        if figure.log_y {
            if y > 0.0 { Some(y.log10()) } else { None }
        } else if y.is_finite() {
            Some(y)
        } else {
            None
        }
    };

    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for s in &figure.series {
        for (&x, &y) in s.x.iter().zip(s.y.iter()) {
            if let Some(ty) = transform(y) {
                if x.is_finite() {
                    x_min = x_min.min(x);
                    x_max = x_max.max(x);
                    y_min = y_min.min(ty);
                    y_max = y_max.max(ty);
                }
            }
        }
    }

    // Handle edge cases
    if !x_min.is_finite() || !x_max.is_finite() || x_min == x_max {
        x_min = -1.0;
        x_max = 1.0;
    }
    if !y_min.is_finite() || !y_max.is_finite() || y_min == y_max {
        y_min = -1.0;
        y_max = 1.0;
    }
    let x_span = x_max - x_min;
    let y_span = y_max - y_min;

    let col_of = |x: f64| (((x - x_min) / x_span) * (width - 1) as f64).round() as usize;
    let row_of = |y: f64| {
        let normalized = (y - y_min) / y_span;
        (((1.0 - normalized) * (height - 1) as f64).round() as usize).min(height - 1)
    };

    let mut grid = vec![vec![Cell::Empty; width]; height];

    if !figure.log_y && y_min <= 0.0 && y_max >= 0.0 {
        let r = row_of(0.0);
        for cell in grid[r].iter_mut() {
            *cell = Cell::Axis('─');
        }
    }

    for m in &figure.markers {
        if m.x >= x_min && m.x <= x_max {
            let c = col_of(m.x).min(width - 1);
            for row in grid.iter_mut() {
                row[c] = Cell::Marker;
            }
        }
    }

    for (si, s) in figure.series.iter().enumerate() {
        for (&x, &y) in s.x.iter().zip(s.y.iter()) {
            if let Some(ty) = transform(y) {
                if x.is_finite() {
                    let c = col_of(x).min(width - 1);
                    grid[row_of(ty)][c] = Cell::Point(si % SERIES_STYLES.len());
                }
            }
        }
    }

    let mut output = String::new();
    output.push_str(&format!("  {}\n", figure.name));

    // Top border
    output.push('╔');
    output.push_str(&"═".repeat(width));
    output.push_str("╗\n");

    for row in &grid {
        output.push('║');
        for cell in row {
            match cell {
                Cell::Empty => output.push(' '),
                Cell::Axis(ch) => output.push_str(&format!("{}{}{}", COLOR_GRAY, ch, COLOR_RESET)),
                Cell::Marker => output.push_str(&format!("{}│{}", COLOR_GRAY, COLOR_RESET)),
                Cell::Point(style) => {
                    let (glyph, color) = SERIES_STYLES[*style];
                    output.push_str(&format!("{}{}{}", color, glyph, COLOR_RESET));
                }
            }
        }
        output.push_str("║\n");
    }

    // Bottom border
    output.push('╚');
    output.push_str(&"═".repeat(width));
    output.push_str("╝\n");

    // Legend with ranges
    let y_label = if figure.log_y { "log10 Y" } else { "Y" };
    output.push_str(&format!(
        "\n  X: [{:.3}, {:.3}]  {}: [{:.3}, {:.3}]\n",
        x_min, x_max, y_label, y_min, y_max
    ));
    for (si, s) in figure.series.iter().enumerate() {
        let (glyph, color) = SERIES_STYLES[si % SERIES_STYLES.len()];
        output.push_str(&format!("  {}{}{} {}\n", color, glyph, COLOR_RESET, s.label));
    }
    for m in &figure.markers {
        output.push_str(&format!("  │ {:.3}: {}\n", m.x, m.label));
    }

    output
}
