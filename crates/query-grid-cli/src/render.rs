//! Annotated SVG heatmaps for count matrices

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use query_grid_core::{CountMatrix, GridCombination, Level, Taxonomy};
use serde::{Deserialize, Serialize};

const DARK_TEXT: &str = "#262626";
const LIGHT_TEXT: &str = "#ffffff";
const LUMINANCE_THRESHOLD: f64 = 0.408;

/// Visual settings handed to the renderer. Nothing here is process-global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// CSS font-family fallbacks, most preferred first.
    pub font_families: Vec<String>,
    /// Low-to-high colour ramp as `#rrggbb`; counts are binned into one step per entry.
    pub palette: Vec<String>,
    pub cell_width: u32,
    pub cell_height: u32,
    pub title_font_size: u32,
    pub label_font_size: u32,
    pub annotation_font_size: u32,
    pub grid_line_color: String,
    pub legend_label: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_families: ["SimHei", "Arial Unicode MS", "Noto Sans CJK SC", "DejaVu Sans", "sans-serif"]
                .map(str::to_string)
                .to_vec(),
            palette: [
                "#f8f9fa", "#e3f2fd", "#bbdefb", "#90caf9", "#64b5f6", "#42a5f5", "#2196f3",
                "#1e88e5", "#1976d2", "#1565c0", "#0d47a1",
            ]
            .map(str::to_string)
            .to_vec(),
            cell_width: 96,
            cell_height: 40,
            title_font_size: 16,
            label_font_size: 12,
            annotation_font_size: 12,
            grid_line_color: "#ffffff".to_string(),
            legend_label: "Query count".to_string(),
        }
    }
}

impl RenderConfig {
    /// Load a YAML file; absent fields keep their defaults.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not valid YAML for this shape, or
    /// names an unusable palette or font list.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read render config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&body)
            .with_context(|| format!("failed to parse render config {}", path.display()))?;
        config.validate().with_context(|| format!("invalid render config {}", path.display()))?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error for an empty palette or font list, malformed colours, or zero-sized
    /// cells.
    pub fn validate(&self) -> Result<()> {
        if self.font_families.iter().all(|family| family.trim().is_empty()) {
            return Err(anyhow!("font_families MUST name at least one font"));
        }
        if self.palette.is_empty() {
            return Err(anyhow!("palette MUST contain at least one colour"));
        }
        for colour in self.palette.iter().chain(std::iter::once(&self.grid_line_color)) {
            if parse_hex_color(colour).is_none() {
                return Err(anyhow!("colour {colour:?} MUST be formatted as #rrggbb"));
            }
        }
        if self.cell_width == 0 || self.cell_height == 0 {
            return Err(anyhow!("cell_width and cell_height MUST be > 0"));
        }
        Ok(())
    }

    fn font_family_css(&self) -> String {
        self.font_families
            .iter()
            .filter(|family| !family.trim().is_empty())
            .map(|family| {
                if family.contains(' ') {
                    format!("'{family}'")
                } else {
                    family.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Human-readable axis names for one combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisTitles {
    pub domain: String,
    pub intent: String,
}

impl AxisTitles {
    #[must_use]
    pub fn for_combination(combination: GridCombination) -> Self {
        Self {
            domain: level_title(Taxonomy::Domain, combination.domain_level),
            intent: level_title(Taxonomy::Intent, combination.intent_level),
        }
    }

    #[must_use]
    pub fn heading(&self) -> String {
        format!("{} vs {}", self.domain, self.intent)
    }
}

fn level_title(taxonomy: Taxonomy, level: u8) -> String {
    match Level::from_number(level) {
        Some(Level::First) => format!("First-level {taxonomy}"),
        Some(Level::Second) => format!("Second-level {taxonomy}"),
        None => format!("Level-{level} {taxonomy}"),
    }
}

fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn relative_luminance((r, g, b): (u8, u8, u8)) -> f64 {
    let linear = |channel: u8| {
        let value = f64::from(channel) / 255.0;
        if value <= 0.039_28 {
            value / 12.92
        } else {
            ((value + 0.055) / 1.055).powf(2.4)
        }
    };
    0.2126 * linear(r) + 0.7152 * linear(g) + 0.0722 * linear(b)
}

fn annotation_color(fill: &str) -> &'static str {
    match parse_hex_color(fill) {
        Some(rgb) if relative_luminance(rgb) <= LUMINANCE_THRESHOLD => LIGHT_TEXT,
        _ => DARK_TEXT,
    }
}

/// Palette step for `value` on a linear `[min, max]` scale.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn palette_index(value: u64, min: u64, max: u64, steps: usize) -> usize {
    if steps == 0 || max <= min {
        return 0;
    }
    let ratio = (value.saturating_sub(min)) as f64 / (max - min) as f64;
    ((ratio * steps as f64).floor() as usize).min(steps - 1)
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Rough rendered width; wide (non-ASCII) glyphs take a full em.
#[allow(clippy::cast_precision_loss)]
fn text_width(value: &str, font_size: u32) -> f64 {
    let ems = value.chars().map(|ch| if ch.is_ascii() { 0.6 } else { 1.0 }).sum::<f64>();
    ems * f64::from(font_size)
}

/// Render `matrix` as a standalone SVG document.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn render_svg(matrix: &CountMatrix, titles: &AxisTitles, config: &RenderConfig) -> String {
    let cell_width = f64::from(config.cell_width);
    let cell_height = f64::from(config.cell_height);
    let label_size = f64::from(config.label_font_size);

    let row_label_width = matrix
        .rows()
        .iter()
        .map(|label| text_width(label, config.label_font_size))
        .fold(0.0_f64, f64::max);
    let column_label_width = matrix
        .columns()
        .iter()
        .map(|label| text_width(label, config.label_font_size))
        .fold(0.0_f64, f64::max);

    let grid_left = 40.0 + label_size * 2.0 + row_label_width;
    let grid_top = 30.0 + f64::from(config.title_font_size) * 2.5;
    let grid_width = cell_width * matrix.columns().len() as f64;
    let grid_height = cell_height * matrix.rows().len() as f64;
    // 45° labels hang below the grid by ~0.71 of their length.
    let grid_bottom = grid_top + grid_height;
    let column_label_drop = column_label_width * 0.71 + label_size;
    let legend_left = grid_left + grid_width + 30.0;
    let legend_width = 20.0;
    let width = legend_left + legend_width + 60.0 + label_size * 2.0;
    let height = grid_bottom + column_label_drop + label_size * 3.0 + 20.0;

    let counts = matrix.cells().iter().flatten().copied();
    let min = counts.clone().min().unwrap_or(0);
    let max = counts.max().unwrap_or(0);
    let steps = config.palette.len();

    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width:.0}\" height=\"{height:.0}\" \
         viewBox=\"0 0 {width:.0} {height:.0}\" font-family=\"{}\">\n",
        escape_xml(&config.font_family_css())
    ));
    svg.push_str(&format!(
        "  <rect width=\"{width:.0}\" height=\"{height:.0}\" fill=\"#ffffff\"/>\n"
    ));
    svg.push_str(&format!(
        "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{}\" font-weight=\"bold\" text-anchor=\"middle\">{}</text>\n",
        grid_left + grid_width / 2.0,
        30.0 + f64::from(config.title_font_size),
        config.title_font_size,
        escape_xml(&format!("Query grid - {}", titles.heading()))
    ));

    for (row_index, (label, counts)) in matrix.rows().iter().zip(matrix.cells()).enumerate() {
        let y = grid_top + cell_height * row_index as f64;
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{}\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>\n",
            grid_left - 8.0,
            y + cell_height / 2.0,
            config.label_font_size,
            escape_xml(label)
        ));

        for (column_index, count) in counts.iter().enumerate() {
            let x = grid_left + cell_width * column_index as f64;
            let fill = config
                .palette
                .get(palette_index(*count, min, max, steps))
                .map_or("#ffffff", String::as_str);
            svg.push_str(&format!(
                "  <rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{cell_width:.1}\" height=\"{cell_height:.1}\" \
                 fill=\"{fill}\" stroke=\"{}\" stroke-width=\"0.5\"/>\n",
                config.grid_line_color
            ));
            svg.push_str(&format!(
                "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{}\" fill=\"{}\" text-anchor=\"middle\" dominant-baseline=\"middle\">{count}</text>\n",
                x + cell_width / 2.0,
                y + cell_height / 2.0,
                config.annotation_font_size,
                annotation_color(fill)
            ));
        }
    }

    for (column_index, label) in matrix.columns().iter().enumerate() {
        let x = grid_left + cell_width * (column_index as f64 + 0.5);
        svg.push_str(&format!(
            "  <text transform=\"translate({x:.1},{:.1}) rotate(-45)\" font-size=\"{}\" text-anchor=\"end\">{}</text>\n",
            grid_bottom + label_size,
            config.label_font_size,
            escape_xml(label)
        ));
    }

    svg.push_str(&format!(
        "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{}\" font-weight=\"bold\" text-anchor=\"middle\">{}</text>\n",
        grid_left + grid_width / 2.0,
        grid_bottom + column_label_drop + label_size * 2.0,
        config.label_font_size,
        escape_xml(&titles.intent)
    ));
    svg.push_str(&format!(
        "  <text transform=\"translate({:.1},{:.1}) rotate(-90)\" font-size=\"{}\" font-weight=\"bold\" text-anchor=\"middle\">{}</text>\n",
        20.0 + label_size,
        grid_top + grid_height / 2.0,
        config.label_font_size,
        escape_xml(&titles.domain)
    ));

    svg.push_str(&render_legend(config, legend_left, grid_top, legend_width, grid_height, min, max));
    svg.push_str("</svg>\n");
    svg
}

#[allow(clippy::cast_precision_loss)]
fn render_legend(
    config: &RenderConfig,
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    min: u64,
    max: u64,
) -> String {
    let mut legend = String::new();
    let steps = config.palette.len().max(1);
    let step_height = height / steps as f64;
    // Highest colour at the top.
    for (index, colour) in config.palette.iter().rev().enumerate() {
        legend.push_str(&format!(
            "  <rect x=\"{left:.1}\" y=\"{:.1}\" width=\"{width:.1}\" height=\"{step_height:.2}\" fill=\"{colour}\"/>\n",
            top + step_height * index as f64
        ));
    }
    let label_size = config.label_font_size;
    legend.push_str(&format!(
        "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{label_size}\" dominant-baseline=\"hanging\">{max}</text>\n",
        left + width + 6.0,
        top
    ));
    legend.push_str(&format!(
        "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"{label_size}\">{min}</text>\n",
        left + width + 6.0,
        top + height
    ));
    legend.push_str(&format!(
        "  <text transform=\"translate({:.1},{:.1}) rotate(90)\" font-size=\"{label_size}\" text-anchor=\"middle\">{}</text>\n",
        left + width + 40.0,
        top + height / 2.0,
        escape_xml(&config.legend_label)
    ));
    legend
}

/// Render and write one heatmap, creating parent directories as needed.
///
/// # Errors
/// Returns an error when the directory or file cannot be written.
pub fn write_heatmap(
    matrix: &CountMatrix,
    titles: &AxisTitles,
    config: &RenderConfig,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create heatmap directory {}", parent.display()))?;
    }
    fs::write(path, render_svg(matrix, titles, config))
        .with_context(|| format!("failed to write heatmap {}", path.display()))
}
