///! Star map renderer
///!
///! Builds an SVG scene from projected stars and captions, then rasterizes it
///! to PNG with resvg.

use super::sky::{altitude_radius, ProjectedStar};
use crate::model::Observation;
use anyhow::{Context, Result};
use chrono::Datelike;
use resvg::tiny_skia;
use resvg::usvg::{fontdb, Options, Transform, Tree};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_TITLE: &str = "THE NIGHT SKY";

const BACKGROUND_COLOR: &str = "#0a1628";
const BORDER_COLOR: &str = "#7cb342";
const STAR_COLOR: &str = "#e8f5e9";
const GUIDE_COLOR: &str = "#4a5568";
const TEXT_COLOR: &str = "#a5d6a7";
const FONT_FAMILY: &str = "DejaVu Serif, Times New Roman, serif";

const MONTH_NAMES: [&str; 12] = [
    "JANUARY",
    "FEBRUARY",
    "MARCH",
    "APRIL",
    "MAY",
    "JUNE",
    "JULY",
    "AUGUST",
    "SEPTEMBER",
    "OCTOBER",
    "NOVEMBER",
    "DECEMBER",
];

/// Text drawn around the sky disc
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub title: String,
    /// e.g. `15th JANUARY 2024 22:00 UTC-05:00`
    pub date_line: String,
    /// e.g. `40.7128° N 74.0060° W`
    pub coordinate_line: String,
}

impl Caption {
    pub fn for_observation(observation: &Observation, default_title: &str) -> Self {
        let title = observation
            .title
            .as_deref()
            .unwrap_or(default_title)
            .to_uppercase();

        let local = observation.local_time;
        let day = local.day();
        let date_line = format!(
            "{}{} {} {} {}",
            day,
            day_suffix(day),
            MONTH_NAMES[local.month0() as usize],
            local.year(),
            local.format("%H:%M UTC%:z")
        );

        let latitude = observation.latitude();
        let longitude = observation.longitude();
        let coordinate_line = format!(
            "{:.4}° {} {:.4}° {}",
            latitude.abs(),
            if latitude >= 0.0 { 'N' } else { 'S' },
            longitude.abs(),
            if longitude < 0.0 { 'W' } else { 'E' }
        );

        Self {
            title,
            date_line,
            coordinate_line,
        }
    }
}

fn day_suffix(day: u32) -> &'static str {
    match day {
        1 | 21 | 31 => "st",
        2 | 22 => "nd",
        3 | 23 => "rd",
        _ => "th",
    }
}

/// Star map renderer. Fonts are loaded once and shared by every render.
pub struct StarMapRenderer {
    fontdb: Arc<fontdb::Database>,
    default_title: String,
}

impl StarMapRenderer {
    pub const WIDTH: f64 = 1000.0;
    pub const HEIGHT: f64 = 1200.0;

    const CENTER_X: f64 = 500.0;
    const CENTER_Y: f64 = 540.0;
    /// Horizon radius in pixels
    const SKY_RADIUS: f64 = 400.0;
    const BORDER_GAP: f64 = 10.0;
    const LABEL_DISTANCE: f64 = 1.08;
    const TITLE_Y: f64 = 64.0;
    const DATE_Y: f64 = 1050.0;
    const COORDINATE_Y: f64 = 1095.0;

    /// Create a renderer with system fonts plus any faces under `font_dir`
    pub fn new(font_dir: Option<&Path>, default_title: impl Into<String>) -> Self {
        let mut fontdb = fontdb::Database::new();
        fontdb.load_system_fonts();
        if let Some(dir) = font_dir {
            fontdb.load_fonts_dir(dir);
        }
        tracing::debug!("Loaded {} font faces", fontdb.len());

        Self {
            fontdb: Arc::new(fontdb),
            default_title: default_title.into(),
        }
    }

    pub fn default_title(&self) -> &str {
        &self.default_title
    }

    pub fn caption(&self, observation: &Observation) -> Caption {
        Caption::for_observation(observation, &self.default_title)
    }

    /// Render projected stars to PNG bytes. Same inputs, same bytes.
    pub fn render(&self, stars: &[ProjectedStar], caption: &Caption) -> Result<Vec<u8>> {
        let svg_content = self.build_svg(stars, caption);
        self.rasterize(&svg_content)
    }

    /// Map unit-disc coordinates (north +y) to canvas pixels (y down)
    fn to_canvas(x: f64, y: f64) -> (f64, f64) {
        (
            Self::CENTER_X + x * Self::SKY_RADIUS,
            Self::CENTER_Y - y * Self::SKY_RADIUS,
        )
    }

    pub fn build_svg(&self, stars: &[ProjectedStar], caption: &Caption) -> String {
        let (cx, cy, r) = (Self::CENTER_X, Self::CENTER_Y, Self::SKY_RADIUS);
        let mut svg = String::with_capacity(4096 + stars.len() * 96);

        // Writing into a String cannot fail
        let _ = write!(
            svg,
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
<rect x="0" y="0" width="{w}" height="{h}" fill="{bg}"/>
<circle cx="{cx}" cy="{cy}" r="{outer}" fill="none" stroke="{border}" stroke-width="2"/>
<circle cx="{cx}" cy="{cy}" r="{r}" fill="{bg}" stroke="{border}" stroke-width="1"/>
"##,
            w = Self::WIDTH,
            h = Self::HEIGHT,
            bg = BACKGROUND_COLOR,
            border = BORDER_COLOR,
            outer = r + Self::BORDER_GAP,
        );

        svg.push_str(r#"<g id="guides" fill="none" stroke-width="1" stroke-dasharray="6 6" stroke-opacity="0.3">"#);
        svg.push('\n');
        for altitude in [30.0, 60.0] {
            let _ = writeln!(
                svg,
                r#"<circle cx="{cx}" cy="{cy}" r="{:.2}" stroke="{GUIDE_COLOR}"/>"#,
                altitude_radius(altitude) * r
            );
        }
        for (x, y) in [(0.0, 1.0), (-1.0, 0.0), (0.0, -1.0), (1.0, 0.0)] {
            let (x2, y2) = Self::to_canvas(x, y);
            let _ = writeln!(
                svg,
                r#"<line x1="{cx}" y1="{cy}" x2="{x2:.2}" y2="{y2:.2}" stroke="{GUIDE_COLOR}"/>"#
            );
        }
        svg.push_str("</g>\n");

        svg.push_str(r#"<g id="stars">"#);
        svg.push('\n');
        for star in stars {
            let (x, y) = Self::to_canvas(star.x, star.y);
            let _ = writeln!(
                svg,
                r#"<circle cx="{x:.2}" cy="{y:.2}" r="{:.2}" fill="{STAR_COLOR}" fill-opacity="{:.3}"/>"#,
                star.radius, star.opacity
            );
        }
        svg.push_str("</g>\n");

        let _ = writeln!(
            svg,
            r#"<g id="labels" font-family="{FONT_FAMILY}" fill="{TEXT_COLOR}" text-anchor="middle" dominant-baseline="central" font-size="22" font-weight="bold">"#
        );
        for (label, x, y) in [("N", 0.0, 1.0), ("E", -1.0, 0.0), ("S", 0.0, -1.0), ("W", 1.0, 0.0)] {
            let (lx, ly) = Self::to_canvas(x * Self::LABEL_DISTANCE, y * Self::LABEL_DISTANCE);
            let _ = writeln!(svg, r#"<text x="{lx:.2}" y="{ly:.2}">{label}</text>"#);
        }
        svg.push_str("</g>\n");

        let _ = write!(
            svg,
            r#"<g id="captions" font-family="{FONT_FAMILY}" fill="{TEXT_COLOR}" text-anchor="middle">
<text x="{cx}" y="{title_y}" font-size="36" font-weight="bold">{title}</text>
<text x="{cx}" y="{date_y}" font-size="22">{date}</text>
<text x="{cx}" y="{coord_y}" font-size="18" fill-opacity="0.8">{coord}</text>
</g>
</svg>
"#,
            title_y = Self::TITLE_Y,
            date_y = Self::DATE_Y,
            coord_y = Self::COORDINATE_Y,
            title = escape_xml(&caption.title),
            date = escape_xml(&caption.date_line),
            coord = escape_xml(&caption.coordinate_line),
        );

        svg
    }

    /// Rasterize an SVG document to PNG
    fn rasterize(&self, svg_content: &str) -> Result<Vec<u8>> {
        let mut options = Options::default();
        options.fontdb = self.fontdb.clone();

        let tree = Tree::from_str(svg_content, &options).context("Failed to parse SVG")?;

        let size = tree.size().to_int_size();
        let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
            .context("Failed to create pixmap")?;

        resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());

        pixmap.encode_png().context("Failed to encode PNG")
    }
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
