pub mod engine;
mod font;
mod render;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub use engine::detect::{DetectorConfig, Polarity, RegionDetector};
pub use engine::layout::{
    CharCountSizer, EstimatedMeasure, FontSizer, LayoutConfig, TextLayoutEngine, TextMeasure,
};
pub use engine::merge::{FragmentMerger, MergeConfig, ReadingOrder};
pub use engine::preprocess::PreprocessConfig;
pub use font::{FontMetrics, ResolvedOverlayFont, load_font_metrics, resolve_overlay_font};
pub use render::{Compositor, RenderStyle, overlay_svg};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from(value: [f32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBoxPx {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// A detected bubble: its bounding rectangle and the contour it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub bbox: BBoxPx,
    pub contour: Option<Vec<Point>>,
}

impl Region {
    pub fn new(bbox: BBoxPx) -> Result<Self> {
        if bbox.w == 0 || bbox.h == 0 {
            bail!("region must have a positive size (got {}x{})", bbox.w, bbox.h);
        }
        Ok(Self {
            bbox,
            contour: None,
        })
    }

    pub fn with_contour(mut self, contour: Vec<Point>) -> Self {
        self.contour = Some(contour);
        self
    }
}

/// One OCR-reported piece of text. The polygon is ordered top-left,
/// top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    pub confidence: f32,
    #[serde(alias = "bbox")]
    pub polygon: [Point; 4],
}

impl TextFragment {
    pub fn new(text: impl Into<String>, confidence: f32, polygon: [Point; 4]) -> Self {
        Self {
            text: text.into(),
            confidence,
            polygon,
        }
    }

    pub fn from_bbox(text: impl Into<String>, confidence: f32, bbox: BBoxPx) -> Self {
        Self::new(text, confidence, engine::geom::bbox_polygon(&bbox))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f32,
    pub anchor_polygon: [Point; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutLine {
    pub text: String,
    pub x: i32,
    /// Baseline of the line.
    pub y: i32,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutResult {
    pub lines: Vec<LayoutLine>,
    pub font_size: u32,
    pub origin: (i32, i32),
}

impl LayoutResult {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|line| line.text.as_str()).collect()
    }
}
