use anyhow::{Result, bail};
use std::sync::Arc;

use crate::bubble::{BBoxPx, LayoutLine, LayoutResult};

pub const DEFAULT_TEXT_PADDING: u32 = 10;
pub const DEFAULT_LINE_SPACING: u32 = 20;
pub const DEFAULT_MIN_FONT_SIZE: u32 = 8;
pub const DEFAULT_MAX_FONT_SIZE: u32 = 20;
const FALLBACK_FONT_SIZE: u32 = 12;

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub text_padding: u32,
    pub line_spacing: u32,
    pub min_font_size: u32,
    pub max_font_size: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            text_padding: DEFAULT_TEXT_PADDING,
            line_spacing: DEFAULT_LINE_SPACING,
            min_font_size: DEFAULT_MIN_FONT_SIZE,
            max_font_size: DEFAULT_MAX_FONT_SIZE,
        }
    }
}

/// Width of rendered text in pixels at a given font size.
pub trait TextMeasure: Send + Sync {
    fn text_width(&self, text: &str, font_size: f32) -> f32;
}

/// Picks a font size for `text` inside `region`.
pub trait FontSizer: Send + Sync {
    fn font_size(&self, text: &str, region: &BBoxPx, config: &LayoutConfig) -> u32;
}

/// `min(w, h) / (chars + 1)`, clamped to the configured bounds. Ignores glyph
/// metrics entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCountSizer;

impl FontSizer for CharCountSizer {
    fn font_size(&self, text: &str, region: &BBoxPx, config: &LayoutConfig) -> u32 {
        let chars = text.chars().count() as u32;
        let base = region.w.min(region.h) / (chars + 1);
        base.max(config.min_font_size).min(config.max_font_size)
    }
}

/// Per-character width estimate used when no font file is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedMeasure;

impl TextMeasure for EstimatedMeasure {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        text.chars().map(estimate_char_units).sum::<f32>() * font_size
    }
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF
    ) {
        1.0
    } else {
        0.9
    }
}

#[derive(Clone)]
pub struct TextLayoutEngine {
    config: LayoutConfig,
    sizer: Arc<dyn FontSizer>,
    measure: Arc<dyn TextMeasure>,
}

impl TextLayoutEngine {
    pub fn new(config: LayoutConfig, measure: Arc<dyn TextMeasure>) -> Self {
        Self {
            config,
            sizer: Arc::new(CharCountSizer),
            measure,
        }
    }

    pub fn with_sizer(mut self, sizer: Arc<dyn FontSizer>) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn measure(&self) -> &dyn TextMeasure {
        self.measure.as_ref()
    }

    /// Wraps `text` to the region width and centres the block on the region.
    /// Each line is centred on its own; `y` is the line's baseline.
    pub fn layout(&self, text: &str, region: &BBoxPx) -> Result<LayoutResult> {
        if region.w == 0 || region.h == 0 {
            bail!(
                "cannot lay out text in a {}x{} region",
                region.w,
                region.h
            );
        }

        let font_size = match self.sizer.font_size(text, region, &self.config) {
            0 => FALLBACK_FONT_SIZE,
            size => size,
        };
        let center_x = region.x as i32 + (region.w / 2) as i32;
        let center_y = region.y as i32 + (region.h / 2) as i32;
        let max_width = region.w as f32 - 2.0 * self.config.text_padding as f32;

        let wrapped = wrap_words(text, max_width, font_size as f32, self.measure.as_ref());
        let spacing = self.config.line_spacing as i32;
        let start_y = center_y - wrapped.len() as i32 * (spacing / 2);

        let lines: Vec<LayoutLine> = wrapped
            .into_iter()
            .enumerate()
            .map(|(idx, line)| {
                let width = self
                    .measure
                    .text_width(&line, font_size as f32)
                    .ceil()
                    .max(0.0) as u32;
                LayoutLine {
                    x: region.x as i32 + (region.w as i32 - width as i32).div_euclid(2),
                    y: start_y + idx as i32 * spacing,
                    width,
                    text: line,
                }
            })
            .collect();

        let origin_x = lines.first().map(|line| line.x).unwrap_or(center_x);
        Ok(LayoutResult {
            lines,
            font_size,
            origin: (origin_x, start_y),
        })
    }
}

/// Greedy word wrap. A word that alone exceeds `max_width` still gets its
/// own line.
pub fn wrap_words(
    text: &str,
    max_width: f32,
    font_size: f32,
    measure: &dyn TextMeasure,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if measure.text_width(&candidate, font_size) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        current = word.to_string();
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
