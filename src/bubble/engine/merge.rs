use serde::Deserialize;
use tracing::{debug, info};

use crate::bubble::{TextBlock, TextFragment};

use super::geom::{Extent, horizontal_gap, polygon_extent};
use super::text::{clean_text, matches_language, mean};

pub const DEFAULT_DISTANCE_THRESHOLD: u32 = 10;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// How much the merger trusts the order fragments arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingOrder {
    /// Keep the order reported by the OCR engine.
    Trust,
    /// Re-sort into rows by top edge, then left to right within a row.
    #[default]
    SortByTopLeft,
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub distance_threshold: u32,
    pub min_confidence: f32,
    pub reading_order: ReadingOrder,
    /// Drop fragments that do not look like this language's script.
    pub language: Option<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            reading_order: ReadingOrder::default(),
            language: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FragmentMerger {
    config: MergeConfig,
}

impl FragmentMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn merge_fragments(&self, fragments: Vec<TextFragment>) -> Vec<TextBlock> {
        let received = fragments.len();
        let mut kept: Vec<TextFragment> = filter_confident(fragments, self.config.min_confidence)
            .into_iter()
            .filter_map(|mut fragment| {
                fragment.text = clean_text(&fragment.text);
                if fragment.text.is_empty() {
                    return None;
                }
                if let Some(lang) = self.config.language.as_deref()
                    && !matches_language(&fragment.text, lang)
                {
                    debug!("dropping fragment outside '{}': {}", lang, fragment.text);
                    return None;
                }
                Some(fragment)
            })
            .collect();

        if self.config.reading_order == ReadingOrder::SortByTopLeft {
            sort_reading_order(&mut kept);
        }

        let blocks = merge(&kept, self.config.distance_threshold);
        info!(
            "merged {} fragment(s) ({} kept) into {} block(s)",
            received,
            kept.len(),
            blocks.len()
        );
        blocks
    }
}

pub fn filter_confident(fragments: Vec<TextFragment>, min_confidence: f32) -> Vec<TextFragment> {
    fragments
        .into_iter()
        .filter(|fragment| fragment.confidence >= min_confidence)
        .collect()
}

/// Groups consecutive fragments whose horizontal gap is within
/// `distance_threshold`. Fragments must already be in reading order.
pub fn merge(fragments: &[TextFragment], distance_threshold: u32) -> Vec<TextBlock> {
    let mut blocks = Vec::new();
    let mut group: Vec<&TextFragment> = Vec::new();

    for fragment in fragments {
        if let Some(last) = group.last() {
            let gap = horizontal_gap(&last.polygon, &fragment.polygon).abs();
            if gap > distance_threshold as f32 {
                blocks.push(flush_group(&group));
                group.clear();
            }
        }
        group.push(fragment);
    }
    if !group.is_empty() {
        blocks.push(flush_group(&group));
    }
    blocks
}

fn flush_group(group: &[&TextFragment]) -> TextBlock {
    let text = group
        .iter()
        .map(|fragment| fragment.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    TextBlock {
        text,
        confidence: mean(group.iter().map(|fragment| fragment.confidence)),
        anchor_polygon: group[0].polygon,
    }
}

/// Orders fragments into rows: a fragment joins the current row when its top
/// edge lies within the upper half of the row's first fragment.
pub fn sort_reading_order(fragments: &mut Vec<TextFragment>) {
    if fragments.len() < 2 {
        return;
    }
    let mut keyed: Vec<(Extent, TextFragment)> = fragments
        .drain(..)
        .filter_map(|fragment| polygon_extent(&fragment.polygon).map(|extent| (extent, fragment)))
        .collect();
    keyed.sort_by(|a, b| a.0.min_y.total_cmp(&b.0.min_y));

    let mut rows: Vec<Vec<(Extent, TextFragment)>> = Vec::new();
    let mut row_limit = f32::NEG_INFINITY;
    for (extent, fragment) in keyed {
        if rows.is_empty() || extent.min_y > row_limit {
            row_limit = extent.min_y + (extent.max_y - extent.min_y) * 0.5;
            rows.push(Vec::new());
        }
        if let Some(row) = rows.last_mut() {
            row.push((extent, fragment));
        }
    }

    for mut row in rows {
        row.sort_by(|a, b| a.0.min_x.total_cmp(&b.0.min_x));
        fragments.extend(row.into_iter().map(|(_, fragment)| fragment));
    }
}
