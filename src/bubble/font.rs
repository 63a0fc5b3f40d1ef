use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use ttf_parser::{Face, name_id};
use usvg::fontdb;

use super::engine::layout::TextMeasure;

/// Advance widths of one face, used to measure lines before they are drawn.
#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
    face_index: u32,
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("units_per_em", &self.units_per_em)
            .field("face_index", &self.face_index)
            .finish()
    }
}

impl FontMetrics {
    pub fn from_data(data: Vec<u8>, preferred_family: Option<&str>) -> Result<Self> {
        let data = Arc::new(data);
        let mut fallback = None;
        let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
        for index in 0..count {
            let Ok(face) = Face::parse(&data, index) else {
                continue;
            };
            let family = family_name(&face);
            let units_per_em = face.units_per_em().max(1);
            let space_advance = face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2);
            let metrics = FontMetrics {
                data: Arc::clone(&data),
                units_per_em,
                space_advance,
                family: family.clone(),
                face_index: index,
            };
            if let (Some(preferred), Some(found)) = (preferred_family, &family)
                && found.eq_ignore_ascii_case(preferred)
            {
                return Ok(metrics);
            }
            if fallback.is_none() {
                fallback = Some(metrics);
            }
        }
        if preferred_family.is_some() {
            return Err(anyhow!("font family not found in font file"));
        }
        fallback.ok_or_else(|| anyhow!("failed to parse font data"))
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl TextMeasure for FontMetrics {
    fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let Ok(face) = Face::parse(&self.data, self.face_index) else {
            return super::EstimatedMeasure.text_width(text, font_size);
        };
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            let glyph_advance = if ch == ' ' {
                self.space_advance
            } else {
                face.glyph_index(ch)
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .unwrap_or(self.space_advance)
            };
            advance = advance.saturating_add(glyph_advance as u32);
        }
        advance as f32 * (font_size / self.units_per_em.max(1) as f32)
    }
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    FontMetrics::from_data(data, None)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// The face used for overlay text, plus the database that renders it.
pub struct ResolvedOverlayFont {
    pub metrics: FontMetrics,
    pub family: String,
    pub database: Arc<fontdb::Database>,
}

/// Loads system fonts (and `font_path`, if given) and picks the face used to
/// measure and draw translated text.
pub fn resolve_overlay_font(
    font_path: Option<&Path>,
    font_family: Option<&str>,
    fallback: &[&str],
) -> Result<ResolvedOverlayFont> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(path) = font_path {
        let metrics = load_font_metrics(path)?;
        db.load_font_data(metrics.data().to_vec());
        let family = metrics
            .family()
            .map(|name| name.to_string())
            .or_else(|| font_family.map(|name| name.to_string()))
            .unwrap_or_else(|| "sans-serif".to_string());
        return Ok(ResolvedOverlayFont {
            metrics,
            family,
            database: Arc::new(db),
        });
    }

    let candidates: Vec<&str> = font_family
        .into_iter()
        .chain(fallback.iter().copied())
        .collect();
    for candidate in candidates {
        match metrics_for_family(&db, candidate) {
            Ok(metrics) => {
                let family = metrics
                    .family()
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| candidate.to_string());
                return Ok(ResolvedOverlayFont {
                    metrics,
                    family,
                    database: Arc::new(db),
                });
            }
            Err(err) => debug!("font '{}' unavailable: {}", candidate, err),
        }
    }

    Err(anyhow!("no usable overlay font found"))
}

fn metrics_for_family(db: &fontdb::Database, family: &str) -> Result<FontMetrics> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    FontMetrics::from_data(data, None)
}

fn family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
