use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bubble::{
    DetectorConfig, LayoutConfig, Polarity, PreprocessConfig, ReadingOrder, RenderStyle,
};
use crate::bubble::engine::merge::{DEFAULT_DISTANCE_THRESHOLD, DEFAULT_MIN_CONFIDENCE};
use crate::ocr::DEFAULT_PAGE_SEGMENTATION;
use crate::paths;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr_languages: Option<String>,
    pub ocr_psm: u32,
    pub min_confidence: f32,
    pub filter_by_language: bool,
    pub source_lang: String,
    pub target_lang: String,
    pub translation_endpoint: Option<String>,
    pub translation_api_key: Option<String>,
    pub detection: DetectorConfig,
    pub distance_threshold: u32,
    pub reading_order: ReadingOrder,
    pub layout: LayoutConfig,
    pub render: RenderStyle,
    pub font_path: Option<String>,
    pub preprocess: PreprocessConfig,
    pub workers: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub retry_attempts: usize,
    pub output_dir: String,
    pub jpeg_quality: u8,
    pub archive: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr_languages: None,
            ocr_psm: DEFAULT_PAGE_SEGMENTATION,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            filter_by_language: false,
            source_lang: "en".to_string(),
            target_lang: "ar".to_string(),
            translation_endpoint: None,
            translation_api_key: None,
            detection: DetectorConfig::default(),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            reading_order: ReadingOrder::default(),
            layout: LayoutConfig::default(),
            render: RenderStyle::default(),
            font_path: None,
            preprocess: PreprocessConfig::default(),
            workers: 4,
            batch_size: 10,
            timeout_secs: 300,
            retry_attempts: 3,
            output_dir: "output".to_string(),
            jpeg_quality: 95,
            archive: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSettings>,
    translation: Option<TranslationSettings>,
    detection: Option<DetectionSettings>,
    merge: Option<MergeSettings>,
    layout: Option<LayoutSettings>,
    render: Option<RenderSettings>,
    preprocess: Option<PreprocessSettings>,
    batch: Option<BatchSettings>,
    output: Option<OutputSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    languages: Option<String>,
    psm: Option<u32>,
    min_confidence: Option<f32>,
    filter_by_language: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationSettings {
    source: Option<String>,
    target: Option<String>,
    endpoint: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectionSettings {
    threshold: Option<u8>,
    min_region_area: Option<f32>,
    polarity: Option<Polarity>,
}

#[derive(Debug, Default, Deserialize)]
struct MergeSettings {
    distance_threshold: Option<u32>,
    reading_order: Option<ReadingOrder>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    text_padding: Option<u32>,
    line_spacing: Option<u32>,
    min_font_size: Option<u32>,
    max_font_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSettings {
    text_color: Option<String>,
    fill_color: Option<String>,
    outline_color: Option<String>,
    outline_width: Option<f32>,
    stroke_color: Option<String>,
    stroke_width: Option<f32>,
    patch_padding: Option<u32>,
    draw_background: Option<bool>,
    draw_outline: Option<bool>,
    font_family: Option<String>,
    font_path: Option<String>,
    allow_overlap: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PreprocessSettings {
    smooth: Option<bool>,
    deskew: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchSettings {
    workers: Option<usize>,
    batch_size: Option<usize>,
    timeout_secs: Option<u64>,
    retry_attempts: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSettings {
    dir: Option<String>,
    jpeg_quality: Option<u8>,
    archive: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = paths::settings_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_toml(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(languages) = ocr.languages {
                self.ocr_languages = non_empty(languages);
            }
            if let Some(psm) = ocr.psm {
                self.ocr_psm = psm;
            }
            if let Some(value) = ocr.min_confidence {
                self.min_confidence = value;
            }
            if let Some(value) = ocr.filter_by_language {
                self.filter_by_language = value;
            }
        }
        if let Some(translation) = incoming.translation {
            if let Some(source) = translation.source.and_then(non_empty) {
                self.source_lang = source;
            }
            if let Some(target) = translation.target.and_then(non_empty) {
                self.target_lang = target;
            }
            if let Some(endpoint) = translation.endpoint {
                self.translation_endpoint = non_empty(endpoint);
            }
            if let Some(key) = translation.api_key {
                self.translation_api_key = non_empty(key);
            }
        }
        if let Some(detection) = incoming.detection {
            if let Some(threshold) = detection.threshold {
                self.detection.threshold = threshold;
            }
            if let Some(area) = detection.min_region_area {
                self.detection.min_region_area = area;
            }
            if let Some(polarity) = detection.polarity {
                self.detection.polarity = polarity;
            }
        }
        if let Some(merge) = incoming.merge {
            if let Some(distance) = merge.distance_threshold {
                self.distance_threshold = distance;
            }
            if let Some(order) = merge.reading_order {
                self.reading_order = order;
            }
        }
        if let Some(layout) = incoming.layout {
            if let Some(value) = layout.text_padding {
                self.layout.text_padding = value;
            }
            if let Some(value) = layout.line_spacing {
                self.layout.line_spacing = value;
            }
            if let Some(value) = layout.min_font_size {
                self.layout.min_font_size = value;
            }
            if let Some(value) = layout.max_font_size {
                self.layout.max_font_size = value;
            }
        }
        if let Some(render) = incoming.render {
            self.merge_render(render);
        }
        if let Some(preprocess) = incoming.preprocess {
            if let Some(smooth) = preprocess.smooth {
                self.preprocess.smooth = smooth;
            }
            if let Some(deskew) = preprocess.deskew {
                self.preprocess.deskew = deskew;
            }
        }
        if let Some(batch) = incoming.batch {
            if let Some(workers) = batch.workers {
                self.workers = workers;
            }
            if let Some(size) = batch.batch_size
                && size > 0
            {
                self.batch_size = size;
            }
            if let Some(secs) = batch.timeout_secs {
                self.timeout_secs = secs;
            }
            if let Some(attempts) = batch.retry_attempts {
                self.retry_attempts = attempts;
            }
        }
        if let Some(output) = incoming.output {
            if let Some(dir) = output.dir.and_then(non_empty) {
                self.output_dir = dir;
            }
            if let Some(quality) = output.jpeg_quality {
                self.jpeg_quality = quality;
            }
            if let Some(archive) = output.archive {
                self.archive = non_empty(archive);
            }
        }
    }

    fn merge_render(&mut self, render: RenderSettings) {
        let style = &mut self.render;
        if let Some(color) = render.text_color.and_then(non_empty) {
            style.text_color = color;
        }
        if let Some(color) = render.fill_color.and_then(non_empty) {
            style.fill_color = color;
        }
        if let Some(color) = render.outline_color.and_then(non_empty) {
            style.outline_color = color;
        }
        if let Some(width) = render.outline_width {
            style.outline_width = width;
        }
        if let Some(color) = render.stroke_color {
            style.stroke_color = non_empty(color);
        }
        if let Some(width) = render.stroke_width {
            style.stroke_width = width;
        }
        if let Some(padding) = render.patch_padding {
            style.patch_padding = padding;
        }
        if let Some(value) = render.draw_background {
            style.draw_background = value;
        }
        if let Some(value) = render.draw_outline {
            style.draw_outline = value;
        }
        if let Some(family) = render.font_family {
            style.font_family = non_empty(family);
        }
        if let Some(value) = render.allow_overlap {
            style.allow_overlap = value;
        }
        if let Some(path) = render.font_path {
            self.font_path = non_empty(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!(
                "ocr.min_confidence must be within 0..1 (got {})",
                self.min_confidence
            ));
        }
        if self.layout.min_font_size == 0 || self.layout.min_font_size > self.layout.max_font_size
        {
            return Err(anyhow!(
                "layout font sizes must satisfy 0 < min <= max (got {}..{})",
                self.layout.min_font_size,
                self.layout.max_font_size
            ));
        }
        if self.ocr_psm > 13 {
            return Err(anyhow!(
                "ocr.psm must be a tesseract page segmentation mode 0..13 (got {})",
                self.ocr_psm
            ));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("batch.timeout_secs must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(anyhow!("batch.retry_attempts must be at least 1"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!(
                "output.jpeg_quality must be within 1..100 (got {})",
                self.jpeg_quality
            ));
        }
        Ok(())
    }

    /// Tesseract languages: explicit setting first, else the source language.
    pub fn ocr_languages(&self) -> String {
        self.ocr_languages
            .clone()
            .unwrap_or_else(|| self.source_lang.clone())
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = paths::settings_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_match_struct_defaults() {
        let mut settings = Settings::default();
        settings
            .merge_toml(DEFAULT_SETTINGS_TOML)
            .expect("default settings parse");
        let defaults = Settings::default();
        assert_eq!(settings.source_lang, defaults.source_lang);
        assert_eq!(settings.target_lang, defaults.target_lang);
        assert_eq!(settings.detection.threshold, 150);
        assert_eq!(settings.detection.polarity, Polarity::Dark);
        assert_eq!(settings.reading_order, ReadingOrder::SortByTopLeft);
        assert_eq!(settings.layout.max_font_size, 20);
        assert_eq!(settings.render.patch_padding, 5);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.ocr_psm, defaults.ocr_psm);
        assert_eq!(settings.jpeg_quality, 95);
        assert!(settings.translation_endpoint.is_none());
        assert!(settings.render.stroke_color.is_none());
        assert!(settings.archive.is_none());
        settings.validate().expect("valid");
    }

    #[test]
    fn later_files_override_earlier_ones() {
        with_temp_home(|home| {
            let extra = home.join("override.toml");
            fs::write(
                &extra,
                r#"
[translation]
target = "fr"
endpoint = "http://localhost:5000"

[detection]
polarity = "bright"

[merge]
reading_order = "trust"

[render]
draw_outline = true
font_path = "/fonts/Noto.ttf"
"#,
            )
            .expect("write");
            let settings = load_settings(Some(&extra)).expect("load");
            assert_eq!(settings.target_lang, "fr");
            assert_eq!(settings.source_lang, "en");
            assert_eq!(
                settings.translation_endpoint.as_deref(),
                Some("http://localhost:5000")
            );
            assert_eq!(settings.detection.polarity, Polarity::Bright);
            assert_eq!(settings.reading_order, ReadingOrder::Trust);
            assert!(settings.render.draw_outline);
            assert_eq!(settings.font_path.as_deref(), Some("/fonts/Noto.ttf"));
            assert!(home.join(".bubble-translator/settings.toml").exists());
        });
    }

    #[test]
    fn missing_explicit_settings_file_is_an_error() {
        with_temp_home(|home| {
            assert!(load_settings(Some(&home.join("nope.toml"))).is_err());
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut settings = Settings::default();
        settings
            .merge_toml("[layout]\nmin_font_size = 30\nmax_font_size = 10\n")
            .expect("parse");
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        assert!(settings.merge_toml("[detection]\npolarity = \"sideways\"\n").is_err());
    }

    #[test]
    fn zero_timeout_and_retries_are_rejected() {
        for overlay in [
            "[batch]\ntimeout_secs = 0\n",
            "[batch]\nretry_attempts = 0\n",
        ] {
            let mut settings = Settings::default();
            settings.merge_toml(overlay).expect("parse");
            let err = settings.validate().expect_err(overlay);
            assert!(err.to_string().contains("at least 1"), "{err}");
        }
    }

    #[test]
    fn page_segmentation_mode_is_configurable() {
        let mut settings = Settings::default();
        assert_eq!(settings.ocr_psm, 11);
        settings.merge_toml("[ocr]\npsm = 6\n").expect("parse");
        assert_eq!(settings.ocr_psm, 6);
        settings.validate().expect("valid");

        settings.merge_toml("[ocr]\npsm = 42\n").expect("parse");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn ocr_languages_fall_back_to_source() {
        let mut settings = Settings::default();
        assert_eq!(settings.ocr_languages(), "en");
        settings.merge_toml("[ocr]\nlanguages = \"eng+jpn\"\n").expect("parse");
        assert_eq!(settings.ocr_languages(), "eng+jpn");
    }
}
