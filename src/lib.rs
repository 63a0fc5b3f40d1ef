use anyhow::{Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod archive;
pub mod batch;
pub mod bubble;
pub mod capability;
pub mod logging;
pub mod ocr;
mod paths;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod settings;
#[cfg(test)]
mod test_util;
pub mod translator;

pub use bubble::{
    BBoxPx, Compositor, FragmentMerger, LayoutResult, Point, Region, RegionDetector, TextBlock,
    TextFragment, TextLayoutEngine,
};
pub use capability::Capability;
pub use ocr::{OcrEngine, TesseractOcr};
pub use pipeline::{PageContext, PageJob, process_page, render_blocks};
pub use report::{BatchReport, PageReport, PageStatus};
pub use settings::Settings;
pub use translator::{HttpTranslator, Translate};

use bubble::{EstimatedMeasure, MergeConfig, TextMeasure, resolve_overlay_font};
use retry::RetryPolicy;
use usvg::fontdb;

const API_KEY_ENV: &str = "BUBBLE_TRANSLATOR_API_KEY";
const FALLBACK_FONTS: &[&str] = &["Noto Sans", "DejaVu Sans", "Arial", "sans-serif"];
const ARABIC_FONTS: &[&str] = &["Noto Naskh Arabic", "Noto Sans Arabic", "Amiri"];
const GENERIC_FONT_FAMILY: &str = "sans-serif";

/// Command-line overrides; anything left `None` comes from the settings
/// files.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub inputs: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub ocr_languages: Option<String>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub archive: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub no_ocr: bool,
    pub no_translate: bool,
    pub smooth: bool,
    pub deskew: bool,
    pub draw_outline: bool,
}

pub async fn run(config: Config) -> Result<BatchReport> {
    if config.inputs.is_empty() {
        bail!("no input files given");
    }
    let mut settings = settings::load_settings(config.settings_path.as_deref())?;
    apply_overrides(&mut settings, &config);
    settings.validate()?;

    let output_dir = PathBuf::from(&settings.output_dir);
    let collected = archive::collect_inputs(&config.inputs, &output_dir)?;
    info!(
        "{} page(s) to translate ({} -> {}) from {} archive(s), {} rejected",
        collected.jobs.len(),
        settings.source_lang,
        settings.target_lang,
        collected.extracted_dirs(),
        collected.rejected.len()
    );

    let ctx = Arc::new(build_context(&settings, &config)?);
    let processed = batch::run_batch(
        ctx,
        collected.jobs.clone(),
        settings.workers,
        settings.batch_size,
    )
    .await;

    let mut pages = collected.rejected.clone();
    pages.extend(processed);
    let mut report = BatchReport::new(pages);

    if let Some(archive_path) = settings.archive.as_deref().map(PathBuf::from) {
        let files: Vec<PathBuf> = report.successful_outputs().map(PathBuf::from).collect();
        if files.is_empty() {
            warn!("no translated pages to bundle into {}", archive_path.display());
        } else {
            archive::create_zip(&files, &output_dir, &archive_path)?;
            info!("bundled {} page(s) into {}", files.len(), archive_path.display());
            report.archive = Some(archive_path.display().to_string());
        }
    }
    Ok(report)
}

fn apply_overrides(settings: &mut Settings, config: &Config) {
    if let Some(dir) = &config.output_dir {
        settings.output_dir = dir.display().to_string();
    }
    if let Some(lang) = &config.source_lang {
        settings.source_lang = lang.clone();
    }
    if let Some(lang) = &config.target_lang {
        settings.target_lang = lang.clone();
    }
    if let Some(endpoint) = &config.endpoint {
        settings.translation_endpoint = Some(endpoint.clone());
    }
    if let Some(key) = &config.api_key {
        settings.translation_api_key = Some(key.clone());
    }
    if let Some(languages) = &config.ocr_languages {
        settings.ocr_languages = Some(languages.clone());
    }
    if let Some(workers) = config.workers {
        settings.workers = workers;
    }
    if let Some(size) = config.batch_size.filter(|size| *size > 0) {
        settings.batch_size = size;
    }
    if let Some(secs) = config.timeout_secs.filter(|secs| *secs > 0) {
        settings.timeout_secs = secs;
    }
    if let Some(archive) = &config.archive {
        settings.archive = Some(archive.display().to_string());
    }
    if let Some(font) = &config.font_path {
        settings.font_path = Some(font.display().to_string());
    }
    settings.preprocess.smooth |= config.smooth;
    settings.preprocess.deskew |= config.deskew;
    settings.render.draw_outline |= config.draw_outline;
}

/// Wires settings into the shared per-page context, probing the optional
/// collaborators once.
pub fn build_context(settings: &Settings, config: &Config) -> Result<PageContext> {
    let mut style = settings.render.clone();
    let (measure, database) = overlay_font(settings, &mut style);

    let ocr = if config.no_ocr {
        Capability::unavailable("disabled by --no-ocr")
    } else {
        TesseractOcr::probe(&settings.ocr_languages(), settings.ocr_psm)
    };
    if let Some(reason) = ocr.reason() {
        warn!("ocr unavailable, pages keep their original text: {}", reason);
    }

    let translator = if config.no_translate {
        Capability::unavailable("disabled by --no-translate")
    } else {
        let api_key = settings
            .translation_api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());
        HttpTranslator::probe(settings.translation_endpoint.as_deref(), api_key)
    };
    if let Some(reason) = translator.reason() {
        warn!("translation unavailable, source text is painted: {}", reason);
    }

    let merge = MergeConfig {
        distance_threshold: settings.distance_threshold,
        min_confidence: settings.min_confidence,
        reading_order: settings.reading_order,
        language: settings
            .filter_by_language
            .then(|| settings.source_lang.clone()),
    };

    Ok(PageContext {
        detector: RegionDetector::new(settings.detection.clone()),
        merger: FragmentMerger::new(merge),
        layout: TextLayoutEngine::new(settings.layout.clone(), measure),
        compositor: Compositor::new(style, database),
        ocr,
        translator,
        source_lang: settings.source_lang.clone(),
        target_lang: settings.target_lang.clone(),
        preprocess: settings.preprocess,
        retry: RetryPolicy::new(settings.retry_attempts),
        page_timeout: Duration::from_secs(settings.timeout_secs),
        jpeg_quality: settings.jpeg_quality,
    })
}

fn overlay_font(
    settings: &Settings,
    style: &mut bubble::RenderStyle,
) -> (Arc<dyn TextMeasure>, Arc<fontdb::Database>) {
    let mut candidates: Vec<&str> = Vec::new();
    if settings.target_lang.eq_ignore_ascii_case("ar") {
        candidates.extend(ARABIC_FONTS);
    }
    candidates.extend(FALLBACK_FONTS);

    match resolve_overlay_font(
        settings.font_path.as_deref().map(Path::new),
        style.font_family.as_deref(),
        &candidates,
    ) {
        Ok(font) => {
            info!("overlay font: {}", font.family);
            if style.font_family.is_none() {
                style.font_family = Some(font.family.clone());
            }
            let measure: Arc<dyn TextMeasure> = Arc::new(font.metrics);
            (measure, font.database)
        }
        Err(err) => {
            warn!("{:#}; measuring text with estimates", err);
            if style.font_family.is_none() {
                style.font_family = Some(GENERIC_FONT_FAMILY.to_string());
            }
            let mut database = fontdb::Database::new();
            database.load_system_fonts();
            let measure: Arc<dyn TextMeasure> = Arc::new(EstimatedMeasure);
            (measure, Arc::new(database))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence_over_settings() {
        let mut settings = Settings::default();
        let config = Config {
            target_lang: Some("fr".to_string()),
            workers: Some(0),
            batch_size: Some(0),
            deskew: true,
            output_dir: Some(PathBuf::from("translated")),
            ..Config::default()
        };
        apply_overrides(&mut settings, &config);
        assert_eq!(settings.target_lang, "fr");
        assert_eq!(settings.source_lang, "en");
        assert_eq!(settings.workers, 0);
        assert_eq!(settings.batch_size, 10);
        assert!(settings.preprocess.deskew);
        assert!(!settings.preprocess.smooth);
        assert_eq!(settings.output_dir, "translated");
    }

    #[test]
    fn disabled_collaborators_are_unavailable() {
        let config = Config {
            no_ocr: true,
            no_translate: true,
            ..Config::default()
        };
        let ctx = build_context(&Settings::default(), &config).expect("context");
        assert_eq!(ctx.ocr.reason(), Some("disabled by --no-ocr"));
        assert_eq!(ctx.translator.reason(), Some("disabled by --no-translate"));
        assert_eq!(ctx.page_timeout, Duration::from_secs(300));
        assert_eq!(ctx.retry.attempts, 3);
    }

    #[test]
    fn unreadable_font_falls_back_to_generic_family() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            font_path: Some(dir.path().join("missing.ttf").display().to_string()),
            ..Settings::default()
        };
        let config = Config {
            no_ocr: true,
            no_translate: true,
            ..Config::default()
        };
        let ctx = build_context(&settings, &config).expect("context");
        assert_eq!(
            ctx.compositor.style().font_family.as_deref(),
            Some("sans-serif")
        );
    }

    #[tokio::test]
    async fn run_without_inputs_fails() {
        assert!(run(Config::default()).await.is_err());
    }
}
