mod parse;
mod tesseract;

use anyhow::{Context, Result};
use image::RgbaImage;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bubble::TextFragment;
use crate::capability::Capability;

pub use parse::parse_tsv_fragments;
pub use tesseract::{list_tesseract_languages, tesseract_language};

/// Sparse text: manga pages have scattered bubbles rather than paragraphs.
pub const DEFAULT_PAGE_SEGMENTATION: u32 = 11;

/// Recognizes text on a page. Implementations may block; the pipeline
/// calls them off the async runtime.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;
    fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextFragment>>;
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    languages: String,
    psm: u32,
}

impl TesseractOcr {
    /// `languages` accepts two-letter codes or traineddata names joined by
    /// `+`, `,` or spaces.
    pub fn new(languages: &str) -> Result<Self> {
        Ok(Self {
            languages: tesseract::normalize_ocr_languages(languages)?,
            psm: DEFAULT_PAGE_SEGMENTATION,
        })
    }

    pub fn with_page_segmentation(mut self, psm: u32) -> Self {
        self.psm = psm;
        self
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    pub fn probe(languages: &str, psm: u32) -> Capability<dyn OcrEngine> {
        let version = match tesseract::tesseract_version() {
            Ok(version) => version,
            Err(err) => return Capability::unavailable(format!("{:#}", err)),
        };
        match Self::new(languages) {
            Ok(engine) => {
                let engine = engine.with_page_segmentation(psm);
                info!("using {} ({}, psm {})", version, engine.languages, engine.psm);
                let engine: Arc<dyn OcrEngine> = Arc::new(engine);
                Capability::Available(engine)
            }
            Err(err) => Capability::unavailable(format!("{:#}", err)),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextFragment>> {
        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .with_context(|| "failed to create temp file for OCR")?;
        image
            .write_to(&mut tmp, image::ImageFormat::Png)
            .with_context(|| "failed to write temp image for OCR")?;
        tmp.flush().with_context(|| "failed to flush temp image for OCR")?;

        let tsv = tesseract::run_tesseract_tsv(tmp.path(), &self.languages, self.psm)?;
        let fragments = parse_tsv_fragments(&tsv);
        debug!("tesseract returned {} fragment(s)", fragments.len());
        Ok(fragments)
    }
}
