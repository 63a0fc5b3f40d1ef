use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;

use bubble_translator::{Config, ocr};

#[derive(Parser, Debug)]
#[command(
    name = "bubble-translator",
    version,
    about = "Translate the text in manga speech bubbles and paint it back onto the page"
)]
struct Cli {
    /// Images, folders or ZIP archives to translate
    inputs: Vec<PathBuf>,

    /// Directory for translated pages (default from settings: output)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "settings")]
    settings: Option<PathBuf>,

    /// Source language code (e.g. en)
    #[arg(short = 'L', long = "source-lang")]
    source_lang: Option<String>,

    /// Target language code (e.g. ar)
    #[arg(short = 'l', long = "target-lang")]
    target_lang: Option<String>,

    /// LibreTranslate-compatible endpoint URL
    #[arg(long = "endpoint")]
    endpoint: Option<String>,

    /// API key for the translation endpoint
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Tesseract languages (e.g. eng+jpn); defaults to the source language
    #[arg(long = "ocr-languages")]
    ocr_languages: Option<String>,

    /// Pages processed concurrently (0 = one per CPU)
    #[arg(short = 'w', long = "workers")]
    workers: Option<usize>,

    /// Pages per batch
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,

    /// Per-page timeout in seconds
    #[arg(long = "timeout")]
    timeout: Option<u64>,

    /// Bundle translated pages into this ZIP file
    #[arg(short = 'a', long = "archive")]
    archive: Option<PathBuf>,

    /// Font file used for translated text
    #[arg(long = "font")]
    font: Option<PathBuf>,

    /// Write the JSON report here instead of stdout
    #[arg(long = "report")]
    report: Option<PathBuf>,

    /// Smooth compression noise before detection
    #[arg(long = "smooth")]
    smooth: bool,

    /// Straighten rotated scans before detection
    #[arg(long = "deskew")]
    deskew: bool,

    /// Draw region outlines (debugging)
    #[arg(long = "outline")]
    outline: bool,

    /// Skip OCR (pages are copied with detection only)
    #[arg(long = "no-ocr")]
    no_ocr: bool,

    /// Skip translation and paint the recognized source text
    #[arg(long = "no-translate")]
    no_translate: bool,

    /// Show installed tesseract languages and exit
    #[arg(long = "show-ocr-languages")]
    show_ocr_languages: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    bubble_translator::logging::init(cli.verbose)?;

    if cli.show_ocr_languages {
        for lang in ocr::list_tesseract_languages()? {
            println!("{}", lang);
        }
        return Ok(());
    }

    let report_path = cli.report.clone();
    let config = Config {
        inputs: cli.inputs,
        output_dir: cli.output,
        settings_path: cli.settings,
        source_lang: cli.source_lang,
        target_lang: cli.target_lang,
        endpoint: cli.endpoint,
        api_key: cli.key,
        ocr_languages: cli.ocr_languages,
        workers: cli.workers,
        batch_size: cli.batch_size,
        timeout_secs: cli.timeout,
        archive: cli.archive,
        font_path: cli.font,
        no_ocr: cli.no_ocr,
        no_translate: cli.no_translate,
        smooth: cli.smooth,
        deskew: cli.deskew,
        draw_outline: cli.outline,
    };

    let report = bubble_translator::run(config).await?;
    match report_path {
        Some(path) => report.write(&path)?,
        None => println!("{}", report.to_json()?),
    }

    if report.totals.total > 0 && report.totals.succeeded == 0 {
        return Err(anyhow!("no page could be translated"));
    }
    Ok(())
}
