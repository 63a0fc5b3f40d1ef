use anyhow::{Result, anyhow, bail};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::archive::{load_page, write_page};
use crate::bubble::engine::geom::{clip_rect, polygon_bbox, polygon_center};
use crate::bubble::engine::preprocess::{self, PreprocessConfig};
use crate::bubble::{
    BBoxPx, Compositor, FragmentMerger, Region, RegionDetector, TextBlock, TextFragment,
    TextLayoutEngine,
};
use crate::capability::Capability;
use crate::ocr::OcrEngine;
use crate::report::PageReport;
use crate::retry::RetryPolicy;
use crate::translator::Translate;

pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Everything a worker needs to turn one page into its translated copy.
/// Shared read-only between workers.
pub struct PageContext {
    pub detector: RegionDetector,
    pub merger: FragmentMerger,
    pub layout: TextLayoutEngine,
    pub compositor: Compositor,
    pub ocr: Capability<dyn OcrEngine>,
    pub translator: Capability<dyn Translate>,
    pub source_lang: String,
    pub target_lang: String,
    pub preprocess: PreprocessConfig,
    pub retry: RetryPolicy,
    pub page_timeout: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct PageJob {
    /// Name used in the report; archive members read `book.zip:001.png`.
    pub label: String,
    pub input: PathBuf,
    pub output: PathBuf,
}

struct PageOutcome {
    warnings: Vec<String>,
    regions: usize,
    blocks: usize,
}

/// Runs one page under the page timeout. Never fails: errors and timeouts
/// become a failed report so the rest of the batch carries on.
pub async fn process_page(ctx: Arc<PageContext>, job: PageJob) -> PageReport {
    let started = Instant::now();
    let label = job.label.clone();
    let output = job.output.display().to_string();
    let limit = ctx.page_timeout;

    let report = match timeout(limit, run_page(Arc::clone(&ctx), job)).await {
        Ok(Ok(outcome)) => {
            info!(
                "{}: {} region(s), {} block(s) -> {}",
                label, outcome.regions, outcome.blocks, output
            );
            let mut report = PageReport::success(label, output);
            report.warnings = outcome.warnings;
            report.regions = outcome.regions;
            report.blocks = outcome.blocks;
            report
        }
        Ok(Err(err)) => {
            warn!("{} failed: {:#}", label, err);
            PageReport::failed(label, format!("{:#}", err))
        }
        Err(_) => {
            warn!("{} timed out after {}s", label, limit.as_secs());
            PageReport::failed(label, format!("timed out after {}s", limit.as_secs()))
        }
    };
    report.with_elapsed(started.elapsed())
}

async fn run_page(ctx: Arc<PageContext>, job: PageJob) -> Result<PageOutcome> {
    let mut warnings = Vec::new();

    let stage = Arc::clone(&ctx);
    let input = job.input.clone();
    let (image, regions) = blocking(move || {
        let image = load_page(&input)?;
        let image = preprocess::apply(&stage.preprocess, image);
        let regions = stage.detector.detect(&image)?;
        Ok((image, regions))
    })
    .await?;
    debug!("{}: detected {} region(s)", job.label, regions.len());

    let image = Arc::new(image);
    let fragments = recognize(&ctx, &image, &mut warnings).await;
    let image = Arc::try_unwrap(image).unwrap_or_else(|shared| (*shared).clone());

    let blocks = ctx.merger.merge_fragments(fragments);
    let texts = translate_blocks(&ctx, &blocks, &mut warnings).await;

    let stage = Arc::clone(&ctx);
    let output = job.output.clone();
    let outcome = PageOutcome {
        warnings,
        regions: regions.len(),
        blocks: blocks.len(),
    };
    blocking(move || {
        let mut image = image;
        render_blocks(
            &stage.layout,
            &stage.compositor,
            &mut image,
            &regions,
            &blocks,
            &texts,
        )?;
        write_page(&image, &output, stage.jpeg_quality)
    })
    .await?;
    Ok(outcome)
}

async fn recognize(
    ctx: &PageContext,
    image: &Arc<RgbaImage>,
    warnings: &mut Vec<String>,
) -> Vec<TextFragment> {
    let engine = match &ctx.ocr {
        Capability::Available(engine) => Arc::clone(engine),
        Capability::Unavailable { reason } => {
            warnings.push(format!("ocr unavailable: {}", reason));
            return Vec::new();
        }
    };

    let label = format!("ocr ({})", engine.name());
    let result = ctx
        .retry
        .run(&label, |_| {
            let engine = Arc::clone(&engine);
            let image = Arc::clone(image);
            async move { blocking(move || engine.recognize(&image)).await }
        })
        .await;
    match result {
        Ok(fragments) => fragments,
        Err(err) => {
            warn!("{:#}", err);
            warnings.push(format!("ocr failed: {:#}", err));
            Vec::new()
        }
    }
}

/// One translation per block, in order. Any block that cannot be translated
/// keeps its source text. Once a block has used up its retries the
/// translator is not called again for the rest of the page.
async fn translate_blocks(
    ctx: &PageContext,
    blocks: &[TextBlock],
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let originals = || blocks.iter().map(|block| block.text.clone()).collect();
    if blocks.is_empty() || ctx.source_lang.eq_ignore_ascii_case(&ctx.target_lang) {
        return originals();
    }
    let Some(translator) = ctx.translator.get() else {
        warnings.push(format!(
            "translation unavailable: {}; painting source text",
            ctx.translator.reason().unwrap_or("unknown reason")
        ));
        return originals();
    };

    let mut texts = Vec::with_capacity(blocks.len());
    for (idx, block) in blocks.iter().enumerate() {
        let result = ctx
            .retry
            .run("translation", |_| {
                translator.translate(&block.text, &ctx.source_lang, &ctx.target_lang)
            })
            .await;
        match result {
            Ok(text) if !text.trim().is_empty() => texts.push(text),
            Ok(_) => {
                warnings.push(format!("empty translation for {:?}; kept source text", block.text));
                texts.push(block.text.clone());
            }
            Err(err) => {
                let skipped = blocks.len() - idx - 1;
                warn!(
                    "translation of {:?} failed: {:#}; skipping {} remaining block(s)",
                    block.text, err, skipped
                );
                warnings.push(format!(
                    "translation failed for {:?}: {:#}; kept source text for {} block(s)",
                    block.text,
                    err,
                    skipped + 1
                ));
                texts.extend(blocks[idx..].iter().map(|block| block.text.clone()));
                break;
            }
        }
    }
    texts
}

/// Lays out each block's text in its target area and paints the page.
/// Returns the number of painted regions.
pub fn render_blocks(
    layout: &TextLayoutEngine,
    compositor: &Compositor,
    image: &mut RgbaImage,
    regions: &[Region],
    blocks: &[TextBlock],
    texts: &[String],
) -> Result<usize> {
    if blocks.len() != texts.len() {
        bail!(
            "got {} translation(s) for {} block(s)",
            texts.len(),
            blocks.len()
        );
    }
    let (width, height) = image.dimensions();
    let targets = assign_targets(regions, blocks);

    let mut items = Vec::with_capacity(blocks.len());
    for ((block, text), target) in blocks.iter().zip(texts).zip(targets) {
        let Some(target) = target.and_then(|bbox| {
            clip_rect(
                bbox.x as i64,
                bbox.y as i64,
                bbox.w as i64,
                bbox.h as i64,
                width,
                height,
            )
        }) else {
            debug!("block {:?} lies outside the page", block.text);
            continue;
        };
        let result = layout
            .layout(text, &target)
            .map_err(|err| anyhow!("layout of {:?} failed: {:#}", block.text, err))?;
        items.push((target, result));
    }
    compositor.paint_all(image, &items)
}

/// Picks where each block is painted: the smallest detected region holding
/// the centre of the block's anchor that no earlier block has taken, or
/// else the anchor's own bounding box.
pub fn assign_targets(regions: &[Region], blocks: &[TextBlock]) -> Vec<Option<BBoxPx>> {
    let mut claimed = vec![false; regions.len()];
    blocks
        .iter()
        .map(|block| {
            let center = polygon_center(&block.anchor_polygon)?;
            let best = regions
                .iter()
                .enumerate()
                .filter(|(idx, region)| !claimed[*idx] && region.bbox.contains_point(center))
                .min_by_key(|(_, region)| region.bbox.area());
            match best {
                Some((idx, region)) => {
                    claimed[idx] = true;
                    Some(region.bbox)
                }
                None => polygon_bbox(&block.anchor_polygon),
            }
        })
        .collect()
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| anyhow!("worker task failed: {}", err))?
}
