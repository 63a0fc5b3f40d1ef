use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

use crate::pipeline::{PageContext, PageJob, process_page};
use crate::report::PageReport;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// `0` means one worker per CPU.
pub fn resolve_workers(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

/// Processes pages in chunks of `batch_size`, at most `workers` pages at a
/// time. Reports come back in input order; a failed page never stops the
/// others.
pub async fn run_batch(
    ctx: Arc<PageContext>,
    jobs: Vec<PageJob>,
    workers: usize,
    batch_size: usize,
) -> Vec<PageReport> {
    let workers = resolve_workers(workers);
    let batch_size = batch_size.max(1);
    let batches = jobs.len().div_ceil(batch_size);

    let mut reports = Vec::with_capacity(jobs.len());
    for (idx, chunk) in jobs.chunks(batch_size).enumerate() {
        info!(
            "batch {}/{}: {} page(s), {} worker(s)",
            idx + 1,
            batches,
            chunk.len(),
            workers
        );
        let results: Vec<PageReport> = stream::iter(chunk.to_vec())
            .map(|job| process_page(Arc::clone(&ctx), job))
            .buffered(workers)
            .collect()
            .await;
        reports.extend(results);
    }
    reports
}
