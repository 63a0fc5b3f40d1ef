use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use time::{OffsetDateTime, format_description};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Success,
    Failed,
}

/// Outcome of one page. Collaborator degradation (no OCR, failed
/// translation) stays a success and is listed under `warnings`.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub input: String,
    pub output: Option<String>,
    pub status: PageStatus,
    pub message: Option<String>,
    pub warnings: Vec<String>,
    pub regions: usize,
    pub blocks: usize,
    pub elapsed_ms: u64,
}

impl PageReport {
    pub fn success(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: Some(output.into()),
            status: PageStatus::Success,
            message: None,
            warnings: Vec::new(),
            regions: 0,
            blocks: 0,
            elapsed_ms: 0,
        }
    }

    pub fn failed(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: None,
            status: PageStatus::Failed,
            message: Some(message.into()),
            warnings: Vec::new(),
            regions: 0,
            blocks: 0,
            elapsed_ms: 0,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == PageStatus::Success
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Totals {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub with_warnings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub generated_at: String,
    pub totals: Totals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    pub pages: Vec<PageReport>,
}

impl BatchReport {
    pub fn new(pages: Vec<PageReport>) -> Self {
        let generated_at = OffsetDateTime::now_utc()
            .format(&format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let succeeded = pages.iter().filter(|page| page.is_success()).count();
        let with_warnings = pages
            .iter()
            .filter(|page| !page.warnings.is_empty())
            .count();
        Self {
            generated_at,
            totals: Totals {
                total: pages.len(),
                succeeded,
                failed: pages.len() - succeeded,
                with_warnings,
            },
            archive: None,
            pages,
        }
    }

    pub fn successful_outputs(&self) -> impl Iterator<Item = &str> {
        self.pages
            .iter()
            .filter(|page| page.is_success())
            .filter_map(|page| page.output.as_deref())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "failed to serialize batch report")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create report directory: {}", parent.display())
            })?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write report: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_count_statuses_and_warnings() {
        let mut warned = PageReport::success("a.png", "out/a.png");
        warned.warnings.push("translation unavailable".to_string());
        let report = BatchReport::new(vec![
            warned,
            PageReport::success("b.png", "out/b.png"),
            PageReport::failed("c.rar", "unsupported archive format: rar"),
        ]);
        assert_eq!(report.totals.total, 3);
        assert_eq!(report.totals.succeeded, 2);
        assert_eq!(report.totals.failed, 1);
        assert_eq!(report.totals.with_warnings, 1);
        assert_eq!(
            report.successful_outputs().collect::<Vec<_>>(),
            vec!["out/a.png", "out/b.png"]
        );
    }

    #[test]
    fn report_serializes_lowercase_status() {
        let report = BatchReport::new(vec![
            PageReport::failed("x.png", "boom").with_elapsed(Duration::from_millis(42)),
        ]);
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json().expect("json")).expect("parse");
        assert_eq!(json["pages"][0]["status"], "failed");
        assert_eq!(json["pages"][0]["elapsed_ms"], 42);
        assert!(json.get("archive").is_none());
        assert!(json["generated_at"].as_str().is_some_and(|v| v.contains('T')));
    }

    #[test]
    fn report_is_written_to_nested_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reports/run.json");
        BatchReport::new(Vec::new()).write(&path).expect("write");
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains("\"total\": 0"));
    }
}
