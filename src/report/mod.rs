//! Report sinks
//!
//! Rendered artifacts go through a `ReportStore` so retention can be
//! exercised without touching the file system. After every publish only the
//! `max_reports` most recently created artifacts are kept.

pub mod csv_export;
pub mod html;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::config::{ReportingConfig, ScreenerConfig};
use crate::engine::ScreeningRun;
use crate::error::ScreenResult;

pub use csv_export::{metrics_csv_filename, write_metrics_csv};
pub use html::{render_failure_report, render_shortlist, FailureStats};

pub const SHORTLIST_PREFIX: &str = "breakout_report_";
pub const FAILURE_PREFIX: &str = "failure_report_";

/// One stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub name: String,
    pub created: SystemTime,
}

/// Storage capability for rendered reports
pub trait ReportStore: Send + Sync {
    fn list(&self) -> ScreenResult<Vec<ArtifactInfo>>;

    /// Store `contents` under `name`, replacing any artifact of the same name.
    /// Returns the location of the stored artifact.
    fn create(&self, name: &str, contents: &str) -> ScreenResult<String>;

    fn remove(&self, name: &str) -> ScreenResult<()>;

    /// Delete all but the `keep` newest artifacts (by creation time, ties by
    /// name). Returns the names that were deleted, oldest first.
    fn delete_oldest(&self, keep: usize) -> ScreenResult<Vec<String>> {
        let mut artifacts = self.list()?;
        if artifacts.len() <= keep {
            debug!(count = artifacts.len(), keep, "Report count within limit");
            return Ok(Vec::new());
        }

        artifacts.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        let excess = artifacts.len() - keep;

        let mut removed = Vec::with_capacity(excess);
        for artifact in artifacts.into_iter().take(excess) {
            self.remove(&artifact.name)?;
            info!("Deleted old report: {}", artifact.name);
            removed.push(artifact.name);
        }
        Ok(removed)
    }
}

/// Reports stored as files in one directory, matched by prefix and extension
#[derive(Debug, Clone)]
pub struct FsReportStore {
    dir: PathBuf,
    prefix: String,
    extension: String,
}

impl FsReportStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) && name.ends_with(&format!(".{}", self.extension))
    }
}

impl ReportStore for FsReportStore {
    fn list(&self) -> ScreenResult<Vec<ArtifactInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.matches(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(UNIX_EPOCH);
            artifacts.push(ArtifactInfo { name, created });
        }
        Ok(artifacts)
    }

    fn create(&self, name: &str, contents: &str) -> ScreenResult<String> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, contents)?;
        Ok(path.display().to_string())
    }

    fn remove(&self, name: &str) -> ScreenResult<()> {
        std::fs::remove_file(self.dir.join(name))?;
        Ok(())
    }
}

/// In-memory store; creation order is a monotonically increasing counter
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_seq: u64,
    artifacts: BTreeMap<String, (u64, String)>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = inner.artifacts.iter().map(|(n, (seq, _))| (*seq, n.clone())).collect();
        entries.sort();
        entries.into_iter().map(|(_, n)| n).collect()
    }

    pub fn contents(&self, name: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.artifacts.get(name).map(|(_, body)| body.clone())
    }
}

impl ReportStore for MemoryReportStore {
    fn list(&self) -> ScreenResult<Vec<ArtifactInfo>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .artifacts
            .iter()
            .map(|(name, (seq, _))| ArtifactInfo {
                name: name.clone(),
                created: UNIX_EPOCH + Duration::from_secs(*seq),
            })
            .collect())
    }

    fn create(&self, name: &str, contents: &str) -> ScreenResult<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner
            .artifacts
            .insert(name.to_string(), (seq, contents.to_string()));
        Ok(format!("memory://{}", name))
    }

    fn remove(&self, name: &str) -> ScreenResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.artifacts.remove(name);
        Ok(())
    }
}

pub fn shortlist_filename(run: &ScreeningRun) -> String {
    format!(
        "{}{}.html",
        SHORTLIST_PREFIX,
        run.run_timestamp.format("%Y-%m-%d_%H%M%S")
    )
}

pub fn failure_filename(run: &ScreeningRun) -> String {
    format!(
        "{}{}.html",
        FAILURE_PREFIX,
        run.run_timestamp.format("%Y-%m-%d_%H%M%S")
    )
}

/// Render and store the shortlist report, then apply retention.
///
/// A report is written even when nothing passed so that every run leaves
/// exactly one artifact.
pub fn publish_shortlist(
    store: &dyn ReportStore,
    run: &ScreeningRun,
    screener: &ScreenerConfig,
    max_reports: usize,
) -> ScreenResult<String> {
    let html = render_shortlist(run, screener);
    let location = store.create(&shortlist_filename(run), &html)?;
    info!(passed = run.passed.len(), "Report written to {}", location);

    let removed = store.delete_oldest(max_reports)?;
    if !removed.is_empty() {
        debug!(removed = removed.len(), "Applied report retention");
    }
    Ok(location)
}

/// Render and store the failure-analysis report when enabled
pub fn publish_failure_report(
    store: &dyn ReportStore,
    run: &ScreeningRun,
    screener: &ScreenerConfig,
    reporting: &ReportingConfig,
) -> ScreenResult<Option<String>> {
    if !reporting.failure_report {
        return Ok(None);
    }
    if run.failed.is_empty() {
        debug!("No failed instruments; skipping failure report");
        return Ok(None);
    }

    let html = render_failure_report(run, screener, reporting.failure_report_min_rules_passed);
    let location = store.create(&failure_filename(run), &html)?;
    info!(failed = run.failed_count, "Failure report written to {}", location);

    if let Err(e) = store.delete_oldest(reporting.max_reports) {
        warn!("Failure report retention failed: {}", e);
    }
    Ok(Some(location))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_retention_keeps_newest() {
        let store = MemoryReportStore::new();
        for i in 0..5 {
            store.create(&format!("r{}.html", i), "x").unwrap();
        }
        let removed = store.delete_oldest(2).unwrap();
        assert_eq!(removed, vec!["r0.html", "r1.html", "r2.html"]);
        assert_eq!(store.names(), vec!["r3.html", "r4.html"]);
    }

    #[test]
    fn test_memory_recreate_refreshes_order() {
        let store = MemoryReportStore::new();
        store.create("a.html", "1").unwrap();
        store.create("b.html", "1").unwrap();
        store.create("a.html", "2").unwrap();
        store.delete_oldest(1).unwrap();
        assert_eq!(store.names(), vec!["a.html"]);
        assert_eq!(store.contents("a.html").unwrap(), "2");
    }

    struct Tied(Mutex<Vec<String>>);

    impl ReportStore for Tied {
        fn list(&self) -> ScreenResult<Vec<ArtifactInfo>> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .map(|n| ArtifactInfo {
                    name: n.clone(),
                    created: UNIX_EPOCH,
                })
                .collect())
        }
        fn create(&self, name: &str, _contents: &str) -> ScreenResult<String> {
            self.0.lock().unwrap().push(name.to_string());
            Ok(name.to_string())
        }
        fn remove(&self, name: &str) -> ScreenResult<()> {
            self.0.lock().unwrap().retain(|n| n != name);
            Ok(())
        }
    }

    #[test]
    fn test_ties_broken_by_name() {
        let store = Tied(Mutex::new(vec!["c".into(), "a".into(), "b".into()]));
        assert_eq!(store.delete_oldest(1).unwrap(), vec!["a", "b"]);
        assert_eq!(*store.0.lock().unwrap(), vec!["c".to_string()]);
    }

    #[test]
    fn test_fs_store_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReportStore::new(dir.path(), SHORTLIST_PREFIX, "html");
        store.create("breakout_report_2025-04-24_100000.html", "a").unwrap();
        store.create("breakout_report_2025-04-25_100000.html", "b").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        std::fs::write(dir.path().join("breakout_report_x.csv"), "keep").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        store.delete_oldest(0).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("breakout_report_x.csv").exists());
    }

    #[test]
    fn test_fs_store_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsReportStore::new(dir.path().join("absent"), SHORTLIST_PREFIX, "html");
        assert!(store.list().unwrap().is_empty());
    }
}
