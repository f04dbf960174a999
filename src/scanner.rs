use crate::intake::{IntakeSender, PathFilter, Source};
use crate::signal::StopSignal;
use ahash::AHashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Periodic full-tree reconciliation. Anything not seen on the previous
/// pass is handed to the intake; the first pass reports every file.
pub struct PollingScanner {
    root: PathBuf,
    interval: Duration,
    intake: IntakeSender,
    filter: PathFilter,
    known: AHashSet<PathBuf>,
    passes: u64,
}

impl PollingScanner {
    pub fn new(root: &Path, interval: Duration, intake: IntakeSender, filter: PathFilter) -> Self {
        Self {
            root: root.to_path_buf(),
            interval,
            intake,
            filter,
            known: AHashSet::new(),
            passes: 0,
        }
    }

    pub fn run(mut self, stop: StopSignal) {
        if !self.root.is_dir() {
            warn!("Scan root not found: {}", self.root.display());
        }
        info!("Monitoring directory: {}", self.root.display());

        while !stop.wait_timeout(self.interval) {
            if !self.scan_once() {
                break;
            }
        }
        info!("Polling scanner stopped");
    }

    /// One reconciliation pass. Returns false when the intake is gone.
    pub fn scan_once(&mut self) -> bool {
        let current = walk_files(&self.root, &self.filter);
        let new_files: Vec<&PathBuf> = current.difference(&self.known).collect();

        if self.passes == 0 {
            info!("Initial scan found {} files", new_files.len());
        } else if !new_files.is_empty() {
            info!("New files detected: {}", new_files.len());
        }

        for path in new_files {
            debug!("Discovered {}", path.display());
            if !self.intake.submit(path.clone(), Source::Scanner) {
                error!("Intake closed, stopping scanner");
                return false;
            }
        }

        self.known = current;
        self.passes += 1;
        true
    }

    pub fn known(&self) -> usize {
        self.known.len()
    }
}

fn walk_files(root: &Path, filter: &PathFilter) -> AHashSet<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| filter.accepts(path))
        .collect()
}
