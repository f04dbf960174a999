//! Shared intake: both discovery paths hand candidates here, where they are
//! settled, classified and merged into the profile store.

mod settle;

pub use settle::{DiskProbe, FileProbe, Settler};

use crate::classify::{classify, MetadataReader};
use crate::error::{Error, Result};
use crate::model::FileProfile;
use crate::signal::StopSignal;
use crate::stats::PipelineStats;
use crate::store::DirectoryProfile;
use dashmap::DashSet;
use glob::Pattern;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Watcher,
    Scanner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub source: Source,
}

/// Cloneable handle the watcher and scanner push candidates through.
#[derive(Debug, Clone)]
pub struct IntakeSender {
    tx: Sender<Candidate>,
}

impl IntakeSender {
    /// Returns false once the intake worker has gone away.
    pub fn submit(&self, path: PathBuf, source: Source) -> bool {
        self.tx.send(Candidate { path, source }).is_ok()
    }
}

pub fn channel() -> (IntakeSender, Receiver<Candidate>) {
    let (tx, rx) = mpsc::channel();
    (IntakeSender { tx }, rx)
}

/// Paths neither discovery path should report.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    ignore: Vec<Pattern>,
    excluded_roots: Vec<PathBuf>,
}

impl PathFilter {
    pub fn new(ignore_globs: &[String], excluded_roots: Vec<PathBuf>) -> Self {
        let ignore = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        Self {
            ignore,
            excluded_roots,
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        if self.excluded_roots.iter().any(|root| path.starts_with(root)) {
            return false;
        }
        !self.ignore.iter().any(|pattern| pattern.matches_path(path))
    }
}

pub struct Intake {
    store: Arc<DirectoryProfile>,
    reader: Arc<dyn MetadataReader>,
    probe: Arc<dyn FileProbe>,
    settler: Settler,
    stats: Arc<PipelineStats>,
    in_flight: DashSet<PathBuf>,
    pool: rayon::ThreadPool,
}

impl Intake {
    pub fn new(
        store: Arc<DirectoryProfile>,
        reader: Arc<dyn MetadataReader>,
        probe: Arc<dyn FileProbe>,
        settler: Settler,
        stats: Arc<PipelineStats>,
        threads: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("intake-{}", i))
            .build()
            .map_err(|e| Error::Other(format!("Failed to build intake pool: {}", e)))?;

        Ok(Self {
            store,
            reader,
            probe,
            settler,
            stats,
            in_flight: DashSet::new(),
            pool,
        })
    }

    /// Settle, classify and merge one candidate on the calling thread.
    pub fn process(&self, candidate: &Candidate) -> Result<FileProfile> {
        let path = &candidate.path;

        if let Err(stall) = self.settler.settle(self.probe.as_ref(), path) {
            self.stats.record_transfer_stall();
            warn!("Transfer stalled ({:?}): {}", candidate.source, stall);
            return Err(stall.into());
        }

        let classification = classify(path, self.reader.as_ref());
        if classification.metadata_error.is_some() {
            self.stats.record_metadata_unreadable();
        }

        let profile = classification.profile;
        info!(
            "Final file transfer complete ({:?}): {}",
            candidate.source,
            path.display()
        );
        self.store.merge(profile.clone());
        self.stats.record_profiled();
        Ok(profile)
    }

    /// Drain candidates until the channel closes or `stop` is raised. Each
    /// candidate settles on the intake pool so one slow transfer does not
    /// hold up the rest.
    pub fn run(self: Arc<Self>, rx: Receiver<Candidate>, stop: StopSignal) {
        info!("Intake worker started");
        while !stop.is_stopped() {
            match rx.recv_timeout(IDLE_POLL) {
                Ok(candidate) => self.schedule(candidate),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Intake channel closed");
                    break;
                }
            }
        }
        info!("Intake worker stopped");
    }

    fn schedule(self: &Arc<Self>, candidate: Candidate) {
        if self.store.contains_path(&candidate.path) {
            trace!("Already profiled: {}", candidate.path.display());
            return;
        }
        if !self.in_flight.insert(candidate.path.clone()) {
            trace!("Already settling: {}", candidate.path.display());
            return;
        }

        let this = Arc::clone(self);
        self.pool.spawn(move || {
            let _ = this.process(&candidate);
            this.in_flight.remove(&candidate.path);
        });
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
