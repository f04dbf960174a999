//! Wires the watcher, scanner, intake and dispatch engine together and owns
//! shutdown.

use crate::classify::{MetadataReader, SystemMetadata};
use crate::config::AppConfig;
use crate::dispatch::{
    DispatchEngine, DispatchSettings, FaceFusionRunner, JobIdAllocator, JobRunner, JobTemplates,
};
use crate::error::{Error, Result};
use crate::intake::{self, DiskProbe, Intake, PathFilter, Settler};
use crate::scanner::PollingScanner;
use crate::signal::StopSignal;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::store::DirectoryProfile;
use crate::watcher::EventWatcher;
use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

pub struct Automation {
    config: AppConfig,
    store: Arc<DirectoryProfile>,
    stats: Arc<PipelineStats>,
}

impl Automation {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: Arc::new(DirectoryProfile::new()),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn store(&self) -> &Arc<DirectoryProfile> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Run against the real FaceFusion job store and metadata readers until
    /// `stop` is raised.
    pub fn run(&self, stop: StopSignal) -> Result<StatsSnapshot> {
        let runner = FaceFusionRunner::new(&self.config.jobs_dir, self.config.runner.clone());
        runner.init()?;
        self.run_with(runner, Arc::new(SystemMetadata::default()), stop)
    }

    pub fn run_with<R: JobRunner>(
        &self,
        runner: R,
        reader: Arc<dyn MetadataReader>,
        stop: StopSignal,
    ) -> Result<StatsSnapshot> {
        let config = &self.config;
        let watch_root = fs::canonicalize(&config.watch_root).map_err(|e| {
            Error::Other(format!(
                "Watch root {} is not accessible: {}",
                config.watch_root.display(),
                e
            ))
        })?;
        fs::create_dir_all(&config.backup_root)?;
        let backup_root = fs::canonicalize(&config.backup_root)?;

        let mut settings = DispatchSettings::from_config(config);
        settings.backup_root = backup_root.clone();
        let templates = JobTemplates::load(
            config.image_template.as_deref(),
            config.video_template.as_deref(),
        )?;

        let mut excluded = vec![backup_root];
        if let Ok(jobs_dir) = fs::canonicalize(&config.jobs_dir) {
            excluded.push(jobs_dir);
        }
        let filter = PathFilter::new(&config.ignore_patterns, excluded);

        let (tx, rx) = intake::channel();
        let settler = Settler::new(
            config.settle_interval(),
            config.appear_timeout(),
            config.stabilize_timeout(),
            stop.clone(),
        );
        let intake = Arc::new(Intake::new(
            Arc::clone(&self.store),
            reader,
            Arc::new(DiskProbe),
            settler,
            Arc::clone(&self.stats),
            config.intake_threads,
        )?);

        let intake_handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("intake".to_string())
                .spawn(move || intake.run(rx, stop))?
        };

        let scanner_handle = if config.polling {
            let scanner = PollingScanner::new(
                &watch_root,
                config.poll_interval(),
                tx.clone(),
                filter.clone(),
            );
            let stop = stop.clone();
            Some(
                thread::Builder::new()
                    .name("scanner".to_string())
                    .spawn(move || scanner.run(stop))?,
            )
        } else {
            None
        };

        let watcher = match EventWatcher::start(&watch_root, tx, filter) {
            Ok(watcher) => watcher,
            Err(e) => {
                stop.stop();
                join("scanner", scanner_handle);
                join("intake", Some(intake_handle));
                return Err(e);
            }
        };

        let mut engine = DispatchEngine::new(
            Arc::clone(&self.store),
            runner,
            templates,
            JobIdAllocator::new(&config.job_prefix),
            settings,
            Arc::clone(&self.stats),
        );
        engine.run(&stop);

        drop(watcher);
        join("scanner", scanner_handle);
        join("intake", Some(intake_handle));

        Ok(self.finish())
    }

    fn finish(&self) -> StatsSnapshot {
        for record in self.store.quarantined() {
            warn!(
                "Quarantined after {} failures: {} ({})",
                record.state.failures,
                record.profile.directory.display(),
                record.state.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        if !self.store.is_empty() {
            info!("{} files left unprocessed", self.store.len());
        }

        let snapshot = self.stats.snapshot();
        snapshot.print();
        if let Err(e) = snapshot.write_csv(&self.config.stats_csv) {
            error!(
                "Failed to write stats to {}: {}",
                self.config.stats_csv.display(),
                e
            );
        }
        snapshot
    }
}

fn join(name: &str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            error!("{} thread panicked", name);
        }
    }
}

