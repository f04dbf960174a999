//! Dispatch engine: the periodic tick that archives FacePlay output and
//! feeds eligible images and videos to the job runner.

pub mod archive;
pub mod facefusion;
pub mod runner;

pub use archive::{archive_file, backup_dir, ArchiveOutcome};
pub use facefusion::FaceFusionRunner;
pub use runner::{Job, JobIdAllocator, JobRunner, JobStep, StepArgs, StepStatus};

use crate::config::{AppConfig, RetryPolicy};
use crate::error::{Error, Result};
use crate::model::{JobKind, ProfileRecord};
use crate::signal::StopSignal;
use crate::stats::PipelineStats;
use crate::store::{DirectoryProfile, FailureOutcome};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Fixed per-kind step arguments; `target_path` and `output_path` are filled
/// in per file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobTemplates {
    pub image: StepArgs,
    pub video: StepArgs,
}

impl JobTemplates {
    pub fn load(image: Option<&Path>, video: Option<&Path>) -> Result<Self> {
        Ok(Self {
            image: load_template(image)?,
            video: load_template(video)?,
        })
    }

    pub fn for_kind(&self, kind: JobKind) -> &StepArgs {
        match kind {
            JobKind::Image => &self.image,
            JobKind::Video => &self.video,
        }
    }
}

fn load_template(path: Option<&Path>) -> Result<StepArgs> {
    let Some(path) = path else {
        return Ok(StepArgs::new());
    };
    let text = fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Other(format!(
            "Template {} is not a JSON object",
            path.display()
        ))),
    }
}

/// `dir/name.ext` → `dir/name-ff.ext`.
pub fn output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{}-ff.{}", stem, ext.to_string_lossy()),
        None => format!("{}-ff", stem),
    };
    source.with_file_name(name)
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub backup_root: PathBuf,
    pub backup_segments: [usize; 2],
    pub execution_providers: Vec<String>,
    pub retry: RetryPolicy,
    pub interval: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            backup_root: config.backup_root.clone(),
            backup_segments: config.backup_segments,
            execution_providers: config.runner.execution_providers.clone(),
            retry: config.retry_policy(),
            interval: config.dispatch_interval(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub archived: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub skipped: usize,
}

pub struct DispatchEngine<R: JobRunner> {
    store: Arc<DirectoryProfile>,
    runner: R,
    templates: JobTemplates,
    ids: JobIdAllocator,
    settings: DispatchSettings,
    stats: Arc<PipelineStats>,
}

impl<R: JobRunner> DispatchEngine<R> {
    pub fn new(
        store: Arc<DirectoryProfile>,
        runner: R,
        templates: JobTemplates,
        ids: JobIdAllocator,
        settings: DispatchSettings,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            store,
            runner,
            templates,
            ids,
            settings,
            stats,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Tick until `stop` is raised.
    pub fn run(&mut self, stop: &StopSignal) {
        info!("Dispatch loop started");
        loop {
            let report = self.tick();
            if report != TickReport::default() {
                debug!("Tick: {:?}", report);
            }
            if stop.wait_timeout(self.settings.interval) {
                break;
            }
        }
        info!("Dispatch loop stopped");
    }

    /// One pass each for FacePlay archiving, image jobs and video jobs, in
    /// that order.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = Instant::now();

        for record in self.select(now, |r| r.profile.is_faceplay) {
            info!("Processing faceplay item: {}", record.profile.directory.display());
            self.archive_record(&record, &mut report);
        }

        for kind in [JobKind::Image, JobKind::Video] {
            let selected = self.select(now, |r| match kind {
                JobKind::Image => r.profile.is_dispatchable_image(),
                JobKind::Video => r.profile.is_dispatchable_video(),
            });
            for record in selected {
                if record.state.archive_pending {
                    self.archive_record(&record, &mut report);
                } else {
                    info!("Processing {}: {}", kind, record.profile.directory.display());
                    self.dispatch(&record, kind, &mut report);
                }
            }
        }

        report.skipped = self
            .store
            .snapshot_matching(|r| !r.state.is_due(now))
            .len();
        report
    }

    fn select<F>(&self, now: Instant, predicate: F) -> Vec<ProfileRecord>
    where
        F: Fn(&ProfileRecord) -> bool,
    {
        let mut records = self
            .store
            .snapshot_matching(|r| r.state.is_due(now) && predicate(r));
        records.sort_by(|a, b| a.profile.directory.cmp(&b.profile.directory));
        records
    }

    fn dispatch(&mut self, record: &ProfileRecord, kind: JobKind, report: &mut TickReport) {
        let source = &record.profile.directory;
        let job_id = self.ids.next_id();

        let mut job = match self.runner.create_job(&job_id) {
            Ok(job) => job,
            Err(e) => {
                self.fail(record, &format!("create_job failed: {}", e));
                report.jobs_failed += 1;
                return;
            }
        };

        let mut args = self.templates.for_kind(kind).clone();
        args.insert(
            "target_path".to_string(),
            Value::String(source.to_string_lossy().into_owned()),
        );
        args.insert(
            "output_path".to_string(),
            Value::String(output_path(source).to_string_lossy().into_owned()),
        );

        if let Err(e) = self.runner.add_step(&mut job, args) {
            warn!("Failed to add_step for: {} ({})", source.display(), e);
            self.stats.record_step_rejected();
            self.fail(record, &e.to_string());
            report.jobs_failed += 1;
            return;
        }

        if let Err(e) = self.runner.submit_job(&job) {
            self.fail(record, &format!("submit_job failed: {}", e));
            report.jobs_failed += 1;
            return;
        }
        match kind {
            JobKind::Image => self.stats.record_image_job(),
            JobKind::Video => self.stats.record_video_job(),
        }

        match self.runner.run_all(&self.settings.execution_providers) {
            Ok(true) => {
                report.jobs_succeeded += 1;
                let filename = record.profile.filename();
                if !self.store.mark_archive_pending(&filename, source) {
                    // A same-named file took the entry while the job ran. It
                    // keeps its own state; only this file is archived.
                    warn!("{} was replaced during its job run", source.display());
                }
                self.archive_record(record, report);
            }
            Ok(false) => {
                warn!("FaceFusion processing failed for: {}", source.display());
                self.stats.record_run_failure();
                self.fail(record, "job run reported failure");
                report.jobs_failed += 1;
            }
            Err(e) => {
                error!("Could not run jobs for {}: {}", source.display(), e);
                self.stats.record_run_failure();
                self.fail(record, &e.to_string());
                report.jobs_failed += 1;
            }
        }
    }

    /// Move the file to backup and drop its entry. A failed move keeps the
    /// entry so the archive is retried.
    fn archive_record(&self, record: &ProfileRecord, report: &mut TickReport) {
        let source = &record.profile.directory;
        let filename = record.profile.filename();

        match archive_file(
            source,
            &self.settings.backup_root,
            self.settings.backup_segments,
        ) {
            Ok(outcome) => {
                match &outcome {
                    ArchiveOutcome::Moved(dest) => {
                        info!("Archived {} -> {}", source.display(), dest.display())
                    }
                    ArchiveOutcome::AlreadyGone => {
                        info!("Already archived or removed: {}", source.display())
                    }
                }
                self.store.remove_if_path(&filename, source);
                self.stats.record_archived();
                report.archived += 1;
            }
            Err(e) => {
                warn!("Failed to move file {}: {}", source.display(), e);
                self.stats.record_archive_failure();
                self.fail(record, &format!("archive failed: {}", e));
            }
        }
    }

    fn fail(&self, record: &ProfileRecord, reason: &str) {
        let filename = record.profile.filename();
        match self
            .store
            .record_failure(
                &filename,
                &record.profile.directory,
                reason,
                &self.settings.retry,
                Instant::now(),
            )
        {
            FailureOutcome::Retry { failures } => {
                debug!("{} failed {} time(s), will retry", filename, failures)
            }
            FailureOutcome::Quarantined { .. } => self.stats.record_quarantined(),
            FailureOutcome::Missing => {}
        }
    }
}
