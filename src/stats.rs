use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Failure and throughput counters shared by every stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    profiled: AtomicU64,
    transfer_stalls: AtomicU64,
    metadata_unreadable: AtomicU64,
    image_jobs: AtomicU64,
    video_jobs: AtomicU64,
    step_rejected: AtomicU64,
    run_failures: AtomicU64,
    archived: AtomicU64,
    archive_failures: AtomicU64,
    quarantined: AtomicU64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub recorded_at: String,
    pub profiled: u64,
    pub transfer_stalls: u64,
    pub metadata_unreadable: u64,
    pub image_jobs: u64,
    pub video_jobs: u64,
    pub step_rejected: u64,
    pub run_failures: u64,
    pub archived: u64,
    pub archive_failures: u64,
    pub quarantined: u64,
}

macro_rules! counters {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl PipelineStats {
            $(
                pub fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counters! {
    record_profiled => profiled,
    record_transfer_stall => transfer_stalls,
    record_metadata_unreadable => metadata_unreadable,
    record_image_job => image_jobs,
    record_video_job => video_jobs,
    record_step_rejected => step_rejected,
    record_run_failure => run_failures,
    record_archived => archived,
    record_archive_failure => archive_failures,
    record_quarantined => quarantined,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            recorded_at: Local::now().to_rfc3339(),
            profiled: load(&self.profiled),
            transfer_stalls: load(&self.transfer_stalls),
            metadata_unreadable: load(&self.metadata_unreadable),
            image_jobs: load(&self.image_jobs),
            video_jobs: load(&self.video_jobs),
            step_rejected: load(&self.step_rejected),
            run_failures: load(&self.run_failures),
            archived: load(&self.archived),
            archive_failures: load(&self.archive_failures),
            quarantined: load(&self.quarantined),
        }
    }
}

impl StatsSnapshot {
    pub fn print(&self) {
        info!(
            "profiled={} image_jobs={} video_jobs={} archived={}",
            self.profiled, self.image_jobs, self.video_jobs, self.archived
        );
        info!(
            "transfer_stalls={} metadata_unreadable={} step_rejected={} run_failures={} archive_failures={} quarantined={}",
            self.transfer_stalls,
            self.metadata_unreadable,
            self.step_rejected,
            self.run_failures,
            self.archive_failures,
            self.quarantined
        );
    }

    /// Append one row, writing the header when the file is new.
    pub fn write_csv(&self, filename: &Path) -> Result<(), csv::Error> {
        let file_exists = fs::metadata(filename).is_ok();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(filename)?;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);
        wtr.serialize(self)?;
        wtr.flush()?;
        Ok(())
    }
}
