use crate::error::Result;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

pub type StepArgs = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Drafted,
    Queued,
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    pub args: StepArgs,
    pub status: StepStatus,
}

/// A unit of work for the external pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub steps: Vec<JobStep>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
        }
    }
}

/// External job queue and runner.
pub trait JobRunner {
    fn create_job(&mut self, id: &str) -> Result<Job>;

    /// Append a step; an error means the queue refused it.
    fn add_step(&mut self, job: &mut Job, args: StepArgs) -> Result<()>;

    fn submit_job(&mut self, job: &Job) -> Result<()>;

    /// Run every queued job, blocking until done. `Ok(false)` means the run
    /// completed but reported failure.
    fn run_all(&mut self, execution_providers: &[String]) -> Result<bool>;
}

/// `<prefix>-<local timestamp>`, with a sequence suffix when several ids are
/// handed out within the same second.
#[derive(Debug)]
pub struct JobIdAllocator {
    prefix: String,
    sequence: AtomicU64,
}

impl JobIdAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
        if n == 0 {
            format!("{}-{}", self.prefix, stamp)
        } else {
            format!("{}-{}-{}", self.prefix, stamp, n)
        }
    }
}
