use super::runner::{Job, JobRunner, JobStep, StepArgs, StepStatus};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

const JOB_VERSION: &str = "1";
const JOB_STATES: &[&str] = &["drafted", "queued", "completed", "failed"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobFile {
    version: String,
    date_created: String,
    date_updated: Option<String>,
    steps: Vec<JobStep>,
}

/// FaceFusion's on-disk job store (`<jobs_dir>/<state>/<id>.json`) and its
/// `job-run-all` command.
#[derive(Debug, Clone)]
pub struct FaceFusionRunner {
    jobs_dir: PathBuf,
    runner: RunnerConfig,
}

impl FaceFusionRunner {
    pub fn new(jobs_dir: &Path, runner: RunnerConfig) -> Self {
        Self {
            jobs_dir: jobs_dir.to_path_buf(),
            runner,
        }
    }

    /// Clear any previous jobs and lay out the state directories.
    pub fn init(&self) -> Result<()> {
        if self.jobs_dir.exists() {
            fs::remove_dir_all(&self.jobs_dir)?;
        }
        for state in JOB_STATES {
            fs::create_dir_all(self.jobs_dir.join(state))?;
        }
        info!("Initialized job directory {}", self.jobs_dir.display());
        Ok(())
    }

    fn job_path(&self, state: &str, id: &str) -> PathBuf {
        self.jobs_dir.join(state).join(format!("{}.json", id))
    }

    fn read_job(&self, path: &Path) -> Result<JobFile> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_job(&self, path: &Path, job: &JobFile) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(job)?)?;
        Ok(())
    }

    /// Move every queued job to `failed/`.
    fn fail_queued(&self) -> Result<usize> {
        let failed_dir = self.jobs_dir.join("failed");
        let mut moved = 0;
        for entry in fs::read_dir(self.jobs_dir.join("queued"))? {
            let path = entry?.path();
            let Some(name) = path.file_name() else {
                continue;
            };
            fs::rename(&path, failed_dir.join(name))?;
            moved += 1;
        }
        if moved > 0 {
            warn!("Moved {} queued job(s) to failed", moved);
        }
        Ok(moved)
    }

    fn reject(job: &Job, reason: impl Into<String>) -> Error {
        Error::StepRejected {
            job_id: job.id.clone(),
            reason: reason.into(),
        }
    }
}

impl JobRunner for FaceFusionRunner {
    fn create_job(&mut self, id: &str) -> Result<Job> {
        if JOB_STATES
            .iter()
            .any(|state| self.job_path(state, id).exists())
        {
            return Err(Error::Other(format!("Job {} already exists", id)));
        }

        let file = JobFile {
            version: JOB_VERSION.to_string(),
            date_created: Local::now().to_rfc3339(),
            date_updated: None,
            steps: Vec::new(),
        };
        self.write_job(&self.job_path("drafted", id), &file)?;
        debug!("Created job {}", id);
        Ok(Job::new(id))
    }

    fn add_step(&mut self, job: &mut Job, args: StepArgs) -> Result<()> {
        let path = self.job_path("drafted", &job.id);
        if !path.exists() {
            return Err(Self::reject(job, "job is not drafted"));
        }

        let mut file = self
            .read_job(&path)
            .map_err(|e| Self::reject(job, e.to_string()))?;
        let step = JobStep {
            args,
            status: StepStatus::Drafted,
        };
        file.steps.push(step.clone());
        file.date_updated = Some(Local::now().to_rfc3339());
        self.write_job(&path, &file)
            .map_err(|e| Self::reject(job, e.to_string()))?;

        job.steps.push(step);
        Ok(())
    }

    fn submit_job(&mut self, job: &Job) -> Result<()> {
        let drafted = self.job_path("drafted", &job.id);
        let mut file = self.read_job(&drafted)?;
        if file.steps.is_empty() {
            return Err(Error::Other(format!("Job {} has no steps", job.id)));
        }

        for step in &mut file.steps {
            step.status = StepStatus::Queued;
        }
        file.date_updated = Some(Local::now().to_rfc3339());

        let queued = self.job_path("queued", &job.id);
        self.write_job(&queued, &file)?;
        fs::remove_file(&drafted)?;
        debug!("Submitted job {}", job.id);
        Ok(())
    }

    fn run_all(&mut self, execution_providers: &[String]) -> Result<bool> {
        let mut command = Command::new(&self.runner.program);
        command
            .args(&self.runner.args)
            .arg("--execution-providers")
            .args(execution_providers)
            .current_dir(&self.runner.working_dir);

        info!("Running {:?}", command);
        let status = match command.status() {
            Ok(status) => status,
            Err(e) => {
                // Nothing ran. A retry submits a fresh job, so clear the queue.
                self.fail_queued()?;
                return Err(e.into());
            }
        };
        if !status.success() {
            warn!("{} exited with {}", self.runner.program, status);
        }
        Ok(status.success())
    }
}
