use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use ff_automate::config::RetryPolicy;
use ff_automate::dispatch::{
    DispatchEngine, DispatchSettings, Job, JobIdAllocator, JobRunner, JobStep, JobTemplates,
    StepArgs, StepStatus,
};
use ff_automate::error::{Error, Result};
use ff_automate::stats::PipelineStats;
use ff_automate::{DirectoryProfile, FileProfile};

/// In-memory job queue recording what the engine asked of it.
#[derive(Default)]
struct FakeRunner {
    submitted: Vec<StepArgs>,
    runs: usize,
    run_succeeds: bool,
    reject_steps: bool,
}

impl FakeRunner {
    fn succeeding() -> Self {
        Self {
            run_succeeds: true,
            ..Self::default()
        }
    }

    fn targets(&self) -> Vec<String> {
        self.submitted
            .iter()
            .map(|args| args["target_path"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl JobRunner for FakeRunner {
    fn create_job(&mut self, id: &str) -> Result<Job> {
        Ok(Job::new(id))
    }

    fn add_step(&mut self, job: &mut Job, args: StepArgs) -> Result<()> {
        if self.reject_steps {
            return Err(Error::StepRejected {
                job_id: job.id.clone(),
                reason: "queue closed".to_string(),
            });
        }
        job.steps.push(JobStep {
            args,
            status: StepStatus::Drafted,
        });
        Ok(())
    }

    fn submit_job(&mut self, job: &Job) -> Result<()> {
        self.submitted
            .extend(job.steps.iter().map(|step| step.args.clone()));
        Ok(())
    }

    fn run_all(&mut self, _execution_providers: &[String]) -> Result<bool> {
        self.runs += 1;
        Ok(self.run_succeeds)
    }
}

/// Merges a same-named file from another folder while the first job runs,
/// the way a sync of a second year folder would.
struct ReplacingRunner {
    store: Arc<DirectoryProfile>,
    newcomer: Option<FileProfile>,
    targets: Vec<String>,
    run_succeeds: bool,
}

impl JobRunner for ReplacingRunner {
    fn create_job(&mut self, id: &str) -> Result<Job> {
        Ok(Job::new(id))
    }

    fn add_step(&mut self, job: &mut Job, args: StepArgs) -> Result<()> {
        let target = args["target_path"].as_str().unwrap_or_default().to_string();
        self.targets.push(target);
        job.steps.push(JobStep {
            args,
            status: StepStatus::Drafted,
        });
        Ok(())
    }

    fn submit_job(&mut self, _job: &Job) -> Result<()> {
        Ok(())
    }

    fn run_all(&mut self, _execution_providers: &[String]) -> Result<bool> {
        if let Some(profile) = self.newcomer.take() {
            self.store.merge(profile);
        }
        Ok(self.run_succeeds)
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    watch: PathBuf,
    backup: PathBuf,
    store: Arc<DirectoryProfile>,
    stats: Arc<PipelineStats>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempdir().unwrap();
        let watch = tmp.path().join("watch");
        let backup = tmp.path().join("backup");
        fs::create_dir_all(&watch).unwrap();
        Self {
            _tmp: tmp,
            watch,
            backup,
            store: Arc::new(DirectoryProfile::new()),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    /// Write a file into the watch root and merge `profile` for it.
    fn add(&self, name: &str, tweak: impl FnOnce(&mut FileProfile)) -> PathBuf {
        let path = self.watch.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, name.as_bytes()).unwrap();
        let mut profile = FileProfile {
            directory: path.clone(),
            backup: None,
            processed: false,
            is_image: false,
            is_video: false,
            is_faceplay: false,
            is_facefusion: true,
        };
        tweak(&mut profile);
        self.store.merge(profile);
        path
    }

    fn engine<R: JobRunner>(&self, runner: R, retry: RetryPolicy) -> DispatchEngine<R> {
        let settings = DispatchSettings {
            backup_root: self.backup.clone(),
            backup_segments: [0, 0],
            execution_providers: vec!["cpu".to_string()],
            retry,
            interval: Duration::from_millis(10),
        };
        DispatchEngine::new(
            Arc::clone(&self.store),
            runner,
            JobTemplates::default(),
            JobIdAllocator::new("TEST"),
            settings,
            Arc::clone(&self.stats),
        )
    }
}

fn immediate_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base: Duration::ZERO,
        max: Duration::ZERO,
    }
}

fn image(p: &mut FileProfile) {
    p.is_image = true;
}

fn video(p: &mut FileProfile) {
    p.is_video = true;
}

#[test]
fn test_image_is_dispatched_archived_and_removed() {
    let fx = Fixture::new();
    let source = fx.add("IMG_0001.JPG", image);

    let mut engine = fx.engine(FakeRunner::succeeding(), immediate_retry(3));
    let report = engine.tick();

    assert_eq!(report.jobs_succeeded, 1);
    assert_eq!(report.archived, 1);
    assert!(fx.store.is_empty());
    assert!(!source.exists());
    assert!(fx.backup.join("IMG_0001.JPG").exists());

    let args = &engine.runner().submitted[0];
    assert_eq!(args["target_path"], source.to_str().unwrap());
    let output = fx.watch.join("IMG_0001-ff.JPG");
    assert_eq!(args["output_path"], output.to_str().unwrap());
    assert_eq!(fx.stats.snapshot().image_jobs, 1);
}

#[test]
fn test_faceplay_video_archived_without_job() {
    let fx = Fixture::new();
    let source = fx.add("clip.mp4", |p| {
        p.is_video = true;
        p.is_faceplay = true;
        p.is_facefusion = false;
    });

    let mut engine = fx.engine(FakeRunner::succeeding(), immediate_retry(3));
    let report = engine.tick();

    assert_eq!(report.archived, 1);
    assert_eq!(engine.runner().runs, 0);
    assert!(engine.runner().submitted.is_empty());
    assert!(!source.exists());
    assert!(fx.store.is_empty());
}

#[test]
fn test_ineligible_files_stay_in_store() {
    let fx = Fixture::new();
    fx.add("IMG_0002-ff.JPG", |p| {
        p.is_image = true;
        p.processed = true;
    });
    fx.add("IMG_0003.JPG", |p| {
        p.is_image = true;
        p.is_facefusion = false;
    });
    fx.add("notes.txt", |_| {});

    let mut engine = fx.engine(FakeRunner::succeeding(), immediate_retry(3));
    let report = engine.tick();

    assert_eq!(report.archived, 0);
    assert_eq!(engine.runner().runs, 0);
    assert_eq!(fx.store.len(), 3);
}

#[test]
fn test_images_dispatch_before_videos() {
    let fx = Fixture::new();
    let clip = fx.add("a_clip.mov", video);
    let photo = fx.add("z_photo.png", image);

    let mut engine = fx.engine(FakeRunner::succeeding(), immediate_retry(3));
    engine.tick();

    assert_eq!(
        engine.runner().targets(),
        vec![
            photo.to_string_lossy().into_owned(),
            clip.to_string_lossy().into_owned()
        ]
    );
    assert_eq!(fx.stats.snapshot().video_jobs, 1);
}

#[test]
fn test_failed_run_backs_off_then_quarantines() {
    let fx = Fixture::new();
    let source = fx.add("IMG_0004.JPG", image);

    let mut engine = fx.engine(FakeRunner::default(), immediate_retry(2));

    let first = engine.tick();
    assert_eq!(first.jobs_failed, 1);
    let record = fx.store.get("IMG_0004.JPG").unwrap();
    assert_eq!(record.state.failures, 1);
    assert!(!record.state.quarantined);
    assert!(record.state.next_attempt.is_some());

    engine.tick();
    let record = fx.store.get("IMG_0004.JPG").unwrap();
    assert!(record.state.quarantined);

    // Quarantined entries are left alone.
    engine.tick();
    assert_eq!(engine.runner().runs, 2);
    assert!(source.exists());

    let snap = fx.stats.snapshot();
    assert_eq!(snap.run_failures, 2);
    assert_eq!(snap.quarantined, 1);
    assert_eq!(snap.archived, 0);
}

#[test]
fn test_backoff_delays_next_attempt() {
    let fx = Fixture::new();
    fx.add("IMG_0005.JPG", image);

    let retry = RetryPolicy {
        max_attempts: 5,
        base: Duration::from_secs(60),
        max: Duration::from_secs(60),
    };
    let mut engine = fx.engine(FakeRunner::default(), retry);

    engine.tick();
    let report = engine.tick();

    assert_eq!(engine.runner().runs, 1);
    assert_eq!(report.skipped, 1);
}

#[test]
fn test_rejected_step_counts_as_failure() {
    let fx = Fixture::new();
    fx.add("IMG_0006.JPG", image);

    let runner = FakeRunner {
        reject_steps: true,
        run_succeeds: true,
        ..FakeRunner::default()
    };
    let mut engine = fx.engine(runner, immediate_retry(3));
    let report = engine.tick();

    assert_eq!(report.jobs_failed, 1);
    assert_eq!(engine.runner().runs, 0);
    assert_eq!(fx.stats.snapshot().step_rejected, 1);
    assert_eq!(fx.store.get("IMG_0006.JPG").unwrap().state.failures, 1);
}

#[test]
fn test_failed_archive_keeps_entry_and_retries_without_rerun() {
    let fx = Fixture::new();
    let source = fx.add("IMG_0007.JPG", image);

    // A non-empty directory where the backup file should go.
    let blocker = fx.backup.join("IMG_0007.JPG");
    fs::create_dir_all(blocker.join("inner")).unwrap();

    let mut engine = fx.engine(FakeRunner::succeeding(), immediate_retry(5));
    let report = engine.tick();

    assert_eq!(report.jobs_succeeded, 1);
    assert_eq!(report.archived, 0);
    assert!(source.exists());
    let record = fx.store.get("IMG_0007.JPG").unwrap();
    assert!(record.state.archive_pending);
    assert_eq!(record.state.failures, 1);
    assert_eq!(fx.stats.snapshot().archive_failures, 1);

    fs::remove_dir_all(&blocker).unwrap();
    let report = engine.tick();

    assert_eq!(report.archived, 1);
    assert_eq!(engine.runner().runs, 1);
    assert!(fx.store.is_empty());
    assert!(blocker.is_file());
}

#[test]
fn test_already_moved_file_is_dropped() {
    let fx = Fixture::new();
    let source = fx.add("clip.mov", |p| {
        p.is_video = true;
        p.is_faceplay = true;
        p.is_facefusion = false;
    });
    fs::remove_file(&source).unwrap();

    let mut engine = fx.engine(FakeRunner::succeeding(), immediate_retry(3));
    let report = engine.tick();

    assert_eq!(report.archived, 1);
    assert!(fx.store.is_empty());
    assert!(!fx.backup.join("clip.mov").exists());
}

fn same_name_in_two_years(fx: &Fixture) -> (PathBuf, FileProfile) {
    let older = fx.add("2023/IMG_0001.JPG", image);
    let newer = fx.watch.join("2024/IMG_0001.JPG");
    fs::create_dir_all(newer.parent().unwrap()).unwrap();
    fs::write(&newer, b"newer").unwrap();
    let profile = FileProfile {
        directory: newer,
        backup: None,
        processed: false,
        is_image: true,
        is_video: false,
        is_faceplay: false,
        is_facefusion: true,
    };
    (older, profile)
}

#[test]
fn test_replacement_during_run_is_not_archived_unprocessed() {
    let fx = Fixture::new();
    let (older, newcomer) = same_name_in_two_years(&fx);
    let newer = newcomer.directory.clone();

    let runner = ReplacingRunner {
        store: Arc::clone(&fx.store),
        newcomer: Some(newcomer),
        targets: Vec::new(),
        run_succeeds: true,
    };
    let mut engine = fx.engine(runner, immediate_retry(3));

    let report = engine.tick();
    assert_eq!(report.archived, 1);
    assert!(!older.exists());
    assert!(newer.exists());
    let state = fx.store.get("IMG_0001.JPG").unwrap().state;
    assert!(!state.archive_pending);
    assert_eq!(state.failures, 0);

    // The newcomer gets its own job before it is archived.
    engine.tick();
    assert_eq!(
        engine.runner().targets,
        vec![
            older.to_string_lossy().into_owned(),
            newer.to_string_lossy().into_owned()
        ]
    );
    assert!(!newer.exists());
    assert!(fx.store.is_empty());
    assert_eq!(fs::read(fx.backup.join("IMG_0001.JPG")).unwrap(), b"newer");
}

#[test]
fn test_failed_run_not_charged_to_replacement() {
    let fx = Fixture::new();
    let (older, newcomer) = same_name_in_two_years(&fx);

    let runner = ReplacingRunner {
        store: Arc::clone(&fx.store),
        newcomer: Some(newcomer),
        targets: Vec::new(),
        run_succeeds: false,
    };
    let mut engine = fx.engine(runner, immediate_retry(3));

    let report = engine.tick();
    assert_eq!(report.jobs_failed, 1);
    assert!(older.exists());
    let state = fx.store.get("IMG_0001.JPG").unwrap().state;
    assert_eq!(state.failures, 0);
    assert!(state.next_attempt.is_none());
}
