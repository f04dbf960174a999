use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Classification of one observed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileProfile {
    /// Full path of the file.
    pub directory: PathBuf,
    pub backup: Option<PathBuf>,
    pub processed: bool,
    pub is_image: bool,
    pub is_video: bool,
    pub is_faceplay: bool,
    pub is_facefusion: bool,
}

impl FileProfile {
    /// Store key: the final path component.
    pub fn filename(&self) -> String {
        self.directory
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.directory
    }

    pub fn is_dispatchable_image(&self) -> bool {
        !self.processed && self.is_image && self.is_facefusion
    }

    pub fn is_dispatchable_video(&self) -> bool {
        !self.processed && self.is_video && self.is_facefusion
    }
}

/// Retry bookkeeping for one store entry. Kept apart from the profile so
/// classifier output stays immutable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchState {
    pub failures: u32,
    pub next_attempt: Option<Instant>,
    pub quarantined: bool,
    /// The job already ran; only the move to backup is outstanding.
    pub archive_pending: bool,
    pub last_error: Option<String>,
}

impl DispatchState {
    pub fn is_due(&self, now: Instant) -> bool {
        !self.quarantined && self.next_attempt.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub profile: FileProfile,
    pub state: DispatchState,
}

impl ProfileRecord {
    pub fn new(profile: FileProfile) -> Self {
        Self {
            profile,
            state: DispatchState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Image,
    Video,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Image => write!(f, "image"),
            JobKind::Video => write!(f, "video"),
        }
    }
}
