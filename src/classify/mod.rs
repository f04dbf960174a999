//! Media classification: path + embedded metadata → [`FileProfile`].

mod exif;
mod probe;

pub use self::exif::read_exif;
pub use self::probe::{flatten_probe_output, FfprobeReader};

use crate::error::Result;
use crate::model::FileProfile;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov"];

/// Producer string FacePlay writes into the videos it exports.
pub const FACEPLAY_SIGNATURE: &str = "深圳市鹏中科技有限公司";

const APPLE_MARKER: &str = "apple";
const PROCESSED_SUFFIX: &str = "-ff";

pub type TrackMetadata = BTreeMap<String, String>;

/// Source of embedded metadata. Either call may fail for corrupt or
/// unsupported files.
pub trait MetadataReader: Send + Sync {
    fn exif(&self, path: &Path) -> Result<Vec<(String, String)>>;
    fn tracks(&self, path: &Path) -> Result<Vec<TrackMetadata>>;
}

/// EXIF via `kamadak-exif`, tracks via `ffprobe`.
#[derive(Debug, Clone, Default)]
pub struct SystemMetadata {
    probe: FfprobeReader,
}

impl SystemMetadata {
    pub fn new(probe: FfprobeReader) -> Self {
        Self { probe }
    }
}

impl MetadataReader for SystemMetadata {
    fn exif(&self, path: &Path) -> Result<Vec<(String, String)>> {
        read_exif(path)
    }

    fn tracks(&self, path: &Path) -> Result<Vec<TrackMetadata>> {
        self.probe.read_tracks(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub profile: FileProfile,
    /// Set when metadata could not be read and defaults were kept.
    pub metadata_error: Option<String>,
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn is_image_path(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&extension_of(path).as_str())
}

pub fn is_video_path(path: &Path) -> bool {
    VIDEO_EXTENSIONS.contains(&extension_of(path).as_str())
}

pub fn is_processed_path(path: &Path) -> bool {
    path.file_stem()
        .map_or(false, |stem| stem.to_string_lossy().ends_with(PROCESSED_SUFFIX))
}

fn is_apple(value: &str) -> bool {
    value.trim_end_matches('\0').to_lowercase() == APPLE_MARKER
}

/// Classify `path` once against its current metadata. Metadata failures
/// are logged and leave the default (dispatchable) flags in place.
pub fn classify(path: &Path, reader: &dyn MetadataReader) -> Classification {
    if !path.exists() {
        warn!("File not found while profiling: {}", path.display());
    }

    let mut profile = FileProfile {
        directory: path.to_path_buf(),
        backup: None,
        processed: is_processed_path(path),
        is_image: is_image_path(path),
        is_video: is_video_path(path),
        is_faceplay: false,
        is_facefusion: true,
    };
    let mut metadata_error = None;

    if profile.is_image {
        match reader.exif(path) {
            Ok(fields) => {
                if fields.iter().any(|(_, value)| is_apple(value)) {
                    profile.is_facefusion = false;
                }
            }
            Err(e) => {
                warn!("Failed to extract exif metadata from {}: {}", path.display(), e);
                metadata_error = Some(e.to_string());
            }
        }
    } else if profile.is_video {
        match reader.tracks(path) {
            Ok(tracks) => apply_track_markers(&mut profile, &tracks),
            Err(e) => {
                warn!("Failed to extract track metadata from {}: {}", path.display(), e);
                metadata_error = Some(e.to_string());
            }
        }
    }

    debug!("Finished profiling file: {}", path.display());
    Classification {
        profile,
        metadata_error,
    }
}

/// Tracks are scanned in order; in each track the FacePlay signature is
/// checked before the apple marker, and the first hit ends the scan.
fn apply_track_markers(profile: &mut FileProfile, tracks: &[TrackMetadata]) {
    for track in tracks {
        if track.values().any(|v| v.contains(FACEPLAY_SIGNATURE)) {
            profile.is_faceplay = true;
            profile.is_facefusion = false;
            return;
        }
        if track.values().any(|v| is_apple(v)) {
            profile.is_facefusion = false;
            return;
        }
    }
}
