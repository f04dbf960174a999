use super::TrackMetadata;
use crate::error::{Error, Result};
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tracing::trace;

/// Container metadata through the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeReader {
    program: String,
}

impl Default for FfprobeReader {
    fn default() -> Self {
        Self {
            program: "ffprobe".to_string(),
        }
    }
}

impl FfprobeReader {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// One map for the container format, then one per stream in index order.
    pub fn read_tracks(&self, path: &Path) -> Result<Vec<TrackMetadata>> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()?;

        if !output.status.success() {
            return Err(Error::Probe {
                path: path.to_path_buf(),
                reason: format!("{} exited with {}", self.program, output.status),
            });
        }

        let json: Value = serde_json::from_slice(&output.stdout)?;
        let tracks = flatten_probe_output(&json);
        trace!("{} tracks probed from {}", tracks.len(), path.display());
        Ok(tracks)
    }
}

/// Flatten ffprobe JSON into per-track string maps. Nested objects such as
/// `tags` become dotted keys (`tags.encoder`).
pub fn flatten_probe_output(json: &Value) -> Vec<TrackMetadata> {
    let mut tracks = Vec::new();

    if let Some(format) = json.get("format") {
        let mut track = TrackMetadata::new();
        flatten_into(&mut track, "", format);
        tracks.push(track);
    }

    if let Some(streams) = json.get("streams").and_then(Value::as_array) {
        for stream in streams {
            let mut track = TrackMetadata::new();
            flatten_into(&mut track, "", stream);
            tracks.push(track);
        }
    }

    tracks
}

fn flatten_into(track: &mut TrackMetadata, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(track, &key, nested);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(track, &format!("{}.{}", prefix, i), item);
            }
        }
        Value::String(s) => {
            track.insert(prefix.to_string(), s.clone());
        }
        Value::Null => {}
        other => {
            track.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_format_then_streams() {
        let probe = json!({
            "streams": [
                { "index": 0, "codec_type": "video", "tags": { "handler_name": "Core Media Video" } },
                { "index": 1, "codec_type": "audio" }
            ],
            "format": {
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "tags": { "com.apple.quicktime.make": "Apple" }
            }
        });

        let tracks = flatten_probe_output(&probe);
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0]["tags.com.apple.quicktime.make"], "Apple");
        assert_eq!(tracks[1]["codec_type"], "video");
        assert_eq!(tracks[1]["index"], "0");
        assert_eq!(tracks[1]["tags.handler_name"], "Core Media Video");
        assert_eq!(tracks[2]["codec_type"], "audio");
    }

    #[test]
    fn test_flatten_empty_output() {
        assert!(flatten_probe_output(&json!({})).is_empty());
    }

    #[test]
    fn test_missing_program_is_error() {
        let reader = FfprobeReader::with_program("ffprobe-that-does-not-exist");
        assert!(reader.read_tracks(Path::new("clip.mp4")).is_err());
    }
}
