use crate::config::RetryPolicy;
use crate::model::{FileProfile, ProfileRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error};

/// Outcome of recording a dispatch failure against an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    Retry { failures: u32 },
    Quarantined { failures: u32 },
    Missing,
}

/// Filename → profile record, shared by intake and dispatch.
#[derive(Debug, Default)]
pub struct DirectoryProfile {
    entries: DashMap<String, ProfileRecord>,
}

impl DirectoryProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by filename. Dispatch state survives when the
    /// incoming profile is identical to the stored one.
    pub fn merge(&self, profile: FileProfile) {
        let key = profile.filename();
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().profile != profile {
                    debug!("Replacing profile for {}", entry.key());
                    entry.insert(ProfileRecord::new(profile));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(ProfileRecord::new(profile));
            }
        }
    }

    pub fn get(&self, filename: &str) -> Option<ProfileRecord> {
        self.entries.get(filename).map(|r| r.value().clone())
    }

    /// True when `path` is already tracked under its filename.
    pub fn contains_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| self.entries.get(&*name.to_string_lossy()))
            .map_or(false, |r| r.profile.directory == path)
    }

    pub fn remove(&self, filename: &str) -> Option<ProfileRecord> {
        self.entries.remove(filename).map(|(_, record)| record)
    }

    /// Remove the entry only while it still describes `path`; a newer file
    /// with the same name stays.
    pub fn remove_if_path(&self, filename: &str, path: &Path) -> bool {
        self.entries
            .remove_if(filename, |_, record| record.profile.directory == path)
            .is_some()
    }

    /// Clone out every record matching `predicate`. No shard lock is held
    /// once this returns.
    pub fn snapshot_matching<F>(&self, predicate: F) -> Vec<ProfileRecord>
    where
        F: Fn(&ProfileRecord) -> bool,
    {
        self.entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Charge a failure to the entry for `path`. An entry that now points at
    /// a different file with the same name is left untouched.
    pub fn record_failure(
        &self,
        filename: &str,
        path: &Path,
        reason: &str,
        policy: &RetryPolicy,
        now: Instant,
    ) -> FailureOutcome {
        let Some(mut record) = self.entries.get_mut(filename) else {
            return FailureOutcome::Missing;
        };
        if record.profile.directory != path {
            debug!("{} was replaced, not charging failure", filename);
            return FailureOutcome::Missing;
        }
        let state = &mut record.state;
        state.failures += 1;
        state.last_error = Some(reason.to_string());

        if policy.exhausted(state.failures) {
            state.quarantined = true;
            state.next_attempt = None;
            error!(
                "Quarantined {} after {} failures: {}",
                filename, state.failures, reason
            );
            FailureOutcome::Quarantined {
                failures: state.failures,
            }
        } else {
            state.next_attempt = Some(now + policy.backoff(state.failures));
            FailureOutcome::Retry {
                failures: state.failures,
            }
        }
    }

    /// Returns false when the entry is gone or now describes another file.
    pub fn mark_archive_pending(&self, filename: &str, path: &Path) -> bool {
        match self.entries.get_mut(filename) {
            Some(mut record) if record.profile.directory == path => {
                record.state.archive_pending = true;
                true
            }
            _ => false,
        }
    }

    pub fn quarantined(&self) -> Vec<ProfileRecord> {
        self.snapshot_matching(|r| r.state.quarantined)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
