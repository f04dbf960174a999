use crate::error::Result;
use crate::intake::{IntakeSender, PathFilter, Source};
use notify::event::CreateKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace};

/// Map a sync client's temporary name to the name the file will finally
/// carry: leading dots stripped, everything from the first `~` dropped,
/// then one trailing dot removed.
///
/// `.IMG_0001.JPG.~0001` → `IMG_0001.JPG`
pub fn resolve_final_name(temp_name: &str) -> String {
    let trimmed = temp_name.trim_start_matches('.');
    let base = trimmed.split('~').next().unwrap_or_default();
    base.strip_suffix('.').unwrap_or(base).to_string()
}

pub fn resolve_final_path(temp_path: &Path) -> PathBuf {
    let Some(name) = temp_path.file_name() else {
        return temp_path.to_path_buf();
    };
    let final_name = resolve_final_name(&name.to_string_lossy());
    match temp_path.parent() {
        Some(parent) => parent.join(final_name),
        None => PathBuf::from(final_name),
    }
}

/// Recursive create-event subscription feeding the intake. Dropping it
/// unsubscribes.
pub struct EventWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl EventWatcher {
    pub fn start(root: &Path, intake: IntakeSender, filter: PathFilter) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for final_path in created_files(&event) {
                        if !filter.accepts(&final_path) {
                            trace!("Ignoring {}", final_path.display());
                            continue;
                        }
                        debug!("Create event resolved to {}", final_path.display());
                        if !intake.submit(final_path, Source::Watcher) {
                            error!("Intake closed, dropping create event");
                        }
                    }
                }
                Err(e) => error!("Watch error: {:?}", e),
            },
            Config::default(),
        )?;

        watcher.watch(root, RecursiveMode::Recursive)?;
        info!("Watching path: {}", root.display());

        Ok(Self {
            _watcher: watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        info!("Stopped watching: {}", self.root.display());
    }
}

/// Final paths for every non-directory creation in `event`.
fn created_files(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|path| !path.is_dir())
            .map(|path| resolve_final_path(path))
            .collect(),
        _ => Vec::new(),
    }
}
