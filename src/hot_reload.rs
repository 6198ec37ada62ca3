// Shader hot reload
//
// Watches the shader directory and remembers which SPIR-V files changed.
// The renderer polls `take_changes` once per frame; rebuilding happens on the
// render thread, the watcher thread only records paths.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ShaderWatcher {
    changed: Arc<Mutex<BTreeSet<PathBuf>>>,
    // Stops watching when dropped
    _watcher: RecommendedWatcher,
}

impl ShaderWatcher {
    pub fn new(shader_dir: &Path) -> Result<Self> {
        let changed = Arc::new(Mutex::new(BTreeSet::new()));
        let sink = changed.clone();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => record_event(&sink, &event),
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(shader_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", shader_dir))?;

        log::info!("Watching {:?} for shader changes", shader_dir);

        Ok(Self {
            changed,
            _watcher: watcher,
        })
    }

    /// SPIR-V files modified since the last call
    pub fn take_changes(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.changed.lock()).into_iter().collect()
    }
}

fn record_event(changed: &Mutex<BTreeSet<PathBuf>>, event: &Event) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }

    let mut changed = changed.lock();
    for path in event.paths.iter().filter(|path| is_spirv(path)) {
        log::debug!("Shader changed: {:?}", path);
        changed.insert(path.clone());
    }
}

fn is_spirv(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "spv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_only_spirv_changes_recorded() {
        let changed = Mutex::new(BTreeSet::new());
        record_event(&changed, &event(EventKind::Modify(ModifyKind::Any), "shaders/toy.frag.spv"));
        record_event(&changed, &event(EventKind::Modify(ModifyKind::Any), "shaders/toy.frag"));
        record_event(&changed, &event(EventKind::Create(CreateKind::File), "shaders/texture.frag.spv"));

        let changed = changed.into_inner();
        assert_eq!(changed.len(), 2);
        assert!(changed.contains(Path::new("shaders/toy.frag.spv")));
    }

    #[test]
    fn test_removals_ignored() {
        let changed = Mutex::new(BTreeSet::new());
        record_event(&changed, &event(EventKind::Remove(RemoveKind::File), "shaders/toy.frag.spv"));
        assert!(changed.lock().is_empty());
    }

    #[test]
    fn test_duplicate_changes_collapse() {
        let changed = Mutex::new(BTreeSet::new());
        for _ in 0..3 {
            record_event(&changed, &event(EventKind::Modify(ModifyKind::Any), "shaders/toy.vert.spv"));
        }
        assert_eq!(changed.lock().len(), 1);
    }
}
