//! Agent file hot-reload watcher.
//!
//! Watches the configured agent directories and hands every burst of changed
//! agent files to a callback after a debounce window.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use orkestra_core::{OrkestraError, OrkestraResult};
use orkestra_registry::{is_agent_path, AgentLoader, LoadOutcome};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

/// Keeps the file-system watch alive; dropping it stops watching.
pub struct AgentWatcher {
    _watcher: RecommendedWatcher,
}

impl AgentWatcher {
    /// Start watching `paths` recursively.
    ///
    /// `on_change` runs on a background thread with the set of agent files
    /// created, modified or removed since the last call.
    pub fn start<F>(paths: &[PathBuf], debounce_ms: u64, on_change: F) -> OrkestraResult<Self>
    where
        F: Fn(Vec<PathBuf>) + Send + 'static,
    {
        let (tx, rx) = std_mpsc::channel::<Vec<PathBuf>>();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    let _ = tx.send(event.paths);
                }
            }
        })
        .map_err(|e| OrkestraError::Config(format!("Failed to create file watcher: {e}")))?;

        // Notify reports event paths under the watched path as given, so
        // watch canonical roots to compare against them.
        let mut roots = Vec::new();
        for path in paths {
            if !path.exists() {
                tracing::warn!(path = %path.display(), "Agent path does not exist, not watching");
                continue;
            }
            let root = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
            watcher
                .watch(&root, RecursiveMode::Recursive)
                .map_err(|e| {
                    OrkestraError::Config(format!("Failed to watch {}: {e}", root.display()))
                })?;
            roots.push(root);
        }

        std::thread::spawn(move || {
            let debounce = Duration::from_millis(debounce_ms);

            while let Ok(first) = rx.recv() {
                let mut changed: BTreeSet<PathBuf> = first.into_iter().collect();

                // Collect the rest of the burst so each file is handled once.
                let deadline = Instant::now() + debounce;
                while let Some(left) = deadline.checked_duration_since(Instant::now()) {
                    match rx.recv_timeout(left) {
                        Ok(more) => changed.extend(more),
                        Err(std_mpsc::RecvTimeoutError::Timeout) => break,
                        Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
                    }
                }

                let files: Vec<PathBuf> = changed
                    .into_iter()
                    .filter(|p| is_watched_agent_file(&roots, p))
                    .collect();
                if !files.is_empty() {
                    on_change(files);
                }
            }

            tracing::debug!("Agent watcher thread exiting");
        });

        tracing::info!(paths = ?paths, "Agent hot-reload watcher started");
        Ok(Self { _watcher: watcher })
    }
}

/// Whether `path` is an agent file the loader would discover under one of
/// the watched `roots`.
fn is_watched_agent_file(roots: &[PathBuf], path: &Path) -> bool {
    roots.iter().any(|root| is_agent_path(root, path))
}

/// Apply a batch of changed files to the loader.
///
/// Existing files are loaded or reloaded. A removed file unregisters the
/// agents that were loaded from it. Failures are logged per file.
pub fn apply_changes(loader: &AgentLoader, files: &[PathBuf]) {
    for file in files {
        if file.is_file() {
            match loader.reload_file(file) {
                Ok(LoadOutcome::Loaded(id)) => {
                    tracing::info!(agent_id = %id, path = %file.display(), "Agent file applied");
                }
                Ok(LoadOutcome::Skipped(id)) => {
                    tracing::debug!(agent_id = %id, path = %file.display(), "Agent file unchanged");
                }
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %e, "Failed to reload agent file");
                }
            }
            continue;
        }

        let removed: Vec<String> = loader
            .loaded_ids()
            .into_iter()
            .filter(|id| loader.source_path(id).as_deref() == Some(file.as_path()))
            .collect();
        for id in removed {
            match loader.registry().unregister(&id) {
                Ok(_) => {
                    loader.forget(&id);
                    tracing::info!(agent_id = %id, path = %file.display(), "Agent file removed");
                }
                Err(e) => {
                    tracing::warn!(agent_id = %id, error = %e, "Failed to unregister removed agent");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orkestra_registry::AgentRegistry;
    use std::sync::Arc;

    fn agent_json(id: &str, version: &str) -> String {
        serde_json::json!({
            "metadata": {"id": id, "name": id, "version": version},
            "type": "executor",
            "runtimeKind": "node",
            "capabilities": [{"name": "work"}],
            "security": {}
        })
        .to_string()
    }

    #[test]
    fn test_watched_agent_file_rules() {
        let roots = vec![PathBuf::from("/srv/agents"), PathBuf::from("/opt/extra")];
        assert!(is_watched_agent_file(&roots, Path::new("/srv/agents/a.json")));
        assert!(is_watched_agent_file(&roots, Path::new("/opt/extra/nested/a.yml")));
        assert!(!is_watched_agent_file(&roots, Path::new("/srv/agents/.a.json")));
        assert!(!is_watched_agent_file(&roots, Path::new("/srv/agents/a.test.json")));
        assert!(!is_watched_agent_file(&roots, Path::new("/srv/agents/readme.md")));
        assert!(!is_watched_agent_file(&roots, Path::new("/srv/agents/fixtures/x.json")));
        assert!(!is_watched_agent_file(&roots, Path::new("/srv/agents/.wip/a.json")));
        assert!(!is_watched_agent_file(&roots, Path::new("/tmp/a.json")));
    }

    #[test]
    fn test_apply_changes_reloads_and_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.json");
        std::fs::write(&file, agent_json("a", "1.0.0")).unwrap();

        let loader = AgentLoader::new(Arc::new(AgentRegistry::in_memory()));
        loader.load_all(&[tmp.path().to_path_buf()]);
        assert_eq!(loader.loaded_ids(), vec!["a"]);

        std::fs::write(&file, agent_json("a", "2.0.0")).unwrap();
        apply_changes(&loader, &[file.clone()]);
        let instance = loader.registry().get("a").unwrap();
        assert_eq!(instance.definition.metadata.version, "2.0.0");

        let added = tmp.path().join("b.json");
        std::fs::write(&added, agent_json("b", "1.0.0")).unwrap();
        apply_changes(&loader, &[added]);
        assert!(loader.registry().contains("b"));

        std::fs::remove_file(&file).unwrap();
        apply_changes(&loader, &[file]);
        assert!(!loader.registry().contains("a"));
        assert_eq!(loader.loaded_ids(), vec!["b"]);
    }

    #[test]
    fn test_watcher_reports_changed_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, rx) = std_mpsc::channel();
        let _watcher = AgentWatcher::start(&[tmp.path().to_path_buf()], 50, move |files| {
            let _ = tx.send(files);
        })
        .unwrap();

        std::fs::create_dir_all(tmp.path().join("fixtures")).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(tmp.path().join("fixtures/x.json"), agent_json("x", "1.0.0")).unwrap();
        std::fs::write(tmp.path().join("a.json"), agent_json("a", "1.0.0")).unwrap();

        let mut seen = Vec::new();
        while let Ok(files) = rx.recv_timeout(Duration::from_secs(2)) {
            seen.extend(files);
        }
        assert!(seen.iter().any(|f| f.ends_with("a.json")));
        assert!(seen.iter().all(|f| f.file_name().unwrap() == "a.json"));
    }

    #[test]
    fn test_fixture_edits_never_register() {
        let tmp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        let fixture = root.join("fixtures/x.json");
        std::fs::create_dir_all(fixture.parent().unwrap()).unwrap();
        std::fs::write(&fixture, agent_json("x", "1.0.0")).unwrap();

        let loader = AgentLoader::new(Arc::new(AgentRegistry::in_memory()));
        assert_eq!(loader.load_all(&[root.clone()]), 0);

        let changed: Vec<PathBuf> = [fixture]
            .into_iter()
            .filter(|p| is_watched_agent_file(&[root.clone()], p))
            .collect();
        apply_changes(&loader, &changed);
        assert!(!loader.registry().contains("x"));
    }
}
