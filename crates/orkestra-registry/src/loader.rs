use crate::registry::AgentRegistry;
use orkestra_core::{AgentDefinition, OrkestraError, OrkestraResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Top-level sections every agent file must contain.
pub const REQUIRED_SECTIONS: [&str; 5] =
    ["metadata", "type", "runtimeKind", "capabilities", "security"];

/// Directory names never descended into.
const SKIPPED_DIRS: [&str; 2] = ["fixtures", "__fixtures__"];

/// Structured-data formats an agent file may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DefinitionFormat {
    Json,
    Yaml,
    Toml,
}

impl DefinitionFormat {
    /// Format for a path, by extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Some(DefinitionFormat::Json),
            Some("yaml" | "yml") => Some(DefinitionFormat::Yaml),
            Some("toml") => Some(DefinitionFormat::Toml),
            _ => None,
        }
    }

    fn parse(self, raw: &str) -> Result<serde_json::Value, String> {
        match self {
            DefinitionFormat::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
            DefinitionFormat::Yaml => serde_yaml_ng::from_str(raw).map_err(|e| e.to_string()),
            DefinitionFormat::Toml => toml::from_str(raw).map_err(|e| e.to_string()),
        }
    }
}

/// What [`AgentLoader::load_one`] did with a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The agent was registered.
    Loaded(String),
    /// The agent id was already loaded by this loader, or already present in
    /// the registry (now tracked against this file); nothing was registered.
    Skipped(String),
}

/// Discovers agent definition files and registers them.
pub struct AgentLoader {
    registry: Arc<AgentRegistry>,
    paths: Mutex<Vec<PathBuf>>,
    /// Agent id -> file it was loaded from.
    loaded: Mutex<HashMap<String, PathBuf>>,
}

impl AgentLoader {
    /// A loader registering into `registry`.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            paths: Mutex::new(Vec::new()),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// The registry agents are loaded into.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Paths remembered from previous [`load_all`](Self::load_all) calls.
    pub fn configured_paths(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }

    /// Walk every path recursively and load each agent file found.
    ///
    /// Per-file and per-directory failures are logged and skipped. Returns
    /// the number of agents registered.
    pub fn load_all(&self, paths: &[PathBuf]) -> usize {
        {
            let mut configured = self.paths.lock();
            for p in paths {
                if !configured.contains(p) {
                    configured.push(p.clone());
                }
            }
        }

        let mut loaded = 0;
        for file in discover(paths) {
            match self.load_one(&file) {
                Ok(LoadOutcome::Loaded(id)) => {
                    info!(agent_id = %id, path = %file.display(), "Loaded agent");
                    loaded += 1;
                }
                Ok(LoadOutcome::Skipped(_)) => {}
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Failed to load agent, skipping");
                }
            }
        }

        info!(total = loaded, "Agents loaded");
        loaded
    }

    /// Parse a single agent file and register it.
    pub fn load_one(&self, path: &Path) -> OrkestraResult<LoadOutcome> {
        let definition = read_definition(path)?;
        let id = definition.id().to_string();

        if self.loaded.lock().contains_key(&id) {
            warn!(agent_id = %id, path = %path.display(), "Agent already loaded, skipping");
            return Ok(LoadOutcome::Skipped(id));
        }

        // Restored from a snapshot: keep the live instance, adopt the file.
        if self.registry.contains(&id) {
            info!(agent_id = %id, path = %path.display(), "Agent already registered, tracking its file");
            self.loaded.lock().insert(id.clone(), path.to_path_buf());
            return Ok(LoadOutcome::Skipped(id));
        }

        self.registry.register(definition)?;
        self.loaded.lock().insert(id.clone(), path.to_path_buf());
        Ok(LoadOutcome::Loaded(id))
    }

    /// Replace a loaded agent with the current contents of its file.
    ///
    /// Re-scans the configured paths for a file whose `metadata.id` matches.
    /// The new definition is parsed and validated before the old instance is
    /// removed; a busy agent cannot be reloaded.
    pub fn reload(&self, agent_id: &str) -> OrkestraResult<()> {
        let (path, definition) = discover(&self.configured_paths())
            .into_iter()
            .find_map(|file| match read_definition(&file) {
                Ok(def) if def.id() == agent_id => Some((file, def)),
                _ => None,
            })
            .ok_or_else(|| {
                OrkestraError::NotFound(format!("no agent file defines id '{agent_id}'"))
            })?;
        self.replace(path, definition)
    }

    /// Load or reload whatever agent `path` defines. Used by file watchers.
    pub fn reload_file(&self, path: &Path) -> OrkestraResult<LoadOutcome> {
        let definition = read_definition(path)?;
        let id = definition.id().to_string();
        if self.registry.contains(&id) {
            self.replace(path.to_path_buf(), definition)?;
            Ok(LoadOutcome::Loaded(id))
        } else {
            self.loaded.lock().remove(&id);
            self.load_one(path)
        }
    }

    fn replace(&self, path: PathBuf, definition: AgentDefinition) -> OrkestraResult<()> {
        definition.validate()?;
        let id = definition.id().to_string();

        match self.registry.unregister(&id) {
            Ok(_) | Err(OrkestraError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.loaded.lock().remove(&id);

        self.registry.register(definition)?;
        info!(agent_id = %id, path = %path.display(), "Reloaded agent");
        self.loaded.lock().insert(id, path);
        Ok(())
    }

    /// Ids loaded by this loader.
    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loaded.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// File an agent was loaded from.
    pub fn source_path(&self, agent_id: &str) -> Option<PathBuf> {
        self.loaded.lock().get(agent_id).cloned()
    }

    /// Stop tracking an id, so a later scan loads it again.
    pub fn forget(&self, agent_id: &str) -> bool {
        self.loaded.lock().remove(agent_id).is_some()
    }
}

/// Read, parse and structurally check an agent file.
///
/// A missing top-level section is a [`OrkestraError::Load`]; type errors in
/// present sections surface as [`OrkestraError::Registration`].
pub fn read_definition(path: &Path) -> OrkestraResult<AgentDefinition> {
    let format = DefinitionFormat::from_path(path).ok_or_else(|| {
        OrkestraError::Load(format!("unsupported agent file type: {}", path.display()))
    })?;
    let raw = std::fs::read_to_string(path).map_err(|e| {
        OrkestraError::Load(format!("Failed to read agent file {}: {e}", path.display()))
    })?;
    let value = format.parse(&raw).map_err(|e| {
        OrkestraError::Load(format!("Failed to parse agent file {}: {e}", path.display()))
    })?;

    let serde_json::Value::Object(map) = &value else {
        return Err(OrkestraError::Load(format!(
            "agent file {} must contain a single object",
            path.display()
        )));
    };
    let missing: Vec<&str> = REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|s| !map.contains_key(*s))
        .collect();
    if !missing.is_empty() {
        return Err(OrkestraError::Load(format!(
            "agent file {} is missing required section(s): {}",
            path.display(),
            missing.join(", ")
        )));
    }

    AgentDefinition::from_value(value)
}

/// Agent files under `paths`, sorted, skipping dotfiles and test fixtures.
pub fn discover(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            if is_candidate(path) {
                files.push(path.clone());
            }
        } else {
            walk(path, &mut files);
        }
    }
    files.sort();
    files.dedup();
    files
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read agent directory");
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Failed to read directory entry");
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            if !is_skipped_dir(&name) {
                walk(&path, out);
            }
        } else if is_candidate(&path) {
            out.push(path);
        }
    }
}

/// Whether `path`, found under the scanned `root`, is a file that
/// [`discover`] would pick up.
///
/// Every directory between `root` and the file is checked against the same
/// skip rules the recursive walk applies. Paths outside `root` never match.
pub fn is_agent_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let mut dirs = relative.components().collect::<Vec<_>>();
    dirs.pop();
    let dirs_allowed = dirs.iter().all(|c| match c {
        Component::Normal(name) => !is_skipped_dir(&name.to_string_lossy()),
        _ => false,
    });
    dirs_allowed && is_candidate(path)
}

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.')
        && !name.contains(".test.")
        && !name.contains(".spec.")
        && DefinitionFormat::from_path(path).is_some()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DefinitionFormat::from_path(Path::new("a/b.YML")),
            Some(DefinitionFormat::Yaml)
        );
        assert_eq!(
            DefinitionFormat::from_path(Path::new("a.toml")),
            Some(DefinitionFormat::Toml)
        );
        assert_eq!(DefinitionFormat::from_path(Path::new("a.md")), None);
    }

    #[test]
    fn test_candidate_rules() {
        assert!(is_candidate(Path::new("agents/translator.json")));
        assert!(!is_candidate(Path::new("agents/.hidden.json")));
        assert!(!is_candidate(Path::new("agents/translator.test.json")));
        assert!(!is_candidate(Path::new("agents/translator.spec.yaml")));
        assert!(!is_candidate(Path::new("agents/readme.txt")));
    }

    #[test]
    fn test_agent_path_checks_every_directory() {
        let root = Path::new("/srv/agents");
        assert!(is_agent_path(root, Path::new("/srv/agents/a.json")));
        assert!(is_agent_path(root, Path::new("/srv/agents/team/nlp/a.yaml")));
        assert!(!is_agent_path(root, Path::new("/srv/agents/fixtures/a.json")));
        assert!(!is_agent_path(root, Path::new("/srv/agents/x/__fixtures__/a.json")));
        assert!(!is_agent_path(root, Path::new("/srv/agents/.wip/a.json")));
        assert!(!is_agent_path(root, Path::new("/srv/agents/a.test.json")));
        assert!(!is_agent_path(root, Path::new("/srv/other/a.json")));
        // A root that is itself a file.
        assert!(is_agent_path(Path::new("/srv/a.json"), Path::new("/srv/a.json")));
    }

    #[test]
    fn test_missing_sections_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(
            &path,
            r#"{"metadata": {"id": "x", "name": "X", "version": "1"}, "type": "executor"}"#,
        )
        .unwrap();
        let err = read_definition(&path).unwrap_err();
        assert!(matches!(err, OrkestraError::Load(_)));
        let msg = err.to_string();
        assert!(msg.contains("runtimeKind"));
        assert!(msg.contains("capabilities"));
        assert!(msg.contains("security"));
    }
}
