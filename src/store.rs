//! Persisted project registry and run-state table.
//!
//! Both documents live behind a `StateBackend` so the lifecycle logic can run
//! against the real installation root or an in-memory copy in tests. Every
//! mutation is a fresh read, a merge, and a whole-document replace. There is
//! no cross-process lock: concurrent writers race and the last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Conflict, DevEnvError, Result};
use crate::process::Project;

const REGISTRY_FILE: &str = "projects.json";
const RUN_STATE_FILE: &str = "stats.json";

/// The two documents an installation root holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Registry,
    RunState,
}

impl Document {
    fn file_name(self) -> &'static str {
        match self {
            Document::Registry => REGISTRY_FILE,
            Document::RunState => RUN_STATE_FILE,
        }
    }

    fn empty(self) -> &'static str {
        match self {
            Document::Registry => "[]",
            Document::RunState => "{}",
        }
    }
}

/// Raw storage for the registry and run-state documents.
pub trait StateBackend: Send + Sync {
    /// Human-readable location, used in messages.
    fn location(&self) -> String;
    fn is_initialized(&self) -> bool;
    /// Creates both documents empty. Fails with `AlreadyInitialized` if they exist.
    fn initialize(&self) -> Result<()>;
    /// Reads a document. Fails with `NotInitialized` if it has never been created.
    fn read(&self, doc: Document) -> Result<String>;
    /// Replaces a document as a whole.
    fn write(&self, doc: Document, contents: &str) -> Result<()>;
}

/// Backend storing both documents as JSON files under the installation root.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, doc: Document) -> PathBuf {
        self.root.join(doc.file_name())
    }
}

impl StateBackend for FileBackend {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn is_initialized(&self) -> bool {
        self.path_of(Document::Registry).exists()
    }

    fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Err(DevEnvError::AlreadyInitialized(self.location()));
        }
        fs::create_dir_all(&self.root).map_err(|err| {
            DevEnvError::io(format!("failed to create {}", self.root.display()), err)
        })?;
        self.write(Document::Registry, Document::Registry.empty())?;
        // Run records can outlive a lost registry; their processes may still be up.
        if !self.path_of(Document::RunState).exists() {
            self.write(Document::RunState, Document::RunState.empty())?;
        }
        Ok(())
    }

    fn read(&self, doc: Document) -> Result<String> {
        let path = self.path_of(doc);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(DevEnvError::NotInitialized)
            }
            Err(err) => Err(DevEnvError::io(
                format!("failed to read {}", path.display()),
                err,
            )),
        }
    }

    fn write(&self, doc: Document, contents: &str) -> Result<()> {
        atomic_write_file(&self.path_of(doc), contents.as_bytes())
    }
}

// Component-wise, so trailing separators and `.` segments do not matter.
fn same_path(a: &str, b: &str) -> bool {
    Path::new(a).components().eq(Path::new(b).components())
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// Readers never observe a half-written document; the temp name is unique per
// process and call so concurrent writers do not clobber each other's temp file.
fn atomic_write_file(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let tmp_path = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp_path, data).map_err(|err| {
        DevEnvError::io(
            format!("failed to write temporary file {}", tmp_path.display()),
            err,
        )
    })?;
    fs::rename(&tmp_path, target).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        DevEnvError::io(
            format!(
                "failed to rename {} to {}",
                tmp_path.display(),
                target.display()
            ),
            err,
        )
    })?;
    debug!(path = %target.display(), bytes = data.len(), "wrote state document");
    Ok(())
}

#[cfg(test)]
#[derive(Debug, Default)]
struct MemoryDocuments {
    registry: String,
    run_state: String,
}

/// Backend keeping both documents in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    docs: Mutex<Option<MemoryDocuments>>,
}

#[cfg(test)]
impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that has already been initialized with empty documents.
    pub fn initialized() -> Self {
        let backend = Self::new();
        if let Ok(mut docs) = backend.docs.lock() {
            *docs = Some(MemoryDocuments {
                registry: Document::Registry.empty().to_string(),
                run_state: Document::RunState.empty().to_string(),
            });
        }
        backend
    }

    fn with_docs<T>(&self, f: impl FnOnce(&mut Option<MemoryDocuments>) -> T) -> T {
        let mut guard = match self.docs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[cfg(test)]
impl StateBackend for MemoryBackend {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn is_initialized(&self) -> bool {
        self.with_docs(|docs| docs.is_some())
    }

    fn initialize(&self) -> Result<()> {
        self.with_docs(|docs| {
            if docs.is_some() {
                return Err(DevEnvError::AlreadyInitialized("memory".to_string()));
            }
            *docs = Some(MemoryDocuments {
                registry: Document::Registry.empty().to_string(),
                run_state: Document::RunState.empty().to_string(),
            });
            Ok(())
        })
    }

    fn read(&self, doc: Document) -> Result<String> {
        self.with_docs(|docs| {
            let docs = docs.as_ref().ok_or(DevEnvError::NotInitialized)?;
            Ok(match doc {
                Document::Registry => docs.registry.clone(),
                Document::RunState => docs.run_state.clone(),
            })
        })
    }

    fn write(&self, doc: Document, contents: &str) -> Result<()> {
        self.with_docs(|docs| {
            let docs = docs.as_mut().ok_or(DevEnvError::NotInitialized)?;
            match doc {
                Document::Registry => docs.registry = contents.to_string(),
                Document::RunState => docs.run_state = contents.to_string(),
            }
            Ok(())
        })
    }
}

fn corrupt(doc: Document, source: serde_json::Error) -> DevEnvError {
    DevEnvError::CorruptState {
        document: doc.file_name().to_string(),
        source,
    }
}

/// Ordered registry of projects.
#[derive(Clone)]
pub struct ProjectStore {
    backend: Arc<dyn StateBackend>,
}

impl ProjectStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// All registered projects in insertion order.
    pub fn list(&self) -> Result<Vec<Project>> {
        let raw = self.backend.read(Document::Registry)?;
        serde_json::from_str(&raw).map_err(|err| corrupt(Document::Registry, err))
    }

    pub fn find(&self, name: &str) -> Result<Project> {
        self.list()?
            .into_iter()
            .find(|project| project.name == name)
            .ok_or_else(|| DevEnvError::NotFound(name.to_string()))
    }

    /// Appends a project, rejecting a duplicate name or working directory.
    ///
    /// Creates the installation root on first use.
    pub fn register(&self, project: Project) -> Result<()> {
        if !self.backend.is_initialized() {
            match self.backend.initialize() {
                Ok(()) | Err(DevEnvError::AlreadyInitialized(_)) => {}
                Err(err) => return Err(err),
            }
        }
        let mut projects = self.list()?;
        if let Some(existing) = projects
            .iter()
            .find(|existing| {
                existing.name == project.name || same_path(&existing.path, &project.path)
            })
        {
            let conflict = if existing.name == project.name {
                Conflict::Name(project.name)
            } else {
                Conflict::Path(project.path)
            };
            return Err(DevEnvError::AlreadyExists(conflict));
        }
        projects.push(project);
        self.save(&projects)
    }

    fn save(&self, projects: &[Project]) -> Result<()> {
        let raw = serde_json::to_string_pretty(projects)
            .map_err(|err| corrupt(Document::Registry, err))?;
        self.backend.write(Document::Registry, &raw)
    }
}

/// Mapping of project name to the pid it was launched with.
#[derive(Clone)]
pub struct RunStateStore {
    backend: Arc<dyn StateBackend>,
}

impl RunStateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub fn get(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.all()?.get(name).copied())
    }

    /// The full table. Entries that are not a usable pid are skipped.
    pub fn all(&self) -> Result<BTreeMap<String, u32>> {
        let raw = self.backend.read(Document::RunState)?;
        let parsed: BTreeMap<String, i64> =
            serde_json::from_str(&raw).map_err(|err| corrupt(Document::RunState, err))?;
        Ok(parsed
            .into_iter()
            .filter_map(|(name, pid)| match u32::try_from(pid) {
                Ok(pid) if pid > 0 => Some((name, pid)),
                _ => None,
            })
            .collect())
    }

    pub fn set(&self, name: &str, pid: u32) -> Result<()> {
        let mut table = self.all()?;
        table.insert(name.to_string(), pid);
        self.save(&table)
    }

    /// Deletes the entry for `name`. Absent entries are not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut table = self.all()?;
        if table.remove(name).is_none() {
            return Ok(());
        }
        self.save(&table)
    }

    fn save(&self, table: &BTreeMap<String, u32>) -> Result<()> {
        let raw =
            serde_json::to_string(table).map_err(|err| corrupt(Document::RunState, err))?;
        self.backend.write(Document::RunState, &raw)
    }
}
