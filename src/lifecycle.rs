//! Project lifecycle: register, start, stop and status listing.
//!
//! `LifecycleController` is the only place that combines the registry, the
//! run-state table and the process runner. Both the CLI and the dashboard API
//! call into it.
//!
//! `start` checks the run-state table and then writes it without holding any
//! lock across processes. Two concurrent starts of the same project can both
//! launch, and the later record overwrites the earlier one, leaving an
//! untracked process behind.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{DevEnvError, Result};
use crate::process::{ProcessSpec, Project, ProjectStatus};
use crate::runner::ProcessControl;
use crate::store::{ProjectStore, RunStateStore, StateBackend};

/// Input for `LifecycleController::register`.
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub name: String,
    /// Value of `--cmd`, if given.
    pub cmd: Option<String>,
    /// Trailing positional words, appended to `cmd`.
    pub args: Vec<String>,
    /// Working directory; defaults to the caller's current directory.
    pub path: Option<PathBuf>,
}

/// Result of a successful `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    pub pid: u32,
    /// The process had already gone away before we signalled it.
    pub already_exited: bool,
}

pub struct LifecycleController {
    backend: Arc<dyn StateBackend>,
    projects: ProjectStore,
    runs: RunStateStore,
    control: Arc<dyn ProcessControl>,
    check_liveness: bool,
}

impl LifecycleController {
    pub fn new(backend: Arc<dyn StateBackend>, control: Arc<dyn ProcessControl>) -> Self {
        Self {
            projects: ProjectStore::new(backend.clone()),
            runs: RunStateStore::new(backend.clone()),
            backend,
            control,
            check_liveness: true,
        }
    }

    /// When disabled, a recorded pid is trusted without probing the OS.
    pub fn with_liveness_check(mut self, enabled: bool) -> Self {
        self.check_liveness = enabled;
        self
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.backend.is_initialized() {
            Ok(())
        } else {
            Err(DevEnvError::NotInitialized)
        }
    }

    /// Creates the installation root with an empty registry and run-state table.
    pub fn init(&self) -> Result<()> {
        self.backend.initialize()?;
        info!(root = %self.backend.location(), "initialized installation root");
        Ok(())
    }

    pub fn register(&self, request: RegisterRequest) -> Result<Project> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(DevEnvError::MissingName);
        }
        let cmd = assemble_command(request.cmd.as_deref(), &request.args);
        if cmd.is_empty() {
            return Err(DevEnvError::MissingCommand);
        }
        let path = resolve_path(request.path.as_deref())?;
        let project = Project {
            name: name.to_string(),
            cmd,
            path: path.display().to_string(),
        };
        self.projects.register(project.clone())?;
        info!(project = %project.name, path = %project.path, "registered project");
        Ok(project)
    }

    /// Launches the project and records its pid.
    pub fn start(&self, name: &str) -> Result<u32> {
        let project = self.projects.find(name)?;
        if let Some(pid) = self.runs.get(name)? {
            if !self.check_liveness || self.control.is_alive(pid) {
                return Err(DevEnvError::AlreadyRunning(name.to_string()));
            }
            warn!(project = %name, pid, "recorded process is gone, replacing stale record");
        }
        let spec = ProcessSpec::from_project(&project)?;
        let pid = self.control.launch(&spec)?;
        self.runs.set(name, pid)?;
        info!(project = %name, pid, command = %spec.display_command(), "started project");
        Ok(pid)
    }

    /// Terminates the recorded process and forgets it.
    pub fn stop(&self, name: &str) -> Result<StopOutcome> {
        let pid = self
            .runs
            .get(name)?
            .ok_or_else(|| DevEnvError::NotRunning(name.to_string()))?;
        let already_exited = match self.control.terminate(pid) {
            Ok(()) => false,
            Err(DevEnvError::ProcessNotFound(_)) => {
                info!(project = %name, pid, "process already exited");
                true
            }
            Err(err) => return Err(err),
        };
        self.runs.remove(name)?;
        info!(project = %name, pid, "stopped project");
        Ok(StopOutcome {
            pid,
            already_exited,
        })
    }

    /// Status of every project, or of the single project named by `filter`.
    ///
    /// Run records for projects missing from the registry are ignored.
    pub fn list_status(&self, filter: Option<&str>) -> Result<Vec<ProjectStatus>> {
        let projects = self.projects.list()?;
        let runs = self.runs.all()?;
        let statuses: Vec<ProjectStatus> = projects
            .into_iter()
            .filter(|project| filter.map_or(true, |name| project.name == name))
            .map(|project| {
                let pid = runs
                    .get(&project.name)
                    .copied()
                    .filter(|pid| !self.check_liveness || self.control.is_alive(*pid));
                ProjectStatus {
                    running: pid.is_some(),
                    pid,
                    name: project.name,
                    cmd: project.cmd,
                    path: project.path,
                }
            })
            .collect();
        if let Some(name) = filter {
            if statuses.is_empty() {
                return Err(DevEnvError::NotFound(name.to_string()));
            }
        }
        Ok(statuses)
    }
}

/// Joins `--cmd` and trailing words with single spaces.
pub fn assemble_command(cmd: Option<&str>, args: &[String]) -> String {
    let joined = args.join(" ");
    match cmd.map(str::trim).filter(|cmd| !cmd.is_empty()) {
        Some(cmd) => format!("{} {}", cmd, joined).trim().to_string(),
        None => joined.trim().to_string(),
    }
}

fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
    let absolute = match path {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        other => {
            let cwd = std::env::current_dir()
                .map_err(|err| DevEnvError::io("failed to read current directory", err))?;
            match other {
                Some(relative) => cwd.join(relative),
                None => cwd,
            }
        }
    };
    Ok(normalize_path(&absolute))
}

/// Lexically cleans a path: drops `.`, folds `..` into its parent and loses
/// trailing separators. Symlinks are left alone.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = normalized.components().next_back();
                if matches!(last, Some(Component::Normal(_))) {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
