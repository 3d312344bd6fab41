//! Data structures for registered projects and their run state.
//!
//! This module defines the persisted registry entry (`Project`), the launch
//! specification derived from it (`ProcessSpec`), and the status view reported
//! by listings and the dashboard API (`ProjectStatus`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DevEnvError, Result};

/// A registered project, exactly as stored in `projects.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique, user-chosen name.
    pub name: String,
    /// Shell-style command line, split on whitespace at launch.
    pub cmd: String,
    /// Working directory the command runs in.
    pub path: String,
}

/// Specification for a process to be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Name of the project this process belongs to.
    pub name: String,
    /// The command executable.
    pub cmd: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
}

impl ProcessSpec {
    /// Builds a launch spec by splitting the project's command on whitespace.
    ///
    /// There is no quoting or escaping support: `echo "a b"` yields the
    /// arguments `"a` and `b"`.
    pub fn from_project(project: &Project) -> Result<Self> {
        let mut parts = tokenize_command(&project.cmd);
        if parts.is_empty() {
            return Err(DevEnvError::EmptyCommand);
        }
        let cmd = parts.remove(0);
        Ok(Self {
            name: project.name.clone(),
            cmd,
            args: parts,
            cwd: PathBuf::from(&project.path),
        })
    }

    /// The command line as it will be executed, for logs and error messages.
    pub fn display_command(&self) -> String {
        let mut line = self.cmd.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

pub fn tokenize_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Lifecycle state of a registered project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    Stopped,
    Running,
}

/// A project together with whether it is currently believed to be running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectStatus {
    pub name: String,
    pub cmd: String,
    pub path: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl ProjectStatus {
    pub fn state(&self) -> ProjectState {
        if self.running {
            ProjectState::Running
        } else {
            ProjectState::Stopped
        }
    }

    /// The `[RUNNING]` / `[STOPPED]` prefix used by `list`.
    pub fn label(&self) -> &'static str {
        match self.state() {
            ProjectState::Running => "[RUNNING]",
            ProjectState::Stopped => "[STOPPED]",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(cmd: &str) -> Project {
        Project {
            name: "web".to_string(),
            cmd: cmd.to_string(),
            path: "/srv/web".to_string(),
        }
    }

    #[test]
    fn splits_command_on_whitespace() {
        let spec = ProcessSpec::from_project(&project("npm run dev")).unwrap();
        assert_eq!(spec.cmd, "npm");
        assert_eq!(spec.args, vec!["run", "dev"]);
        assert_eq!(spec.cwd, PathBuf::from("/srv/web"));
        assert_eq!(spec.display_command(), "npm run dev");
    }

    #[test]
    fn collapses_repeated_whitespace_and_ignores_quotes() {
        assert_eq!(
            tokenize_command("  node\tserver.js   \"a b\" "),
            vec!["node", "server.js", "\"a", "b\""]
        );
    }

    #[test]
    fn blank_command_is_rejected() {
        let err = ProcessSpec::from_project(&project("   ")).unwrap_err();
        assert!(matches!(err, DevEnvError::EmptyCommand));
    }

    #[test]
    fn status_label_follows_running_flag() {
        let mut status = ProjectStatus {
            name: "api".to_string(),
            cmd: "node server.js".to_string(),
            path: "/srv/api".to_string(),
            running: true,
            pid: Some(42),
        };
        assert_eq!(status.label(), "[RUNNING]");
        status.running = false;
        assert_eq!(status.state(), ProjectState::Stopped);
        assert_eq!(status.label(), "[STOPPED]");
    }

    #[test]
    fn status_serializes_without_missing_pid() {
        let status = ProjectStatus {
            name: "api".to_string(),
            cmd: "node server.js".to_string(),
            path: "/srv/api".to_string(),
            running: false,
            pid: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "name": "api",
                "cmd": "node server.js",
                "path": "/srv/api",
                "running": false
            })
        );
    }
}
