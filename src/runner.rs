//! Process launching, termination and liveness checks.
//!
//! `ProcessControl` is the seam between the lifecycle controller and the OS.
//! `SystemProcessControl` starts projects detached from the launcher (their own
//! session on unix, their own process group without a console on Windows) so
//! they outlive the CLI invocation or dashboard request that started them.

use std::io;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info};

use crate::error::{DevEnvError, Result};
use crate::process::ProcessSpec;

/// Platform capability used by the lifecycle controller.
pub trait ProcessControl: Send + Sync {
    /// Starts the process detached and returns its pid.
    fn launch(&self, spec: &ProcessSpec) -> Result<u32>;
    /// Terminates the process (tree) identified by `pid`.
    ///
    /// On unix the group gets SIGTERM and, if anything in it is still alive
    /// after a grace period, SIGKILL. Returns `ProcessNotFound` when nothing
    /// is running under that pid.
    fn terminate(&self, pid: u32) -> Result<()>;
    fn is_alive(&self, pid: u32) -> bool;
}

/// `ProcessControl` backed by the host operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
    fn launch(&self, spec: &ProcessSpec) -> Result<u32> {
        let mut command = Command::new(&spec.cmd);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        os::detach(&mut command);

        let mut child = command.spawn().map_err(|source| DevEnvError::LaunchFailed {
            command: spec.display_command(),
            source,
        })?;
        let pid = child.id();
        info!(project = %spec.name, pid, cwd = %spec.cwd.display(), "launched process");

        // Reap the child if it exits while we are still alive (the dashboard is
        // long-lived); otherwise the zombie keeps answering liveness probes.
        let name = spec.name.clone();
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!(project = %name, pid, code = ?status.code(), "process exited"),
            Err(err) => debug!(project = %name, pid, error = %err, "failed to wait for process"),
        });
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        os::terminate(pid)?;
        info!(pid, "terminated process");
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        os::is_alive(pid)
    }
}

fn termination_failed(pid: u32, err: io::Error) -> DevEnvError {
    DevEnvError::TerminationFailed {
        pid,
        reason: err.to_string(),
    }
}

#[cfg(unix)]
mod os {
    use std::io;
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::thread;
    use std::time::{Duration, Instant};

    use tracing::warn;

    use super::termination_failed;
    use crate::error::{DevEnvError, Result};

    /// How long a process gets to exit after SIGTERM before it is killed.
    const GRACE_PERIOD: Duration = Duration::from_secs(3);
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn detach(command: &mut Command) {
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    // 0 and 1 would turn `kill(-pid)` into "every process we may signal".
    fn signalable(pid: u32) -> Option<libc::pid_t> {
        libc::pid_t::try_from(pid).ok().filter(|pid| *pid > 1)
    }

    pub fn terminate(pid: u32) -> Result<()> {
        let Some(target) = signalable(pid) else {
            return Err(DevEnvError::TerminationFailed {
                pid,
                reason: "refusing to signal a reserved pid".to_string(),
            });
        };
        send(pid, target, libc::SIGTERM)?;

        let deadline = Instant::now() + GRACE_PERIOD;
        while Instant::now() < deadline {
            if !group_alive(target) && !is_alive(pid) {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        warn!(pid, "process outlived SIGTERM, sending SIGKILL");
        match send(pid, target, libc::SIGKILL) {
            Ok(()) | Err(DevEnvError::ProcessNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    // Launched processes lead their own group, so the group gets the signal
    // too; the pid itself is signalled in case it has left that group.
    fn send(pid: u32, target: libc::pid_t, signal: libc::c_int) -> Result<()> {
        let group = unsafe { libc::kill(-target, signal) } == 0;
        let direct = unsafe { libc::kill(target, signal) } == 0;
        if group || direct {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(DevEnvError::ProcessNotFound(pid));
        }
        Err(termination_failed(pid, err))
    }

    fn group_alive(target: libc::pid_t) -> bool {
        if unsafe { libc::kill(-target, 0) } == 0 {
            return true;
        }
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    pub fn is_alive(pid: u32) -> bool {
        let Some(target) = signalable(pid) else {
            return false;
        };
        if unsafe { libc::kill(target, 0) } == 0 {
            return true;
        }
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(windows)]
mod os {
    use std::os::windows::process::CommandExt;
    use std::process::Command;

    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    use super::termination_failed;
    use crate::error::{DevEnvError, Result};

    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    // taskkill exits with 128 when no process matches the pid.
    const TASKKILL_NOT_FOUND: i32 = 128;

    pub fn detach(command: &mut Command) {
        command.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
    }

    pub fn terminate(pid: u32) -> Result<()> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .map_err(|err| termination_failed(pid, err))?;
        if output.status.success() {
            return Ok(());
        }
        if output.status.code() == Some(TASKKILL_NOT_FOUND) || !is_alive(pid) {
            return Err(DevEnvError::ProcessNotFound(pid));
        }
        Err(DevEnvError::TerminationFailed {
            pid,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    pub fn is_alive(pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle == 0 {
                return false;
            }
            let mut code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut code);
            CloseHandle(handle);
            ok != 0 && code == STILL_ACTIVE as u32
        }
    }
}


#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    use super::*;

    fn spec(cmd: &str, args: &[&str], cwd: PathBuf) -> ProcessSpec {
        ProcessSpec {
            name: "test".to_string(),
            cmd: cmd.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            cwd,
        }
    }

    fn wait_until_dead(control: &SystemProcessControl, pid: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !control.is_alive(pid) {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn launches_detached_and_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let control = SystemProcessControl;
        let pid = control
            .launch(&spec("sleep", &["30"], dir.path().to_path_buf()))
            .unwrap();
        assert!(pid > 0);
        assert!(control.is_alive(pid));

        // The child leads its own session, hence its own process group.
        let pgid = unsafe { libc::getpgid(pid as libc::pid_t) };
        assert_eq!(pgid, pid as libc::pid_t);

        control.terminate(pid).unwrap();
        assert!(wait_until_dead(&control, pid));
    }

    // A zombie still answers `kill(pid, 0)`; count it as dead once it has
    // exited, whoever ends up reaping it.
    fn exited(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map_or(false, |(_, rest)| rest.trim_start().starts_with('Z')),
            Err(_) => !SystemProcessControl.is_alive(pid),
        }
    }

    fn wait_for_file(path: &std::path::Path) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(contents) = std::fs::read_to_string(path) {
                if contents.ends_with('\n') {
                    return contents;
                }
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("{} was never written", path.display());
    }

    #[test]
    fn kills_a_process_that_ignores_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let control = SystemProcessControl;
        let pid = control
            .launch(&spec(
                "sh",
                &["-c", "trap '' TERM; echo ready > ready; sleep 30"],
                dir.path().to_path_buf(),
            ))
            .unwrap();
        wait_for_file(&dir.path().join("ready"));

        control.terminate(pid).unwrap();
        assert!(wait_until_dead(&control, pid));
    }

    #[test]
    fn terminate_takes_down_the_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let control = SystemProcessControl;
        let pid = control
            .launch(&spec(
                "sh",
                &["-c", "sleep 30 & echo $! > child.pid; wait"],
                dir.path().to_path_buf(),
            ))
            .unwrap();
        let child: u32 = wait_for_file(&dir.path().join("child.pid"))
            .trim()
            .parse()
            .unwrap();
        assert_ne!(child, pid);
        assert_eq!(
            unsafe { libc::getpgid(child as libc::pid_t) },
            pid as libc::pid_t
        );

        control.terminate(pid).unwrap();
        assert!(wait_until_dead(&control, pid));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !exited(child) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(exited(child), "background child {} survived", child);
    }

    #[test]
    fn terminating_a_missing_pid_reports_not_found() {
        let control = SystemProcessControl;
        let pid = i32::MAX as u32;
        assert!(!control.is_alive(pid));
        assert!(matches!(
            control.terminate(pid).unwrap_err(),
            DevEnvError::ProcessNotFound(p) if p == pid
        ));
    }

    #[test]
    fn reserved_pids_are_never_signalled() {
        let control = SystemProcessControl;
        assert!(!control.is_alive(0));
        assert!(matches!(
            control.terminate(1).unwrap_err(),
            DevEnvError::TerminationFailed { pid: 1, .. }
        ));
    }

    #[test]
    fn missing_executable_fails_to_launch() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemProcessControl
            .launch(&spec(
                "dev-env-definitely-not-a-binary",
                &[],
                dir.path().to_path_buf(),
            ))
            .unwrap_err();
        assert!(matches!(err, DevEnvError::LaunchFailed { .. }));
    }

    #[test]
    fn missing_working_directory_fails_to_launch() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemProcessControl
            .launch(&spec("sleep", &["1"], dir.path().join("missing")))
            .unwrap_err();
        assert!(matches!(
            err,
            DevEnvError::LaunchFailed { ref command, .. } if command == "sleep 1"
        ));
    }
}
