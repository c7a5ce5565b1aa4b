use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Small helpers around process liveness and teardown, used by the launcher and
/// reaper. Kept separate from the namespace/clone machinery so both C6 and C7 can
/// share them without depending on each other.
pub struct ProcessUtils;

impl ProcessUtils {
    /// Sends `signal` to `pid`, tolerating "no such process".
    pub fn kill(pid: i32, sig: Signal) -> Result<(), String> {
        if pid < 1 {
            return Ok(());
        }
        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(format!("kill({}, {:?}) failed: {}", pid, sig, e)),
        }
    }

    /// Blocking wait, retried across `EINTR`, tolerating "no such child" as success.
    pub fn wait_blocking(pid: i32) -> Result<Option<i32>, String> {
        loop {
            match waitpid(Pid::from_raw(pid), None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(Some(code)),
                Ok(WaitStatus::Signaled(_, _, _)) => return Ok(None),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => return Ok(None),
                Err(e) => return Err(format!("waitpid({}) failed: {}", pid, e)),
            }
        }
    }

    /// Non-blocking reap used by the launcher's background watcher; returns `None`
    /// while the child is still alive.
    pub fn try_wait(pid: i32) -> Result<Option<i32>, String> {
        match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(WaitStatus::Exited(_, code)) => Ok(Some(code)),
            Ok(WaitStatus::Signaled(_, _, _)) => Ok(Some(-1)),
            Ok(_) => Ok(None),
            Err(Errno::ECHILD) => Ok(Some(0)),
            Err(e) => Err(format!("waitpid({}, WNOHANG) failed: {}", pid, e)),
        }
    }
}
