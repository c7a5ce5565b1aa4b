use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe, read, write, Pid};
use tokio::io::unix::AsyncFd;

use crate::config::DriverConfig;
use crate::daemon::pty;
use crate::daemon::registry::DomainRegistry;
use crate::error::{DriverError, DriverResult};
use crate::network::NetworkManager;
use crate::utils::console::ConsoleLogger;
use crate::utils::filesystem::FileSystemUtils;
use crate::utils::process::ProcessUtils;

/// Write end of the self-pipe, reachable from the SIGCHLD handler itself. The
/// handler's entire body is the one `write(2)` this requires to stay
/// async-signal-safe; everything else runs later, off-signal, in [`vm_cleanup`].
static NOTIFY_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handle_sigchld(_signum: i32) {
    let fd = NOTIFY_WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let _ = write(fd, &[1u8]);
    }
}

/// SIGCHLD dispatch and cleanup (C7). Registers an async-signal-safe notifier
/// and drives the actual cleanup routine from the driver's normal control
/// thread once woken, per §4.6.
pub struct Reaper {
    read_fd: OwnedFd,
}

impl Reaper {
    /// Opens the self-pipe and installs the SIGCHLD handler. Must be called at
    /// most once per process; a second call would leak the previous write fd.
    pub fn install() -> DriverResult<Self> {
        let (read_raw, write_raw) = pipe().map_err(DriverError::from)?;
        pty::set_nonblocking(read_raw)?;
        pty::set_nonblocking(write_raw)?;

        NOTIFY_WRITE_FD.store(write_raw, Ordering::SeqCst);

        let action = SigAction::new(SigHandler::Handler(handle_sigchld), SaFlags::SA_RESTART, SigSet::empty());
        unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(DriverError::from)?;

        Ok(Self {
            read_fd: unsafe { OwnedFd::from_raw_fd(read_raw) },
        })
    }

    /// Runs forever on the driver's executor, waking whenever the self-pipe
    /// becomes readable and draining every exited child via `waitpid(-1, ...)`
    /// before going back to sleep.
    pub async fn run(self, registry: Arc<DomainRegistry>, network: Arc<NetworkManager>, config: Arc<DriverConfig>) {
        let async_fd = match AsyncFd::new(self.read_fd) {
            Ok(f) => f,
            Err(e) => {
                ConsoleLogger::error(&format!("Reaper could not register self-pipe with the executor: {}", e));
                return;
            }
        };

        loop {
            let mut guard = match async_fd.readable().await {
                Ok(g) => g,
                Err(e) => {
                    ConsoleLogger::error(&format!("Reaper self-pipe wait failed: {}", e));
                    return;
                }
            };

            let mut drain = [0u8; 64];
            match read(async_fd.get_ref().as_raw_fd(), &mut drain) {
                Ok(_) => {
                    Self::reap_exited_children(&registry, &network, &config).await;
                }
                Err(Errno::EAGAIN) => {
                    guard.clear_ready();
                    continue;
                }
                Err(e) => {
                    ConsoleLogger::warning(&format!("Reaper self-pipe read failed: {}", e));
                }
            }
        }
    }

    /// `waitpid(-1, WNOHANG)` discovers which child(ren) actually exited; a
    /// single SIGCHLD delivery can coalesce more than one exit.
    async fn reap_exited_children(registry: &DomainRegistry, network: &NetworkManager, config: &DriverConfig) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                    Self::vm_cleanup(registry, network, config, pid.as_raw()).await;
                }
                Ok(_) => continue,
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    ConsoleLogger::warning(&format!("waitpid(-1, WNOHANG) failed: {}", e));
                    break;
                }
            }
        }
    }

    /// The reentrancy-safe cleanup routine (§4.6): looks up the domain owning
    /// `runtime_id`, ignores anything that isn't a container root (this also
    /// covers a forwarder's own exit, which raises SIGCHLD too), then tears
    /// down interfaces, reaps the root, kills the forwarder, and marks the
    /// domain inactive. Safe to call from the signal-notification path (the
    /// root already exited) or directly for `domain_destroy` (the root is
    /// still alive and is killed here first).
    pub async fn vm_cleanup(registry: &DomainRegistry, network: &NetworkManager, config: &DriverConfig, runtime_id: i32) {
        let record = match registry.find_by_id(runtime_id).await {
            Ok(r) => r,
            Err(_) => return,
        };
        let uuid = record.definition.uuid;

        network.destroy_interfaces(&record.definition.interfaces);

        let _ = ProcessUtils::kill(runtime_id, Signal::SIGKILL);
        if let Err(e) = ProcessUtils::wait_blocking(runtime_id) {
            ConsoleLogger::warning(&format!("waitpid({}) during cleanup failed: {}", runtime_id, e));
        }

        Self::kill_and_reap_forwarder(record.runtime.forwarder_pid);

        FileSystemUtils::remove_if_exists(config.tty_pid_path(&record.definition.name).to_string_lossy().as_ref());

        if let Err(e) = registry.mark_stopped(uuid).await {
            ConsoleLogger::warning(&format!("Failed to mark domain {} stopped: {}", uuid, e));
        }
    }

    fn kill_and_reap_forwarder(forwarder_pid: i32) {
        if forwarder_pid < 2 {
            return;
        }
        let _ = ProcessUtils::kill(forwarder_pid, Signal::SIGKILL);
        if let Err(e) = ProcessUtils::wait_blocking(forwarder_pid) {
            ConsoleLogger::warning(&format!("Failed to reap forwarder {}: {}", forwarder_pid, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ContainerDefinition;
    use crate::daemon::registry::RuntimeRecord;
    use crate::network::NoNetworkService;
    use std::path::PathBuf;

    #[tokio::test]
    async fn vm_cleanup_ignores_unknown_pids() {
        let registry = DomainRegistry::new();
        let network = NetworkManager::new(Box::new(NoNetworkService));
        let config = DriverConfig::default();

        // Should not panic even though nothing is registered under this pid.
        Reaper::vm_cleanup(&registry, &network, &config, 999_999).await;
    }

    #[tokio::test]
    async fn vm_cleanup_marks_a_known_domain_stopped() {
        let registry = DomainRegistry::new();
        let network = NetworkManager::new(Box::new(NoNetworkService));
        let config = DriverConfig::default();

        let def = ContainerDefinition::new("reap-me");
        let uuid = def.uuid;
        registry.assign(def, PathBuf::from("/tmp/reap-me.json")).await.unwrap();

        // A pid that does not correspond to any real process: `kill`/`waitpid`
        // both tolerate that ("no such process" / "no such child" are treated
        // as already-cleaned-up), so this exercises the registry bookkeeping
        // without touching any live process.
        let fake_pid = 999_998;
        let mut runtime = RuntimeRecord::inactive(PathBuf::from("/tmp/reap-me.json"));
        runtime.runtime_id = fake_pid;
        runtime.state = crate::daemon::registry::ContainerState::Running;
        registry.mark_started(uuid, runtime).await.unwrap();

        Reaper::vm_cleanup(&registry, &network, &config, fake_pid).await;

        assert_eq!(registry.count_active().await, 0);
        assert_eq!(registry.count_inactive().await, 1);
    }
}
