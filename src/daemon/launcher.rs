use std::ffi::CString;
use std::fs;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

use nix::sched::{clone, CloneFlags};
use nix::sys::signal::Signal;
use nix::unistd::{execv, fork, sethostname, ForkResult, Pid};
use uuid::Uuid;

use crate::daemon::handshake::{self, Handshake};
use crate::daemon::pty::{self, PtyTunnel};
use crate::daemon::registry::{ContainerState, DomainRegistry, RuntimeRecord};
use crate::definition::ContainerDefinition;
use crate::error::{DriverError, DriverResult};
use crate::network::NetworkManager;
use crate::utils::console::ConsoleLogger;
use crate::utils::filesystem::FileSystemUtils;
use crate::utils::process::ProcessUtils;

const CLONE_STACK_PAGES: usize = 4;
const PAGE_SIZE: usize = 4096;
const DEFAULT_INIT_PATH: &str = "/sbin/init";

/// Runs the canonical start sequence (C6, §4.5): PTY allocation, forwarder fork,
/// veth bringup, handshake, clone, interface move, release. Failures past the
/// clone unwind everything the sequence built; failures before it only unwind
/// what had already succeeded.
pub struct ContainerLauncher<'a> {
    network: &'a NetworkManager,
    registry: &'a DomainRegistry,
    have_netns: bool,
    uuid: Uuid,
}

impl<'a> ContainerLauncher<'a> {
    pub fn new(network: &'a NetworkManager, registry: &'a DomainRegistry, have_netns: bool, uuid: Uuid) -> Self {
        Self { network, registry, have_netns, uuid }
    }

    pub async fn start(
        &self,
        def: &mut ContainerDefinition,
        config_path: PathBuf,
        tty_pid_path: PathBuf,
    ) -> DriverResult<RuntimeRecord> {
        if !def.interfaces.is_empty() && !self.have_netns {
            return Err(DriverError::NoSupport(
                "network namespace support is unavailable on this host".into(),
            ));
        }

        // 1. PTY
        let parent_tunnel = PtyTunnel::setup_parent(def)?;
        let container_side = PtyTunnel::setup_container_side()?;
        pty::set_nonblocking(container_side.master.as_raw_fd())?;
        let console_slave_name = container_side.slave_name.clone();

        // 2. Fork the console forwarder, then close our copies of the masters;
        // the forwarder's independent fd-table copy keeps them alive.
        let forwarder_pid = match &parent_tunnel {
            Some(handle) => {
                let pid = self.spawn_forwarder(handle.master.as_raw_fd(), container_side.master.as_raw_fd())?;
                if let Err(e) = FileSystemUtils::write_pid_file(tty_pid_path.to_string_lossy().as_ref(), pid) {
                    ConsoleLogger::warning(&format!("Failed to persist forwarder pid file: {}", e));
                }
                pid
            }
            None => -1,
        };
        drop(parent_tunnel);
        drop(container_side);

        // 3. Veth bring-up, strictly in bridge/create/attach/enable order per interface.
        for iface in def.interfaces.iter_mut() {
            if let Err(e) = self.network.bring_up_pre_clone(iface) {
                self.network.destroy_interfaces(&def.interfaces);
                self.shallow_cleanup(forwarder_pid, &tty_pid_path);
                return Err(e);
            }
        }

        // 4. Handshake pair
        let mut handshake = match Handshake::create() {
            Ok(h) => h,
            Err(e) => {
                self.network.destroy_interfaces(&def.interfaces);
                self.shallow_cleanup(forwarder_pid, &tty_pid_path);
                return Err(e);
            }
        };

        // 5. Clone
        let handshake_child_fd = handshake
            .child_fd()
            .ok_or_else(|| DriverError::Internal("handshake child fd missing before clone".into()))?;
        let handshake_parent_fd = handshake
            .parent_fd()
            .ok_or_else(|| DriverError::Internal("handshake parent fd missing before clone".into()))?;
        let hostname = def.name.clone();
        let init_path = def.init_path.clone().unwrap_or_else(|| DEFAULT_INIT_PATH.to_string());

        let mut stack = vec![0u8; CLONE_STACK_PAGES * PAGE_SIZE];
        let mut flags = CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWUSER
            | CloneFlags::CLONE_NEWIPC;
        if !def.interfaces.is_empty() {
            flags |= CloneFlags::CLONE_NEWNET;
        }

        let child_entry: Box<dyn FnMut() -> isize> = Box::new(move || {
            Self::container_entry(handshake_child_fd, handshake_parent_fd, &hostname, &init_path)
        });

        let child_pid = match unsafe { clone(child_entry, &mut stack, flags, Some(Signal::SIGCHLD as i32)) } {
            Ok(pid) => pid,
            Err(e) => {
                handshake.close_both();
                self.network.destroy_interfaces(&def.interfaces);
                self.shallow_cleanup(forwarder_pid, &tty_pid_path);
                return Err(DriverError::Internal(format!("clone failed: {}", e)));
            }
        };

        // 5.5. Mark the domain running immediately, before any of the steps
        // below that can cause the child to exit spontaneously (§5) — so a
        // concurrent reaper pass always finds the registry linkage already in
        // place and never silently drops the cleanup.
        let runtime = RuntimeRecord {
            runtime_id: child_pid.as_raw(),
            state: ContainerState::Running,
            forwarder_pid,
            parent_pty_master_fd: None,
            container_pty_master_fd: None,
            container_pty_slave_name: Some(console_slave_name),
            config_path: config_path.clone(),
        };
        if let Err(e) = self.registry.mark_started(self.uuid, runtime.clone()).await {
            handshake.close_both();
            self.full_cleanup(child_pid, forwarder_pid, &def.interfaces, &tty_pid_path).await;
            return Err(e);
        }

        // 6. Move interfaces into the child's netns, now that a target pid exists.
        for iface in &def.interfaces {
            if let Err(e) = self.network.move_into_container_netns(iface, child_pid.as_raw()) {
                handshake.close_both();
                self.full_cleanup(child_pid, forwarder_pid, &def.interfaces, &tty_pid_path).await;
                return Err(e);
            }
        }

        // 7. Release. `Handshake`'s `Drop` closes both ends on every path out of
        // this function, satisfying invariant 4 of the data model regardless of
        // which branch returns.
        if let Err(e) = handshake.release_child() {
            self.full_cleanup(child_pid, forwarder_pid, &def.interfaces, &tty_pid_path).await;
            return Err(e);
        }

        // 8. Persist the definition (console path and veth names were filled
        // in above); the registry linkage was already established in step 5.5.
        if let Ok(json) = def.serialize() {
            if let Err(e) = fs::write(&config_path, json) {
                ConsoleLogger::warning(&format!("Failed to persist started definition: {}", e));
            }
        }

        Ok(runtime)
    }

    fn spawn_forwarder(&self, parent_master_fd: RawFd, container_master_fd: RawFd) -> DriverResult<i32> {
        match unsafe { fork() }.map_err(DriverError::from)? {
            ForkResult::Parent { child } => Ok(child.as_raw()),
            ForkResult::Child => {
                pty::forward(parent_master_fd, container_master_fd);
            }
        }
    }

    /// Entry point of the cloned container root (step 5): closes the parent's
    /// socket end, blocks for the CONTINUE token, then execs the container init.
    /// Everything past that point (mounting filesystems, the rest of bringup) is
    /// the in-container init's own responsibility, not this driver's.
    fn container_entry(own_fd: RawFd, parent_fd: RawFd, hostname: &str, init_path: &str) -> isize {
        if let Err(e) = sethostname(hostname) {
            eprintln!("Failed to set container hostname: {}", e);
        }

        if let Err(e) = handshake::await_continue(own_fd, parent_fd) {
            eprintln!("Handshake failed in container root: {}", e);
            return 1;
        }

        let program = match CString::new(init_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Invalid init path '{}': {}", init_path, e);
                return 1;
            }
        };

        match execv(&program, &[program.clone()]) {
            Ok(_) => 0,
            Err(e) => {
                eprintln!("execv({}) failed: {}", init_path, e);
                1
            }
        }
    }

    /// Unwinds a failure that occurred before the clone: no child process yet,
    /// so only the forwarder and its pid file need to go.
    fn shallow_cleanup(&self, forwarder_pid: i32, tty_pid_path: &PathBuf) {
        Self::kill_forwarder(forwarder_pid);
        FileSystemUtils::remove_if_exists(tty_pid_path.to_string_lossy().as_ref());
    }

    /// Unwinds a failure after the clone: kill and reap the container root,
    /// revert the registry linkage step 5.5 established, tear down whatever
    /// interfaces were created, then do the shallow part.
    async fn full_cleanup(
        &self,
        child_pid: Pid,
        forwarder_pid: i32,
        interfaces: &[crate::definition::InterfaceSpec],
        tty_pid_path: &PathBuf,
    ) {
        if let Err(e) = ProcessUtils::kill(child_pid.as_raw(), Signal::SIGKILL) {
            ConsoleLogger::warning(&format!("Failed to kill container root {}: {}", child_pid, e));
        }
        if let Err(e) = ProcessUtils::wait_blocking(child_pid.as_raw()) {
            ConsoleLogger::warning(&format!("Failed to reap container root {}: {}", child_pid, e));
        }
        if let Err(e) = self.registry.mark_stopped(self.uuid).await {
            ConsoleLogger::warning(&format!("Failed to revert registry state for {}: {}", self.uuid, e));
        }
        self.network.destroy_interfaces(interfaces);
        self.shallow_cleanup(forwarder_pid, tty_pid_path);
    }

    fn kill_forwarder(forwarder_pid: i32) {
        if forwarder_pid < 2 {
            return;
        }
        if let Err(e) = ProcessUtils::kill(forwarder_pid, Signal::SIGKILL) {
            ConsoleLogger::warning(&format!("Failed to kill forwarder {}: {}", forwarder_pid, e));
        }
        if let Err(e) = ProcessUtils::wait_blocking(forwarder_pid) {
            ConsoleLogger::warning(&format!("Failed to reap forwarder {}: {}", forwarder_pid, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NoNetworkService;

    #[tokio::test]
    async fn rejects_interfaces_without_netns_support() {
        let network = NetworkManager::new(Box::new(NoNetworkService));
        let registry = DomainRegistry::new();

        let mut def = ContainerDefinition::new("c1");
        def.interfaces.push(crate::definition::InterfaceSpec::new(
            crate::definition::NetworkTarget::Bridge { name: "lxcbr0".into() },
        ));
        let uuid = def.uuid;
        registry.assign(def.clone(), PathBuf::from("/tmp/c1.json")).await.unwrap();

        let launcher = ContainerLauncher::new(&network, &registry, false, uuid);
        let err = launcher
            .start(&mut def, PathBuf::from("/tmp/c1.json"), PathBuf::from("/tmp/c1.tty.pid"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "no-support");
    }
}
