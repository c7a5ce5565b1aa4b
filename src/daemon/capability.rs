use nix::sched::{clone, CloneFlags};
use nix::sys::signal::Signal;
use nix::sys::wait::waitpid;

use crate::utils::command::CommandExecutor;
use crate::utils::console::ConsoleLogger;

const PROBE_STACK_PAGES: usize = 4;
const PAGE_SIZE: usize = 4096;

/// **probe(extra_flags) -> ok|unsupported** (C1). Forks a dummy child with the
/// kernel clone primitive and inspects whether the kernel rejects the namespace
/// flags, then separately checks whether the host's `ip` tool understands netns
/// assignment. The driver records `have_netns = kernel_netns_ok && userland_netns_ok`.
pub struct CapabilityProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub kernel_netns_ok: bool,
    pub userland_netns_ok: bool,
}

impl Capabilities {
    pub fn have_netns(&self) -> bool {
        self.kernel_netns_ok && self.userland_netns_ok
    }
}

impl CapabilityProbe {
    pub fn probe(extra_flags: CloneFlags) -> Capabilities {
        Capabilities {
            kernel_netns_ok: Self::probe_kernel(extra_flags),
            userland_netns_ok: Self::probe_userland(),
        }
    }

    fn probe_kernel(extra_flags: CloneFlags) -> bool {
        let mut stack = vec![0u8; PROBE_STACK_PAGES * PAGE_SIZE];
        let flags = CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWUSER
            | CloneFlags::CLONE_NEWIPC
            | extra_flags;

        let child: Box<dyn FnMut() -> isize> = Box::new(|| 0);
        let result = unsafe { clone(child, &mut stack, flags, Some(Signal::SIGCHLD as i32)) };

        match result {
            Ok(pid) => {
                let _ = waitpid(pid, None);
                true
            }
            Err(nix::Error::EINVAL) => false,
            Err(e) => {
                ConsoleLogger::warning(&format!("Namespace probe clone() failed unexpectedly: {}", e));
                false
            }
        }
    }

    /// `ip link set lo netns -1` against a sentinel namespace id: exit code 255
    /// means the installed `ip` predates the `netns` subcommand, any other
    /// non-zero exit means it understood the option and rejected the bogus id
    /// (i.e. the tool is present).
    fn probe_userland() -> bool {
        match CommandExecutor::execute_shell("ip link set lo netns -1") {
            Ok(result) => result.exit_code != 255,
            Err(e) => {
                ConsoleLogger::warning(&format!("Failed to probe ip netns support: {}", e));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn have_netns_requires_both_kernel_and_userland() {
        assert!(Capabilities {
            kernel_netns_ok: true,
            userland_netns_ok: true,
        }
        .have_netns());
        assert!(!Capabilities {
            kernel_netns_ok: true,
            userland_netns_ok: false,
        }
        .have_netns());
        assert!(!Capabilities {
            kernel_netns_ok: false,
            userland_netns_ok: true,
        }
        .have_netns());
    }
}
