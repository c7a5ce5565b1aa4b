use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{DriverError, DriverResult};
use crate::utils::command::CommandExecutor;
use crate::utils::console::ConsoleLogger;

static NEXT_VETH_ID: AtomicU32 = AtomicU32::new(0);

/// Creates, enables, moves, and destroys veth pairs (C2). Every operation shells
/// out to `ip link`, the same idiom this codebase has always used for network
/// setup rather than a netlink client library.
pub struct VethManager;

impl VethManager {
    /// Allocates a fresh, globally-unique pair of veth endpoint names.
    fn fresh_names() -> (String, String) {
        let id = NEXT_VETH_ID.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        (format!("veth{}h{}", pid, id), format!("veth{}c{}", pid, id))
    }

    /// **create(parent_name?, container_name?) -> (parent_name, container_name)**.
    /// Empty names are replaced with freshly allocated ones. Creation is a single
    /// `ip link add ... type veth peer name ...` invocation.
    pub fn create(parent_name: Option<&str>, container_name: Option<&str>) -> DriverResult<(String, String)> {
        let (fresh_parent, fresh_container) = Self::fresh_names();
        let parent = match parent_name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => fresh_parent,
        };
        let container = match container_name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => fresh_container,
        };

        let cmd = format!("ip link add {} type veth peer name {}", parent, container);
        let result = CommandExecutor::execute_shell(&cmd).map_err(DriverError::internal)?;
        if !result.success {
            return Err(DriverError::Internal(format!(
                "failed to create veth pair {} <-> {}: {}",
                parent,
                container,
                result.stderr.trim()
            )));
        }

        ConsoleLogger::debug(&format!("Created veth pair: {} <-> {}", parent, container));
        Ok((parent, container))
    }

    /// Brings a host-side endpoint up.
    pub fn enable(name: &str) -> DriverResult<()> {
        Self::run(&format!("ip link set {} up", name), "enable")
    }

    /// Brings a host-side endpoint down.
    pub fn disable(name: &str) -> DriverResult<()> {
        Self::run(&format!("ip link set {} down", name), "disable")
    }

    /// Moves an endpoint into the network namespace of `target_pid`.
    pub fn move_to_netns(name: &str, target_pid: i32) -> DriverResult<()> {
        Self::run(&format!("ip link set {} netns {}", name, target_pid), "move")
    }

    /// Renames an endpoint once it is inside the target namespace; callers move
    /// first, then rename via `nsenter`, since the rename must run in the
    /// container's own namespace.
    pub fn rename_in_netns(target_pid: i32, old_name: &str, new_name: &str) -> DriverResult<()> {
        Self::run(
            &format!("nsenter -t {} -n ip link set {} name {}", target_pid, old_name, new_name),
            "rename",
        )
    }

    pub fn assign_address_in_netns(target_pid: i32, name: &str, cidr: &str) -> DriverResult<()> {
        Self::run(
            &format!("nsenter -t {} -n ip addr add {} dev {}", target_pid, cidr, name),
            "assign address",
        )
    }

    pub fn enable_in_netns(target_pid: i32, name: &str) -> DriverResult<()> {
        Self::run(
            &format!("nsenter -t {} -n ip link set {} up", target_pid, name),
            "enable in netns",
        )
    }

    /// Deletes a veth endpoint; the peer disappears with it. Best-effort: failures
    /// are logged and swallowed so a caller destroying several interfaces keeps
    /// going (§4.2, §4.6).
    pub fn destroy(name: &str) {
        let cmd = format!("ip link delete {}", name);
        match CommandExecutor::execute_shell(&cmd) {
            Ok(result) if !result.success => {
                ConsoleLogger::warning(&format!("Failed to destroy veth {}: {}", name, result.stderr.trim()));
            }
            Err(e) => ConsoleLogger::warning(&format!("Failed to destroy veth {}: {}", name, e)),
            _ => ConsoleLogger::debug(&format!("Destroyed veth {}", name)),
        }
    }

    fn run(cmd: &str, action: &str) -> DriverResult<()> {
        let result = CommandExecutor::execute_shell(cmd).map_err(DriverError::internal)?;
        if !result.success {
            return Err(DriverError::Internal(format!(
                "failed to {}: {} ({})",
                action,
                result.stderr.trim(),
                cmd
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_are_unique_across_calls() {
        let (p1, c1) = VethManager::fresh_names();
        let (p2, c2) = VethManager::fresh_names();
        assert_ne!(p1, p2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn create_prefers_caller_supplied_names() {
        // This test only exercises name-selection logic, not the `ip` invocation,
        // since that requires CAP_NET_ADMIN and a real netns.
        let (fresh_parent, fresh_container) = VethManager::fresh_names();
        assert!(fresh_parent.starts_with("veth"));
        assert!(fresh_container.starts_with("veth"));
    }
}
