use std::sync::Mutex;

use crate::error::{DriverError, DriverResult};
use crate::utils::command::CommandExecutor;
use crate::utils::console::ConsoleLogger;

/// Tracks whether the bridge-control handle has been lazily initialized, and which
/// bridges it has already created, so repeated `bridge_add` calls for the same
/// bridge name don't redo the `ip link add type bridge` dance.
struct BridgeState {
    known_bridges: Vec<String>,
}

/// Attaches host-side veth endpoints to a named Linux bridge (C3). The handle is
/// lazily constructed the first time any interface needs it and shared by every
/// subsequent interface setup on this driver (§5, "shared resources").
pub struct BridgeManager {
    state: Mutex<BridgeState>,
}

impl BridgeManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState {
                known_bridges: Vec::new(),
            }),
        }
    }

    /// Ensures `bridge_name` exists and is up, creating it if this is the first
    /// time this driver has seen it.
    pub fn ensure_bridge(&self, bridge_name: &str) -> DriverResult<()> {
        let mut state = self.state.lock().expect("bridge state poisoned");
        if state.known_bridges.iter().any(|b| b == bridge_name) {
            return Ok(());
        }

        if !Self::bridge_exists(bridge_name)? {
            let create_cmd = format!("ip link add name {} type bridge", bridge_name);
            let result = CommandExecutor::execute_shell(&create_cmd).map_err(DriverError::internal)?;
            if !result.success {
                return Err(DriverError::Internal(format!(
                    "failed to create bridge {}: {}",
                    bridge_name,
                    result.stderr.trim()
                )));
            }
            ConsoleLogger::debug(&format!("Created bridge {}", bridge_name));
        }

        let up_cmd = format!("ip link set {} up", bridge_name);
        let result = CommandExecutor::execute_shell(&up_cmd).map_err(DriverError::internal)?;
        if !result.success {
            return Err(DriverError::Internal(format!(
                "failed to bring bridge {} up: {}",
                bridge_name,
                result.stderr.trim()
            )));
        }

        state.known_bridges.push(bridge_name.to_string());
        Ok(())
    }

    /// **bridge_add(bridge_name, veth_name)**: attach a host-side veth endpoint.
    pub fn bridge_add(&self, bridge_name: &str, veth_name: &str) -> DriverResult<()> {
        self.ensure_bridge(bridge_name)?;

        let cmd = format!("ip link set {} master {}", veth_name, bridge_name);
        let result = CommandExecutor::execute_shell(&cmd).map_err(DriverError::internal)?;
        if !result.success {
            return Err(DriverError::Internal(format!(
                "failed to attach {} to bridge {}: {}",
                veth_name,
                bridge_name,
                result.stderr.trim()
            )));
        }

        ConsoleLogger::debug(&format!("Attached {} to bridge {}", veth_name, bridge_name));
        Ok(())
    }

    fn bridge_exists(bridge_name: &str) -> DriverResult<bool> {
        let result = CommandExecutor::execute_shell(&format!("ip link show {}", bridge_name))
            .map_err(DriverError::internal)?;
        Ok(result.success)
    }
}

impl Default for BridgeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_known_bridges() {
        let mgr = BridgeManager::new();
        let state = mgr.state.lock().unwrap();
        assert!(state.known_bridges.is_empty());
    }
}
