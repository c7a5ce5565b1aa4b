pub mod bridge;
pub mod veth;

use crate::definition::{InterfaceSpec, NetworkTarget};
use crate::error::{DriverError, DriverResult};
use bridge::BridgeManager;
use veth::VethManager;

/// The external network service collaborator consumed by the driver (§6):
/// `lookup(name) -> handle`, `bridge_of(handle) -> string`, `release(handle)`.
/// Collapsed here to the one method the core actually needs: resolving a named
/// logical network straight to the bridge backing it.
pub trait NetworkService: Send + Sync {
    fn resolve_bridge(&self, network_name: &str) -> DriverResult<String>;
}

/// Default network service with no logical networks configured; every named
/// network is unresolvable until the outer service wires in a real one. Directly
/// bridged interfaces don't consult this at all.
#[derive(Default)]
pub struct NoNetworkService;

impl NetworkService for NoNetworkService {
    fn resolve_bridge(&self, network_name: &str) -> DriverResult<String> {
        Err(DriverError::NoSupport(format!(
            "logical network '{}' is not resolvable by this driver instance",
            network_name
        )))
    }
}

/// Facade over C2 (veth) and C3 (bridge attach) used by the launcher. Owns the
/// lazily-constructed, driver-wide bridge handle (§5).
pub struct NetworkManager {
    bridge: BridgeManager,
    network_service: Box<dyn NetworkService>,
}

impl NetworkManager {
    pub fn new(network_service: Box<dyn NetworkService>) -> Self {
        Self {
            bridge: BridgeManager::new(),
            network_service,
        }
    }

    fn resolve_bridge_name(&self, target: &NetworkTarget) -> DriverResult<String> {
        match target {
            NetworkTarget::Bridge { name } => Ok(name.clone()),
            NetworkTarget::Network { name } => self.network_service.resolve_bridge(name),
        }
    }

    /// Pre-clone bringup for one interface, in the strict order §4.2 specifies:
    /// (1) resolve bridge, (2) create pair, (3) bridge_add the parent side,
    /// (4) enable the parent side. Fills in the spec's `host_veth`/`container_veth`
    /// fields on success.
    pub fn bring_up_pre_clone(&self, iface: &mut InterfaceSpec) -> DriverResult<()> {
        let bridge_name = self.resolve_bridge_name(&iface.target)?;
        let (host_veth, container_veth) = VethManager::create(None, None)?;
        self.bridge.bridge_add(&bridge_name, &host_veth)?;
        VethManager::enable(&host_veth)?;

        iface.host_veth = Some(host_veth);
        iface.container_veth = Some(container_veth);
        Ok(())
    }

    /// Post-clone: move the container-side endpoint into the child's netns,
    /// rename it to a stable in-container name, and bring up loopback alongside
    /// it (§4.5 step 6).
    pub fn move_into_container_netns(&self, iface: &InterfaceSpec, child_pid: i32) -> DriverResult<()> {
        let container_veth = iface
            .container_veth
            .as_deref()
            .ok_or_else(|| DriverError::Internal("move requested before veth pair was created".into()))?;

        VethManager::move_to_netns(container_veth, child_pid)?;
        VethManager::rename_in_netns(child_pid, container_veth, "eth0")?;
        VethManager::enable_in_netns(child_pid, "eth0")?;
        VethManager::enable_in_netns(child_pid, "lo")?;
        Ok(())
    }

    /// Best-effort teardown for every interface of a container; individual
    /// failures are logged and do not stop the sweep (§4.6 step 1).
    pub fn destroy_interfaces(&self, interfaces: &[InterfaceSpec]) {
        for iface in interfaces {
            if let Some(host_veth) = &iface.host_veth {
                VethManager::destroy(host_veth);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_targets_resolve_without_a_network_service() {
        let mgr = NetworkManager::new(Box::new(NoNetworkService));
        let resolved = mgr
            .resolve_bridge_name(&NetworkTarget::Bridge {
                name: "lxcbr0".to_string(),
            })
            .unwrap();
        assert_eq!(resolved, "lxcbr0");
    }

    #[test]
    fn logical_networks_fail_without_a_configured_service() {
        let mgr = NetworkManager::new(Box::new(NoNetworkService));
        let err = mgr
            .resolve_bridge_name(&NetworkTarget::Network {
                name: "prod".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), "no-support");
    }
}
