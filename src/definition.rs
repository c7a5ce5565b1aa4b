use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DriverError, DriverResult};

/// Either attach directly to a named host bridge, or attach to a named logical
/// network whose bridge is resolved through the external network service (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkTarget {
    Bridge { name: String },
    Network { name: String },
}

/// One network interface attached to a container. `host_veth` / `container_veth`
/// are filled in at start time and are either both `None` (pre-start) or both
/// `Some` (post-start) — invariant 3 of §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub target: NetworkTarget,
    #[serde(default)]
    pub host_veth: Option<String>,
    #[serde(default)]
    pub container_veth: Option<String>,
}

impl InterfaceSpec {
    pub fn new(target: NetworkTarget) -> Self {
        Self {
            target,
            host_veth: None,
            container_veth: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.host_veth.is_some() && self.container_veth.is_some()
    }

    pub fn clear_runtime_names(&mut self) {
        self.host_veth = None;
        self.container_veth = None;
    }
}

/// Declarative container definition (§3). Persisted externally as JSON under the
/// driver's config directory and held in memory while the domain is known.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerDefinition {
    pub uuid: Uuid,
    pub name: String,
    pub os_type: String,
    pub max_memory_kib: u64,
    pub init_path: Option<String>,
    pub console_device: Option<String>,
    pub interfaces: Vec<InterfaceSpec>,
}

impl ContainerDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            os_type: "linux".to_string(),
            max_memory_kib: 0,
            init_path: None,
            console_device: None,
            interfaces: Vec::new(),
        }
    }

    /// `parse(json) -> definition`, the in-crate stand-in for the external XML
    /// definition-parser collaborator (§4.12).
    pub fn parse(json: &str) -> DriverResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DriverError::Internal(format!("definition parse error: {}", e)))
    }

    /// `serialize(definition) -> json`.
    pub fn serialize(&self) -> DriverResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DriverError::Internal(format!("definition serialize error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut def = ContainerDefinition::new("c1");
        def.console_device = Some("/dev/ptmx".to_string());
        def.interfaces.push(InterfaceSpec::new(NetworkTarget::Bridge {
            name: "lxcbr0".to_string(),
        }));

        let json = def.serialize().unwrap();
        let parsed = ContainerDefinition::parse(&json).unwrap();
        assert_eq!(def, parsed);
    }

    #[test]
    fn interface_is_started_only_when_both_names_present() {
        let mut iface = InterfaceSpec::new(NetworkTarget::Bridge {
            name: "lxcbr0".to_string(),
        });
        assert!(!iface.is_started());
        iface.host_veth = Some("veth0host".to_string());
        assert!(!iface.is_started());
        iface.container_veth = Some("veth0ctr".to_string());
        assert!(iface.is_started());
    }
}
