use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::definition::ContainerDefinition;
use crate::error::{DriverError, DriverResult};

/// Lifecycle state of a runtime record (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Shutoff,
    Running,
    ShutdownRequested,
}

/// Ephemeral runtime fields that exist only while a domain is defined (§3).
/// Mutated only by the launcher and the reaper.
#[derive(Debug, Clone)]
pub struct RuntimeRecord {
    pub runtime_id: i32,
    pub state: ContainerState,
    pub forwarder_pid: i32,
    pub parent_pty_master_fd: Option<i32>,
    pub container_pty_master_fd: Option<i32>,
    pub container_pty_slave_name: Option<String>,
    pub config_path: PathBuf,
}

impl RuntimeRecord {
    pub fn inactive(config_path: PathBuf) -> Self {
        Self {
            runtime_id: -1,
            state: ContainerState::Shutoff,
            forwarder_pid: -1,
            parent_pty_master_fd: None,
            container_pty_master_fd: None,
            container_pty_slave_name: None,
            config_path,
        }
    }

    pub fn is_active(&self) -> bool {
        self.runtime_id >= 0
            && matches!(self.state, ContainerState::Running | ContainerState::ShutdownRequested)
    }
}

#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub definition: ContainerDefinition,
    pub runtime: RuntimeRecord,
}

struct RegistryInner {
    records: HashMap<Uuid, DomainRecord>,
    by_name: HashMap<String, Uuid>,
    by_runtime_id: HashMap<i32, Uuid>,
}

/// In-memory set of defined and active containers, keyed by uuid with secondary
/// indices on name and runtime id (C8). A single exclusive section (the
/// `tokio::sync::RwLock`) serializes every mutation per §5's concurrency model.
pub struct DomainRegistry {
    inner: RwLock<RegistryInner>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                records: HashMap::new(),
                by_name: HashMap::new(),
                by_runtime_id: HashMap::new(),
            }),
        }
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> DriverResult<DomainRecord> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(&uuid)
            .cloned()
            .ok_or_else(|| DriverError::NoDomain(uuid.to_string()))
    }

    pub async fn find_by_name(&self, name: &str) -> DriverResult<DomainRecord> {
        let inner = self.inner.read().await;
        let uuid = inner
            .by_name
            .get(name)
            .ok_or_else(|| DriverError::NoDomain(name.to_string()))?;
        Ok(inner.records[uuid].clone())
    }

    pub async fn find_by_id(&self, id: i32) -> DriverResult<DomainRecord> {
        let inner = self.inner.read().await;
        let uuid = inner
            .by_runtime_id
            .get(&id)
            .ok_or_else(|| DriverError::NoDomain(id.to_string()))?;
        Ok(inner.records[uuid].clone())
    }

    /// **assign(def) -> record**: idempotent registration. Merges into an existing
    /// record sharing the same uuid, or creates a fresh inactive one; rejects a
    /// name collision with a different uuid.
    pub async fn assign(&self, definition: ContainerDefinition, config_path: PathBuf) -> DriverResult<DomainRecord> {
        let mut inner = self.inner.write().await;

        if let Some(existing_uuid) = inner.by_name.get(&definition.name).copied() {
            if existing_uuid != definition.uuid {
                return Err(DriverError::InvalidDomain(format!(
                    "name '{}' is already used by a different domain",
                    definition.name
                )));
            }
        }

        let record = match inner.records.get_mut(&definition.uuid) {
            Some(existing) => {
                inner.by_name.remove(&existing.definition.name);
                existing.definition = definition.clone();
                existing.clone()
            }
            None => DomainRecord {
                definition: definition.clone(),
                runtime: RuntimeRecord::inactive(config_path),
            },
        };

        inner.by_name.insert(definition.name.clone(), definition.uuid);
        inner.records.insert(definition.uuid, record.clone());
        Ok(record)
    }

    /// Called by the launcher once a container transitions to running: updates
    /// the runtime id and registry linkage *before* any operation that could
    /// cause the child to exit spontaneously (§5).
    pub async fn mark_started(&self, uuid: Uuid, runtime: RuntimeRecord) -> DriverResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(&uuid)
            .ok_or_else(|| DriverError::NoDomain(uuid.to_string()))?;
        record.runtime = runtime.clone();
        inner.by_runtime_id.insert(runtime.runtime_id, uuid);
        Ok(())
    }

    /// Called by the reaper: clears runtime fields and removes the runtime-id
    /// index entry.
    pub async fn mark_stopped(&self, uuid: Uuid) -> DriverResult<()> {
        let mut inner = self.inner.write().await;
        let config_path = inner
            .records
            .get(&uuid)
            .map(|r| r.runtime.config_path.clone())
            .ok_or_else(|| DriverError::NoDomain(uuid.to_string()))?;

        if let Some(record) = inner.records.get_mut(&uuid) {
            inner.by_runtime_id.remove(&record.runtime.runtime_id);
            record.runtime = RuntimeRecord::inactive(config_path);
            for iface in &mut record.definition.interfaces {
                iface.clear_runtime_names();
            }
        }
        Ok(())
    }

    /// **remove_inactive(record)**: rejects active records.
    pub async fn remove_inactive(&self, uuid: Uuid) -> DriverResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get(&uuid)
            .ok_or_else(|| DriverError::NoDomain(uuid.to_string()))?;

        if record.runtime.is_active() {
            return Err(DriverError::InvalidDomain(format!(
                "domain '{}' is active and cannot be undefined",
                record.definition.name
            )));
        }

        let name = record.definition.name.clone();
        inner.records.remove(&uuid);
        inner.by_name.remove(&name);
        Ok(())
    }

    pub async fn list_active(&self, limit: usize) -> Vec<i32> {
        let inner = self.inner.read().await;
        inner
            .records
            .values()
            .filter(|r| r.runtime.is_active())
            .map(|r| r.runtime.runtime_id)
            .take(if limit == 0 { 0 } else { limit })
            .collect()
    }

    pub async fn list_inactive(&self, limit: usize) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .records
            .values()
            .filter(|r| !r.runtime.is_active())
            .map(|r| r.definition.name.clone())
            .take(if limit == 0 { 0 } else { limit })
            .collect()
    }

    pub async fn count_active(&self) -> usize {
        let inner = self.inner.read().await;
        inner.records.values().filter(|r| r.runtime.is_active()).count()
    }

    pub async fn count_inactive(&self) -> usize {
        let inner = self.inner.read().await;
        inner.records.values().filter(|r| !r.runtime.is_active()).count()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assign_is_idempotent_for_same_uuid() {
        let registry = DomainRegistry::new();
        let def = ContainerDefinition::new("c1");
        let uuid = def.uuid;

        registry.assign(def.clone(), PathBuf::from("/tmp/c1.json")).await.unwrap();
        registry.assign(def, PathBuf::from("/tmp/c1.json")).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.count_inactive().await, 1);
        assert!(registry.find_by_uuid(uuid).await.is_ok());
    }

    #[tokio::test]
    async fn assign_rejects_name_collision_with_different_uuid() {
        let registry = DomainRegistry::new();
        let def1 = ContainerDefinition::new("dup");
        let mut def2 = ContainerDefinition::new("dup");
        def2.uuid = Uuid::new_v4();

        registry.assign(def1, PathBuf::from("/tmp/dup.json")).await.unwrap();
        let err = registry.assign(def2, PathBuf::from("/tmp/dup.json")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-domain");
    }

    #[tokio::test]
    async fn remove_inactive_rejects_active_domains() {
        let registry = DomainRegistry::new();
        let def = ContainerDefinition::new("active1");
        let uuid = def.uuid;
        registry.assign(def, PathBuf::from("/tmp/active1.json")).await.unwrap();

        let mut runtime = RuntimeRecord::inactive(PathBuf::from("/tmp/active1.json"));
        runtime.runtime_id = 123;
        runtime.state = ContainerState::Running;
        registry.mark_started(uuid, runtime).await.unwrap();

        let err = registry.remove_inactive(uuid).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-domain");
        assert_eq!(registry.count_active().await, 1);
    }

    #[tokio::test]
    async fn active_plus_inactive_equals_registry_size() {
        let registry = DomainRegistry::new();
        for i in 0..3 {
            registry
                .assign(ContainerDefinition::new(format!("c{}", i)), PathBuf::from("/tmp/x.json"))
                .await
                .unwrap();
        }
        let total = registry.len().await;
        let active = registry.count_active().await;
        let inactive = registry.count_inactive().await;
        assert_eq!(active + inactive, total);
    }

    #[tokio::test]
    async fn list_active_zero_limit_returns_nothing() {
        let registry = DomainRegistry::new();
        let def = ContainerDefinition::new("c1");
        let uuid = def.uuid;
        registry.assign(def, PathBuf::from("/tmp/c1.json")).await.unwrap();
        let mut runtime = RuntimeRecord::inactive(PathBuf::from("/tmp/c1.json"));
        runtime.runtime_id = 42;
        runtime.state = ContainerState::Running;
        registry.mark_started(uuid, runtime).await.unwrap();

        assert_eq!(registry.list_active(0).await.len(), 0);
    }
}
