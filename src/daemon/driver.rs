use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::unistd::Uid;
use uuid::Uuid;

use crate::config::DriverConfig;
use crate::daemon::capability::{CapabilityProbe, Capabilities};
use crate::daemon::launcher::ContainerLauncher;
use crate::daemon::reaper::Reaper;
use crate::daemon::registry::{ContainerState, DomainRecord, DomainRegistry};
use crate::definition::ContainerDefinition;
use crate::error::{DriverError, DriverResult};
use crate::network::{NetworkManager, NoNetworkService};
use crate::utils::console::ConsoleLogger;
use crate::utils::process::ProcessUtils;

const CONNECTION_URI: &str = "lxc:///";

/// Everything `get_info` reports (§6): current state, accounted cpu time (not
/// yet tracked, always 0), configured memory reported as both max and current,
/// and a fixed single-vcpu count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    pub state: ContainerState,
    pub cpu_time_ns: u64,
    pub max_memory_kib: u64,
    pub current_memory_kib: u64,
    pub vcpu_count: u32,
}

/// Top-level driver state (C9): config, capability flags, registry, and network
/// manager, threaded through every dispatch operation. Constructed once in
/// `startup`, released in `shutdown`, and shared with the reaper's background
/// task via `Arc` (§9's "explicit handle, not an ambient global").
pub struct Driver {
    config: Arc<DriverConfig>,
    registry: Arc<DomainRegistry>,
    network: Arc<NetworkManager>,
    capabilities: Capabilities,
    shut_down: AtomicBool,
}

impl Driver {
    fn assemble(config: DriverConfig, capabilities: Capabilities) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(DomainRegistry::new()),
            network: Arc::new(NetworkManager::new(Box::new(NoNetworkService))),
            capabilities,
            shut_down: AtomicBool::new(false),
        }
    }

    /// **startup()**: requires euid 0, runs the capability probe, loads config,
    /// loads every on-disk definition. Any failing step tears down what was
    /// already built and reports failure.
    pub async fn startup() -> DriverResult<Self> {
        if !Uid::effective().is_root() {
            return Err(DriverError::CapabilityMissing(
                "driver must run as uid 0".into(),
            ));
        }

        let capabilities = CapabilityProbe::probe(CloneFlags::CLONE_NEWNET);
        let config = match DriverConfig::load() {
            Ok(c) => c,
            Err(e) => return Err(e),
        };
        if let Err(e) = config.ensure_directories() {
            return Err(e);
        }

        let driver = Self::assemble(config, capabilities);
        if let Err(e) = driver.load_definitions().await {
            driver.shutdown().await;
            return Err(e);
        }

        Ok(driver)
    }

    async fn load_definitions(&self) -> DriverResult<()> {
        let dir = match fs::read_dir(&self.config.config_dir) {
            Ok(d) => d,
            Err(e) => {
                ConsoleLogger::warning(&format!(
                    "Could not list config directory {}: {}",
                    self.config.config_dir.display(),
                    e
                ));
                return Ok(());
            }
        };

        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    ConsoleLogger::warning(&format!("Skipping unreadable {}: {}", path.display(), e));
                    continue;
                }
            };
            match ContainerDefinition::parse(&contents) {
                Ok(def) => {
                    self.registry.assign(def, path.clone()).await?;
                }
                Err(e) => {
                    ConsoleLogger::warning(&format!("Skipping malformed definition {}: {}", path.display(), e));
                }
            }
        }
        Ok(())
    }

    /// **shutdown()**: idempotent; releasing an in-memory registry has no
    /// further effect once the `Arc`s are dropped, so this only guards the
    /// one-time log line against being emitted twice.
    pub async fn shutdown(&self) {
        if self.shut_down.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            ConsoleLogger::info("driver shutdown");
        }
    }

    /// **active()**: whether any container is active, consulted by the outer
    /// service before it may terminate this driver.
    pub async fn active(&self) -> bool {
        self.registry.count_active().await > 0
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Installs the SIGCHLD notifier and spawns the long-lived reaper task.
    /// Must be called at most once per process, after `startup`.
    pub fn install_reaper(&self) -> DriverResult<tokio::task::JoinHandle<()>> {
        let reaper = Reaper::install()?;
        let registry = self.registry.clone();
        let network = self.network.clone();
        let config = self.config.clone();
        Ok(tokio::spawn(reaper.run(registry, network, config)))
    }

    /// **open(uri)**: the connection URI must be exactly `lxc:///` and the
    /// caller must be root; anything else is "declined" so the multi-hypervisor
    /// dispatcher can try another driver.
    pub fn open(&self, uri: &str) -> DriverResult<()> {
        if !Uid::effective().is_root() || uri != CONNECTION_URI {
            return Err(DriverError::NoSupport(format!("declined: uri='{}'", uri)));
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.shutdown().await;
    }

    pub async fn list_active_ids(&self, limit: usize) -> Vec<i32> {
        self.registry.list_active(limit).await
    }

    pub async fn count_active(&self) -> usize {
        self.registry.count_active().await
    }

    pub async fn list_inactive_names(&self, limit: usize) -> Vec<String> {
        self.registry.list_inactive(limit).await
    }

    pub async fn count_inactive(&self) -> usize {
        self.registry.count_inactive().await
    }

    /// **define(json) -> uuid**. Rejects interfaces up front on a system
    /// without netns support, persists the definition, and registers it
    /// inactive.
    pub async fn define(&self, json: &str) -> DriverResult<Uuid> {
        let def = ContainerDefinition::parse(json)?;
        if !def.interfaces.is_empty() && !self.capabilities.have_netns() {
            return Err(DriverError::NoSupport(
                "network namespace support is unavailable on this host".into(),
            ));
        }

        let path = self.config.definition_path(&def.name);
        fs::write(&path, def.serialize()?)?;

        let record = self.registry.assign(def, path).await?;
        Ok(record.definition.uuid)
    }

    /// **undefine(uuid)**: rejects an active record; removes the on-disk
    /// definition once the registry accepts the removal.
    pub async fn undefine(&self, uuid: Uuid) -> DriverResult<()> {
        let record = self.registry.find_by_uuid(uuid).await?;
        self.registry.remove_inactive(uuid).await?;
        let path = self.config.definition_path(&record.definition.name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// **start(uuid)**: runs the launcher's full bringup sequence (§4.5) and
    /// transitions the registry record to running.
    pub async fn start(&self, uuid: Uuid) -> DriverResult<i32> {
        let record = self.registry.find_by_uuid(uuid).await?;
        if record.runtime.is_active() {
            return Err(DriverError::InvalidDomain(format!(
                "domain '{}' is already active",
                record.definition.name
            )));
        }

        let mut def = record.definition;
        let config_path = self.config.definition_path(&def.name);
        let tty_pid_path = self.config.tty_pid_path(&def.name);

        let launcher = ContainerLauncher::new(&self.network, &self.registry, self.capabilities.have_netns(), uuid);
        let runtime = launcher.start(&mut def, config_path.clone(), tty_pid_path).await?;
        let runtime_id = runtime.runtime_id;

        // The launcher already transitioned the registry to running as soon as
        // the clone succeeded (§5); this just persists the definition, whose
        // interface fields the launcher filled in during bring-up.
        self.registry.assign(def, config_path).await?;
        Ok(runtime_id)
    }

    /// **create-and-start(json) -> (uuid, runtime id)**: `define` followed by
    /// `start`, as one dispatch entry.
    pub async fn create_and_start(&self, json: &str) -> DriverResult<(Uuid, i32)> {
        let uuid = self.define(json).await?;
        let runtime_id = self.start(uuid).await?;
        Ok((uuid, runtime_id))
    }

    /// **destroy(uuid)**: synchronous kill-and-reap, bypassing the SIGCHLD
    /// notifier per §4.6.
    pub async fn destroy(&self, uuid: Uuid) -> DriverResult<()> {
        let record = self.registry.find_by_uuid(uuid).await?;
        if !record.runtime.is_active() {
            return Err(DriverError::InvalidDomain(format!(
                "domain '{}' is not active",
                record.definition.name
            )));
        }

        Reaper::vm_cleanup(&self.registry, &self.network, &self.config, record.runtime.runtime_id).await;
        Ok(())
    }

    /// **shutdown-graceful(uuid)**: sends SIGINT to the container root and
    /// returns; the reaper will reap it through the ordinary signal path once
    /// it actually exits.
    pub async fn shutdown_graceful(&self, uuid: Uuid) -> DriverResult<()> {
        let record = self.registry.find_by_uuid(uuid).await?;
        if !record.runtime.is_active() {
            return Err(DriverError::InvalidDomain(format!(
                "domain '{}' is not active",
                record.definition.name
            )));
        }

        ProcessUtils::kill(record.runtime.runtime_id, Signal::SIGINT).map_err(DriverError::Internal)?;
        Ok(())
    }

    pub async fn lookup_by_id(&self, id: i32) -> DriverResult<DomainRecord> {
        self.registry.find_by_id(id).await
    }

    pub async fn lookup_by_uuid(&self, uuid: Uuid) -> DriverResult<DomainRecord> {
        self.registry.find_by_uuid(uuid).await
    }

    pub async fn lookup_by_name(&self, name: &str) -> DriverResult<DomainRecord> {
        self.registry.find_by_name(name).await
    }

    pub async fn get_info(&self, uuid: Uuid) -> DriverResult<DomainInfo> {
        let record = self.registry.find_by_uuid(uuid).await?;
        Ok(DomainInfo {
            state: record.runtime.state,
            cpu_time_ns: 0,
            max_memory_kib: record.definition.max_memory_kib,
            current_memory_kib: record.definition.max_memory_kib,
            vcpu_count: 1,
        })
    }

    pub fn get_os_type(&self) -> &'static str {
        "linux"
    }

    pub async fn dump_definition(&self, uuid: Uuid) -> DriverResult<String> {
        let record = self.registry.find_by_uuid(uuid).await?;
        record.definition.serialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::registry::RuntimeRecord;

    fn test_driver(have_netns: bool) -> Driver {
        Driver::assemble(
            DriverConfig::default(),
            Capabilities {
                kernel_netns_ok: have_netns,
                userland_netns_ok: have_netns,
            },
        )
    }

    #[tokio::test]
    async fn define_rejects_interfaces_without_netns_support() {
        let driver = test_driver(false);
        let mut def = ContainerDefinition::new("needs-net");
        def.interfaces.push(crate::definition::InterfaceSpec::new(
            crate::definition::NetworkTarget::Bridge { name: "lxcbr0".into() },
        ));
        let json = def.serialize().unwrap();

        let err = driver.define(&json).await.unwrap_err();
        assert_eq!(err.kind(), "no-support");
    }

    #[tokio::test]
    async fn open_declines_non_matching_uri() {
        let driver = test_driver(true);
        assert!(driver.open("qemu:///system").is_err());
        assert!(driver.open("").is_err());
    }

    #[tokio::test]
    async fn destroy_rejects_an_inactive_domain() {
        let driver = test_driver(true);
        let def = ContainerDefinition::new("idle");
        let uuid = def.uuid;
        driver.registry.assign(def, PathBuf::from("/tmp/idle.json")).await.unwrap();

        let err = driver.destroy(uuid).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-domain");
    }

    #[tokio::test]
    async fn get_info_reports_configured_memory_as_max_and_current() {
        let driver = test_driver(true);
        let mut def = ContainerDefinition::new("mem1");
        def.max_memory_kib = 262144;
        let uuid = def.uuid;
        driver.registry.assign(def, PathBuf::from("/tmp/mem1.json")).await.unwrap();

        let info = driver.get_info(uuid).await.unwrap();
        assert_eq!(info.max_memory_kib, 262144);
        assert_eq!(info.current_memory_kib, 262144);
        assert_eq!(info.vcpu_count, 1);
    }

    #[tokio::test]
    async fn undefine_rejects_an_active_domain() {
        let driver = test_driver(true);
        let def = ContainerDefinition::new("running1");
        let uuid = def.uuid;
        driver.registry.assign(def, PathBuf::from("/tmp/running1.json")).await.unwrap();

        let mut runtime = RuntimeRecord::inactive(PathBuf::from("/tmp/running1.json"));
        runtime.runtime_id = 123;
        runtime.state = ContainerState::Running;
        driver.registry.mark_started(uuid, runtime).await.unwrap();

        let err = driver.undefine(uuid).await.unwrap_err();
        assert_eq!(err.kind(), "invalid-domain");
    }

    #[test]
    fn get_os_type_is_always_linux() {
        let driver = test_driver(true);
        assert_eq!(driver.get_os_type(), "linux");
    }
}
