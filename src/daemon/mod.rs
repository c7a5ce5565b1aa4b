// Daemon modules
pub mod capability;
pub mod driver;
pub mod handshake;
pub mod launcher;
pub mod pty;
pub mod reaper;
pub mod registry;

pub use capability::{CapabilityProbe, Capabilities};
pub use driver::{Driver, DomainInfo};
pub use launcher::ContainerLauncher;
pub use reaper::Reaper;
pub use registry::{ContainerState, DomainRecord, DomainRegistry, RuntimeRecord};
