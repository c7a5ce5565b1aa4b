use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DriverResult;
use crate::utils::console::ConsoleLogger;

const DEFAULT_CONFIG_DIR: &str = "/etc/lxcd";
const DEFAULT_STATE_DIR: &str = "/run/lxcd";
const DEFAULT_BRIDGE_NAME: &str = "lxcbr0";

/// Driver-wide configuration: where definitions and pid files live, and the
/// default bridge new bridged interfaces attach to when a definition doesn't
/// name one explicitly. Resolved at `startup()` from the environment, then
/// optionally overridden by a JSON file under the config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub default_bridge: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            default_bridge: DEFAULT_BRIDGE_NAME.to_string(),
        }
    }
}

impl DriverConfig {
    /// Resolves configuration the way this codebase resolves every other directory:
    /// environment variables with built-in defaults, no required config file.
    pub fn load() -> DriverResult<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("LXCD_CONFIG_DIR") {
            config.config_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("LXCD_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(bridge) = std::env::var("LXCD_DEFAULT_BRIDGE") {
            config.default_bridge = bridge;
        }

        let override_path = config.config_dir.join("lxcd.json");
        if override_path.exists() {
            match fs::read_to_string(&override_path) {
                Ok(contents) => match serde_json::from_str::<ConfigOverrides>(&contents) {
                    Ok(overrides) => overrides.apply(&mut config),
                    Err(e) => ConsoleLogger::warning(&format!(
                        "Ignoring malformed config file {}: {}",
                        override_path.display(),
                        e
                    )),
                },
                Err(e) => ConsoleLogger::warning(&format!(
                    "Could not read config file {}: {}",
                    override_path.display(),
                    e
                )),
            }
        }

        Ok(config)
    }

    pub fn definition_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.json", name))
    }

    pub fn tty_pid_path(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!("{}.tty.pid", name))
    }

    pub fn ensure_directories(&self) -> DriverResult<()> {
        for dir in [&self.config_dir, &self.state_dir] {
            if !Path::new(dir).exists() {
                fs::create_dir_all(dir)
                    .map_err(|e| format!("Failed to create directory {}: {}", dir.display(), e))?;
            }
        }
        Ok(())
    }
}

/// Fields an on-disk config file may override; only environment variables that
/// were *not* set take the file's value, so an explicit environment variable
/// always wins (§8, ambient-stack property 8).
#[derive(Debug, Deserialize)]
struct ConfigOverrides {
    config_dir: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    default_bridge: Option<String>,
}

impl ConfigOverrides {
    fn apply(self, config: &mut DriverConfig) {
        if std::env::var("LXCD_CONFIG_DIR").is_err() {
            if let Some(dir) = self.config_dir {
                config.config_dir = dir;
            }
        }
        if std::env::var("LXCD_STATE_DIR").is_err() {
            if let Some(dir) = self.state_dir {
                config.state_dir = dir;
            }
        }
        if std::env::var("LXCD_DEFAULT_BRIDGE").is_err() {
            if let Some(bridge) = self.default_bridge {
                config.default_bridge = bridge;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        std::env::remove_var("LXCD_CONFIG_DIR");
        std::env::remove_var("LXCD_STATE_DIR");
        std::env::remove_var("LXCD_DEFAULT_BRIDGE");
        let config = DriverConfig::load().unwrap();
        assert_eq!(config.default_bridge, DEFAULT_BRIDGE_NAME);
        assert_eq!(config.config_dir, PathBuf::from(DEFAULT_CONFIG_DIR));
    }

    #[test]
    fn environment_override_takes_precedence() {
        std::env::set_var("LXCD_DEFAULT_BRIDGE", "testbr0");
        let config = DriverConfig::load().unwrap();
        assert_eq!(config.default_bridge, "testbr0");
        std::env::remove_var("LXCD_DEFAULT_BRIDGE");
    }

    #[test]
    fn definition_and_pid_paths_are_namespaced_by_name() {
        let config = DriverConfig::default();
        assert_eq!(
            config.definition_path("c1"),
            config.config_dir.join("c1.json")
        );
        assert_eq!(
            config.tty_pid_path("c1"),
            config.state_dir.join("c1.tty.pid")
        );
    }
}
