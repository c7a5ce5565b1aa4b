use std::fs;
use std::path::Path;

use super::console::ConsoleLogger;

/// Directory and pid-file bookkeeping shared by the registry and reaper.
pub struct FileSystemUtils;

impl FileSystemUtils {
    pub fn ensure_dir(path: &str) -> Result<(), String> {
        if !Path::new(path).exists() {
            fs::create_dir_all(path).map_err(|e| format!("Failed to create {}: {}", path, e))?;
        }
        Ok(())
    }

    pub fn write_pid_file(path: &str, pid: i32) -> Result<(), String> {
        fs::write(path, pid.to_string()).map_err(|e| format!("Failed to write pid file {}: {}", path, e))
    }

    pub fn read_pid_file(path: &str) -> Option<i32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn remove_if_exists(path: &str) {
        if Path::new(path).exists() {
            if let Err(e) = fs::remove_file(path) {
                ConsoleLogger::warning(&format!("Failed to remove {}: {}", path, e));
            }
        }
    }
}
