use std::process::Command;

/// Result of a shelled-out command, mirroring the fields callers actually inspect:
/// whether it succeeded, and both output streams for diagnostics.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs host-level network and bridge-control tooling (`ip`, `bridge`) via the shell.
/// The networking components (C2/C3) talk to the kernel exclusively through this,
/// rather than a netlink client library, matching how this codebase has always done it.
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn execute_shell(command: &str) -> Result<ExecutionResult, String> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| format!("Failed to spawn shell for '{}': {}", command, e))?;

        Ok(ExecutionResult {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    pub fn execute(program: &str, args: &[&str]) -> Result<ExecutionResult, String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| format!("Failed to spawn '{}': {}", program, e))?;

        Ok(ExecutionResult {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
