// Warnings denied at workspace level via Cargo.toml

use std::sync::Arc;

use lxcd::daemon::Driver;
use lxcd::utils::console::ConsoleLogger;
use lxcd::utils::logger::Logger;

#[tokio::main]
async fn main() {
    Logger::init();

    let driver = match Driver::startup().await {
        Ok(d) => Arc::new(d),
        Err(e) => {
            ConsoleLogger::error_with_context("startup failed", &e);
            std::process::exit(1);
        }
    };

    let _reaper = match driver.install_reaper() {
        Ok(handle) => handle,
        Err(e) => {
            ConsoleLogger::error_with_context("failed to install reaper", &e);
            std::process::exit(1);
        }
    };

    ConsoleLogger::success("lxcd started");

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            ConsoleLogger::error_with_context("failed to register SIGTERM handler", &e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }

    ConsoleLogger::info("shutting down");
    driver.shutdown().await;
}
