// Warnings denied at workspace level via Cargo.toml

pub mod config;
pub mod daemon;
pub mod definition;
pub mod error;
pub mod network;
pub mod utils;
