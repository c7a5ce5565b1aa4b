// CLI module organization (A5): a clap-derived command set exposing the
// dispatch surface from SPEC_FULL.md §6 against an in-process driver instance.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lxc-cli", about = "Command-line front end for the lxc container driver")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a container definition from a JSON file
    Define { path: String },
    /// Remove an inactive definition
    Undefine { uuid: String },
    /// Start a previously defined container
    Start { uuid: String },
    /// Define and start a container definition in one step
    CreateAndStart { path: String },
    /// Kill and reap a running container
    Destroy { uuid: String },
    /// Send SIGINT to a running container's root process
    ShutdownGraceful { uuid: String },
    /// Look up a domain by its runtime id
    LookupId { id: i32 },
    /// Look up a domain by uuid
    LookupUuid { uuid: String },
    /// Look up a domain by name
    LookupName { name: String },
    /// List active runtime ids
    ListActive {
        #[arg(default_value_t = 0)]
        limit: usize,
    },
    /// List inactive definition names
    ListInactive {
        #[arg(default_value_t = 0)]
        limit: usize,
    },
    /// Report current state, memory, and vcpu count for a domain
    Info { uuid: String },
    /// Dump a domain's persisted JSON definition
    Dump { uuid: String },
}
