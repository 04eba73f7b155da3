//! libvirt domain provisioning and management
//!
//! Everything talks to the hypervisor through [`connection::HypervisorConnection`];
//! the production implementation shells out to `virsh`.
//!
//! - `create`: provision a new domain and start its installer
//! - `list`, `start`, `destroy`, `undefine`: domain lifecycle
//! - `pools`, `list-volumes`, `volume-size`: storage
//! - `networks`: virtual networks
//! - `virt-types`: virtualization types and architectures

use clap::{Subcommand, ValueEnum};
use color_eyre::Result;

use crate::settings::Settings;

pub mod capabilities;
pub mod connection;
pub mod create;
pub mod destroy;
pub mod domain;
pub mod domain_config;
pub mod installer;
pub mod list;
pub mod list_volumes;
pub mod network;
pub mod provision;
pub mod start;
pub mod storage;
pub mod undefine;

#[cfg(test)]
pub(crate) mod testing;

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable table
    Table,
    /// JSON document
    Json,
}

/// Domain and resource management subcommands
#[derive(Debug, Subcommand)]
pub enum LibvirtSubcommands {
    /// Provision a new domain and start its installation
    Create(create::CreateOpts),

    /// List domains with their state
    List(list::ListOpts),

    /// Start a defined domain
    Start(start::StartOpts),

    /// Forcefully stop a running domain
    Destroy(destroy::DestroyOpts),

    /// Remove a domain definition
    Undefine(undefine::UndefineOpts),

    /// List storage pools
    Pools(storage::PoolsOpts),

    /// List storage volumes
    #[clap(name = "list-volumes")]
    ListVolumes(list_volumes::ListVolumesOpts),

    /// Show the capacity of a storage volume
    #[clap(name = "volume-size")]
    VolumeSize(list_volumes::VolumeSizeOpts),

    /// List virtual networks
    Networks(network::NetworksOpts),

    /// List virtualization types and architectures
    #[clap(name = "virt-types")]
    VirtTypes(capabilities::VirtTypesOpts),
}

impl LibvirtSubcommands {
    /// Run the subcommand against `conn`
    pub fn run(self, conn: &dyn connection::HypervisorConnection, settings: &Settings) -> Result<()> {
        match self {
            LibvirtSubcommands::Create(opts) => create::run(conn, settings, opts),
            LibvirtSubcommands::List(opts) => list::run(conn, opts),
            LibvirtSubcommands::Start(opts) => start::run(conn, opts),
            LibvirtSubcommands::Destroy(opts) => destroy::run(conn, opts),
            LibvirtSubcommands::Undefine(opts) => undefine::run(conn, opts),
            LibvirtSubcommands::Pools(opts) => storage::run(conn, opts),
            LibvirtSubcommands::ListVolumes(opts) => list_volumes::run(conn, opts),
            LibvirtSubcommands::VolumeSize(opts) => list_volumes::run_size(conn, opts),
            LibvirtSubcommands::Networks(opts) => network::run(conn, opts),
            LibvirtSubcommands::VirtTypes(opts) => capabilities::run(conn, opts),
        }
    }
}
