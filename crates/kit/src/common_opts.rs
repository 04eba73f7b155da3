//! Common CLI options shared by the domain creation paths

use clap::Parser;

pub const DEFAULT_MEMORY_USER_STR: &str = "1G";
pub const DEFAULT_CPUS: u32 = 1;
pub const DEFAULT_DISK_SIZE: &str = "8G";
pub const DEFAULT_NETWORK: &str = "default";

/// Memory size options
#[derive(Parser, Debug, Clone, Default)]
pub struct MemoryOpts {
    #[clap(long, help = "Memory size (e.g. 1G, 2048M, or plain number for MiB)")]
    pub memory: Option<String>,
}

/// CPU count options
#[derive(Parser, Debug, Clone, Default)]
pub struct CpuOpts {
    #[clap(long, help = "Number of virtual CPUs")]
    pub cpus: Option<u32>,
}

/// Disk size options
#[derive(Parser, Debug, Clone, Default)]
pub struct DiskSizeOpts {
    #[clap(
        long,
        help = "Disk size (e.g. 20G, 10240M, or plain number for GiB)"
    )]
    pub disk_size: Option<String>,

    /// Create the domain without any disk
    #[clap(long, conflicts_with = "disk_size")]
    pub no_disk: bool,
}

/// Network options
#[derive(Parser, Debug, Clone, Default)]
pub struct NetworkOpts {
    #[clap(long, help = "libvirt network (bridge) to attach the guest to")]
    pub network: Option<String>,

    /// MAC address for the guest interface (random 52:54:00 address if unset)
    #[clap(long)]
    pub mac: Option<String>,
}
