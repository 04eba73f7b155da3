//! List storage volumes across pools

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use tracing::warn;

use super::connection::{HypervisorConnection, VolumeInfo};
use super::storage::{volume_size_gib, DEFAULT_POOL};
use super::OutputFormat;

/// Options for listing volumes
#[derive(Debug, Parser)]
pub struct ListVolumesOpts {
    /// Only list volumes in this pool (default: every active pool)
    #[clap(long)]
    pub pool: Option<String>,

    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// Options for showing the size of a volume
#[derive(Debug, Parser)]
pub struct VolumeSizeOpts {
    /// Volume name
    pub name: String,

    /// Pool containing the volume
    #[clap(long, default_value = DEFAULT_POOL)]
    pub pool: String,
}

/// Volumes of the given pools; volumes that cannot be inspected are skipped
pub fn list_volumes(conn: &dyn HypervisorConnection, pools: &[String]) -> Result<Vec<VolumeInfo>> {
    let mut volumes = Vec::new();
    for pool in pools {
        let names = conn
            .list_volumes(pool)
            .with_context(|| format!("Failed to list volumes in pool '{}'", pool))?;
        for name in names {
            match conn.volume_info(pool, &name) {
                Ok(info) => volumes.push(info),
                Err(e) => warn!("Skipping volume '{}' in pool '{}': {e:#}", name, pool),
            }
        }
    }
    Ok(volumes)
}

/// Execute the list-volumes command
pub fn run(conn: &dyn HypervisorConnection, opts: ListVolumesOpts) -> Result<()> {
    let pools = match opts.pool {
        Some(ref pool) => vec![pool.clone()],
        None => conn
            .list_storage_pools(false)
            .context("Failed to list storage pools")?,
    };
    let volumes = list_volumes(conn, &pools)?;

    match opts.format {
        OutputFormat::Table => {
            if volumes.is_empty() {
                println!("No volumes found");
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["NAME", "POOL", "SIZE", "PATH"]);
            for volume in &volumes {
                let size = indicatif::BinaryBytes(volume.capacity).to_string();
                table.add_row(vec![&volume.name, &volume.pool, &size, &volume.path]);
            }
            println!("{}", table);
            println!(
                "\nFound {} volume{}",
                volumes.len(),
                if volumes.len() == 1 { "" } else { "s" }
            );
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&volumes)
                    .with_context(|| "Failed to serialize volumes as JSON")?
            );
        }
    }
    Ok(())
}

/// Execute the volume-size command
pub fn run_size(conn: &dyn HypervisorConnection, opts: VolumeSizeOpts) -> Result<()> {
    let gib = volume_size_gib(conn, &opts.pool, &opts.name)?;
    println!("{:.2} GiB", gib);
    Ok(())
}
