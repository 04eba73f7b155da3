//! Storage pools and guest volumes
//!
//! New guests get a raw volume in the `default` directory pool, which is
//! created on first use.

use camino::Utf8Path;
use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use tracing::{debug, info};

use super::connection::{is_already_active, is_already_exists, HypervisorConnection};
use super::domain::DiskDevice;
use super::provision::ProvisionError;
use super::OutputFormat;
use crate::utils::gib_to_bytes;
use crate::xml_utils::XmlWriter;

/// Pool that new guest volumes are allocated in
pub const DEFAULT_POOL: &str = "default";

/// File suffix of guest volumes
pub const VOLUME_SUFFIX: &str = ".img";

/// XML for a directory-backed pool
pub fn dir_pool_xml(name: &str, path: &Utf8Path) -> Result<String> {
    let mut writer = XmlWriter::new();
    writer.start_element("pool", &[("type", "dir")])?;
    writer.write_text_element("name", name)?;
    writer.start_element("target", &[])?;
    writer.write_text_element("path", path.as_str())?;
    writer.end_element("target")?;
    writer.end_element("pool")?;
    writer.into_string()
}

/// Make sure the `default` pool exists and is running.
///
/// A missing pool is defined at `pool_path`, built, started and marked
/// autostart. A pool defined by another client between the existence check
/// and our define is accepted.
pub fn ensure_default_pool(
    conn: &dyn HypervisorConnection,
    pool_path: &Utf8Path,
) -> Result<(), ProvisionError> {
    ensure_pool(conn, DEFAULT_POOL, pool_path).map_err(ProvisionError::StoragePoolCreationFailed)
}

fn ensure_pool(conn: &dyn HypervisorConnection, name: &str, pool_path: &Utf8Path) -> Result<()> {
    let defined = conn.list_storage_pools(true)?;
    if defined.iter().any(|p| p == name) {
        let active = conn.list_storage_pools(false)?;
        if !active.iter().any(|p| p == name) {
            info!("Starting storage pool '{}'", name);
            start_tolerating_active(conn, name)?;
        }
        return Ok(());
    }

    info!("Creating storage pool '{}' at {}", name, pool_path);
    let xml = dir_pool_xml(name, pool_path)?;
    match conn.define_storage_pool(&xml) {
        Ok(()) => {}
        Err(e) if is_already_exists(&e) => {
            debug!("Storage pool '{}' was defined concurrently", name);
            if conn.list_storage_pools(false)?.iter().all(|p| p != name) {
                start_tolerating_active(conn, name)?;
            }
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    conn.build_storage_pool(name)?;
    start_tolerating_active(conn, name)?;
    conn.set_storage_pool_autostart(name)?;
    Ok(())
}

fn start_tolerating_active(conn: &dyn HypervisorConnection, name: &str) -> Result<()> {
    match conn.start_storage_pool(name) {
        Err(e) if !is_already_active(&e) => Err(e),
        _ => Ok(()),
    }
}

/// First of `<guest>.img`, `<guest>-1.img`, ... not among `existing`
pub fn find_free_name(existing: &[String], guest: &str) -> String {
    let taken = |candidate: &str| existing.iter().any(|e| e == candidate);
    let first = format!("{guest}{VOLUME_SUFFIX}");
    if !taken(&first) {
        return first;
    }
    (1u64..)
        .map(|n| format!("{guest}-{n}{VOLUME_SUFFIX}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(first)
}

/// Allocate a new raw volume for `guest` in the default pool
pub fn allocate_guest_volume(
    conn: &dyn HypervisorConnection,
    guest: &str,
    size_gib: u64,
) -> Result<DiskDevice, ProvisionError> {
    let existing = conn
        .list_volumes(DEFAULT_POOL)
        .map_err(ProvisionError::VolumeAllocationFailed)?;
    let name = find_free_name(&existing, guest);
    let bytes = gib_to_bytes(size_gib).map_err(ProvisionError::VolumeAllocationFailed)?;
    info!("Allocating {} GiB volume '{}'", size_gib, name);
    let path = conn
        .create_volume(DEFAULT_POOL, &name, bytes)
        .map_err(ProvisionError::VolumeAllocationFailed)?;
    Ok(DiskDevice { path, size_gib })
}

/// A pool with its state and target path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolEntry {
    /// Pool name
    pub name: String,
    /// Whether the pool is running
    pub active: bool,
    /// Target path, when the pool reports one
    pub path: Option<String>,
}

/// All defined pools
pub fn list_pools(conn: &dyn HypervisorConnection) -> Result<Vec<PoolEntry>> {
    let active = conn.list_storage_pools(false)?;
    conn.list_storage_pools(true)?
        .into_iter()
        .map(|name| {
            let path = match conn.storage_pool_path(&name) {
                Ok(p) => Some(p.into_string()),
                Err(e) => {
                    debug!("No target path for pool '{}': {e:#}", name);
                    None
                }
            };
            Ok(PoolEntry {
                active: active.contains(&name),
                name,
                path,
            })
        })
        .collect()
}

/// Options for listing storage pools
#[derive(Debug, Parser)]
pub struct PoolsOpts {
    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// List storage pools
pub fn run(conn: &dyn HypervisorConnection, opts: PoolsOpts) -> Result<()> {
    let pools = list_pools(conn).context("Failed to list storage pools")?;

    match opts.format {
        OutputFormat::Table => {
            if pools.is_empty() {
                println!("No storage pools defined");
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["NAME", "STATE", "PATH"]);
            for pool in &pools {
                let state = if pool.active { "active" } else { "inactive" };
                table.add_row(vec![
                    pool.name.as_str(),
                    state,
                    pool.path.as_deref().unwrap_or("-"),
                ]);
            }
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&pools)
                    .with_context(|| "Failed to serialize storage pools as JSON")?
            );
        }
    }
    Ok(())
}

/// Size of a volume in GiB
pub fn volume_size_gib(conn: &dyn HypervisorConnection, pool: &str, volume: &str) -> Result<f64> {
    let info = conn
        .volume_info(pool, volume)
        .with_context(|| format!("Volume '{}' not found in pool '{}'", volume, pool))?;
    Ok(info.capacity_gib())
}
