//! undefine command - remove a domain definition
//!
//! Storage volumes are left alone; the same volume may be attached to a new
//! domain later.

use clap::Parser;
use color_eyre::eyre::{bail, Context};
use color_eyre::Result;
use tracing::info;

use super::connection::HypervisorConnection;

/// Options for undefining a domain
#[derive(Debug, Parser)]
pub struct UndefineOpts {
    /// Name of the domain to undefine
    pub name: String,

    /// Power off the domain first if it is running
    #[clap(long, short = 'f')]
    pub force: bool,
}

/// Undefine a domain, destroying it first when `force` is set
pub fn undefine_domain(conn: &dyn HypervisorConnection, name: &str, force: bool) -> Result<()> {
    let state = conn
        .domain_state(name)
        .with_context(|| format!("Domain '{}' not found", name))?;
    if state.is_active() {
        if !force {
            bail!(
                "Domain '{}' is running. Destroy it first or use --force.",
                name
            );
        }
        info!("Destroying running domain '{}' before undefining", name);
        conn.destroy_domain(name)
            .with_context(|| format!("Failed to stop '{}' before undefining", name))?;
    }
    info!("Undefining domain '{}'", name);
    conn.undefine_domain(name)
}

/// Execute the undefine command
pub fn run(conn: &dyn HypervisorConnection, opts: UndefineOpts) -> Result<()> {
    undefine_domain(conn, &opts.name, opts.force)?;
    println!("Domain '{}' undefined", opts.name);
    Ok(())
}
