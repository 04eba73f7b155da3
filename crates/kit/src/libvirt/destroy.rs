//! destroy command - hard power off a running domain

use clap::Parser;
use color_eyre::eyre::{bail, Context};
use color_eyre::Result;
use tracing::info;

use super::connection::HypervisorConnection;

/// Options for destroying a domain
#[derive(Debug, Parser)]
pub struct DestroyOpts {
    /// Name of the domain to power off
    pub name: String,
}

/// Power off a running domain; a stopped domain is an error
pub fn destroy_domain(conn: &dyn HypervisorConnection, name: &str) -> Result<()> {
    let state = conn
        .domain_state(name)
        .with_context(|| format!("Domain '{}' not found", name))?;
    if !state.is_active() {
        bail!("Domain '{}' is not running (state: {})", name, state);
    }
    info!("Destroying domain '{}'", name);
    conn.destroy_domain(name)
}

/// Execute the destroy command
pub fn run(conn: &dyn HypervisorConnection, opts: DestroyOpts) -> Result<()> {
    destroy_domain(conn, &opts.name)?;
    println!("Domain '{}' destroyed", opts.name);
    Ok(())
}
