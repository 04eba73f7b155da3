//! start command - boot a defined domain

use clap::Parser;
use color_eyre::eyre::{bail, Context};
use color_eyre::Result;
use tracing::info;

use super::connection::HypervisorConnection;

/// Options for starting a domain
#[derive(Debug, Parser)]
pub struct StartOpts {
    /// Name of the domain to start
    pub name: String,
}

/// Start a defined domain; a running domain is an error
pub fn start_domain(conn: &dyn HypervisorConnection, name: &str) -> Result<()> {
    let state = conn
        .domain_state(name)
        .with_context(|| format!("Domain '{}' not found", name))?;
    if state.is_active() {
        bail!("Domain '{}' is already running", name);
    }
    info!("Starting domain '{}'", name);
    conn.start_domain(name)
}

/// Execute the start command
pub fn run(conn: &dyn HypervisorConnection, opts: StartOpts) -> Result<()> {
    start_domain(conn, &opts.name)?;
    println!("Domain '{}' started", opts.name);
    Ok(())
}
