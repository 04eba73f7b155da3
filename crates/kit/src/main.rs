use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};

use nodeadmin::console::{self, ConsoleOpts};
use nodeadmin::libvirt::connection::VirshConnection;
use nodeadmin::libvirt::LibvirtSubcommands;
use nodeadmin::settings::Settings;

/// Provision and manage libvirt virtual machines.
///
/// Run without a subcommand to open the interactive console.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Hypervisor connection URI (e.g. qemu:///system, test:///default)
    #[clap(long, short = 'c', global = true)]
    connect: Option<String>,

    /// Settings file (default: $XDG_CONFIG_HOME/nodeadmin/config.toml)
    #[clap(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive console
    Console(ConsoleOpts),

    #[command(flatten)]
    Libvirt(LibvirtSubcommands),
}

/// Install and configure the tracing/logging system.
///
/// Logs go to stderr, filtered by RUST_LOG and defaulting to 'info'.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.connect.is_some() {
        settings.connect = cli.connect;
    }
    let conn = VirshConnection::new(settings.connect.clone());

    match cli.command {
        None => console::run(&conn, &settings, ConsoleOpts::default())?,
        Some(Commands::Console(opts)) => console::run(&conn, &settings, opts)?,
        Some(Commands::Libvirt(cmd)) => cmd.run(&conn, &settings)?,
    }
    tracing::debug!("exiting");
    Ok(())
}
