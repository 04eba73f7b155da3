//! list command - list domains and their state

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use super::connection::{DomainFilter, HypervisorConnection};
use super::OutputFormat;

/// Options for listing domains
#[derive(Debug, Parser)]
pub struct ListOpts {
    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Show all domains including stopped ones
    #[clap(long, short = 'a', conflicts_with = "inactive")]
    pub all: bool,

    /// Show only defined domains that are not running
    #[clap(long)]
    pub inactive: bool,
}

/// A domain and its state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEntry {
    /// Domain name
    pub name: String,
    /// State as shown to the user
    pub state: String,
}

/// Domains matching `filter` with their current state
pub fn list_domains(
    conn: &dyn HypervisorConnection,
    filter: DomainFilter,
) -> Result<Vec<DomainEntry>> {
    let mut names = conn.list_domains(filter)?;
    names.sort();
    names.dedup();
    names
        .into_iter()
        .map(|name| {
            let state = conn
                .domain_state(&name)
                .with_context(|| format!("Failed to get state of '{}'", name))?;
            Ok(DomainEntry {
                name,
                state: state.to_string(),
            })
        })
        .collect()
}

/// Execute the list command
pub fn run(conn: &dyn HypervisorConnection, opts: ListOpts) -> Result<()> {
    let filter = if opts.all {
        DomainFilter::All
    } else if opts.inactive {
        DomainFilter::Inactive
    } else {
        DomainFilter::Active
    };
    let domains = list_domains(conn, filter).context("Failed to list domains")?;

    match opts.format {
        OutputFormat::Table => {
            if domains.is_empty() {
                match filter {
                    DomainFilter::Active => {
                        println!("No running domains found");
                        println!("Use --all to see stopped domains");
                    }
                    _ => println!("No domains found"),
                }
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["NAME", "STATE"]);
            for domain in &domains {
                table.add_row(vec![&domain.name, &domain.state]);
            }
            println!("{}", table);
            println!(
                "\nFound {} domain{}",
                domains.len(),
                if domains.len() == 1 { "" } else { "s" }
            );
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&domains)
                    .with_context(|| "Failed to serialize domains as JSON")?
            );
        }
    }
    Ok(())
}
