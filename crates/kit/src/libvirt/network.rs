//! Virtual networks ("bridges") guests attach to

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use tracing::{debug, info};

use super::connection::{is_already_active, HypervisorConnection};
use super::provision::ProvisionError;
use super::OutputFormat;

/// Generate a random MAC address in the locally administered QEMU/KVM range
pub fn generate_mac() -> String {
    let bytes: [u8; 3] = rand::random();
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        bytes[0] & 0x7f,
        bytes[1],
        bytes[2]
    )
}

/// Make sure a network is running, starting it if needed.
///
/// A network another client started in the meantime counts as success.
pub fn ensure_network_active(
    conn: &dyn HypervisorConnection,
    network: &str,
) -> Result<(), ProvisionError> {
    let failed = |cause| ProvisionError::NetworkActivationFailed {
        network: network.to_string(),
        cause,
    };

    let active = conn.list_networks(false).map_err(failed)?;
    if active.iter().any(|n| n == network) {
        debug!("Network '{}' is already active", network);
        return Ok(());
    }

    let defined = conn.list_networks(true).map_err(failed)?;
    if !defined.iter().any(|n| n == network) {
        return Err(failed(color_eyre::eyre::eyre!(
            "network '{}' is not defined",
            network
        )));
    }

    info!("Starting network '{}'", network);
    match conn.start_network(network) {
        Ok(()) => Ok(()),
        Err(e) if is_already_active(&e) => {
            debug!("Network '{}' was started concurrently", network);
            Ok(())
        }
        Err(e) => Err(failed(e)),
    }
}

/// A network and whether it is running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkEntry {
    /// Network name
    pub name: String,
    /// Whether the network is running
    pub active: bool,
}

/// All defined networks, active ones first
pub fn list_networks(conn: &dyn HypervisorConnection) -> Result<Vec<NetworkEntry>> {
    let active = conn.list_networks(false)?;
    let mut entries: Vec<NetworkEntry> = active
        .iter()
        .map(|name| NetworkEntry {
            name: name.clone(),
            active: true,
        })
        .collect();
    for name in conn.list_networks(true)? {
        if !active.contains(&name) {
            entries.push(NetworkEntry {
                name,
                active: false,
            });
        }
    }
    Ok(entries)
}

/// Options for listing networks
#[derive(Debug, Parser)]
pub struct NetworksOpts {
    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// List networks
pub fn run(conn: &dyn HypervisorConnection, opts: NetworksOpts) -> Result<()> {
    let networks = list_networks(conn).context("Failed to list networks")?;

    match opts.format {
        OutputFormat::Table => {
            if networks.is_empty() {
                println!("No networks defined");
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["NAME", "STATE"]);
            for net in &networks {
                let state = if net.active { "active" } else { "inactive" };
                table.add_row(vec![net.name.as_str(), state]);
            }
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&networks)
                    .with_context(|| "Failed to serialize networks as JSON")?
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libvirt::domain_config::is_valid_mac;
    use crate::libvirt::testing::FakeConnection;

    #[test]
    fn test_generate_mac() {
        for _ in 0..32 {
            let mac = generate_mac();
            assert!(mac.starts_with("52:54:00:"), "{mac}");
            assert!(is_valid_mac(&mac), "{mac}");
        }
    }

    #[test]
    fn test_active_network_untouched() {
        let conn = FakeConnection::new();
        conn.add_network("default", true);
        ensure_network_active(&conn, "default").unwrap();
        assert!(!conn.calls().iter().any(|c| c.starts_with("net-start")));
    }

    #[test]
    fn test_inactive_network_started() {
        let conn = FakeConnection::new();
        conn.add_network("virbr0", false);
        ensure_network_active(&conn, "virbr0").unwrap();
        assert!(conn.network_active("virbr0"));
        assert_eq!(
            conn.calls()
                .iter()
                .filter(|c| c.as_str() == "net-start virbr0")
                .count(),
            1
        );
    }

    #[test]
    fn test_concurrently_started_network_tolerated() {
        let conn = FakeConnection::new();
        conn.add_network("virbr0", false);
        conn.start_races_with_other_client();
        ensure_network_active(&conn, "virbr0").unwrap();
    }

    #[test]
    fn test_unknown_network_fails() {
        let conn = FakeConnection::new();
        let err = ensure_network_active(&conn, "nope").unwrap_err();
        match err {
            ProvisionError::NetworkActivationFailed { network, cause } => {
                assert_eq!(network, "nope");
                assert!(format!("{cause}").contains("not defined"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_start_failure_reported() {
        let conn = FakeConnection::new();
        conn.add_network("virbr0", false);
        conn.fail_on("net-start");
        assert!(matches!(
            ensure_network_active(&conn, "virbr0"),
            Err(ProvisionError::NetworkActivationFailed { .. })
        ));
    }

    #[test]
    fn test_list_networks() {
        let conn = FakeConnection::new();
        conn.add_network("isolated", false);
        conn.add_network("default", true);
        let nets = list_networks(&conn).unwrap();
        assert_eq!(
            nets,
            vec![
                NetworkEntry {
                    name: "default".into(),
                    active: true
                },
                NetworkEntry {
                    name: "isolated".into(),
                    active: false
                },
            ]
        );
    }
}
