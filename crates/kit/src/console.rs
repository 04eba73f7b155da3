//! Interactive text console
//!
//! A menu loop over the same operations the subcommands expose. Failures are
//! printed and the menu comes back; only a broken terminal ends the loop.

use clap::Parser;
use color_eyre::{eyre::Context as _, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, FuzzySelect, Input, Select};
use strum::IntoEnumIterator;

use crate::libvirt::capabilities::Capabilities;
use crate::libvirt::connection::{DomainFilter, HypervisorConnection};
use crate::libvirt::domain_config::{
    is_valid_domain_name, is_valid_mac, DomainConfiguration, InstallKind, InstallLocator,
    InstallSource, GENERIC_OS, OS_VARIANTS,
};
use crate::libvirt::installer::HttpFetcher;
use crate::libvirt::provision::DomainProvisioner;
use crate::libvirt::{
    destroy, list, list_volumes, network, start, storage, undefine, OutputFormat,
};
use crate::progress::BarProgress;
use crate::settings::Settings;
use crate::utils::{parse_disk_size_to_gib, parse_memory_to_mb};

/// Options for the interactive console
#[derive(Debug, Default, Parser)]
pub struct ConsoleOpts {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
enum MenuAction {
    Create,
    Start,
    Destroy,
    Undefine,
    ListDomains,
    ListPools,
    ListVolumes,
    ListNetworks,
    Exit,
}

impl MenuAction {
    fn label(&self) -> &'static str {
        match self {
            MenuAction::Create => "Create a new domain",
            MenuAction::Start => "Start a domain",
            MenuAction::Destroy => "Destroy a running domain",
            MenuAction::Undefine => "Undefine a domain",
            MenuAction::ListDomains => "List domains",
            MenuAction::ListPools => "List storage pools",
            MenuAction::ListVolumes => "List storage volumes",
            MenuAction::ListNetworks => "List networks",
            MenuAction::Exit => "Exit",
        }
    }
}

/// Run the console until the user picks "Exit"
pub fn run(conn: &dyn HypervisorConnection, settings: &Settings, _opts: ConsoleOpts) -> Result<()> {
    let theme = ColorfulTheme::default();
    let actions: Vec<MenuAction> = MenuAction::iter().collect();
    let labels: Vec<&str> = actions.iter().map(|a| a.label()).collect();

    println!(
        "nodeadmin console ({})\n",
        conn.uri().unwrap_or("default connection")
    );
    loop {
        let selection = Select::with_theme(&theme)
            .with_prompt("What would you like to do?")
            .items(&labels)
            .default(0)
            .interact()
            .context("Failed to read menu selection")?;

        let result = match actions[selection] {
            MenuAction::Create => create_wizard(conn, settings, &theme),
            MenuAction::Start => pick_domain(conn, &theme, DomainFilter::Inactive, "start")
                .and_then(|name| match name {
                    Some(name) => start::start_domain(conn, &name),
                    None => Ok(()),
                }),
            MenuAction::Destroy => pick_domain(conn, &theme, DomainFilter::Active, "destroy")
                .and_then(|name| match name {
                    Some(name) => destroy::destroy_domain(conn, &name),
                    None => Ok(()),
                }),
            MenuAction::Undefine => undefine_prompt(conn, &theme),
            MenuAction::ListDomains => list::run(
                conn,
                list::ListOpts {
                    format: OutputFormat::Table,
                    all: true,
                    inactive: false,
                },
            ),
            MenuAction::ListPools => storage::run(
                conn,
                storage::PoolsOpts {
                    format: OutputFormat::Table,
                },
            ),
            MenuAction::ListVolumes => list_volumes::run(
                conn,
                list_volumes::ListVolumesOpts {
                    pool: None,
                    format: OutputFormat::Table,
                },
            ),
            MenuAction::ListNetworks => network::run(
                conn,
                network::NetworksOpts {
                    format: OutputFormat::Table,
                },
            ),
            MenuAction::Exit => return Ok(()),
        };

        if let Err(e) = result {
            eprintln!("Error: {e:#}");
        }
        println!();
    }
}

/// Offer the domains matching `filter`; `None` when there are none or the
/// user backs out.
fn pick_domain(
    conn: &dyn HypervisorConnection,
    theme: &ColorfulTheme,
    filter: DomainFilter,
    verb: &str,
) -> Result<Option<String>> {
    let names: Vec<String> = list::list_domains(conn, filter)?
        .into_iter()
        .map(|d| d.name)
        .collect();
    if names.is_empty() {
        println!("No domains available to {verb}");
        return Ok(None);
    }
    let selection = FuzzySelect::with_theme(theme)
        .with_prompt(format!("Domain to {verb} (Esc to cancel)"))
        .items(&names)
        .default(0)
        .interact_opt()
        .context("Failed to select domain")?;
    Ok(selection.map(|i| names[i].clone()))
}

fn undefine_prompt(conn: &dyn HypervisorConnection, theme: &ColorfulTheme) -> Result<()> {
    let Some(name) = pick_domain(conn, theme, DomainFilter::All, "undefine")? else {
        return Ok(());
    };
    let running = conn.domain_state(&name)?.is_active();
    let prompt = if running {
        format!("'{name}' is running. Destroy and undefine it?")
    } else {
        format!("Undefine '{name}'?")
    };
    let confirmed = Confirm::with_theme(theme)
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to get confirmation")?;
    if confirmed {
        undefine::undefine_domain(conn, &name, running)?;
    }
    Ok(())
}

/// Check a proposed domain name against the naming rules and existing domains
fn check_new_name(name: &str, existing: &[String]) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("A name is required".into());
    }
    if !is_valid_domain_name(name) {
        return Err("Use letters, digits, '-', '_' and '.' only".into());
    }
    if existing.iter().any(|e| e == name) {
        return Err(format!("A domain named '{name}' already exists"));
    }
    Ok(())
}

fn check_memory(value: &str) -> Result<(), String> {
    match parse_memory_to_mb(value) {
        Ok(0) => Err("Memory must be greater than zero".into()),
        Ok(_) => Ok(()),
        Err(e) => Err(format!("{e:#}")),
    }
}

fn check_disk_size(value: &str) -> Result<(), String> {
    match parse_disk_size_to_gib(value) {
        Ok(0) => Err("Disk size must be at least 1 GiB".into()),
        Ok(_) => Ok(()),
        Err(e) => Err(format!("{e:#}")),
    }
}

fn check_required(value: &str, what: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{what} is required"))
    } else {
        Ok(())
    }
}

/// Variants listed for an OS type
fn variants_for(os_type: &str) -> &'static [&'static str] {
    OS_VARIANTS
        .iter()
        .find(|(t, _)| *t == os_type)
        .map(|(_, v)| *v)
        .unwrap_or(&[GENERIC_OS])
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn create_wizard(
    conn: &dyn HypervisorConnection,
    settings: &Settings,
    theme: &ColorfulTheme,
) -> Result<()> {
    let defaults = &settings.defaults;
    let existing = conn.list_domains(DomainFilter::All)?;

    println!("Create a new domain\n");

    let name: String = Input::with_theme(theme)
        .with_prompt("Domain name")
        .validate_with(|input: &String| check_new_name(input, &existing))
        .interact_text()
        .context("Failed to read domain name")?;

    // Virtualization type
    let caps = Capabilities::query(conn)?;
    let virt_types = caps.virt_types();
    let virt_type = if virt_types.is_empty() {
        None
    } else {
        let labels: Vec<String> = virt_types
            .iter()
            .map(|v| format!("{} ({})", v.label, v.arch))
            .collect();
        let preferred = defaults
            .virt_type
            .clone()
            .or_else(|| caps.default_virt_type().map(|v| v.label));
        let default_index = preferred
            .and_then(|p| virt_types.iter().position(|v| v.label == p))
            .unwrap_or(0);
        let i = Select::with_theme(theme)
            .with_prompt("Virtualization type")
            .items(&labels)
            .default(default_index)
            .interact()
            .context("Failed to select virtualization type")?;
        Some(virt_types[i].label.clone())
    };

    // Operating system
    let os_types: Vec<&str> = OS_VARIANTS.iter().map(|(t, _)| *t).collect();
    let i = Select::with_theme(theme)
        .with_prompt("OS type")
        .items(&os_types)
        .default(os_types.len() - 1)
        .interact()
        .context("Failed to select OS type")?;
    let os_type = os_types[i].to_string();
    let variants = variants_for(&os_type);
    let i = FuzzySelect::with_theme(theme)
        .with_prompt("OS variant (type to filter)")
        .items(variants)
        .default(variants.len() - 1)
        .interact()
        .context("Failed to select OS variant")?;
    let os_variant = variants[i].to_string();

    // Install source
    let kinds: Vec<InstallKind> = InstallKind::iter().collect();
    let descriptions: Vec<&str> = kinds.iter().map(|k| k.description()).collect();
    let i = Select::with_theme(theme)
        .with_prompt("Installation method")
        .items(&descriptions)
        .default(0)
        .interact()
        .context("Failed to select installation method")?;
    let kind = kinds[i];
    let locator = prompt_locator(theme, kind)?;
    let install_source = InstallSource::from_kind(Some(kind), locator)?;

    // Resources
    let memory: String = Input::with_theme(theme)
        .with_prompt("Memory (e.g. 2G, 2048M)")
        .default(defaults.memory.clone())
        .validate_with(|input: &String| check_memory(input))
        .interact_text()
        .context("Failed to read memory size")?;
    let cpus: u32 = Input::with_theme(theme)
        .with_prompt("Virtual CPUs")
        .default(defaults.cpus)
        .validate_with(|input: &u32| {
            if *input > 0 {
                Ok(())
            } else {
                Err("At least one CPU is required")
            }
        })
        .interact_text()
        .context("Failed to read CPU count")?;

    // Networking
    let networks: Vec<String> = network::list_networks(conn)?
        .into_iter()
        .map(|n| n.name)
        .collect();
    let network_bridge = if networks.is_empty() {
        Input::with_theme(theme)
            .with_prompt("Network")
            .default(defaults.network.clone())
            .interact_text()
            .context("Failed to read network name")?
    } else {
        let default_index = networks
            .iter()
            .position(|n| *n == defaults.network)
            .unwrap_or(0);
        let i = Select::with_theme(theme)
            .with_prompt("Network")
            .items(&networks)
            .default(default_index)
            .interact()
            .context("Failed to select network")?;
        networks[i].clone()
    };
    let fixed_mac = Confirm::with_theme(theme)
        .with_prompt("Set a fixed MAC address?")
        .default(false)
        .interact()
        .context("Failed to get confirmation")?;
    let mac_address = if fixed_mac {
        let mac: String = Input::with_theme(theme)
            .with_prompt("MAC address")
            .validate_with(|input: &String| {
                if is_valid_mac(input) {
                    Ok(())
                } else {
                    Err("Expected a unicast address like 52:54:00:12:34:56")
                }
            })
            .interact_text()
            .context("Failed to read MAC address")?;
        Some(mac)
    } else {
        None
    };

    // Storage
    let enable_storage = Confirm::with_theme(theme)
        .with_prompt("Attach a disk?")
        .default(true)
        .interact()
        .context("Failed to get confirmation")?;
    let mut use_local_storage = true;
    let mut storage_size_gib = parse_disk_size_to_gib(&defaults.disk_size)?;
    let mut existing_volume = None;
    if enable_storage {
        let choice = Select::with_theme(theme)
            .with_prompt("Disk")
            .items(&[
                "Allocate a new volume in the default pool",
                "Use an existing volume or disk path",
            ])
            .default(0)
            .interact()
            .context("Failed to select disk option")?;
        use_local_storage = choice == 0;
        if use_local_storage {
            let size: String = Input::with_theme(theme)
                .with_prompt("Disk size (e.g. 20G)")
                .default(defaults.disk_size.clone())
                .validate_with(|input: &String| check_disk_size(input))
                .interact_text()
                .context("Failed to read disk size")?;
            storage_size_gib = parse_disk_size_to_gib(&size)?;
        } else {
            let path: String = Input::with_theme(theme)
                .with_prompt("Volume path")
                .validate_with(|input: &String| check_required(input, "A path"))
                .interact_text()
                .context("Failed to read volume path")?;
            existing_volume = Some(path);
        }
    }

    let config = DomainConfiguration {
        name,
        install_source: Some(install_source),
        cpus,
        memory_mb: parse_memory_to_mb(&memory)?,
        virt_type,
        os_type,
        os_variant,
        network_bridge,
        mac_address,
        enable_storage,
        use_local_storage,
        storage_size_gib,
        existing_volume,
    };
    config.validate()?;

    println!("\n{}", summarize(&config));
    let proceed = Confirm::with_theme(theme)
        .with_prompt("Create this domain?")
        .default(true)
        .interact()
        .context("Failed to get confirmation")?;
    if !proceed {
        println!("Cancelled");
        return Ok(());
    }

    let fetcher = HttpFetcher;
    let provisioner = DomainProvisioner::new(conn, &settings.paths, &fetcher);
    let mut progress = BarProgress::new();
    let handle = provisioner.provision(&config, &mut progress)?;
    println!("Domain '{}' created (UUID {})", handle.name, handle.uuid);
    Ok(())
}

fn prompt_locator(theme: &ColorfulTheme, kind: InstallKind) -> Result<InstallLocator> {
    let mut locator = InstallLocator::default();
    match kind {
        InstallKind::Local => {
            let media: String = Input::with_theme(theme)
                .with_prompt("CD-ROM device or ISO path")
                .validate_with(|input: &String| check_required(input, "A media path"))
                .interact_text()
                .context("Failed to read media path")?;
            locator.media = Some(media);
        }
        InstallKind::Live => {
            let iso: String = Input::with_theme(theme)
                .with_prompt("Live ISO path")
                .validate_with(|input: &String| check_required(input, "An ISO path"))
                .interact_text()
                .context("Failed to read ISO path")?;
            locator.iso_path = Some(iso);
        }
        InstallKind::Network => {
            let url: String = Input::with_theme(theme)
                .with_prompt("Install tree URL")
                .validate_with(|input: &String| check_required(input, "A URL"))
                .interact_text()
                .context("Failed to read install URL")?;
            locator.url = Some(url);
            let kickstart: String = Input::with_theme(theme)
                .with_prompt("Kickstart URL (optional)")
                .allow_empty(true)
                .interact_text()
                .context("Failed to read kickstart URL")?;
            locator.kickstart_url = non_empty(kickstart);
            let kernel_args: String = Input::with_theme(theme)
                .with_prompt("Extra kernel arguments (optional)")
                .allow_empty(true)
                .interact_text()
                .context("Failed to read kernel arguments")?;
            locator.kernel_args = non_empty(kernel_args);
        }
        InstallKind::Pxe => {}
    }
    Ok(locator)
}

/// One line per setting, shown before the user confirms
fn summarize(config: &DomainConfiguration) -> String {
    let source = match &config.install_source {
        Some(source) => match source.location() {
            Some(location) => format!("{} ({})", source.kind(), location),
            None => source.kind().to_string(),
        },
        None => "none".to_string(),
    };
    let disk = if !config.enable_storage {
        "none".to_string()
    } else if config.use_local_storage {
        format!("new {} GiB volume", config.storage_size_gib)
    } else {
        config.existing_volume.clone().unwrap_or_default()
    };
    let lines = [
        ("Name", config.name.clone()),
        ("Install", source),
        (
            "Virt type",
            config
                .virt_type
                .clone()
                .unwrap_or_else(|| "hypervisor default".into()),
        ),
        ("OS", format!("{} / {}", config.os_type, config.os_variant)),
        ("Memory", format!("{} MiB", config.memory_mb)),
        ("CPUs", config.cpus.to_string()),
        ("Network", config.network_bridge.clone()),
        (
            "MAC",
            config
                .mac_address
                .clone()
                .unwrap_or_else(|| "generated".into()),
        ),
        ("Disk", disk),
    ];
    lines
        .iter()
        .map(|(k, v)| format!("{:<10} {}", format!("{k}:"), v))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_new_name() {
        let existing = vec!["web01".to_string()];
        assert!(check_new_name("web02", &existing).is_ok());
        assert!(check_new_name("", &existing).is_err());
        assert!(check_new_name("   ", &existing).is_err());
        assert!(check_new_name("bad name", &existing).is_err());
        let err = check_new_name("web01", &existing).unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_check_sizes() {
        assert!(check_memory("2G").is_ok());
        assert!(check_memory("512").is_ok());
        assert!(check_memory("0").is_err());
        assert!(check_memory("lots").is_err());
        assert!(check_disk_size("20G").is_ok());
        assert!(check_disk_size("0G").is_err());
    }

    #[test]
    fn test_variants_for() {
        assert!(variants_for("windows").contains(&"win11"));
        assert_eq!(variants_for("beos"), &[GENERIC_OS]);
        for (_, variants) in OS_VARIANTS {
            assert_eq!(variants.last(), Some(&GENERIC_OS));
        }
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  ".into()), None);
        assert_eq!(non_empty(" ks ".into()), Some("ks".into()));
    }

    #[test]
    fn test_menu_ends_with_exit() {
        let actions: Vec<MenuAction> = MenuAction::iter().collect();
        assert_eq!(actions.first(), Some(&MenuAction::Create));
        assert_eq!(actions.last(), Some(&MenuAction::Exit));
    }

    #[test]
    fn test_summarize() {
        let config = DomainConfiguration {
            name: "web01".into(),
            install_source: Some(InstallSource::Network {
                url: "http://mirror/os".into(),
                kickstart_url: None,
                kernel_args: None,
            }),
            mac_address: None,
            ..Default::default()
        };
        let summary = summarize(&config);
        assert!(summary.contains("Name:      web01"));
        assert!(summary.contains("Install:   network (http://mirror/os)"));
        assert!(summary.contains("MAC:       generated"));
        assert!(summary.contains("Disk:      new 8 GiB volume"));
    }
}
