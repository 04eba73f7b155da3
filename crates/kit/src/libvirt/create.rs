//! create command - provision and install a new domain

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;

use super::connection::HypervisorConnection;
use super::domain_config::{
    DomainConfiguration, InstallKind, InstallLocator, InstallSource, GENERIC_OS,
};
use super::installer::HttpFetcher;
use super::provision::DomainProvisioner;
use crate::common_opts::{CpuOpts, DiskSizeOpts, MemoryOpts, NetworkOpts};
use crate::progress::BarProgress;
use crate::settings::Settings;
use crate::utils::{parse_disk_size_to_gib, parse_memory_to_mb};

/// Options for creating a domain
#[derive(Debug, Parser)]
pub struct CreateOpts {
    /// Name of the new domain
    pub name: String,

    /// Install source kind
    #[clap(long, value_enum)]
    pub install: Option<InstallKind>,

    /// CD-ROM device or ISO image for local installs
    #[clap(long, required_if_eq("install", "local"))]
    pub media: Option<String>,

    /// ISO image for live installs
    #[clap(long, required_if_eq("install", "live"))]
    pub iso: Option<String>,

    /// Install tree URL for network installs
    #[clap(long, required_if_eq("install", "network"))]
    pub url: Option<String>,

    /// Kickstart file URL for network installs
    #[clap(long)]
    pub kickstart: Option<String>,

    /// Extra kernel arguments for network installs
    #[clap(long)]
    pub kernel_args: Option<String>,

    #[clap(flatten)]
    pub memory: MemoryOpts,

    #[clap(flatten)]
    pub cpus: CpuOpts,

    #[clap(flatten)]
    pub disk: DiskSizeOpts,

    #[clap(flatten)]
    pub net: NetworkOpts,

    /// Attach this existing volume instead of allocating a new one
    #[clap(long, conflicts_with_all = ["disk_size", "no_disk"])]
    pub volume: Option<String>,

    /// Virtualization type label (see `nodeadmin virt-types`)
    #[clap(long)]
    pub virt_type: Option<String>,

    /// OS type (linux, windows, unix, generic)
    #[clap(long, default_value = GENERIC_OS)]
    pub os_type: String,

    /// OS variant (e.g. fedora40, win11, generic)
    #[clap(long, default_value = GENERIC_OS)]
    pub os_variant: String,

    /// Print the guest descriptor as JSON instead of creating the domain
    #[clap(long)]
    pub dry_run: bool,
}

impl CreateOpts {
    /// Resolve the options against the settings defaults
    pub fn to_configuration(&self, settings: &Settings) -> Result<DomainConfiguration> {
        let defaults = &settings.defaults;
        let install_source = InstallSource::from_kind(
            self.install,
            InstallLocator {
                media: self.media.clone(),
                iso_path: self.iso.clone(),
                url: self.url.clone(),
                kickstart_url: self.kickstart.clone(),
                kernel_args: self.kernel_args.clone(),
            },
        )?;

        let memory = self.memory.memory.as_deref().unwrap_or(&defaults.memory);
        let disk_size = self.disk.disk_size.as_deref().unwrap_or(&defaults.disk_size);

        let config = DomainConfiguration {
            name: self.name.clone(),
            install_source: Some(install_source),
            cpus: self.cpus.cpus.unwrap_or(defaults.cpus),
            memory_mb: parse_memory_to_mb(memory)
                .with_context(|| format!("Invalid memory size '{}'", memory))?,
            virt_type: self.virt_type.clone().or_else(|| defaults.virt_type.clone()),
            os_type: self.os_type.clone(),
            os_variant: self.os_variant.clone(),
            network_bridge: self
                .net
                .network
                .clone()
                .unwrap_or_else(|| defaults.network.clone()),
            mac_address: self.net.mac.clone(),
            enable_storage: !self.disk.no_disk,
            use_local_storage: self.volume.is_none(),
            storage_size_gib: parse_disk_size_to_gib(disk_size)
                .with_context(|| format!("Invalid disk size '{}'", disk_size))?,
            existing_volume: self.volume.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Execute the create command
pub fn run(conn: &dyn HypervisorConnection, settings: &Settings, opts: CreateOpts) -> Result<()> {
    let config = opts.to_configuration(settings)?;
    let fetcher = HttpFetcher;
    let provisioner = DomainProvisioner::new(conn, &settings.paths, &fetcher);

    if opts.dry_run {
        let (_, guest) = provisioner.describe(&config)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&guest)
                .with_context(|| "Failed to serialize guest descriptor as JSON")?
        );
        return Ok(());
    }

    let mut progress = BarProgress::new();
    let handle = provisioner.provision(&config, &mut progress)?;
    println!("Domain '{}' created (UUID {})", handle.name, handle.uuid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libvirt::provision::ProvisionError;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[clap(flatten)]
        create: CreateOpts,
    }

    fn parse(args: &[&str]) -> CreateOpts {
        let mut argv = vec!["nodeadmin"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().create
    }

    #[test]
    fn test_network_install_options() {
        let opts = parse(&[
            "web01",
            "--install",
            "network",
            "--url",
            "http://mirror/os",
            "--kickstart",
            "http://x/ks.cfg",
            "--kernel-args",
            "console=ttyS0",
            "--cpus",
            "2",
            "--memory",
            "2G",
            "--disk-size",
            "10G",
            "--network",
            "virbr0",
        ]);
        let config = opts.to_configuration(&Settings::default()).unwrap();
        assert_eq!(config.cpus, 2);
        assert_eq!(config.memory_mb, 2048);
        assert_eq!(config.storage_size_gib, 10);
        assert_eq!(config.network_bridge, "virbr0");
        assert!(config.enable_storage && config.use_local_storage);
        assert_eq!(
            config.install_source,
            Some(InstallSource::Network {
                url: "http://mirror/os".into(),
                kickstart_url: Some("http://x/ks.cfg".into()),
                kernel_args: Some("console=ttyS0".into()),
            })
        );
    }

    #[test]
    fn test_settings_defaults_apply() {
        let mut settings = Settings::default();
        settings.defaults.memory = "4G".into();
        settings.defaults.cpus = 4;
        settings.defaults.virt_type = Some("qemu".into());

        let opts = parse(&["g", "--install", "pxe", "--no-disk"]);
        let config = opts.to_configuration(&settings).unwrap();
        assert_eq!(config.memory_mb, 4096);
        assert_eq!(config.cpus, 4);
        assert_eq!(config.virt_type.as_deref(), Some("qemu"));
        assert!(!config.enable_storage);
        assert_eq!(config.network_bridge, "default");
    }

    #[test]
    fn test_missing_install_kind() {
        let opts = parse(&["g"]);
        let err = opts.to_configuration(&Settings::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::InvalidInstallSource(_))
        ));
    }

    #[test]
    fn test_clap_requires_locator() {
        let argv = ["nodeadmin", "g", "--install", "local"];
        assert!(TestCli::try_parse_from(argv).is_err());
        let argv = ["nodeadmin", "g", "--install", "local", "--media", "/dev/sr0"];
        assert!(TestCli::try_parse_from(argv).is_ok());
    }

    #[test]
    fn test_existing_volume() {
        let opts = parse(&["g", "--install", "pxe", "--volume", "/srv/images/g.img"]);
        let config = opts.to_configuration(&Settings::default()).unwrap();
        assert!(config.enable_storage);
        assert!(!config.use_local_storage);
        assert_eq!(config.existing_volume.as_deref(), Some("/srv/images/g.img"));
    }
}
