//! Domain provisioning
//!
//! [`DomainProvisioner`] turns a validated [`DomainConfiguration`] into a
//! defined and started domain:
//!
//! 1. pick the installer strategy for the install source
//! 2. resolve the virtualization type against the hypervisor capabilities
//! 3. build the guest descriptor
//! 4. attach the network interface, starting the network if needed
//! 5. attach a disk, creating the default pool and a volume if needed
//! 6. run the installer
//!
//! Nothing is changed on the hypervisor before step 4. Resources created by
//! later steps are left in place when a subsequent step fails.

use camino::Utf8PathBuf;
use color_eyre::Report;
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::capabilities::Capabilities;
use super::connection::HypervisorConnection;
use super::domain::{DiskDevice, Graphics, GuestDescriptor, NetworkInterface, SOUND_MODEL};
use super::domain_config::{DomainConfiguration, GENERIC_OS};
use super::installer::{BootMediaFetcher, InstallContext, InstallerStrategy};
use super::network::{ensure_network_active, generate_mac};
use super::storage::{allocate_guest_volume, ensure_default_pool};
use crate::progress::ProgressSink;
use crate::settings::PathSettings;

/// Ways provisioning can fail
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// No install source, or one without a location
    #[error("invalid install source: {0}")]
    InvalidInstallSource(String),
    /// A configuration value is out of range or malformed
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// The hypervisor offers no such virtualization type
    #[error("unsupported virtualization type '{0}'")]
    UnsupportedVirtualizationType(String),
    /// The default storage pool could not be created or started
    #[error("failed to set up storage pool: {0:#}")]
    StoragePoolCreationFailed(Report),
    /// The guest volume could not be allocated
    #[error("failed to allocate storage volume: {0:#}")]
    VolumeAllocationFailed(Report),
    /// The guest network is unknown or could not be started
    #[error("failed to activate network '{network}': {cause:#}")]
    NetworkActivationFailed {
        /// Network name
        network: String,
        /// Underlying error
        cause: Report,
    },
    /// Booting the installer or defining the domain failed
    #[error("installation failed: {0:#}")]
    InstallationFailed(Report),
    /// A domain with the requested name is already defined or running
    #[error("domain '{0}' already exists")]
    DomainAlreadyExists(String),
    /// Querying the hypervisor failed
    #[error("hypervisor query failed: {0:#}")]
    Connection(Report),
}

/// A domain now owned by the hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainHandle {
    /// Domain name
    pub name: String,
    /// Domain UUID
    pub uuid: Uuid,
}

/// Creates domains on one hypervisor connection
pub struct DomainProvisioner<'a> {
    conn: &'a dyn HypervisorConnection,
    pool_path: Utf8PathBuf,
    install_ctx: InstallContext<'a>,
}

impl std::fmt::Debug for DomainProvisioner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainProvisioner")
            .field("uri", &self.conn.uri())
            .field("pool_path", &self.pool_path)
            .field("install_ctx", &self.install_ctx)
            .finish()
    }
}

fn classification(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == GENERIC_OS {
        None
    } else {
        Some(value.to_string())
    }
}

impl<'a> DomainProvisioner<'a> {
    /// Provisioner using `paths` for the default pool and boot media staging
    pub fn new(
        conn: &'a dyn HypervisorConnection,
        paths: &PathSettings,
        fetcher: &'a dyn BootMediaFetcher,
    ) -> Self {
        Self {
            conn,
            pool_path: Utf8PathBuf::from(&paths.pool_path),
            install_ctx: InstallContext {
                boot_dir: Utf8PathBuf::from(&paths.boot_dir),
                fetcher,
            },
        }
    }

    /// Validate the configuration and build the guest descriptor without
    /// touching the hypervisor beyond read-only queries.
    pub fn describe(
        &self,
        config: &DomainConfiguration,
    ) -> Result<(InstallerStrategy, GuestDescriptor), ProvisionError> {
        let strategy = InstallerStrategy::select(config.install_source.as_ref())?;
        config.validate()?;

        let caps = Capabilities::query(self.conn).map_err(ProvisionError::Connection)?;
        let virt = match config.virt_type.as_deref() {
            Some(label) => caps
                .lookup(label)
                .ok_or_else(|| ProvisionError::UnsupportedVirtualizationType(label.to_string()))?,
            None => caps.default_virt_type().ok_or_else(|| {
                ProvisionError::UnsupportedVirtualizationType("(hypervisor default)".into())
            })?,
        };
        let arch = caps.arch_for(&virt);
        debug!(
            "Virtualization type '{}' resolved to {}/{} on {}",
            virt.label, virt.hypervisor, virt.os_type, arch
        );

        if self
            .conn
            .domain_exists(&config.name)
            .map_err(ProvisionError::Connection)?
        {
            return Err(ProvisionError::DomainAlreadyExists(config.name.clone()));
        }

        let mut guest = strategy.new_descriptor(&config.name, &virt, &arch);
        guest.vcpus = config.cpus;
        guest.set_memory(config.memory_mb);
        if let Some(os_type) = classification(&config.os_type) {
            guest.os_type = Some(os_type);
        }
        if let Some(variant) = classification(&config.os_variant) {
            guest.os_variant = Some(variant);
        }
        guest.graphics = Some(Graphics::Vnc);
        guest.sound = Some(SOUND_MODEL.to_string());
        Ok((strategy, guest))
    }

    /// Create, install and start the configured domain
    #[instrument(skip_all, fields(domain = %config.name))]
    pub fn provision(
        &self,
        config: &DomainConfiguration,
        progress: &mut dyn ProgressSink,
    ) -> Result<DomainHandle, ProvisionError> {
        let (strategy, mut guest) = self.describe(config)?;

        ensure_network_active(self.conn, &config.network_bridge)?;
        let mac = config.mac_address.clone().unwrap_or_else(generate_mac);
        guest.interfaces.push(NetworkInterface {
            network: config.network_bridge.clone(),
            mac,
        });

        if config.enable_storage {
            if config.use_local_storage {
                ensure_default_pool(self.conn, &self.pool_path)?;
                let disk =
                    allocate_guest_volume(self.conn, &config.name, config.storage_size_gib)?;
                guest.disks.push(disk);
            } else if let Some(ref volume) = config.existing_volume {
                guest.disks.push(DiskDevice {
                    path: Utf8PathBuf::from(volume),
                    size_gib: 0,
                });
            }
        }

        strategy
            .install(self.conn, &guest, &self.install_ctx, progress)
            .map_err(ProvisionError::InstallationFailed)?;

        info!("Domain '{}' created ({})", guest.name, guest.uuid);
        Ok(DomainHandle {
            name: guest.name,
            uuid: guest.uuid,
        })
    }
}
