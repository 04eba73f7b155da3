//! The user's request for a new domain
//!
//! A [`DomainConfiguration`] is filled in by the CLI flags or the console
//! wizard, validated once, and then only read by the provisioner.

use serde::Serialize;

use super::provision::ProvisionError;
use crate::utils::MAX_DISK_SIZE_GIB;

/// OS type/variant value meaning "keep the installer's default"
pub const GENERIC_OS: &str = "generic";

/// OS types offered by the wizard and the variants known for each
pub const OS_VARIANTS: &[(&str, &[&str])] = &[
    (
        "linux",
        &[
            "fedora40",
            "rhel9",
            "centos-stream9",
            "debian12",
            "ubuntu24.04",
            "generic",
        ],
    ),
    ("windows", &["win10", "win11", "win2k22", "generic"]),
    ("unix", &["freebsd14", "openbsd7", "generic"]),
    ("generic", &["generic"]),
];

/// The kind of install source, as chosen in the UI
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum, strum::Display, strum::EnumIter,
)]
#[clap(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InstallKind {
    /// Install from local media (CD-ROM device or ISO) with the distro installer
    Local,
    /// Boot a live image that stays the boot medium
    Live,
    /// Install from a network tree (HTTP/FTP/NFS URL)
    Network,
    /// Boot from the network via PXE
    Pxe,
}

impl InstallKind {
    /// Human readable description for menus
    pub fn description(&self) -> &'static str {
        match self {
            InstallKind::Local => "Local install media (ISO image or CD-ROM)",
            InstallKind::Live => "Live image (ISO stays attached)",
            InstallKind::Network => "Network install (HTTP, FTP or NFS)",
            InstallKind::Pxe => "Network boot (PXE)",
        }
    }
}

/// Locator fields collected by the UI; only the ones relevant to the chosen
/// kind are kept.
#[derive(Debug, Clone, Default)]
pub struct InstallLocator {
    /// CD-ROM device or ISO for local installs
    pub media: Option<String>,
    /// ISO path for live images
    pub iso_path: Option<String>,
    /// Install tree URL for network installs
    pub url: Option<String>,
    /// Kickstart file URL for network installs
    pub kickstart_url: Option<String>,
    /// Extra kernel arguments for network installs
    pub kernel_args: Option<String>,
}

/// Where the guest's operating system comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InstallSource {
    /// Local install media
    LocalMedia {
        /// CD-ROM device or ISO image path
        media: String,
    },
    /// Live image
    LiveImage {
        /// ISO image path
        iso_path: String,
    },
    /// Network install tree
    Network {
        /// Install tree URL
        url: String,
        /// Kickstart file URL
        kickstart_url: Option<String>,
        /// Extra kernel command line arguments
        kernel_args: Option<String>,
    },
    /// PXE network boot
    Pxe,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl InstallSource {
    /// Build the source for a kind, discarding locator fields of other kinds.
    ///
    /// Fails with [`ProvisionError::InvalidInstallSource`] when no kind is
    /// selected or the kind's required locator is missing.
    pub fn from_kind(
        kind: Option<InstallKind>,
        locator: InstallLocator,
    ) -> Result<Self, ProvisionError> {
        let kind = kind.ok_or_else(|| {
            ProvisionError::InvalidInstallSource("no install source selected".into())
        })?;
        let missing =
            |what: &str| ProvisionError::InvalidInstallSource(format!("{kind} install requires {what}"));
        match kind {
            InstallKind::Local => Ok(InstallSource::LocalMedia {
                media: non_empty(locator.media).ok_or_else(|| missing("an install media path"))?,
            }),
            InstallKind::Live => Ok(InstallSource::LiveImage {
                iso_path: non_empty(locator.iso_path).ok_or_else(|| missing("an ISO path"))?,
            }),
            InstallKind::Network => Ok(InstallSource::Network {
                url: non_empty(locator.url).ok_or_else(|| missing("an install URL"))?,
                kickstart_url: non_empty(locator.kickstart_url),
                kernel_args: non_empty(locator.kernel_args),
            }),
            InstallKind::Pxe => Ok(InstallSource::Pxe),
        }
    }

    /// The kind of this source
    pub fn kind(&self) -> InstallKind {
        match self {
            InstallSource::LocalMedia { .. } => InstallKind::Local,
            InstallSource::LiveImage { .. } => InstallKind::Live,
            InstallSource::Network { .. } => InstallKind::Network,
            InstallSource::Pxe => InstallKind::Pxe,
        }
    }

    /// Install location handed to the installer, if the kind has one
    pub fn location(&self) -> Option<&str> {
        match self {
            InstallSource::LocalMedia { media } => Some(media),
            InstallSource::LiveImage { iso_path } => Some(iso_path),
            InstallSource::Network { url, .. } => Some(url),
            InstallSource::Pxe => None,
        }
    }
}

/// A requested domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainConfiguration {
    /// Guest name
    pub name: String,
    /// Install source; `None` until one is chosen
    pub install_source: Option<InstallSource>,
    /// Virtual CPU count
    pub cpus: u32,
    /// Memory in MiB
    pub memory_mb: u64,
    /// Virtualization type label; the capabilities default when `None`
    pub virt_type: Option<String>,
    /// OS type ("linux", "windows", ...) or "generic"
    pub os_type: String,
    /// OS variant ("fedora40", ...) or "generic"
    pub os_variant: String,
    /// Network (bridge) the guest NIC attaches to
    pub network_bridge: String,
    /// Guest MAC address; generated when `None`
    pub mac_address: Option<String>,
    /// Attach a disk at all
    pub enable_storage: bool,
    /// Allocate a new volume in the default pool
    pub use_local_storage: bool,
    /// Size of the new volume in GiB
    pub storage_size_gib: u64,
    /// Existing volume path used when not allocating locally
    pub existing_volume: Option<String>,
}

impl Default for DomainConfiguration {
    fn default() -> Self {
        Self {
            name: String::new(),
            install_source: None,
            cpus: crate::common_opts::DEFAULT_CPUS,
            memory_mb: 1024,
            virt_type: None,
            os_type: GENERIC_OS.to_string(),
            os_variant: GENERIC_OS.to_string(),
            network_bridge: crate::common_opts::DEFAULT_NETWORK.to_string(),
            mac_address: None,
            enable_storage: true,
            use_local_storage: true,
            storage_size_gib: 8,
            existing_volume: None,
        }
    }
}

/// Whether a name is acceptable as a libvirt domain name
pub fn is_valid_domain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.')
}

/// Whether a string is a colon separated unicast MAC address
pub fn is_valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    if octets.len() != 6
        || !octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return false;
    }
    // Multicast bit of the first octet must be clear
    u8::from_str_radix(octets[0], 16)
        .map(|b| b & 0x01 == 0)
        .unwrap_or(false)
}

impl DomainConfiguration {
    /// Check the invariants the provisioner relies on
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let invalid = |msg: String| Err(ProvisionError::InvalidConfiguration(msg));

        if !is_valid_domain_name(&self.name) {
            return invalid(format!(
                "invalid domain name '{}': use letters, digits, '-', '_' and '.'",
                self.name
            ));
        }
        if self.install_source.is_none() {
            return Err(ProvisionError::InvalidInstallSource(
                "no install source selected".into(),
            ));
        }
        if self.cpus == 0 {
            return invalid("a domain needs at least one virtual CPU".into());
        }
        if self.memory_mb == 0 {
            return invalid("memory must be greater than zero".into());
        }
        if self.network_bridge.trim().is_empty() {
            return invalid("a network must be selected".into());
        }
        if let Some(mac) = &self.mac_address {
            if !is_valid_mac(mac) {
                return invalid(format!("invalid MAC address '{}'", mac));
            }
        }
        if self.enable_storage {
            if self.use_local_storage && self.storage_size_gib == 0 {
                return invalid("storage size must be at least 1 GiB".into());
            }
            if self.use_local_storage && self.storage_size_gib > MAX_DISK_SIZE_GIB {
                return invalid(format!(
                    "storage size must not exceed {} GiB",
                    MAX_DISK_SIZE_GIB
                ));
            }
            if !self.use_local_storage
                && self
                    .existing_volume
                    .as_deref()
                    .is_some_and(|v| v.trim().is_empty())
            {
                return invalid("existing volume path is empty".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> DomainConfiguration {
        DomainConfiguration {
            name: "guest".into(),
            install_source: Some(InstallSource::Pxe),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_kind_keeps_only_relevant_fields() {
        let locator = InstallLocator {
            media: Some("/dev/sr0".into()),
            iso_path: Some("/isos/live.iso".into()),
            url: Some("http://mirror/os".into()),
            kickstart_url: Some("http://mirror/ks.cfg".into()),
            kernel_args: Some("  ".into()),
        };

        let src = InstallSource::from_kind(Some(InstallKind::Local), locator.clone()).unwrap();
        assert_eq!(
            src,
            InstallSource::LocalMedia {
                media: "/dev/sr0".into()
            }
        );
        assert_eq!(src.location(), Some("/dev/sr0"));

        let src = InstallSource::from_kind(Some(InstallKind::Live), locator.clone()).unwrap();
        assert_eq!(src.kind(), InstallKind::Live);
        assert_eq!(src.location(), Some("/isos/live.iso"));

        let src = InstallSource::from_kind(Some(InstallKind::Network), locator.clone()).unwrap();
        assert_eq!(
            src,
            InstallSource::Network {
                url: "http://mirror/os".into(),
                kickstart_url: Some("http://mirror/ks.cfg".into()),
                kernel_args: None,
            }
        );

        let src = InstallSource::from_kind(Some(InstallKind::Pxe), locator).unwrap();
        assert_eq!(src, InstallSource::Pxe);
        assert_eq!(src.location(), None);
    }

    #[test]
    fn test_from_kind_rejects_unset_or_incomplete() {
        let err = InstallSource::from_kind(None, InstallLocator::default()).unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInstallSource(_)));

        let err = InstallSource::from_kind(Some(InstallKind::Network), InstallLocator::default())
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInstallSource(_)));
        assert!(err.to_string().contains("install URL"));

        let err = InstallSource::from_kind(
            Some(InstallKind::Local),
            InstallLocator {
                media: Some("".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInstallSource(_)));
    }

    #[test]
    fn test_domain_names() {
        assert!(is_valid_domain_name("fedora-40_test.1"));
        assert!(!is_valid_domain_name(""));
        assert!(!is_valid_domain_name("has space"));
        assert!(!is_valid_domain_name("a/b"));
        assert!(!is_valid_domain_name(".hidden"));
    }

    #[test]
    fn test_mac_addresses() {
        assert!(is_valid_mac("52:54:00:12:ab:CD"));
        assert!(!is_valid_mac("52:54:00:12:ab"));
        assert!(!is_valid_mac("52-54-00-12-ab-cd"));
        assert!(!is_valid_mac("52:54:00:12:ab:zz"));
        // multicast
        assert!(!is_valid_mac("01:00:5e:00:00:01"));
    }

    #[test]
    fn test_validate() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.install_source = None;
        assert!(matches!(
            config.validate(),
            Err(ProvisionError::InvalidInstallSource(_))
        ));

        let mut config = valid_config();
        config.cpus = 0;
        assert!(matches!(
            config.validate(),
            Err(ProvisionError::InvalidConfiguration(_))
        ));

        let mut config = valid_config();
        config.mac_address = Some("nope".into());
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.use_local_storage = false;
        assert!(config.validate().is_ok());
        config.existing_volume = Some(" ".into());
        assert!(config.validate().is_err());
        config.existing_volume = Some("/var/lib/libvirt/images/shared.img".into());
        assert!(config.validate().is_ok());

        let mut config = valid_config();
        config.storage_size_gib = MAX_DISK_SIZE_GIB;
        assert!(config.validate().is_ok());
        config.storage_size_gib = MAX_DISK_SIZE_GIB + 1;
        assert!(matches!(
            config.validate(),
            Err(ProvisionError::InvalidConfiguration(_))
        ));

        // Storage flags are irrelevant once storage is disabled
        let mut config = valid_config();
        config.enable_storage = false;
        config.use_local_storage = false;
        config.storage_size_gib = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_os_variants_include_generic() {
        for (os_type, variants) in OS_VARIANTS {
            assert!(variants.contains(&GENERIC_OS), "{os_type} lacks generic");
        }
    }

    #[test]
    fn test_install_kind_display() {
        assert_eq!(InstallKind::Pxe.to_string(), "pxe");
        assert_eq!(InstallKind::Network.to_string(), "network");
    }
}
