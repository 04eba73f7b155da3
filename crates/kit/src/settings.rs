//! User settings loaded from `$XDG_CONFIG_HOME/nodeadmin/config.toml`
//!
//! Every key is optional; a missing file means built-in defaults. Command
//! line flags take precedence over anything set here.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::Context as _, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::common_opts::{DEFAULT_CPUS, DEFAULT_DISK_SIZE, DEFAULT_MEMORY_USER_STR, DEFAULT_NETWORK};

/// Directory name below the user configuration directory
pub const CONFIG_DIR: &str = "nodeadmin";
/// Settings file name
pub const CONFIG_FILE: &str = "config.toml";

/// Target path of the directory pool created when `default` is missing
pub const DEFAULT_POOL_TARGET_PATH: &str = "/var/lib/libvirt/images";
/// Where network install kernels and initrds are staged
pub const DEFAULT_BOOT_DIR: &str = "/var/lib/libvirt/boot";

/// Top level settings document
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    /// Hypervisor connection URI (e.g. qemu:///system)
    pub connect: Option<String>,

    /// Defaults for new domains
    #[serde(default)]
    pub defaults: DomainDefaults,

    /// Host paths
    #[serde(default)]
    pub paths: PathSettings,
}

/// Defaults applied to new domains
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DomainDefaults {
    /// Memory size, e.g. "2G"
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Number of virtual CPUs
    #[serde(default = "default_cpus")]
    pub cpus: u32,

    /// Disk size, e.g. "20G"
    #[serde(default = "default_disk_size")]
    pub disk_size: String,

    /// Network the guest NIC is attached to
    #[serde(default = "default_network")]
    pub network: String,

    /// Virtualization type label; the capabilities default when unset
    pub virt_type: Option<String>,
}

impl Default for DomainDefaults {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
            disk_size: default_disk_size(),
            network: default_network(),
            virt_type: None,
        }
    }
}

fn default_memory() -> String {
    DEFAULT_MEMORY_USER_STR.to_string()
}

fn default_cpus() -> u32 {
    DEFAULT_CPUS
}

fn default_disk_size() -> String {
    DEFAULT_DISK_SIZE.to_string()
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

/// Host path settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PathSettings {
    /// Target directory used when the `default` pool has to be created
    #[serde(default = "default_pool_path")]
    pub pool_path: String,

    /// Staging directory for network install boot files
    #[serde(default = "default_boot_dir")]
    pub boot_dir: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            pool_path: default_pool_path(),
            boot_dir: default_boot_dir(),
        }
    }
}

fn default_pool_path() -> String {
    DEFAULT_POOL_TARGET_PATH.to_string()
}

fn default_boot_dir() -> String {
    DEFAULT_BOOT_DIR.to_string()
}

impl Settings {
    /// Default location of the settings file, if a config dir is known
    pub fn default_path() -> Option<Utf8PathBuf> {
        let dir = dirs::config_dir()?;
        let dir = Utf8PathBuf::from_path_buf(dir).ok()?;
        Some(dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load settings from an explicit path.
    ///
    /// Returns `None` if the file doesn't exist.
    pub fn load_from(path: &Utf8Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        if settings.defaults.cpus == 0 {
            color_eyre::eyre::bail!("defaults.cpus must be at least 1 in {}", path);
        }
        crate::utils::parse_memory_to_mb(&settings.defaults.memory)
            .with_context(|| format!("Invalid defaults.memory in {}", path))?;
        crate::utils::parse_disk_size_to_gib(&settings.defaults.disk_size)
            .with_context(|| format!("Invalid defaults.disk-size in {}", path))?;

        Ok(Some(settings))
    }

    /// Load settings from `path` or the default location, falling back to
    /// built-in defaults when no file exists.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_owned(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        let settings = Self::load_from(&path)?;
        match settings {
            Some(s) => {
                tracing::debug!("Loaded settings from {}", path);
                Ok(s)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.defaults.memory, "1G");
        assert_eq!(settings.defaults.cpus, 1);
        assert_eq!(settings.paths.pool_path, "/var/lib/libvirt/images");
        assert_eq!(settings.paths.boot_dir, "/var/lib/libvirt/boot");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
connect = "qemu:///system"

[defaults]
memory = "4G"
cpus = 2
disk-size = "20G"
network = "virbr1"
virt-type = "kvm"

[paths]
pool-path = "/srv/images"
boot-dir = "/srv/boot"
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.connect.as_deref(), Some("qemu:///system"));
        assert_eq!(settings.defaults.memory, "4G");
        assert_eq!(settings.defaults.cpus, 2);
        assert_eq!(settings.defaults.disk_size, "20G");
        assert_eq!(settings.defaults.network, "virbr1");
        assert_eq!(settings.defaults.virt_type.as_deref(), Some("kvm"));
        assert_eq!(settings.paths.pool_path, "/srv/images");
        assert_eq!(settings.paths.boot_dir, "/srv/boot");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let toml = r#"
[defaults]
ram = "4G"
"#;
        assert!(toml::from_str::<Settings>(toml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();

        assert!(Settings::load_from(&path).unwrap().is_none());
        assert_eq!(Settings::load(Some(&path)).unwrap(), Settings::default());

        fs::write(&path, "[defaults]\ncpus = 4\n").unwrap();
        let settings = Settings::load_from(&path).unwrap().unwrap();
        assert_eq!(settings.defaults.cpus, 4);
        assert_eq!(settings.defaults.memory, "1G");

        fs::write(&path, "[defaults]\ncpus = 0\n").unwrap();
        assert!(Settings::load_from(&path).is_err());

        fs::write(&path, "[defaults]\nmemory = \"lots\"\n").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
