//! Hypervisor connection abstraction
//!
//! Everything nodeadmin does to libvirt goes through [`HypervisorConnection`].
//! The production implementation shells out to `virsh`; tests substitute an
//! in-memory implementation.

use camino::Utf8PathBuf;
use color_eyre::eyre::{eyre, Context};
use color_eyre::{Report, Result};
use std::fmt;
use std::io::Write as _;
use std::process::Command;
use std::str::FromStr;
use tracing::debug;

use crate::xml_utils;

/// Which domains to include in a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainFilter {
    /// Defined but not running
    Inactive,
    /// Currently running (or paused)
    Active,
    /// Both of the above
    All,
}

/// Runtime state of a domain as reported by `virsh domstate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainState {
    /// Running
    Running,
    /// Paused
    Paused,
    /// Shut off
    ShutOff,
    /// Anything else libvirt reports (crashed, in shutdown, ...)
    Other(String),
}

impl DomainState {
    /// Whether the domain has a live instance
    pub fn is_active(&self) -> bool {
        matches!(self, DomainState::Running | DomainState::Paused)
    }
}

impl FromStr for DomainState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim() {
            "running" => DomainState::Running,
            "paused" => DomainState::Paused,
            "shut off" => DomainState::ShutOff,
            other => DomainState::Other(other.to_string()),
        })
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainState::Running => f.write_str("running"),
            DomainState::Paused => f.write_str("paused"),
            DomainState::ShutOff => f.write_str("stopped"),
            DomainState::Other(s) => f.write_str(s),
        }
    }
}

/// A storage volume as described by `vol-dumpxml`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VolumeInfo {
    /// Pool the volume lives in
    pub pool: String,
    /// Volume name (file name for directory pools)
    pub name: String,
    /// Absolute path on the hypervisor host
    pub path: String,
    /// Virtual size in bytes
    pub capacity: u64,
    /// Bytes actually allocated on disk
    pub allocation: u64,
}

impl VolumeInfo {
    /// Capacity expressed in GiB
    pub fn capacity_gib(&self) -> f64 {
        self.capacity as f64 / 1024f64.powi(3)
    }
}

/// Operations nodeadmin needs from a hypervisor connection.
///
/// Names follow libvirt: "create" boots a transient domain from XML,
/// "start" boots an already defined one.
pub trait HypervisorConnection {
    /// Connection URI, `None` meaning the client default
    fn uri(&self) -> Option<&str>;

    /// List domain names
    fn list_domains(&self, filter: DomainFilter) -> Result<Vec<String>>;
    /// State of a single domain; errors if it does not exist
    fn domain_state(&self, name: &str) -> Result<DomainState>;
    /// Make a domain definition persistent
    fn define_domain(&self, xml: &str) -> Result<()>;
    /// Boot a domain directly from XML
    fn create_domain(&self, xml: &str) -> Result<()>;
    /// Boot a defined domain
    fn start_domain(&self, name: &str) -> Result<()>;
    /// Hard power off a running domain
    fn destroy_domain(&self, name: &str) -> Result<()>;
    /// Remove a domain definition
    fn undefine_domain(&self, name: &str) -> Result<()>;

    /// Raw capabilities XML
    fn capabilities(&self) -> Result<String>;

    /// List storage pool names
    fn list_storage_pools(&self, include_inactive: bool) -> Result<Vec<String>>;
    /// Define a storage pool from XML
    fn define_storage_pool(&self, xml: &str) -> Result<()>;
    /// Build the pool's backing (creates the target directory)
    fn build_storage_pool(&self, name: &str) -> Result<()>;
    /// Activate a pool
    fn start_storage_pool(&self, name: &str) -> Result<()>;
    /// Mark a pool to start with the host
    fn set_storage_pool_autostart(&self, name: &str) -> Result<()>;
    /// Target path of a pool
    fn storage_pool_path(&self, pool: &str) -> Result<Utf8PathBuf>;

    /// List volume names in a pool
    fn list_volumes(&self, pool: &str) -> Result<Vec<String>>;
    /// Allocate a raw volume and return its path
    fn create_volume(&self, pool: &str, name: &str, capacity_bytes: u64) -> Result<Utf8PathBuf>;
    /// Details of a single volume
    fn volume_info(&self, pool: &str, name: &str) -> Result<VolumeInfo>;

    /// List network names
    fn list_networks(&self, include_inactive: bool) -> Result<Vec<String>>;
    /// Activate a defined network
    fn start_network(&self, name: &str) -> Result<()>;

    /// Whether a domain of this name is defined or running
    fn domain_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .list_domains(DomainFilter::All)?
            .iter()
            .any(|d| d == name))
    }
}

/// Whether a hypervisor error says the object is already running
pub fn is_already_active(err: &Report) -> bool {
    format!("{err:#}").contains("already active")
}

/// Whether a hypervisor error says the object already exists
pub fn is_already_exists(err: &Report) -> bool {
    format!("{err:#}").contains("already exists")
}

/// [`HypervisorConnection`] backed by the `virsh` command line client
#[derive(Debug, Clone, Default)]
pub struct VirshConnection {
    /// Optional libvirt connection URI
    pub connect_uri: Option<String>,
}

impl VirshConnection {
    /// Create a connection, `None` using virsh's default URI
    pub fn new(connect_uri: Option<String>) -> Self {
        Self { connect_uri }
    }

    /// Build a virsh command with optional connection URI
    fn virsh_command(&self) -> Command {
        let mut cmd = Command::new("virsh");
        if let Some(ref uri) = self.connect_uri {
            cmd.arg("-c").arg(uri);
        }
        cmd
    }

    /// Run virsh and return stdout, turning failures into errors carrying stderr
    fn run_virsh(&self, args: &[&str], err_msg: &str) -> Result<String> {
        debug!("virsh {}", args.join(" "));
        let output = self
            .virsh_command()
            .args(args)
            .output()
            .with_context(|| format!("Failed to run virsh command: {:?}", args))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(eyre!("{}: {}", err_msg, stderr.trim()));
        }
        String::from_utf8(output.stdout).with_context(|| "Invalid UTF-8 in virsh output")
    }

    /// Run a virsh verb that takes an XML file argument
    fn run_virsh_with_xml(&self, verb: &str, xml: &str, err_msg: &str) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix("nodeadmin-")
            .suffix(".xml")
            .tempfile()
            .context("Failed to create temporary XML file")?;
        tmp.write_all(xml.as_bytes())
            .context("Failed to write temporary XML file")?;
        let path = tmp
            .path()
            .to_str()
            .ok_or_else(|| eyre!("Temporary path is not UTF-8"))?;
        self.run_virsh(&[verb, path], err_msg)?;
        Ok(())
    }

    fn run_virsh_xml(&self, args: &[&str], err_msg: &str) -> Result<xml_utils::XmlNode> {
        let xml = self.run_virsh(args, err_msg)?;
        xml_utils::parse_xml_dom(&xml).with_context(|| format!("Failed to parse output of virsh {}", args[0]))
    }
}

/// Parse name-per-line output (`--name` listings)
fn parse_name_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Parse the `vol-list` table, which has a two line header.
///
/// Names may contain spaces, so rows are cut at the column where the
/// header's `Path` starts rather than at the first whitespace.
fn parse_vol_list(output: &str) -> Vec<String> {
    let mut lines = output.lines();
    let path_col = lines
        .next()
        .and_then(|header| header.find("Path"))
        .map(|byte_idx| output[..byte_idx].chars().count());
    lines
        .skip(1)
        .filter_map(|line| {
            let name: String = match path_col {
                Some(col) => line.chars().take(col).collect(),
                None => line.split_whitespace().next()?.to_string(),
            };
            let name = name.trim();
            (!name.is_empty() && !name.starts_with('-')).then(|| name.to_string())
        })
        .collect()
}

/// Parse `vol-dumpxml` output
fn parse_volume_xml(pool: &str, dom: &xml_utils::XmlNode) -> Result<VolumeInfo> {
    let name = dom
        .child("name")
        .map(|n| n.text_content().to_string())
        .ok_or_else(|| eyre!("Volume XML has no name"))?;
    let path = dom
        .child("target")
        .and_then(|t| t.child("path"))
        .map(|n| n.text_content().to_string())
        .unwrap_or_default();
    let bytes = |elem: &str| -> Result<u64> {
        match dom.child(elem) {
            Some(node) => node
                .text_content()
                .parse::<u64>()
                .with_context(|| format!("Invalid {} in volume XML", elem)),
            None => Ok(0),
        }
    };
    Ok(VolumeInfo {
        pool: pool.to_string(),
        name,
        path,
        capacity: bytes("capacity")?,
        allocation: bytes("allocation")?,
    })
}

impl HypervisorConnection for VirshConnection {
    fn uri(&self) -> Option<&str> {
        self.connect_uri.as_deref()
    }

    fn list_domains(&self, filter: DomainFilter) -> Result<Vec<String>> {
        let flag = match filter {
            DomainFilter::Inactive => "--inactive",
            DomainFilter::Active => "--state-running",
            DomainFilter::All => "--all",
        };
        let mut names = parse_name_list(&self.run_virsh(&["list", flag, "--name"], "Failed to list domains")?);
        if filter == DomainFilter::Active {
            // --state-running leaves out paused domains
            names.extend(parse_name_list(&self.run_virsh(
                &["list", "--state-paused", "--name"],
                "Failed to list domains",
            )?));
        }
        Ok(names)
    }

    fn domain_state(&self, name: &str) -> Result<DomainState> {
        let out = self.run_virsh(
            &["domstate", name],
            &format!("Failed to get domain state for '{}'", name),
        )?;
        let state: DomainState = out.trim().parse().unwrap_or_else(|e| match e {});
        Ok(state)
    }

    fn define_domain(&self, xml: &str) -> Result<()> {
        self.run_virsh_with_xml("define", xml, "Failed to define domain")
    }

    fn create_domain(&self, xml: &str) -> Result<()> {
        self.run_virsh_with_xml("create", xml, "Failed to create domain")
    }

    fn start_domain(&self, name: &str) -> Result<()> {
        self.run_virsh(&["start", name], &format!("Failed to start domain '{}'", name))?;
        Ok(())
    }

    fn destroy_domain(&self, name: &str) -> Result<()> {
        self.run_virsh(
            &["destroy", name],
            &format!("Failed to destroy domain '{}'", name),
        )?;
        Ok(())
    }

    fn undefine_domain(&self, name: &str) -> Result<()> {
        self.run_virsh(
            &["undefine", name],
            &format!("Failed to undefine domain '{}'", name),
        )?;
        Ok(())
    }

    fn capabilities(&self) -> Result<String> {
        self.run_virsh(&["capabilities"], "Failed to query capabilities")
    }

    fn list_storage_pools(&self, include_inactive: bool) -> Result<Vec<String>> {
        let mut args = vec!["pool-list", "--name"];
        if include_inactive {
            args.push("--all");
        }
        Ok(parse_name_list(
            &self.run_virsh(&args, "Failed to list storage pools")?,
        ))
    }

    fn define_storage_pool(&self, xml: &str) -> Result<()> {
        self.run_virsh_with_xml("pool-define", xml, "Failed to define storage pool")
    }

    fn build_storage_pool(&self, name: &str) -> Result<()> {
        self.run_virsh(
            &["pool-build", name],
            &format!("Failed to build storage pool '{}'", name),
        )?;
        Ok(())
    }

    fn start_storage_pool(&self, name: &str) -> Result<()> {
        self.run_virsh(
            &["pool-start", name],
            &format!("Failed to start storage pool '{}'", name),
        )?;
        Ok(())
    }

    fn set_storage_pool_autostart(&self, name: &str) -> Result<()> {
        self.run_virsh(
            &["pool-autostart", name],
            &format!("Failed to autostart storage pool '{}'", name),
        )?;
        Ok(())
    }

    fn storage_pool_path(&self, pool: &str) -> Result<Utf8PathBuf> {
        let dom = self.run_virsh_xml(
            &["pool-dumpxml", pool],
            &format!("Failed to get storage pool info for '{}'", pool),
        )?;
        dom.child("target")
            .and_then(|t| t.child("path"))
            .map(|p| p.text_content().trim())
            .filter(|p| !p.is_empty())
            .map(Utf8PathBuf::from)
            .ok_or_else(|| eyre!("Could not find path in storage pool XML for '{}'", pool))
    }

    fn list_volumes(&self, pool: &str) -> Result<Vec<String>> {
        let out = self.run_virsh(
            &["vol-list", "--pool", pool],
            &format!("Failed to list volumes in pool '{}'", pool),
        )?;
        Ok(parse_vol_list(&out))
    }

    fn create_volume(&self, pool: &str, name: &str, capacity_bytes: u64) -> Result<Utf8PathBuf> {
        let capacity = capacity_bytes.to_string();
        self.run_virsh(
            &[
                "vol-create-as",
                "--pool",
                pool,
                "--name",
                name,
                "--capacity",
                &capacity,
                "--format",
                "raw",
            ],
            &format!("Failed to create volume '{}' in pool '{}'", name, pool),
        )?;
        let path = self.run_virsh(
            &["vol-path", "--pool", pool, name],
            &format!("Failed to query path of volume '{}'", name),
        )?;
        Ok(Utf8PathBuf::from(path.trim()))
    }

    fn volume_info(&self, pool: &str, name: &str) -> Result<VolumeInfo> {
        let dom = self.run_virsh_xml(
            &["vol-dumpxml", "--pool", pool, name],
            &format!("Failed to get info for volume '{}'", name),
        )?;
        parse_volume_xml(pool, &dom)
    }

    fn list_networks(&self, include_inactive: bool) -> Result<Vec<String>> {
        let mut args = vec!["net-list", "--name"];
        if include_inactive {
            args.push("--all");
        }
        Ok(parse_name_list(
            &self.run_virsh(&args, "Failed to list networks")?,
        ))
    }

    fn start_network(&self, name: &str) -> Result<()> {
        self.run_virsh(
            &["net-start", name],
            &format!("Failed to start network '{}'", name),
        )?;
        Ok(())
    }
}
