//! Hypervisor capabilities: which guest OS types run under which hypervisors
//!
//! The front-end presents virtualization types as labels ("kvm",
//! "xen (paravirt)", ...) and resolves them back to the hypervisor and OS
//! type pair libvirt needs in the domain XML.

use clap::Parser;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use super::connection::HypervisorConnection;
use super::OutputFormat;
use crate::xml_utils::{self, XmlNode};

/// A guest entry from the capabilities document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCapability {
    /// Guest OS type ("hvm", "xen", "exe", ...)
    pub os_type: String,
    /// Guest architecture
    pub arch: String,
    /// Hypervisor domain types that can run this guest
    pub hypervisors: Vec<String>,
}

/// A selectable virtualization type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtType {
    /// Display label
    pub label: String,
    /// Domain type attribute (kvm, qemu, xen, test, ...)
    pub hypervisor: String,
    /// Guest OS type
    pub os_type: String,
    /// Architecture of the first guest offering this label
    pub arch: String,
}

/// Parsed capabilities document
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Host CPU architecture, if reported
    pub host_arch: Option<String>,
    /// Guest entries in document order
    pub guests: Vec<GuestCapability>,
}

/// Label shown for a hypervisor / guest OS type combination
fn virt_type_label(hypervisor: &str, os_type: &str) -> String {
    match (hypervisor, os_type) {
        ("kvm", "xen") => "xenner".to_string(),
        ("xen", "xen") => "xen (paravirt)".to_string(),
        ("xen", "hvm") => "xen (fullvirt)".to_string(),
        ("test", "xen") => "test (xen)".to_string(),
        ("test", "hvm") => "test (hvm)".to_string(),
        _ => hypervisor.to_string(),
    }
}

fn parse_guest(node: &XmlNode) -> Option<GuestCapability> {
    let os_type = node.child("os_type")?.text_content().trim().to_string();
    let arch_node = node.child("arch")?;
    let arch = arch_node.attr("name")?.to_string();
    let hypervisors = arch_node
        .children_named("domain")
        .filter_map(|d| d.attr("type"))
        .map(str::to_string)
        .collect();
    Some(GuestCapability {
        os_type,
        arch,
        hypervisors,
    })
}

impl Capabilities {
    /// Parse `virsh capabilities` output
    pub fn parse(xml: &str) -> Result<Self> {
        let dom = xml_utils::parse_xml_dom(xml).context("Failed to parse capabilities XML")?;
        if dom.name != "capabilities" {
            return Err(eyre!("Unexpected root element <{}> in capabilities", dom.name));
        }
        let host_arch = dom
            .child("host")
            .and_then(|h| h.child("cpu"))
            .and_then(|c| c.child("arch"))
            .map(|a| a.text_content().trim().to_string());
        let guests = dom.children_named("guest").filter_map(parse_guest).collect();
        Ok(Self { host_arch, guests })
    }

    /// Query and parse the capabilities of a connection
    pub fn query(conn: &dyn HypervisorConnection) -> Result<Self> {
        Self::parse(&conn.capabilities()?)
    }

    /// All distinct virtualization types, first occurrence of a label wins
    pub fn virt_types(&self) -> Vec<VirtType> {
        let mut result: Vec<VirtType> = Vec::new();
        for guest in &self.guests {
            for hypervisor in &guest.hypervisors {
                let label = virt_type_label(hypervisor, &guest.os_type);
                if result.iter().any(|v| v.label == label) {
                    continue;
                }
                result.push(VirtType {
                    label,
                    hypervisor: hypervisor.clone(),
                    os_type: guest.os_type.clone(),
                    arch: guest.arch.clone(),
                });
            }
        }
        result
    }

    /// Resolve a label to its virtualization type
    pub fn lookup(&self, label: &str) -> Option<VirtType> {
        self.virt_types().into_iter().find(|v| v.label == label)
    }

    /// Distinct guest architectures
    pub fn architectures(&self) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for guest in &self.guests {
            if guest.hypervisors.is_empty() || result.contains(&guest.arch) {
                continue;
            }
            result.push(guest.arch.clone());
        }
        result
    }

    /// Architecture new domains default to: the host's when a guest for it
    /// exists, otherwise the first listed guest's.
    pub fn default_architecture(&self) -> Option<String> {
        let archs = self.architectures();
        if let Some(host) = &self.host_arch {
            if archs.contains(host) {
                return Some(host.clone());
            }
        }
        archs.into_iter().next()
    }

    /// Architecture for a new guest of the given type: the default
    /// architecture if it offers this hypervisor/OS type pair, else the
    /// architecture the type was first seen with.
    pub fn arch_for(&self, virt_type: &VirtType) -> String {
        let supports = |arch: &str| {
            self.guests.iter().any(|g| {
                g.arch == arch
                    && g.os_type == virt_type.os_type
                    && g.hypervisors.contains(&virt_type.hypervisor)
            })
        };
        match self.default_architecture() {
            Some(arch) if supports(&arch) => arch,
            _ => virt_type.arch.clone(),
        }
    }

    /// Virtualization type new domains default to: hardware accelerated
    /// when available.
    pub fn default_virt_type(&self) -> Option<VirtType> {
        let types = self.virt_types();
        types
            .iter()
            .find(|v| v.hypervisor == "kvm" && v.os_type == "hvm")
            .or_else(|| types.first())
            .cloned()
    }
}

/// Options for the virt-types command
#[derive(Debug, Parser)]
pub struct VirtTypesOpts {
    /// Output format
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// List virtualization types and architectures
pub fn run(conn: &dyn HypervisorConnection, opts: VirtTypesOpts) -> Result<()> {
    let caps = Capabilities::query(conn)?;
    let types = caps.virt_types();

    if opts.format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::to_string_pretty(&types)
                .with_context(|| "Failed to serialize virtualization types as JSON")?
        );
        return Ok(());
    }

    if types.is_empty() {
        println!("The hypervisor reports no usable guest types");
        return Ok(());
    }

    let default = caps.default_virt_type().map(|v| v.label);
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["LABEL", "HYPERVISOR", "OS TYPE", "ARCH", "DEFAULT"]);
    for v in &types {
        let is_default = if default.as_deref() == Some(v.label.as_str()) {
            "*"
        } else {
            ""
        };
        table.add_row(vec![
            v.label.as_str(),
            v.hypervisor.as_str(),
            v.os_type.as_str(),
            v.arch.as_str(),
            is_default,
        ]);
    }
    println!("{}", table);
    println!("Architectures: {}", caps.architectures().join(", "));
    Ok(())
}
