//! Architecture-specific pieces of the domain XML
//!
//! The guest architecture comes from the hypervisor capabilities rather than
//! the host, so a `test` or `xen` connection can describe guests the local
//! machine could not run itself.

use crate::xml_utils::XmlWriter;
use color_eyre::Result;

/// Architecture configuration for libvirt domains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchConfig {
    /// Architecture string for libvirt (e.g., "x86_64", "aarch64")
    pub arch: String,
}

impl ArchConfig {
    /// Configuration for an architecture name reported by the capabilities
    pub fn for_arch(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
        }
    }

    /// Configuration for the architecture this process runs on
    pub fn host() -> Self {
        Self::for_arch(std::env::consts::ARCH)
    }

    fn is_x86(&self) -> bool {
        matches!(self.arch.as_str(), "x86_64" | "i686")
    }

    /// Machine type for QEMU based hypervisors; other drivers pick their own.
    pub fn machine(&self, hypervisor: &str) -> Option<&'static str> {
        if !matches!(hypervisor, "kvm" | "qemu") {
            return None;
        }
        match self.arch.as_str() {
            "x86_64" => Some("q35"),
            "aarch64" => Some("virt"),
            _ => None,
        }
    }

    /// Generate architecture-specific XML features for libvirt
    pub fn write_features(&self, writer: &mut XmlWriter) -> Result<()> {
        writer.start_element("features", &[])?;
        writer.write_empty_element("acpi", &[])?;

        if self.is_x86() {
            writer.write_empty_element("apic", &[])?;
        }
        if self.arch == "i686" {
            writer.write_empty_element("pae", &[])?;
        }

        writer.end_element("features")?;
        Ok(())
    }

    /// Generate architecture-specific timer configuration
    pub fn write_timers(&self, writer: &mut XmlWriter) -> Result<()> {
        writer.write_empty_element("timer", &[("name", "rtc"), ("tickpolicy", "catchup")])?;

        if self.is_x86() {
            writer.write_empty_element("timer", &[("name", "pit"), ("tickpolicy", "delay")])?;
            writer.write_empty_element("timer", &[("name", "hpet"), ("present", "no")])?;
        }

        Ok(())
    }

    /// CPU mode to request, only meaningful when hardware acceleration is used
    pub fn cpu_mode(&self, hypervisor: &str) -> Option<&'static str> {
        match hypervisor {
            "kvm" => Some("host-passthrough"),
            _ => None,
        }
    }
}
