//! Guest descriptor and domain XML generation
//!
//! A [`GuestDescriptor`] is the in-progress description of a new guest. The
//! provisioner fills it in step by step and renders it twice: once with the
//! install-time boot configuration for the transient install boot, and once
//! with the final boot configuration that is made persistent.

use crate::arch::ArchConfig;
use crate::xml_utils::XmlWriter;
use camino::Utf8PathBuf;
use color_eyre::Result;
use serde::Serialize;
use uuid::Uuid;

use super::capabilities::VirtType;

/// Namespace for the OS classification kept in the domain metadata
pub const METADATA_NAMESPACE: &str = "urn:nodeadmin:domain:1";

/// Sound card model attached to every new guest
pub const SOUND_MODEL: &str = "es1370";

/// A guest network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    /// libvirt network the interface attaches to
    pub network: String,
    /// MAC address
    pub mac: String,
}

/// A guest disk backed by a host file or block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskDevice {
    /// Host path of the backing volume
    pub path: Utf8PathBuf,
    /// Size in GiB, 0 when the size of an existing volume is not tracked
    pub size_gib: u64,
}

/// Display device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Graphics {
    /// VNC server with an automatically allocated port
    Vnc,
}

/// How the guest boots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "dev", rename_all = "kebab-case")]
pub enum BootConfig {
    /// First hard disk
    HardDisk,
    /// A CD-ROM holding the given device or image
    Cdrom {
        /// Host device or ISO path
        media: String,
    },
    /// PXE
    Network,
    /// Direct kernel boot
    Kernel {
        /// Kernel image on the host
        kernel: Utf8PathBuf,
        /// Initial ramdisk on the host
        initrd: Utf8PathBuf,
        /// Kernel command line
        cmdline: String,
    },
}

/// Everything needed to define a new guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestDescriptor {
    /// Domain name
    pub name: String,
    /// Domain UUID
    pub uuid: Uuid,
    /// Virtual CPUs
    pub vcpus: u32,
    /// Current memory in MiB
    pub memory_mb: u64,
    /// Maximum memory in MiB
    pub max_memory_mb: u64,
    /// Hypervisor domain type (kvm, qemu, xen, test)
    pub hypervisor: String,
    /// Guest OS type as the hypervisor sees it (hvm, xen)
    pub guest_type: String,
    /// Guest architecture
    pub arch: String,
    /// OS type ("linux", "windows"); `None` keeps the installer default
    pub os_type: Option<String>,
    /// OS variant ("fedora40"); `None` keeps the installer default
    pub os_variant: Option<String>,
    /// Install location (media path, ISO or URL)
    pub location: Option<String>,
    /// Extra kernel arguments for the installer
    pub extra_args: Option<String>,
    /// Display device
    pub graphics: Option<Graphics>,
    /// Sound card model
    pub sound: Option<String>,
    /// Network interfaces
    pub interfaces: Vec<NetworkInterface>,
    /// Disks
    pub disks: Vec<DiskDevice>,
}

impl GuestDescriptor {
    /// A descriptor with a fresh UUID and minimal sizing for the given
    /// virtualization type.
    pub fn new(name: &str, virt: &VirtType, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            vcpus: 1,
            memory_mb: 512,
            max_memory_mb: 512,
            hypervisor: virt.hypervisor.clone(),
            guest_type: virt.os_type.clone(),
            arch: arch.to_string(),
            os_type: None,
            os_variant: None,
            location: None,
            extra_args: None,
            graphics: None,
            sound: None,
            interfaces: Vec::new(),
            disks: Vec::new(),
        }
    }

    /// Set current and maximum memory; no ballooning headroom is given.
    pub fn set_memory(&mut self, memory_mb: u64) {
        self.memory_mb = memory_mb;
        self.max_memory_mb = memory_mb;
    }

    fn is_windows(&self) -> bool {
        self.os_type.as_deref() == Some("windows")
    }

    fn is_qemu(&self) -> bool {
        matches!(self.hypervisor.as_str(), "kvm" | "qemu")
    }

    /// Bus for hard disks; older Windows installers lack virtio drivers
    fn disk_bus(&self) -> &'static str {
        if self.is_windows() || !self.is_qemu() {
            "sata"
        } else {
            "virtio"
        }
    }

    fn nic_model(&self) -> &'static str {
        if self.is_windows() || !self.is_qemu() {
            "e1000"
        } else {
            "virtio"
        }
    }

    /// XML for the transient install boot; the guest stops instead of
    /// rebooting into the install media again.
    pub fn install_xml(&self, boot: &BootConfig) -> Result<String> {
        self.render(boot, "destroy")
    }

    /// XML for the persistent definition
    pub fn final_xml(&self, boot: &BootConfig) -> Result<String> {
        self.render(boot, "restart")
    }

    fn render(&self, boot: &BootConfig, on_reboot: &str) -> Result<String> {
        let arch_config = ArchConfig::for_arch(&self.arch);
        let mut writer = XmlWriter::new();

        writer.start_element("domain", &[("type", &self.hypervisor)])?;
        writer.write_text_element("name", &self.name)?;
        writer.write_text_element("uuid", &self.uuid.to_string())?;
        writer.write_text_element_with_attrs(
            "memory",
            &self.max_memory_mb.to_string(),
            &[("unit", "MiB")],
        )?;
        writer.write_text_element_with_attrs(
            "currentMemory",
            &self.memory_mb.to_string(),
            &[("unit", "MiB")],
        )?;
        writer.write_text_element("vcpu", &self.vcpus.to_string())?;

        if self.os_type.is_some() || self.os_variant.is_some() {
            writer.start_element("metadata", &[])?;
            writer.start_element("nodeadmin:os", &[("xmlns:nodeadmin", METADATA_NAMESPACE)])?;
            if let Some(ref os_type) = self.os_type {
                writer.write_text_element("nodeadmin:type", os_type)?;
            }
            if let Some(ref variant) = self.os_variant {
                writer.write_text_element("nodeadmin:variant", variant)?;
            }
            writer.end_element("nodeadmin:os")?;
            writer.end_element("metadata")?;
        }

        // OS section
        writer.start_element("os", &[])?;
        let mut type_attrs = vec![("arch", self.arch.as_str())];
        if let Some(machine) = arch_config.machine(&self.hypervisor) {
            type_attrs.push(("machine", machine));
        }
        writer.write_text_element_with_attrs("type", &self.guest_type, &type_attrs)?;
        match boot {
            BootConfig::HardDisk => writer.write_empty_element("boot", &[("dev", "hd")])?,
            BootConfig::Cdrom { .. } => {
                writer.write_empty_element("boot", &[("dev", "cdrom")])?;
                writer.write_empty_element("boot", &[("dev", "hd")])?;
            }
            BootConfig::Network => writer.write_empty_element("boot", &[("dev", "network")])?,
            BootConfig::Kernel {
                kernel,
                initrd,
                cmdline,
            } => {
                writer.write_text_element("kernel", kernel.as_str())?;
                writer.write_text_element("initrd", initrd.as_str())?;
                writer.write_text_element("cmdline", cmdline)?;
            }
        }
        writer.end_element("os")?;

        if self.guest_type == "hvm" {
            arch_config.write_features(&mut writer)?;
        }
        if let Some(mode) = arch_config.cpu_mode(&self.hypervisor) {
            writer.write_empty_element("cpu", &[("mode", mode)])?;
        }

        let offset = if self.is_windows() { "localtime" } else { "utc" };
        writer.start_element("clock", &[("offset", offset)])?;
        if self.guest_type == "hvm" {
            arch_config.write_timers(&mut writer)?;
        }
        writer.end_element("clock")?;

        writer.write_text_element("on_poweroff", "destroy")?;
        writer.write_text_element("on_reboot", on_reboot)?;
        writer.write_text_element("on_crash", "destroy")?;

        writer.start_element("devices", &[])?;
        self.write_disks(&mut writer, boot)?;
        self.write_interfaces(&mut writer)?;

        writer.start_element("serial", &[("type", "pty")])?;
        writer.write_empty_element("target", &[("port", "0")])?;
        writer.end_element("serial")?;
        writer.start_element("console", &[("type", "pty")])?;
        writer.write_empty_element("target", &[("type", "serial"), ("port", "0")])?;
        writer.end_element("console")?;

        if let Some(Graphics::Vnc) = self.graphics {
            writer.write_empty_element(
                "graphics",
                &[("type", "vnc"), ("port", "-1"), ("autoport", "yes")],
            )?;
            if self.is_qemu() {
                writer.start_element("video", &[])?;
                writer.write_empty_element("model", &[("type", "vga")])?;
                writer.end_element("video")?;
            }
        }
        if let Some(ref model) = self.sound {
            writer.write_empty_element("sound", &[("model", model)])?;
        }
        writer.end_element("devices")?;

        writer.end_element("domain")?;
        writer.into_string()
    }

    fn write_disks(&self, writer: &mut XmlWriter, boot: &BootConfig) -> Result<()> {
        let bus = self.disk_bus();
        let prefix = if bus == "virtio" { "vd" } else { "sd" };
        for (index, disk) in self.disks.iter().enumerate() {
            let target = device_name(prefix, index);
            write_disk_element(writer, disk.path.as_str(), "disk", &target, bus, self.is_qemu())?;
        }

        if let BootConfig::Cdrom { media } = boot {
            // CD-ROMs always sit on SATA, after any SATA disks
            let sata_disks = if bus == "sata" { self.disks.len() } else { 0 };
            let target = device_name("sd", sata_disks);
            write_disk_element(writer, media, "cdrom", &target, "sata", self.is_qemu())?;
        }
        Ok(())
    }

    fn write_interfaces(&self, writer: &mut XmlWriter) -> Result<()> {
        for nic in &self.interfaces {
            writer.start_element("interface", &[("type", "network")])?;
            writer.write_empty_element("source", &[("network", &nic.network)])?;
            writer.write_empty_element("mac", &[("address", &nic.mac)])?;
            writer.write_empty_element("model", &[("type", self.nic_model())])?;
            writer.end_element("interface")?;
        }
        Ok(())
    }
}

/// `vda`, `vdb`, ... for the given prefix
fn device_name(prefix: &str, index: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    format!("{prefix}{letter}")
}

fn write_disk_element(
    writer: &mut XmlWriter,
    path: &str,
    device: &str,
    target: &str,
    bus: &str,
    qemu_driver: bool,
) -> Result<()> {
    let is_block = path.starts_with("/dev/");
    let disk_type = if is_block { "block" } else { "file" };
    writer.start_element("disk", &[("type", disk_type), ("device", device)])?;
    if qemu_driver {
        writer.write_empty_element("driver", &[("name", "qemu"), ("type", "raw")])?;
    }
    let source_attr = if is_block { "dev" } else { "file" };
    writer.write_empty_element("source", &[(source_attr, path)])?;
    writer.write_empty_element("target", &[("dev", target), ("bus", bus)])?;
    if device == "cdrom" {
        writer.write_empty_element("readonly", &[])?;
    }
    writer.end_element("disk")?;
    Ok(())
}
