//! Installer strategies
//!
//! Each install source kind maps to one strategy. A strategy seeds the guest
//! descriptor with its install location and knows how to boot the guest for
//! installation and which boot configuration the persistent domain keeps.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use std::fs;
use std::io;
use tracing::{debug, info, warn};

use super::capabilities::VirtType;
use super::connection::HypervisorConnection;
use super::domain::{BootConfig, GuestDescriptor};
use super::domain_config::{InstallKind, InstallSource};
use super::provision::ProvisionError;
use crate::progress::{ProgressReader, ProgressSink};

/// Locations of kernel and initrd inside an install tree, in lookup order
const BOOT_FILE_LAYOUTS: &[(&str, &str)] = &[
    ("images/pxeboot/vmlinuz", "images/pxeboot/initrd.img"),
    ("isolinux/vmlinuz", "isolinux/initrd.img"),
    ("casper/vmlinuz", "casper/initrd"),
];

/// Join kernel arguments and a kickstart URL into the installer's extra
/// arguments.
pub fn compose_extra_args(kernel_args: Option<&str>, kickstart_url: Option<&str>) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(args) = kernel_args.map(str::trim).filter(|a| !a.is_empty()) {
        parts.push(args.to_string());
    }
    if let Some(ks) = kickstart_url.map(str::trim).filter(|k| !k.is_empty()) {
        parts.push(format!("ks={ks}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Downloads install boot media
pub trait BootMediaFetcher {
    /// Fetch `url` into `dest`, reporting bytes to `progress`
    fn fetch(&self, url: &str, dest: &Utf8Path, progress: &mut dyn ProgressSink) -> Result<()>;
}

/// [`BootMediaFetcher`] using a blocking HTTP client
#[derive(Debug, Default)]
pub struct HttpFetcher;

impl BootMediaFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Utf8Path, progress: &mut dyn ProgressSink) -> Result<()> {
        debug!("Fetching {url}");
        let r = reqwest::blocking::get(url)
            .and_then(|v| v.error_for_status())
            .with_context(|| format!("Fetching {url}"))?;

        let dir = dest.parent().unwrap_or(Utf8Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir))?;

        let file_name = dest.file_name().unwrap_or(url);
        progress.begin(&format!("Downloading {file_name}"), r.content_length());
        let copied = {
            let mut reader = ProgressReader::new(r, &mut *progress);
            io::copy(&mut reader, tmp.as_file_mut())
        };
        progress.finish();
        copied.with_context(|| format!("Downloading {url}"))?;

        tmp.persist(dest)
            .with_context(|| format!("Failed to write {}", dest))?;
        Ok(())
    }
}

/// Host-side resources an installer may need
pub struct InstallContext<'a> {
    /// Directory network install kernels are staged in
    pub boot_dir: Utf8PathBuf,
    /// Downloader for network install media
    pub fetcher: &'a dyn BootMediaFetcher,
}

impl std::fmt::Debug for InstallContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallContext")
            .field("boot_dir", &self.boot_dir)
            .finish_non_exhaustive()
    }
}

/// Kernel and initrd staged for a direct kernel boot; removed on drop
#[derive(Debug)]
struct StagedBootFiles {
    kernel: Utf8PathBuf,
    initrd: Utf8PathBuf,
}

impl Drop for StagedBootFiles {
    fn drop(&mut self) {
        for path in [&self.kernel, &self.initrd] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path, e);
                }
            }
        }
    }
}

fn join_url(base: &str, rel: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

/// Download kernel and initrd from the first layout the tree provides
fn stage_boot_files(
    url: &str,
    guest: &str,
    ctx: &InstallContext<'_>,
    progress: &mut dyn ProgressSink,
) -> Result<StagedBootFiles> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(eyre!(
            "Cannot fetch boot media from '{}': only http and https install trees are supported",
            url
        ));
    }
    fs::create_dir_all(&ctx.boot_dir)
        .with_context(|| format!("Failed to create {}", ctx.boot_dir))?;

    let mut last_err = None;
    for (kernel_rel, initrd_rel) in BOOT_FILE_LAYOUTS {
        let staged = StagedBootFiles {
            kernel: ctx.boot_dir.join(format!("{guest}-vmlinuz")),
            initrd: ctx.boot_dir.join(format!("{guest}-initrd.img")),
        };
        let kernel_url = join_url(url, kernel_rel);
        match ctx.fetcher.fetch(&kernel_url, &staged.kernel, progress) {
            Ok(()) => {}
            Err(e) => {
                debug!("No kernel at {kernel_url}: {e:#}");
                last_err = Some(e);
                continue;
            }
        }
        ctx.fetcher
            .fetch(&join_url(url, initrd_rel), &staged.initrd, progress)?;
        return Ok(staged);
    }
    Err(last_err
        .unwrap_or_else(|| eyre!("no boot file layouts to try"))
        .wrap_err(format!("No installable kernel found in {url}")))
}

/// How a guest gets its operating system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerStrategy {
    /// Distro installer booted from a CD-ROM device or ISO
    LocalMedia {
        /// Device or ISO path
        media: String,
    },
    /// Live image that remains the boot medium
    LiveImage {
        /// ISO path
        iso_path: String,
    },
    /// Distro installer booted from a network install tree
    Network {
        /// Install tree URL
        url: String,
        /// Kernel arguments and kickstart, already joined
        extra_args: Option<String>,
    },
    /// PXE boot
    NetworkBoot,
}

impl InstallerStrategy {
    /// Pick the strategy for an install source
    pub fn select(source: Option<&InstallSource>) -> Result<Self, ProvisionError> {
        let source = source.ok_or_else(|| {
            ProvisionError::InvalidInstallSource("no install source selected".into())
        })?;
        if source.kind() != InstallKind::Pxe
            && source.location().map_or(true, |l| l.trim().is_empty())
        {
            return Err(ProvisionError::InvalidInstallSource(format!(
                "{} install has an empty location",
                source.kind()
            )));
        }
        Ok(match source {
            InstallSource::LocalMedia { media } => InstallerStrategy::LocalMedia {
                media: media.clone(),
            },
            InstallSource::LiveImage { iso_path } => InstallerStrategy::LiveImage {
                iso_path: iso_path.clone(),
            },
            InstallSource::Network {
                url,
                kickstart_url,
                kernel_args,
            } => InstallerStrategy::Network {
                url: url.clone(),
                extra_args: compose_extra_args(kernel_args.as_deref(), kickstart_url.as_deref()),
            },
            InstallSource::Pxe => InstallerStrategy::NetworkBoot,
        })
    }

    /// Name for log messages
    pub fn name(&self) -> &'static str {
        match self {
            InstallerStrategy::LocalMedia { .. } => "local media installer",
            InstallerStrategy::LiveImage { .. } => "live image installer",
            InstallerStrategy::Network { .. } => "network installer",
            InstallerStrategy::NetworkBoot => "network boot installer",
        }
    }

    /// Default descriptor for this installer: install location and extra
    /// arguments set, no devices.
    pub fn new_descriptor(&self, name: &str, virt: &VirtType, arch: &str) -> GuestDescriptor {
        let mut guest = GuestDescriptor::new(name, virt, arch);
        match self {
            InstallerStrategy::LocalMedia { media } => guest.location = Some(media.clone()),
            InstallerStrategy::LiveImage { iso_path } => guest.location = Some(iso_path.clone()),
            InstallerStrategy::Network { url, extra_args } => {
                guest.location = Some(url.clone());
                guest.extra_args = extra_args.clone();
            }
            InstallerStrategy::NetworkBoot => {}
        }
        guest
    }

    /// Boot configuration the persistent domain keeps
    pub fn final_boot(&self) -> BootConfig {
        match self {
            InstallerStrategy::LiveImage { iso_path } => BootConfig::Cdrom {
                media: iso_path.clone(),
            },
            _ => BootConfig::HardDisk,
        }
    }

    /// Boot the guest for installation and persist its final definition
    pub fn install(
        &self,
        conn: &dyn HypervisorConnection,
        guest: &GuestDescriptor,
        ctx: &InstallContext<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        info!("Installing '{}' with the {}", guest.name, self.name());
        match self {
            InstallerStrategy::LiveImage { .. } => {
                conn.define_domain(&guest.final_xml(&self.final_boot())?)?;
                progress.begin(&format!("Starting {}", guest.name), None);
                let started = conn.start_domain(&guest.name);
                progress.finish();
                started?;
            }
            InstallerStrategy::LocalMedia { media } => {
                let boot = BootConfig::Cdrom {
                    media: media.clone(),
                };
                self.boot_transient(conn, guest, &boot, progress)?;
            }
            InstallerStrategy::NetworkBoot => {
                self.boot_transient(conn, guest, &BootConfig::Network, progress)?;
            }
            InstallerStrategy::Network { url, extra_args } => {
                let staged = stage_boot_files(url, &guest.name, ctx, progress)?;
                let mut cmdline = format!("inst.repo={url}");
                if let Some(args) = extra_args {
                    cmdline.push(' ');
                    cmdline.push_str(args);
                }
                let boot = BootConfig::Kernel {
                    kernel: staged.kernel.clone(),
                    initrd: staged.initrd.clone(),
                    cmdline,
                };
                self.boot_transient(conn, guest, &boot, progress)?;
                // The hypervisor has loaded kernel and initrd by now
                drop(staged);
            }
        }
        Ok(())
    }

    fn boot_transient(
        &self,
        conn: &dyn HypervisorConnection,
        guest: &GuestDescriptor,
        boot: &BootConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        progress.begin(&format!("Starting installation of {}", guest.name), None);
        let created = guest
            .install_xml(boot)
            .and_then(|xml| conn.create_domain(&xml));
        progress.finish();
        created?;
        conn.define_domain(&guest.final_xml(&self.final_boot())?)
    }
}
