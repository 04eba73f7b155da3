//! Provision and manage libvirt domains from the command line or an
//! interactive console.

pub mod arch;
pub mod common_opts;
pub mod console;
pub mod libvirt;
pub mod progress;
pub mod settings;
pub mod utils;
pub mod xml_utils;
