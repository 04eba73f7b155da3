//! In-memory [`HypervisorConnection`] for unit tests

use camino::Utf8PathBuf;
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;

use super::capabilities::tests::KVM_CAPS;
use super::connection::{DomainFilter, DomainState, HypervisorConnection, VolumeInfo};
use crate::xml_utils;

#[derive(Debug, Default)]
struct FakeDomain {
    active: bool,
    persistent: bool,
    defined_xml: Option<String>,
    created_xml: Option<String>,
}

#[derive(Debug, Default)]
struct FakePool {
    path: String,
    active: bool,
    autostart: bool,
    volumes: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct FakeState {
    capabilities: String,
    domains: BTreeMap<String, FakeDomain>,
    pools: BTreeMap<String, FakePool>,
    networks: BTreeMap<String, bool>,
    calls: Vec<String>,
    fail_on: Vec<String>,
    racing_client: bool,
}

/// Records mutating calls as `"<virsh verb> <args>"` and keeps just enough
/// state to answer queries consistently.
#[derive(Debug)]
pub(crate) struct FakeConnection {
    state: RefCell<FakeState>,
}

fn xml_name(xml: &str) -> Result<String> {
    let dom = xml_utils::parse_xml_dom(xml).context("Invalid XML")?;
    dom.child("name")
        .map(|n| n.text_content().to_string())
        .ok_or_else(|| eyre!("XML has no name"))
}

impl FakeConnection {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(FakeState {
                capabilities: KVM_CAPS.to_string(),
                domains: BTreeMap::new(),
                pools: BTreeMap::new(),
                networks: BTreeMap::new(),
                calls: Vec::new(),
                fail_on: Vec::new(),
                racing_client: false,
            }),
        }
    }

    pub(crate) fn set_capabilities(&self, xml: &str) {
        self.state.borrow_mut().capabilities = xml.to_string();
    }

    pub(crate) fn add_domain(&self, name: &str, active: bool) {
        self.state.borrow_mut().domains.insert(
            name.to_string(),
            FakeDomain {
                active,
                persistent: true,
                ..Default::default()
            },
        );
    }

    pub(crate) fn add_network(&self, name: &str, active: bool) {
        self.state
            .borrow_mut()
            .networks
            .insert(name.to_string(), active);
    }

    pub(crate) fn add_pool(&self, name: &str, path: &str, active: bool) {
        self.state.borrow_mut().pools.insert(
            name.to_string(),
            FakePool {
                path: path.to_string(),
                active,
                ..Default::default()
            },
        );
    }

    pub(crate) fn add_volume(&self, pool: &str, name: &str, capacity: u64) {
        if let Some(p) = self.state.borrow_mut().pools.get_mut(pool) {
            p.volumes.insert(name.to_string(), capacity);
        }
    }

    /// Every call whose log entry starts with `prefix` fails
    pub(crate) fn fail_on(&self, prefix: &str) {
        self.state.borrow_mut().fail_on.push(prefix.to_string());
    }

    /// Another client wins the race for network starts and pool defines:
    /// the change happens but our call reports it as already done.
    pub(crate) fn start_races_with_other_client(&self) {
        self.state.borrow_mut().racing_client = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub(crate) fn network_active(&self, name: &str) -> bool {
        self.state.borrow().networks.get(name).copied().unwrap_or(false)
    }

    pub(crate) fn pool_active(&self, name: &str) -> bool {
        self.state
            .borrow()
            .pools
            .get(name)
            .is_some_and(|p| p.active)
    }

    pub(crate) fn pool_autostart(&self, name: &str) -> bool {
        self.state
            .borrow()
            .pools
            .get(name)
            .is_some_and(|p| p.autostart)
    }

    pub(crate) fn domain_active(&self, name: &str) -> bool {
        self.state
            .borrow()
            .domains
            .get(name)
            .is_some_and(|d| d.active)
    }

    /// Persistent definition of a domain
    pub(crate) fn domain_xml(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .domains
            .get(name)
            .and_then(|d| d.defined_xml.clone())
    }

    /// XML a domain was last booted from with `create`
    pub(crate) fn created_xml(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .domains
            .get(name)
            .and_then(|d| d.created_xml.clone())
    }

    /// Log a call and fail it if requested
    fn record(&self, call: String) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let fail = state.fail_on.iter().any(|p| call.starts_with(p.as_str()));
        state.calls.push(call.clone());
        if fail {
            return Err(eyre!("injected failure: {call}"));
        }
        Ok(())
    }
}

impl HypervisorConnection for FakeConnection {
    fn uri(&self) -> Option<&str> {
        Some("test:///fake")
    }

    fn list_domains(&self, filter: DomainFilter) -> Result<Vec<String>> {
        let state = self.state.borrow();
        Ok(state
            .domains
            .iter()
            .filter(|(_, d)| match filter {
                DomainFilter::Inactive => !d.active,
                DomainFilter::Active => d.active,
                DomainFilter::All => true,
            })
            .map(|(n, _)| n.clone())
            .collect())
    }

    fn domain_state(&self, name: &str) -> Result<DomainState> {
        let state = self.state.borrow();
        let dom = state
            .domains
            .get(name)
            .ok_or_else(|| eyre!("failed to get domain '{name}'"))?;
        Ok(if dom.active {
            DomainState::Running
        } else {
            DomainState::ShutOff
        })
    }

    fn define_domain(&self, xml: &str) -> Result<()> {
        let name = xml_name(xml)?;
        self.record(format!("define {name}"))?;
        let mut state = self.state.borrow_mut();
        let dom = state.domains.entry(name).or_default();
        dom.persistent = true;
        dom.defined_xml = Some(xml.to_string());
        Ok(())
    }

    fn create_domain(&self, xml: &str) -> Result<()> {
        let name = xml_name(xml)?;
        self.record(format!("create {name}"))?;
        let mut state = self.state.borrow_mut();
        let dom = state.domains.entry(name.clone()).or_default();
        if dom.active {
            return Err(eyre!(
                "Failed to create domain: error: operation failed: domain '{name}' is already active"
            ));
        }
        dom.active = true;
        dom.created_xml = Some(xml.to_string());
        Ok(())
    }

    fn start_domain(&self, name: &str) -> Result<()> {
        self.record(format!("start {name}"))?;
        let mut state = self.state.borrow_mut();
        let dom = state
            .domains
            .get_mut(name)
            .ok_or_else(|| eyre!("Failed to start domain '{name}': domain not found"))?;
        if dom.active {
            return Err(eyre!(
                "Failed to start domain '{name}': error: Requested operation is not valid: domain is already active"
            ));
        }
        dom.active = true;
        Ok(())
    }

    fn destroy_domain(&self, name: &str) -> Result<()> {
        self.record(format!("destroy {name}"))?;
        let mut state = self.state.borrow_mut();
        let dom = state
            .domains
            .get_mut(name)
            .ok_or_else(|| eyre!("Failed to destroy domain '{name}': domain not found"))?;
        if !dom.active {
            return Err(eyre!(
                "Failed to destroy domain '{name}': error: Requested operation is not valid: domain is not running"
            ));
        }
        dom.active = false;
        if !dom.persistent {
            state.domains.remove(name);
        }
        Ok(())
    }

    fn undefine_domain(&self, name: &str) -> Result<()> {
        self.record(format!("undefine {name}"))?;
        let mut state = self.state.borrow_mut();
        let dom = state
            .domains
            .get_mut(name)
            .ok_or_else(|| eyre!("Failed to undefine domain '{name}': domain not found"))?;
        if dom.active {
            dom.persistent = false;
            dom.defined_xml = None;
        } else {
            state.domains.remove(name);
        }
        Ok(())
    }

    fn capabilities(&self) -> Result<String> {
        Ok(self.state.borrow().capabilities.clone())
    }

    fn list_storage_pools(&self, include_inactive: bool) -> Result<Vec<String>> {
        let state = self.state.borrow();
        Ok(state
            .pools
            .iter()
            .filter(|(_, p)| include_inactive || p.active)
            .map(|(n, _)| n.clone())
            .collect())
    }

    fn define_storage_pool(&self, xml: &str) -> Result<()> {
        let name = xml_name(xml)?;
        self.record(format!("pool-define {name}"))?;
        let dom = xml_utils::parse_xml_dom(xml)?;
        let path = dom
            .child("target")
            .and_then(|t| t.child("path"))
            .map(|p| p.text_content().to_string())
            .unwrap_or_default();
        let mut state = self.state.borrow_mut();
        if state.pools.contains_key(&name) {
            return Err(eyre!(
                "Failed to define storage pool: error: operation failed: pool '{name}' already exists"
            ));
        }
        state.pools.insert(
            name.clone(),
            FakePool {
                path,
                ..Default::default()
            },
        );
        if state.racing_client {
            return Err(eyre!(
                "Failed to define storage pool: error: operation failed: pool '{name}' already exists"
            ));
        }
        Ok(())
    }

    fn build_storage_pool(&self, name: &str) -> Result<()> {
        self.record(format!("pool-build {name}"))?;
        if !self.state.borrow().pools.contains_key(name) {
            return Err(eyre!("Failed to build storage pool '{name}': not found"));
        }
        Ok(())
    }

    fn start_storage_pool(&self, name: &str) -> Result<()> {
        self.record(format!("pool-start {name}"))?;
        let mut state = self.state.borrow_mut();
        let pool = state
            .pools
            .get_mut(name)
            .ok_or_else(|| eyre!("Failed to start storage pool '{name}': not found"))?;
        if pool.active {
            return Err(eyre!(
                "Failed to start storage pool '{name}': error: Requested operation is not valid: storage pool '{name}' is already active"
            ));
        }
        pool.active = true;
        Ok(())
    }

    fn set_storage_pool_autostart(&self, name: &str) -> Result<()> {
        self.record(format!("pool-autostart {name}"))?;
        let mut state = self.state.borrow_mut();
        let pool = state
            .pools
            .get_mut(name)
            .ok_or_else(|| eyre!("Failed to autostart storage pool '{name}': not found"))?;
        pool.autostart = true;
        Ok(())
    }

    fn storage_pool_path(&self, pool: &str) -> Result<Utf8PathBuf> {
        let state = self.state.borrow();
        state
            .pools
            .get(pool)
            .map(|p| Utf8PathBuf::from(&p.path))
            .ok_or_else(|| eyre!("Failed to get storage pool info for '{pool}'"))
    }

    fn list_volumes(&self, pool: &str) -> Result<Vec<String>> {
        let state = self.state.borrow();
        let p = state
            .pools
            .get(pool)
            .filter(|p| p.active)
            .ok_or_else(|| eyre!("Failed to list volumes in pool '{pool}': pool not active"))?;
        Ok(p.volumes.keys().cloned().collect())
    }

    fn create_volume(&self, pool: &str, name: &str, capacity_bytes: u64) -> Result<Utf8PathBuf> {
        self.record(format!("vol-create-as {pool} {name} {capacity_bytes}"))?;
        let mut state = self.state.borrow_mut();
        let p = state
            .pools
            .get_mut(pool)
            .filter(|p| p.active)
            .ok_or_else(|| eyre!("Failed to create volume '{name}': pool '{pool}' not active"))?;
        if p.volumes.contains_key(name) {
            return Err(eyre!(
                "Failed to create volume '{name}': storage volume name '{name}' already in use"
            ));
        }
        p.volumes.insert(name.to_string(), capacity_bytes);
        Ok(Utf8PathBuf::from(&p.path).join(name))
    }

    fn volume_info(&self, pool: &str, name: &str) -> Result<VolumeInfo> {
        let state = self.state.borrow();
        let p = state
            .pools
            .get(pool)
            .ok_or_else(|| eyre!("pool '{pool}' not found"))?;
        let capacity = *p
            .volumes
            .get(name)
            .ok_or_else(|| eyre!("Failed to get info for volume '{name}'"))?;
        Ok(VolumeInfo {
            pool: pool.to_string(),
            name: name.to_string(),
            path: Utf8PathBuf::from(&p.path).join(name).into_string(),
            capacity,
            allocation: 0,
        })
    }

    fn list_networks(&self, include_inactive: bool) -> Result<Vec<String>> {
        let state = self.state.borrow();
        Ok(state
            .networks
            .iter()
            .filter(|(_, active)| include_inactive || **active)
            .map(|(n, _)| n.clone())
            .collect())
    }

    fn start_network(&self, name: &str) -> Result<()> {
        self.record(format!("net-start {name}"))?;
        let mut state = self.state.borrow_mut();
        let racing = state.racing_client;
        let active = state
            .networks
            .get_mut(name)
            .ok_or_else(|| eyre!("Failed to start network '{name}': network not found"))?;
        if *active || racing {
            *active = true;
            return Err(eyre!(
                "Failed to start network '{name}': error: Requested operation is not valid: network is already active"
            ));
        }
        *active = true;
        Ok(())
    }
}
