//! In-memory test doubles for the array and initiator ports
//!
//! `FakeArray` reproduces the array's error semantics (already exists, not
//! found, pending eradication, not connected) and counts calls per method.
//! `FakeInitiator` materialises device nodes in a temporary directory on
//! connect so path resolution can run against a real filesystem.

use crate::domain::ports::{
    ArrayClient, ArrayResult, ChapCredentials, HostRecord, HostUpdate, Initiator,
    InitiatorIdentity, PortRecord, PrivateConnection, TargetDescriptor, VolumeRecord,
};
use crate::error::{ArrayError, Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

// =============================================================================
// Fake Array
// =============================================================================

#[derive(Default)]
struct ArrayState {
    hosts: Vec<HostRecord>,
    chap: HashMap<String, ChapCredentials>,
    volumes: BTreeMap<String, u64>,
    destroyed: BTreeSet<String>,
    connections: Vec<PrivateConnection>,
    ports: Vec<PortRecord>,
}

/// In-memory array
#[derive(Default)]
pub struct FakeArray {
    state: Mutex<ArrayState>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, ArrayError>>,
}

fn bad_request(message: &str) -> ArrayError {
    ArrayError::from_response(400, message)
}

impl FakeArray {
    /// Array with two iSCSI ports and two FC ports
    pub fn new() -> Self {
        let array = Self::default();
        array.state.lock().ports = vec![
            PortRecord {
                name: "CT0.ETH4".into(),
                iqn: Some("iqn.2010-06.com.purestorage:flasharray.1".into()),
                portal: Some("10.0.0.10:3260".into()),
                wwn: None,
            },
            PortRecord {
                name: "CT1.ETH4".into(),
                iqn: Some("iqn.2010-06.com.purestorage:flasharray.1".into()),
                portal: Some("10.0.0.11:3260".into()),
                wwn: None,
            },
            PortRecord {
                name: "CT0.FC0".into(),
                wwn: Some("524a937df35c1a00".into()),
                ..Default::default()
            },
            PortRecord {
                name: "CT1.FC0".into(),
                wwn: Some("524a937df35c1a10".into()),
                ..Default::default()
            },
        ];
        array
    }

    pub fn add_host(&self, name: &str, iqns: &[String], wwns: &[String]) {
        self.state.lock().hosts.push(HostRecord {
            name: name.into(),
            iqns: iqns.to_vec(),
            wwns: wwns.to_vec(),
        });
    }

    pub fn add_volume(&self, name: &str, size: u64) {
        self.state.lock().volumes.insert(name.into(), size);
    }

    /// Connect bypassing call counting and failure injection
    pub fn add_connection(&self, host: &str, volume: &str, lun: u32) {
        self.state.lock().connections.push(PrivateConnection {
            host: host.into(),
            name: volume.into(),
            lun,
        });
    }

    pub fn host(&self, name: &str) -> Option<HostRecord> {
        self.state.lock().hosts.iter().find(|h| h.name == name).cloned()
    }

    pub fn host_chap(&self, name: &str) -> Option<ChapCredentials> {
        self.state.lock().chap.get(name).cloned()
    }

    pub fn connections(&self, volume: &str) -> Vec<PrivateConnection> {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|c| c.name == volume)
            .cloned()
            .collect()
    }

    pub fn is_destroyed(&self, volume: &str) -> bool {
        self.state.lock().destroyed.contains(volume)
    }

    /// Number of calls made to `method`
    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().get(method).copied().unwrap_or(0)
    }

    /// Make the next call to `method` fail with `error`
    pub fn fail_next(&self, method: &'static str, error: ArrayError) {
        self.failures.lock().insert(method, error);
    }

    fn enter(&self, method: &'static str) -> ArrayResult<()> {
        *self.calls.lock().entry(method).or_insert(0) += 1;
        match self.failures.lock().remove(method) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn volume_missing(state: &ArrayState, name: &str) -> Option<ArrayError> {
    if state.destroyed.contains(name) {
        Some(bad_request("Volume has been destroyed."))
    } else if !state.volumes.contains_key(name) {
        Some(bad_request("Volume does not exist."))
    } else {
        None
    }
}

#[async_trait]
impl ArrayClient for FakeArray {
    async fn list_hosts(&self) -> ArrayResult<Vec<HostRecord>> {
        self.enter("list_hosts")?;
        Ok(self.state.lock().hosts.clone())
    }

    async fn create_host(
        &self,
        name: &str,
        iqns: &[String],
        wwns: &[String],
    ) -> ArrayResult<HostRecord> {
        self.enter("create_host")?;
        let mut state = self.state.lock();
        if state.hosts.iter().any(|h| h.name == name) {
            return Err(bad_request("Host already exists."));
        }
        let host = HostRecord {
            name: name.into(),
            iqns: iqns.to_vec(),
            wwns: wwns.to_vec(),
        };
        state.hosts.push(host.clone());
        Ok(host)
    }

    async fn update_host(&self, name: &str, update: &HostUpdate) -> ArrayResult<()> {
        self.enter("update_host")?;
        let mut state = self.state.lock();
        let host = state
            .hosts
            .iter_mut()
            .find(|h| h.name == name)
            .ok_or_else(|| bad_request("Host does not exist."))?;

        for iqn in &update.add_iqns {
            if !host.iqns.contains(iqn) {
                host.iqns.push(iqn.clone());
            }
        }
        for wwn in &update.add_wwns {
            if !host.wwns.contains(wwn) {
                host.wwns.push(wwn.clone());
            }
        }
        if let Some(chap) = &update.chap {
            state.chap.insert(name.into(), chap.clone());
        }
        Ok(())
    }

    async fn create_volume(&self, name: &str, size: u64) -> ArrayResult<VolumeRecord> {
        self.enter("create_volume")?;
        let mut state = self.state.lock();
        if state.volumes.contains_key(name) || state.destroyed.contains(name) {
            return Err(bad_request("Volume already exists."));
        }
        state.volumes.insert(name.into(), size);
        Ok(VolumeRecord {
            name: name.into(),
            size,
        })
    }

    async fn destroy_volume(&self, name: &str) -> ArrayResult<()> {
        self.enter("destroy_volume")?;
        let mut state = self.state.lock();
        if let Some(error) = volume_missing(&state, name) {
            return Err(error);
        }
        state.volumes.remove(name);
        state.destroyed.insert(name.into());
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> ArrayResult<VolumeRecord> {
        self.enter("get_volume")?;
        let state = self.state.lock();
        match state.volumes.get(name) {
            Some(size) => Ok(VolumeRecord {
                name: name.into(),
                size: *size,
            }),
            None => Err(bad_request("Volume does not exist.")),
        }
    }

    async fn list_volumes(&self) -> ArrayResult<Vec<VolumeRecord>> {
        self.enter("list_volumes")?;
        Ok(self
            .state
            .lock()
            .volumes
            .iter()
            .map(|(name, size)| VolumeRecord {
                name: name.clone(),
                size: *size,
            })
            .collect())
    }

    async fn connect_host(&self, host: &str, volume: &str) -> ArrayResult<PrivateConnection> {
        self.enter("connect_host")?;
        let mut state = self.state.lock();
        if !state.hosts.iter().any(|h| h.name == host) {
            return Err(bad_request("Host does not exist."));
        }
        if let Some(error) = volume_missing(&state, volume) {
            return Err(error);
        }
        if state
            .connections
            .iter()
            .any(|c| c.host == host && c.name == volume)
        {
            return Err(bad_request("Connection already exists."));
        }

        let used: BTreeSet<u32> = state
            .connections
            .iter()
            .filter(|c| c.host == host)
            .map(|c| c.lun)
            .collect();
        let lun = (1..).find(|lun| !used.contains(lun)).unwrap_or(1);

        let connection = PrivateConnection {
            host: host.into(),
            name: volume.into(),
            lun,
        };
        state.connections.push(connection.clone());
        Ok(connection)
    }

    async fn disconnect_host(&self, host: &str, volume: &str) -> ArrayResult<()> {
        self.enter("disconnect_host")?;
        let mut state = self.state.lock();
        if let Some(error) = volume_missing(&state, volume) {
            return Err(error);
        }
        let before = state.connections.len();
        state
            .connections
            .retain(|c| !(c.host == host && c.name == volume));
        if state.connections.len() == before {
            return Err(bad_request("Host is not connected to volume."));
        }
        Ok(())
    }

    async fn list_ports(&self) -> ArrayResult<Vec<PortRecord>> {
        self.enter("list_ports")?;
        Ok(self.state.lock().ports.clone())
    }

    async fn list_volume_private_connections(
        &self,
        volume: &str,
    ) -> ArrayResult<Vec<PrivateConnection>> {
        self.enter("list_volume_private_connections")?;
        let state = self.state.lock();
        if let Some(error) = volume_missing(&state, volume) {
            return Err(error);
        }
        Ok(state
            .connections
            .iter()
            .filter(|c| c.name == volume)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Fake Initiator
// =============================================================================

/// Initiator that creates device files under a temporary directory
pub struct FakeInitiator {
    identity: InitiatorIdentity,
    root: TempDir,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    path_lookups: AtomicUsize,
}

impl FakeInitiator {
    pub fn new(identity: InitiatorIdentity) -> Self {
        Self {
            identity,
            root: TempDir::new().expect("temp dir"),
            fail_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            path_lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of `device_paths` calls
    pub fn path_lookups(&self) -> usize {
        self.path_lookups.load(Ordering::SeqCst)
    }

    fn paths_for(&self, target: &TargetDescriptor) -> Vec<PathBuf> {
        match target {
            TargetDescriptor::Iscsi { targets, .. } => targets
                .iter()
                .map(|t| {
                    self.root
                        .path()
                        .join(format!("ip-{}-lun-{}", t.portal.replace(':', "_"), t.lun))
                })
                .collect(),
            TargetDescriptor::FibreChannel { lun, target_wwns } => target_wwns
                .iter()
                .map(|wwn| self.root.path().join(format!("fc-0x{}-lun-{}", wwn, lun)))
                .collect(),
        }
    }
}

#[async_trait]
impl Initiator for FakeInitiator {
    async fn identity(&self) -> Result<InitiatorIdentity> {
        Ok(self.identity.clone())
    }

    async fn connect(&self, target: &TargetDescriptor) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::initiator("connect", "login timed out"));
        }
        for path in self.paths_for(target) {
            std::fs::write(&path, b"")?;
        }
        Ok(())
    }

    async fn disconnect(&self, target: &TargetDescriptor) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        for path in self.paths_for(target) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    async fn device_paths(&self, target: &TargetDescriptor) -> Result<Vec<PathBuf>> {
        self.path_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.paths_for(target))
    }

    async fn multipath_device(&self, device: &Path) -> Result<PathBuf> {
        let name = device
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(PathBuf::from("/dev/mapper").join(format!("mpath-{}", name)))
    }
}
