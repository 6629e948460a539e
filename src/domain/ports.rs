//! Domain Ports - Core trait definitions for the block device adapter
//!
//! These traits define the boundaries between the volume lifecycle core and
//! the two external systems it reconciles: the storage array control plane
//! and the local OS initiator stack. Adapters implement these traits to
//! provide concrete functionality.

use crate::error::{ArrayError, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// Storage Protocol
// =============================================================================

/// Transport used between the local initiator and the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageProtocol {
    #[default]
    Iscsi,
    FibreChannel,
}

impl std::fmt::Display for StorageProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageProtocol::Iscsi => write!(f, "ISCSI"),
            StorageProtocol::FibreChannel => write!(f, "FIBRE_CHANNEL"),
        }
    }
}

impl FromStr for StorageProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ISCSI" => Ok(StorageProtocol::Iscsi),
            "FIBRE_CHANNEL" | "FC" => Ok(StorageProtocol::FibreChannel),
            _ => Err(Error::UnknownStorageProtocol(s.to_string())),
        }
    }
}

// =============================================================================
// CHAP Credentials
// =============================================================================

/// CHAP username/password pair used for iSCSI session authentication
#[derive(Clone, PartialEq, Eq)]
pub struct ChapCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ChapCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChapCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Array Records
// =============================================================================

/// Array-side host object grouping initiator identities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: String,
    #[serde(default)]
    pub iqns: Vec<String>,
    #[serde(default)]
    pub wwns: Vec<String>,
}

/// Changes applied to an existing host record
///
/// Initiator lists are additive only, existing entries are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostUpdate {
    pub add_iqns: Vec<String>,
    pub add_wwns: Vec<String>,
    pub chap: Option<ChapCredentials>,
}

impl HostUpdate {
    /// True when applying the update would not change the host
    pub fn is_empty(&self) -> bool {
        self.add_iqns.is_empty() && self.add_wwns.is_empty() && self.chap.is_none()
    }
}

/// Array-side volume object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub name: String,
    /// Provisioned size in bytes
    pub size: u64,
}

/// Array target port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub name: String,
    /// Target IQN, present on iSCSI-capable ports
    pub iqn: Option<String>,
    /// Target portal (`ip:port`), present on iSCSI-capable ports
    pub portal: Option<String>,
    /// Target WWN, present on Fibre Channel ports
    pub wwn: Option<String>,
}

/// Grant linking one host to one volume via a host-scoped LUN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateConnection {
    pub host: String,
    /// Volume name
    pub name: String,
    pub lun: u32,
}

/// Result type for array client operations
pub type ArrayResult<T> = std::result::Result<T, ArrayError>;

// =============================================================================
// Array Client Port
// =============================================================================

/// Port for storage array control plane operations
#[async_trait]
pub trait ArrayClient: Send + Sync {
    /// List every host record on the array
    async fn list_hosts(&self) -> ArrayResult<Vec<HostRecord>>;

    /// Create a host seeded with the given initiators
    async fn create_host(
        &self,
        name: &str,
        iqns: &[String],
        wwns: &[String],
    ) -> ArrayResult<HostRecord>;

    /// Apply an additive update to a host
    async fn update_host(&self, name: &str, update: &HostUpdate) -> ArrayResult<()>;

    /// Create a volume of `size` bytes
    async fn create_volume(&self, name: &str, size: u64) -> ArrayResult<VolumeRecord>;

    /// Destroy a volume
    async fn destroy_volume(&self, name: &str) -> ArrayResult<()>;

    /// Get a single volume
    async fn get_volume(&self, name: &str) -> ArrayResult<VolumeRecord>;

    /// List all volumes
    async fn list_volumes(&self) -> ArrayResult<Vec<VolumeRecord>>;

    /// Connect a host to a volume, returning the new private connection
    async fn connect_host(&self, host: &str, volume: &str) -> ArrayResult<PrivateConnection>;

    /// Remove the connection between a host and a volume
    async fn disconnect_host(&self, host: &str, volume: &str) -> ArrayResult<()>;

    /// List array target ports
    async fn list_ports(&self) -> ArrayResult<Vec<PortRecord>>;

    /// List private host connections of a volume
    async fn list_volume_private_connections(
        &self,
        volume: &str,
    ) -> ArrayResult<Vec<PrivateConnection>>;
}

// =============================================================================
// Initiator Types
// =============================================================================

/// Identity of the local initiator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatorIdentity {
    /// Fibre Channel port WWNs of local HBAs
    pub wwpns: Vec<String>,
    /// iSCSI qualified names of the local initiator
    pub iqns: Vec<String>,
}

impl InitiatorIdentity {
    /// Build an identity, dropping blank entries
    pub fn new<W, I>(wwpns: W, iqns: I) -> Self
    where
        W: IntoIterator,
        W::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let clean = |values: Vec<String>| -> Vec<String> {
            values
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        };

        Self {
            wwpns: clean(wwpns.into_iter().map(Into::into).collect()),
            iqns: clean(iqns.into_iter().map(Into::into).collect()),
        }
    }
}

/// One iSCSI path to a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiTarget {
    pub lun: u32,
    pub iqn: String,
    pub portal: String,
}

/// Protocol-specific description of how to reach a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetDescriptor {
    /// One entry per array iSCSI port, all sharing the host-scoped LUN
    Iscsi {
        targets: Vec<IscsiTarget>,
        auth: Option<ChapCredentials>,
    },
    /// A single LUN reachable through every array WWN
    FibreChannel { lun: u32, target_wwns: Vec<String> },
}

impl TargetDescriptor {
    /// Protocol of this descriptor
    pub fn protocol(&self) -> StorageProtocol {
        match self {
            TargetDescriptor::Iscsi { .. } => StorageProtocol::Iscsi,
            TargetDescriptor::FibreChannel { .. } => StorageProtocol::FibreChannel,
        }
    }
}

// =============================================================================
// Initiator Port
// =============================================================================

/// Port for local OS initiator operations
#[async_trait]
pub trait Initiator: Send + Sync {
    /// Discover the local initiator identity
    async fn identity(&self) -> Result<InitiatorIdentity>;

    /// Log in to / scan for the described target
    async fn connect(&self, target: &TargetDescriptor) -> Result<()>;

    /// Tear down local sessions and devices for the described target
    async fn disconnect(&self, target: &TargetDescriptor) -> Result<()>;

    /// Enumerate candidate raw device paths for the described target
    async fn device_paths(&self, target: &TargetDescriptor) -> Result<Vec<PathBuf>>;

    /// Resolve the multipath aggregate device for a raw device path
    async fn multipath_device(&self, device: &Path) -> Result<PathBuf>;
}

// =============================================================================
// Block Device Descriptor
// =============================================================================

/// Volume as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceVolume {
    /// External identifier, equal to the on-array volume name
    pub blockdevice_id: String,
    /// Size in bytes
    pub size: u64,
    /// Compute instance the volume is attached to
    pub attached_to: Option<String>,
    pub dataset_id: Uuid,
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ArrayClientRef = Arc<dyn ArrayClient>;
pub type InitiatorRef = Arc<dyn Initiator>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_storage_protocol_parse() {
        assert_eq!("ISCSI".parse::<StorageProtocol>().unwrap(), StorageProtocol::Iscsi);
        assert_eq!("iscsi".parse::<StorageProtocol>().unwrap(), StorageProtocol::Iscsi);
        assert_eq!(
            "FIBRE_CHANNEL".parse::<StorageProtocol>().unwrap(),
            StorageProtocol::FibreChannel
        );
        assert_eq!("fc".parse::<StorageProtocol>().unwrap(), StorageProtocol::FibreChannel);
        assert_matches!(
            "NVME".parse::<StorageProtocol>(),
            Err(Error::UnknownStorageProtocol(p)) if p == "NVME"
        );
    }

    #[test]
    fn test_storage_protocol_display() {
        assert_eq!(format!("{}", StorageProtocol::Iscsi), "ISCSI");
        assert_eq!(format!("{}", StorageProtocol::FibreChannel), "FIBRE_CHANNEL");
    }

    #[test]
    fn test_identity_drops_blank_entries() {
        let identity = InitiatorIdentity::new(
            vec!["21000024ff3a1b2c", " "],
            vec!["iqn.1994-05.com.redhat:abc"],
        );
        assert_eq!(identity.wwpns, vec!["21000024ff3a1b2c".to_string()]);
        assert_eq!(identity.iqns.len(), 1);
    }

    #[test]
    fn test_chap_debug_redacts_password() {
        let chap = ChapCredentials {
            username: "user".into(),
            password: "secret".into(),
        };
        let debug = format!("{:?}", chap);
        assert!(debug.contains("user"));
        assert!(!debug.contains("secret"));
    }
}
