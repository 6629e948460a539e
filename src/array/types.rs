//! Wire types for the FlashArray REST 1.x API
//!
//! These mirror the JSON documents the array sends and accepts; they are
//! converted into domain records at the client boundary.

use crate::domain::ports::{HostRecord, HostUpdate, PortRecord, PrivateConnection, VolumeRecord};
use serde::{Deserialize, Serialize};

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HostResponse {
    pub name: String,
    #[serde(default)]
    pub iqn: Vec<String>,
    #[serde(default)]
    pub wwn: Vec<String>,
}

impl From<HostResponse> for HostRecord {
    fn from(host: HostResponse) -> Self {
        HostRecord {
            name: host.name,
            iqns: host.iqn,
            wwns: host.wwn,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VolumeResponse {
    pub name: String,
    pub size: u64,
}

impl From<VolumeResponse> for VolumeRecord {
    fn from(volume: VolumeResponse) -> Self {
        VolumeRecord {
            name: volume.name,
            size: volume.size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PortResponse {
    pub name: String,
    #[serde(default)]
    pub iqn: Option<String>,
    #[serde(default)]
    pub portal: Option<String>,
    #[serde(default)]
    pub wwn: Option<String>,
}

impl From<PortResponse> for PortRecord {
    fn from(port: PortResponse) -> Self {
        // Empty strings show up for ports that do not speak a protocol
        let present = |value: Option<String>| value.filter(|v| !v.is_empty());
        PortRecord {
            name: port.name,
            iqn: present(port.iqn),
            portal: present(port.portal),
            wwn: present(port.wwn),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConnectionResponse {
    pub host: String,
    pub name: String,
    pub lun: u32,
}

impl From<ConnectionResponse> for PrivateConnection {
    fn from(conn: ConnectionResponse) -> Self {
        PrivateConnection {
            host: conn.host,
            name: conn.name,
            lun: conn.lun,
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct SessionRequest<'a> {
    pub api_token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateHostRequest<'a> {
    pub iqnlist: &'a [String],
    pub wwnlist: &'a [String],
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct UpdateHostRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addiqnlist: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addwwnlist: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_password: Option<&'a str>,
}

impl<'a> From<&'a HostUpdate> for UpdateHostRequest<'a> {
    fn from(update: &'a HostUpdate) -> Self {
        let non_empty = |list: &'a Vec<String>| (!list.is_empty()).then_some(list.as_slice());
        UpdateHostRequest {
            addiqnlist: non_empty(&update.add_iqns),
            addwwnlist: non_empty(&update.add_wwns),
            host_user: update.chap.as_ref().map(|c| c.username.as_str()),
            host_password: update.chap.as_ref().map(|c| c.password.as_str()),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateVolumeRequest {
    pub size: u64,
}
