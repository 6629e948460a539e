//! Host Resolver
//!
//! Maps the local initiator identity onto the array host object used for
//! every connect/disconnect call, creating or patching that host when host
//! management is enabled.
//!
//! Array hosts are shared and may be registered for other purposes, so the
//! resolver only ever adds initiators and never removes or renames anything.

use crate::domain::ports::{
    ArrayClientRef, ChapCredentials, HostRecord, HostUpdate, InitiatorIdentity, StorageProtocol,
};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

/// Finds or provisions the array host representing this machine
pub struct HostResolver {
    array: ArrayClientRef,
    protocol: StorageProtocol,
    manage_hosts: bool,
    chap: Option<ChapCredentials>,
    managed_name: String,
}

impl HostResolver {
    pub fn new(
        array: ArrayClientRef,
        protocol: StorageProtocol,
        manage_hosts: bool,
        chap: Option<ChapCredentials>,
        managed_name: impl Into<String>,
    ) -> Self {
        Self {
            array,
            protocol,
            manage_hosts,
            chap,
            managed_name: managed_name.into(),
        }
    }

    /// Name used when this resolver creates a host
    pub fn managed_name(&self) -> &str {
        &self.managed_name
    }

    /// Find the host for `identity`
    ///
    /// A host holding one of the local identifiers for the configured
    /// protocol wins. Otherwise the host carrying the managed name is
    /// returned, if any.
    pub async fn find_host(&self, identity: &InitiatorIdentity) -> Result<Option<HostRecord>> {
        let hosts = self.array.list_hosts().await?;
        let mut fallback = None;

        for host in hosts {
            debug!("Looking at array host {}", host.name);

            if self.matches_identity(&host, identity) {
                debug!("Array host {} matches local initiator", host.name);
                return Ok(Some(host));
            }

            if fallback.is_none() && host.name == self.managed_name {
                fallback = Some(host);
            }
        }

        Ok(fallback)
    }

    /// Resolve the host name to use, provisioning it when allowed
    pub async fn ensure_host(&self, identity: &InitiatorIdentity) -> Result<String> {
        let found = self.find_host(identity).await?;

        if !self.manage_hosts {
            return match found {
                Some(host) => Ok(host.name),
                None => {
                    warn!("No array host matches the local initiator and host management is disabled");
                    Err(Error::UnmanagedHostNotFound)
                }
            };
        }

        let host = match found {
            Some(host) => {
                let update = HostUpdate {
                    add_iqns: self.missing_iqns(&host, identity),
                    add_wwns: self.missing_wwns(&host, identity),
                    chap: None,
                };
                if !update.is_empty() {
                    info!(
                        "Adding {} IQN(s) and {} WWN(s) to array host {}",
                        update.add_iqns.len(),
                        update.add_wwns.len(),
                        host.name
                    );
                    self.array.update_host(&host.name, &update).await?;
                }
                host
            }
            None => {
                info!("Creating array host {}", self.managed_name);
                self.array
                    .create_host(&self.managed_name, &identity.iqns, &identity.wwpns)
                    .await?
            }
        };

        if let (StorageProtocol::Iscsi, Some(chap)) = (self.protocol, &self.chap) {
            debug!("Setting CHAP credentials on array host {}", host.name);
            let update = HostUpdate {
                chap: Some(chap.clone()),
                ..Default::default()
            };
            self.array.update_host(&host.name, &update).await?;
        }

        Ok(host.name)
    }

    fn matches_identity(&self, host: &HostRecord, identity: &InitiatorIdentity) -> bool {
        match self.protocol {
            StorageProtocol::FibreChannel => identity
                .wwpns
                .iter()
                .any(|wwpn| host.wwns.iter().any(|w| w.eq_ignore_ascii_case(wwpn))),
            StorageProtocol::Iscsi => identity.iqns.iter().any(|iqn| host.iqns.contains(iqn)),
        }
    }

    fn missing_iqns(&self, host: &HostRecord, identity: &InitiatorIdentity) -> Vec<String> {
        if self.protocol != StorageProtocol::Iscsi {
            return Vec::new();
        }
        identity
            .iqns
            .iter()
            .filter(|iqn| !host.iqns.contains(iqn))
            .cloned()
            .collect()
    }

    fn missing_wwns(&self, host: &HostRecord, identity: &InitiatorIdentity) -> Vec<String> {
        if self.protocol != StorageProtocol::FibreChannel {
            return Vec::new();
        }
        identity
            .wwpns
            .iter()
            .filter(|wwpn| !host.wwns.iter().any(|w| w.eq_ignore_ascii_case(wwpn)))
            .cloned()
            .collect()
    }
}
