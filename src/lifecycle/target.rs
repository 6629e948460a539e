//! Target Descriptor Synthesis
//!
//! Turns an array private connection plus the array's port list into the
//! protocol-specific descriptor the initiator consumes.

use crate::domain::ports::{
    ChapCredentials, IscsiTarget, PortRecord, PrivateConnection, StorageProtocol,
    TargetDescriptor,
};
use tracing::debug;

/// Pick the connection belonging to `host`
pub fn local_connection<'a>(
    connections: &'a [PrivateConnection],
    host: &str,
) -> Option<&'a PrivateConnection> {
    connections.iter().find(|conn| conn.host == host)
}

/// Build the descriptor for `connection`
///
/// For iSCSI every port exposing an IQN yields one path, all sharing the
/// connection's LUN since LUNs are host-scoped on the array. Ports that
/// report an IQN without a portal cannot be logged in to and are skipped.
pub fn build_target_descriptor(
    protocol: StorageProtocol,
    connection: &PrivateConnection,
    ports: &[PortRecord],
    chap: Option<&ChapCredentials>,
) -> TargetDescriptor {
    match protocol {
        StorageProtocol::Iscsi => {
            let targets: Vec<IscsiTarget> = ports
                .iter()
                .filter_map(|port| match (&port.iqn, &port.portal) {
                    (Some(iqn), Some(portal)) => Some(IscsiTarget {
                        lun: connection.lun,
                        iqn: iqn.clone(),
                        portal: portal.clone(),
                    }),
                    (Some(_), None) => {
                        debug!("Skipping iSCSI port {} without a portal", port.name);
                        None
                    }
                    _ => None,
                })
                .collect();

            TargetDescriptor::Iscsi {
                targets,
                auth: chap.cloned(),
            }
        }
        StorageProtocol::FibreChannel => TargetDescriptor::FibreChannel {
            lun: connection.lun,
            target_wwns: ports.iter().filter_map(|port| port.wwn.clone()).collect(),
        },
    }
}
