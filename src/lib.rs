//! FlashArray Block Device Adapter
//!
//! Block volume lifecycle (create, attach, detach, destroy, enumerate,
//! device path resolution) for FlashArray volumes, reconciling array-side
//! host registration with local iSCSI / Fibre Channel initiator state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Volume Manager                                  │
//! │   naming · two-phase attach/detach · enumeration · device path cache     │
//! ├───────────────────────────────┬─────────────────────────────────────────┤
//! │        Host Resolver          │        Target Synthesis                  │
//! │  (identity match / managed    │  (iSCSI paths per port, FC WWN list)     │
//! │   name fallback, additive)    │                                          │
//! ├───────────────────────────────┴─────────────────────────────────────────┤
//! │                               Ports                                      │
//! │  ┌──────────────────────────────┐   ┌────────────────────────────────┐  │
//! │  │        ArrayClient           │   │          Initiator             │  │
//! │  │  PurityRestClient (REST 1.x) │   │  LinuxInitiator (iscsiadm,     │  │
//! │  │                              │   │  sysfs, dm-multipath)          │  │
//! │  └──────────────────────────────┘   └────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`lifecycle`]: Volume manager, host resolver, target synthesis, path cache
//! - [`domain`]: Port traits, records, and the volume naming scheme
//! - [`array`]: FlashArray REST client
//! - [`initiator`]: Linux initiator adapter
//! - [`config`]: Agent configuration loading and validation
//! - [`error`]: Error types and handling
//! - [`telemetry`]: Optional stock log subscriber

pub mod array;
pub mod config;
pub mod domain;
pub mod error;
pub mod initiator;
pub mod lifecycle;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use array::PurityRestClient;

pub use config::{ArrayConfig, ArraySettings, ConfigWarning};

pub use domain::naming::{managed_host_name, VolumeNaming};
pub use domain::ports::{
    ArrayClient, ArrayClientRef, BlockDeviceVolume, ChapCredentials, Initiator,
    InitiatorIdentity, InitiatorRef, StorageProtocol, TargetDescriptor,
};

pub use error::{ArrayError, Error, ErrorKind, Result};

pub use initiator::{LinuxInitiator, LinuxInitiatorConfig};

pub use lifecycle::{round_up_to_allocation_unit, VolumeManager, ALLOCATION_UNIT};

pub use telemetry::{init_logging, LogConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
