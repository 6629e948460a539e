//! Initiator Adapter
//!
//! Linux implementation of the [`crate::domain::Initiator`] port on top of
//! open-iscsi, sysfs, and device-mapper multipath.

pub mod command;
pub mod linux;

pub use command::*;
pub use linux::*;
