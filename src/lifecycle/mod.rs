//! Volume Lifecycle
//!
//! Host resolution, target synthesis, device path caching, and the volume
//! manager that ties them together.

pub mod host;
pub mod manager;
pub mod path_cache;
pub mod target;

pub use host::*;
pub use manager::*;
pub use path_cache::*;
pub use target::*;
