//! Volume Naming
//!
//! Maps opaque dataset identifiers to on-array volume names and back.
//! Names are `<base>-<cluster id, truncated>-<dataset uuid>` so that every
//! volume owned by one cluster shares a fixed prefix and the full name stays
//! within the array's object name limit.

use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Base tag for every object this adapter creates on the array
pub const BASE_PREFIX: &str = "flocker";

/// Maximum length of an array object name
pub const MAX_NAME_LEN: usize = 63;

/// Length of a hyphenated UUID string
const UUID_STR_LEN: usize = 36;

/// Longest `<base>-<cluster>` stem that still leaves room for `-<uuid>`
const MAX_STEM_LEN: usize = MAX_NAME_LEN - UUID_STR_LEN - 1;

// =============================================================================
// Volume Naming
// =============================================================================

/// Deterministic, one-way naming scheme scoped to one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeNaming {
    prefix: String,
}

impl VolumeNaming {
    /// Build the naming scheme for a cluster using the default base tag
    pub fn new(cluster_id: &Uuid) -> Self {
        Self::with_base(BASE_PREFIX, &cluster_id.to_string())
    }

    /// Build the naming scheme from an arbitrary base tag and cluster id
    ///
    /// The `<base>-<cluster>` stem is truncated so that prefix plus dataset
    /// UUID never exceeds [`MAX_NAME_LEN`]. Two clusters whose ids share the
    /// same leading characters end up with the same prefix.
    pub fn with_base(base: &str, cluster_id: &str) -> Self {
        let mut stem = format!("{}-{}", base, cluster_id);
        let mut end = stem.len().min(MAX_STEM_LEN);
        while !stem.is_char_boundary(end) {
            end -= 1;
        }
        stem.truncate(end);

        Self {
            prefix: format!("{}-", stem),
        }
    }

    /// The fixed prefix of every volume name this instance manages
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Derive the on-array volume name for a dataset
    pub fn volume_name(&self, dataset_id: &Uuid) -> String {
        format!("{}{}", self.prefix, dataset_id.hyphenated())
    }

    /// Recover the dataset id from a volume name produced by this scheme
    ///
    /// Returns `None` for names this instance does not manage.
    pub fn dataset_id(&self, volume_name: &str) -> Option<Uuid> {
        volume_name
            .strip_prefix(&self.prefix)
            .and_then(|rest| Uuid::parse_str(rest).ok())
    }

    /// Check whether a volume name carries this instance's prefix
    pub fn is_managed(&self, volume_name: &str) -> bool {
        volume_name.starts_with(&self.prefix)
    }
}

/// Name of the host object this adapter creates for the local machine
pub fn managed_host_name(hostname: &str) -> String {
    format!("{}-{}", BASE_PREFIX, hostname)
}
