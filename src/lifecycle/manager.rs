//! Volume Lifecycle Manager
//!
//! Orchestrates volume create/destroy, two-phase attach/detach across the
//! array and the local initiator, enumeration with attachment state, and
//! device path resolution.
//!
//! Attach is at-least-once: when the array-side connect succeeds but the
//! local connect fails, the array connection is left in place. A repeated
//! attach notices the existing connection and resumes the local phase.

use crate::array::PurityRestClient;
use crate::config::ArrayConfig;
use crate::domain::naming::{managed_host_name, VolumeNaming};
use crate::domain::ports::{
    ArrayClientRef, BlockDeviceVolume, InitiatorRef, PrivateConnection, TargetDescriptor,
};
use crate::error::{ArrayError, Error, Result};
use crate::initiator::{CommandRunner, LinuxInitiator, LinuxInitiatorConfig, ProcessRunner};
use crate::lifecycle::host::HostResolver;
use crate::lifecycle::path_cache::DevicePathCache;
use crate::lifecycle::target::{build_target_descriptor, local_connection};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Allocation granularity of array volumes
pub const ALLOCATION_UNIT: u64 = 1024 * 1024;

/// Round `size` up to the next multiple of [`ALLOCATION_UNIT`]
pub fn round_up_to_allocation_unit(size: u64) -> u64 {
    size.div_ceil(ALLOCATION_UNIT).saturating_mul(ALLOCATION_UNIT)
}

// =============================================================================
// Volume Manager
// =============================================================================

/// Block device lifecycle manager for one cluster on one array
pub struct VolumeManager {
    config: ArrayConfig,
    array: ArrayClientRef,
    initiator: InitiatorRef,
    naming: VolumeNaming,
    resolver: HostResolver,
    /// Array host used for every connect/disconnect
    host: RwLock<String>,
    paths: DevicePathCache,
}

impl VolumeManager {
    /// Build a manager talking to the configured array from this machine
    pub async fn connect(config: ArrayConfig, cluster_id: Uuid) -> Result<Self> {
        let array: ArrayClientRef = Arc::new(PurityRestClient::new(&config)?);
        let initiator: InitiatorRef =
            Arc::new(LinuxInitiator::new(LinuxInitiatorConfig::default()));
        let hostname = local_hostname(&ProcessRunner).await?;

        Self::with_adapters(config, cluster_id, array, initiator, hostname).await
    }

    /// Build a manager on top of the given adapters
    ///
    /// Resolves (and when allowed provisions) the array host once.
    pub async fn with_adapters(
        config: ArrayConfig,
        cluster_id: Uuid,
        array: ArrayClientRef,
        initiator: InitiatorRef,
        hostname: impl Into<String>,
    ) -> Result<Self> {
        let hostname = hostname.into();
        info!(
            "Initializing volume manager for cluster {} on host {} ({:?})",
            cluster_id, hostname, config
        );

        let resolver = HostResolver::new(
            array.clone(),
            config.protocol(),
            config.manage_hosts(),
            config.chap().cloned(),
            managed_host_name(&hostname),
        );

        let manager = Self {
            naming: VolumeNaming::new(&cluster_id),
            config,
            array,
            initiator,
            resolver,
            host: RwLock::new(String::new()),
            paths: DevicePathCache::new(),
        };

        manager.refresh_host().await?;
        Ok(manager)
    }

    /// Re-discover the local initiator and re-resolve the array host
    pub async fn refresh_host(&self) -> Result<String> {
        let identity = self.initiator.identity().await?;
        debug!("Local initiator identity: {:?}", identity);

        let name = self.resolver.ensure_host(&identity).await?;
        info!("Using array host {}", name);
        *self.host.write() = name.clone();
        Ok(name)
    }

    /// Array host name identifying this compute instance
    pub fn compute_instance_id(&self) -> String {
        self.host.read().clone()
    }

    /// Size granularity callers should round to before creating volumes
    pub fn allocation_unit(&self) -> u64 {
        ALLOCATION_UNIT
    }

    /// Name a host created by this manager would carry
    pub fn managed_host_name(&self) -> &str {
        self.resolver.managed_name()
    }

    pub fn volume_naming(&self) -> &VolumeNaming {
        &self.naming
    }

    // -------------------------------------------------------------------------
    // Create / Destroy
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn create_volume(&self, dataset_id: Uuid, size: u64) -> Result<BlockDeviceVolume> {
        let name = self.naming.volume_name(&dataset_id);
        info!("Creating volume {}", name);

        self.array.create_volume(&name, size).await?;

        Ok(BlockDeviceVolume {
            blockdevice_id: name,
            size,
            attached_to: None,
            dataset_id,
        })
    }

    /// Create a volume; every profile maps to the same single tier
    #[instrument(skip(self))]
    pub async fn create_volume_with_profile(
        &self,
        dataset_id: Uuid,
        size: u64,
        profile: &str,
    ) -> Result<BlockDeviceVolume> {
        debug!("Ignoring storage profile {}", profile);
        self.create_volume(dataset_id, size).await
    }

    #[instrument(skip(self))]
    pub async fn destroy_volume(&self, blockdevice_id: &str) -> Result<()> {
        info!("Destroying volume {}", blockdevice_id);
        self.paths.evict(blockdevice_id);

        let host = self.compute_instance_id();
        match self.array.disconnect_host(&host, blockdevice_id).await {
            Ok(()) => debug!("Disconnected {} from {} before destroy", blockdevice_id, host),
            Err(ArrayError::NotConnected { .. }) => {}
            Err(e) => return Err(volume_error(blockdevice_id, e)),
        }

        self.array
            .destroy_volume(blockdevice_id)
            .await
            .map_err(|e| volume_error(blockdevice_id, e))
    }

    // -------------------------------------------------------------------------
    // Attach / Detach
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn attach_volume(
        &self,
        blockdevice_id: &str,
        attach_to: &str,
    ) -> Result<BlockDeviceVolume> {
        info!("Attaching volume {} to {}", blockdevice_id, attach_to);
        let host = self.compute_instance_id();
        if attach_to != host {
            warn!(
                "Attach requested for {} but this instance is {}",
                attach_to, host
            );
        }

        // Phase 1: array
        let target = match self.array.connect_host(&host, blockdevice_id).await {
            Ok(connection) => self.target_for(&connection).await?,
            Err(ArrayError::AlreadyExists { .. }) => {
                self.resume_attach(blockdevice_id, &host).await?
            }
            Err(e) => return Err(volume_error(blockdevice_id, e)),
        };

        // Phase 2: local initiator, no rollback of phase 1 on failure
        if let Err(e) = self.initiator.connect(&target).await {
            warn!(
                "Local connect of {} failed, array connection kept for retry: {}",
                blockdevice_id, e
            );
            return Err(e);
        }

        let volume = self
            .array
            .get_volume(blockdevice_id)
            .await
            .map_err(|e| volume_error(blockdevice_id, e))?;
        let dataset_id = self
            .naming
            .dataset_id(&volume.name)
            .ok_or_else(|| Error::unknown_volume(blockdevice_id))?;

        info!("Finished attaching volume {}", blockdevice_id);
        Ok(BlockDeviceVolume {
            blockdevice_id: volume.name,
            size: volume.size,
            attached_to: Some(attach_to.to_string()),
            dataset_id,
        })
    }

    /// Decide whether an existing array connection is a finished attach or
    /// a half-done one that needs its local phase replayed
    async fn resume_attach(&self, blockdevice_id: &str, host: &str) -> Result<TargetDescriptor> {
        let target = match self.target_info(blockdevice_id, host).await {
            Ok(target) => target,
            Err(Error::UnattachedVolume { .. }) => {
                return Err(Error::already_attached(blockdevice_id))
            }
            Err(e) => return Err(e),
        };

        if self.first_existing_path(&target).await?.is_some() {
            return Err(Error::already_attached(blockdevice_id));
        }

        warn!(
            "Volume {} is connected on the array but not locally, resuming attach",
            blockdevice_id
        );
        Ok(target)
    }

    #[instrument(skip(self))]
    pub async fn detach_volume(&self, blockdevice_id: &str) -> Result<()> {
        info!("Detaching volume {}", blockdevice_id);
        let host = self.compute_instance_id();
        let target = self.target_info(blockdevice_id, &host).await?;

        self.paths.evict(blockdevice_id);

        // Local side first so no session points at a vanished target
        self.initiator.disconnect(&target).await?;

        match self.array.disconnect_host(&host, blockdevice_id).await {
            Ok(()) => {}
            Err(ArrayError::NotConnected { .. }) => {
                return Err(Error::unattached(blockdevice_id))
            }
            Err(e) => return Err(volume_error(blockdevice_id, e)),
        }

        info!("Finished detaching volume {}", blockdevice_id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Enumeration
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn list_volumes(&self) -> Result<Vec<BlockDeviceVolume>> {
        let host = self.compute_instance_id();
        let mut volumes = Vec::new();

        for volume in self.array.list_volumes().await? {
            if !self.naming.is_managed(&volume.name) {
                continue;
            }
            let Some(dataset_id) = self.naming.dataset_id(&volume.name) else {
                warn!("Skipping volume {} with unparseable dataset id", volume.name);
                continue;
            };

            let connections = match self
                .array
                .list_volume_private_connections(&volume.name)
                .await
            {
                Ok(connections) => connections,
                Err(e) if e.is_gone() => {
                    debug!("Volume {} disappeared during listing", volume.name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let attached_to = self
                .attachment(&volume.name, &host, &connections)
                .await?;
            debug!("Volume {} attached_to = {:?}", volume.name, attached_to);

            volumes.push(BlockDeviceVolume {
                blockdevice_id: volume.name,
                size: volume.size,
                attached_to,
                dataset_id,
            });
        }

        Ok(volumes)
    }

    /// Attachment owner of a volume
    ///
    /// A local connection only counts once a device path resolves. Any
    /// remote connection is reported as is.
    async fn attachment(
        &self,
        blockdevice_id: &str,
        host: &str,
        connections: &[PrivateConnection],
    ) -> Result<Option<String>> {
        let mut attached_to = None;

        for connection in connections {
            if connection.host != host {
                attached_to = Some(connection.host.clone());
                continue;
            }
            match self.get_device_path(blockdevice_id).await {
                Ok(_) => return Ok(Some(host.to_string())),
                Err(Error::UnattachedVolume { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(attached_to)
    }

    // -------------------------------------------------------------------------
    // Device Paths
    // -------------------------------------------------------------------------

    /// Local device path of an attached volume
    ///
    /// Resolved paths are cached until the volume is detached or destroyed.
    #[instrument(skip(self))]
    pub async fn get_device_path(&self, blockdevice_id: &str) -> Result<PathBuf> {
        self.paths
            .get_or_try_resolve(blockdevice_id, || self.resolve_device_path(blockdevice_id))
            .await
    }

    async fn resolve_device_path(&self, blockdevice_id: &str) -> Result<PathBuf> {
        let host = self.compute_instance_id();
        let target = self.target_info(blockdevice_id, &host).await?;

        let device = self
            .first_existing_path(&target)
            .await?
            .ok_or_else(|| Error::unattached(blockdevice_id))?;

        let device = tokio::fs::canonicalize(&device).await?;
        let path = self.initiator.multipath_device(&device).await?;

        info!("Using device path {:?} for {}", path, blockdevice_id);
        Ok(path)
    }

    async fn first_existing_path(&self, target: &TargetDescriptor) -> Result<Option<PathBuf>> {
        let candidates = self.initiator.device_paths(target).await?;
        debug!("Candidate device paths: {:?}", candidates);

        for candidate in candidates {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    // -------------------------------------------------------------------------
    // Target Info
    // -------------------------------------------------------------------------

    /// Descriptor for the local host's connection to a volume
    async fn target_info(&self, blockdevice_id: &str, host: &str) -> Result<TargetDescriptor> {
        let connections = self
            .array
            .list_volume_private_connections(blockdevice_id)
            .await
            .map_err(|e| volume_error(blockdevice_id, e))?;

        let connection = local_connection(&connections, host)
            .ok_or_else(|| Error::unattached(blockdevice_id))?;
        self.target_for(connection).await
    }

    async fn target_for(&self, connection: &PrivateConnection) -> Result<TargetDescriptor> {
        let ports = self.array.list_ports().await?;
        Ok(build_target_descriptor(
            self.config.protocol(),
            connection,
            &ports,
            self.config.chap(),
        ))
    }
}

/// Map "gone" array errors on a volume to [`Error::UnknownVolume`]
fn volume_error(blockdevice_id: &str, error: ArrayError) -> Error {
    if error.is_gone() {
        Error::unknown_volume(blockdevice_id)
    } else {
        error.into()
    }
}

/// Hostname of this machine
async fn local_hostname(runner: &dyn CommandRunner) -> Result<String> {
    if let Ok(hostname) = tokio::fs::read_to_string("/etc/hostname").await {
        let hostname = hostname.trim();
        if !hostname.is_empty() {
            return Ok(hostname.to_string());
        }
    }

    let output = runner.run("hostname", &[]).await?;
    let hostname = output.stdout.trim();
    if output.success() && !hostname.is_empty() {
        Ok(hostname.to_string())
    } else {
        Err(Error::Internal("unable to determine local hostname".into()))
    }
}
