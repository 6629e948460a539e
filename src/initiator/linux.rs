//! Linux Initiator
//!
//! Drives open-iscsi (`iscsiadm`), the SCSI midlayer, and device-mapper
//! multipath to implement the [`Initiator`] port. Sysfs and devfs roots are
//! configurable so the adapter can be exercised against a fake tree.

use crate::domain::ports::{
    ChapCredentials, Initiator, InitiatorIdentity, IscsiTarget, TargetDescriptor,
};
use crate::error::{Error, Result};
use crate::initiator::command::{CommandOutput, CommandRunner, ProcessRunner};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// `iscsiadm` exit code when a session already exists
const ISCSI_ERR_SESS_EXISTS: i32 = 15;
/// `iscsiadm` exit code when no matching session or node exists
const ISCSI_ERR_NO_OBJS_FOUND: i32 = 21;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Linux initiator
#[derive(Debug, Clone)]
pub struct LinuxInitiatorConfig {
    pub iscsiadm_bin: String,
    pub multipath_bin: String,
    /// open-iscsi initiator name file
    pub initiator_name_file: PathBuf,
    /// Path to sysfs (for testing)
    pub sysfs_root: PathBuf,
    /// Path to devfs (for testing)
    pub dev_root: PathBuf,
    /// How long `connect` waits for a device node to appear
    pub device_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for LinuxInitiatorConfig {
    fn default() -> Self {
        Self {
            iscsiadm_bin: "iscsiadm".to_string(),
            multipath_bin: "multipath".to_string(),
            initiator_name_file: PathBuf::from("/etc/iscsi/initiatorname.iscsi"),
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            device_wait: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Linux Initiator
// =============================================================================

/// Local initiator backed by open-iscsi, sysfs, and dm-multipath
pub struct LinuxInitiator {
    config: LinuxInitiatorConfig,
    runner: Arc<dyn CommandRunner>,
}

impl LinuxInitiator {
    /// Create an initiator that runs commands on the host
    pub fn new(config: LinuxInitiatorConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    /// Create an initiator with a custom command runner
    pub fn with_runner(config: LinuxInitiatorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    fn by_path_dir(&self) -> PathBuf {
        self.config.dev_root.join("disk/by-path")
    }

    async fn iscsiadm(&self, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(&self.config.iscsiadm_bin, &args).await
    }

    async fn node_command(&self, target: &IscsiTarget, extra: &[&str]) -> Result<CommandOutput> {
        let mut args = vec!["-m", "node", "-T", target.iqn.as_str(), "-p", target.portal.as_str()];
        args.extend_from_slice(extra);
        self.iscsiadm(&args).await
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    fn read_iqns(&self) -> Result<Vec<String>> {
        let path = &self.config.initiator_name_file;
        if !path.exists() {
            debug!("No initiator name file at {:?}", path);
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.strip_prefix("InitiatorName="))
            .map(|iqn| iqn.trim().to_string())
            .filter(|iqn| !iqn.is_empty())
            .collect())
    }

    fn read_wwpns(&self) -> Result<Vec<String>> {
        let pattern = format!(
            "{}/class/fc_host/host*/port_name",
            escaped(&self.config.sysfs_root)
        );

        let mut wwpns = Vec::new();
        for path in glob_paths(&pattern)? {
            match std::fs::read_to_string(&path) {
                Ok(raw) => wwpns.push(normalize_wwn(&raw)),
                Err(e) => warn!("Unable to read {:?}: {}", path, e),
            }
        }
        Ok(wwpns)
    }

    // -------------------------------------------------------------------------
    // Connect
    // -------------------------------------------------------------------------

    async fn login_target(&self, target: &IscsiTarget, auth: Option<&ChapCredentials>) -> Result<()> {
        let created = self.node_command(target, &["--op", "new"]).await?;
        if !created.success() {
            return Err(Error::initiator("iscsi node create", created.stderr.trim()));
        }

        if let Some(chap) = auth {
            for (key, value) in [
                ("node.session.auth.authmethod", "CHAP"),
                ("node.session.auth.username", chap.username.as_str()),
                ("node.session.auth.password", chap.password.as_str()),
            ] {
                let updated = self
                    .node_command(target, &["--op", "update", "-n", key, "-v", value])
                    .await?;
                if !updated.success() {
                    return Err(Error::initiator("iscsi node update", updated.stderr.trim()));
                }
            }
        }

        let login = self.node_command(target, &["--login"]).await?;
        if !login.accepted(&[ISCSI_ERR_SESS_EXISTS]) {
            return Err(Error::initiator("iscsi login", login.stderr.trim()));
        }

        debug!("Logged in to {} via {}", target.iqn, target.portal);
        Ok(())
    }

    async fn connect_iscsi(
        &self,
        targets: &[IscsiTarget],
        auth: Option<&ChapCredentials>,
    ) -> Result<()> {
        if targets.is_empty() {
            return Err(Error::initiator("connect", "no iSCSI targets to log in to"));
        }

        // Any single path is enough, multipath picks up the rest later
        let mut failures = Vec::new();
        for target in targets {
            if let Err(e) = self.login_target(target, auth).await {
                warn!("iSCSI login to {} failed: {}", target.portal, e);
                failures.push(e.to_string());
            }
        }

        if failures.len() == targets.len() {
            return Err(Error::initiator("connect", failures.join("; ")));
        }

        let rescan = self.iscsiadm(&["-m", "session", "--rescan"]).await?;
        if !rescan.success() {
            warn!("iSCSI session rescan failed: {}", rescan.stderr.trim());
        }
        Ok(())
    }

    async fn connect_fc(&self) -> Result<()> {
        let pattern = format!("{}/class/scsi_host/host*/scan", escaped(&self.config.sysfs_root));
        let scan_files = glob_paths(&pattern)?;
        if scan_files.is_empty() {
            return Err(Error::initiator("connect", "no SCSI hosts found to rescan"));
        }

        for scan in scan_files {
            if let Err(e) = tokio::fs::write(&scan, "- - -").await {
                warn!("SCSI host rescan via {:?} failed: {}", scan, e);
            }
        }
        Ok(())
    }

    async fn wait_for_device(&self, target: &TargetDescriptor) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.device_wait;
        loop {
            let paths = self.device_paths(target).await?;
            if let Some(found) = paths.iter().find(|p| p.exists()) {
                debug!("Device appeared at {:?}", found);
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::initiator(
                    "connect",
                    format!("no device appeared within {:?}", self.config.device_wait),
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    // -------------------------------------------------------------------------
    // Disconnect
    // -------------------------------------------------------------------------

    async fn remove_devices(&self, target: &TargetDescriptor) -> Result<()> {
        let mut raw_devices = BTreeSet::new();
        for path in self.device_paths(target).await? {
            if let Ok(real) = tokio::fs::canonicalize(&path).await {
                raw_devices.insert(real);
            }
        }

        let mut flushed = BTreeSet::new();
        for device in &raw_devices {
            if let Some(dm) = self.dm_holder(device)? {
                if flushed.insert(dm.clone()) {
                    let map = self.dm_name(&dm).unwrap_or_else(|| dm.clone());
                    let flush = self
                        .runner
                        .run(&self.config.multipath_bin, &["-f".to_string(), map.clone()])
                        .await?;
                    if !flush.success() {
                        warn!("Flushing multipath map {} failed: {}", map, flush.stderr.trim());
                    }
                }
            }
        }

        for device in &raw_devices {
            let Some(name) = device.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let delete = self.config.sysfs_root.join("block").join(name).join("device/delete");
            match tokio::fs::write(&delete, "1").await {
                Ok(()) => debug!("Removed SCSI device {}", name),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// True while LUNs other than `target.lun` are still present on the target
    ///
    /// The detached LUN's own by-path link may outlive the device delete
    /// until udev catches up, so it never counts.
    fn target_in_use(&self, target: &IscsiTarget) -> Result<bool> {
        let pattern = format!(
            "{}/ip-{}-iscsi-{}-lun-*",
            escaped(&self.by_path_dir()),
            glob::Pattern::escape(&target.portal),
            glob::Pattern::escape(&target.iqn)
        );
        Ok(glob_paths(&pattern)?
            .iter()
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()).and_then(link_lun))
            .any(|lun| lun != target.lun))
    }

    async fn logout_targets(&self, targets: &[IscsiTarget]) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut failures = Vec::new();

        for target in targets {
            if !seen.insert((target.iqn.as_str(), target.portal.as_str())) {
                continue;
            }
            if self.target_in_use(target)? {
                debug!("Keeping session to {} for other LUNs", target.iqn);
                continue;
            }

            let logout = self.node_command(target, &["--logout"]).await?;
            if !logout.accepted(&[ISCSI_ERR_NO_OBJS_FOUND]) {
                failures.push(format!("{}: {}", target.portal, logout.stderr.trim()));
                continue;
            }

            let deleted = self.node_command(target, &["--op", "delete"]).await?;
            if !deleted.accepted(&[ISCSI_ERR_NO_OBJS_FOUND]) {
                warn!("Deleting node record for {} failed", target.portal);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::initiator("iscsi logout", failures.join("; ")))
        }
    }

    // -------------------------------------------------------------------------
    // Device Mapper
    // -------------------------------------------------------------------------

    /// The `dm-N` holder of a raw block device, if any
    fn dm_holder(&self, device: &Path) -> Result<Option<String>> {
        let Some(name) = device.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };

        let holders = self.config.sysfs_root.join("block").join(name).join("holders");
        if !holders.exists() {
            return Ok(None);
        }

        let mut dms: Vec<String> = std::fs::read_dir(&holders)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|holder| holder.starts_with("dm-"))
            .collect();
        dms.sort();
        Ok(dms.into_iter().next())
    }

    /// Friendly device-mapper name of `dm-N`
    fn dm_name(&self, dm: &str) -> Option<String> {
        let path = self.config.sysfs_root.join("block").join(dm).join("dm/name");
        std::fs::read_to_string(path)
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }
}

#[async_trait]
impl Initiator for LinuxInitiator {
    async fn identity(&self) -> Result<InitiatorIdentity> {
        let identity = InitiatorIdentity::new(self.read_wwpns()?, self.read_iqns()?);
        info!(
            "Discovered local initiator: {} IQN(s), {} WWPN(s)",
            identity.iqns.len(),
            identity.wwpns.len()
        );
        Ok(identity)
    }

    async fn connect(&self, target: &TargetDescriptor) -> Result<()> {
        match target {
            TargetDescriptor::Iscsi { targets, auth } => {
                self.connect_iscsi(targets, auth.as_ref()).await?
            }
            TargetDescriptor::FibreChannel { .. } => self.connect_fc().await?,
        }
        self.wait_for_device(target).await
    }

    async fn disconnect(&self, target: &TargetDescriptor) -> Result<()> {
        self.remove_devices(target).await?;
        match target {
            TargetDescriptor::Iscsi { targets, .. } => self.logout_targets(targets).await,
            TargetDescriptor::FibreChannel { .. } => Ok(()),
        }
    }

    async fn device_paths(&self, target: &TargetDescriptor) -> Result<Vec<PathBuf>> {
        let by_path = self.by_path_dir();
        match target {
            TargetDescriptor::Iscsi { targets, .. } => Ok(targets
                .iter()
                .map(|t| by_path.join(format!("ip-{}-iscsi-{}-lun-{}", t.portal, t.iqn, t.lun)))
                .collect()),
            TargetDescriptor::FibreChannel { lun, target_wwns } => {
                let mut paths = Vec::new();
                for wwn in target_wwns {
                    let pattern = format!(
                        "{}/*-fc-0x{}-lun-{}",
                        escaped(&by_path),
                        normalize_wwn(wwn),
                        lun
                    );
                    paths.extend(glob_paths(&pattern)?);
                }
                Ok(paths)
            }
        }
    }

    async fn multipath_device(&self, device: &Path) -> Result<PathBuf> {
        match self.dm_holder(device)? {
            Some(dm) => Ok(match self.dm_name(&dm) {
                Some(name) => self.config.dev_root.join("mapper").join(name),
                None => self.config.dev_root.join(dm),
            }),
            None => {
                debug!("No multipath holder for {:?}, using raw device", device);
                Ok(device.to_path_buf())
            }
        }
    }
}

/// LUN encoded in a by-path link name, ignoring any `-partN` suffix
fn link_lun(name: &str) -> Option<u32> {
    let (_, tail) = name.rsplit_once("-lun-")?;
    tail.split('-').next()?.parse().ok()
}

/// Lowercase hex WWN without `0x` prefix or colons
pub fn normalize_wwn(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    trimmed.replace(':', "").to_ascii_lowercase()
}

fn escaped(path: &Path) -> String {
    glob::Pattern::escape(&path.to_string_lossy())
}

fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| Error::Internal(format!("invalid glob pattern {}: {}", pattern, e)))?;
    Ok(paths.filter_map(|entry| entry.ok()).collect())
}
