//! Adapter Configuration
//!
//! Raw settings are deserialized from the `dataset` section of the agent
//! configuration file (or built in code), then validated once into an
//! immutable [`ArrayConfig`].

use crate::domain::ports::{ChapCredentials, StorageProtocol};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// =============================================================================
// Constants
// =============================================================================

/// Environment variable pointing at an agent configuration file
pub const AGENT_CONFIG_ENV: &str = "AGENT_CONFIG_FILE";

/// Default agent configuration location
pub const DEFAULT_AGENT_CONFIG_PATH: &str = "/etc/flocker/agent.yml";

// =============================================================================
// Raw Settings
// =============================================================================

/// Unvalidated adapter settings
///
/// Accepts the legacy `pure_*` keys used by agent files alongside the
/// neutral names.
#[derive(Clone, Default, Deserialize)]
pub struct ArraySettings {
    /// Management address of the array
    #[serde(default, alias = "pure_ip")]
    pub endpoint: Option<String>,
    /// API token for the management REST API
    #[serde(default, alias = "pure_api_token")]
    pub api_token: Option<String>,
    /// `ISCSI` or `FIBRE_CHANNEL`
    #[serde(default, alias = "pure_storage_protocol")]
    pub storage_protocol: Option<String>,
    /// Create and patch the array host for this machine
    #[serde(default, alias = "pure_manage_purity_hosts")]
    pub manage_hosts: Option<bool>,
    #[serde(default, alias = "pure_chap_host_user")]
    pub chap_host_user: Option<String>,
    #[serde(default, alias = "pure_chap_host_password")]
    pub chap_host_password: Option<String>,
    /// Validate the array's TLS certificate
    #[serde(default, alias = "pure_verify_https")]
    pub verify_https: Option<bool>,
    /// PEM certificate used to validate the array
    #[serde(default, alias = "pure_ssl_cert")]
    pub ssl_cert: Option<PathBuf>,
}

impl std::fmt::Debug for ArraySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("ArraySettings")
            .field("endpoint", &self.endpoint)
            .field("api_token", &redacted(&self.api_token))
            .field("storage_protocol", &self.storage_protocol)
            .field("manage_hosts", &self.manage_hosts)
            .field("chap_host_user", &self.chap_host_user)
            .field("chap_host_password", &redacted(&self.chap_host_password))
            .field("verify_https", &self.verify_https)
            .field("ssl_cert", &self.ssl_cert)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct AgentFile {
    dataset: ArraySettings,
}

impl ArraySettings {
    /// Parse the `dataset` section of an agent configuration document
    pub fn from_agent_yaml(yaml: &str) -> Result<Self> {
        let agent: AgentFile = serde_yaml::from_str(yaml)?;
        Ok(agent.dataset)
    }

    /// Read and parse an agent configuration file
    pub fn from_agent_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading agent configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_agent_yaml(&contents)
    }

    /// Locate the agent configuration via `AGENT_CONFIG_FILE`, falling back
    /// to the default path
    pub fn from_environment() -> Result<Self> {
        if let Some(path) = std::env::var_os(AGENT_CONFIG_ENV).map(PathBuf::from) {
            if path.exists() {
                return Self::from_agent_file(path);
            }
        }

        let default_path = Path::new(DEFAULT_AGENT_CONFIG_PATH);
        if default_path.exists() {
            return Self::from_agent_file(default_path);
        }

        Err(Error::InvalidConfig(format!(
            "no agent configuration found; set {} or create {}",
            AGENT_CONFIG_ENV, DEFAULT_AGENT_CONFIG_PATH
        )))
    }
}

// =============================================================================
// Validated Configuration
// =============================================================================

/// Non-fatal configuration findings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A certificate was supplied but TLS verification is disabled
    CertificateIgnored,
}

/// Immutable, validated adapter configuration
#[derive(Clone)]
pub struct ArrayConfig {
    endpoint: String,
    api_token: String,
    protocol: StorageProtocol,
    manage_hosts: bool,
    chap: Option<ChapCredentials>,
    verify_https: bool,
    ssl_cert: Option<PathBuf>,
    warnings: Vec<ConfigWarning>,
}

impl ArrayConfig {
    /// Validate raw settings
    ///
    /// Fails with [`Error::InvalidConfig`] when the endpoint or token is
    /// missing, the protocol is not supported, or only one half of the CHAP
    /// pair is set.
    pub fn from_settings(settings: ArraySettings) -> Result<Self> {
        let endpoint = non_blank(settings.endpoint).ok_or_else(|| {
            Error::InvalidConfig("missing required config parameter endpoint".into())
        })?;

        let api_token = non_blank(settings.api_token).ok_or_else(|| {
            Error::InvalidConfig("missing required config parameter api_token".into())
        })?;

        let protocol = match non_blank(settings.storage_protocol) {
            Some(value) => value.parse::<StorageProtocol>().map_err(|_| {
                Error::InvalidConfig(format!(
                    "storage protocol {} is not a valid option",
                    value
                ))
            })?,
            None => StorageProtocol::default(),
        };

        let chap = match (
            non_blank(settings.chap_host_user),
            non_blank(settings.chap_host_password),
        ) {
            (Some(username), Some(password)) => Some(ChapCredentials { username, password }),
            (None, None) => None,
            _ => {
                return Err(Error::InvalidConfig(
                    "CHAP support requires both chap_host_user and chap_host_password".into(),
                ))
            }
        };

        let verify_https = settings.verify_https.unwrap_or(false);

        let mut warnings = Vec::new();
        if settings.ssl_cert.is_some() && !verify_https {
            warn!(
                "ssl_cert specified but verify_https is disabled, requests are not \
                 being validated with the certificate"
            );
            warnings.push(ConfigWarning::CertificateIgnored);
        }

        Ok(Self {
            endpoint,
            api_token,
            protocol,
            manage_hosts: settings.manage_hosts.unwrap_or(true),
            chap,
            verify_https,
            ssl_cert: settings.ssl_cert,
            warnings,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn protocol(&self) -> StorageProtocol {
        self.protocol
    }

    pub fn manage_hosts(&self) -> bool {
        self.manage_hosts
    }

    /// CHAP credentials; only ever applied for iSCSI
    pub fn chap(&self) -> Option<&ChapCredentials> {
        self.chap.as_ref()
    }

    pub fn verify_https(&self) -> bool {
        self.verify_https
    }

    pub fn ssl_cert(&self) -> Option<&Path> {
        self.ssl_cert.as_deref()
    }

    /// Warnings raised while validating
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }
}

impl std::fmt::Debug for ArrayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayConfig")
            .field("endpoint", &self.endpoint)
            .field("api_token", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("manage_hosts", &self.manage_hosts)
            .field("chap", &self.chap)
            .field("verify_https", &self.verify_https)
            .field("ssl_cert", &self.ssl_cert)
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn settings() -> ArraySettings {
        ArraySettings {
            endpoint: Some("10.0.0.5".into()),
            api_token: Some("0b2c3d4e-token".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ArrayConfig::from_settings(settings()).unwrap();
        assert_eq!(config.protocol(), StorageProtocol::Iscsi);
        assert!(config.manage_hosts());
        assert!(!config.verify_https());
        assert!(config.chap().is_none());
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_missing_endpoint_and_token() {
        let mut s = settings();
        s.endpoint = Some("  ".into());
        assert_matches!(ArrayConfig::from_settings(s), Err(Error::InvalidConfig(_)));

        let mut s = settings();
        s.api_token = None;
        assert_matches!(ArrayConfig::from_settings(s), Err(Error::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_protocol() {
        let mut s = settings();
        s.storage_protocol = Some("NVME_OF".into());
        assert_matches!(
            ArrayConfig::from_settings(s),
            Err(Error::InvalidConfig(msg)) if msg.contains("NVME_OF")
        );
    }

    #[test]
    fn test_chap_pair_invariant() {
        let mut s = settings();
        s.chap_host_user = Some("user".into());
        assert_matches!(ArrayConfig::from_settings(s), Err(Error::InvalidConfig(_)));

        let mut s = settings();
        s.chap_host_password = Some("secret".into());
        assert_matches!(ArrayConfig::from_settings(s), Err(Error::InvalidConfig(_)));

        let mut s = settings();
        s.chap_host_user = Some("user".into());
        s.chap_host_password = Some("secret".into());
        let config = ArrayConfig::from_settings(s).unwrap();
        assert_eq!(config.chap().unwrap().username, "user");
    }

    #[test]
    fn test_certificate_without_verification_warns() {
        let mut s = settings();
        s.ssl_cert = Some(PathBuf::from("/etc/pure/array.pem"));
        let config = ArrayConfig::from_settings(s).unwrap();
        assert_eq!(config.warnings(), &[ConfigWarning::CertificateIgnored]);

        let mut s = settings();
        s.ssl_cert = Some(PathBuf::from("/etc/pure/array.pem"));
        s.verify_https = Some(true);
        let config = ArrayConfig::from_settings(s).unwrap();
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_agent_yaml_with_legacy_keys() {
        let yaml = r#"
version: 1
control-service:
  hostname: control.example.com
dataset:
  backend: purestorage_flasharray_flocker_driver
  pure_ip: 10.0.0.5
  pure_api_token: abc-123
  pure_storage_protocol: FIBRE_CHANNEL
  pure_manage_purity_hosts: false
  pure_verify_https: true
"#;
        let settings = ArraySettings::from_agent_yaml(yaml).unwrap();
        let config = ArrayConfig::from_settings(settings).unwrap();
        assert_eq!(config.endpoint(), "10.0.0.5");
        assert_eq!(config.api_token(), "abc-123");
        assert_eq!(config.protocol(), StorageProtocol::FibreChannel);
        assert!(!config.manage_hosts());
        assert!(config.verify_https());
    }

    #[test]
    fn test_agent_file_missing_dataset() {
        assert_matches!(
            ArraySettings::from_agent_yaml("version: 1\n"),
            Err(Error::YamlParse(_))
        );
    }

    #[test]
    fn test_agent_file_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agent.yml");
        std::fs::write(&path, "dataset:\n  endpoint: array.local\n  api_token: t\n").unwrap();

        let settings = ArraySettings::from_agent_file(&path).unwrap();
        assert_eq!(settings.endpoint.as_deref(), Some("array.local"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ArrayConfig::from_settings(settings()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("0b2c3d4e-token"));
    }
}
