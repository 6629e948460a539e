//! FlashArray REST Client
//!
//! Implements [`ArrayClient`] over the array's REST 1.x management API.
//! Error responses are classified into [`ArrayError`] variants here, so the
//! lifecycle core only ever matches on typed errors.

use crate::array::types::{
    ConnectionResponse, CreateHostRequest, CreateVolumeRequest, HostResponse, PortResponse,
    SessionRequest, UpdateHostRequest, VolumeResponse,
};
use crate::config::ArrayConfig;
use crate::domain::ports::{
    ArrayClient, ArrayResult, HostRecord, HostUpdate, PortRecord, PrivateConnection,
    StorageProtocol, VolumeRecord,
};
use crate::error::{ArrayError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::{Method, Response, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// REST API version spoken by this client
pub const REST_VERSION: &str = "1.6";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(30);

// =============================================================================
// Client
// =============================================================================

/// REST client for one array
pub struct PurityRestClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    /// Whether the cookie store holds a live session
    session: Mutex<bool>,
}

impl PurityRestClient {
    /// Build a client from validated configuration
    ///
    /// Reads the custom certificate, if configured, from disk.
    pub fn new(config: &ArrayConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent(config.protocol()))
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_https());

        if let Some(cert_path) = config.ssl_cert() {
            let pem = std::fs::read(cert_path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: base_url(config.endpoint()),
            api_token: config.api_token().to_string(),
            session: Mutex::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        }
    }

    /// Send a request, retrying connection failures and timeouts
    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ArrayResult<Response> {
        let url = self.url(path);
        let url = url.as_str();

        backoff::future::retry(Self::retry_policy(), || async move {
            let mut request = self.http.request(method.clone(), url);
            if let Some(body) = body {
                request = request.json(body);
            }
            request.send().await.map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    debug!("Transient array request failure on {}: {}", url, e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
        .map_err(|e| ArrayError::transport(e.to_string()))
    }

    async fn login(&self) -> ArrayResult<()> {
        let body = serde_json::to_value(SessionRequest {
            api_token: &self.api_token,
        })
        .map_err(|e| ArrayError::transport(e.to_string()))?;

        let response = self.send(&Method::POST, "auth/session", Some(&body)).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ArrayError::from_response(status.as_u16(), &text));
        }

        info!("Opened REST session with array at {}", self.base_url);
        Ok(())
    }

    async fn ensure_session(&self) -> ArrayResult<()> {
        let mut session = self.session.lock().await;
        if !*session {
            self.login().await?;
            *session = true;
        }
        Ok(())
    }

    /// Issue an authenticated request and decode the JSON response
    async fn call<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> ArrayResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ArrayError::transport(e.to_string()))?;

        self.ensure_session().await?;
        let mut response = self.send(&method, path, body.as_ref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Array session expired, logging in again");
            *self.session.lock().await = false;
            self.ensure_session().await?;
            response = self.send(&method, path, body.as_ref()).await?;
        }

        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ArrayResult<T> {
        self.call::<T, ()>(Method::GET, path, None).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ArrayResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ArrayError::transport(e.to_string()))?;

    if !status.is_success() {
        return Err(ArrayError::from_response(status.as_u16(), &text));
    }

    serde_json::from_str(&text).map_err(|e| ArrayError::Other {
        status: Some(status.as_u16()),
        message: format!("unexpected response body: {}", e),
    })
}

fn base_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        format!("{}/api/{}", endpoint, REST_VERSION)
    } else {
        format!("https://{}/api/{}", endpoint, REST_VERSION)
    }
}

fn user_agent(protocol: StorageProtocol) -> String {
    format!(
        "FlashArrayBlockDeviceAPI/{} (flocker; {}; {} {};)",
        crate::VERSION,
        protocol,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn segment(name: &str) -> String {
    urlencoding::encode(name).into_owned()
}

#[async_trait]
impl ArrayClient for PurityRestClient {
    async fn list_hosts(&self) -> ArrayResult<Vec<HostRecord>> {
        let hosts: Vec<HostResponse> = self.get("host").await?;
        Ok(hosts.into_iter().map(Into::into).collect())
    }

    async fn create_host(
        &self,
        name: &str,
        iqns: &[String],
        wwns: &[String],
    ) -> ArrayResult<HostRecord> {
        let body = CreateHostRequest {
            iqnlist: iqns,
            wwnlist: wwns,
        };
        let host: HostResponse = self
            .call(Method::POST, &format!("host/{}", segment(name)), Some(&body))
            .await?;
        Ok(host.into())
    }

    async fn update_host(&self, name: &str, update: &HostUpdate) -> ArrayResult<()> {
        let body = UpdateHostRequest::from(update);
        let _: IgnoredAny = self
            .call(Method::PUT, &format!("host/{}", segment(name)), Some(&body))
            .await?;
        Ok(())
    }

    async fn create_volume(&self, name: &str, size: u64) -> ArrayResult<VolumeRecord> {
        let body = CreateVolumeRequest { size };
        let volume: VolumeResponse = self
            .call(Method::POST, &format!("volume/{}", segment(name)), Some(&body))
            .await?;
        Ok(volume.into())
    }

    async fn destroy_volume(&self, name: &str) -> ArrayResult<()> {
        let _: IgnoredAny = self
            .call::<_, ()>(Method::DELETE, &format!("volume/{}", segment(name)), None)
            .await?;
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> ArrayResult<VolumeRecord> {
        let volume: VolumeResponse = self.get(&format!("volume/{}", segment(name))).await?;
        Ok(volume.into())
    }

    async fn list_volumes(&self) -> ArrayResult<Vec<VolumeRecord>> {
        let volumes: Vec<VolumeResponse> = self.get("volume").await?;
        Ok(volumes.into_iter().map(Into::into).collect())
    }

    async fn connect_host(&self, host: &str, volume: &str) -> ArrayResult<PrivateConnection> {
        let path = format!("host/{}/volume/{}", segment(host), segment(volume));
        let conn: ConnectionResponse = self.call::<_, ()>(Method::POST, &path, None).await?;
        Ok(conn.into())
    }

    async fn disconnect_host(&self, host: &str, volume: &str) -> ArrayResult<()> {
        let path = format!("host/{}/volume/{}", segment(host), segment(volume));
        let _: IgnoredAny = self.call::<_, ()>(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn list_ports(&self) -> ArrayResult<Vec<PortRecord>> {
        let ports: Vec<PortResponse> = self.get("port").await?;
        Ok(ports.into_iter().map(Into::into).collect())
    }

    async fn list_volume_private_connections(
        &self,
        volume: &str,
    ) -> ArrayResult<Vec<PrivateConnection>> {
        let path = format!("volume/{}/host?private=true", segment(volume));
        let conns: Vec<ConnectionResponse> = self.get(&path).await?;
        Ok(conns.into_iter().map(Into::into).collect())
    }
}
