//! REST control-plane client
//!
//! Endpoints (relative to `base_url`, scoped to one cluster):
//! - `GET  clusters/{cluster}/hosts`                     -> `{"items": [HostRecord]}`
//! - `GET  clusters/{cluster}/services`                  -> `{"items": [{"name": ..}]}` in stop order
//! - `GET  clusters/{cluster}/services/{name}`           -> `{"name": .., "serviceState": ..}`
//! - `POST clusters/{cluster}/services/{name}/commands/{stop|start}`
//! - `GET  clusters/{cluster}/health`                    -> `{"healthy": bool, "details": ..}`

use rollout_core::{
    retry_transient, ControlPlane, ControlPlaneConfig, ControlPlaneError, FleetHealth,
    HostRecord, RetryPolicy, ServiceState,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Basic-auth credentials
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatus {
    service_state: String,
}

/// Control plane reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base: String,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
}

impl HttpControlPlane {
    /// Build a client from configuration
    pub fn new(
        config: &ControlPlaneConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, ControlPlaneError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| ControlPlaneError::Protocol(format!("cannot build HTTP client: {e}")))?;
        let base = format!(
            "{}/clusters/{}",
            config.base_url.trim_end_matches('/'),
            config.cluster
        );
        Ok(Self {
            client,
            base,
            credentials,
            retry: config.retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.user, Some(&c.password)),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControlPlaneError> {
        let url = self.url(path);
        retry_transient(&self.retry, path, || async {
            let response = self
                .authorize(self.client.get(&url))
                .send()
                .await
                .map_err(map_transport_error)?;
            let response = check_status(response).await?;
            response
                .json::<T>()
                .await
                .map_err(|e| ControlPlaneError::Protocol(format!("{url}: {e}")))
        })
        .await
    }

    async fn post(&self, path: &str) -> Result<(), ControlPlaneError> {
        let url = self.url(path);
        retry_transient(&self.retry, path, || async {
            let response = self
                .authorize(self.client.post(&url))
                .send()
                .await
                .map_err(map_transport_error)?;
            check_status(response).await.map(|_| ())
        })
        .await
    }
}

fn map_transport_error(e: reqwest::Error) -> ControlPlaneError {
    if e.is_timeout() {
        ControlPlaneError::Timeout(e.to_string())
    } else if e.is_decode() || e.is_body() {
        ControlPlaneError::Protocol(e.to_string())
    } else {
        ControlPlaneError::Unreachable(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ControlPlaneError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), &url, body))
}

fn classify_status(status: u16, url: &str, body: String) -> ControlPlaneError {
    match status {
        401 | 403 => ControlPlaneError::Auth(format!("{status} from {url}")),
        404 => ControlPlaneError::NotFound(url.to_string()),
        _ => ControlPlaneError::Server {
            status,
            message: body.chars().take(512).collect(),
        },
    }
}

/// Map the manager's state strings (`STARTED`, `STOPPING`, ...) onto [`ServiceState`]
fn parse_service_state(raw: &str) -> ServiceState {
    match raw.trim().to_ascii_uppercase().as_str() {
        "STARTED" | "RUNNING" => ServiceState::Started,
        "STARTING" => ServiceState::Starting,
        "STOPPING" => ServiceState::Stopping,
        "STOPPED" => ServiceState::Stopped,
        "DOWN" | "DISABLED" | "NA" => ServiceState::Down,
        _ => ServiceState::Unknown,
    }
}

#[async_trait::async_trait]
impl ControlPlane for HttpControlPlane {
    async fn list_hosts(&self) -> Result<Vec<HostRecord>, ControlPlaneError> {
        let hosts: Items<HostRecord> = self.get_json("hosts").await?;
        Ok(hosts.items)
    }

    async fn list_cluster_services(&self) -> Result<Vec<String>, ControlPlaneError> {
        let services: Items<ServiceEntry> = self.get_json("services").await?;
        Ok(services.items.into_iter().map(|s| s.name).collect())
    }

    async fn stop_service(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.post(&format!("services/{name}/commands/stop")).await
    }

    async fn start_service(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.post(&format!("services/{name}/commands/start")).await
    }

    async fn service_state(&self, name: &str) -> Result<ServiceState, ControlPlaneError> {
        let status: ServiceStatus = self.get_json(&format!("services/{name}")).await?;
        Ok(parse_service_state(&status.service_state))
    }

    async fn fleet_health(&self) -> Result<FleetHealth, ControlPlaneError> {
        self.get_json("health").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(401, "u", String::new()).is_auth());
        assert!(matches!(
            classify_status(404, "u", String::new()),
            ControlPlaneError::NotFound(_)
        ));
        assert!(classify_status(502, "u", "bad gateway".into()).is_transient());
        assert!(!classify_status(409, "u", "conflict".into()).is_transient());
    }

    #[test]
    fn service_state_mapping() {
        assert_eq!(parse_service_state("STARTED"), ServiceState::Started);
        assert_eq!(parse_service_state("stopped"), ServiceState::Stopped);
        assert_eq!(parse_service_state("HISTORY_NOT_AVAILABLE"), ServiceState::Unknown);
    }

    #[test]
    fn urls_are_cluster_scoped() {
        let config = ControlPlaneConfig {
            base_url: "https://cm.example:7183/api/v41/".into(),
            cluster: "prod".into(),
            ..ControlPlaneConfig::default()
        };
        let cp = HttpControlPlane::new(&config, None).unwrap();
        assert_eq!(
            cp.url("services/hdfs/commands/stop"),
            "https://cm.example:7183/api/v41/clusters/prod/services/hdfs/commands/stop"
        );
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            user: "admin".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
