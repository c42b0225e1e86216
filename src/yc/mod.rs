//! Yandex Cloud REST client
//!
//! Implements the engine's [`StateChecker`] and [`Operator`] traits for
//! compute instances and managed Kubernetes clusters. Mutations return a
//! long-running Operation which is polled until it finishes.

mod auth;

pub use auth::{Credentials, TokenProvider};

use async_trait::async_trait;
use cloudnap_core::{
    Error, Operator, ResourceKind, ResourceRef, ResourceState, Result, StateChecker,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// API base URLs
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Compute API, serves `instances/{id}`
    pub compute: String,
    /// Managed Kubernetes API, serves `clusters/{id}`
    pub mks: String,
    /// Operation API, serves `operations/{id}`
    pub operation: String,
    /// IAM tokens endpoint
    pub iam: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.api.cloud.yandex.net/compute/v1".to_string(),
            mks: "https://mks.api.cloud.yandex.net/managed-kubernetes/v1".to_string(),
            operation: "https://operation.api.cloud.yandex.net".to_string(),
            iam: "https://iam.api.cloud.yandex.net/iam/v1/tokens".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResourceStatus {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    id: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Yandex Cloud client for VMs and Kubernetes clusters
pub struct YcClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    endpoints: Endpoints,
    poll_interval: Duration,
}

impl YcClient {
    /// Create a client against the public endpoints
    pub fn new(credentials: Credentials) -> anyhow::Result<Self> {
        Self::with_endpoints(credentials, Endpoints::default())
    }

    /// Create a client against custom endpoints
    pub fn with_endpoints(credentials: Credentials, endpoints: Endpoints) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("cloudnap/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let tokens = TokenProvider::new(http.clone(), credentials, endpoints.iam.clone());
        Ok(Self {
            http,
            tokens,
            endpoints,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set the operation polling period
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Obtain an IAM token so bad credentials fail at startup
    pub async fn validate_credentials(&self) -> Result<()> {
        self.tokens.token().await.map(|_| ())
    }

    fn resource_url(&self, resource: &ResourceRef) -> String {
        match resource.kind {
            ResourceKind::Vm => format!("{}/instances/{}", self.endpoints.compute, resource.id),
            ResourceKind::K8sCluster => format!("{}/clusters/{}", self.endpoints.mks, resource.id),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, what: &str) -> Result<T> {
        let token = self.tokens.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Cloud(format!("{what}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Cloud(format!("{what}: {status}: {}", body.trim())));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Cloud(format!("{what}: invalid response: {e}")))
    }

    async fn mutate(&self, resource: &ResourceRef, verb: &str) -> Result<()> {
        let url = format!("{}:{verb}", self.resource_url(resource));
        let what = format!("{verb} {} {}", resource.kind, resource.id);
        debug!(resource_type = %resource.kind, resource_id = %resource.id, %url, "Submitting operation");

        let operation: Operation = self.send(self.http.post(&url).json(&json!({})), &what).await?;
        info!(
            resource_type = %resource.kind,
            resource_id = %resource.id,
            operation_id = %operation.id,
            "Operation submitted"
        );
        self.wait(operation, &what).await
    }

    async fn wait(&self, mut operation: Operation, what: &str) -> Result<()> {
        loop {
            if operation.done {
                return match operation.error {
                    Some(err) => Err(Error::Cloud(format!(
                        "{what}: operation {} failed: code {}: {}",
                        operation.id, err.code, err.message
                    ))),
                    None => Ok(()),
                };
            }
            tokio::time::sleep(self.poll_interval).await;
            let url = format!("{}/operations/{}", self.endpoints.operation, operation.id);
            debug!(operation_id = %operation.id, "Polling operation");
            operation = self.send(self.http.get(&url), what).await?;
        }
    }
}

#[async_trait]
impl StateChecker for YcClient {
    async fn get_state(&self, resource: &ResourceRef) -> Result<ResourceState> {
        let what = format!("get {} {}", resource.kind, resource.id);
        let body: ResourceStatus = self.send(self.http.get(self.resource_url(resource)), &what).await?;
        Ok(ResourceState::from_status(&body.status))
    }
}

#[async_trait]
impl Operator for YcClient {
    async fn start(&self, resource: &ResourceRef) -> Result<()> {
        self.mutate(resource, "start").await
    }

    async fn stop(&self, resource: &ResourceRef) -> Result<()> {
        self.mutate(resource, "stop").await
    }
}

impl std::fmt::Debug for YcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YcClient")
            .field("endpoints", &self.endpoints)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
