//! Pipewatch HTTP Client
//!
//! Observes pipeline runs, their task runs and pods on a remote API server
//! that only offers an eventually-consistent watch protocol and snapshot
//! reads.
//!
//! The client is organised in layers, each pulling from the one below:
//! - `WatchChannel`: turns a flaky watch connection into "object changed"
//!   notifications, each carrying a freshly fetched snapshot
//! - `ResourceTracker`: lifecycle queries over one pipeline run, task run or pod
//! - `LogLines`: log streaming that survives idle-timeout disconnects
//! - `PipelineAggregator`: results, multiplexed logs and failure diagnostics
//!   for a whole pipeline run
//!
//! # Example
//!
//! ```no_run
//! use pipewatch_client::{Config, PipelineClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = PipelineClient::new(Config::new("https://api.cluster.example:6443", "builds"));
//!
//!     let run = client.pipeline_run("build-42");
//!     if let Some(snapshot) = run.wait_for_finish().await? {
//!         println!("finished: {:?}", client.config().policy.lifecycle(snapshot.condition()));
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod logs;
mod pipeline_runs;
pub mod tracker;
pub mod transport;
pub mod watch;

// Re-export commonly used types
pub use aggregator::{InterleavedLogs, PipelineAggregator};
pub use config::Config;
pub use error::{ClientError, Result};
pub use logs::{LogLines, LogOutput, PodLogs, SourceLog, TaskRunLogs};
pub use tracker::{ChildWatch, PipelineRun, Pod, ResourceTracker, TaskRun};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, LineStream, Method, Transport};
pub use watch::{WatchChannel, WatchItem, WatchState};

use pipewatch_core::{ApiGroup, PodKind, ResourceKind, ResourceSnapshot};
use std::sync::Arc;
use tracing::error;

/// Entry point for observing pipeline runs
///
/// Cheap to clone; every tracker created from it shares the same transport
/// and configuration.
#[derive(Clone)]
pub struct PipelineClient {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for PipelineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineClient")
            .field("api_url", &self.config.api_url)
            .field("namespace", &self.config.namespace)
            .finish()
    }
}

impl PipelineClient {
    /// Create a client talking HTTP to `config.api_url`
    ///
    /// # Example
    /// ```
    /// use pipewatch_client::{Config, PipelineClient};
    ///
    /// let client = PipelineClient::new(Config::new("https://api.cluster.example:6443", "builds"));
    /// assert_eq!(client.config().namespace, "builds");
    /// ```
    pub fn new(config: Config) -> Self {
        let transport = HttpTransport::new(config.api_url.clone(), config.token.clone());
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client over a custom transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            config: Arc::new(config),
            transport,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // =============================================================================
    // Paths
    // =============================================================================

    fn api_prefix<K: ResourceKind>(&self) -> String {
        match K::GROUP {
            ApiGroup::Pipelines => format!("apis/{}", self.config.pipelines_api_version),
            ApiGroup::Core => "api/v1".to_string(),
        }
    }

    /// `<prefix>/namespaces/<ns>/<plural>`
    pub fn collection_path<K: ResourceKind>(&self) -> String {
        format!(
            "{}/namespaces/{}/{}",
            self.api_prefix::<K>(),
            self.config.namespace,
            K::PLURAL
        )
    }

    /// `<prefix>/namespaces/<ns>/<plural>/<name>`
    pub fn resource_path<K: ResourceKind>(&self, name: &str) -> String {
        format!("{}/{}", self.collection_path::<K>(), name)
    }

    /// `<prefix>/watch/namespaces/<ns>/<plural>/<name>/`
    pub fn watch_path<K: ResourceKind>(&self, name: &str) -> String {
        format!(
            "{}/watch/namespaces/{}/{}/{}/",
            self.api_prefix::<K>(),
            self.config.namespace,
            K::PLURAL,
            name
        )
    }

    /// Log endpoint of a pod
    pub fn log_path(&self, pod_name: &str) -> String {
        format!("{}/log", self.resource_path::<PodKind>(pod_name))
    }

    // =============================================================================
    // Trackers
    // =============================================================================

    pub fn pipeline_run(&self, name: impl Into<String>) -> PipelineRun {
        ResourceTracker::new(self.clone(), name)
    }

    pub fn task_run(&self, name: impl Into<String>) -> TaskRun {
        ResourceTracker::new(self.clone(), name)
    }

    pub fn pod(&self, name: impl Into<String>) -> Pod {
        ResourceTracker::new(self.clone(), name)
    }

    /// Results, logs and diagnostics of one pipeline run
    pub fn aggregator(&self, name: impl Into<String>) -> PipelineAggregator {
        PipelineAggregator::new(self.pipeline_run(name))
    }

    /// Open a watch over one resource
    pub fn watch<K: ResourceKind>(&self, name: impl Into<String>) -> WatchChannel<K> {
        WatchChannel::new(self.clone(), name)
    }

    // =============================================================================
    // Snapshots
    // =============================================================================

    /// Fetch a fresh snapshot of one resource
    ///
    /// A 404 is reported as `Ok(None)`; other failures are errors.
    pub async fn get_resource<K: ResourceKind>(&self, name: &str) -> Result<Option<ResourceSnapshot>> {
        let response = self
            .transport
            .send(ApiRequest::get(self.resource_path::<K>(name)))
            .await?;

        if response.status == 404 {
            return Ok(None);
        }

        let response = self.check_response(response)?;
        self.parse_snapshot::<K>(&response.body).map(Some)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Checks the status code and turns a non-2xx response into an error
    /// carrying the body
    pub(crate) fn check_response(&self, response: ApiResponse) -> Result<ApiResponse> {
        if !response.is_success() {
            error!("[{}] {}", response.status, response.body);
            return Err(ClientError::api_error(response.status, response.body));
        }

        Ok(response)
    }

    pub(crate) fn parse_snapshot<K: ResourceKind>(&self, body: &str) -> Result<ResourceSnapshot> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))?;

        ResourceSnapshot::from_json::<K>(value)
            .map_err(|e| ClientError::ParseError(format!("Unexpected {} document: {}", K::KIND, e)))
    }
}
