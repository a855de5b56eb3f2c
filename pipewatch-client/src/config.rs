//! Client configuration
//!
//! Every retry count, delay and wait bound used by the watch, log and
//! aggregation layers lives here and is passed in at construction, so tests
//! can shrink them.

use pipewatch_core::StatePolicy;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Pipelines API group and version used when none is configured
pub const DEFAULT_PIPELINES_API_VERSION: &str = "tekton.dev/v1beta1";

/// Task whose `annotations` result carries plugin errors
pub const DEFAULT_PLUGIN_TASK: &str = "binary-container-exit";

/// Watch reconnection policy
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Delay between reconnect attempts
    pub retry_delay: Duration,
    /// Maximum number of connection attempts per watch
    pub max_attempts: u32,
    /// Maximum number of rejected watch requests before giving up
    pub max_bad_responses: u32,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            max_attempts: 20,
            max_bad_responses: 20,
        }
    }
}

/// Log streaming policy
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// A stream closed after less idle time than this is considered finished
    pub min_idle_timeout: Duration,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            min_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Pipeline completion budget
#[derive(Debug, Clone)]
pub struct WaitSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5 * 3600),
        }
    }
}

/// Retry policy for updates rejected with a conflict
#[derive(Debug, Clone)]
pub struct ConflictSettings {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for ConflictSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server base URL (e.g., "https://api.cluster.example:6443")
    pub api_url: String,

    /// Namespace holding the pipeline runs
    pub namespace: String,

    /// Bearer token sent with every request
    pub token: Option<String>,

    /// Group/version of the pipelines API
    pub pipelines_api_version: String,

    pub watch: WatchSettings,

    pub logs: LogSettings,

    pub wait: WaitSettings,

    pub conflict: ConflictSettings,

    /// Classification of condition reasons
    pub policy: StatePolicy,

    /// Pipeline task reporting plugin errors
    pub plugin_task: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(api_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            namespace: namespace.into(),
            token: None,
            pipelines_api_version: DEFAULT_PIPELINES_API_VERSION.to_string(),
            watch: WatchSettings::default(),
            logs: LogSettings::default(),
            wait: WaitSettings::default(),
            conflict: ConflictSettings::default(),
            policy: StatePolicy::default(),
            plugin_task: DEFAULT_PLUGIN_TASK.to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - PIPEWATCH_API_URL (required)
    /// - PIPEWATCH_NAMESPACE (required)
    /// - PIPEWATCH_TOKEN (optional)
    /// - PIPEWATCH_WATCH_RETRY_SECS (optional, seconds, default: 5)
    /// - PIPEWATCH_WATCH_RETRIES (optional, default: 20)
    /// - PIPEWATCH_POLL_INTERVAL_SECS (optional, seconds, default: 5)
    /// - PIPEWATCH_WAIT_TIMEOUT_SECS (optional, seconds, default: 18000)
    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = std::env::var("PIPEWATCH_API_URL")
            .map_err(|_| anyhow::anyhow!("PIPEWATCH_API_URL environment variable not set"))?;

        let namespace = std::env::var("PIPEWATCH_NAMESPACE")
            .map_err(|_| anyhow::anyhow!("PIPEWATCH_NAMESPACE environment variable not set"))?;

        let mut config = Self::new(api_url, namespace);
        config.token = std::env::var("PIPEWATCH_TOKEN").ok().filter(|t| !t.is_empty());

        if let Some(delay) = env_setting::<u64>("PIPEWATCH_WATCH_RETRY_SECS")? {
            config.watch.retry_delay = Duration::from_secs(delay);
        }

        if let Some(retries) = env_setting::<u32>("PIPEWATCH_WATCH_RETRIES")? {
            config.watch.max_attempts = retries;
        }

        if let Some(interval) = env_setting::<u64>("PIPEWATCH_POLL_INTERVAL_SECS")? {
            config.wait.poll_interval = Duration::from_secs(interval);
        }

        if let Some(timeout) = env_setting::<u64>("PIPEWATCH_WAIT_TIMEOUT_SECS")? {
            config.wait.timeout = Duration::from_secs(timeout);
        }

        Ok(config)
    }

    /// Sets the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_url.is_empty() {
            anyhow::bail!("api_url cannot be empty");
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("api_url must start with http:// or https://");
        }

        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if self.pipelines_api_version.is_empty() {
            anyhow::bail!("pipelines_api_version cannot be empty");
        }

        if self.watch.max_attempts == 0 {
            anyhow::bail!("watch.max_attempts must be greater than 0");
        }

        if self.wait.poll_interval.is_zero() {
            anyhow::bail!("wait.poll_interval must be greater than 0");
        }

        if self.wait.timeout.is_zero() {
            anyhow::bail!("wait.timeout must be greater than 0");
        }

        Ok(())
    }
}

fn env_setting<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_setting(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_setting<T>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", raw, name, e))
}
