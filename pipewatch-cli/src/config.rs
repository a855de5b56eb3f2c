//! Configuration module
//!
//! Turns command-line settings into a client configuration.

use anyhow::{Context, Result};
use pipewatch_client::{Config, PipelineClient};
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub api_url: String,
    pub namespace: String,
    pub token: Option<String>,
    pub wait_timeout: Option<u64>,
    pub poll_interval: Option<u64>,
}

impl CliConfig {
    /// Validated client configuration with the overrides applied
    pub fn client_config(&self) -> Result<Config> {
        let mut config = Config::new(self.api_url.clone(), self.namespace.clone());
        config.token = self.token.clone().filter(|token| !token.is_empty());

        if let Some(timeout) = self.wait_timeout {
            config.wait.timeout = Duration::from_secs(timeout);
        }
        if let Some(interval) = self.poll_interval {
            config.wait.poll_interval = Duration::from_secs(interval);
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn client(&self) -> Result<PipelineClient> {
        Ok(PipelineClient::new(self.client_config()?))
    }
}
