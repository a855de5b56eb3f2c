//! Pipeline run mutations

use pipewatch_core::PipelineRunKind;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::error::{ClientError, Result};
use crate::tracker::PipelineRun;
use crate::transport::ApiRequest;

/// `spec.status` value requesting cancellation
pub const CANCELLED_SPEC_STATUS: &str = "PipelineRunCancelled";

impl PipelineRun {
    // =============================================================================
    // Creation
    // =============================================================================

    /// Creates the pipeline run from a full document
    ///
    /// The document's `metadata.name` must match the tracked name.
    pub async fn start(&self, document: &Value) -> Result<Value> {
        if document.is_null() {
            return Err(ClientError::InvalidRequest(
                "No input data provided for pipeline run to start".to_string(),
            ));
        }

        let declared = document
            .get("metadata")
            .and_then(|metadata| metadata.get("name"))
            .and_then(Value::as_str);

        if declared != Some(self.name()) {
            return Err(ClientError::InvalidRequest(format!(
                "Pipeline run name provided '{}' is different than in input data '{}'",
                self.name(),
                declared.unwrap_or_default()
            )));
        }

        let request = ApiRequest::post(
            self.client.collection_path::<PipelineRunKind>(),
            document.to_string(),
        );
        let response = self.client.transport().send(request).await?;
        let response = self.client.check_response(response)?;

        info!("Started pipeline run '{}'", self.name());
        Ok(serde_json::from_str(&response.body)?)
    }

    // =============================================================================
    // Updates
    // =============================================================================

    /// Requests cancellation
    pub async fn cancel(&self) -> Result<Value> {
        let mut patch = self.minimal_document();
        patch["spec"]["status"] = Value::from(CANCELLED_SPEC_STATUS);

        self.patch_with_retry(
            patch,
            "cancel pipeline run",
            format!(
                "Pipeline run '{}' can't be cancelled, because it doesn't exist",
                self.name()
            ),
        )
        .await
    }

    pub async fn update_labels(&self, labels: &BTreeMap<String, String>) -> Result<Value> {
        let mut patch = self.minimal_document();
        patch["metadata"]["labels"] = json!(labels);

        self.patch_with_retry(
            patch,
            "update labels on pipeline run",
            format!(
                "Can't update labels on pipeline run '{}', because it doesn't exist",
                self.name()
            ),
        )
        .await
    }

    pub async fn update_annotations(&self, annotations: &BTreeMap<String, String>) -> Result<Value> {
        let mut patch = self.minimal_document();
        patch["metadata"]["annotations"] = json!(annotations);

        self.patch_with_retry(
            patch,
            "update annotations on pipeline run",
            format!(
                "Can't update annotations on pipeline run '{}', because it doesn't exist",
                self.name()
            ),
        )
        .await
    }

    fn minimal_document(&self) -> Value {
        json!({
            "apiVersion": self.client.config().pipelines_api_version,
            "kind": "PipelineRun",
            "metadata": {"name": self.name()},
            "spec": {},
        })
    }

    /// Merge-patches the run, retrying while the backend reports a conflict
    async fn patch_with_retry(&self, patch: Value, action: &str, missing: String) -> Result<Value> {
        let settings = &self.client.config().conflict;
        let path = self.client.resource_path::<PipelineRunKind>(self.name());
        let mut attempt = 0;

        loop {
            attempt += 1;

            let response = self
                .client
                .transport()
                .send(ApiRequest::merge_patch(path.clone(), patch.to_string()))
                .await?;

            match response.status {
                404 => return Err(ClientError::NotFound(missing)),
                409 if attempt <= settings.max_retries => {
                    warn!(
                        "Conflict on {} '{}' (attempt {}/{}), retrying in {} ms...",
                        action,
                        self.name(),
                        attempt,
                        settings.max_retries + 1,
                        settings.delay.as_millis()
                    );
                    tokio::time::sleep(settings.delay).await;
                }
                status if !response.is_success() => {
                    error!("{} '{}' failed with: [{}] {}", action, self.name(), status, response.body);
                    return Err(ClientError::api_error(status, response.body));
                }
                _ => return Ok(serde_json::from_str(&response.body)?),
            }
        }
    }
}
