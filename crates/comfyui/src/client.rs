//! Polling remote-execution client.
//!
//! [`WorkflowClient`] owns one workflow execution from submission to
//! artifact retrieval: submit the graph, poll the history endpoint at a
//! fixed interval until the record completes, errors, or the timeout
//! budget is spent, then download every referenced output image.
//!
//! There is no internal retry loop. Network-level failures propagate
//! unwrapped to the caller; the only retry mechanism in the system is the
//! engine's whole-backend fallback chain.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::api::{GraphApiError, GraphServerApi};
use crate::graph::WorkflowGraph;

/// Polling cadence and budget for [`WorkflowClient::await_completion`].
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Fixed interval between history polls.
    pub interval: Duration,
    /// Total budget before giving up with [`WorkflowClientError::Timeout`].
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Errors from the execution client.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowClientError {
    /// The server rejected the submission with a non-success status.
    #[error("Workflow submission rejected ({status}): {body}")]
    Submission { status: u16, body: String },

    /// The server reported an execution failure for the job.
    #[error("Remote execution failed: {0}")]
    RemoteExecution(String),

    /// The job did not complete within the polling budget.
    #[error("Timed out after {0:?} waiting for workflow completion")]
    Timeout(Duration),

    /// The job completed but produced no output images. Downstream
    /// callers always expect at least one image, so this is a failure,
    /// not an empty success.
    #[error("Workflow completed without producing any output images")]
    NoOutput,

    /// A network-level failure on any single HTTP call, propagated
    /// unwrapped.
    #[error(transparent)]
    Transport(#[from] GraphApiError),
}

// ---------------------------------------------------------------------------
// History records
// ---------------------------------------------------------------------------

/// Status block of a history record.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub completed: bool,
    /// Server-supplied failure message, present only on failed jobs.
    #[serde(default)]
    pub error: Option<String>,
}

/// Reference to one output artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_artifact_kind")]
    pub kind: String,
}

fn default_artifact_kind() -> String {
    "output".to_string()
}

/// Per-node output block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutputs {
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
}

/// One job's history record: status plus per-node outputs.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRecord {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub outputs: HashMap<String, NodeOutputs>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// High-level client owning one workflow execution at a time.
pub struct WorkflowClient {
    api: GraphServerApi,
    client_id: String,
}

impl WorkflowClient {
    /// Create a client for the server at `api_url`.
    ///
    /// Generates a unique client ID (UUID v4) sent with every submission
    /// so the server can attribute queue entries to this process.
    pub fn new(api_url: String) -> Self {
        Self {
            api: GraphServerApi::new(api_url),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Build a client on top of an existing REST wrapper.
    pub fn with_api(api: GraphServerApi) -> Self {
        Self {
            api,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Base URL of the remote server.
    pub fn api_url(&self) -> &str {
        self.api.api_url()
    }

    /// Lightweight liveness probe; used for pre-flight checks only.
    pub async fn check_connection(&self) -> bool {
        self.api.check_connection().await
    }

    /// Upload an input artifact ahead of submission.
    ///
    /// Required for workflows with an external input image: the returned
    /// name is what the graph's LoadImage node must reference.
    pub async fn upload_input_artifact(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, WorkflowClientError> {
        let response = self.api.upload_image(bytes, filename).await?;
        tracing::debug!(artifact = %response.name, "Uploaded input artifact");
        Ok(response.name)
    }

    /// Enqueue a workflow graph. Returns the server-issued job token.
    pub async fn submit(&self, graph: &WorkflowGraph) -> Result<String, WorkflowClientError> {
        let workflow = serde_json::Value::Object(graph.0.clone());

        let response = self
            .api
            .submit_workflow(&workflow, &self.client_id)
            .await
            .map_err(|e| match e {
                GraphApiError::Api { status, body } => {
                    WorkflowClientError::Submission { status, body }
                }
                other => WorkflowClientError::Transport(other),
            })?;

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow submitted",
        );
        Ok(response.prompt_id)
    }

    /// Poll the history endpoint until the job completes, fails, or the
    /// budget is spent.
    ///
    /// An `error` field in the status record wins over everything else:
    /// the failure is raised the instant it is observed, regardless of
    /// poll timing or the `completed` flag.
    pub async fn await_completion(
        &self,
        prompt_id: &str,
        poll: PollConfig,
    ) -> Result<ExecutionRecord, WorkflowClientError> {
        let started = tokio::time::Instant::now();

        loop {
            let history = self.api.get_history(prompt_id).await?;

            if let Some(entry) = history.get(prompt_id) {
                let record: ExecutionRecord =
                    serde_json::from_value(entry.clone()).map_err(|e| {
                        WorkflowClientError::RemoteExecution(format!(
                            "Malformed history record: {e}"
                        ))
                    })?;

                if let Some(message) = &record.status.error {
                    return Err(WorkflowClientError::RemoteExecution(message.clone()));
                }
                if record.status.completed {
                    return Ok(record);
                }
            }

            if started.elapsed() >= poll.timeout {
                return Err(WorkflowClientError::Timeout(poll.timeout));
            }
            tokio::time::sleep(poll.interval).await;
        }
    }

    /// Download every output image referenced by a completed record.
    pub async fn extract_outputs(
        &self,
        record: &ExecutionRecord,
    ) -> Result<Vec<Vec<u8>>, WorkflowClientError> {
        let mut images = Vec::new();

        for (node, outputs) in &record.outputs {
            for artifact in &outputs.images {
                tracing::debug!(node = %node, filename = %artifact.filename, "Fetching output artifact");
                let bytes = self
                    .api
                    .fetch_artifact(&artifact.filename, &artifact.subfolder, &artifact.kind)
                    .await?;
                images.push(bytes);
            }
        }

        if images.is_empty() {
            return Err(WorkflowClientError::NoOutput);
        }
        Ok(images)
    }

    /// Submit a graph and wait for its output images in one call.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        poll: PollConfig,
    ) -> Result<Vec<Vec<u8>>, WorkflowClientError> {
        let prompt_id = self.submit(graph).await?;
        let record = self.await_completion(&prompt_id, poll).await?;
        self.extract_outputs(&record).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_record_deserializes() {
        let json = r#"{
            "status": {"completed": true},
            "outputs": {
                "9": {"images": [{"filename": "out_00001.png", "subfolder": "", "type": "output"}]}
            }
        }"#;
        let record: ExecutionRecord = serde_json::from_str(json).unwrap();
        assert!(record.status.completed);
        assert!(record.status.error.is_none());
        assert_eq!(record.outputs["9"].images.len(), 1);
        assert_eq!(record.outputs["9"].images[0].filename, "out_00001.png");
    }

    #[test]
    fn error_record_deserializes() {
        let json = r#"{"status": {"completed": false, "error": "CUDA out of memory"}}"#;
        let record: ExecutionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status.error.as_deref(), Some("CUDA out of memory"));
        assert!(record.outputs.is_empty());
    }

    #[test]
    fn artifact_kind_defaults_to_output() {
        let json = r#"{"filename": "a.png"}"#;
        let artifact: ArtifactRef = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.kind, "output");
        assert_eq!(artifact.subfolder, "");
    }
}
