//! REST wrapper for the node-graph server's HTTP endpoints.
//!
//! Wraps workflow submission, history retrieval, artifact download, and
//! input-image upload using [`reqwest`]. This layer only reports
//! transport and status failures; polling, error interpretation, and
//! output extraction live in [`crate::client`].

use serde::Deserialize;

/// HTTP client for a single node-graph server instance.
pub struct GraphServerApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the `/prompt` endpoint after successfully
/// queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued job.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// Response returned by the `/upload/image` endpoint.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    /// Server-side name the graph's LoadImage node must reference.
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum GraphApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Graph server error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl GraphServerApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Base HTTP URL of the server.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Lightweight liveness probe against the stats endpoint.
    ///
    /// Any failure means "not reachable", never an error; pre-flight
    /// checks must not take a request down.
    pub async fn check_connection(&self) -> bool {
        match self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, GraphApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve the execution history record for a job.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The returned JSON maps
    /// the prompt id to its status and per-node outputs; the map is empty
    /// while the job is still queued.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, GraphApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download one output artifact.
    ///
    /// Sends a `GET /view` request with the artifact coordinates taken
    /// from a history record.
    pub async fn fetch_artifact(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, GraphApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[("filename", filename), ("subfolder", subfolder), ("type", kind)])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Upload an input image the graph's LoadImage node will reference.
    ///
    /// Sends a `POST /upload/image` multipart request and returns the
    /// server-side artifact name.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadResponse, GraphApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`GraphApiError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GraphApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GraphApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GraphApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
