use std::path::PathBuf;
use std::time::Duration;

use promokit_comfyui::client::PollConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds. Generation requests block for
    /// the whole inference, so the default is generous (default: `300`).
    pub request_timeout_secs: u64,
    /// Path to the declarative model-list file.
    pub models_file: PathBuf,
    /// Base URL of the remote node-graph image server.
    pub graph_server_url: String,
    /// Poll interval for remote workflow completion, in seconds.
    pub poll_interval_secs: u64,
    /// Poll budget for remote workflow completion, in seconds.
    pub poll_timeout_secs: u64,
    /// Base URL of the chat-completions API used for captions.
    pub caption_api_url: String,
    /// API key for the caption endpoint; omitted for keyless local servers.
    pub caption_api_key: Option<String>,
    /// Chat model used for captions.
    pub caption_model: String,
    /// Token budget for caption completions.
    pub caption_max_tokens: u32,
    /// TTF/OTF font used by the decorative text-rendering endpoint.
    pub font_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                               |
    /// |------------------------|-------------------------------------------------------|
    /// | `HOST`                 | `0.0.0.0`                                             |
    /// | `PORT`                 | `3000`                                                |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`                               |
    /// | `REQUEST_TIMEOUT_SECS` | `300`                                                 |
    /// | `MODELS_FILE`          | `config/models.yaml`                                  |
    /// | `GRAPH_SERVER_URL`     | `http://127.0.0.1:8188`                               |
    /// | `POLL_INTERVAL_SECS`   | `1`                                                   |
    /// | `POLL_TIMEOUT_SECS`    | `180`                                                 |
    /// | `CAPTION_API_URL`      | `https://api.openai.com`                              |
    /// | `CAPTION_API_KEY`      | unset                                                 |
    /// | `CAPTION_MODEL`        | `gpt-4o-mini`                                         |
    /// | `CAPTION_MAX_TOKENS`   | `256`                                                 |
    /// | `FONT_PATH`            | `/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf`     |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let models_file =
            PathBuf::from(std::env::var("MODELS_FILE").unwrap_or_else(|_| "config/models.yaml".into()));

        let graph_server_url =
            std::env::var("GRAPH_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into());

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let poll_timeout_secs: u64 = std::env::var("POLL_TIMEOUT_SECS")
            .unwrap_or_else(|_| "180".into())
            .parse()
            .expect("POLL_TIMEOUT_SECS must be a valid u64");

        let caption_api_url =
            std::env::var("CAPTION_API_URL").unwrap_or_else(|_| "https://api.openai.com".into());
        let caption_api_key = std::env::var("CAPTION_API_KEY").ok();
        let caption_model =
            std::env::var("CAPTION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
        let caption_max_tokens: u32 = std::env::var("CAPTION_MAX_TOKENS")
            .unwrap_or_else(|_| "256".into())
            .parse()
            .expect("CAPTION_MAX_TOKENS must be a valid u32");

        let font_path = PathBuf::from(
            std::env::var("FONT_PATH")
                .unwrap_or_else(|_| "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".into()),
        );

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            models_file,
            graph_server_url,
            poll_interval_secs,
            poll_timeout_secs,
            caption_api_url,
            caption_api_key,
            caption_model,
            caption_max_tokens,
            font_path,
        }
    }

    /// Poll configuration for the remote execution client.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }
}
