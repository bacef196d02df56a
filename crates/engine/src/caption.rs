//! Caption generation and prompt optimization.
//!
//! Thin wrapper over an OpenAI-style chat-completions endpoint. Captions
//! are produced as a short list of candidates; the same client also
//! powers the optional prompt-optimization pass that rewrites diffusion
//! prompts before dispatch.

use serde::Deserialize;

use promokit_core::registry::PromptOptimization;

/// Errors from the chat-completions layer.
#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("Chat API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The API answered with no usable text.
    #[error("Chat API returned an empty completion")]
    EmptyCompletion,
}

/// One caption-generation request.
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    /// Business name the caption is for.
    pub business: String,
    /// What is being promoted.
    pub description: String,
    /// Optional tone hint (e.g. "playful", "professional").
    pub tone: Option<String>,
    /// Optional target platform (e.g. "instagram").
    pub platform: Option<String>,
    /// How many candidates to produce.
    pub count: usize,
}

/// Chat-completions client for captions and prompt rewriting.
pub struct CaptionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl CaptionClient {
    /// Create a client for the endpoint at `base_url` (the prefix before
    /// `/v1/chat/completions`).
    pub fn new(base_url: String, api_key: Option<String>, model: String, max_tokens: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            max_tokens,
        }
    }

    /// Generate marketing caption candidates.
    pub async fn generate_captions(
        &self,
        request: &CaptionRequest,
    ) -> Result<Vec<String>, CaptionError> {
        let system = "You write short, punchy social-media captions for small businesses. \
                      Answer with one caption per line and nothing else.";

        let mut user = format!(
            "Write {count} caption options for {business}: {description}",
            count = request.count.max(1),
            business = request.business,
            description = request.description,
        );
        if let Some(tone) = &request.tone {
            user.push_str(&format!(" Tone: {tone}."));
        }
        if let Some(platform) = &request.platform {
            user.push_str(&format!(" Platform: {platform}."));
        }

        let content = self
            .chat(&self.model, system, &user, self.max_tokens)
            .await?;
        let captions: Vec<String> = parse_caption_lines(&content)
            .into_iter()
            .take(request.count.max(1))
            .collect();

        if captions.is_empty() {
            return Err(CaptionError::EmptyCompletion);
        }
        Ok(captions)
    }

    /// Rewrite a diffusion prompt for better image quality.
    ///
    /// Used by the generation path when `prompt_optimization.enabled` is
    /// set; callers treat failures as non-fatal and keep the original
    /// prompt.
    pub async fn optimize_prompt(
        &self,
        prompt: &str,
        options: &PromptOptimization,
    ) -> Result<String, CaptionError> {
        let system = "You rewrite image-generation prompts to be more specific and visual. \
                      Keep the subject unchanged. Answer with the rewritten prompt only.";

        let content = self
            .chat(&options.model, system, prompt, options.max_tokens)
            .await?;
        let rewritten = content.trim();
        if rewritten.is_empty() {
            return Err(CaptionError::EmptyCompletion);
        }
        Ok(rewritten.to_string())
    }

    // ---- private helpers ----

    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, CaptionError> {
        let body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CaptionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(CaptionError::EmptyCompletion)
    }
}

/// Split a completion into caption lines, stripping list markers and
/// surrounding quotes.
fn parse_caption_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-' || c == '*')
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_lines_strip_list_markers() {
        let content = "1. \"Fresh bread, every morning\"\n2) Come taste the difference\n- Your daily loaf\n\n";
        let lines = parse_caption_lines(content);
        assert_eq!(
            lines,
            vec![
                "Fresh bread, every morning",
                "Come taste the difference",
                "Your daily loaf",
            ]
        );
    }

    #[test]
    fn empty_completion_yields_no_lines() {
        assert!(parse_caption_lines("\n  \n").is_empty());
    }

    #[test]
    fn chat_response_deserializes() {
        let json = r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].message.content, "hello");
    }
}
