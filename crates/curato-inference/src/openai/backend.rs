//! OpenAI-compatible provider backend.
//!
//! Implements structured metadata extraction via schema-constrained tool
//! calls on the chat completions endpoint, order-preserving bulk
//! embeddings, and the asynchronous file-upload + `/batches` bulk path.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use curato_core::{
    defaults, BatchState, BatchStatus, BatchSubmission, EmbeddingBackend, Error, Extraction,
    ExtractionBackend, ExtractionInput, Result,
};

use super::types::*;

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = defaults::OPENAI_URL;

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = defaults::EMBED_MODEL;

/// Default generation model for extraction.
pub const DEFAULT_GEN_MODEL: &str = defaults::GEN_MODEL;

/// Default embedding dimension for text-embedding-3-small.
pub const DEFAULT_DIMENSION: usize = defaults::EMBED_DIMENSION;

/// Default timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = defaults::EXTRACTION_TIMEOUT_SECS;

/// Name of the extraction tool the model is forced to call.
const EXTRACTION_TOOL: &str = "record_extractions";

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for embeddings.
    pub embed_model: String,
    /// Model to use for extraction.
    pub gen_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            embed_dimension: DEFAULT_DIMENSION,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            skip_tls_verify: false,
        }
    }
}

/// OpenAI-compatible extraction and embedding backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Request(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Initializing OpenAI backend: url={}, embed={}, gen={}",
            config.base_url, config.embed_model, config.gen_model
        );

        Ok(Self { client, config })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(OpenAIConfig::default())
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = OpenAIConfig {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            embed_model: std::env::var("OPENAI_EMBED_MODEL")
                .unwrap_or_else(|_| DEFAULT_EMBED_MODEL.to_string()),
            gen_model: std::env::var("OPENAI_GEN_MODEL")
                .unwrap_or_else(|_| DEFAULT_GEN_MODEL.to_string()),
            embed_dimension: std::env::var("OPENAI_EMBED_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DIMENSION),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            skip_tls_verify: std::env::var("OPENAI_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        };

        Self::new(config)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build a POST request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req
    }

    /// Build a GET request with authentication.
    fn build_get_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.get(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req
    }

    /// Decode a non-2xx response into an error with the provider's message.
    async fn decode_error(kind: &str, response: reqwest::Response) -> Error {
        let status = response.status();
        let body: OpenAIErrorResponse = response.json().await.unwrap_or(OpenAIErrorResponse {
            error: OpenAIError {
                message: "Unknown error".to_string(),
                error_type: None,
                code: None,
            },
        });
        Error::Extraction(format!(
            "{}: OpenAI returned {}: {}",
            kind, status, body.error.message
        ))
    }

    /// Build the chat request for one chunk of posts.
    fn extraction_request(
        &self,
        posts: &[ExtractionInput],
        known_categories: &[String],
    ) -> ChatCompletionRequest {
        let system = format!(
            "You extract structured metadata from social media captions. \
             For every post you are given, call the {} tool exactly once, \
             echoing each post's id unchanged. Prefer existing category names \
             over inventing new ones. Category labels are either \"Name\" or \
             \"Parent/Name\".\n\nExisting categories: {}",
            EXTRACTION_TOOL,
            if known_categories.is_empty() {
                "(none yet)".to_string()
            } else {
                known_categories.join(", ")
            }
        );

        let user = posts
            .iter()
            .map(|p| format!("post_id: {}\ncaption: {}", p.post_id, p.caption))
            .collect::<Vec<_>>()
            .join("\n---\n");

        ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: Some(0.0),
            tools: Some(vec![extraction_tool()]),
            tool_choice: Some(json!({
                "type": "function",
                "function": { "name": EXTRACTION_TOOL }
            })),
        }
    }
}

/// Schema-constrained tool definition for per-post extraction.
fn extraction_tool() -> Tool {
    let field_reasons = json!({
        "type": "object",
        "properties": {
            "hashtags": { "type": "string" },
            "location": { "type": "string" },
            "venue": { "type": "string" },
            "categories": { "type": "string" },
            "event_date": { "type": "string" },
            "mentions": { "type": "string" }
        }
    });

    Tool {
        tool_type: "function".to_string(),
        function: FunctionDef {
            name: EXTRACTION_TOOL.to_string(),
            description: "Record structured metadata for each input post.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "extractions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "post_id": { "type": "string" },
                                "hashtags": { "type": "array", "items": { "type": "string" } },
                                "location": { "type": ["string", "null"] },
                                "venue": { "type": ["string", "null"] },
                                "categories": { "type": "array", "items": { "type": "string" } },
                                "event_date": { "type": ["string", "null"] },
                                "mentions": { "type": "array", "items": { "type": "string" } },
                                "reasons": field_reasons
                            },
                            "required": ["post_id"]
                        }
                    }
                },
                "required": ["extractions"]
            }),
        },
    }
}

/// Parse the first extraction tool call out of a chat response, keeping
/// only results whose echoed post id belongs to the input set.
fn parse_tool_extractions(
    response: ChatCompletionResponse,
    allowed: &HashSet<Uuid>,
) -> Result<Vec<(Uuid, Extraction)>> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Extraction("empty chat completion response".into()))?;

    let tool_call = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .find(|tc| tc.function.name == EXTRACTION_TOOL)
        .ok_or_else(|| Error::Extraction("model did not call the extraction tool".into()))?;

    let arguments: ExtractionArguments = serde_json::from_str(&tool_call.function.arguments)
        .map_err(|e| Error::Extraction(format!("malformed tool arguments: {}", e)))?;

    let mut out = Vec::new();
    for entry in arguments.extractions {
        match entry.post_id.parse::<Uuid>() {
            Ok(id) if allowed.contains(&id) => out.push((id, entry.extraction)),
            Ok(id) => {
                warn!(post_id = %id, "Dropping extraction for id not in input set");
            }
            Err(_) => {
                warn!(post_id = %entry.post_id, "Dropping extraction with unparseable id");
            }
        }
    }
    Ok(out)
}

/// Map a provider batch status string onto the local lifecycle.
fn map_batch_state(status: &str) -> BatchState {
    match status {
        "validating" => BatchState::Submitted,
        "in_progress" | "finalizing" => BatchState::InProgress,
        "completed" => BatchState::Ended,
        "failed" | "expired" | "cancelling" | "cancelled" => BatchState::Failed,
        other => {
            warn!(status = other, "Unknown batch status, treating as in progress");
            BatchState::InProgress
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            "Embedding {} texts with model {}",
            texts.len(),
            self.config.embed_model
        );

        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: texts.to_vec(),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .build_request("/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::decode_error("embeddings", response).await);
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        // Sort by index to ensure correct ordering
        let mut data = result.data;
        data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        debug!("Generated {} embeddings", vectors.len());
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl ExtractionBackend for OpenAIBackend {
    async fn extract_chunk(
        &self,
        posts: &[ExtractionInput],
        known_categories: &[String],
    ) -> Result<Vec<(Uuid, Extraction)>> {
        if posts.is_empty() {
            return Ok(vec![]);
        }

        debug!(
            input_count = posts.len(),
            model = %self.config.gen_model,
            "Extracting metadata chunk"
        );

        let request = self.extraction_request(posts, known_categories);
        let response = self
            .build_request("/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::decode_error("chat completion", response).await);
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to parse response: {}", e)))?;

        let allowed: HashSet<Uuid> = posts.iter().map(|p| p.post_id).collect();
        parse_tool_extractions(result, &allowed)
    }

    async fn submit_batch(
        &self,
        posts: &[ExtractionInput],
        known_categories: &[String],
    ) -> Result<BatchSubmission> {
        if posts.is_empty() {
            return Err(Error::InvalidInput("cannot submit an empty batch".into()));
        }

        // One request line per post, keyed by the post id as custom_id.
        let mut jsonl = String::new();
        for post in posts {
            let line = BatchRequestLine {
                custom_id: post.post_id.to_string(),
                method: "POST".to_string(),
                url: "/v1/chat/completions".to_string(),
                body: self.extraction_request(std::slice::from_ref(post), known_categories),
            };
            jsonl.push_str(&serde_json::to_string(&line)?);
            jsonl.push('\n');
        }

        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part(
                "file",
                reqwest::multipart::Part::text(jsonl).file_name("extractions.jsonl"),
            );

        let upload = self
            .build_request("/files")
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("File upload failed: {}", e)))?;

        if !upload.status().is_success() {
            return Err(Self::decode_error("file upload", upload).await);
        }

        let file: FileObject = upload
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to parse upload response: {}", e)))?;

        let create = CreateBatchRequest {
            input_file_id: file.id,
            endpoint: "/v1/chat/completions".to_string(),
            completion_window: "24h".to_string(),
        };

        let response = self
            .build_request("/batches")
            .json(&create)
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("Batch creation failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::decode_error("batch creation", response).await);
        }

        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to parse batch response: {}", e)))?;

        info!(batch_id = %batch.id, input_count = posts.len(), "Submitted extraction batch");

        Ok(BatchSubmission {
            batch_id: batch.id,
            request_count: posts.len(),
        })
    }

    async fn poll_batch(&self, batch_id: &str) -> Result<BatchStatus> {
        let response = self
            .build_get_request(&format!("/batches/{}", batch_id))
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("Batch poll failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::decode_error("batch poll", response).await);
        }

        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to parse batch response: {}", e)))?;

        let counts = batch.request_counts.unwrap_or_default();
        Ok(BatchStatus {
            state: map_batch_state(&batch.status),
            completed: counts.completed,
            total: counts.total,
        })
    }

    async fn fetch_batch_results(&self, batch_id: &str) -> Result<Vec<(Uuid, Extraction)>> {
        let response = self
            .build_get_request(&format!("/batches/{}", batch_id))
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("Batch retrieve failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::decode_error("batch retrieve", response).await);
        }

        let batch: BatchObject = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to parse batch response: {}", e)))?;

        if !map_batch_state(&batch.status).is_terminal() {
            return Err(Error::State(format!(
                "batch {} is not terminal (status: {})",
                batch_id, batch.status
            )));
        }

        let output_file_id = batch.output_file_id.ok_or_else(|| {
            Error::Extraction(format!("batch {} has no output file", batch_id))
        })?;

        let content = self
            .build_get_request(&format!("/files/{}/content", output_file_id))
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("Result download failed: {}", e)))?;

        if !content.status().is_success() {
            return Err(Self::decode_error("result download", content).await);
        }

        let body = content
            .text()
            .await
            .map_err(|e| Error::Extraction(format!("Failed to read result file: {}", e)))?;

        let mut out = Vec::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let parsed: BatchResponseLine = match serde_json::from_str(line) {
                Ok(p) => p,
                Err(e) => {
                    warn!(batch_id, error = %e, "Skipping malformed result line");
                    continue;
                }
            };
            let Ok(post_id) = parsed.custom_id.parse::<Uuid>() else {
                warn!(batch_id, custom_id = %parsed.custom_id, "Skipping result with unparseable id");
                continue;
            };
            let Some(response) = parsed.response else {
                warn!(batch_id, post_id = %post_id, "Skipping result without response body");
                continue;
            };
            let allowed = HashSet::from([post_id]);
            match parse_tool_extractions(response.body, &allowed) {
                Ok(mut results) => out.append(&mut results),
                Err(e) => {
                    warn!(batch_id, post_id = %post_id, error = %e, "Skipping unparseable result");
                }
            }
        }

        info!(batch_id, result_count = out.len(), "Fetched batch results");
        Ok(out)
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<()> {
        let response = self
            .build_request(&format!("/batches/{}/cancel", batch_id))
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("Batch cancel failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::decode_error("batch cancel", response).await);
        }
        info!(batch_id, "Cancelled extraction batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> OpenAIBackend {
        OpenAIBackend::new(OpenAIConfig {
            base_url: server.uri(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn input(id: Uuid, caption: &str) -> ExtractionInput {
        ExtractionInput {
            post_id: id,
            caption: caption.to_string(),
        }
    }

    #[test]
    fn test_map_batch_state() {
        assert_eq!(map_batch_state("validating"), BatchState::Submitted);
        assert_eq!(map_batch_state("in_progress"), BatchState::InProgress);
        assert_eq!(map_batch_state("finalizing"), BatchState::InProgress);
        assert_eq!(map_batch_state("completed"), BatchState::Ended);
        assert_eq!(map_batch_state("failed"), BatchState::Failed);
        assert_eq!(map_batch_state("cancelled"), BatchState::Failed);
        assert_eq!(map_batch_state("???"), BatchState::InProgress);
    }

    #[test]
    fn test_extraction_request_includes_known_categories() {
        let backend = OpenAIBackend::with_defaults().unwrap();
        let req = backend.extraction_request(
            &[input(Uuid::new_v4(), "pasta night")],
            &["Food".to_string(), "Travel".to_string()],
        );
        assert!(req.messages[0].content.contains("Food, Travel"));
        assert!(req.tools.is_some());
        assert!(req.tool_choice.is_some());
    }

    #[test]
    fn test_parse_tool_extractions_drops_foreign_ids() {
        let known = Uuid::new_v4();
        let foreign = Uuid::new_v4();
        let arguments = json!({
            "extractions": [
                { "post_id": known.to_string(), "categories": ["Food"] },
                { "post_id": foreign.to_string(), "categories": ["Travel"] },
                { "post_id": "not-a-uuid", "categories": ["Junk"] }
            ]
        })
        .to_string();

        let response = ChatCompletionResponse {
            choices: vec![ChatChoice {
                message: ChatResponseMessage {
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        function: FunctionCall {
                            name: EXTRACTION_TOOL.to_string(),
                            arguments,
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
        };

        let allowed = HashSet::from([known]);
        let results = parse_tool_extractions(response, &allowed).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, known);
        assert_eq!(results[0].1.categories, vec!["Food"]);
    }

    #[test]
    fn test_parse_tool_extractions_requires_tool_call() {
        let response = ChatCompletionResponse {
            choices: vec![ChatChoice {
                message: ChatResponseMessage {
                    content: Some("I cannot do that".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
        };
        let err = parse_tool_extractions(response, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_embed_texts_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "embedding": [0.2, 0.2], "index": 1 },
                    { "embedding": [0.1, 0.1], "index": 0 }
                ],
                "model": "text-embedding-3-small"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let vectors = backend
            .embed_texts(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![0.1, 0.1]);
        assert_eq!(vectors[1], vec![0.2, 0.2]);
    }

    #[tokio::test]
    async fn test_embed_texts_empty_input_skips_request() {
        let server = MockServer::start().await;
        let backend = backend_for(&server);
        let vectors = backend.embed_texts(&[]).await.unwrap();
        assert!(vectors.is_empty());
        // No mock registered: a request would have failed loudly.
    }

    #[tokio::test]
    async fn test_extract_chunk_parses_tool_call() {
        let server = MockServer::start().await;
        let post_id = Uuid::new_v4();
        let arguments = json!({
            "extractions": [{
                "post_id": post_id.to_string(),
                "hashtags": ["pasta"],
                "categories": ["Food/Italian"],
                "location": "Rome"
            }]
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "tool_calls": [{
                            "function": {
                                "name": EXTRACTION_TOOL,
                                "arguments": arguments
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let results = backend
            .extract_chunk(&[input(post_id, "pasta night in Rome")], &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, post_id);
        assert_eq!(results[0].1.location.as_deref(), Some("Rome"));
    }

    #[tokio::test]
    async fn test_extract_chunk_surfaces_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "message": "rate limited" }
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let err = backend
            .extract_chunk(&[input(Uuid::new_v4(), "caption")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_poll_batch_maps_status_and_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/batches/batch_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "batch_abc",
                "status": "in_progress",
                "request_counts": { "total": 5, "completed": 2, "failed": 0 }
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let status = backend.poll_batch("batch_abc").await.unwrap();
        assert_eq!(status.state, BatchState::InProgress);
        assert_eq!(status.completed, 2);
        assert_eq!(status.total, 5);
    }

    #[tokio::test]
    async fn test_fetch_batch_results_rejects_non_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/batches/batch_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "batch_abc",
                "status": "in_progress"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let err = backend.fetch_batch_results("batch_abc").await.unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[tokio::test]
    async fn test_fetch_batch_results_parses_jsonl() {
        let server = MockServer::start().await;
        let post_id = Uuid::new_v4();
        let arguments = json!({
            "extractions": [{ "post_id": post_id.to_string(), "categories": ["Food"] }]
        })
        .to_string();
        let line = json!({
            "custom_id": post_id.to_string(),
            "response": { "body": { "choices": [{
                "message": { "tool_calls": [{ "function": {
                    "name": EXTRACTION_TOOL, "arguments": arguments
                }}]},
                "finish_reason": "tool_calls"
            }]}}
        });

        Mock::given(method("GET"))
            .and(path("/batches/batch_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "batch_abc",
                "status": "completed",
                "output_file_id": "file_out"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/file_out/content"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}\n", line)))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let results = backend.fetch_batch_results("batch_abc").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, post_id);
        assert_eq!(results[0].1.categories, vec!["Food"]);
    }

    #[tokio::test]
    async fn test_submit_batch_uploads_then_creates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": "file_in" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/batches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "batch_xyz",
                "status": "validating"
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let submission = backend
            .submit_batch(
                &[
                    input(Uuid::new_v4(), "pasta"),
                    input(Uuid::new_v4(), "sushi"),
                ],
                &["Food".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(submission.batch_id, "batch_xyz");
        assert_eq!(submission.request_count, 2);
    }

    #[tokio::test]
    async fn test_submit_batch_rejects_empty_input() {
        let server = MockServer::start().await;
        let backend = backend_for(&server);
        let err = backend.submit_batch(&[], &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
