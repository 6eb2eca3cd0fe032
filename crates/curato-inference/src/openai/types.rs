//! OpenAI API request and response types.

use serde::{Deserialize, Serialize};

use curato_core::Extraction;

// =============================================================================
// EMBEDDING TYPES
// =============================================================================

/// Request body for the embeddings endpoint.
#[derive(Debug, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
}

/// Response from the embeddings endpoint.
#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    pub model: String,
}

/// Single embedding data point.
#[derive(Debug, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: usize,
}

// =============================================================================
// CHAT COMPLETION TYPES (tool-call extraction)
// =============================================================================

/// Request body for the chat completions endpoint.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Tool definition (function calling).
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

/// Function schema within a tool definition.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from the chat completions endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

/// Single chat completion choice.
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
    pub finish_reason: Option<String>,
}

/// Assistant message, possibly carrying tool calls instead of content.
#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// A tool call emitted by the model.
#[derive(Debug, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function name and JSON-encoded arguments of a tool call.
#[derive(Debug, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments string.
    pub arguments: String,
}

/// Arguments schema of the extraction tool call: one entry per input post,
/// echoed back with its id so results are matched by identifier.
#[derive(Debug, Deserialize)]
pub struct ExtractionArguments {
    #[serde(default)]
    pub extractions: Vec<PostExtraction>,
}

/// One post's extraction within a tool call, keyed by the echoed post id.
#[derive(Debug, Deserialize)]
pub struct PostExtraction {
    pub post_id: String,
    #[serde(flatten)]
    pub extraction: Extraction,
}

// =============================================================================
// BATCH API TYPES
// =============================================================================

/// One line of a batch input JSONL file.
#[derive(Debug, Serialize)]
pub struct BatchRequestLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatCompletionRequest,
}

/// Response from file upload (`/files`).
#[derive(Debug, Deserialize)]
pub struct FileObject {
    pub id: String,
}

/// Request body for batch creation (`/batches`).
#[derive(Debug, Serialize)]
pub struct CreateBatchRequest {
    pub input_file_id: String,
    pub endpoint: String,
    pub completion_window: String,
}

/// Batch object returned by create/retrieve/cancel.
#[derive(Debug, Deserialize)]
pub struct BatchObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: Option<BatchRequestCounts>,
}

/// Per-batch request counters.
#[derive(Debug, Default, Deserialize)]
pub struct BatchRequestCounts {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub failed: usize,
}

/// One line of a batch output JSONL file.
#[derive(Debug, Deserialize)]
pub struct BatchResponseLine {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<BatchResponseBody>,
}

/// Wrapper around the per-request response body.
#[derive(Debug, Deserialize)]
pub struct BatchResponseBody {
    pub body: ChatCompletionResponse,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Error response from OpenAI API.
#[derive(Debug, Deserialize)]
pub struct OpenAIErrorResponse {
    pub error: OpenAIError,
}

/// Detailed error information.
#[derive(Debug, Deserialize)]
pub struct OpenAIError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}
