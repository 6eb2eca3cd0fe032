//! OpenAI-compatible provider client.
//!
//! One backend covers all three provider surfaces the pipeline needs:
//! chat completions for structured extraction, embeddings for the
//! reconciliation pass, and the file-upload + batches flow for bulk jobs.

mod backend;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL, DEFAULT_GEN_MODEL,
    DEFAULT_OPENAI_URL, DEFAULT_TIMEOUT_SECS,
};
