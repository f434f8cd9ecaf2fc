//! Request records and per-request generation parameters.

use std::sync::Arc;

use serde::Serialize;

use crate::engine::TokenId;
use crate::resources::GenerationResources;

pub type RequestId = u64;

/// Terminal classification of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinishReason {
    /// An end-of-generation token was sampled.
    StopToken,
    /// A stop pattern completed in the text stream.
    StopString,
    MaxNewTokens,
    CtxExceeded,
    /// The engine rejected a batch mid-decode.
    BatchDecode,
    /// The prompt failed to tokenize at admission.
    TokenEncode,
    Aborted,
    Unspecified,
}

/// Per-request generation parameters, bundled with the caller's shared
/// resources.
pub struct InferenceArgs {
    pub resources: Arc<GenerationResources>,
    pub max_tokens: usize,
    pub min_tokens: usize,
    /// Per-request context bound; 0 means the engine context is the only
    /// limit.
    pub max_slot_n_ctx: usize,
    pub seed: u32,
    pub rewind_patterns: Vec<String>,
    pub stop_patterns: Vec<String>,
    pub stop_tokens: Vec<TokenId>,
    pub add_special_bos: bool,
}

impl InferenceArgs {
    pub fn new(resources: Arc<GenerationResources>) -> Self {
        Self {
            resources,
            max_tokens: 256,
            min_tokens: 0,
            max_slot_n_ctx: 0,
            seed: 1337,
            rewind_patterns: Vec::new(),
            stop_patterns: Vec::new(),
            stop_tokens: Vec::new(),
            add_special_bos: true,
        }
    }
}

/// One queued unit of work: a tokenized prompt waiting for a slot.
pub struct Request {
    pub id: RequestId,
    pub prompt_tokens: Vec<TokenId>,
    pub args: InferenceArgs,
}
