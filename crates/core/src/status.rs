//! Final status record written to the readback buffer, one per request.

use serde::Serialize;

use crate::request::{FinishReason, RequestId};

/// The payload serialized into the readback buffer's status slot.
///
/// `slot_id` is -1 when the request never reached a slot (admission-time
/// rejections and queue cancellations).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub slot_id: i64,
    pub slot_request_id: RequestId,
    pub job_index: u64,
    pub prompt_tokens: usize,
    pub gen_tokens: usize,
    pub prompt_sec: f64,
    pub gen_sec: f64,
    pub total_sec: f64,
    pub gen_tokens_per_sec: f64,
    pub prompt_tokens_per_sec: f64,
    pub finish_reason: FinishReason,
    pub stop_token: String,
}

impl StatusPayload {
    /// Status for a request finalized without ever occupying a slot.
    pub fn rejected(request_id: RequestId, reason: FinishReason) -> Self {
        Self {
            slot_id: -1,
            slot_request_id: request_id,
            job_index: 0,
            prompt_tokens: 0,
            gen_tokens: 0,
            prompt_sec: 0.0,
            gen_sec: 0.0,
            total_sec: 0.0,
            gen_tokens_per_sec: 0.0,
            prompt_tokens_per_sec: 0.0,
            finish_reason: reason,
            stop_token: String::new(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Tokens-per-second with a zero-duration guard.
pub fn rate(tokens: usize, seconds: f64) -> f64 {
    if seconds > 0.0 {
        tokens as f64 / seconds
    } else {
        0.0
    }
}
