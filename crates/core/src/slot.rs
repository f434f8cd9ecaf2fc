//! Per-slot inference state.
//!
//! A slot is the data record for one logical sequence in the shared
//! context: scheduler counters, the helpers that classify its text
//! stream, and the snapshot that makes rewinds possible. The processor
//! owns the vector of slots; nothing here runs on its own.

use std::sync::Arc;
use std::time::Instant;

use crate::detokenizer::StreamingDetokenizer;
use crate::engine::{Context, Pos, SeqId, TokenId};
use crate::presampler::Presampler;
use crate::request::{FinishReason, InferenceArgs, RequestId};
use crate::resources::GenerationResources;
use crate::rules::RuleStream;
use crate::sampling::SamplerChain;
use crate::sequence_stream::SequenceStream;
use crate::status::{rate, StatusPayload};

pub type SlotId = SeqId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Prompt,
    Generating,
}

/// State captured at the last accepted commit, restored on rewind.
///
/// `kv_cut` is the first KV position to delete when rewinding: `n_past`
/// for a snapshot taken at prompt end (no decode has run yet), otherwise
/// one past the engine-reported maximum position, so the last accepted
/// token's row survives.
///
/// `tokens_generated` is deliberately absent: it counts sampling steps
/// monotonically so length limits keep advancing through rewind loops.
#[derive(Debug, Clone, Default)]
pub struct SlotSnapshot {
    pub prompt_tokens_processed: usize,
    pub n_past: Pos,
    pub i_batch: Option<usize>,
    pub last_token: TokenId,
    pub sequence_buffer: String,
    pub kv_cut: Pos,
}

impl SlotSnapshot {
    pub fn capture(slot: &Slot, ctx: &dyn Context, during_prompt: bool) -> Self {
        let kv_cut = if during_prompt {
            slot.n_past
        } else {
            ctx.seq_pos_max(slot.slot_id).map_or(0, |p| p + 1)
        };
        Self {
            prompt_tokens_processed: slot.prompt_tokens_processed,
            n_past: slot.n_past,
            i_batch: slot.i_batch,
            last_token: slot.last_token,
            sequence_buffer: slot.sequence_stream.buffer().to_string(),
            kv_cut,
        }
    }
}

pub struct Slot {
    pub slot_id: SlotId,
    pub state: SlotState,
    /// Stamped on every transition back to idle; oldest-idle tiebreaker.
    pub job_index: u64,
    pub request_id: Option<RequestId>,

    /// Retained across idle so a later request can reuse the KV prefix.
    pub prompt_tokens: Vec<TokenId>,
    pub prompt_tokens_processed: usize,
    pub tokens_generated: usize,
    pub n_past: Pos,
    /// Row this slot contributed to the current batch, if any.
    pub i_batch: Option<usize>,
    pub last_token: TokenId,
    pub generated_text: String,
    /// Resolved per-slot context bound (engine ctx already folded in).
    pub n_ctx_max: usize,
    /// Matched stop literal, reported in the final status.
    pub stop_matched: String,

    pub detokenizer: StreamingDetokenizer,
    pub sequence_stream: SequenceStream,
    pub rules: RuleStream,
    pub presampler: Presampler,
    pub constraint: Option<Box<dyn SamplerChain>>,
    pub snapshot: SlotSnapshot,
    pub args: Option<InferenceArgs>,

    started: Instant,
    prompt_done: Option<Instant>,
    finished: Option<Instant>,
}

impl Slot {
    pub fn new(slot_id: SlotId, job_index: u64) -> Self {
        Self {
            slot_id,
            state: SlotState::Idle,
            job_index,
            request_id: None,
            prompt_tokens: Vec::new(),
            prompt_tokens_processed: 0,
            tokens_generated: 0,
            n_past: 0,
            i_batch: None,
            last_token: 0,
            generated_text: String::new(),
            n_ctx_max: 0,
            stop_matched: String::new(),
            detokenizer: StreamingDetokenizer::new(),
            sequence_stream: SequenceStream::new(),
            rules: RuleStream::new(),
            presampler: Presampler::new(0),
            constraint: None,
            snapshot: SlotSnapshot::default(),
            args: None,
            started: Instant::now(),
            prompt_done: None,
            finished: None,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.state != SlotState::Idle
    }

    pub fn is_prompt(&self) -> bool {
        self.state == SlotState::Prompt
    }

    pub fn is_generating(&self) -> bool {
        self.state == SlotState::Generating
    }

    pub fn resources(&self) -> Option<&Arc<GenerationResources>> {
        self.args.as_ref().map(|a| &a.resources)
    }

    /// Mark the moment the prompt finished and generation began.
    pub fn mark_prompt_done(&mut self) {
        if self.prompt_done.is_none() {
            self.prompt_done = Some(Instant::now());
        }
    }

    pub fn mark_started(&mut self) {
        self.started = Instant::now();
        self.prompt_done = None;
        self.finished = None;
    }

    pub fn mark_finished(&mut self) {
        if self.finished.is_none() {
            self.finished = Some(Instant::now());
        }
    }

    /// Restore the last accepted state and report where to cut the KV.
    ///
    /// `tokens_generated` keeps counting; see [`SlotSnapshot`].
    pub fn rewind_to_snapshot(&mut self) -> Pos {
        self.prompt_tokens_processed = self.snapshot.prompt_tokens_processed;
        self.n_past = self.snapshot.n_past;
        self.i_batch = self.snapshot.i_batch;
        self.last_token = self.snapshot.last_token;
        self.sequence_stream
            .restore_buffer(self.snapshot.sequence_buffer.clone());
        self.detokenizer.reset();
        self.snapshot.kv_cut
    }

    /// Return to idle, releasing the request binding. `prompt_tokens` is
    /// kept for prefix reuse by a future request.
    pub fn release(&mut self, new_job_index: u64) {
        self.state = SlotState::Idle;
        self.job_index = new_job_index;
        self.request_id = None;
        self.prompt_tokens_processed = 0;
        self.tokens_generated = 0;
        self.n_past = 0;
        self.i_batch = None;
        self.last_token = 0;
        self.generated_text.clear();
        self.stop_matched.clear();
        self.detokenizer.reset();
        self.rules.reset();
        self.presampler.reset(0);
        self.constraint = None;
        self.snapshot = SlotSnapshot::default();
        self.args = None;
    }

    /// Build the final status record for this slot.
    pub fn status(&self, reason: FinishReason) -> StatusPayload {
        let prompt_sec = self
            .prompt_done
            .map(|t| t.duration_since(self.started).as_secs_f64())
            .unwrap_or(0.0);
        let total_sec = self
            .finished
            .map(|t| t.duration_since(self.started).as_secs_f64())
            .unwrap_or(prompt_sec);
        let gen_sec = (total_sec - prompt_sec).max(0.0);

        StatusPayload {
            slot_id: self.slot_id as i64,
            slot_request_id: self.request_id.unwrap_or(0),
            job_index: self.job_index,
            prompt_tokens: self.prompt_tokens.len(),
            gen_tokens: self.tokens_generated,
            prompt_sec,
            gen_sec,
            total_sec,
            gen_tokens_per_sec: rate(self.tokens_generated, gen_sec),
            prompt_tokens_per_sec: rate(self.prompt_tokens.len(), prompt_sec),
            finish_reason: reason,
            stop_token: self.stop_matched.clone(),
        }
    }
}
