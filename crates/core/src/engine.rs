//! Contract between the serving core and the native inference engine.
//!
//! The engine is an external collaborator (a GGUF-backed transformer
//! runtime). It is split along the model/context seam the underlying
//! library draws: [`Model`] covers the vocabulary, tokenization and
//! sampler construction, and is shared freely across threads;
//! [`Context`] owns the KV memory and the forward pass, and is owned
//! exclusively by the processor's worker thread.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thiserror::Error;

use crate::sampling::{SamplerChain, SamplerStage};

/// Token identifier in the engine vocabulary.
pub type TokenId = u32;

/// Sequence identifier inside the shared context. Slots use their slot id.
pub type SeqId = u32;

/// Position of a token within a sequence (a KV cell row).
pub type Pos = u32;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("detokenization failed: {0}")]
    Detokenize(String),
}

/// Outcome of a failed `decode` call.
///
/// `Aborted` is the retryable case: the abort callback fired and consumed
/// the abort flag, so a subsequent decode of the same batch proceeds.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("decode aborted by callback")]
    Aborted,

    #[error("decode failed with status {0}")]
    Failed(i32),
}

/// One forward pass worth of tokens, packed from all active slots.
///
/// Rows are parallel arrays in the style of the native batch struct:
/// token, position, owning sequence, and whether the row's logits are
/// needed after the pass.
pub struct Batch {
    tokens: Vec<TokenId>,
    pos: Vec<Pos>,
    seq_ids: Vec<SeqId>,
    wants_logits: Vec<bool>,
    capacity: usize,
}

impl Batch {
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: Vec::with_capacity(capacity),
            pos: Vec::with_capacity(capacity),
            seq_ids: Vec::with_capacity(capacity),
            wants_logits: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a row and return its index.
    ///
    /// Callers must check [`is_full`](Self::is_full) first; pushing past
    /// capacity is a logic error in the batching loop.
    pub fn push(&mut self, token: TokenId, pos: Pos, seq_id: SeqId, wants_logits: bool) -> usize {
        debug_assert!(self.tokens.len() < self.capacity, "batch overflow");
        let row = self.tokens.len();
        self.tokens.push(token);
        self.pos.push(pos);
        self.seq_ids.push(seq_id);
        self.wants_logits.push(wants_logits);
        row
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.pos.clear();
        self.seq_ids.clear();
        self.wants_logits.clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tokens.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn token(&self, row: usize) -> TokenId {
        self.tokens[row]
    }

    pub fn pos(&self, row: usize) -> Pos {
        self.pos[row]
    }

    pub fn seq_id(&self, row: usize) -> SeqId {
        self.seq_ids[row]
    }

    pub fn wants_logits(&self, row: usize) -> bool {
        self.wants_logits[row]
    }
}

/// Model-level surface: vocabulary queries, tokenization, and the
/// sampler-chain factory. Implementations wrap the loaded model weights
/// and are immutable, hence `Send + Sync`.
pub trait Model: Send + Sync {
    fn n_vocab(&self) -> usize;

    fn bos(&self) -> TokenId;

    fn eos(&self) -> TokenId;

    fn eot(&self) -> TokenId;

    /// True for any end-of-generation token (EOS, EOT, or model-specific).
    fn is_eog(&self, token: TokenId) -> bool;

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError>;

    /// Render a token sequence back to text.
    fn detokenize(&self, tokens: &[TokenId], parse_special: bool) -> String;

    /// Raw bytes of a single token's piece. Bytes, not a `String`: a
    /// piece may end mid-codepoint and only becomes valid UTF-8 once the
    /// next piece arrives.
    fn token_to_piece(&self, token: TokenId, parse_special: bool) -> Vec<u8>;

    /// Build a sampler chain from the given stages.
    fn sampler(&self, stages: &[SamplerStage]) -> Box<dyn SamplerChain>;
}

/// Context-level surface: the shared KV memory and the forward pass.
/// Owned by exactly one worker thread.
pub trait Context: Send {
    /// Total context length shared by all sequences.
    fn n_ctx(&self) -> usize;

    /// Logical batch capacity of a single decode call.
    fn n_batch(&self) -> usize;

    fn decode(&mut self, batch: &Batch) -> Result<(), DecodeError>;

    /// Logits of a row that was marked `wants_logits` in the last batch.
    fn logits(&self, row: usize) -> Vec<f32>;

    /// Remove every KV cell of `seq` at positions >= `from`.
    fn seq_remove(&mut self, seq: SeqId, from: Pos);

    /// Highest populated position of `seq`, or `None` when the sequence
    /// holds no cells.
    fn seq_pos_max(&self, seq: SeqId) -> Option<Pos>;

    /// Drop all sequences from the KV memory.
    fn clear_memory(&mut self);

    /// Number of KV cells currently in use, for defragmentation checks.
    fn kv_used_cells(&self) -> usize;

    /// Request a KV defragment. Engines without support ignore it.
    fn defrag(&mut self) {}

    /// Register the abort flag consumed by the engine's abort callback.
    /// A decode that observes the flag set swaps it back to `false` and
    /// returns [`DecodeError::Aborted`].
    fn set_abort_flag(&mut self, flag: Arc<AtomicBool>);
}
