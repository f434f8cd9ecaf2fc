//! A scripted mock engine for exercising the serving core without real
//! weights.
//!
//! Tokens are bytes: token id `b` renders as the single byte `b`, with
//! three specials above the byte range. The context stores each
//! sequence's rows in a plain map, which doubles as an inspectable KV
//! cache for tests. Logits are produced from a script keyed by the full
//! token history: the scripted candidates get descending positive
//! logits, everything else a flat floor, so a greedy chain walks the
//! script while logit-bias bans divert it to the next preference.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ahash::{AHashMap, AHashSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::{
    Batch, Context, DecodeError, EngineError, Model, Pos, SeqId, TokenId,
};
use crate::sampling::{SamplerChain, SamplerStage, TokenCandidates};

const N_VOCAB: usize = 259;

/// Logit handed to the best scripted candidate; later preferences step
/// down by one. Unscripted tokens sit far below, yet still well above a
/// ban bias, so bans reliably divert to the next preference first.
const PREFERRED_LOGIT: f32 = 50.0;
const FLOOR_LOGIT: f32 = -100.0;

pub struct MockModel;

impl MockModel {
    pub const BOS: TokenId = 256;
    pub const EOS: TokenId = 257;
    pub const EOT: TokenId = 258;

    pub fn new() -> Self {
        Self
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Model for MockModel {
    fn n_vocab(&self) -> usize {
        N_VOCAB
    }

    fn bos(&self) -> TokenId {
        Self::BOS
    }

    fn eos(&self) -> TokenId {
        Self::EOS
    }

    fn eot(&self) -> TokenId {
        Self::EOT
    }

    fn is_eog(&self, token: TokenId) -> bool {
        token == Self::EOS || token == Self::EOT
    }

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        _parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError> {
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if add_special {
            tokens.push(Self::BOS);
        }
        tokens.extend(text.bytes().map(|b| b as TokenId));
        Ok(tokens)
    }

    fn detokenize(&self, tokens: &[TokenId], _parse_special: bool) -> String {
        let bytes: Vec<u8> = tokens
            .iter()
            .filter(|&&t| t < 256)
            .map(|&t| t as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn token_to_piece(&self, token: TokenId, _parse_special: bool) -> Vec<u8> {
        if token < 256 {
            vec![token as u8]
        } else {
            Vec::new()
        }
    }

    fn sampler(&self, stages: &[SamplerStage]) -> Box<dyn SamplerChain> {
        let stages = stages
            .iter()
            .map(|stage| match stage {
                SamplerStage::Greedy => MockStage::Greedy,
                SamplerStage::Dist { seed } => {
                    MockStage::Dist(StdRng::seed_from_u64(*seed as u64))
                }
                SamplerStage::LogitBias(biases) => MockStage::Bias(biases.clone()),
                SamplerStage::Grammar { grammar, .. } | SamplerStage::LarkGrammar { grammar } => {
                    MockStage::Allow(grammar.bytes().map(|b| b as TokenId).collect())
                }
                _ => MockStage::Noop,
            })
            .collect();
        Box::new(MockSamplerChain { stages })
    }
}

enum MockStage {
    Greedy,
    Dist(StdRng),
    Bias(Vec<(TokenId, f32)>),
    /// Crude grammar stand-in: only the listed byte tokens survive.
    Allow(AHashSet<TokenId>),
    Noop,
}

pub struct MockSamplerChain {
    stages: Vec<MockStage>,
}

impl SamplerChain for MockSamplerChain {
    fn apply(&mut self, candidates: &mut TokenCandidates) {
        for stage in &mut self.stages {
            match stage {
                MockStage::Greedy => {
                    // First maximum wins so ties resolve to the lowest
                    // token id, deterministically.
                    let mut best: Option<usize> = None;
                    for (i, d) in candidates.data.iter().enumerate() {
                        let better = best.is_none_or(|b| d.logit > candidates.data[b].logit);
                        if better {
                            best = Some(i);
                        }
                    }
                    candidates.selected = best;
                }
                MockStage::Dist(rng) => {
                    let max = candidates
                        .data
                        .iter()
                        .map(|d| d.logit)
                        .fold(f32::NEG_INFINITY, f32::max);
                    if !max.is_finite() {
                        candidates.selected = None;
                        continue;
                    }
                    let mut total = 0.0f32;
                    for d in &mut candidates.data {
                        d.p = (d.logit - max).exp();
                        total += d.p;
                    }
                    let mut pick = rng.gen::<f32>() * total;
                    candidates.selected = Some(candidates.data.len() - 1);
                    for (i, d) in candidates.data.iter().enumerate() {
                        pick -= d.p;
                        if pick <= 0.0 {
                            candidates.selected = Some(i);
                            break;
                        }
                    }
                }
                MockStage::Bias(biases) => {
                    for (token, bias) in biases.iter() {
                        if let Some(d) = candidates.data.get_mut(*token as usize) {
                            d.logit += *bias;
                        }
                    }
                }
                MockStage::Allow(allowed) => {
                    for d in &mut candidates.data {
                        if !allowed.contains(&d.id) {
                            d.logit = f32::NEG_INFINITY;
                        }
                    }
                }
                MockStage::Noop => {}
            }
        }
    }

    fn accept(&mut self, _token: TokenId) {}
}

/// Shared, inspectable state of a [`MockContext`]. Tests keep a handle
/// from [`MockContext::state`] and script or assert through it.
#[derive(Default)]
pub struct MockState {
    /// Full token history -> preference-ordered next-token candidates.
    script: AHashMap<Vec<TokenId>, Vec<TokenId>>,
    /// Fallback when a history is not scripted; `None` means EOS.
    default_next: Option<TokenId>,
    seqs: BTreeMap<SeqId, BTreeMap<Pos, TokenId>>,
    logits_rows: Vec<Option<Vec<f32>>>,
    pub decode_calls: usize,
    pub tokens_decoded: usize,
    pub defrag_calls: usize,
    /// Fail this many upcoming decode calls with a fatal status.
    pub fail_decodes: u32,
}

impl MockState {
    /// Script a full deterministic completion for `prompt`, ending in
    /// EOS.
    pub fn add_completion(&mut self, prompt: &[TokenId], completion: &[TokenId]) {
        for i in 0..completion.len() {
            let mut history = prompt.to_vec();
            history.extend_from_slice(&completion[..i]);
            self.script.insert(history, vec![completion[i]]);
        }
        let mut full = prompt.to_vec();
        full.extend_from_slice(completion);
        self.script.insert(full, vec![MockModel::EOS]);
    }

    /// Script preference-ordered candidates for one exact history,
    /// overriding anything `add_completion` put there.
    pub fn add_preference(&mut self, history: &[TokenId], preferences: &[TokenId]) {
        self.script.insert(history.to_vec(), preferences.to_vec());
    }

    pub fn set_default_next(&mut self, token: Option<TokenId>) {
        self.default_next = token;
    }

    /// Tokens currently held for `seq`, in position order. This is the
    /// mock's KV cache content.
    pub fn seq_tokens(&self, seq: SeqId) -> Vec<TokenId> {
        self.seqs
            .get(&seq)
            .map(|rows| rows.values().copied().collect())
            .unwrap_or_default()
    }

    fn logits_for(&self, history: &[TokenId]) -> Vec<f32> {
        let mut logits = vec![FLOOR_LOGIT; N_VOCAB];
        match self.script.get(history) {
            Some(preferences) => {
                for (rank, &token) in preferences.iter().enumerate() {
                    logits[token as usize] = PREFERRED_LOGIT - rank as f32;
                }
            }
            None => {
                let next = self.default_next.unwrap_or(MockModel::EOS);
                logits[next as usize] = PREFERRED_LOGIT;
            }
        }
        logits
    }
}

pub struct MockContext {
    state: Arc<Mutex<MockState>>,
    abort: Option<Arc<AtomicBool>>,
    n_ctx: usize,
    n_batch: usize,
}

impl MockContext {
    pub fn new(n_ctx: usize, n_batch: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            abort: None,
            n_ctx,
            n_batch,
        }
    }

    /// Handle for scripting and assertions; survives moving the context
    /// into a processor.
    pub fn state(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }

    /// Populate rows directly, bypassing decode.
    pub fn seed_rows(&mut self, seq: SeqId, rows: &[(Pos, TokenId)]) {
        let mut state = self.state.lock().unwrap();
        let entry = state.seqs.entry(seq).or_default();
        for &(pos, token) in rows {
            entry.insert(pos, token);
        }
    }
}

impl Context for MockContext {
    fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    fn n_batch(&self) -> usize {
        self.n_batch
    }

    fn decode(&mut self, batch: &Batch) -> Result<(), DecodeError> {
        if let Some(flag) = &self.abort {
            if flag.swap(false, Ordering::SeqCst) {
                return Err(DecodeError::Aborted);
            }
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_decodes > 0 {
            state.fail_decodes -= 1;
            return Err(DecodeError::Failed(1));
        }

        state.decode_calls += 1;
        for row in 0..batch.len() {
            state
                .seqs
                .entry(batch.seq_id(row))
                .or_default()
                .insert(batch.pos(row), batch.token(row));
            state.tokens_decoded += 1;
        }

        let mut logits_rows: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
        for row in 0..batch.len() {
            if !batch.wants_logits(row) {
                continue;
            }
            let history: Vec<TokenId> = state
                .seqs
                .get(&batch.seq_id(row))
                .map(|rows| {
                    rows.range(..=batch.pos(row)).map(|(_, &t)| t).collect()
                })
                .unwrap_or_default();
            logits_rows[row] = Some(state.logits_for(&history));
        }
        state.logits_rows = logits_rows;
        Ok(())
    }

    fn logits(&self, row: usize) -> Vec<f32> {
        self.state
            .lock()
            .unwrap()
            .logits_rows
            .get(row)
            .cloned()
            .flatten()
            .expect("requested logits for a row that was not logit-bearing")
    }

    fn seq_remove(&mut self, seq: SeqId, from: Pos) {
        let mut state = self.state.lock().unwrap();
        if let Some(rows) = state.seqs.get_mut(&seq) {
            rows.split_off(&from);
        }
    }

    fn seq_pos_max(&self, seq: SeqId) -> Option<Pos> {
        self.state
            .lock()
            .unwrap()
            .seqs
            .get(&seq)
            .and_then(|rows| rows.last_key_value().map(|(&pos, _)| pos))
    }

    fn clear_memory(&mut self) {
        self.state.lock().unwrap().seqs.clear();
    }

    fn kv_used_cells(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .seqs
            .values()
            .map(|rows| rows.len())
            .sum()
    }

    fn defrag(&mut self) {
        self.state.lock().unwrap().defrag_calls += 1;
    }

    fn set_abort_flag(&mut self, flag: Arc<AtomicBool>) {
        self.abort = Some(flag);
    }
}
