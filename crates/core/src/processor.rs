//! The worker: continuous batching across a fixed pool of slots.
//!
//! One dedicated thread owns the engine context, the batch, and the slot
//! vector. Callers reach it through `submit` and `cancel` under the task
//! mutex, and read results through the per-request readback buffers.
//! Requests stick to the slot they are admitted to until they finish;
//! fairness is deliberately traded for KV locality, and admission
//! prefers the idle slot with the longest retained token prefix.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::ProcessorConfig;
use crate::engine::{Batch, Context, DecodeError, Model, Pos, TokenId};
use crate::request::{FinishReason, InferenceArgs, Request, RequestId};
use crate::resources::GenerationResources;
use crate::rules::{self, RuleEffect};
use crate::sampling::{sample_multistage, SamplerChain, SamplerStage};
use crate::sequence_stream::{SequenceContext, SequenceStatus};
use crate::slot::{Slot, SlotSnapshot, SlotState};
use crate::status::StatusPayload;

const DECODE_RETRY_PAUSE: Duration = Duration::from_millis(5);
const NO_REQUEST: RequestId = 0;

struct TaskState {
    queue: VecDeque<Request>,
    should_exit: bool,
}

/// Caller-visible mirror of one slot's binding. `cancel` only ever
/// touches these atomics (plus the readback buffer's own mutex); the
/// slot itself stays worker-exclusive.
struct SlotSignal {
    request_id: AtomicU64,
    processing: AtomicBool,
    cancelled: AtomicBool,
    resources: Mutex<Option<Arc<GenerationResources>>>,
}

impl SlotSignal {
    fn new() -> Self {
        Self {
            request_id: AtomicU64::new(NO_REQUEST),
            processing: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            resources: Mutex::new(None),
        }
    }

    fn bind(&self, request_id: RequestId, resources: Arc<GenerationResources>) {
        *self.resources.lock().unwrap_or_else(|e| e.into_inner()) = Some(resources);
        self.cancelled.store(false, Ordering::SeqCst);
        self.processing.store(true, Ordering::SeqCst);
        self.request_id.store(request_id, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.request_id.store(NO_REQUEST, Ordering::SeqCst);
        self.processing.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        *self.resources.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn resources(&self) -> Option<Arc<GenerationResources>> {
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct Shared {
    tasks: Mutex<TaskState>,
    cv: Condvar,
    next_request_id: AtomicU64,
    abort_inference: Arc<AtomicBool>,
    signals: Vec<SlotSignal>,
}

pub struct Processor {
    model: Arc<dyn Model>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Processor {
    /// Take ownership of the context and start the worker thread.
    pub fn new(model: Arc<dyn Model>, mut context: Box<dyn Context>, config: ProcessorConfig) -> Self {
        let n_slots = config.n_slots.max(1);
        let shared = Arc::new(Shared {
            tasks: Mutex::new(TaskState {
                queue: VecDeque::new(),
                should_exit: false,
            }),
            cv: Condvar::new(),
            next_request_id: AtomicU64::new(1),
            abort_inference: Arc::new(AtomicBool::new(false)),
            signals: (0..n_slots).map(|_| SlotSignal::new()).collect(),
        });

        context.set_abort_flag(Arc::clone(&shared.abort_inference));

        let worker_model = Arc::clone(&model);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || {
                Worker::new(worker_model, context, config, worker_shared).run();
            })
            .expect("spawn inference worker thread");

        Self {
            model,
            shared,
            worker: Some(worker),
        }
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    /// Tokenize the prompt and queue it. Admission failures surface as an
    /// immediately finalized readback buffer; the returned id is valid
    /// either way.
    pub fn submit(&self, prompt: &str, args: InferenceArgs) -> RequestId {
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);

        let prompt_tokens = match self.model.tokenize(prompt, args.add_special_bos, true) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => {
                debug!(request = id, "empty prompt after tokenization");
                args.resources
                    .readback()
                    .finish(StatusPayload::rejected(id, FinishReason::TokenEncode).to_json());
                return id;
            }
            Err(err) => {
                warn!(request = id, %err, "prompt tokenization failed");
                args.resources
                    .readback()
                    .finish(StatusPayload::rejected(id, FinishReason::TokenEncode).to_json());
                return id;
            }
        };

        {
            let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.queue.push_back(Request {
                id,
                prompt_tokens,
                args,
            });
        }
        self.shared.cv.notify_one();
        id
    }

    /// Cancel a queued or in-flight request. Returns true when something
    /// was actually cancelled; repeated calls return false.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let mut found = false;

        // Filter the pending queue first.
        let removed: Vec<Request> = {
            let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            let drained: Vec<Request> = tasks.queue.drain(..).collect();
            let mut removed = Vec::new();
            for request in drained {
                if request.id == request_id {
                    removed.push(request);
                } else {
                    tasks.queue.push_back(request);
                }
            }
            removed
        };
        for request in removed {
            request
                .args
                .resources
                .readback()
                .finish(StatusPayload::rejected(request_id, FinishReason::Aborted).to_json());
            found = true;
        }

        // Then any slot the request is bound to. Unbinding the signal here
        // is what makes a second cancel return false; the worker reaps the
        // slot itself at its next admission sweep.
        for signal in &self.shared.signals {
            if signal
                .request_id
                .compare_exchange(request_id, NO_REQUEST, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                signal.cancelled.store(true, Ordering::SeqCst);
                if let Some(resources) = signal.resources() {
                    resources
                        .readback()
                        .finish(StatusPayload::rejected(request_id, FinishReason::Aborted).to_json());
                }
                found = true;
            }
        }

        if !found {
            return false;
        }
        debug!(request = request_id, "request cancelled");

        // With nothing left to work on, break out of a blocking decode.
        let queue_empty = {
            let tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.queue.is_empty()
        };
        let all_idle = self.shared.signals.iter().all(|s| {
            !s.processing.load(Ordering::SeqCst) || s.cancelled.load(Ordering::SeqCst)
        });
        if queue_empty && all_idle {
            self.shared.abort_inference.store(true, Ordering::SeqCst);
        }

        true
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        {
            let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.should_exit = true;
        }
        self.shared.cv.notify_all();
        self.shared.abort_inference.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ─── Worker ───────────────────────────────────────────────────────────────

struct Worker {
    model: Arc<dyn Model>,
    ctx: Box<dyn Context>,
    config: ProcessorConfig,
    shared: Arc<Shared>,
    slots: Vec<Slot>,
    batch: Batch,
    job_counter: u64,
}

impl Worker {
    fn new(
        model: Arc<dyn Model>,
        ctx: Box<dyn Context>,
        config: ProcessorConfig,
        shared: Arc<Shared>,
    ) -> Self {
        let n_slots = config.n_slots.max(1);
        let mut job_counter = 0;
        let slots = (0..n_slots as u32)
            .map(|slot_id| {
                job_counter += 1;
                Slot::new(slot_id, job_counter)
            })
            .collect();
        let batch = Batch::new(ctx.n_batch().max(1));

        Self {
            model,
            ctx,
            config,
            shared,
            slots,
            batch,
            job_counter,
        }
    }

    fn run(&mut self) {
        debug!(slots = self.slots.len(), "inference worker started");
        loop {
            if self.should_exit() {
                break;
            }
            self.process_tasks();
            self.update_batch();
            self.run_decode();
            self.maybe_defrag();
            self.idle_wait();
        }
        self.drain_queue_on_exit();
        debug!("inference worker stopped");
    }

    fn should_exit(&self) -> bool {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .should_exit
    }

    /// Reap cancelled slots, then admit at most one pending request into
    /// the best idle slot.
    fn process_tasks(&mut self) {
        for index in 0..self.slots.len() {
            let cancelled = self.shared.signals[index].cancelled.load(Ordering::SeqCst);
            if cancelled && self.slots[index].is_processing() {
                self.job_counter += 1;
                let job = self.job_counter;
                let slot = &mut self.slots[index];
                debug!(slot = index, request = ?slot.request_id, "reaping cancelled slot");
                slot.mark_finished();
                // The cancel path already finalized the buffer; this is a
                // no-op unless the cancel raced the binding.
                if let Some(resources) = slot.resources() {
                    resources
                        .readback()
                        .finish(slot.status(FinishReason::Aborted).to_json());
                }
                slot.release(job);
                self.shared.signals[index].clear();
            }
        }

        if !self.slots.iter().any(|s| s.state == SlotState::Idle) {
            return;
        }

        let request = {
            let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.queue.pop_front()
        };
        let Some(request) = request else {
            return;
        };

        let limit = effective_ctx_limit(request.args.max_slot_n_ctx, self.ctx.n_ctx());
        if request.prompt_tokens.len() + request.args.max_tokens > limit {
            debug!(
                request = request.id,
                prompt = request.prompt_tokens.len(),
                max_tokens = request.args.max_tokens,
                limit,
                "request exceeds context, rejecting"
            );
            request
                .args
                .resources
                .readback()
                .finish(StatusPayload::rejected(request.id, FinishReason::CtxExceeded).to_json());
            return;
        }

        // Best slot: longest retained prefix, oldest job index breaking
        // ties. No prefix at all falls back to the oldest idle slot.
        let mut best: Option<usize> = None;
        let mut best_lcp = 0usize;
        let mut oldest: Option<usize> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.state != SlotState::Idle {
                continue;
            }
            if oldest.is_none_or(|o| slot.job_index < self.slots[o].job_index) {
                oldest = Some(index);
            }
            let lcp = longest_common_prefix(&request.prompt_tokens, &slot.prompt_tokens);
            let better = lcp > best_lcp
                || (lcp == best_lcp
                    && best.is_none_or(|b| slot.job_index < self.slots[b].job_index));
            if better {
                best_lcp = lcp;
                best = Some(index);
            }
        }
        if best_lcp == 0 {
            best = oldest;
        }
        let Some(index) = best else {
            return;
        };

        if let Some(reason) = self.bind_request(index, best_lcp, request) {
            self.finalize_slot(index, reason);
        }
    }

    /// Bind the request to the chosen slot, reusing any KV prefix.
    /// Returns a finish reason when an install-time rule already ended
    /// the generation (a zero-token budget, for instance).
    fn bind_request(&mut self, index: usize, lcp: usize, request: Request) -> Option<FinishReason> {
        let Self {
            slots,
            ctx,
            shared,
            model,
            ..
        } = self;
        let slot = &mut slots[index];
        let Request {
            id,
            prompt_tokens,
            args,
        } = request;

        debug!(
            slot = index,
            request = id,
            prompt = prompt_tokens.len(),
            reused_prefix = lcp,
            "admitting request"
        );

        slot.mark_started();
        if lcp > 0 {
            if lcp == prompt_tokens.len() {
                // The whole prompt is already in the KV; re-decode its
                // final token so there is a logit row to sample from.
                let cut = (lcp - 1) as Pos;
                ctx.seq_remove(slot.slot_id, cut);
                slot.n_past = cut;
                slot.state = SlotState::Generating;
            } else {
                ctx.seq_remove(slot.slot_id, lcp as Pos);
                slot.n_past = lcp as Pos;
                slot.state = SlotState::Prompt;
            }
            slot.prompt_tokens_processed = lcp;
            slot.last_token = prompt_tokens[lcp - 1];
        } else {
            ctx.seq_remove(slot.slot_id, 0);
            slot.n_past = 0;
            slot.prompt_tokens_processed = 0;
            slot.state = SlotState::Prompt;
            slot.last_token = 0;
        }

        slot.prompt_tokens = prompt_tokens;
        slot.request_id = Some(id);
        slot.tokens_generated = 0;
        slot.generated_text.clear();
        slot.stop_matched.clear();
        slot.detokenizer.reset();
        slot.i_batch = None;
        slot.n_ctx_max = effective_ctx_limit(args.max_slot_n_ctx, ctx.n_ctx());
        slot.sequence_stream
            .bind(&args.stop_patterns, &args.rewind_patterns);
        slot.presampler.reset(args.seed);
        slot.rules.reset();
        slot.constraint = None;

        let mut rule_set = vec![rules::max_tokens_rule(args.max_tokens)];
        if args.min_tokens > 0 && args.min_tokens < args.max_tokens {
            rule_set.push(rules::min_tokens_rule(args.min_tokens));
        }
        rule_set.extend(rules::stop_token_rules(&args.stop_tokens));

        shared.signals[index].bind(id, Arc::clone(&args.resources));
        slot.args = Some(args);

        let (_, install_effects) = slot.rules.add_rules(rule_set, 0);
        let pending = apply_rule_effects(model.as_ref(), slot, install_effects);

        slot.snapshot = SlotSnapshot::capture(slot, ctx.as_ref(), true);
        pending
    }

    /// Pack one batch: unprocessed prompt tokens first, then one token
    /// per generating slot.
    fn update_batch(&mut self) {
        let Self {
            slots, batch, ctx, ..
        } = self;

        batch.clear();
        for slot in slots.iter_mut() {
            slot.i_batch = None;
        }

        for slot in slots.iter_mut().filter(|s| s.is_prompt()) {
            while slot.prompt_tokens_processed < slot.prompt_tokens.len() && !batch.is_full() {
                let token = slot.prompt_tokens[slot.prompt_tokens_processed];
                let is_last = slot.prompt_tokens_processed + 1 == slot.prompt_tokens.len();
                if is_last {
                    // Snapshot just before the final prompt row so a
                    // rewind re-decodes that token and gets fresh logits.
                    slot.last_token = token;
                    slot.snapshot = SlotSnapshot::capture(slot, ctx.as_ref(), true);
                }
                let row = batch.push(token, slot.n_past, slot.slot_id, is_last);
                slot.i_batch = Some(row);
                slot.n_past += 1;
                slot.prompt_tokens_processed += 1;
            }
            if slot.prompt_tokens_processed == slot.prompt_tokens.len() {
                slot.state = SlotState::Generating;
            }
        }

        for slot in slots
            .iter_mut()
            .filter(|s| s.is_generating() && s.i_batch.is_none())
        {
            if batch.is_full() {
                break;
            }
            let row = batch.push(slot.last_token, slot.n_past, slot.slot_id, true);
            slot.i_batch = Some(row);
            slot.n_past += 1;
        }
    }

    fn run_decode(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        loop {
            match self.ctx.decode(&self.batch) {
                Ok(()) => break,
                Err(DecodeError::Aborted) => {
                    trace!("decode aborted, retrying");
                    if self.should_exit() {
                        return;
                    }
                    thread::sleep(DECODE_RETRY_PAUSE);
                }
                Err(DecodeError::Failed(code)) => {
                    warn!(code, "batch decode failed");
                    let affected: Vec<usize> = self
                        .slots
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| s.i_batch.is_some() && s.is_processing())
                        .map(|(i, _)| i)
                        .collect();
                    for index in affected {
                        self.finalize_slot(index, FinishReason::BatchDecode);
                        // The KV state of this sequence is unknown now;
                        // drop it and the retained prefix so the next
                        // request starts from scratch.
                        let seq = self.slots[index].slot_id;
                        self.slots[index].prompt_tokens.clear();
                        self.ctx.seq_remove(seq, 0);
                    }
                    return;
                }
            }
        }

        let mut finished: Vec<(usize, FinishReason)> = Vec::new();
        {
            let Self {
                slots, ctx, model, ..
            } = self;
            let eot = model.eot();

            for (index, slot) in slots.iter_mut().enumerate() {
                if !slot.is_generating() {
                    continue;
                }
                let Some(row) = slot.i_batch.take() else {
                    continue;
                };
                slot.mark_prompt_done();

                let logits = ctx.logits(row);
                let Some(resources) = slot.resources().map(Arc::clone) else {
                    continue;
                };
                let outcome = {
                    let constraint: Option<&mut dyn SamplerChain> = match &mut slot.constraint {
                        Some(c) => Some(&mut **c),
                        None => None,
                    };
                    let presampler = slot.presampler.chain_mut();
                    resources
                        .with_sampler(|main| sample_multistage(&logits, eot, constraint, presampler, main))
                };
                let token = outcome.token();
                slot.last_token = token;

                if let Some(reason) = process_token(model.as_ref(), ctx.as_mut(), slot, token) {
                    finished.push((index, reason));
                }
            }
        }
        for (index, reason) in finished {
            self.finalize_slot(index, reason);
        }
    }

    fn finalize_slot(&mut self, index: usize, reason: FinishReason) {
        self.job_counter += 1;
        let job = self.job_counter;
        let slot = &mut self.slots[index];
        slot.mark_finished();
        let status = slot.status(reason);
        if let Some(resources) = slot.resources() {
            resources.readback().finish(status.to_json());
        }
        debug!(
            slot = index,
            request = ?slot.request_id,
            reason = ?reason,
            generated = slot.tokens_generated,
            "request finished"
        );
        slot.release(job);
        self.shared.signals[index].clear();
    }

    fn maybe_defrag(&mut self) {
        if !self.config.enable_defrag {
            return;
        }
        let active = self.slots.iter().any(|s| s.is_processing());
        let threshold = if active {
            self.config.defrag_active_threshold
        } else {
            self.config.defrag_idle_threshold
        };
        let used = self.ctx.kv_used_cells() as f32;
        if used > threshold * self.ctx.n_ctx() as f32 {
            trace!(used, "requesting KV defragment");
            self.ctx.defrag();
        }
    }

    /// Block on the task condvar only when every slot is idle; a busy
    /// worker spins through the loop instead.
    fn idle_wait(&mut self) {
        if self.slots.iter().any(|s| s.is_processing()) {
            return;
        }
        let tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let _unused = self
            .shared
            .cv
            .wait_while(tasks, |t| t.queue.is_empty() && !t.should_exit)
            .unwrap_or_else(|e| e.into_inner());
    }

    fn drain_queue_on_exit(&mut self) {
        let drained: Vec<Request> = {
            let mut tasks = self.shared.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.queue.drain(..).collect()
        };
        for request in drained {
            request
                .args
                .resources
                .readback()
                .finish(StatusPayload::rejected(request.id, FinishReason::Aborted).to_json());
        }
    }
}

// ─── Per-token pipeline ───────────────────────────────────────────────────

/// Feed one sampled token through detokenizer, sequence stream and rule
/// engine; emit committed text; handle rewinds. Returns the finish
/// reason once the slot is done.
fn process_token(
    model: &dyn Model,
    ctx: &mut dyn Context,
    slot: &mut Slot,
    token: TokenId,
) -> Option<FinishReason> {
    let piece = slot.detokenizer.process_token(model, token, true);
    slot.tokens_generated += 1;

    let is_eog = model.is_eog(token);
    let mut finish: Option<FinishReason> = is_eog.then_some(FinishReason::StopToken);

    if let Some(pos) = ctx.seq_pos_max(slot.slot_id) {
        if pos as usize >= slot.n_ctx_max || pos as usize >= ctx.n_ctx() {
            finish = Some(FinishReason::CtxExceeded);
        }
    }

    let seq_ctx = if piece.is_empty() {
        SequenceContext::quiet()
    } else {
        slot.sequence_stream.append(&piece)
    };

    let effects = slot
        .rules
        .dispatch(token, &seq_ctx, slot.tokens_generated);
    if let Some(reason) = apply_rule_effects(model, slot, effects) {
        finish.get_or_insert(reason);
    }

    match seq_ctx.status {
        SequenceStatus::Accept => {
            if !seq_ctx.sequence.is_empty() && !is_eog {
                slot.generated_text.push_str(&seq_ctx.sequence);
                if let Some(resources) = slot.resources() {
                    resources.readback().write(&seq_ctx.sequence, token);
                }
            }
            slot.presampler.clear_rewind_bans(model);
            let min_reached = slot
                .args
                .as_ref()
                .is_some_and(|a| a.min_tokens > 0 && slot.tokens_generated >= a.min_tokens);
            if min_reached {
                slot.presampler.clear_eos_bans(model);
            }
            slot.snapshot = SlotSnapshot::capture(slot, ctx, false);
        }
        SequenceStatus::Rewind => {
            let cut = slot.rewind_to_snapshot();
            ctx.seq_remove(slot.slot_id, cut);
            trace!(
                slot = slot.slot_id,
                cut,
                discarded = %seq_ctx.sequence,
                "rewinding banned fragment"
            );
            match model.tokenize(&seq_ctx.sequence, false, false) {
                Ok(tokens) if !tokens.is_empty() => {
                    slot.presampler.add_rewind_bans(model, &tokens);
                }
                _ => {
                    // Tokenizing the fragment failed; ban at least the
                    // token that completed the match so sampling moves on.
                    warn!(slot = slot.slot_id, "rewind fragment failed to tokenize");
                    slot.presampler.add_rewind_bans(model, &[token]);
                }
            }
        }
        SequenceStatus::Stop => {
            finish = Some(FinishReason::StopString);
            slot.stop_matched = seq_ctx.matched.clone();
        }
        SequenceStatus::Buffer | SequenceStatus::Rule => {}
    }

    let reason = finish?;

    // Final fragment: the text before a stop match, plus whatever bytes
    // the detokenizer still holds.
    let mut tail = String::new();
    if seq_ctx.status == SequenceStatus::Stop {
        tail.push_str(&seq_ctx.unmatched_prefix);
    }
    tail.push_str(&slot.detokenizer.flush());
    if !tail.is_empty() && !is_eog {
        slot.generated_text.push_str(&tail);
        if let Some(resources) = slot.resources() {
            resources.readback().write(&tail, token);
        }
    }

    Some(reason)
}

fn apply_rule_effects(
    model: &dyn Model,
    slot: &mut Slot,
    effects: Vec<RuleEffect>,
) -> Option<FinishReason> {
    let mut finish = None;
    for effect in effects {
        match effect {
            RuleEffect::ApplyGrammar(grammar) => {
                slot.constraint = Some(model.sampler(&[SamplerStage::LarkGrammar { grammar }]));
            }
            RuleEffect::RemoveGrammar => {
                slot.constraint = None;
            }
            RuleEffect::BanStopTokens => {
                let bans = [model.eos(), model.eot()];
                slot.presampler.add_eos_bans(model, &bans);
            }
            RuleEffect::UnbanStopTokens => {
                slot.presampler.clear_eos_bans(model);
            }
            RuleEffect::EndGeneration(reason) => {
                if finish.is_none() {
                    finish = Some(reason);
                }
            }
        }
    }
    finish
}

fn effective_ctx_limit(max_slot_n_ctx: usize, n_ctx: usize) -> usize {
    if max_slot_n_ctx == 0 {
        n_ctx
    } else {
        max_slot_n_ctx.min(n_ctx)
    }
}

fn longest_common_prefix(a: &[TokenId], b: &[TokenId]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
