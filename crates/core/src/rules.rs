//! Trigger/action rules layered over the sampling loop.
//!
//! A rule is `(start_trigger, end_trigger, actions)` with a three-state
//! lifecycle. Both trigger and action sets are closed sums; dispatch is a
//! two-deep match, no virtual anything. Actions never touch the slot
//! directly: they emit [`RuleEffect`]s the processor applies, which
//! keeps the borrow structure flat.

use crate::engine::TokenId;
use crate::request::FinishReason;
use crate::sequence_stream::SequenceContext;
use crate::trie::MatchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Inactive,
    Active,
    Completed,
}

/// Per-token evaluation context. Rules installed at admission are ticked
/// once without one, which lets `Always`/`OnTokenCount` style triggers
/// fire before the first sample.
pub struct RuleContext<'a> {
    pub token: TokenId,
    pub sequence: &'a SequenceContext,
}

pub enum Trigger {
    OnToken(TokenId),
    /// Fires once `tokens_generated` reaches the threshold.
    OnTokenCount(usize),
    /// Fires when any of the bound sequence ids matches. With `latch`
    /// set, refuses to re-fire until a non-buffering step resets it.
    OnSequences {
        ids: Vec<MatchId>,
        latch: bool,
        latched: bool,
    },
    Always,
    Never,
}

impl Trigger {
    pub fn on_sequences(ids: Vec<MatchId>, latch: bool) -> Self {
        Self::OnSequences {
            ids,
            latch,
            latched: false,
        }
    }

    fn should_activate(&mut self, tokens_generated: usize, ctx: Option<&RuleContext>) -> bool {
        match self {
            Self::OnToken(token) => ctx.is_some_and(|c| c.token == *token),
            Self::OnTokenCount(threshold) => tokens_generated >= *threshold,
            Self::OnSequences { ids, latch, latched } => {
                let Some(ctx) = ctx else { return false };
                let hit = !*latched
                    && ids.iter().any(|id| ctx.sequence.matched_ids.contains(id));
                if hit {
                    if *latch {
                        *latched = true;
                    }
                    true
                } else {
                    if ctx.sequence.matched_ids.is_empty() {
                        *latched = false;
                    }
                    false
                }
            }
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// What a completed or started action asks the processor to do.
#[derive(Debug, PartialEq, Eq)]
pub enum RuleEffect {
    ApplyGrammar(String),
    RemoveGrammar,
    BanStopTokens,
    UnbanStopTokens,
    EndGeneration(FinishReason),
}

pub type RecordCallback = Box<dyn FnMut(String) + Send>;

pub enum Action {
    /// Constrain sampling with a grammar while the rule is active.
    ApplyGrammar { grammar: String },
    /// Ban terminal tokens while the rule is active.
    BanStopTokens,
    /// Accumulate sequence text matching the status mask; hand the
    /// recording to the callback when the rule completes.
    RecordToCallback {
        callback: RecordCallback,
        status_mask: u8,
        buffer: String,
    },
    /// End the slot's generation with the given reason on completion.
    EndGeneration { reason: FinishReason },
}

impl Action {
    fn on_start(&mut self, effects: &mut Vec<RuleEffect>) {
        match self {
            Self::ApplyGrammar { grammar } => {
                effects.push(RuleEffect::ApplyGrammar(grammar.clone()));
            }
            Self::BanStopTokens => effects.push(RuleEffect::BanStopTokens),
            Self::RecordToCallback { .. } | Self::EndGeneration { .. } => {}
        }
    }

    fn on_running(&mut self, ctx: Option<&RuleContext>) {
        if let Self::RecordToCallback {
            status_mask,
            buffer,
            ..
        } = self
        {
            if let Some(ctx) = ctx {
                if ctx.sequence.status.bit() & *status_mask != 0 {
                    buffer.push_str(&ctx.sequence.piece);
                }
            }
        }
    }

    fn on_end(&mut self, ctx: Option<&RuleContext>, effects: &mut Vec<RuleEffect>) {
        match self {
            Self::ApplyGrammar { .. } => effects.push(RuleEffect::RemoveGrammar),
            Self::BanStopTokens => effects.push(RuleEffect::UnbanStopTokens),
            Self::RecordToCallback {
                callback,
                status_mask,
                buffer,
            } => {
                if let Some(ctx) = ctx {
                    if ctx.sequence.status.bit() & *status_mask != 0 {
                        buffer.push_str(&ctx.sequence.piece);
                    }
                }
                callback(std::mem::take(buffer));
            }
            Self::EndGeneration { reason } => {
                effects.push(RuleEffect::EndGeneration(*reason));
            }
        }
    }
}

pub struct Rule {
    start: Trigger,
    end: Trigger,
    actions: Vec<Action>,
    state: RuleState,
}

impl Rule {
    pub fn new(start: Trigger, end: Trigger, actions: Vec<Action>) -> Self {
        Self {
            start,
            end,
            actions,
            state: RuleState::Inactive,
        }
    }

    pub fn state(&self) -> RuleState {
        self.state
    }

    /// Advance the state machine one tick. Activation and completion may
    /// happen on the same tick, so a rule like `(OnTokenCount(n), Always)`
    /// fires its end actions exactly at token `n`.
    fn process(
        &mut self,
        tokens_generated: usize,
        ctx: Option<&RuleContext>,
        effects: &mut Vec<RuleEffect>,
    ) {
        let mut just_activated = false;

        if self.state == RuleState::Inactive
            && self.start.should_activate(tokens_generated, ctx)
        {
            self.state = RuleState::Active;
            just_activated = true;
            for action in &mut self.actions {
                action.on_start(effects);
            }
        }

        if self.state == RuleState::Active {
            if self.end.should_activate(tokens_generated, ctx) {
                self.state = RuleState::Completed;
                for action in &mut self.actions {
                    action.on_end(ctx, effects);
                }
            } else if !just_activated {
                for action in &mut self.actions {
                    action.on_running(ctx);
                }
            }
        }
    }
}

/// All rules bound to one slot, grouped by installation id.
#[derive(Default)]
pub struct RuleStream {
    groups: Vec<(u32, Vec<Rule>)>,
    next_id: u32,
}

impl RuleStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a rule group and run its install tick (no token context).
    /// Effects from triggers that fire immediately are returned so the
    /// caller can apply them before the first sample.
    pub fn add_rules(&mut self, mut rules: Vec<Rule>, tokens_generated: usize) -> (u32, Vec<RuleEffect>) {
        let id = self.next_id;
        self.next_id += 1;

        let mut effects = Vec::new();
        for rule in &mut rules {
            rule.process(tokens_generated, None, &mut effects);
        }
        self.groups.push((id, rules));
        (id, effects)
    }

    pub fn remove(&mut self, id: u32) {
        self.groups.retain(|(group_id, _)| *group_id != id);
    }

    pub fn reset(&mut self) {
        self.groups.clear();
        self.next_id = 0;
    }

    /// Run every rule against one sampled token.
    pub fn dispatch(
        &mut self,
        token: TokenId,
        sequence: &SequenceContext,
        tokens_generated: usize,
    ) -> Vec<RuleEffect> {
        let ctx = RuleContext { token, sequence };
        let mut effects = Vec::new();
        for (_, rules) in &mut self.groups {
            for rule in rules {
                rule.process(tokens_generated, Some(&ctx), &mut effects);
            }
        }
        effects
    }
}

// ─── Built-in compositions ────────────────────────────────────────────────

pub fn max_tokens_rule(max_tokens: usize) -> Rule {
    Rule::new(
        Trigger::OnTokenCount(max_tokens),
        Trigger::Always,
        vec![Action::EndGeneration {
            reason: FinishReason::MaxNewTokens,
        }],
    )
}

/// Terminal tokens stay banned until the threshold is reached.
pub fn min_tokens_rule(min_tokens: usize) -> Rule {
    Rule::new(
        Trigger::Always,
        Trigger::OnTokenCount(min_tokens),
        vec![Action::BanStopTokens],
    )
}

pub fn stop_token_rules(stop_tokens: &[TokenId]) -> Vec<Rule> {
    stop_tokens
        .iter()
        .map(|&token| {
            Rule::new(
                Trigger::OnToken(token),
                Trigger::Always,
                vec![Action::EndGeneration {
                    reason: FinishReason::StopToken,
                }],
            )
        })
        .collect()
}

/// Apply `grammar` from the moment `apply_token` is sampled until
/// `remove_token` is.
pub fn grammar_window_rule(grammar: String, apply_token: TokenId, remove_token: TokenId) -> Rule {
    Rule::new(
        Trigger::OnToken(apply_token),
        Trigger::OnToken(remove_token),
        vec![Action::ApplyGrammar { grammar }],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence_stream::{SequenceStatus, SequenceStream};
    use std::sync::{Arc, Mutex};

    fn accept_ctx(piece: &str) -> SequenceContext {
        let mut stream = SequenceStream::new();
        stream.bind::<&str>(&[], &[]);
        stream.append(piece)
    }

    #[test]
    fn max_tokens_completes_exactly_at_threshold() {
        let mut stream = RuleStream::new();
        let (_, install) = stream.add_rules(vec![max_tokens_rule(3)], 0);
        assert!(install.is_empty());

        let ctx = accept_ctx("x");
        assert!(stream.dispatch(1, &ctx, 1).is_empty());
        assert!(stream.dispatch(1, &ctx, 2).is_empty());
        let effects = stream.dispatch(1, &ctx, 3);
        assert_eq!(
            effects,
            vec![RuleEffect::EndGeneration(FinishReason::MaxNewTokens)]
        );
    }

    #[test]
    fn max_tokens_zero_fires_at_install() {
        let mut stream = RuleStream::new();
        let (_, install) = stream.add_rules(vec![max_tokens_rule(0)], 0);
        assert_eq!(
            install,
            vec![RuleEffect::EndGeneration(FinishReason::MaxNewTokens)]
        );
    }

    #[test]
    fn min_tokens_bans_at_install_and_unbans_at_threshold() {
        let mut stream = RuleStream::new();
        let (_, install) = stream.add_rules(vec![min_tokens_rule(2)], 0);
        assert_eq!(install, vec![RuleEffect::BanStopTokens]);

        let ctx = accept_ctx("x");
        assert!(stream.dispatch(1, &ctx, 1).is_empty());
        let effects = stream.dispatch(1, &ctx, 2);
        assert_eq!(effects, vec![RuleEffect::UnbanStopTokens]);
        // Completed rules stay quiet.
        assert!(stream.dispatch(1, &ctx, 3).is_empty());
    }

    #[test]
    fn stop_token_rule_ends_on_matching_token() {
        let mut stream = RuleStream::new();
        let (_, install) = stream.add_rules(stop_token_rules(&[42, 43]), 0);
        assert!(install.is_empty());

        let ctx = accept_ctx("x");
        assert!(stream.dispatch(7, &ctx, 1).is_empty());
        let effects = stream.dispatch(43, &ctx, 2);
        assert_eq!(
            effects,
            vec![RuleEffect::EndGeneration(FinishReason::StopToken)]
        );
    }

    #[test]
    fn grammar_window_applies_and_removes() {
        let mut stream = RuleStream::new();
        stream.add_rules(vec![grammar_window_rule("root: /x/".into(), 10, 11)], 0);

        let ctx = accept_ctx("x");
        let effects = stream.dispatch(10, &ctx, 1);
        assert_eq!(effects, vec![RuleEffect::ApplyGrammar("root: /x/".into())]);
        assert!(stream.dispatch(5, &ctx, 2).is_empty());
        let effects = stream.dispatch(11, &ctx, 3);
        assert_eq!(effects, vec![RuleEffect::RemoveGrammar]);
    }

    #[test]
    fn record_action_collects_accepted_text() {
        let recorded = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&recorded);

        let rule = Rule::new(
            Trigger::OnTokenCount(1),
            Trigger::OnToken(99),
            vec![Action::RecordToCallback {
                callback: Box::new(move |text| sink.lock().unwrap().push(text)),
                status_mask: SequenceStatus::Accept.bit(),
                buffer: String::new(),
            }],
        );

        let mut stream = RuleStream::new();
        stream.add_rules(vec![rule], 0);

        stream.dispatch(1, &accept_ctx("a"), 1); // activation tick, not recorded
        stream.dispatch(2, &accept_ctx("b"), 2);
        stream.dispatch(3, &accept_ctx("c"), 3);
        stream.dispatch(99, &accept_ctx("d"), 4);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.as_slice(), ["bcd"]);
    }

    #[test]
    fn on_sequences_trigger_fires_on_bound_id() {
        let mut seq = SequenceStream::new();
        seq.bind::<&str>(&[], &[]);
        let id = seq.bind_sequence(&["}"]);

        let rule = Rule::new(
            Trigger::on_sequences(vec![id], false),
            Trigger::Always,
            vec![Action::EndGeneration {
                reason: FinishReason::Unspecified,
            }],
        );
        let mut stream = RuleStream::new();
        stream.add_rules(vec![rule], 0);

        let quiet = seq.append("text");
        assert!(stream.dispatch(1, &quiet, 1).is_empty());

        let hit = seq.append("}");
        let effects = stream.dispatch(2, &hit, 2);
        assert_eq!(
            effects,
            vec![RuleEffect::EndGeneration(FinishReason::Unspecified)]
        );
    }

    #[test]
    fn removed_group_no_longer_dispatches() {
        let mut stream = RuleStream::new();
        let (id, _) = stream.add_rules(vec![max_tokens_rule(1)], 0);
        stream.remove(id);
        assert!(stream.dispatch(1, &accept_ctx("x"), 5).is_empty());
    }

    #[test]
    fn never_trigger_keeps_rule_inactive() {
        let mut rule = Rule::new(
            Trigger::Never,
            Trigger::Always,
            vec![Action::EndGeneration {
                reason: FinishReason::Unspecified,
            }],
        );
        let mut effects = Vec::new();
        rule.process(100, None, &mut effects);
        assert!(effects.is_empty());
        assert_eq!(rule.state(), RuleState::Inactive);
    }
}
