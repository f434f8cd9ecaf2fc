//! Per-slot token bans enforced ahead of the caller's sampler chain.
//!
//! Two disjoint ban sets: rewind bans (tokens of a discarded fragment)
//! and EOS bans (terminal tokens while a minimum-length rule is active).
//! Any change rebuilds a small throwaway chain of
//! `[logit_bias(bans), dist(seed)]` so the caller's chain is never
//! mutated.

use ahash::AHashSet;

use crate::engine::{Model, TokenId};
use crate::sampling::{SamplerChain, SamplerStage};

/// Bias applied to banned tokens. Aggressively negative rather than
/// `-inf`: a grammar constraint may leave only banned candidates, and
/// those must remain sampleable as a fallback.
pub const BAN_BIAS: f32 = -50_000.0;

pub struct Presampler {
    rewind_bans: AHashSet<TokenId>,
    eos_bans: AHashSet<TokenId>,
    chain: Option<Box<dyn SamplerChain>>,
    seed: u32,
}

impl Presampler {
    pub fn new(seed: u32) -> Self {
        Self {
            rewind_bans: AHashSet::new(),
            eos_bans: AHashSet::new(),
            chain: None,
            seed,
        }
    }

    /// Drop all bans and rebind the seed for the next request.
    pub fn reset(&mut self, seed: u32) {
        self.rewind_bans.clear();
        self.eos_bans.clear();
        self.chain = None;
        self.seed = seed;
    }

    pub fn is_active(&self) -> bool {
        self.chain.is_some()
    }

    pub fn chain_mut(&mut self) -> Option<&mut (dyn SamplerChain + '_)> {
        match &mut self.chain {
            Some(chain) => Some(&mut **chain),
            None => None,
        }
    }

    /// Ban the tokens of a discarded fragment. Returns how many were not
    /// already banned.
    pub fn add_rewind_bans(&mut self, model: &dyn Model, tokens: &[TokenId]) -> usize {
        let before = self.rewind_bans.len();
        self.rewind_bans.extend(tokens.iter().copied());
        let added = self.rewind_bans.len() - before;
        if added > 0 {
            self.rebuild(model);
        }
        added
    }

    pub fn add_eos_bans(&mut self, model: &dyn Model, tokens: &[TokenId]) {
        let before = self.eos_bans.len();
        self.eos_bans.extend(tokens.iter().copied());
        if self.eos_bans.len() != before {
            self.rebuild(model);
        }
    }

    pub fn clear_rewind_bans(&mut self, model: &dyn Model) {
        if self.rewind_bans.is_empty() {
            return;
        }
        self.rewind_bans.clear();
        self.rebuild(model);
    }

    pub fn clear_eos_bans(&mut self, model: &dyn Model) {
        if self.eos_bans.is_empty() {
            return;
        }
        self.eos_bans.clear();
        self.rebuild(model);
    }

    fn rebuild(&mut self, model: &dyn Model) {
        let mut biases: Vec<(TokenId, f32)> = Vec::with_capacity(
            self.rewind_bans.len() + self.eos_bans.len(),
        );
        biases.extend(self.rewind_bans.iter().map(|&t| (t, BAN_BIAS)));
        biases.extend(self.eos_bans.iter().map(|&t| (t, BAN_BIAS)));

        self.chain = if biases.is_empty() {
            None
        } else {
            Some(model.sampler(&[
                SamplerStage::LogitBias(biases),
                SamplerStage::Dist { seed: self.seed },
            ]))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockModel;

    #[test]
    fn fresh_presampler_is_inactive() {
        let mut p = Presampler::new(7);
        assert!(!p.is_active());
        assert!(p.chain_mut().is_none());
    }

    #[test]
    fn rewind_bans_activate_and_count_new_tokens() {
        let model = MockModel::new();
        let mut p = Presampler::new(7);

        assert_eq!(p.add_rewind_bans(&model, &[1, 2]), 2);
        assert!(p.is_active());
        // Re-banning the same tokens adds nothing.
        assert_eq!(p.add_rewind_bans(&model, &[1, 2]), 0);
        assert_eq!(p.add_rewind_bans(&model, &[2, 3]), 1);
    }

    #[test]
    fn clearing_last_ban_set_deactivates() {
        let model = MockModel::new();
        let mut p = Presampler::new(7);
        p.add_rewind_bans(&model, &[5]);
        p.add_eos_bans(&model, &[9]);

        p.clear_rewind_bans(&model);
        assert!(p.is_active());
        p.clear_eos_bans(&model);
        assert!(!p.is_active());
    }

    #[test]
    fn ban_sets_are_independent() {
        let model = MockModel::new();
        let mut p = Presampler::new(7);
        p.add_rewind_bans(&model, &[5]);
        p.add_eos_bans(&model, &[5]);

        // Same token in both sets; clearing one keeps the other's ban.
        p.clear_rewind_bans(&model);
        assert!(p.is_active());

        let mut candidates = crate::sampling::TokenCandidates::from_logits(&[0.0; 10]);
        p.chain_mut().unwrap().apply(&mut candidates);
        assert!(candidates.data[5].logit <= BAN_BIAS);
    }

    #[test]
    fn banned_tokens_receive_bias() {
        let model = MockModel::new();
        let mut p = Presampler::new(7);
        p.add_rewind_bans(&model, &[0, 3]);

        let mut candidates = crate::sampling::TokenCandidates::from_logits(&[1.0, 1.0, 1.0, 1.0]);
        p.chain_mut().unwrap().apply(&mut candidates);
        assert!(candidates.data[0].logit < -1_000.0);
        assert_eq!(candidates.data[1].logit, 1.0);
        assert!(candidates.data[3].logit < -1_000.0);
    }

    #[test]
    fn reset_drops_everything() {
        let model = MockModel::new();
        let mut p = Presampler::new(7);
        p.add_rewind_bans(&model, &[1]);
        p.reset(13);
        assert!(!p.is_active());
        assert_eq!(p.add_rewind_bans(&model, &[1]), 1);
    }
}
