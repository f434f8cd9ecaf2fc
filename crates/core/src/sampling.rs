//! Sampler-chain vocabulary and the multistage sampling step.
//!
//! The actual sampler implementations live behind the engine; this module
//! carries the closed set of chain stages the engine knows how to build,
//! the candidate array samplers operate on, and the fixed application
//! order used per sampled token: constraint chain, then per-slot
//! presampler, then the caller's chain.

use crate::engine::TokenId;

/// Constructors of the engine's sampler chain, one variant per native
/// initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerStage {
    Greedy,
    Dist {
        seed: u32,
    },
    Temp(f32),
    TempExt {
        temp: f32,
        dynatemp_range: f32,
        dynatemp_exponent: f32,
    },
    TopK(i32),
    TopP {
        p: f32,
        min_keep: usize,
    },
    MinP {
        p: f32,
        min_keep: usize,
    },
    Typical {
        p: f32,
        min_keep: usize,
    },
    MirostatV1 {
        seed: u32,
        tau: f32,
        eta: f32,
        m: i32,
    },
    MirostatV2 {
        seed: u32,
        tau: f32,
        eta: f32,
    },
    Xtc {
        probability: f32,
        threshold: f32,
        min_keep: usize,
        seed: u32,
    },
    Penalties {
        last_n: i32,
        repeat: f32,
        freq: f32,
        present: f32,
    },
    Dry {
        multiplier: f32,
        base: f32,
        allowed_length: i32,
        last_n: i32,
        sequence_breakers: Vec<String>,
    },
    LogitBias(Vec<(TokenId, f32)>),
    /// GBNF grammar constraint rooted at `root`.
    Grammar {
        grammar: String,
        root: String,
    },
    /// Lark grammar constraint via the guidance backend.
    LarkGrammar {
        grammar: String,
    },
    TopNSigma(f32),
    Infill,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: TokenId,
    pub logit: f32,
    pub p: f32,
}

/// Candidate array a sampler chain filters and selects from, built fresh
/// from one logits row per sampling step.
#[derive(Debug, Clone)]
pub struct TokenCandidates {
    pub data: Vec<TokenData>,
    pub selected: Option<usize>,
}

impl TokenCandidates {
    pub fn from_logits(logits: &[f32]) -> Self {
        let data = logits
            .iter()
            .enumerate()
            .map(|(id, &logit)| TokenData {
                id: id as TokenId,
                logit,
                p: 0.0,
            })
            .collect();
        Self {
            data,
            selected: None,
        }
    }

    /// True while at least one candidate keeps a finite logit. A
    /// constraint sampler may push every candidate to `-inf`.
    pub fn any_viable(&self) -> bool {
        self.data.iter().any(|d| d.logit.is_finite())
    }

    pub fn selected_token(&self) -> Option<TokenId> {
        self.selected.map(|i| self.data[i].id)
    }

    /// Highest-logit candidate, ignoring the selection marker.
    pub fn argmax(&self) -> Option<TokenId> {
        self.data
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.logit.total_cmp(&b.logit))
            .map(|(_, d)| d.id)
    }
}

/// A built sampler chain. `apply` filters, reweights or selects from the
/// candidates; `accept` feeds the committed token back into stateful
/// stages (penalties, grammar).
pub trait SamplerChain: Send {
    fn apply(&mut self, candidates: &mut TokenCandidates);

    fn accept(&mut self, token: TokenId);

    fn reset(&mut self) {}
}

/// Result of one multistage sampling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    Token(TokenId),
    /// The constraint stage left no viable candidate; EOT was substituted
    /// and the slot should end its generation.
    Exhausted(TokenId),
}

impl SampleOutcome {
    pub fn token(self) -> TokenId {
        match self {
            Self::Token(t) | Self::Exhausted(t) => t,
        }
    }
}

/// Sample one token from a logits row.
///
/// Order is fixed: the constraint chain is mandatory and runs first, the
/// presampler narrows the survivors, and only then does the caller's
/// chain pick. When the constraint leaves nothing viable, EOT is
/// substituted and accepted everywhere so grammar state stays coherent.
pub fn sample_multistage(
    logits: &[f32],
    eot: TokenId,
    mut constraint: Option<&mut dyn SamplerChain>,
    mut presampler: Option<&mut dyn SamplerChain>,
    main: &mut dyn SamplerChain,
) -> SampleOutcome {
    let mut candidates = TokenCandidates::from_logits(logits);

    if let Some(chain) = constraint.as_deref_mut() {
        chain.apply(&mut candidates);
    }
    if let Some(chain) = presampler.as_deref_mut() {
        chain.apply(&mut candidates);
    }

    if !candidates.any_viable() {
        if let Some(chain) = constraint.as_deref_mut() {
            chain.accept(eot);
        }
        if let Some(chain) = presampler.as_deref_mut() {
            chain.accept(eot);
        }
        main.accept(eot);
        return SampleOutcome::Exhausted(eot);
    }

    main.apply(&mut candidates);

    let token = candidates
        .selected_token()
        .or_else(|| candidates.argmax())
        .unwrap_or(eot);

    if let Some(chain) = constraint.as_deref_mut() {
        chain.accept(token);
    }
    if let Some(chain) = presampler.as_deref_mut() {
        chain.accept(token);
    }
    main.accept(token);

    SampleOutcome::Token(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Picks the highest-logit candidate.
    struct Greedy;

    impl SamplerChain for Greedy {
        fn apply(&mut self, candidates: &mut TokenCandidates) {
            candidates.selected = candidates
                .data
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.logit.total_cmp(&b.logit))
                .map(|(i, _)| i);
        }

        fn accept(&mut self, _token: TokenId) {}
    }

    /// Forces the listed tokens to `-inf`.
    struct Forbid(Vec<TokenId>);

    impl SamplerChain for Forbid {
        fn apply(&mut self, candidates: &mut TokenCandidates) {
            for d in &mut candidates.data {
                if self.0.contains(&d.id) {
                    d.logit = f32::NEG_INFINITY;
                }
            }
        }

        fn accept(&mut self, _token: TokenId) {}
    }

    struct AcceptLog(Vec<TokenId>);

    impl SamplerChain for AcceptLog {
        fn apply(&mut self, _candidates: &mut TokenCandidates) {}

        fn accept(&mut self, token: TokenId) {
            self.0.push(token);
        }
    }

    #[test]
    fn candidates_from_logits() {
        let c = TokenCandidates::from_logits(&[0.5, -1.0, 2.0]);
        assert_eq!(c.data.len(), 3);
        assert_eq!(c.data[2].id, 2);
        assert_eq!(c.argmax(), Some(2));
        assert!(c.selected_token().is_none());
    }

    #[test]
    fn greedy_sample_picks_argmax() {
        let mut main = Greedy;
        let out = sample_multistage(&[0.0, 3.0, 1.0], 99, None, None, &mut main);
        assert_eq!(out, SampleOutcome::Token(1));
    }

    #[test]
    fn presampler_ban_redirects_choice() {
        let mut main = Greedy;
        let mut pre = Forbid(vec![1]);
        let out = sample_multistage(&[0.0, 3.0, 1.0], 99, None, Some(&mut pre), &mut main);
        assert_eq!(out, SampleOutcome::Token(2));
    }

    #[test]
    fn exhausted_constraint_substitutes_eot() {
        let mut main = AcceptLog(Vec::new());
        let mut constraint = Forbid(vec![0, 1, 2]);
        let out = sample_multistage(
            &[0.0, 3.0, 1.0],
            42,
            Some(&mut constraint),
            None,
            &mut main,
        );
        assert_eq!(out, SampleOutcome::Exhausted(42));
        assert_eq!(main.0, vec![42]);
    }

    #[test]
    fn selected_token_accepted_on_every_chain() {
        let mut main = Greedy;
        let mut log = AcceptLog(Vec::new());
        let out = sample_multistage(&[1.0, 0.0], 9, Some(&mut log), None, &mut main);
        assert_eq!(out, SampleOutcome::Token(0));
        assert_eq!(log.0, vec![0]);
    }

    #[test]
    fn chain_without_selector_falls_back_to_argmax() {
        let mut main = AcceptLog(Vec::new());
        let out = sample_multistage(&[0.25, 0.75], 9, None, None, &mut main);
        assert_eq!(out, SampleOutcome::Token(1));
    }
}
