//! Stateful classification of the generated text stream.
//!
//! Wraps a [`MatchTrie`] and a rolling buffer; every appended fragment is
//! classified as committed output, held back, or a stop/rewind/rule
//! event. The buffer holds exactly the text that is neither committed nor
//! discarded yet.

use std::collections::BTreeSet;

use crate::trie::{MatchId, MatchTrie, TrieOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    /// Buffer content is committed output.
    Accept,
    /// A pattern may still complete; nothing is released.
    Buffer,
    /// A stop pattern completed; generation ends.
    Stop,
    /// A rewind pattern completed; the buffer must be un-generated.
    Rewind,
    /// Only rule-bound patterns matched; the stream continues.
    Rule,
}

impl SequenceStatus {
    /// Bit form, for the record-action status masks.
    pub fn bit(self) -> u8 {
        match self {
            Self::Accept => 1,
            Self::Buffer => 2,
            Self::Stop => 4,
            Self::Rewind => 8,
            Self::Rule => 16,
        }
    }
}

/// Everything downstream consumers need to know about one append.
#[derive(Debug, Clone)]
pub struct SequenceContext {
    pub status: SequenceStatus,
    /// The fragment that was appended this step.
    pub piece: String,
    /// Buffer content consumed by this step: the committed text on
    /// `Accept`, the discarded text on `Rewind`, the prefix up to the
    /// match end on `Rule`. Empty on `Buffer`.
    pub sequence: String,
    /// Text preceding a `Stop` match; the final fragment to emit.
    pub unmatched_prefix: String,
    /// The literal that matched, in its original casing.
    pub matched: String,
    pub matched_ids: BTreeSet<MatchId>,
}

impl SequenceContext {
    /// Context for a token whose piece was empty: nothing classified,
    /// nothing released.
    pub fn quiet() -> Self {
        Self {
            status: SequenceStatus::Buffer,
            piece: String::new(),
            sequence: String::new(),
            unmatched_prefix: String::new(),
            matched: String::new(),
            matched_ids: BTreeSet::new(),
        }
    }
}

pub struct SequenceStream {
    trie: MatchTrie,
    buffer: String,
    next_rule_id: u32,
}

impl Default for SequenceStream {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceStream {
    pub fn new() -> Self {
        Self {
            trie: MatchTrie::new(),
            buffer: String::new(),
            next_rule_id: 0,
        }
    }

    /// Install fresh stop and rewind pattern sets, discarding any buffered
    /// text and previously bound rule sequences.
    pub fn bind<S: AsRef<str>>(&mut self, stop: &[S], rewind: &[S]) {
        self.trie = MatchTrie::new();
        self.trie.add_patterns(stop, MatchId::Stop);
        self.trie.add_patterns(rewind, MatchId::Rewind);
        self.buffer.clear();
        self.next_rule_id = 0;
    }

    /// Bind patterns for a rule trigger, returning the fresh id the
    /// trigger should watch for.
    pub fn bind_sequence<S: AsRef<str>>(&mut self, patterns: &[S]) -> MatchId {
        let id = MatchId::Rule(self.next_rule_id);
        self.next_rule_id += 1;
        self.trie.add_patterns(patterns, id);
        id
    }

    pub fn unbind_sequence(&mut self, id: MatchId) {
        self.trie.remove_id(id);
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Restore a previously captured buffer (the rewind path).
    pub fn restore_buffer(&mut self, buffer: String) {
        self.buffer = buffer;
    }

    pub fn append(&mut self, piece: &str) -> SequenceContext {
        self.buffer.push_str(piece);

        let mut ctx = SequenceContext {
            status: SequenceStatus::Buffer,
            piece: piece.to_string(),
            sequence: String::new(),
            unmatched_prefix: String::new(),
            matched: String::new(),
            matched_ids: BTreeSet::new(),
        };

        match self.trie.check_buffer(&self.buffer) {
            TrieOutcome::None => {
                ctx.status = SequenceStatus::Accept;
                ctx.sequence = std::mem::take(&mut self.buffer);
            }
            TrieOutcome::Maybe => {}
            TrieOutcome::Matched(m) => {
                ctx.matched = self.buffer.get(m.start..m.end).unwrap_or_default().to_string();
                ctx.matched_ids = m.ids.clone();

                if m.ids.contains(&MatchId::Stop) {
                    ctx.status = SequenceStatus::Stop;
                    ctx.unmatched_prefix =
                        self.buffer.get(..m.start).unwrap_or_default().to_string();
                    self.buffer.clear();
                } else if m.ids.contains(&MatchId::Rewind) {
                    ctx.status = SequenceStatus::Rewind;
                    ctx.sequence = std::mem::take(&mut self.buffer);
                } else {
                    ctx.status = SequenceStatus::Rule;
                    ctx.sequence = self.buffer.get(..m.end).unwrap_or_default().to_string();
                    self.buffer = self.buffer.get(m.end..).unwrap_or_default().to_string();
                }
            }
        }

        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(stop: &[&str], rewind: &[&str]) -> SequenceStream {
        let mut s = SequenceStream::new();
        s.bind(stop, rewind);
        s
    }

    #[test]
    fn no_patterns_always_accepts() {
        let mut s = stream(&[], &[]);
        let ctx = s.append("hello");
        assert_eq!(ctx.status, SequenceStatus::Accept);
        assert_eq!(ctx.sequence, "hello");
        assert_eq!(s.buffer(), "");
    }

    #[test]
    fn partial_pattern_buffers() {
        let mut s = stream(&["END"], &[]);
        let ctx = s.append("EN");
        assert_eq!(ctx.status, SequenceStatus::Buffer);
        assert!(ctx.sequence.is_empty());
        assert_eq!(s.buffer(), "EN");
    }

    #[test]
    fn buffered_text_released_on_accept() {
        let mut s = stream(&["END"], &[]);
        s.append("EN");
        let ctx = s.append("X");
        assert_eq!(ctx.status, SequenceStatus::Accept);
        assert_eq!(ctx.sequence, "ENX");
        assert_eq!(s.buffer(), "");
    }

    #[test]
    fn stop_yields_unmatched_prefix_and_literal() {
        let mut s = stream(&["END"], &[]);
        let ctx = s.append("12END34");
        assert_eq!(ctx.status, SequenceStatus::Stop);
        assert_eq!(ctx.unmatched_prefix, "12");
        assert_eq!(ctx.matched, "END");
        assert_eq!(s.buffer(), "");
    }

    #[test]
    fn rewind_returns_whole_buffer() {
        let mut s = stream(&[], &["bad"]);
        s.append("b");
        s.append("a");
        let ctx = s.append("d");
        assert_eq!(ctx.status, SequenceStatus::Rewind);
        assert_eq!(ctx.sequence, "bad");
        assert_eq!(s.buffer(), "");
    }

    #[test]
    fn rule_match_keeps_remainder_buffered() {
        let mut s = stream(&[], &[]);
        let id = s.bind_sequence(&["}"]);
        let ctx = s.append("x} tail");
        assert_eq!(ctx.status, SequenceStatus::Rule);
        assert_eq!(ctx.sequence, "x}");
        assert!(ctx.matched_ids.contains(&id));
        assert_eq!(s.buffer(), " tail");
    }

    #[test]
    fn stop_takes_priority_over_rule_id() {
        let mut s = stream(&["stop"], &[]);
        let id = s.bind_sequence(&["stop"]);
        let ctx = s.append("stop");
        assert_eq!(ctx.status, SequenceStatus::Stop);
        assert!(ctx.matched_ids.contains(&id));
        assert!(ctx.matched_ids.contains(&MatchId::Stop));
    }

    #[test]
    fn matched_literal_preserves_original_case() {
        let mut s = stream(&["end"], &[]);
        let ctx = s.append("xEnD");
        assert_eq!(ctx.status, SequenceStatus::Stop);
        assert_eq!(ctx.matched, "EnD");
        assert_eq!(ctx.unmatched_prefix, "x");
    }

    #[test]
    fn bind_resets_buffer_and_rule_ids() {
        let mut s = stream(&["END"], &[]);
        s.append("EN");
        s.bind(&["OTHER"], &[]);
        assert_eq!(s.buffer(), "");
        let id = s.bind_sequence(&["x"]);
        assert_eq!(id, MatchId::Rule(0));
    }

    #[test]
    fn unbind_sequence_removes_trigger_patterns() {
        let mut s = stream(&[], &[]);
        let id = s.bind_sequence(&["}"]);
        s.unbind_sequence(id);
        let ctx = s.append("}");
        assert_eq!(ctx.status, SequenceStatus::Accept);
    }

    #[test]
    fn restore_buffer_rewinds_stream_state() {
        let mut s = stream(&["END"], &[]);
        s.append("EN");
        let saved = s.buffer().to_string();
        s.append("D?");
        s.restore_buffer(saved);
        assert_eq!(s.buffer(), "EN");
    }

    #[test]
    fn quiet_context_is_inert() {
        let ctx = SequenceContext::quiet();
        assert_eq!(ctx.status, SequenceStatus::Buffer);
        assert!(ctx.piece.is_empty() && ctx.sequence.is_empty());
    }
}
