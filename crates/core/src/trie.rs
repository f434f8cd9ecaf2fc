//! Prefix tree classifying a growing text buffer against literal
//! pattern sets.
//!
//! Matching is ASCII-case-insensitive and scans every start offset of
//! the buffer, not just offset zero: a pattern may first appear mid
//! buffer (for example `"*"` inside `" *actions*"`), and a single-root
//! walk would miss it.

use std::collections::BTreeSet;

use ahash::AHashMap;

/// Identifier attached to a pattern. `Stop` and `Rewind` are reserved for
/// the stream-control sets; `Rule(_)` ids are handed out to sequence
/// triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchId {
    Stop,
    Rewind,
    Rule(u32),
}

#[derive(Default)]
struct TrieNode {
    children: AHashMap<u8, TrieNode>,
    ids: BTreeSet<MatchId>,
}

impl TrieNode {
    fn is_terminal(&self) -> bool {
        !self.ids.is_empty()
    }
}

/// A completed match: byte range within the checked buffer plus every id
/// whose pattern ends there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieMatch {
    pub ids: BTreeSet<MatchId>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieOutcome {
    /// No pattern matches and none can match with more input.
    None,
    /// No complete match, but some suffix of the buffer is a live
    /// pattern prefix.
    Maybe,
    Matched(TrieMatch),
}

#[derive(Default)]
pub struct MatchTrie {
    root: TrieNode,
}

impl MatchTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Insert patterns under `id`. Empty patterns are ignored.
    pub fn add_patterns<S: AsRef<str>>(&mut self, patterns: &[S], id: MatchId) {
        for pattern in patterns {
            let bytes = pattern.as_ref().as_bytes();
            if bytes.is_empty() {
                continue;
            }
            let mut node = &mut self.root;
            for &b in bytes {
                node = node.children.entry(b.to_ascii_lowercase()).or_default();
            }
            node.ids.insert(id);
        }
    }

    /// Remove `id` from every node, pruning chains that no longer lead to
    /// a terminal.
    pub fn remove_id(&mut self, id: MatchId) {
        prune(&mut self.root, id);
    }

    /// Classify `buffer` against the stored patterns.
    ///
    /// Every start offset is scanned; the winning match is the one that
    /// completes earliest (smallest end, ties to the smallest start).
    pub fn check_buffer(&self, buffer: &str) -> TrieOutcome {
        if self.root.children.is_empty() {
            return TrieOutcome::None;
        }

        let bytes = buffer.as_bytes();
        let mut best: Option<TrieMatch> = None;
        let mut maybe = false;

        for start in 0..bytes.len() {
            let mut node = &self.root;
            let mut walked_to_end = true;
            for (i, &b) in bytes[start..].iter().enumerate() {
                match node.children.get(&b.to_ascii_lowercase()) {
                    Some(child) => {
                        node = child;
                        if node.is_terminal() {
                            let end = start + i + 1;
                            let better = best.as_ref().is_none_or(|m| end < m.end);
                            if better {
                                best = Some(TrieMatch {
                                    ids: node.ids.clone(),
                                    start,
                                    end,
                                });
                            }
                            walked_to_end = false;
                            break;
                        }
                    }
                    None => {
                        walked_to_end = false;
                        break;
                    }
                }
            }
            if walked_to_end && !node.children.is_empty() {
                maybe = true;
            }
        }

        match best {
            Some(m) => TrieOutcome::Matched(m),
            None if maybe => TrieOutcome::Maybe,
            None => TrieOutcome::None,
        }
    }
}

/// Returns whether the node should be kept.
fn prune(node: &mut TrieNode, id: MatchId) -> bool {
    node.ids.remove(&id);
    node.children.retain(|_, child| prune(child, id));
    node.is_terminal() || !node.children.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie(stop: &[&str], rewind: &[&str]) -> MatchTrie {
        let mut t = MatchTrie::new();
        t.add_patterns(stop, MatchId::Stop);
        t.add_patterns(rewind, MatchId::Rewind);
        t
    }

    fn matched(outcome: TrieOutcome) -> TrieMatch {
        match outcome {
            TrieOutcome::Matched(m) => m,
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn empty_trie_never_matches() {
        let t = MatchTrie::new();
        assert_eq!(t.check_buffer("anything"), TrieOutcome::None);
        assert!(t.is_empty());
    }

    #[test]
    fn exact_match_at_start() {
        let t = trie(&["end"], &[]);
        let m = matched(t.check_buffer("end"));
        assert_eq!(m.start, 0);
        assert_eq!(m.end, 3);
        assert!(m.ids.contains(&MatchId::Stop));
    }

    #[test]
    fn prefix_reports_maybe() {
        let t = trie(&["end"], &[]);
        assert_eq!(t.check_buffer("e"), TrieOutcome::Maybe);
        assert_eq!(t.check_buffer("en"), TrieOutcome::Maybe);
    }

    #[test]
    fn unrelated_text_reports_none() {
        let t = trie(&["end"], &[]);
        assert_eq!(t.check_buffer("xyz"), TrieOutcome::None);
    }

    #[test]
    fn match_found_mid_buffer() {
        // The pattern starts inside the buffer, past a non-matching head.
        let t = trie(&[], &["*"]);
        let m = matched(t.check_buffer(" *actions"));
        assert_eq!(m.start, 1);
        assert_eq!(m.end, 2);
        assert!(m.ids.contains(&MatchId::Rewind));
    }

    #[test]
    fn suffix_prefix_reports_maybe() {
        // "ab" at the tail of the buffer is a live prefix of "abc".
        let t = trie(&["abc"], &[]);
        assert_eq!(t.check_buffer("xxab"), TrieOutcome::Maybe);
    }

    #[test]
    fn earliest_completion_wins() {
        let t = trie(&["abcdef", "cd"], &[]);
        let m = matched(t.check_buffer("abcd"));
        assert_eq!((m.start, m.end), (2, 4));
    }

    #[test]
    fn case_insensitive_matching() {
        let t = trie(&["END"], &[]);
        let m = matched(t.check_buffer("The EnD"));
        assert_eq!((m.start, m.end), (4, 7));
    }

    #[test]
    fn overlapping_ids_reported_together() {
        let mut t = MatchTrie::new();
        t.add_patterns(&["stop"], MatchId::Stop);
        t.add_patterns(&["stop"], MatchId::Rule(3));
        let m = matched(t.check_buffer("stop"));
        assert!(m.ids.contains(&MatchId::Stop));
        assert!(m.ids.contains(&MatchId::Rule(3)));
    }

    #[test]
    fn remove_id_prunes_dead_branches() {
        let mut t = MatchTrie::new();
        t.add_patterns(&["abc"], MatchId::Rule(0));
        t.add_patterns(&["ab"], MatchId::Rule(1));

        t.remove_id(MatchId::Rule(0));
        // "abc" is gone, "ab" still terminal.
        assert_eq!(t.check_buffer("abc"), TrieOutcome::None);
        let m = matched(t.check_buffer("ab"));
        assert_eq!((m.start, m.end), (0, 2));

        t.remove_id(MatchId::Rule(1));
        assert!(t.is_empty());
    }

    #[test]
    fn shared_prefix_survives_partial_removal() {
        let mut t = MatchTrie::new();
        t.add_patterns(&["abcd"], MatchId::Rule(0));
        t.add_patterns(&["ab"], MatchId::Rule(1));
        t.remove_id(MatchId::Rule(1));
        let m = matched(t.check_buffer("abcd"));
        assert_eq!((m.start, m.end), (0, 4));
        assert_eq!(t.check_buffer("ab"), TrieOutcome::Maybe);
    }

    #[test]
    fn empty_patterns_are_ignored() {
        let mut t = MatchTrie::new();
        t.add_patterns(&[""], MatchId::Stop);
        assert!(t.is_empty());
    }
}
