//! Wildcard topic-pattern trie (spec.md §4.1, "Matching algorithm")
//!
//! A pattern matches a topic segment-wise: a literal segment must equal the
//! corresponding topic segment, `*` matches exactly one segment, and `**`
//! terminates the pattern and matches one-or-more trailing segments.
//! Lookup cost is O(segments × fan-out of wildcard edges at each level).

use std::collections::HashMap;

use crate::event_bus::domain_types::SubscriptionHandle;

#[derive(Default)]
struct TrieNode {
    literal: HashMap<String, TrieNode>,
    single_wildcard: Option<Box<TrieNode>>,
    /// `**`: matches this node and everything below it; handlers here match
    /// regardless of how many trailing segments remain.
    trailing_wildcard: Vec<SubscriptionHandle>,
    handlers: Vec<SubscriptionHandle>,
}

/// Trie indexing subscription patterns for topic matching.
#[derive(Default)]
pub struct PatternTrie {
    root: TrieNode,
}

impl PatternTrie {
    /// Creates an empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle` under `pattern` (dot-separated, may contain
    /// `*`/`**` segments).
    pub fn insert(&mut self, pattern: &str, handle: SubscriptionHandle) {
        let segments: Vec<&str> = pattern.split('.').collect();
        let mut node = &mut self.root;
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == segments.len() - 1;
            match *segment {
                "**" => {
                    node.trailing_wildcard.push(handle);
                    return;
                }
                "*" => {
                    node = node.single_wildcard.get_or_insert_with(Default::default);
                }
                literal => {
                    node = node
                        .literal
                        .entry(literal.to_string())
                        .or_insert_with(Default::default);
                }
            }
            if is_last {
                node.handlers.push(handle);
            }
        }
    }

    /// Removes `handle` from `pattern`. No-op if not present.
    pub fn remove(&mut self, pattern: &str, handle: SubscriptionHandle) {
        let segments: Vec<&str> = pattern.split('.').collect();
        remove_rec(&mut self.root, &segments, handle);
    }

    /// Returns every handler whose pattern matches `topic_segments`.
    #[must_use]
    pub fn matches(&self, topic_segments: &[&str]) -> Vec<SubscriptionHandle> {
        let mut out = Vec::new();
        Self::walk(&self.root, topic_segments, &mut out);
        out
    }

    fn walk(node: &TrieNode, remaining: &[&str], out: &mut Vec<SubscriptionHandle>) {
        let Some((head, rest)) = remaining.split_first() else {
            out.extend(node.handlers.iter().copied());
            return;
        };

        // `**` matches one or more trailing segments, so it only counts once
        // at least one segment remains to be consumed.
        out.extend(node.trailing_wildcard.iter().copied());

        if let Some(child) = node.literal.get(*head) {
            Self::walk(child, rest, out);
        }
        if let Some(child) = &node.single_wildcard {
            Self::walk(child, rest, out);
        }
    }
}

fn remove_rec(node: &mut TrieNode, segments: &[&str], handle: SubscriptionHandle) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        node.handlers.retain(|h| *h != handle);
        return node.handlers.is_empty()
            && node.literal.is_empty()
            && node.single_wildcard.is_none()
            && node.trailing_wildcard.is_empty();
    };

    match *head {
        "**" => {
            node.trailing_wildcard.retain(|h| *h != handle);
        }
        "*" => {
            if let Some(child) = node.single_wildcard.as_mut() {
                if remove_rec(child, rest, handle) {
                    node.single_wildcard = None;
                }
            }
        }
        literal => {
            if let Some(child) = node.literal.get_mut(literal) {
                if remove_rec(child, rest, handle) {
                    node.literal.remove(literal);
                }
            }
        }
    }

    node.handlers.is_empty()
        && node.literal.is_empty()
        && node.single_wildcard.is_none()
        && node.trailing_wildcard.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h() -> SubscriptionHandle {
        SubscriptionHandle::generate()
    }

    #[test]
    fn literal_pattern_matches_exact_topic_only() {
        let mut trie = PatternTrie::new();
        let handle = h();
        trie.insert("a.b.c", handle);
        assert_eq!(trie.matches(&["a", "b", "c"]), vec![handle]);
        assert!(trie.matches(&["a", "b", "d"]).is_empty());
        assert!(trie.matches(&["a", "b"]).is_empty());
    }

    #[test]
    fn single_wildcard_matches_exactly_one_segment() {
        let mut trie = PatternTrie::new();
        let handle = h();
        trie.insert("task.request.*", handle);
        assert_eq!(trie.matches(&["task", "request", "weather"]), vec![handle]);
        assert!(trie.matches(&["task", "request", "weather", "get"]).is_empty());
    }

    #[test]
    fn trailing_wildcard_matches_one_or_more_segments() {
        let mut trie = PatternTrie::new();
        let handle = h();
        trie.insert("task.request.**", handle);
        assert_eq!(
            trie.matches(&["task", "request", "weather"]),
            vec![handle]
        );
        assert_eq!(
            trie.matches(&["task", "request", "weather", "get"]),
            vec![handle]
        );
        assert!(trie.matches(&["task", "response"]).is_empty());
        assert!(
            trie.matches(&["task", "request"]).is_empty(),
            "** requires at least one trailing segment"
        );
    }

    #[test]
    fn leading_wildcard_and_all_wildcard_patterns() {
        let mut trie = PatternTrie::new();
        let leading = h();
        trie.insert("*.heartbeat", leading);
        assert_eq!(trie.matches(&["registry", "heartbeat"]), vec![leading]);

        let all = h();
        trie.insert("**", all);
        assert_eq!(trie.matches(&["anything", "at", "all"]), vec![all]);
        assert_eq!(trie.matches(&["x"]), vec![all]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handle() {
        let mut trie = PatternTrie::new();
        let a = h();
        let b = h();
        trie.insert("a.b", a);
        trie.insert("a.b", b);
        trie.remove("a.b", a);
        assert_eq!(trie.matches(&["a", "b"]), vec![b]);
    }

    #[test]
    fn multiple_subscriptions_on_overlapping_patterns_all_fire() {
        let mut trie = PatternTrie::new();
        let exact = h();
        let wildcard = h();
        let trailing = h();
        trie.insert("task.response.weather.get", exact);
        trie.insert("task.response.*.get", wildcard);
        trie.insert("task.**", trailing);

        let mut got = trie.matches(&["task", "response", "weather", "get"]);
        got.sort_by_key(|h| h.to_string());
        let mut want = vec![exact, wildcard, trailing];
        want.sort_by_key(|h| h.to_string());
        assert_eq!(got, want);
    }
}
