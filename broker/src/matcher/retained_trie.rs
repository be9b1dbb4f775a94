// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained-message trie: the last `PUBLISH` with `retain=true` on each
//! concrete topic, replayed to subscribers whose filter matches it on
//! SUBSCRIBE.

use std::collections::HashMap;

use codec::PublishPacket;

use super::filter::{split_levels, MULTI_WILDCARD, SINGLE_WILDCARD};
use crate::error::Result;

/// One node per topic level. `msg` is `None` unless a retained message was
/// published at exactly this path; per spec §3, non-leaf nodes may still
/// carry a message (e.g. `a/b` and `a/b/c` can both be retained).
#[derive(Debug, Default)]
pub struct RNode {
    msg: Option<PublishPacket>,
    children: HashMap<String, RNode>,
}

impl RNode {
    fn insert_or_update(&mut self, levels: &[String], msg: PublishPacket) {
        let Some((level, rest)) = levels.split_first() else {
            self.msg = Some(msg);
            return;
        };
        self.children
            .entry(level.clone())
            .or_default()
            .insert_or_update(rest, msg);
    }

    /// Returns `true` if this node is now empty (no message, no children)
    /// and should be pruned from its parent.
    fn remove(&mut self, levels: &[String]) -> Result<bool> {
        let Some((level, rest)) = levels.split_first() else {
            self.msg = None;
            return Ok(self.children.is_empty());
        };
        if let Some(child) = self.children.get_mut(level) {
            let empty = child.remove(rest)?;
            if empty {
                self.children.remove(level);
            }
        }
        Ok(self.msg.is_none() && self.children.is_empty())
    }

    fn collect_all(&self, out: &mut Vec<PublishPacket>) {
        if let Some(msg) = &self.msg {
            out.push(msg.clone());
        }
        for child in self.children.values() {
            child.collect_all(out);
        }
    }

    fn walk_match(&self, levels: &[String], out: &mut Vec<PublishPacket>) {
        let Some((level, rest)) = levels.split_first() else {
            if let Some(msg) = &self.msg {
                out.push(msg.clone());
            }
            return;
        };

        if level == MULTI_WILDCARD {
            self.collect_all(out);
        } else if level == SINGLE_WILDCARD {
            for child in self.children.values() {
                child.walk_match(rest, out);
            }
        } else if let Some(child) = self.children.get(level) {
            child.walk_match(rest, out);
        }
    }
}

/// Retained-message trie root, per spec §4.A.
#[derive(Debug, Default)]
pub struct RetainedTrie {
    root: RNode,
}

impl RetainedTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or clear the retained message for `publish.topic()`. An empty
    /// payload removes any prior retained message at that exact topic.
    pub fn retain(&mut self, publish: PublishPacket) -> Result<()> {
        let levels = split_levels(publish.topic())?;
        if publish.payload().is_empty() {
            self.root.remove(&levels)?;
        } else {
            self.root.insert_or_update(&levels, publish);
        }
        Ok(())
    }

    /// Every retained message whose topic matches `filter`.
    pub fn retained(&self, filter: &str) -> Result<Vec<PublishPacket>> {
        let levels = split_levels(filter)?;
        let mut out = Vec::new();
        self.root.walk_match(&levels, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn publish(topic: &str, payload: &str) -> PublishPacket {
        let mut p = PublishPacket::new(topic, QoS::AtMostOnce, payload.as_bytes().to_vec()).unwrap();
        p.set_retain(true);
        p
    }

    #[test]
    fn s3_retained_replay_last_write_wins_then_cleared() {
        let mut trie = RetainedTrie::new();
        trie.retain(publish("a/b", "x")).unwrap();
        trie.retain(publish("a/b", "")).unwrap();
        assert!(trie.retained("a/#").unwrap().is_empty());
    }

    #[test]
    fn last_write_wins_when_nonempty() {
        let mut trie = RetainedTrie::new();
        trie.retain(publish("a/b", "x")).unwrap();
        trie.retain(publish("a/b", "y")).unwrap();
        let got = trie.retained("a/b").unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload(), b"y");
    }

    #[test]
    fn wildcard_replay_matches_plus_and_hash() {
        let mut trie = RetainedTrie::new();
        trie.retain(publish("sport/tennis/player1", "ranked")).unwrap();
        assert_eq!(trie.retained("sport/+/player1").unwrap().len(), 1);
        assert_eq!(trie.retained("sport/#").unwrap().len(), 1);
        assert_eq!(trie.retained("sport/tennis/player2").unwrap().len(), 0);
    }

    #[test]
    fn non_leaf_node_can_carry_retained_message() {
        let mut trie = RetainedTrie::new();
        trie.retain(publish("a/b", "parent")).unwrap();
        trie.retain(publish("a/b/c", "child")).unwrap();
        assert_eq!(trie.retained("a/b").unwrap()[0].payload(), b"parent");
        assert_eq!(trie.retained("a/b/c").unwrap()[0].payload(), b"child");
        assert_eq!(trie.retained("a/#").unwrap().len(), 2);
    }
}
