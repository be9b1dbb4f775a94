// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Subscription trie: maps filters (including wildcards) to subscriber
//! handles and their granted QoS.

use std::collections::HashMap;

use codec::QoS;

use super::filter::{split_levels, MULTI_WILDCARD, SINGLE_WILDCARD};
use crate::error::{Error, Result};
use crate::handle::ClientHandle;

/// One node per filter level. `subs[i]`/`qos[i]` are parallel: the
/// subscriber at `subs[i]` was granted `qos[i]` at exactly this path.
#[derive(Debug, Default)]
pub struct SNode {
    subs: Vec<ClientHandle>,
    qos: Vec<QoS>,
    children: HashMap<String, SNode>,
}

impl SNode {
    fn insert(&mut self, levels: &[String], qos: QoS, handle: &ClientHandle) {
        let Some((level, rest)) = levels.split_first() else {
            if let Some(i) = self.subs.iter().position(|h| h == handle) {
                self.qos[i] = qos;
            } else {
                self.subs.push(handle.clone());
                self.qos.push(qos);
            }
            return;
        };
        self.children
            .entry(level.clone())
            .or_default()
            .insert(rest, qos, handle);
    }

    /// Returns `true` if, after removal, this node is empty and should be
    /// pruned from its parent.
    fn remove(&mut self, levels: &[String], handle: Option<&ClientHandle>) -> Result<bool> {
        let Some((level, rest)) = levels.split_first() else {
            match handle {
                None => {
                    self.subs.clear();
                    self.qos.clear();
                }
                Some(h) => {
                    let i = self
                        .subs
                        .iter()
                        .position(|s| s == h)
                        .ok_or_else(|| Error::SubscriberNotFound(h.to_string()))?;
                    self.subs.remove(i);
                    self.qos.remove(i);
                }
            }
            return Ok(self.subs.is_empty() && self.children.is_empty());
        };

        let child = self
            .children
            .get_mut(level)
            .ok_or_else(|| Error::NoSuchTopic(level.clone()))?;
        let empty = child.remove(rest, handle)?;
        if empty {
            self.children.remove(level);
        }
        Ok(self.subs.is_empty() && self.children.is_empty())
    }

    fn collect(&self, out: &mut Vec<(ClientHandle, QoS)>) {
        for (h, q) in self.subs.iter().zip(self.qos.iter()) {
            out.push((h.clone(), *q));
        }
    }

    fn walk_match(&self, levels: &[String], out: &mut Vec<(ClientHandle, QoS)>) {
        let Some((level, rest)) = levels.split_first() else {
            self.collect(out);
            if let Some(mwc) = self.children.get(MULTI_WILDCARD) {
                mwc.collect(out);
            }
            return;
        };

        for (key, child) in &self.children {
            if key == MULTI_WILDCARD {
                child.collect(out);
            } else if key == SINGLE_WILDCARD || key == level {
                child.walk_match(rest, out);
            }
        }
    }
}

/// Subscription trie root, per spec §4.A.
#[derive(Debug, Default)]
pub struct SubTrie {
    root: SNode,
}

impl SubTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handle` to `filter` at `requested_qos` (clamped to 0..=2,
    /// per spec §4.A "QoS"). Returns the granted QoS actually stored.
    pub fn subscribe(
        &mut self,
        filter: &str,
        requested_qos: u8,
        handle: &ClientHandle,
    ) -> Result<QoS> {
        let levels = split_levels(filter)?;
        let qos = QoS::clamped(requested_qos);
        self.root.insert(&levels, qos, handle);
        Ok(qos)
    }

    /// Remove `handle` from `filter`; if `handle` is `None`, clear every
    /// subscriber at that exact filter.
    pub fn unsubscribe(&mut self, filter: &str, handle: Option<&ClientHandle>) -> Result<()> {
        let levels = split_levels(filter)?;
        self.root.remove(&levels, handle)?;
        Ok(())
    }

    /// Resolve every subscriber whose filter matches the concrete `topic`,
    /// each paired with its granted QoS (see SPEC_FULL.md's resolution of
    /// the Delivery QoS ambiguity: the trie's stored value, not the
    /// publisher's requested QoS, is what is returned here).
    pub fn subscribers(&self, topic: &str) -> Result<Vec<(ClientHandle, QoS)>> {
        let levels = split_levels(topic)?;
        let mut out = Vec::new();
        self.root.walk_match(&levels, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(id: &str) -> ClientHandle {
        ClientHandle::new(id, 0)
    }

    #[test]
    fn s1_wildcard_match() {
        let mut trie = SubTrie::new();
        let h1 = h("H1");
        let h2 = h("H2");
        trie.subscribe("sport/+/player1", 1, &h1).unwrap();
        trie.subscribe("sport/#", 2, &h2).unwrap();

        let mut got: Vec<_> = trie
            .subscribers("sport/tennis/player1")
            .unwrap()
            .into_iter()
            .map(|(h, _)| h)
            .collect();
        got.sort_by(|a, b| a.client_id().cmp(b.client_id()));
        assert_eq!(got, vec![h1.clone(), h2.clone()]);

        let got2: Vec<_> = trie
            .subscribers("sport/tennis/player2")
            .unwrap()
            .into_iter()
            .map(|(h, _)| h)
            .collect();
        assert_eq!(got2, vec![h2]);
    }

    #[test]
    fn s2_multilevel_boundary() {
        let mut trie = SubTrie::new();
        let h1 = h("H1");
        trie.subscribe("#", 0, &h1).unwrap();
        assert_eq!(
            trie.subscribers("a/b/c").unwrap(),
            vec![(h1.clone(), QoS::AtMostOnce)]
        );
        assert_eq!(
            trie.subscribers("/").unwrap(),
            vec![(h1, QoS::AtMostOnce)]
        );
    }

    #[test]
    fn s6_qos_clamp() {
        let mut trie = SubTrie::new();
        let h1 = h("H1");
        let granted = trie.subscribe("a", 3, &h1).unwrap();
        assert_eq!(granted, QoS::ExactOnce);
        assert_eq!(trie.subscribers("a").unwrap(), vec![(h1, QoS::ExactOnce)]);
    }

    #[test]
    fn unsubscribe_prunes_empty_nodes() {
        let mut trie = SubTrie::new();
        let h1 = h("H1");
        trie.subscribe("a/b/c", 0, &h1).unwrap();
        trie.unsubscribe("a/b/c", Some(&h1)).unwrap();
        assert!(trie.root.children.is_empty());
    }

    #[test]
    fn round_trip_restores_prior_state() {
        let mut trie = SubTrie::new();
        let h1 = h("H1");
        trie.subscribe("sport/tennis", 1, &h1).unwrap();
        let before = format!("{:?}", trie.root.children.len());
        trie.subscribe("a/b", 0, &h1).unwrap();
        trie.unsubscribe("a/b", Some(&h1)).unwrap();
        let after = format!("{:?}", trie.root.children.len());
        assert_eq!(before, after);
    }

    #[test]
    fn unsubscribe_missing_handle_is_error() {
        let mut trie = SubTrie::new();
        let h1 = h("H1");
        trie.subscribe("a", 0, &h1).unwrap();
        let h2 = h("H2");
        assert!(trie.unsubscribe("a", Some(&h2)).is_err());
    }

    #[test]
    fn rejects_system_topic_publish() {
        let trie = SubTrie::new();
        assert!(trie.subscribers("$SYS/broker/uptime").is_err());
    }
}
