// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic Matcher (spec §4.A): a pair of independent tries -- one for live
//! subscriptions, one for retained messages -- each guarded by its own
//! reader/writer lock so a publish can match subscribers and update
//! retained state without one blocking the other.

mod filter;
mod retained_trie;
mod sub_trie;

use std::sync::RwLock;

use codec::{PublishPacket, QoS};

use crate::error::{Error, Result};
use crate::handle::ClientHandle;
use retained_trie::RetainedTrie;
use sub_trie::SubTrie;

/// Resolve the topics provider by its short configured name (spec §6
/// `topics_provider`), mirroring [`crate::session::provider_by_name`] on the
/// session side. The in-memory trie pair is the only provider this crate
/// ships.
///
/// # Errors
///
/// Returns [`Error::UnknownProvider`] for any name other than `"mem"`.
pub fn topics_provider_by_name(name: &str) -> Result<TopicMatcher> {
    match name {
        "mem" => Ok(TopicMatcher::new()),
        other => Err(Error::UnknownProvider(other.to_string())),
    }
}

/// Owns both tries. Cloning a [`TopicMatcher`] is not supported; share it
/// behind an `Arc`, the way the Broker Coordinator does (spec §4.F).
#[derive(Debug, Default)]
pub struct TopicMatcher {
    subs: RwLock<SubTrie>,
    retained: RwLock<RetainedTrie>,
}

impl TopicMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handle` to `filter` at `requested_qos`, clamped to 0..=2.
    /// Returns the granted QoS.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for malformed filters (misplaced wildcards,
    /// a `$`-leading level).
    pub fn subscribe(&self, filter: &str, requested_qos: u8, handle: &ClientHandle) -> Result<QoS> {
        let mut subs = self.subs.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.subscribe(filter, requested_qos, handle)
    }

    /// Remove `handle` from `filter`; `handle: None` clears every
    /// subscriber at that exact filter.
    ///
    /// # Errors
    ///
    /// Returns a state error if `handle` was never subscribed there, or a
    /// protocol error for a malformed filter. State is left unchanged on
    /// error.
    pub fn unsubscribe(&self, filter: &str, handle: Option<&ClientHandle>) -> Result<()> {
        let mut subs = self.subs.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.unsubscribe(filter, handle)
    }

    /// Every subscriber whose filter matches `topic`, with its granted QoS.
    /// Does not block [`Self::retain`]/[`Self::retained`] (independent lock).
    ///
    /// # Errors
    ///
    /// Returns a protocol error for a malformed topic.
    pub fn subscribers(&self, topic: &str) -> Result<Vec<(ClientHandle, QoS)>> {
        let subs = self.subs.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.subscribers(topic)
    }

    /// Store or clear the retained message at `publish`'s exact topic. Does
    /// not block [`Self::subscribe`]/[`Self::subscribers`] (independent lock).
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the topic contains wildcard characters.
    pub fn retain(&self, publish: PublishPacket) -> Result<()> {
        let mut retained = self
            .retained
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        retained.retain(publish)
    }

    /// Every retained message whose topic matches `filter`; used to replay
    /// state to a client on a newly granted SUBSCRIBE.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for a malformed filter.
    pub fn retained(&self, filter: &str) -> Result<Vec<PublishPacket>> {
        let retained = self
            .retained
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        retained.retained(filter)
    }

    /// Drop all subscription and retained state.
    pub fn close(&self) {
        *self.subs.write().unwrap_or_else(std::sync::PoisonError::into_inner) = SubTrie::new();
        *self
            .retained
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = RetainedTrie::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_topics_provider_name_is_an_error() {
        assert!(topics_provider_by_name("disk").is_err());
        assert!(topics_provider_by_name("mem").is_ok());
    }

    #[test]
    fn subscribe_then_publish_then_close() {
        let matcher = TopicMatcher::new();
        let handle = ClientHandle::new("c1", 0);
        matcher.subscribe("a/b", 1, &handle).unwrap();
        assert_eq!(matcher.subscribers("a/b").unwrap().len(), 1);
        matcher.close();
        assert_eq!(matcher.subscribers("a/b").unwrap().len(), 0);
    }

    #[test]
    fn independent_locks_allow_concurrent_read_and_retain() {
        let matcher = TopicMatcher::new();
        let handle = ClientHandle::new("c1", 0);
        matcher.subscribe("a/b", 0, &handle).unwrap();
        let publish = PublishPacket::new("a/b", QoS::AtMostOnce, b"x".to_vec()).unwrap();
        // A read on the subscription trie and a write on the retained trie
        // must not deadlock against each other.
        let _subs = matcher.subscribers("a/b").unwrap();
        matcher.retain(publish).unwrap();
        assert_eq!(matcher.retained("a/b").unwrap().len(), 1);
    }
}
