// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Session (spec §4.C): per-client state tying together the most recent
//! CONNECT, the prepared will, the client's own retained message, and its
//! topic list.

mod store;

use std::collections::HashMap;
use std::sync::Mutex;

use codec::{ConnectPacket, PublishPacket, QoS};

pub use store::{provider_by_name, MemSessionStore, SessionManager, SessionProvider};

use crate::error::{Error, Result};

/// The parameters of a CONNECT worth retaining across the connection's
/// lifetime, with credentials scrubbed (spec §3: "connect ... credentials
/// scrubbed").
#[derive(Clone, Debug)]
pub struct ConnectParams {
    clean_session: bool,
    keep_alive: u16,
    will_topic: Option<String>,
    will_message: Vec<u8>,
    will_qos: QoS,
    will_retain: bool,
}

impl ConnectParams {
    /// `keepalive_max` clamps the client-advertised keepalive to the core's
    /// configured upper bound (spec §6 `keepalive_max`).
    fn from_packet(connect: &ConnectPacket, keepalive_max: u16) -> Self {
        Self {
            clean_session: connect.clean_session(),
            keep_alive: connect.keep_alive().min(keepalive_max),
            will_topic: connect.will_topic().map(str::to_string),
            will_message: connect.will_message().to_vec(),
            will_qos: connect.will_qos(),
            will_retain: connect.will_retain(),
        }
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    fn will_flag(&self) -> bool {
        self.will_topic.is_some()
    }
}

struct SessionInner {
    init: bool,
    connect: Option<ConnectParams>,
    will: Option<PublishPacket>,
    retained: Option<PublishPacket>,
    topics: HashMap<String, QoS>,
}

impl Default for SessionInner {
    fn default() -> Self {
        Self {
            init: false,
            connect: None,
            will: None,
            retained: None,
            topics: HashMap::new(),
        }
    }
}

/// One client's persistent state. A per-session mutex serialises all
/// mutating operations (spec §4.C).
pub struct Session {
    id: String,
    inner: Mutex<SessionInner>,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Initialise from the CONNECT that created this session. Fails if
    /// called twice (spec §4.C: "`Initialise` fails if called twice").
    /// `keepalive_max` clamps the stored keepalive to the core's configured
    /// upper bound (spec §6 `keepalive_max`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionAlreadyInitialised`] on a second call.
    pub fn initialise(&self, connect: &ConnectPacket, keepalive_max: u16) -> Result<()> {
        let mut inner = self.lock();
        if inner.init {
            return Err(Error::SessionAlreadyInitialised(self.id.clone()));
        }
        let params = ConnectParams::from_packet(connect, keepalive_max);
        inner.will = if params.will_flag() {
            let topic = params.will_topic.clone().unwrap_or_default();
            let mut will = PublishPacket::new(&topic, params.will_qos, params.will_message.clone())
                .map_err(|_| Error::WillTooLarge)?;
            will.set_retain(params.will_retain);
            Some(will)
        } else {
            None
        };
        inner.connect = Some(params);
        inner.init = true;
        Ok(())
    }

    /// Update the stored CONNECT parameters on a reconnect, without
    /// resetting `topics`. `keepalive_max` clamps as in [`Self::initialise`].
    pub fn update(&self, connect: &ConnectPacket, keepalive_max: u16) {
        let mut inner = self.lock();
        inner.connect = Some(ConnectParams::from_packet(connect, keepalive_max));
    }

    /// Record the last message this client itself published with
    /// `retain=true`, used during subscribe replay (spec §4).
    pub fn retain_message(&self, publish: PublishPacket) {
        self.lock().retained = Some(publish);
    }

    #[must_use]
    pub fn retained(&self) -> Option<PublishPacket> {
        self.lock().retained.clone()
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionNotInitialised`] if called before
    /// [`Self::initialise`].
    pub fn add_topic(&self, filter: &str, qos: QoS) -> Result<()> {
        let mut inner = self.lock();
        if !inner.init {
            return Err(Error::SessionNotInitialised(self.id.clone()));
        }
        inner.topics.insert(filter.to_string(), qos);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionNotInitialised`] if called before
    /// [`Self::initialise`].
    pub fn remove_topic(&self, filter: &str) -> Result<()> {
        let mut inner = self.lock();
        if !inner.init {
            return Err(Error::SessionNotInitialised(self.id.clone()));
        }
        inner.topics.remove(filter);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::SessionNotInitialised`] if called before
    /// [`Self::initialise`].
    pub fn topics(&self) -> Result<Vec<(String, QoS)>> {
        let inner = self.lock();
        if !inner.init {
            return Err(Error::SessionNotInitialised(self.id.clone()));
        }
        Ok(inner.topics.iter().map(|(f, q)| (f.clone(), *q)).collect())
    }

    #[must_use]
    pub fn will(&self) -> Option<PublishPacket> {
        self.lock().will.clone()
    }

    #[must_use]
    pub fn will_flag(&self) -> bool {
        self.lock().will.is_some()
    }

    /// `false` is used to suppress will publication on a clean disconnect
    /// (spec §4.C, §9 "Will publication on ungraceful close").
    pub fn set_will_flag(&self, present: bool) {
        let mut inner = self.lock();
        if !present {
            inner.will = None;
        }
    }

    #[must_use]
    pub fn clean_session(&self) -> bool {
        self.lock()
            .connect
            .as_ref()
            .is_some_and(ConnectParams::clean_session)
    }

    /// The keepalive in effect for the current CONNECT, already clamped to
    /// the core's `keepalive_max` (spec §6).
    #[must_use]
    pub fn keep_alive(&self) -> u16 {
        self.lock().connect.as_ref().map_or(0, ConnectParams::keep_alive)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_KEEPALIVE_LIMIT: u16 = 3600;

    fn connect(id: &str) -> ConnectPacket {
        ConnectPacket::new(id, 60, false)
    }

    #[test]
    fn initialise_twice_fails() {
        let session = Session::new("c1");
        session.initialise(&connect("c1"), NO_KEEPALIVE_LIMIT).unwrap();
        assert!(session.initialise(&connect("c1"), NO_KEEPALIVE_LIMIT).is_err());
    }

    #[test]
    fn topic_ops_require_init() {
        let session = Session::new("c1");
        assert!(session.add_topic("a", QoS::AtMostOnce).is_err());
        session.initialise(&connect("c1"), NO_KEEPALIVE_LIMIT).unwrap();
        session.add_topic("a", QoS::AtMostOnce).unwrap();
        assert_eq!(session.topics().unwrap(), vec![("a".to_string(), QoS::AtMostOnce)]);
    }

    #[test]
    fn will_present_iff_will_flag_set() {
        let session = Session::new("c1");
        let with_will = connect("c1").set_will("bye", b"later".to_vec(), QoS::AtLeastOnce, false);
        session.initialise(&with_will, NO_KEEPALIVE_LIMIT).unwrap();
        assert!(session.will_flag());
        assert_eq!(session.will().unwrap().topic(), "bye");
    }

    #[test]
    fn s4_set_will_flag_false_suppresses_will() {
        let session = Session::new("c1");
        let with_will = connect("c1").set_will("bye", b"later".to_vec(), QoS::AtLeastOnce, false);
        session.initialise(&with_will, NO_KEEPALIVE_LIMIT).unwrap();
        session.set_will_flag(false);
        assert!(!session.will_flag());
    }

    #[test]
    fn keep_alive_is_clamped_to_configured_max() {
        let session = Session::new("c1");
        session.initialise(&connect("c1"), 30).unwrap();
        assert_eq!(session.keep_alive(), 30);
    }

    #[test]
    fn keep_alive_under_max_is_unchanged() {
        let session = Session::new("c1");
        session.initialise(&connect("c1"), NO_KEEPALIVE_LIMIT).unwrap();
        assert_eq!(session.keep_alive(), 60);
    }
}
