// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Session Store (spec §4.B): a pluggable keyed collection of sessions.
//!
//! The source this crate is modeled on registers providers in a process-wide
//! mutable map (`sessions.Register("mem", ...)`, looked up later by name).
//! Per spec §9 Design Notes ("Global provider registry ... replaced by an
//! explicit factory passed into the Broker Coordinator at construction"),
//! this crate instead resolves a provider name to a boxed trait object once,
//! at construction time, and never again touches global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::session::Session;

/// A pluggable keyed collection of sessions. The in-memory provider is the
/// only one this crate ships (spec §1 Non-goals: "persistent on-disk
/// sessions ... the provider interface permits later swap").
pub trait SessionProvider: Send + Sync {
    fn new_session(&self, id: &str) -> Arc<Session>;
    fn get(&self, id: &str) -> Option<Arc<Session>>;
    fn del(&self, id: &str);
    /// No-op for the memory backend; a durable backend would flush here.
    fn save(&self, id: &str) -> Result<()>;
    fn count(&self) -> usize;
    fn close(&self);
}

/// Resolve a provider by its short configured name (spec §6 `session_provider`).
///
/// # Errors
///
/// Returns [`Error::UnknownProvider`] for any name other than `"mem"`.
pub fn provider_by_name(name: &str) -> Result<Box<dyn SessionProvider>> {
    match name {
        "mem" => Ok(Box::new(MemSessionStore::new())),
        other => Err(Error::UnknownProvider(other.to_string())),
    }
}

/// In-memory [`SessionProvider`]. All operations acquire a single write
/// lock across the whole map (spec §4.B "Concurrency").
#[derive(Default)]
pub struct MemSessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl MemSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionProvider for MemSessionStore {
    fn new_session(&self, id: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(id));
        self.lock().insert(id.to_string(), Arc::clone(&session));
        session
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    fn del(&self, id: &str) {
        self.lock().remove(id);
    }

    fn save(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    fn count(&self) -> usize {
        self.lock().len()
    }

    fn close(&self) {
        self.lock().clear();
    }
}

/// Fronts a [`SessionProvider`], generating a random client id when the
/// caller passes an empty one (spec §4.B).
pub struct SessionManager {
    provider: Box<dyn SessionProvider>,
}

impl SessionManager {
    #[must_use]
    pub fn new(provider: Box<dyn SessionProvider>) -> Self {
        Self { provider }
    }

    /// Create a new session, generating a 15-byte URL-safe base64 client id
    /// if `id` is empty.
    #[must_use]
    pub fn new_session(&self, id: &str) -> Arc<Session> {
        if id.is_empty() {
            self.provider.new_session(&Self::generate_id())
        } else {
            self.provider.new_session(id)
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.provider.get(id)
    }

    pub fn del(&self, id: &str) {
        self.provider.del(id);
    }

    /// # Errors
    ///
    /// Propagates whatever the backing provider's flush returns.
    pub fn save(&self, id: &str) -> Result<()> {
        self.provider.save(id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.provider.count()
    }

    pub fn close(&self) {
        self.provider.close();
    }

    fn generate_id() -> String {
        let mut bytes = [0u8; 15];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_with_empty_id_generates_one() {
        let manager = SessionManager::new(provider_by_name("mem").unwrap());
        let session = manager.new_session("");
        assert!(!session.id().is_empty());
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn get_after_new_returns_same_session() {
        let manager = SessionManager::new(provider_by_name("mem").unwrap());
        manager.new_session("c1");
        assert!(manager.get("c1").is_some());
        manager.del("c1");
        assert!(manager.get("c1").is_none());
    }

    #[test]
    fn close_resets_the_map() {
        let manager = SessionManager::new(provider_by_name("mem").unwrap());
        manager.new_session("c1");
        manager.close();
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn unknown_provider_name_is_an_error() {
        assert!(provider_by_name("disk").is_err());
    }
}
