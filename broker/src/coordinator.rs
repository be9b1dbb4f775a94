// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Broker Coordinator (spec §4.F): the only owner of the Matcher, Session
//! Store and Worker Pool, and home of the publish path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use codec::{PublishPacket, QoS};

use crate::auth::Authenticator;
use crate::bridge::{BridgeEvent, BridgeSink, Direction};
use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use crate::handle::ClientHandle;
use crate::matcher::{topics_provider_by_name, TopicMatcher};
use crate::session::{provider_by_name, SessionManager};

/// Everything a Broker Coordinator needs at construction, built once by the
/// binary that owns configuration -- no process-wide registries are
/// consulted afterward (spec §9 "Global provider registry").
pub struct BrokerCoordinator {
    matcher: TopicMatcher,
    sessions: SessionManager,
    pool: crate::pool::WorkerPool,
    bridge: Box<dyn BridgeSink>,
    auth: Box<dyn Authenticator>,
    config: Config,
    epochs: Mutex<HashMap<String, u64>>,
    connections: Mutex<HashMap<ClientHandle, Arc<dyn Connection>>>,
}

impl BrokerCoordinator {
    /// # Errors
    ///
    /// Returns [`crate::error::Error::UnknownProvider`] if
    /// `config.session_provider()` or `config.topics_provider()` names an
    /// unregistered provider.
    pub fn new(
        config: Config,
        bridge: Box<dyn BridgeSink>,
        auth: Box<dyn Authenticator>,
    ) -> Result<Self> {
        let session_provider = provider_by_name(config.session_provider())?;
        let matcher = topics_provider_by_name(config.topics_provider())?;
        Ok(Self {
            matcher,
            sessions: SessionManager::new(session_provider),
            pool: crate::pool::WorkerPool::new(config.workers(), config.queue_depth()),
            bridge,
            auth,
            config,
            epochs: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn matcher(&self) -> &TopicMatcher {
        &self.matcher
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn pool(&self) -> &crate::pool::WorkerPool {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn authenticator(&self) -> &dyn Authenticator {
        self.auth.as_ref()
    }

    /// Allocate the next connection epoch for `client_id`, so a handle
    /// captured before a reconnect never collides with the new one (spec
    /// §9 "Opaque subscriber handles").
    pub(crate) fn next_epoch(&self, client_id: &str) -> u64 {
        let mut epochs = self.epochs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let epoch = epochs.entry(client_id.to_string()).or_insert(0);
        let current = *epoch;
        *epoch += 1;
        current
    }

    pub(crate) fn register_connection(&self, handle: ClientHandle, connection: Arc<dyn Connection>) {
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(handle, connection);
    }

    pub(crate) fn unregister_connection(&self, handle: &ClientHandle) {
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(handle);
    }

    /// Dereference a subscriber handle to its live connection. A handle
    /// from a closed or superseded connection resolves to `None` -- spec
    /// §3: "stale handles yield a not-found and are treated as a no-op
    /// delivery."
    fn connection_for(&self, handle: &ClientHandle) -> Option<Arc<dyn Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    /// The publish path (spec §4.F): resolve subscribers, fan out a
    /// per-subscriber delivery task at the appropriate QoS, forward to the
    /// bridge best-effort, and update retained state.
    pub fn publish(self: &Arc<Self>, client_id: &str, packet: PublishPacket) {
        match self.matcher.subscribers(packet.topic()) {
            Ok(subscribers) => {
                for (handle, granted) in subscribers {
                    self.deliver(handle, &packet, granted);
                }
            }
            Err(err) => {
                log::warn!("coordinator: failed to match subscribers for publish: {err}");
            }
        }

        let event = BridgeEvent {
            client_id: client_id.to_string(),
            topic: packet.topic().to_string(),
            qos: packet.qos(),
            payload: packet.payload().to_vec(),
            retain: packet.retain(),
            timestamp: now_unix(),
            direction: Direction::Inbound,
        };
        if let Err(err) = self.bridge.publish(&event) {
            log::error!("coordinator: bridge publish failed: {err}");
        }

        if packet.retain() {
            if let Err(err) = self.matcher.retain(packet) {
                log::warn!("coordinator: failed to update retained state: {err}");
            }
        }
    }

    fn deliver(self: &Arc<Self>, handle: ClientHandle, packet: &PublishPacket, granted: QoS) {
        let delivered_qos = packet.qos().min(granted);
        let mut outgoing = packet.clone();
        outgoing.set_qos(delivered_qos);
        let coordinator = Arc::clone(self);
        let key = handle.client_id().to_string();
        let task_handle = handle.clone();
        let submitted = self.pool.submit(
            &key,
            Box::new(move || {
                let Some(connection) = coordinator.connection_for(&task_handle) else {
                    log::debug!("coordinator: dropping delivery to stale handle {task_handle}");
                    return;
                };
                if let Err(err) = connection.send(codec::Packet::Publish(outgoing)) {
                    log::warn!("coordinator: delivery to {task_handle} failed: {err}");
                }
            }),
        );
        if let Err(err) = submitted {
            log::warn!("coordinator: could not enqueue delivery to {handle}: {err}");
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::bridge::NullBridge;
    use crate::connection::test_support::RecordingConnection;
    use codec::Packet;

    fn coordinator() -> Arc<BrokerCoordinator> {
        Arc::new(
            BrokerCoordinator::new(Config::default(), Box::new(NullBridge), Box::new(AllowAll)).unwrap(),
        )
    }

    #[test]
    fn unknown_topics_provider_name_is_rejected_at_construction() {
        let mut config = Config::default();
        config.set_topics_provider("disk");
        assert!(BrokerCoordinator::new(config, Box::new(NullBridge), Box::new(AllowAll)).is_err());
    }

    #[test]
    fn publish_delivers_to_matching_subscriber_with_min_qos() {
        let coord = coordinator();
        let handle = ClientHandle::new("sub1", coord.next_epoch("sub1"));
        let conn = Arc::new(RecordingConnection::default());
        coord.register_connection(handle.clone(), conn.clone());
        coord.matcher().subscribe("a/b", 0, &handle).unwrap();

        let publish = PublishPacket::new("a/b", QoS::AtLeastOnce, b"hi".to_vec()).unwrap();
        coord.publish("pub1", publish);
        coord.pool.submit("barrier", Box::new(|| {})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let sent = conn.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Packet::Publish(p) => assert_eq!(p.qos(), QoS::AtMostOnce),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn stale_handle_is_a_silent_no_op() {
        let coord = coordinator();
        let handle = ClientHandle::new("sub1", 0);
        coord.matcher().subscribe("a/b", 0, &handle).unwrap();
        // No connection registered for this handle: delivery should not panic.
        let publish = PublishPacket::new("a/b", QoS::AtMostOnce, b"hi".to_vec()).unwrap();
        coord.publish("pub1", publish);
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    #[test]
    fn retain_flag_updates_retained_trie() {
        let coord = coordinator();
        let mut publish = PublishPacket::new("a/b", QoS::AtMostOnce, b"hi".to_vec()).unwrap();
        publish.set_retain(true);
        coord.publish("pub1", publish);
        assert_eq!(coord.matcher().retained("a/b").unwrap().len(), 1);
    }
}
