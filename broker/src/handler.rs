// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Client Handler (spec §4.E): the per-connection packet state machine.
//!
//! One [`ClientHandler`] is constructed per accepted connection and fed
//! every packet the framing layer decodes, in order, on the Worker Pool
//! shard for that connection's client id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use codec::{
    ConnectAckPacket, ConnectPacket, ConnectReturnCode, DisconnectPacket, Packet, PacketId,
    PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAck, SubscribeAckPacket,
    SubscribePacket, UnsubscribeAckPacket, UnsubscribePacket,
};

use crate::connection::Connection;
use crate::coordinator::BrokerCoordinator;
use crate::error::{Error, Result};
use crate::handle::ClientHandle;
use crate::session::Session;

/// Whether a failure should close the connection (protocol errors
/// post-CONNECT, per spec §7) or merely be logged and the packet dropped
/// (state errors).
fn closes_connection(err: &Error) -> bool {
    matches!(
        err,
        Error::WildcardNotLast
            | Error::WildcardNotWholeLevel
            | Error::SystemTopic
            | Error::WillTooLarge
    )
}

struct Authed {
    handle: ClientHandle,
    session: Arc<Session>,
}

enum State {
    New,
    Authed(Authed),
    Closed,
}

/// Per-connection state machine. `Send + Sync` so it can sit behind the
/// `Arc` a delivery task captures alongside the registered [`Connection`].
pub struct ClientHandler {
    coordinator: Arc<BrokerCoordinator>,
    connection: Arc<dyn Connection>,
    state: Mutex<State>,
    pending_qos2: Mutex<HashMap<u16, PublishPacket>>,
    last_activity: Mutex<Instant>,
}

impl ClientHandler {
    #[must_use]
    pub fn new(coordinator: Arc<BrokerCoordinator>, connection: Arc<dyn Connection>) -> Self {
        Self {
            coordinator,
            connection,
            state: Mutex::new(State::New),
            pending_qos2: Mutex::new(HashMap::new()),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Whether no packet (including PINGREQ) has arrived within `max_idle`.
    /// Checked by an external timer loop the listener owns (spec §5
    /// "Keepalive timeout is enforced by the Client Handler, not the pool").
    #[must_use]
    pub fn is_expired(&self, max_idle: Duration) -> bool {
        self.last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .elapsed()
            > max_idle
    }

    fn send(&self, packet: Packet) {
        if let Err(err) = self.connection.send(packet) {
            log::warn!("handler: write failed, treating as closed: {err}");
        }
    }

    fn client_id(&self) -> Option<String> {
        match &*self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) {
            State::Authed(authed) => Some(authed.handle.client_id().to_string()),
            State::New | State::Closed => None,
        }
    }

    /// Dispatch one decoded packet. `Err` means the caller should close the
    /// underlying transport after this call returns (protocol violation);
    /// state errors are logged internally and do not propagate.
    pub fn handle(&self, packet: Packet) -> Result<()> {
        self.touch();
        match packet {
            Packet::Connect(connect) => self.handle_connect(&connect),
            Packet::Subscribe(subscribe) => self.handle_subscribe(&subscribe),
            Packet::Unsubscribe(unsubscribe) => self.handle_unsubscribe(&unsubscribe),
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::PublishRelease(release) => self.handle_publish_release(&release),
            Packet::PingRequest(_) => self.handle_ping(),
            Packet::Disconnect(_) => self.handle_disconnect(),
            other => {
                log::warn!("handler: unexpected packet in this direction: {other:?}");
                Ok(())
            }
        }
    }

    fn handle_connect(&self, connect: &ConnectPacket) -> Result<()> {
        {
            let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if !matches!(*state, State::New) {
                return Err(Error::ConnectionClosed("duplicate CONNECT".to_string()));
            }
        }

        if !self.coordinator.authenticator().check(
            connect.client_id(),
            connect.username(),
            connect.password(),
        ) {
            self.send(Packet::ConnectAck(ConnectAckPacket::new(
                false,
                ConnectReturnCode::NotAuthorized,
            )));
            self.connection.close();
            *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = State::Closed;
            return Ok(());
        }

        let sessions = self.coordinator.sessions();
        let keepalive_max = self.coordinator.config().keepalive_max();
        let requested_id = connect.client_id();
        let existing = if requested_id.is_empty() {
            None
        } else {
            sessions.get(requested_id)
        };

        let (session, session_present) = if connect.clean_session() {
            if let Some(prior) = existing {
                sessions.del(prior.id());
            }
            (sessions.new_session(requested_id), false)
        } else if let Some(prior) = existing {
            prior.update(connect, keepalive_max);
            (prior, true)
        } else {
            (sessions.new_session(requested_id), false)
        };

        if !session_present {
            if let Err(err) = session.initialise(connect, keepalive_max) {
                self.send(Packet::ConnectAck(ConnectAckPacket::new(
                    false,
                    ConnectReturnCode::ServerUnavailable,
                )));
                self.connection.close();
                *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = State::Closed;
                log::warn!("handler: CONNECT rejected for {}: {err}", session.id());
                self.coordinator.sessions().del(session.id());
                return Ok(());
            }
        }

        let epoch = self.coordinator.next_epoch(session.id());
        let handle = ClientHandle::new(session.id(), epoch);
        self.coordinator.register_connection(handle.clone(), Arc::clone(&self.connection));

        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            State::Authed(Authed { handle, session });

        self.send(Packet::ConnectAck(ConnectAckPacket::new(
            session_present,
            ConnectReturnCode::Accepted,
        )));
        Ok(())
    }

    fn with_authed<T>(&self, f: impl FnOnce(&Authed) -> T) -> Option<T> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match &*state {
            State::Authed(authed) => Some(f(authed)),
            State::New | State::Closed => None,
        }
    }

    fn handle_subscribe(&self, subscribe: &SubscribePacket) -> Result<()> {
        let Some((handle, session)) =
            self.with_authed(|a| (a.handle.clone(), Arc::clone(&a.session)))
        else {
            return Err(Error::ConnectionClosed("SUBSCRIBE before CONNECT".to_string()));
        };

        let mut acks = Vec::with_capacity(subscribe.topics().len());
        let mut newly_granted = Vec::new();
        for topic in subscribe.topics() {
            match self
                .coordinator
                .matcher()
                .subscribe(topic.topic(), topic.qos().into(), &handle)
            {
                Ok(granted) => {
                    if let Err(err) = session.add_topic(topic.topic(), granted) {
                        log::warn!("handler: session add_topic failed: {err}");
                    }
                    acks.push(SubscribeAck::Success(granted));
                    newly_granted.push((topic.topic().to_string(), granted));
                }
                Err(err) if closes_connection(&err) => return Err(err),
                Err(err) => {
                    log::warn!("handler: subscribe to '{}' rejected: {err}", topic.topic());
                    acks.push(SubscribeAck::Failed);
                }
            }
        }

        self.send(Packet::SubscribeAck(SubscribeAckPacket::new(subscribe.packet_id(), acks)));

        for (filter, granted) in newly_granted {
            match self.coordinator.matcher().retained(&filter) {
                Ok(messages) => {
                    for mut message in messages {
                        message.set_qos(message.qos().min(granted));
                        self.send(Packet::Publish(message));
                    }
                }
                Err(err) => log::warn!("handler: retained replay for '{filter}' failed: {err}"),
            }
        }
        Ok(())
    }

    fn handle_unsubscribe(&self, unsubscribe: &UnsubscribePacket) -> Result<()> {
        let Some((handle, session)) =
            self.with_authed(|a| (a.handle.clone(), Arc::clone(&a.session)))
        else {
            return Err(Error::ConnectionClosed("UNSUBSCRIBE before CONNECT".to_string()));
        };

        for filter in unsubscribe.topics() {
            match self.coordinator.matcher().unsubscribe(filter, Some(&handle)) {
                Ok(()) => {
                    if let Err(err) = session.remove_topic(filter) {
                        log::warn!("handler: session remove_topic failed: {err}");
                    }
                }
                Err(err) if closes_connection(&err) => return Err(err),
                Err(err) => log::warn!("handler: unsubscribe from '{filter}' failed: {err}"),
            }
        }

        self.send(Packet::UnsubscribeAck(UnsubscribeAckPacket::new(unsubscribe.packet_id())));
        Ok(())
    }

    fn handle_publish(&self, publish: PublishPacket) -> Result<()> {
        if self.with_authed(|_| ()).is_none() {
            return Err(Error::ConnectionClosed("PUBLISH before CONNECT".to_string()));
        }

        match publish.qos() {
            QoS::AtMostOnce => self.dispatch_publish(publish),
            QoS::AtLeastOnce => {
                let packet_id = publish.packet_id();
                self.dispatch_publish(publish);
                self.send(Packet::PublishAck(PublishAckPacket::new(packet_id)));
            }
            QoS::ExactOnce => {
                let packet_id = publish.packet_id();
                self.pending_qos2
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(packet_id.value(), publish);
                self.send(Packet::PublishReceived(PublishReceivedPacket::new(packet_id)));
            }
        }
        Ok(())
    }

    fn handle_publish_release(&self, release: &PublishReleasePacket) -> Result<()> {
        let pending = self
            .pending_qos2
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&release.packet_id().value());
        if let Some(publish) = pending {
            self.dispatch_publish(publish);
        } else {
            log::warn!(
                "handler: PUBREL for unknown packet id {}",
                release.packet_id().value()
            );
        }
        self.send(Packet::PublishComplete(PublishCompletePacket::new(release.packet_id())));
        Ok(())
    }

    fn dispatch_publish(&self, publish: PublishPacket) {
        let Some(client_id) = self.client_id() else {
            return;
        };
        self.coordinator.publish(&client_id, publish);
    }

    fn handle_ping(&self) -> Result<()> {
        self.send(Packet::PingResponse(PingResponsePacket));
        Ok(())
    }

    fn handle_disconnect(&self) -> Result<()> {
        let Some((handle, session)) =
            self.with_authed(|a| (a.handle.clone(), Arc::clone(&a.session)))
        else {
            self.connection.close();
            return Ok(());
        };

        session.set_will_flag(false);
        if session.clean_session() {
            self.coordinator.sessions().del(session.id());
        }
        self.coordinator.unregister_connection(&handle);
        self.connection.close();
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = State::Closed;
        Ok(())
    }

    /// Called by the listener on an I/O error or keepalive expiry, i.e. any
    /// ungraceful close (spec §4.E `CLOSED_UNCLEAN`): publish the will if
    /// one is still armed.
    pub fn handle_ungraceful_close(&self) {
        let Some((handle, session)) =
            self.with_authed(|a| (a.handle.clone(), Arc::clone(&a.session)))
        else {
            return;
        };

        if let Some(will) = session.will() {
            self.coordinator.publish(session.id(), will);
        }
        self.coordinator.unregister_connection(&handle);
        self.connection.close();
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = State::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, Authenticator};
    use crate::bridge::NullBridge;
    use crate::config::Config;
    use crate::connection::test_support::RecordingConnection;

    struct DenyAll;
    impl Authenticator for DenyAll {
        fn check(&self, _client_id: &str, _username: &str, _password: &[u8]) -> bool {
            false
        }
    }

    fn handler_with_auth(auth: Box<dyn Authenticator>) -> (ClientHandler, Arc<RecordingConnection>) {
        let coordinator = Arc::new(
            BrokerCoordinator::new(Config::default(), Box::new(NullBridge), auth).unwrap(),
        );
        let connection = Arc::new(RecordingConnection::default());
        let handler = ClientHandler::new(coordinator, connection.clone());
        (handler, connection)
    }

    fn handler() -> (ClientHandler, Arc<RecordingConnection>) {
        handler_with_auth(Box::new(AllowAll))
    }

    #[test]
    fn connect_clamps_keepalive_to_configured_max() {
        let mut config = Config::default();
        config.set_keepalive_max(30);
        let coordinator = Arc::new(
            BrokerCoordinator::new(config, Box::new(NullBridge), Box::new(AllowAll)).unwrap(),
        );
        let connection = Arc::new(RecordingConnection::default());
        let handler = ClientHandler::new(Arc::clone(&coordinator), connection);
        handler
            .handle(Packet::Connect(ConnectPacket::new("c1", 120, false)))
            .unwrap();
        let session = coordinator.sessions().get("c1").unwrap();
        assert_eq!(session.keep_alive(), 30);
    }

    #[test]
    fn connect_then_subscribe_then_publish_roundtrip() {
        let (handler, connection) = handler();
        handler
            .handle(Packet::Connect(ConnectPacket::new("c1", 60, true)))
            .unwrap();
        handler
            .handle(Packet::Subscribe(SubscribePacket::new(
                PacketId::new(1),
                vec![codec::SubscribeTopic::new("a/b".to_string(), QoS::AtMostOnce)],
            )))
            .unwrap();

        let sent = connection.sent.lock().unwrap();
        assert!(matches!(sent[0], Packet::ConnectAck(_)));
        assert!(matches!(sent[1], Packet::SubscribeAck(_)));
    }

    #[test]
    fn rejected_connect_sends_failure_and_closes() {
        let (handler, connection) = handler_with_auth(Box::new(DenyAll));
        handler
            .handle(Packet::Connect(ConnectPacket::new("c1", 60, true)))
            .unwrap();
        let sent = connection.sent.lock().unwrap();
        match &sent[0] {
            Packet::ConnectAck(ack) => {
                assert!(!ack.session_present());
                assert_eq!(ack.return_code(), ConnectReturnCode::NotAuthorized);
            }
            other => panic!("unexpected packet {other:?}"),
        }
        assert!(*connection.closed.lock().unwrap());
    }

    #[test]
    fn packet_before_connect_is_a_protocol_error() {
        let (handler, _connection) = handler();
        let publish = PublishPacket::new("a/b", QoS::AtMostOnce, b"x".to_vec()).unwrap();
        assert!(handler.handle(Packet::Publish(publish)).is_err());
    }

    #[test]
    fn s4_clean_disconnect_suppresses_will() {
        let coordinator = Arc::new(
            BrokerCoordinator::new(Config::default(), Box::new(NullBridge), Box::new(AllowAll)).unwrap(),
        );
        let conn1 = Arc::new(RecordingConnection::default());
        let handler1 = ClientHandler::new(Arc::clone(&coordinator), conn1);
        let connect = ConnectPacket::new("c1", 60, false).set_will(
            "bye",
            b"later".to_vec(),
            QoS::AtLeastOnce,
            false,
        );
        handler1.handle(Packet::Connect(connect)).unwrap();
        handler1.handle(Packet::Disconnect(DisconnectPacket)).unwrap();

        let session = coordinator.sessions().get("c1").unwrap();
        assert!(!session.will_flag(), "clean DISCONNECT must suppress the will");

        let conn2 = Arc::new(RecordingConnection::default());
        let handler2 = ClientHandler::new(Arc::clone(&coordinator), conn2);
        let reconnect = ConnectPacket::new("c1", 60, false);
        handler2.handle(Packet::Connect(reconnect)).unwrap();
        let session = coordinator.sessions().get("c1").unwrap();
        assert!(session.clean_session());
    }

    #[test]
    fn qos2_publish_defers_dispatch_until_release() {
        let (handler, connection) = handler();
        handler
            .handle(Packet::Connect(ConnectPacket::new("c1", 60, true)))
            .unwrap();
        let mut publish = PublishPacket::new("a/b", QoS::ExactOnce, b"x".to_vec()).unwrap();
        publish.set_packet_id(PacketId::new(7));
        handler.handle(Packet::Publish(publish)).unwrap();
        {
            let sent = connection.sent.lock().unwrap();
            assert!(matches!(sent.last().unwrap(), Packet::PublishReceived(_)));
        }
        handler
            .handle(Packet::PublishRelease(PublishReleasePacket::new(PacketId::new(7))))
            .unwrap();
        let sent = connection.sent.lock().unwrap();
        assert!(matches!(sent.last().unwrap(), Packet::PublishComplete(_)));
    }
}
