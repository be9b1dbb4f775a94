// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The matching-and-fan-out kernel of an MQTT 3.1.1 broker: a topic
//! matcher, a session store, a sharded worker pool, and the per-connection
//! and coordinator logic that ties them together.
//!
//! This crate never touches a socket. A listener crate owns TCP/TLS
//! accept loops and wire framing, decodes bytes into [`codec::Packet`]
//! values, and drives a [`ClientHandler`] per connection; this crate
//! supplies everything past that boundary.

mod auth;
mod bridge;
mod config;
mod connection;
mod coordinator;
mod error;
mod handle;
mod handler;
mod matcher;
mod pool;
mod session;

pub use auth::{AllowAll, Authenticator};
pub use bridge::{BridgeEvent, BridgeSink, Direction, NullBridge};
pub use config::Config;
pub use connection::Connection;
pub use coordinator::BrokerCoordinator;
pub use error::{Error, Result};
pub use handle::ClientHandle;
pub use handler::ClientHandler;
pub use matcher::{topics_provider_by_name, TopicMatcher};
pub use pool::WorkerPool;
pub use session::{provider_by_name, MemSessionStore, Session, SessionManager, SessionProvider};
