// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Typed error kinds for the matching-and-fan-out kernel.
//!
//! Grouped the way the spec's error-handling design groups them: protocol,
//! state, resource, io. Each kind is its own `thiserror` variant group rather
//! than a flat string, so callers can match on what went wrong instead of
//! grepping a message.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // -- protocol: malformed packet, invalid wildcard placement, bad QoS, publish-to-`$` --
    #[error("multi-level wildcard '#' must be the final filter level")]
    WildcardNotLast,

    #[error("wildcard characters '#'/'+' must occupy an entire filter level")]
    WildcardNotWholeLevel,

    #[error("cannot publish or subscribe to '$'-prefixed system topic")]
    SystemTopic,

    #[error("will topic or payload exceeds the two-byte length prefix")]
    WillTooLarge,

    // -- state: session lifecycle, unknown provider, unknown subscriber --
    #[error("session '{0}' already initialised")]
    SessionAlreadyInitialised(String),

    #[error("session '{0}' not yet initialised")]
    SessionNotInitialised(String),

    #[error("no session found for client id '{0}'")]
    SessionNotFound(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("no subscriber found to remove for filter '{0}'")]
    SubscriberNotFound(String),

    #[error("no retained/subscription node found for filter '{0}'")]
    NoSuchTopic(String),

    // -- resource: backpressure --
    #[error("worker pool shard is closed")]
    ShardClosed,

    // -- io: connection closed mid-handshake --
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}
