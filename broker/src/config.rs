// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Broker core configuration.
//!
//! Loading this from a config file on disk is the CLI collaborator's job;
//! this module only defines the shape and its defaults, the way the
//! teacher's `config` module defines each section's struct and lets the
//! top-level `Config` aggregate them.

use serde::Deserialize;

const fn default_workers() -> usize {
    4
}

fn default_session_provider() -> String {
    "mem".to_string()
}

fn default_topics_provider() -> String {
    "mem".to_string()
}

const fn default_queue_depth() -> usize {
    1024
}

const fn default_keepalive_max() -> u16 {
    3600
}

/// Options the core recognises, per spec §6.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Shard count for the Worker Pool. Clamped up to 1 by [`WorkerPool::new`]
    /// if a caller passes 0.
    ///
    /// [`WorkerPool::new`]: crate::pool::WorkerPool::new
    #[serde(default = "default_workers")]
    workers: usize,

    /// Session Store provider name.
    #[serde(default = "default_session_provider")]
    session_provider: String,

    /// Topic Matcher provider name.
    #[serde(default = "default_topics_provider")]
    topics_provider: String,

    /// Per-shard bounded buffer capacity.
    #[serde(default = "default_queue_depth")]
    queue_depth: usize,

    /// Upper bound on client-advertised keepalive, in seconds.
    #[serde(default = "default_keepalive_max")]
    keepalive_max: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            session_provider: default_session_provider(),
            topics_provider: default_topics_provider(),
            queue_depth: default_queue_depth(),
            keepalive_max: default_keepalive_max(),
        }
    }
}

impl Config {
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn session_provider(&self) -> &str {
        &self.session_provider
    }

    #[must_use]
    pub fn topics_provider(&self) -> &str {
        &self.topics_provider
    }

    #[must_use]
    pub const fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    #[must_use]
    pub const fn keepalive_max(&self) -> u16 {
        self.keepalive_max
    }

    /// Override the topics provider name after construction (a CLI
    /// collaborator loading a config file would instead set this via
    /// `Deserialize`; this setter exists for callers, including tests, that
    /// build a `Config` programmatically).
    pub fn set_topics_provider(&mut self, name: impl Into<String>) -> &mut Self {
        self.topics_provider = name.into();
        self
    }

    /// Override the session provider name after construction; see
    /// [`Self::set_topics_provider`].
    pub fn set_session_provider(&mut self, name: impl Into<String>) -> &mut Self {
        self.session_provider = name.into();
        self
    }

    /// Override the keepalive upper bound after construction; see
    /// [`Self::set_topics_provider`].
    pub fn set_keepalive_max(&mut self, max: u16) -> &mut Self {
        self.keepalive_max = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.workers(), 4);
        assert_eq!(config.session_provider(), "mem");
        assert_eq!(config.topics_provider(), "mem");
        assert_eq!(config.queue_depth(), 1024);
        assert_eq!(config.keepalive_max(), 3600);
    }

    #[test]
    fn setters_override_defaults() {
        let mut config = Config::default();
        config
            .set_topics_provider("disk")
            .set_session_provider("disk")
            .set_keepalive_max(30);
        assert_eq!(config.topics_provider(), "disk");
        assert_eq!(config.session_provider(), "disk");
        assert_eq!(config.keepalive_max(), 30);
    }
}
