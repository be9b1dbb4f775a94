// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Worker Pool (spec §4.D): N single-consumer FIFO shards, keyed by a
//! hashed client id, so all of one client's packet-handling tasks run in
//! submission order while different clients run in parallel.

use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::JoinHandle;

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a, used to pick a shard for a given key (spec §4.D).
fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A fixed set of FIFO shards, each with exactly one consumer thread.
pub struct WorkerPool {
    senders: Vec<SyncSender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// `shard_count` is clamped up to 1. `queue_depth` is each shard's
    /// bounded buffer capacity (spec §6 `queue_depth`, default 1024).
    #[must_use]
    pub fn new(shard_count: usize, queue_depth: usize) -> Self {
        let shard_count = shard_count.max(1);
        let mut senders = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);

        for _ in 0..shard_count {
            let (tx, rx) = sync_channel::<Task>(queue_depth);
            let handle = std::thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            });
            senders.push(tx);
            workers.push(handle);
        }

        Self { senders, workers }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    /// Pick `key`'s shard, independent of submission (used by callers that
    /// need to reason about affinity without enqueuing).
    #[must_use]
    pub fn shard_for(&self, key: &str) -> usize {
        (fnv1a64(key.as_bytes()) % self.senders.len() as u64) as usize
    }

    /// Enqueue `task` onto `key`'s shard. Blocks while that shard's buffer
    /// is full (backpressure, spec §7 -- not an error); returns
    /// [`Error::ShardClosed`] only if the shard has already been closed.
    pub fn submit(&self, key: &str, task: Task) -> Result<()> {
        let shard = self.shard_for(key);
        self.senders[shard].send(task).map_err(|_| Error::ShardClosed)
    }

    /// Close every shard and wait for its consumer to drain. All-or-nothing:
    /// consumes `self` so no further submissions are possible afterward.
    pub fn close(self) {
        drop(self.senders);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn s5_per_client_ordering() {
        let pool = WorkerPool::new(4, 1024);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..1000 {
            let log = Arc::clone(&log);
            pool.submit("C1", Box::new(move || log.lock().unwrap().push(i)))
                .unwrap();
        }
        pool.close();
        let got = log.lock().unwrap().clone();
        let expected: Vec<i32> = (0..1000).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn different_keys_may_land_on_different_shards() {
        let pool = WorkerPool::new(8, 16);
        let shard_a = pool.shard_for("alice");
        let shard_b = pool.shard_for("alice");
        assert_eq!(shard_a, shard_b, "same key always hashes to same shard");
    }

    #[test]
    fn shard_count_is_clamped_to_at_least_one() {
        let pool = WorkerPool::new(0, 4);
        assert_eq!(pool.shard_count(), 1);
        pool.close();
    }

    #[test]
    fn submit_after_close_is_an_error() {
        let pool = WorkerPool::new(1, 1);
        let sender = pool.senders[0].clone();
        pool.close();
        assert!(sender.send(Box::new(|| {})).is_err());
    }
}
