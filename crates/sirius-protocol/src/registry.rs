// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Connection registry — which device addresses currently have a live session.
//
// The key space is split over a fixed set of shards, each behind its own
// reader/writer lock, so a (re)connecting device only ever blocks lookups
// that hash to the same shard.  Lookups clone an `Arc` and release the lock
// immediately; no lock is held across an await.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sirius_core::types::{ConnectionId, DeviceAddress};
use tracing::debug;

use crate::session::DeviceSession;

const SHARD_COUNT: usize = 16;

type Shard = RwLock<HashMap<DeviceAddress, Arc<DeviceSession>>>;

/// Concurrency-safe map from device address to its live session.
///
/// Entries are created when a device completes its handshake and removed
/// when its connection ends.  Constructed once and shared by reference.
pub struct ConnectionRegistry {
    shards: Vec<Shard>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::default()).collect(),
        }
    }

    fn shard(&self, address: &DeviceAddress) -> &Shard {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    fn read(shard: &Shard) -> RwLockReadGuard<'_, HashMap<DeviceAddress, Arc<DeviceSession>>> {
        shard.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(shard: &Shard) -> RwLockWriteGuard<'_, HashMap<DeviceAddress, Arc<DeviceSession>>> {
        shard.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `session` under its address.
    ///
    /// Returns the session it displaced, if the device was already
    /// connected.  The caller decides what to do with the old one.
    pub fn register(&self, session: Arc<DeviceSession>) -> Option<Arc<DeviceSession>> {
        let address = session.address().clone();
        let previous = Self::write(self.shard(&address)).insert(address.clone(), session);
        debug!(device = %address, replaced = previous.is_some(), "session registered");
        previous
    }

    pub fn lookup(&self, address: &DeviceAddress) -> Option<Arc<DeviceSession>> {
        Self::read(self.shard(address)).get(address).cloned()
    }

    /// Remove whatever session is registered for `address`.
    pub fn unregister(&self, address: &DeviceAddress) -> Option<Arc<DeviceSession>> {
        let removed = Self::write(self.shard(address)).remove(address);
        if removed.is_some() {
            debug!(device = %address, "session unregistered");
        }
        removed
    }

    /// Remove the entry for `address` only if it still belongs to
    /// `connection`.  A connection tearing down after a reconnect replaced
    /// it leaves the newer session in place.
    pub fn unregister_connection(&self, address: &DeviceAddress, connection: ConnectionId) -> bool {
        let mut shard = Self::write(self.shard(address));
        match shard.get(address) {
            Some(current) if current.connection_id() == connection => {
                shard.remove(address);
                debug!(device = %address, %connection, "session unregistered");
                true
            }
            _ => false,
        }
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| Self::read(s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Addresses of every registered device, sorted.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let mut all: Vec<DeviceAddress> = self
            .shards
            .iter()
            .flat_map(|s| Self::read(s).keys().cloned().collect::<Vec<_>>())
            .collect();
        all.sort();
        all
    }

    /// Remove every session, returning them.
    pub fn drain(&self) -> Vec<Arc<DeviceSession>> {
        self.shards
            .iter()
            .flat_map(|s| Self::write(s).drain().map(|(_, v)| v).collect::<Vec<_>>())
            .collect()
    }
}
