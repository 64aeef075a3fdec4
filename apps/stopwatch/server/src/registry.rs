use std::{collections::HashMap, fmt};

use slab::Slab;
use stopwatch_core::ServerEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one viewer connection, used in logs and as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending half of a connection's writer queue.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMetrics {
    pub delivered: usize,
    pub closed: usize,
}

/// Open connection handles owned by the timekeeper.
#[derive(Default)]
pub struct ConnectionRegistry {
    slab: Slab<ConnectionEntry>,
    index_map: HashMap<ConnectionId, usize>,
}

struct ConnectionEntry {
    id: ConnectionId,
    sender: EventSender,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.index_map.contains_key(&id)
    }

    /// Registers a connection and returns the number of active connections.
    pub fn add(&mut self, id: ConnectionId, sender: EventSender) -> usize {
        if let Some(index) = self.index_map.remove(&id) {
            self.slab.remove(index);
        }
        let key = self.slab.insert(ConnectionEntry { id, sender });
        self.index_map.insert(id, key);
        self.slab.len()
    }

    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.index_map.remove(&id) {
            Some(index) => {
                self.slab.remove(index);
                true
            }
            None => false,
        }
    }

    /// Sends to a single connection, evicting it if its writer is gone.
    pub fn send_to(&mut self, id: ConnectionId, event: ServerEvent) -> bool {
        let Some(index) = self.index_map.get(&id).copied() else {
            return false;
        };
        let delivered = self
            .slab
            .get(index)
            .map(|entry| entry.sender.send(event).is_ok())
            .unwrap_or(false);
        if !delivered {
            self.evict(index);
        }
        delivered
    }

    /// Fans an event out to every connection, skipping and evicting those
    /// whose writer side has already closed.
    pub fn broadcast(&mut self, event: ServerEvent) -> BroadcastMetrics {
        let mut metrics = BroadcastMetrics::default();
        let mut closed = Vec::new();
        for (index, entry) in self.slab.iter() {
            if entry.sender.send(event).is_ok() {
                metrics.delivered += 1;
            } else {
                closed.push(index);
            }
        }
        metrics.closed = closed.len();
        for index in closed {
            self.evict(index);
        }
        metrics
    }

    fn evict(&mut self, index: usize) {
        if let Some(entry) = self.slab.try_remove(index) {
            self.index_map.remove(&entry.id);
        }
    }
}
