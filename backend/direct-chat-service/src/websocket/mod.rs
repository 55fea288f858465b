use crate::services::clock::Clock;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub mod message_types;
pub mod router;

/// Unique identifier for one live WebSocket connection
///
/// A user with several devices has one `ConnectionId` per device. Ids are
/// never reused, so a stale id can only ever address a connection that is
/// already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
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

/// Presence transition caused by a registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    BecameOnline,
    BecameOffline { last_seen: DateTime<Utc> },
    Unchanged,
}

/// Outbound channel of one connection. Frames are serialized JSON text.
pub type FrameSender = UnboundedSender<String>;

/// Maps users to their live connections.
///
/// Both directions live in DashMaps, so operations on different users only
/// contend on a shard lock. A user's presence flips online with its first
/// connection and offline when its last one is removed; the per-user entry
/// lock makes that decision atomic.
#[derive(Clone)]
pub struct ConnectionRegistry {
    by_user: Arc<DashMap<Uuid, HashMap<ConnectionId, FrameSender>>>,
    by_connection: Arc<DashMap<ConnectionId, Uuid>>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            by_user: Arc::new(DashMap::new()),
            by_connection: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Attach `connection_id` to `user_id`.
    ///
    /// Re-registering the same pair only replaces the sender. A connection id
    /// already owned by another user is moved.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        sender: FrameSender,
    ) -> PresenceChange {
        if let Some(previous) = self.by_connection.insert(connection_id, user_id) {
            if previous != user_id {
                tracing::warn!(
                    connection_id = %connection_id,
                    previous_user = %previous,
                    user_id = %user_id,
                    "connection re-registered under a different user"
                );
                self.detach(connection_id, previous);
            }
        }

        let mut connections = self.by_user.entry(user_id).or_default();
        let first = connections.is_empty();
        connections.insert(connection_id, sender);

        tracing::debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            connections = connections.len(),
            "connection registered"
        );

        if first {
            PresenceChange::BecameOnline
        } else {
            PresenceChange::Unchanged
        }
    }

    /// Remove `connection_id`. Returns the owning user and whether it went
    /// offline; `None` for unknown ids.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(Uuid, PresenceChange)> {
        let (_, user_id) = self.by_connection.remove(&connection_id)?;
        let change = self.detach(connection_id, user_id);

        tracing::debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            ?change,
            "connection unregistered"
        );
        Some((user_id, change))
    }

    fn detach(&self, connection_id: ConnectionId, user_id: Uuid) -> PresenceChange {
        match self.by_user.entry(user_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().remove(&connection_id);
                if entry.get().is_empty() {
                    entry.remove();
                    PresenceChange::BecameOffline {
                        last_seen: self.clock.now(),
                    }
                } else {
                    PresenceChange::Unchanged
                }
            }
            Entry::Vacant(_) => PresenceChange::Unchanged,
        }
    }

    pub fn user_for(&self, connection_id: ConnectionId) -> Option<Uuid> {
        self.by_connection.get(&connection_id).map(|u| *u.value())
    }

    pub fn connections_for(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|conns| conns.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Send `frame` to every live connection of `user_id`.
    ///
    /// Connections whose channel is closed are skipped but stay registered;
    /// only `unregister` removes a connection, so presence transitions are
    /// reported exactly once.
    pub fn send_to_user(&self, user_id: Uuid, frame: &str) -> usize {
        let Some(connections) = self.by_user.get(&user_id) else {
            return 0;
        };
        let mut reached = 0;
        for (connection_id, sender) in connections.iter() {
            if sender.send(frame.to_string()).is_ok() {
                reached += 1;
            } else {
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %connection_id,
                    "frame dropped, connection closing"
                );
            }
        }
        reached
    }

    pub fn send_to_connection(&self, connection_id: ConnectionId, frame: &str) -> bool {
        let Some(user_id) = self.user_for(connection_id) else {
            return false;
        };
        self.by_user
            .get(&user_id)
            .and_then(|conns| {
                conns
                    .get(&connection_id)
                    .map(|sender| sender.send(frame.to_string()).is_ok())
            })
            .unwrap_or(false)
    }

    /// Send `frame` to every connection of every user except `user_id`.
    pub fn broadcast_except(&self, user_id: Uuid, frame: &str) -> usize {
        let mut reached = 0;
        for entry in self.by_user.iter() {
            if *entry.key() == user_id {
                continue;
            }
            for sender in entry.value().values() {
                if sender.send(frame.to_string()).is_ok() {
                    reached += 1;
                }
            }
        }
        reached
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.by_user
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self
            .by_user
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        users.sort();
        users
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }
}
