//! Room-addressed fan-out over live connections.
//!
//! The router is an explicitly constructed instance owned by the process's
//! composition root and shared via `Arc` with every component that emits —
//! there is no hidden global. Membership is derived from live connections
//! and vanishes with them; rooms have no independent storage.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{Identity, Role};

use super::events::ServerEvent;

pub type ConnectionId = Uuid;

/// Room holding every admin-role connection.
pub const ADMIN_ROOM: &str = "admins";

/// Name of the per-user room for a given user id.
pub fn user_room(user_id: i64) -> String {
    format!("user:{}", user_id)
}

/// Emission target: one named room or every connection.
#[derive(Debug, Clone, Copy)]
pub enum EmitTarget<'a> {
    All,
    Room(&'a str),
}

struct ConnectionEntry {
    identity: Identity,
    rooms: HashSet<String>,
    tx: mpsc::UnboundedSender<String>,
    connected_at: DateTime<Utc>,
}

/// Snapshot of one connected session for administrative introspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub rooms: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct RoomRouter {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("connection table lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Register a freshly authenticated connection and join its rooms:
    /// its own per-user room, plus the admin room iff its role is admin.
    /// Returns the joined room list for the welcome acknowledgment.
    pub fn register(
        &self,
        id: ConnectionId,
        identity: Identity,
        tx: mpsc::UnboundedSender<String>,
    ) -> Vec<String> {
        let mut rooms = HashSet::new();
        rooms.insert(user_room(identity.user_id));
        if identity.role == Role::Admin {
            rooms.insert(ADMIN_ROOM.to_string());
        }
        let mut joined: Vec<String> = rooms.iter().cloned().collect();
        joined.sort();

        let is_admin = identity.role == Role::Admin;
        let email = identity.email.clone();
        self.table().insert(
            id,
            ConnectionEntry {
                identity,
                rooms,
                tx,
                connected_at: Utc::now(),
            },
        );
        info!(socket = %id, %email, rooms = ?joined, "client registered");
        if is_admin {
            info!(%email, "admin joined admin room");
        }
        joined
    }

    /// Add a connection to a room. Idempotent; returns false for an
    /// unknown connection.
    pub fn join(&self, id: ConnectionId, room: &str) -> bool {
        match self.table().get_mut(&id) {
            Some(entry) => {
                entry.rooms.insert(room.to_string());
                true
            }
            None => false,
        }
    }

    /// Drop a connection and all of its memberships.
    pub fn remove(&self, id: ConnectionId) -> Option<Identity> {
        self.table().remove(&id).map(|entry| entry.identity)
    }

    /// Deliver an event to every connection in the target room (or every
    /// connection for `All`). Fire-and-forget: a closed or saturated peer
    /// never blocks emission to siblings, and failures are logged, never
    /// returned — fan-out must not abort the calling business operation.
    pub fn emit(&self, target: EmitTarget<'_>, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(event = event.name(), error = %e, "failed to serialize event");
                return;
            }
        };

        let table = self.table();
        let mut delivered = 0usize;
        for entry in table.values() {
            let in_target = match target {
                EmitTarget::All => true,
                EmitTarget::Room(room) => entry.rooms.contains(room),
            };
            if !in_target {
                continue;
            }
            // Receiver may already be gone mid-disconnect; skip silently.
            if entry.tx.send(json.clone()).is_ok() {
                delivered += 1;
            }
        }

        let room = match target {
            EmitTarget::All => "*",
            EmitTarget::Room(room) => room,
        };
        info!(event = event.name(), room, delivered, "event emitted");
    }

    /// Deliver an event to a single connection (welcome ack, pong).
    pub fn emit_to_connection(&self, id: ConnectionId, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(event = event.name(), error = %e, "failed to serialize event");
                return;
            }
        };
        if let Some(entry) = self.table().get(&id) {
            if entry.tx.send(json).is_err() {
                debug!(socket = %id, event = event.name(), "connection gone before delivery");
            }
        }
    }

    /// Snapshot of connection ids currently joined to a room.
    pub fn list_members(&self, room: &str) -> Vec<ConnectionId> {
        self.table()
            .iter()
            .filter(|(_, entry)| entry.rooms.contains(room))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Snapshot of all connected sessions with their room memberships.
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.table()
            .iter()
            .map(|(id, entry)| {
                let mut rooms: Vec<String> = entry.rooms.iter().cloned().collect();
                rooms.sort();
                ClientInfo {
                    id: *id,
                    rooms,
                    connected_at: entry.connected_at,
                }
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.table().len()
    }
}
