//! Realtime notification channel.
//!
//! | Module   | Responsibility                                            |
//! |----------|-----------------------------------------------------------|
//! | `events` | Typed wire contract: `ServerEvent` / `ClientEvent`        |
//! | `router` | `RoomRouter`: connection registry, room join/emit/list    |
//! | `ws`     | Connection lifecycle: auth → join rooms → active → close  |
//!
//! Connections authenticate with a bearer token at upgrade time, land in
//! their per-user room (`user:<id>`) plus the `admins` room when the role
//! allows, and receive addressed or broadcast events fanned out by the
//! router. Delivery is fire-and-forget: no persistence, no replay, no
//! acknowledgment.

pub mod events;
pub mod router;
pub mod ws;

pub use events::{ClientEvent, ServerEvent};
pub use router::{ADMIN_ROOM, ClientInfo, ConnectionId, EmitTarget, RoomRouter, user_room};
