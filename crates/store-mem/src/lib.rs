//! In-memory `ChatService` backend: one authoritative `RoomState` per room,
//! held in a process-wide map, periodically flushed to a snapshot store so a
//! restart can rebuild state without a SQL server. Intended for small
//! deployments and tests, not for multi-process fleets — there is no
//! cross-process coordination of any kind.

pub mod room_state;
pub mod service;
pub mod snapshot;

pub use service::ChitterMem;
pub use snapshot::{FileSnapshotStore, SnapshotStore};
