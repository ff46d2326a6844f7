//! # easel-sync: Real-time synchronization for a shared drawing canvas
//!
//! One authority process holds, per room, an ordered log of committed
//! strokes and the set of connected participants. Participants draw
//! optimistically and reconcile against the authority's log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     WebSocket      ┌──────────────────┐
//! │ SyncClient       │ ◄────────────────► │ SyncServer       │
//! │ CanvasReconciler │     JSON events    │ (authority)      │
//! └────────┬─────────┘                    └────────┬─────────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌──────────────────┐                    ┌──────────────────┐
//! │ RenderSurface    │                    │ RoomRegistry     │
//! │ (clear / draw)   │                    │  ├ OperationLog  │
//! └──────────────────┘                    │  ├ PresenceTable │
//!                                         │  └ BroadcastGroup│
//!                                         └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events and the canvas data model
//! - [`oplog`]: per-room commit log with global undo
//! - [`presence`]: participants, colours and cursors
//! - [`room`]: room lifecycle and the registry of live rooms
//! - [`broadcast`]: per-participant outboxes and room fan-out
//! - [`session`]: per-connection protocol state machine
//! - [`server`]: WebSocket authority
//! - [`client`]: WebSocket client
//! - [`reconcile`]: optimistic local rendering reconciled with the log
//! - [`simplify`]: Douglas–Peucker path simplification

pub mod protocol;
pub mod oplog;
pub mod presence;
pub mod room;
pub mod broadcast;
pub mod session;
pub mod server;
pub mod client;
pub mod reconcile;
pub mod simplify;

// Re-exports for convenience
pub use protocol::{
    ClientMessage, Operation, OperationId, Participant, ParticipantId, Point, ProtocolError,
    RegistryStats, RoomStats, ServerMessage, StrokeDraft, StrokeStyle, Tool,
};
pub use oplog::OperationLog;
pub use presence::{Cursor, PresenceTable, PALETTE};
pub use room::{Room, RoomRegistry};
pub use broadcast::{Audience, BroadcastGroup, BroadcastStats, Outbox, OutboxReceiver};
pub use session::{ChannelState, ParticipantSession};
pub use server::{ServerConfig, ServerError, ServerStats, SyncServer};
pub use client::{ClientConfig, ConnectionState, SyncClient, SyncEvent};
pub use reconcile::{CanvasReconciler, FrameRecorder, RenderCommand, RenderSurface, StrokePhase};
pub use simplify::simplify;
