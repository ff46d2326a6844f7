//! Room registry: every room's operation log, presence table and
//! broadcast group.
//!
//! ```text
//! RoomRegistry
//!   ├── colour counter (process-wide, never resets)
//!   └── rooms: room_id → Room
//!                         ├── OperationLog
//!                         ├── PresenceTable
//!                         └── BroadcastGroup
//! ```
//!
//! Rooms are created lazily by the first join and closed the moment their
//! last participant is removed. Closing discards the full history; a room
//! that was closed cannot be told apart from one that never existed, so
//! every per-room call on an unknown id is a no-op returning an empty
//! result.

use std::collections::HashMap;

use crate::broadcast::{BroadcastGroup, Outbox};
use crate::oplog::OperationLog;
use crate::presence::{palette_color, PresenceTable};
use crate::protocol::{
    now_millis, Operation, Participant, ParticipantId, RegistryStats, RoomStats,
    ServerMessage, StrokeDraft,
};

/// One drawing session.
pub struct Room {
    id: String,
    log: OperationLog,
    presence: PresenceTable,
    broadcast: BroadcastGroup,
}

/// What was discarded when a room closed.
struct ClosedRoom {
    room_id: String,
    discarded_operations: usize,
}

impl Room {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            log: OperationLog::new(),
            presence: PresenceTable::new(),
            broadcast: BroadcastGroup::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    /// Route broadcasts for `participant_id` to `outbox`.
    pub fn attach(&mut self, participant_id: ParticipantId, outbox: Outbox) {
        self.broadcast.add_peer(participant_id, outbox);
    }

    pub fn participant_count(&self) -> usize {
        self.presence.len()
    }

    pub fn operation_count(&self) -> usize {
        self.log.len()
    }

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            participant_count: self.participant_count(),
            operation_count: self.operation_count(),
        }
    }

    /// The snapshot a joining participant receives.
    pub fn full_sync(&self, participant_id: ParticipantId) -> ServerMessage {
        ServerMessage::FullSync {
            participant_id,
            operations: self.log.snapshot(),
            participants: self.presence.list_participants(),
        }
    }

    /// Terminal transition, taken only by [`RoomRegistry::remove_participant`].
    fn on_last_participant_left(self) -> ClosedRoom {
        ClosedRoom {
            room_id: self.id,
            discarded_operations: self.log.len(),
        }
    }
}

/// Owner of every live room.
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    color_counter: u64,
    rooms_created: u64,
    rooms_closed: u64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            color_counter: 0,
            rooms_created: 0,
            rooms_closed: 0,
        }
    }

    /// Idempotent, lazy room creation.
    pub fn get_or_create(&mut self, room_id: &str) -> &mut Room {
        if !self.rooms.contains_key(room_id) {
            self.rooms_created += 1;
            log::info!("Room {room_id} created");
        }
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id))
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Add a participant, creating the room if needed.
    pub fn join(
        &mut self,
        room_id: &str,
        participant_id: ParticipantId,
        display_name: &str,
    ) -> Participant {
        let color = palette_color(self.color_counter);
        self.color_counter += 1;
        let room = self.get_or_create(room_id);
        room.presence.join(participant_id, display_name, color, now_millis())
    }

    /// Evict a participant. Closes the room when it becomes empty.
    pub fn remove_participant(
        &mut self,
        room_id: &str,
        participant_id: &ParticipantId,
    ) -> Option<Participant> {
        let room = self.rooms.get_mut(room_id)?;
        let removed = room.presence.leave(participant_id);
        room.broadcast.remove_peer(participant_id);

        if room.presence.is_empty() {
            if let Some(room) = self.rooms.remove(room_id) {
                let closed = room.on_last_participant_left();
                self.rooms_closed += 1;
                log::info!(
                    "Room {} closed (empty), discarded {} operations",
                    closed.room_id,
                    closed.discarded_operations
                );
            }
        }
        removed
    }

    pub fn update_cursor(
        &mut self,
        room_id: &str,
        participant_id: ParticipantId,
        x: f64,
        y: f64,
    ) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) => room.presence.update_cursor(participant_id, x, y, now_millis()),
            None => false,
        }
    }

    pub fn list_participants(&self, room_id: &str) -> Vec<Participant> {
        self.rooms
            .get(room_id)
            .map(|room| room.presence.list_participants())
            .unwrap_or_default()
    }

    /// Commit a finished stroke to the room's log.
    pub fn commit(
        &mut self,
        room_id: &str,
        author_id: ParticipantId,
        draft: StrokeDraft,
    ) -> Option<Operation> {
        let room = self.rooms.get_mut(room_id)?;
        Some(room.log.commit(author_id, draft, now_millis()))
    }

    /// Global undo of the room's most recent operation.
    pub fn undo_last(&mut self, room_id: &str) -> Option<Operation> {
        self.rooms.get_mut(room_id)?.log.undo_last()
    }

    pub fn snapshot(&self, room_id: &str) -> Vec<Operation> {
        self.rooms
            .get(room_id)
            .map(|room| room.log.snapshot())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            room_count: self.rooms.len(),
            per_room: self
                .rooms
                .iter()
                .map(|(id, room)| (id.clone(), room.stats()))
                .collect(),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn rooms_created(&self) -> u64 {
        self.rooms_created
    }

    pub fn rooms_closed(&self) -> u64 {
        self.rooms_closed
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
