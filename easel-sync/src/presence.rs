//! Presence table: who is in a room and where their cursor is.
//!
//! ## Architecture
//!
//! ```text
//! join ──► PresenceTable::join()  ── colour from PALETTE[counter % len]
//!              │
//! cursor_move ─┼─► update_cursor()  (overwrite, last write wins)
//!              │
//! disconnect ──┴─► leave()          (participant + cursor dropped)
//! ```
//!
//! Cursors are ephemeral: no history is kept and they are never part of
//! the operation log. Participants are listed in join order so that every
//! observer of the room sees the same list.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{Participant, ParticipantId, Timestamp};

// ───────────────────────────────────────────────────────────────────
// Colour palette
// ───────────────────────────────────────────────────────────────────

/// Fixed participant colour palette, handed out round-robin.
pub const PALETTE: [&str; 10] = [
    "#E6194B", "#3CB44B", "#4363D8", "#F58231", "#911EB4",
    "#42D4F4", "#F032E6", "#BFEF45", "#469990", "#9A6324",
];

/// Palette entry for a monotonically increasing counter value.
pub fn palette_color(counter: u64) -> &'static str {
    PALETTE[(counter % PALETTE.len() as u64) as usize]
}

/// Name given to participants who join without one.
pub fn default_display_name(current_count: usize) -> String {
    format!("User{}", current_count + 1)
}

// ───────────────────────────────────────────────────────────────────
// Presence table
// ───────────────────────────────────────────────────────────────────

/// Last known cursor position of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
    pub last_update: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceTable {
    /// Join order.
    participants: Vec<Participant>,
    cursors: HashMap<ParticipantId, Cursor>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant. A blank display name becomes `User<N>`.
    ///
    /// Re-joining with an id that is already present replaces the old
    /// entry in place.
    pub fn join(
        &mut self,
        participant_id: ParticipantId,
        display_name: &str,
        color: &str,
        joined_at: Timestamp,
    ) -> Participant {
        let display_name = match display_name.trim() {
            "" => default_display_name(self.participants.len()),
            _ => display_name.to_string(),
        };
        let participant = Participant {
            id: participant_id,
            display_name,
            assigned_color: color.to_string(),
            joined_at,
        };

        match self.participants.iter_mut().find(|p| p.id == participant_id) {
            Some(existing) => *existing = participant.clone(),
            None => self.participants.push(participant.clone()),
        }
        participant
    }

    /// Remove a participant and their cursor.
    pub fn leave(&mut self, participant_id: &ParticipantId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| &p.id == participant_id)?;
        self.cursors.remove(participant_id);
        Some(self.participants.remove(index))
    }

    /// Overwrite a participant's cursor. Unknown participants are ignored.
    pub fn update_cursor(
        &mut self,
        participant_id: ParticipantId,
        x: f64,
        y: f64,
        now: Timestamp,
    ) -> bool {
        if !self.contains(&participant_id) {
            return false;
        }
        self.cursors.insert(
            participant_id,
            Cursor {
                x,
                y,
                last_update: now,
            },
        );
        true
    }

    pub fn cursor(&self, participant_id: &ParticipantId) -> Option<&Cursor> {
        self.cursors.get(participant_id)
    }

    pub fn participant(&self, participant_id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == participant_id)
    }

    pub fn list_participants(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    pub fn contains(&self, participant_id: &ParticipantId) -> bool {
        self.participants.iter().any(|p| &p.id == participant_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
