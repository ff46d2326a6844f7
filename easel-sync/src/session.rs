//! Authority-side handling of one participant's channel.
//!
//! ```text
//! Disconnected ──join──► Joined ──stroke_start──► Drawing
//!                          ▲                         │
//!                          └──────stroke_end─────────┘
//!                 (disconnect from any state drops the in-progress stroke)
//! ```
//!
//! [`ParticipantSession::handle`] runs synchronously against the registry.
//! The server calls it with the registry write lock held, so a mutation
//! and the broadcast describing it are a single step and every member of
//! a room sees commits in log order.

use crate::broadcast::{Audience, Outbox};
use crate::protocol::{ClientMessage, ParticipantId, ProtocolError, ServerMessage, StrokeDraft};
use crate::room::RoomRegistry;

/// Channel state as seen by the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Joined { room_id: String },
    Drawing { room_id: String },
}

impl ChannelState {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ChannelState::Disconnected => None,
            ChannelState::Joined { room_id } | ChannelState::Drawing { room_id } => Some(room_id),
        }
    }
}

pub struct ParticipantSession {
    participant_id: ParticipantId,
    outbox: Outbox,
    state: ChannelState,
}

impl ParticipantSession {
    pub fn new(participant_id: ParticipantId, outbox: Outbox) -> Self {
        Self {
            participant_id,
            outbox,
            state: ChannelState::Disconnected,
        }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Queue a message for this participant only.
    pub fn reply(&self, msg: &ServerMessage) -> Result<(), ProtocolError> {
        self.outbox.send(msg).map(|_| ())
    }

    /// Apply one inbound event.
    ///
    /// Errors are meant for the sender only; no state has changed when
    /// one is returned.
    pub fn handle(&mut self, registry: &mut RoomRegistry, msg: ClientMessage) -> Result<(), ProtocolError> {
        let pid = self.participant_id;
        match msg {
            ClientMessage::Join { room_id, display_name } => self.join(registry, room_id, &display_name),

            ClientMessage::StrokeStart { x, y, color, width, tool } => {
                let room_id = self.require_room()?.to_string();
                self.state = ChannelState::Drawing { room_id: room_id.clone() };
                let relay = ServerMessage::StrokeStart { author_id: pid, x, y, color, width, tool };
                Self::broadcast(registry, &room_id, &relay, Audience::AllExcept(pid))
            }

            ClientMessage::StrokeMove { x, y } => {
                let room_id = self.require_room()?;
                let relay = ServerMessage::StrokeMove { author_id: pid, x, y };
                Self::broadcast(registry, room_id, &relay, Audience::AllExcept(pid))
            }

            ClientMessage::StrokeEnd(draft) => self.stroke_end(registry, draft),

            ClientMessage::Undo => {
                let room_id = self.require_room()?;
                match registry.undo_last(room_id) {
                    Some(op) => {
                        log::debug!("Undo in room {room_id} by {pid} removed operation {}", op.id);
                        let msg = ServerMessage::OperationRemoved { operation_id: op.id };
                        Self::broadcast(registry, room_id, &msg, Audience::Everyone)
                    }
                    None => {
                        log::debug!("Undo in room {room_id} by {pid} ignored (empty history)");
                        Ok(())
                    }
                }
            }

            ClientMessage::CursorMove { x, y } => {
                let room_id = self.require_room()?;
                registry.update_cursor(room_id, pid, x, y);
                log::trace!("Cursor of {pid} in room {room_id} at ({x}, {y})");
                let msg = ServerMessage::CursorUpdate { participant_id: pid, x, y };
                Self::broadcast(registry, room_id, &msg, Audience::AllExcept(pid))
            }

            ClientMessage::Stats => self.reply(&ServerMessage::Stats(registry.stats())),
        }
    }

    /// Leave the current room, if any. Safe to call more than once.
    pub fn disconnect(&mut self, registry: &mut RoomRegistry) {
        let state = std::mem::replace(&mut self.state, ChannelState::Disconnected);
        let pid = self.participant_id;

        let room_id = match state {
            ChannelState::Disconnected => return,
            ChannelState::Joined { room_id } => room_id,
            ChannelState::Drawing { room_id } => {
                log::debug!("Participant {pid} left room {room_id} mid-stroke, stroke discarded");
                room_id
            }
        };

        let Some(participant) = registry.remove_participant(&room_id, &pid) else {
            return;
        };
        log::info!("Participant {} ({pid}) left room {room_id}", participant.display_name);

        if let Some(room) = registry.room(&room_id) {
            let msg = ServerMessage::ParticipantLeft {
                participant_id: pid,
                participant,
                participants: room.presence().list_participants(),
            };
            if let Err(e) = room.broadcast().broadcast(&msg, Audience::Everyone) {
                log::error!("Failed to broadcast departure of {pid}: {e}");
            }
        }
    }

    fn join(&mut self, registry: &mut RoomRegistry, room_id: String, display_name: &str) -> Result<(), ProtocolError> {
        if room_id.is_empty() {
            return Err(ProtocolError::InvalidPayload("roomId must not be empty".into()));
        }
        let pid = self.participant_id;
        if self.state.room_id() == Some(room_id.as_str()) {
            // Same room again: resend the history, membership is unchanged
            if let Some(room) = registry.room(&room_id) {
                log::debug!("Participant {pid} re-synced with room {room_id}");
                self.reply(&room.full_sync(pid))?;
            }
            self.state = ChannelState::Joined { room_id };
            return Ok(());
        }
        if self.state.room_id().is_some() {
            self.disconnect(registry);
        }

        let participant = registry.join(&room_id, pid, display_name);
        let room = registry.get_or_create(&room_id);
        room.attach(pid, self.outbox.clone());

        // full_sync must be queued before participant_joined
        self.reply(&room.full_sync(pid))?;
        let msg = ServerMessage::ParticipantJoined {
            participant_id: pid,
            participant: participant.clone(),
            participants: room.presence().list_participants(),
        };
        room.broadcast().broadcast(&msg, Audience::Everyone)?;

        log::info!(
            "Participant {} ({pid}) joined room {room_id} ({} present, {} operations)",
            participant.display_name,
            room.participant_count(),
            room.operation_count()
        );
        self.state = ChannelState::Joined { room_id };
        Ok(())
    }

    fn stroke_end(&mut self, registry: &mut RoomRegistry, draft: StrokeDraft) -> Result<(), ProtocolError> {
        let room_id = self.require_room()?.to_string();
        draft.validate()?;

        let pid = self.participant_id;
        let Some(operation) = registry.commit(&room_id, pid, draft) else {
            return Ok(());
        };
        log::debug!(
            "Committed operation {} in room {room_id} by {pid} ({} points)",
            operation.id,
            operation.points.len()
        );
        self.state = ChannelState::Joined { room_id: room_id.clone() };
        Self::broadcast(registry, &room_id, &ServerMessage::OperationCommitted { operation }, Audience::Everyone)
    }

    fn require_room(&self) -> Result<&str, ProtocolError> {
        self.state.room_id().ok_or(ProtocolError::NotJoined)
    }

    fn broadcast(
        registry: &RoomRegistry,
        room_id: &str,
        msg: &ServerMessage,
        audience: Audience,
    ) -> Result<(), ProtocolError> {
        if let Some(room) = registry.room(room_id) {
            room.broadcast().broadcast(msg, audience)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{outbox, OutboxReceiver};
    use crate::protocol::{Point, StrokeStyle, Tool};
    use uuid::Uuid;

    struct Peer {
        session: ParticipantSession,
        rx: OutboxReceiver,
    }

    impl Peer {
        fn new() -> Self {
            let (tx, rx) = outbox(16);
            Self {
                session: ParticipantSession::new(Uuid::new_v4(), tx),
                rx,
            }
        }

        fn id(&self) -> ParticipantId {
            self.session.participant_id()
        }

        fn send(&mut self, registry: &mut RoomRegistry, msg: ClientMessage) -> Result<(), ProtocolError> {
            self.session.handle(registry, msg)
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Some(raw) = self.rx.try_recv() {
                out.push(ServerMessage::decode(&raw).unwrap());
            }
            out
        }
    }

    fn join(room: &str, name: &str) -> ClientMessage {
        ClientMessage::Join {
            room_id: room.into(),
            display_name: name.into(),
        }
    }

    fn stroke_end(points: &[(f64, f64)]) -> ClientMessage {
        ClientMessage::StrokeEnd(StrokeDraft::new(
            points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            &StrokeStyle::new("#112233", 4.0, Tool::Brush),
        ))
    }

    #[test]
    fn test_join_sends_full_sync_then_joined() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        a.send(&mut registry, join("r1", "Alice")).unwrap();

        let msgs = a.drain();
        assert_eq!(msgs.len(), 2);
        match &msgs[0] {
            ServerMessage::FullSync { participant_id, operations, participants } => {
                assert_eq!(*participant_id, a.id());
                assert!(operations.is_empty());
                assert_eq!(participants.len(), 1);
            }
            other => panic!("expected full_sync, got {other:?}"),
        }
        assert!(matches!(&msgs[1], ServerMessage::ParticipantJoined { participant_id, .. } if *participant_id == a.id()));
        assert_eq!(a.session.state(), &ChannelState::Joined { room_id: "r1".into() });
    }

    #[test]
    fn test_events_before_join_rejected() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        assert_eq!(a.send(&mut registry, ClientMessage::Undo), Err(ProtocolError::NotJoined));
        assert_eq!(
            a.send(&mut registry, ClientMessage::CursorMove { x: 0.0, y: 0.0 }),
            Err(ProtocolError::NotJoined)
        );
        assert_eq!(a.send(&mut registry, stroke_end(&[(0.0, 0.0)])), Err(ProtocolError::NotJoined));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_empty_room_id_rejected() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        assert!(matches!(
            a.send(&mut registry, join("", "Alice")),
            Err(ProtocolError::InvalidPayload(_))
        ));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_scenario_commit_join_undo() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();

        a.send(&mut registry, join("r1", "A")).unwrap();
        a.drain();

        a.send(&mut registry, stroke_end(&[(0.0, 0.0), (10.0, 10.0)])).unwrap();
        let committed = match a.drain().as_slice() {
            [ServerMessage::OperationCommitted { operation }] => operation.clone(),
            other => panic!("expected operation_committed, got {other:?}"),
        };
        assert_eq!(committed.id, 1);
        assert_eq!(committed.author_id, a.id());
        assert_eq!(registry.snapshot("r1"), vec![committed.clone()]);

        b.send(&mut registry, join("r1", "B")).unwrap();
        match &b.drain()[0] {
            ServerMessage::FullSync { operations, participants, .. } => {
                assert_eq!(operations, &vec![committed.clone()]);
                assert_eq!(participants.len(), 2);
            }
            other => panic!("expected full_sync, got {other:?}"),
        }
        assert!(matches!(a.drain().as_slice(), [ServerMessage::ParticipantJoined { .. }]));

        a.send(&mut registry, ClientMessage::Undo).unwrap();
        let expected = ServerMessage::OperationRemoved { operation_id: 1 };
        assert_eq!(a.drain(), vec![expected.clone()]);
        assert_eq!(b.drain(), vec![expected]);
        assert!(registry.snapshot("r1").is_empty());
    }

    #[test]
    fn test_undo_on_empty_log_broadcasts_nothing() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();
        a.send(&mut registry, join("r1", "A")).unwrap();
        b.send(&mut registry, join("r1", "B")).unwrap();
        a.drain();
        b.drain();

        b.send(&mut registry, ClientMessage::Undo).unwrap();
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[test]
    fn test_relays_skip_origin() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();
        a.send(&mut registry, join("r1", "A")).unwrap();
        b.send(&mut registry, join("r1", "B")).unwrap();
        a.drain();
        b.drain();

        a.send(
            &mut registry,
            ClientMessage::StrokeStart {
                x: 1.0,
                y: 2.0,
                color: "#ffffff".into(),
                width: 2.0,
                tool: Tool::Eraser,
            },
        )
        .unwrap();
        a.send(&mut registry, ClientMessage::StrokeMove { x: 3.0, y: 4.0 }).unwrap();
        a.send(&mut registry, ClientMessage::CursorMove { x: 5.0, y: 6.0 }).unwrap();

        assert!(a.drain().is_empty());
        let aid = a.id();
        assert_eq!(
            b.drain(),
            vec![
                ServerMessage::StrokeStart {
                    author_id: aid,
                    x: 1.0,
                    y: 2.0,
                    color: "#ffffff".into(),
                    width: 2.0,
                    tool: Tool::Eraser,
                },
                ServerMessage::StrokeMove { author_id: aid, x: 3.0, y: 4.0 },
                ServerMessage::CursorUpdate { participant_id: aid, x: 5.0, y: 6.0 },
            ]
        );
        let cursor = registry.room("r1").unwrap().presence().cursor(&aid).copied().unwrap();
        assert_eq!((cursor.x, cursor.y), (5.0, 6.0));
        assert!(registry.snapshot("r1").is_empty());
    }

    #[test]
    fn test_stroke_state_transitions() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        a.send(&mut registry, join("r1", "A")).unwrap();

        a.send(
            &mut registry,
            ClientMessage::StrokeStart {
                x: 0.0,
                y: 0.0,
                color: "#000000".into(),
                width: 1.0,
                tool: Tool::Brush,
            },
        )
        .unwrap();
        assert_eq!(a.session.state(), &ChannelState::Drawing { room_id: "r1".into() });

        a.send(&mut registry, stroke_end(&[(0.0, 0.0)])).unwrap();
        assert_eq!(a.session.state(), &ChannelState::Joined { room_id: "r1".into() });
    }

    #[test]
    fn test_invalid_stroke_not_committed() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        a.send(&mut registry, join("r1", "A")).unwrap();
        a.drain();

        let result = a.send(&mut registry, stroke_end(&[]));
        assert!(matches!(result, Err(ProtocolError::InvalidPayload(_))));
        assert!(registry.snapshot("r1").is_empty());
        assert!(a.drain().is_empty());
    }

    #[test]
    fn test_disconnect_mid_stroke_commits_nothing() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();
        a.send(&mut registry, join("r1", "A")).unwrap();
        b.send(&mut registry, join("r1", "B")).unwrap();
        b.drain();

        a.send(
            &mut registry,
            ClientMessage::StrokeStart {
                x: 0.0,
                y: 0.0,
                color: "#000000".into(),
                width: 1.0,
                tool: Tool::Brush,
            },
        )
        .unwrap();
        for i in 1..5 {
            a.send(&mut registry, ClientMessage::StrokeMove { x: i as f64, y: 0.0 }).unwrap();
        }
        a.session.disconnect(&mut registry);

        assert!(registry.snapshot("r1").is_empty());
        let msgs = b.drain();
        match msgs.iter().find(|m| matches!(m, ServerMessage::ParticipantLeft { .. })) {
            Some(ServerMessage::ParticipantLeft { participant_id, participants, .. }) => {
                assert_eq!(*participant_id, a.id());
                assert_eq!(participants.len(), 1);
            }
            other => panic!("expected participant_left, got {other:?}"),
        }
        assert!(!msgs.iter().any(|m| matches!(m, ServerMessage::OperationCommitted { .. })));
    }

    #[test]
    fn test_last_disconnect_closes_room() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        a.send(&mut registry, join("r1", "A")).unwrap();
        a.send(&mut registry, stroke_end(&[(0.0, 0.0)])).unwrap();

        a.session.disconnect(&mut registry);
        assert!(!registry.contains("r1"));
        a.session.disconnect(&mut registry);
        assert_eq!(registry.rooms_closed(), 1);

        let mut b = Peer::new();
        b.send(&mut registry, join("r1", "B")).unwrap();
        match &b.drain()[0] {
            ServerMessage::FullSync { operations, participants, .. } => {
                assert!(operations.is_empty());
                assert_eq!(participants.len(), 1);
            }
            other => panic!("expected full_sync, got {other:?}"),
        }
    }

    #[test]
    fn test_join_second_room_leaves_first() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        let mut b = Peer::new();
        a.send(&mut registry, join("r1", "A")).unwrap();
        b.send(&mut registry, join("r1", "B")).unwrap();
        b.drain();

        a.send(&mut registry, join("r2", "A")).unwrap();
        assert_eq!(registry.list_participants("r1").len(), 1);
        assert_eq!(registry.list_participants("r2").len(), 1);
        assert!(matches!(b.drain().as_slice(), [ServerMessage::ParticipantLeft { .. }]));

        b.send(&mut registry, stroke_end(&[(0.0, 0.0)])).unwrap();
        assert!(a
            .drain()
            .iter()
            .all(|m| !matches!(m, ServerMessage::OperationCommitted { .. })));
    }

    #[test]
    fn test_rejoin_same_room_resyncs_without_closing() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        a.send(&mut registry, join("r1", "Alice")).unwrap();
        a.send(&mut registry, stroke_end(&[(0.0, 0.0), (1.0, 1.0)])).unwrap();
        a.send(&mut registry, ClientMessage::StrokeStart {
            x: 2.0,
            y: 2.0,
            color: "#112233".into(),
            width: 4.0,
            tool: Tool::Brush,
        })
        .unwrap();
        a.drain();

        a.send(&mut registry, join("r1", "Alice")).unwrap();

        match a.drain().as_slice() {
            [ServerMessage::FullSync { participant_id, operations, participants }] => {
                assert_eq!(*participant_id, a.id());
                assert_eq!(operations.len(), 1);
                assert_eq!(participants.len(), 1);
            }
            other => panic!("expected a lone full_sync, got {other:?}"),
        }
        assert_eq!(a.session.state(), &ChannelState::Joined { room_id: "r1".into() });
        assert_eq!(registry.snapshot("r1").len(), 1);
        assert_eq!(registry.rooms_created(), 1);
        assert_eq!(registry.rooms_closed(), 0);
    }

    #[test]
    fn test_stats_reply() {
        let mut registry = RoomRegistry::new();
        let mut a = Peer::new();
        a.send(&mut registry, ClientMessage::Stats).unwrap();
        assert_eq!(
            a.drain(),
            vec![ServerMessage::Stats(crate::protocol::RegistryStats::default())]
        );

        a.send(&mut registry, join("r1", "A")).unwrap();
        a.drain();
        a.send(&mut registry, ClientMessage::Stats).unwrap();
        match &a.drain()[0] {
            ServerMessage::Stats(stats) => {
                assert_eq!(stats.room_count, 1);
                assert_eq!(stats.per_room["r1"].participant_count, 1);
            }
            other => panic!("expected stats, got {other:?}"),
        }
    }

    #[test]
    fn test_commit_order_identical_for_all_members() {
        let mut registry = RoomRegistry::new();
        let mut peers: Vec<Peer> = (0..3).map(|_| Peer::new()).collect();
        for (i, peer) in peers.iter_mut().enumerate() {
            peer.send(&mut registry, join("r1", &format!("P{i}"))).unwrap();
        }
        for peer in peers.iter_mut() {
            peer.drain();
        }

        for round in 0..4 {
            for i in 0..peers.len() {
                let point = (round as f64, i as f64);
                peers[i].send(&mut registry, stroke_end(&[point])).unwrap();
            }
        }

        let orders: Vec<Vec<u64>> = peers
            .iter_mut()
            .map(|peer| {
                peer.drain()
                    .into_iter()
                    .filter_map(|m| match m {
                        ServerMessage::OperationCommitted { operation } => Some(operation.id),
                        _ => None,
                    })
                    .collect()
            })
            .collect();

        let expected: Vec<u64> = (1..=12).collect();
        for order in orders {
            assert_eq!(order, expected);
        }
    }
}
