//! Client-side canvas reconciliation.
//!
//! ## Render pipeline
//!
//! ```text
//!  clear
//!    │
//!    ├─► committed log, in order          (authoritative)
//!    ├─► pending local strokes            (sent, awaiting operation_committed)
//!    ├─► remote strokes in progress       (stroke_start / stroke_move relays)
//!    └─► local active stroke              (Idle ─begin─► ActiveStroke ─finish─► Idle)
//! ```
//!
//! Local input is drawn at once. A finished stroke stays as a pending
//! overlay until the server echoes it back as a committed operation; the
//! overlay is then dropped and the operation takes its place at the end of
//! the log, so the frame does not change across the echo. Every
//! authoritative event replaces speculative state; the reconciler never
//! patches the frame incrementally.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::protocol::{
    ClientMessage, Operation, Participant, ParticipantId, Point, ProtocolError, ServerMessage,
    StrokeDraft, StrokeStyle,
};
use crate::simplify::simplify;

/// Where a frame is drawn.
pub trait RenderSurface {
    fn clear(&mut self);
    fn draw_stroke(&mut self, points: &[Point], style: &StrokeStyle);
}

/// One call made on a [`RenderSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    Clear,
    DrawStroke { points: Vec<Point>, style: StrokeStyle },
}

/// Surface that records the most recent frame. Used headless and in tests.
#[derive(Debug, Default)]
pub struct FrameRecorder {
    frame: Vec<RenderCommand>,
    frames_rendered: usize,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands issued since the last `clear`, that `clear` included.
    pub fn frame(&self) -> &[RenderCommand] {
        &self.frame
    }

    pub fn frames_rendered(&self) -> usize {
        self.frames_rendered
    }

    /// Number of strokes drawn in the current frame.
    pub fn stroke_count(&self) -> usize {
        self.frame
            .iter()
            .filter(|c| matches!(c, RenderCommand::DrawStroke { .. }))
            .count()
    }
}

impl RenderSurface for FrameRecorder {
    fn clear(&mut self) {
        self.frame.clear();
        self.frame.push(RenderCommand::Clear);
        self.frames_rendered += 1;
    }

    fn draw_stroke(&mut self, points: &[Point], style: &StrokeStyle) {
        self.frame.push(RenderCommand::DrawStroke {
            points: points.to_vec(),
            style: style.clone(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokePhase {
    Idle,
    ActiveStroke,
}

/// A path with its style, not yet in the log.
#[derive(Debug, Clone, PartialEq)]
struct Path {
    points: Vec<Point>,
    style: StrokeStyle,
}

/// Local view of one room.
#[derive(Debug, Clone)]
pub struct CanvasReconciler {
    local_id: Option<ParticipantId>,
    log: Vec<Operation>,
    active: Option<Path>,
    pending: VecDeque<Path>,
    remote_strokes: BTreeMap<ParticipantId, Path>,
    participants: Vec<Participant>,
    cursors: HashMap<ParticipantId, Point>,
    simplify_tolerance: Option<f64>,
}

impl CanvasReconciler {
    pub fn new(simplify_tolerance: Option<f64>) -> Self {
        Self {
            local_id: None,
            log: Vec::new(),
            active: None,
            pending: VecDeque::new(),
            remote_strokes: BTreeMap::new(),
            participants: Vec::new(),
            cursors: HashMap::new(),
            simplify_tolerance,
        }
    }

    pub fn phase(&self) -> StrokePhase {
        match self.active {
            Some(_) => StrokePhase::ActiveStroke,
            None => StrokePhase::Idle,
        }
    }

    /// Start a local stroke. Any stroke already active is discarded.
    ///
    /// Returns the relay to send.
    pub fn begin_stroke(&mut self, start: Point, style: StrokeStyle) -> ClientMessage {
        let relay = ClientMessage::StrokeStart {
            x: start.x,
            y: start.y,
            color: style.color.clone(),
            width: style.width,
            tool: style.tool,
        };
        self.active = Some(Path {
            points: vec![start],
            style,
        });
        relay
    }

    /// Extend the active stroke. `None` while idle.
    pub fn extend_stroke(&mut self, point: Point) -> Option<ClientMessage> {
        let active = self.active.as_mut()?;
        active.points.push(point);
        Some(ClientMessage::StrokeMove { x: point.x, y: point.y })
    }

    /// Finish the active stroke and produce its `stroke_end` payload.
    ///
    /// The transmitted (possibly simplified) path is kept as a pending
    /// overlay until the server echoes it. A stroke the server would reject
    /// is discarded here and never becomes pending, so every pending overlay
    /// is answered by exactly one commit. `Ok(None)` while idle.
    pub fn finish_stroke(&mut self) -> Result<Option<StrokeDraft>, ProtocolError> {
        let Some(Path { points, style }) = self.active.take() else {
            return Ok(None);
        };
        let points = match self.simplify_tolerance {
            Some(tolerance) => simplify(&points, tolerance),
            None => points,
        };
        let draft = StrokeDraft::new(points.clone(), &style);
        if let Err(e) = draft.validate() {
            log::warn!("Discarding local stroke: {e}");
            return Err(e);
        }
        self.pending.push_back(Path { points, style });
        Ok(Some(draft))
    }

    /// Drop the active stroke without sending anything.
    pub fn abandon_stroke(&mut self) -> bool {
        self.active.take().is_some()
    }

    /// Fold one server event into the local view.
    ///
    /// Returns `true` when the canvas needs to be redrawn.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::FullSync {
                participant_id,
                operations,
                participants,
            } => {
                self.local_id = Some(*participant_id);
                self.log = operations.clone();
                self.participants = participants.clone();
                self.pending.clear();
                self.remote_strokes.clear();
                self.cursors.clear();
                true
            }

            ServerMessage::ParticipantJoined { participants, .. } => {
                self.participants = participants.clone();
                false
            }

            ServerMessage::ParticipantLeft {
                participant_id,
                participants,
                ..
            } => {
                self.participants = participants.clone();
                self.cursors.remove(participant_id);
                self.remote_strokes.remove(participant_id).is_some()
            }

            ServerMessage::OperationCommitted { operation } => {
                if self.is_local(&operation.author_id) {
                    if self.pending.pop_front().is_none() {
                        log::debug!("Commit {} echoed with nothing pending", operation.id);
                    }
                } else {
                    self.remote_strokes.remove(&operation.author_id);
                }
                self.log.push(operation.clone());
                true
            }

            ServerMessage::OperationRemoved { operation_id } => {
                match self.log.iter().rposition(|op| op.id == *operation_id) {
                    Some(index) => {
                        self.log.remove(index);
                        true
                    }
                    None => {
                        log::debug!("Removal of unknown operation {operation_id} ignored");
                        false
                    }
                }
            }

            ServerMessage::CursorUpdate { participant_id, x, y } => {
                if !self.is_local(participant_id) {
                    self.cursors.insert(*participant_id, Point::new(*x, *y));
                }
                false
            }

            ServerMessage::StrokeStart {
                author_id,
                x,
                y,
                color,
                width,
                tool,
            } => {
                if self.is_local(author_id) {
                    return false;
                }
                self.remote_strokes.insert(
                    *author_id,
                    Path {
                        points: vec![Point::new(*x, *y)],
                        style: StrokeStyle::new(color.clone(), *width, *tool),
                    },
                );
                true
            }

            ServerMessage::StrokeMove { author_id, x, y } => match self.remote_strokes.get_mut(author_id) {
                Some(path) => {
                    path.points.push(Point::new(*x, *y));
                    true
                }
                None => false,
            },

            ServerMessage::Stats(_) => false,

            ServerMessage::Error { message } => {
                log::warn!("Server rejected a message: {message}");
                false
            }
        }
    }

    /// Draw the full frame: log, pending echoes, remote strokes, then the
    /// local stroke on top.
    pub fn render(&self, surface: &mut dyn RenderSurface) {
        surface.clear();
        for op in &self.log {
            surface.draw_stroke(&op.points, &op.style());
        }
        for path in &self.pending {
            surface.draw_stroke(&path.points, &path.style);
        }
        for path in self.remote_strokes.values() {
            surface.draw_stroke(&path.points, &path.style);
        }
        if let Some(path) = &self.active {
            surface.draw_stroke(&path.points, &path.style);
        }
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    /// Local copy of the committed log.
    pub fn operations(&self) -> &[Operation] {
        &self.log
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Last known cursor of a remote participant.
    pub fn cursor(&self, participant_id: &ParticipantId) -> Option<Point> {
        self.cursors.get(participant_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn remote_stroke_count(&self) -> usize {
        self.remote_strokes.len()
    }

    pub fn active_points(&self) -> Option<&[Point]> {
        self.active.as_ref().map(|path| path.points.as_slice())
    }

    fn is_local(&self, participant_id: &ParticipantId) -> bool {
        self.local_id.as_ref() == Some(participant_id)
    }
}

impl Default for CanvasReconciler {
    fn default() -> Self {
        Self::new(None)
    }
}
