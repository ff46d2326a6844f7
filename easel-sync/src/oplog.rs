//! Per-room ordered history of committed operations.
//!
//! The log is a stack: commits append, undo pops the tail. History order
//! is exactly commit order and ids are handed out only at commit time from
//! a room-local counter that starts at 1 and is never reused while the
//! room is alive.

use crate::protocol::{
    Operation, OperationId, OperationKind, ParticipantId, StrokeDraft, Timestamp,
};

#[derive(Debug, Clone)]
pub struct OperationLog {
    history: Vec<Operation>,
    next_id: OperationId,
}

impl OperationLog {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            next_id: 1,
        }
    }

    /// Assign the next id, stamp `committed_at`, append and return the operation.
    pub fn commit(
        &mut self,
        author_id: ParticipantId,
        draft: StrokeDraft,
        committed_at: Timestamp,
    ) -> Operation {
        let operation = Operation {
            id: self.next_id,
            author_id,
            committed_at,
            kind: OperationKind::Draw,
            points: draft.points,
            color: draft.color,
            stroke_width: draft.width,
            tool: draft.tool,
        };
        self.next_id += 1;
        self.history.push(operation.clone());
        operation
    }

    /// Global undo: remove the most recent operation whoever authored it.
    pub fn undo_last(&mut self) -> Option<Operation> {
        self.history.pop()
    }

    /// Full history in commit order.
    pub fn snapshot(&self) -> Vec<Operation> {
        self.history.clone()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Id the next commit will receive.
    pub fn next_id(&self) -> OperationId {
        self.next_id
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}
