//! Undo/Redo of transform edits.
//!
//! Every transform-setting mutation is recorded as a snapshot of the node's
//! local transform before and after (the "after" includes any clamp). Undo
//! and redo restore those snapshots exactly.
//!
//! Gestures use **batching**: the transform is captured when the gesture
//! begins and again after the clamp at its end, so a whole drag or rotate
//! is a single undo step.
//!
//! Structural edits (group, reparent, delete, …) re-base every local
//! transform they touch, so they start a fresh history.

use crate::sync::{EditMutation, GestureKind, SyncEngine};
use sa_core::reparent::EditError;
use sa_core::{AssetSource, NodeId, Transform};
use smallvec::SmallVec;

/// One node's transform before and after an edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSnapshot {
    pub id: NodeId,
    pub before: Transform,
    pub after: Transform,
}

/// An undoable step: one or more transform snapshots.
#[derive(Debug, Clone)]
pub struct Command {
    pub snapshots: SmallVec<[TransformSnapshot; 1]>,
    pub description: String,
}

/// Manages undo/redo stacks with batch grouping for gestures.
pub struct CommandStack {
    undo_stack: Vec<Command>,
    redo_stack: Vec<Command>,
    /// Maximum undo depth.
    max_depth: usize,
    /// Node and transform captured when the current batch began.
    batch: Option<(NodeId, Transform, String)>,
}

impl CommandStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::with_capacity(max_depth.min(64)),
            redo_stack: Vec::new(),
            max_depth,
            batch: None,
        }
    }

    fn push(&mut self, cmd: Command) {
        self.undo_stack.push(cmd);
        if self.undo_stack.len() > self.max_depth {
            self.undo_stack.remove(0);
        }
        // Clear redo stack on new action
        self.redo_stack.clear();
    }

    /// Start a gesture on `id`. Mutations until [`Self::end_batch`] are
    /// applied live and recorded as one step.
    pub fn begin_batch<S: AssetSource>(
        &mut self,
        engine: &mut SyncEngine<S>,
        id: NodeId,
        kind: GestureKind,
        description: &str,
    ) -> Result<(), EditError> {
        engine.begin_gesture(id, kind)?;
        let before = engine.transform_of(id).ok_or(EditError::UnknownNode(id))?;
        self.batch = Some((id, before, description.to_string()));
        Ok(())
    }

    /// End the gesture: the engine clamps once, and if the node ended up
    /// somewhere else one snapshot is pushed.
    pub fn end_batch<S: AssetSource>(&mut self, engine: &mut SyncEngine<S>) {
        engine.end_gesture();
        let Some((id, before, description)) = self.batch.take() else {
            return;
        };
        let Some(after) = engine.transform_of(id) else {
            return;
        };
        if after != before {
            self.push(Command {
                snapshots: SmallVec::from_buf([TransformSnapshot { id, before, after }]),
                description,
            });
        }
    }

    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Apply a mutation through the engine and record it.
    pub fn execute<S: AssetSource>(
        &mut self,
        engine: &mut SyncEngine<S>,
        mutation: EditMutation,
        description: &str,
    ) -> Result<Option<NodeId>, EditError> {
        let target = mutation.transform_target();
        if self.batch.is_some() {
            // The snapshot at end_batch() captures the cumulative effect.
            return engine.apply_mutation(mutation);
        }

        let Some(id) = target else {
            let created = engine.apply_mutation(mutation)?;
            if self.can_undo() || self.can_redo() {
                log::debug!("structural edit ({description}) clears undo history");
            }
            self.clear();
            return Ok(created);
        };

        let before = engine.transform_of(id);
        let created = engine.apply_mutation(mutation)?;
        if let (Some(before), Some(after)) = (before, engine.transform_of(id))
            && before != after
        {
            self.push(Command {
                snapshots: SmallVec::from_buf([TransformSnapshot { id, before, after }]),
                description: description.to_string(),
            });
        }
        Ok(created)
    }

    /// Undo the last step. Returns its description.
    pub fn undo<S: AssetSource>(&mut self, engine: &mut SyncEngine<S>) -> Option<String> {
        let cmd = self.undo_stack.pop()?;
        for snap in cmd.snapshots.iter().rev() {
            engine.restore_transform(snap.id, snap.before);
        }
        let desc = cmd.description.clone();
        self.redo_stack.push(cmd);
        Some(desc)
    }

    /// Redo the last undone step. Returns its description.
    pub fn redo<S: AssetSource>(&mut self, engine: &mut SyncEngine<S>) -> Option<String> {
        let cmd = self.redo_stack.pop()?;
        for snap in &cmd.snapshots {
            engine.restore_transform(snap.id, snap.after);
        }
        let desc = cmd.description.clone();
        self.undo_stack.push(cmd);
        Some(desc)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
