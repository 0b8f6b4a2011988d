//! Pending actions and accumulator arena of an open batch.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::action::{Action, ActionKind, ActionOp};
use crate::{FuserError, Result};

/// Handle to a running count owned by a batch.
///
/// Scan actions registered with the same accumulator number their output
/// in one sequence: each action starts where the previous one sharing the
/// accumulator stopped.
///
/// A handle is only valid in the batch that created it; other batches
/// reject it even when its index is in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccumulatorId {
    session: u64,
    index: usize,
}

impl AccumulatorId {
    /// Position in the batch's accumulator arena.
    pub fn index(self) -> usize {
        self.index
    }

    pub(crate) fn session(self) -> u64 {
        self.session
    }
}

/// Source of batch identities; 0 is never handed out.
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Ordered pending actions plus batch bookkeeping.
///
/// Invariant: `watermark` equals the summed length of the pending actions,
/// and each action's `offset` is the watermark at its registration, so the
/// pending ranges tile `[0, watermark)` in registration order.
#[derive(Debug)]
pub(crate) struct BatchLedger<'a> {
    session: u64,
    actions: Vec<Action<'a>>,
    watermark: usize,
    accumulators: Vec<usize>,
}

impl<'a> BatchLedger<'a> {
    pub(crate) fn new() -> Self {
        Self {
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            actions: Vec::new(),
            watermark: 0,
            accumulators: Vec::new(),
        }
    }

    /// Identity stamped on every accumulator this ledger creates.
    pub(crate) fn session(&self) -> u64 {
        self.session
    }

    /// Append an action at the current watermark; returns its offset.
    pub(crate) fn push(&mut self, range: Range<usize>, op: ActionOp<'a>) -> usize {
        let offset = self.watermark;
        self.watermark += range.len();
        self.actions.push(Action { range, offset, op });
        offset
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn watermark(&self) -> usize {
        self.watermark
    }

    pub(crate) fn last_kind(&self) -> Option<ActionKind> {
        self.actions.last().map(Action::kind)
    }

    /// Move the pending actions out for dispatch and reset the watermark.
    pub(crate) fn take_actions(&mut self) -> Vec<Action<'a>> {
        self.watermark = 0;
        std::mem::take(&mut self.actions)
    }

    /// Drop dispatched actions, keeping the allocation for the next batch.
    pub(crate) fn recycle(&mut self, mut actions: Vec<Action<'a>>) {
        actions.clear();
        if self.actions.is_empty() && actions.capacity() > self.actions.capacity() {
            self.actions = actions;
        }
    }

    pub(crate) fn add_accumulator(&mut self, initial: usize) -> AccumulatorId {
        self.accumulators.push(initial);
        AccumulatorId {
            session: self.session,
            index: self.accumulators.len() - 1,
        }
    }

    pub(crate) fn check_accumulator(&self, id: AccumulatorId) -> Result<()> {
        if id.session != self.session || id.index >= self.accumulators.len() {
            return Err(FuserError::UnknownAccumulator {
                id: id.index,
                count: self.accumulators.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn accumulator(&self, id: AccumulatorId) -> Result<usize> {
        self.check_accumulator(id)?;
        Ok(self.accumulators[id.index])
    }

    pub(crate) fn set_accumulator(&mut self, id: AccumulatorId, value: usize) -> Result<()> {
        self.check_accumulator(id)?;
        self.accumulators[id.index] = value;
        Ok(())
    }

    pub(crate) fn accumulators_mut(&mut self) -> &mut [usize] {
        &mut self.accumulators
    }

    pub(crate) fn take_accumulators(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.accumulators)
    }
}
