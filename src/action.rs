//! Deferred loop records.
//!
//! An action is one parallel loop captured at registration: its index range,
//! its position in the batch's synthetic index space, and the callables that
//! make up its predicate and body. Scan kinds also name the accumulator that
//! numbers their output.

use std::fmt;
use std::ops::Range;

use fusible_array::HostDeviceArray;

use crate::ledger::AccumulatorId;

/// Kind of a registered loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Independent iterations, optionally guarded by a predicate.
    Stream,
    /// Compaction: iterations whose predicate holds receive consecutive
    /// output positions.
    Scan,
    /// Per-index counts converted into exclusive offsets.
    CountsToOffsetsScan,
}

impl ActionKind {
    /// `true` for kinds dispatched through the fused scan.
    pub fn is_scan(self) -> bool {
        !matches!(self, ActionKind::Stream)
    }
}

/// Index information handed to predicates and bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopIndex {
    /// Index in the loop's own range.
    pub i: usize,
    /// Index in the batch's synthetic index space.
    pub global: usize,
    /// Compacted output position for scan bodies; equal to `i` otherwise.
    pub pos: usize,
    /// Offset of the action's first index in the synthetic index space.
    pub action_offset: usize,
    /// `true` when running inside a fused dispatch.
    pub fused: bool,
}

#[cfg(feature = "parallel")]
pub(crate) type PredicateFn<'a> = Box<dyn Fn(LoopIndex) -> bool + Send + Sync + 'a>;
#[cfg(feature = "parallel")]
pub(crate) type BodyFn<'a> = Box<dyn Fn(LoopIndex) + Send + Sync + 'a>;
#[cfg(feature = "parallel")]
pub(crate) type CountFn<'a> = Box<dyn Fn(LoopIndex) -> usize + Send + Sync + 'a>;

#[cfg(not(feature = "parallel"))]
pub(crate) type PredicateFn<'a> = Box<dyn Fn(LoopIndex) -> bool + 'a>;
#[cfg(not(feature = "parallel"))]
pub(crate) type BodyFn<'a> = Box<dyn Fn(LoopIndex) + 'a>;
#[cfg(not(feature = "parallel"))]
pub(crate) type CountFn<'a> = Box<dyn Fn(LoopIndex) -> usize + 'a>;

pub(crate) enum ActionOp<'a> {
    Stream {
        predicate: Option<PredicateFn<'a>>,
        body: BodyFn<'a>,
    },
    Scan {
        accumulator: AccumulatorId,
        predicate: PredicateFn<'a>,
        body: BodyFn<'a>,
    },
    CountsToOffsets {
        accumulator: AccumulatorId,
        target: HostDeviceArray<usize>,
        counts: CountFn<'a>,
    },
}

impl ActionOp<'_> {
    pub(crate) fn kind(&self) -> ActionKind {
        match self {
            ActionOp::Stream { .. } => ActionKind::Stream,
            ActionOp::Scan { .. } => ActionKind::Scan,
            ActionOp::CountsToOffsets { .. } => ActionKind::CountsToOffsetsScan,
        }
    }
}

pub(crate) struct Action<'a> {
    pub(crate) range: Range<usize>,
    /// Watermark of the batch when the action was registered.
    pub(crate) offset: usize,
    pub(crate) op: ActionOp<'a>,
}

impl fmt::Debug for Action<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind())
            .field("range", &self.range)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<'a> Action<'a> {
    pub(crate) fn kind(&self) -> ActionKind {
        self.op.kind()
    }

    pub(crate) fn len(&self) -> usize {
        self.range.len()
    }

    pub(crate) fn accumulator(&self) -> Option<AccumulatorId> {
        match &self.op {
            ActionOp::Stream { .. } => None,
            ActionOp::Scan { accumulator, .. } | ActionOp::CountsToOffsets { accumulator, .. } => {
                Some(*accumulator)
            }
        }
    }

    pub(crate) fn target(&self) -> Option<&HostDeviceArray<usize>> {
        match &self.op {
            ActionOp::CountsToOffsets { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Index record for the `j`-th iteration of this action.
    #[inline]
    pub(crate) fn index(&self, j: usize, fused: bool) -> LoopIndex {
        let i = self.range.start + j;
        LoopIndex {
            i,
            global: self.offset + j,
            pos: i,
            action_offset: self.offset,
            fused,
        }
    }

    /// Run a stream iteration: the body executes when the predicate holds.
    #[inline]
    pub(crate) fn run_stream(&self, ix: LoopIndex) {
        if let ActionOp::Stream { predicate, body } = &self.op {
            if predicate.as_ref().map_or(true, |p| p(ix)) {
                body(ix);
            }
        }
    }

    /// Contribution of one iteration to the fused scan.
    ///
    /// Scans contribute 1 where the predicate holds; counts-to-offsets
    /// actions contribute their raw count.
    #[inline]
    pub(crate) fn increment(&self, ix: LoopIndex) -> usize {
        match &self.op {
            ActionOp::Stream { .. } => 0,
            ActionOp::Scan { predicate, .. } => usize::from(predicate(ix)),
            ActionOp::CountsToOffsets { counts, .. } => counts(ix),
        }
    }
}
