//! Batch lifecycle: open, register, flush, stop.
//!
//! A [`LoopFuser`] hands out at most one [`BatchSession`] at a time. The
//! session records loops into its ledger and dispatches them on
//! [`BatchSession::flush`], on [`BatchSession::stop`], when the pending list
//! fills up, and when an ordered batch switches between stream and scan
//! actions. Dropping a session flushes whatever is still pending.

use std::ops::{Index, Range};
use std::sync::OnceLock;

use fusible_array::HostDeviceArray;
use fusible_exec::{synchronize, ExecContext, ExecPolicy, MaybeSendSync};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::action::{Action, ActionOp, LoopIndex};
use crate::config::FuserConfig;
use crate::ledger::{AccumulatorId, BatchLedger};
use crate::pack::{pack, pack_ordered};
use crate::scan_fuse::scan_fuse;
use crate::{FuserError, Result};

// ============================================================================
// State and reports
// ============================================================================

/// Lifecycle state of a [`LoopFuser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuserState {
    /// No batch is open; loops run through the executor directly.
    Idle,
    /// A batch is open and accepting registrations.
    Open,
    /// Pending actions are being dispatched.
    Flushing,
}

/// What one flush dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub actions: usize,
    pub stream_actions: usize,
    pub scan_actions: usize,
    /// Kernels launched; empty actions launch none.
    pub kernels: usize,
    /// Summed length of the dispatched ranges.
    pub indices: usize,
    /// A device synchronization followed the dispatch.
    pub synchronized: bool,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.actions == 0
    }

    fn merge(&mut self, other: &FlushReport) {
        self.actions += other.actions;
        self.stream_actions += other.stream_actions;
        self.scan_actions += other.scan_actions;
        self.kernels += other.kernels;
        self.indices += other.indices;
        self.synchronized |= other.synchronized;
    }
}

/// Lifetime counters of a [`LoopFuser`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuserStats {
    pub batches: u64,
    /// Non-empty flushes.
    pub flushes: u64,
    pub actions: u64,
    pub kernels: u64,
    pub device_syncs: u64,
}

/// Final state of a stopped batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    session: u64,
    accumulators: Vec<usize>,
    report: FlushReport,
}

impl BatchOutcome {
    /// Final value of an accumulator; `None` for handles of another batch.
    pub fn accumulator(&self, id: AccumulatorId) -> Option<usize> {
        if id.session() != self.session {
            return None;
        }
        self.accumulators.get(id.index()).copied()
    }

    pub fn accumulators(&self) -> &[usize] {
        &self.accumulators
    }

    /// Everything the batch dispatched, summed over its flushes.
    pub fn report(&self) -> FlushReport {
        self.report
    }
}

impl Index<AccumulatorId> for BatchOutcome {
    type Output = usize;

    /// # Panics
    /// If `id` belongs to another batch or is out of range.
    fn index(&self, id: AccumulatorId) -> &usize {
        assert_eq!(id.session(), self.session, "accumulator from another batch");
        &self.accumulators[id.index()]
    }
}

// ============================================================================
// LoopFuser
// ============================================================================

/// Owner of the batching state.
///
/// # Example
///
/// ```
/// use fusible::{ExecPolicy, FuserConfig, HostDeviceArray, LoopFuser};
///
/// let a = HostDeviceArray::<u32>::new(8);
/// let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Device));
/// {
///     let view = a.view(fuser.config().policy.context()).unwrap();
///     let mut batch = fuser.start_batch().unwrap();
///     let (lo, hi) = (view.clone(), view);
///     batch.stream(0..4, move |ix| unsafe { lo.set(ix.i, 1) }).unwrap();
///     batch.stream(4..8, move |ix| unsafe { hi.set(ix.i, 2) }).unwrap();
///     let outcome = batch.stop().unwrap();
///     assert_eq!(outcome.report().kernels, 1);
/// }
/// assert_eq!(a.to_vec().unwrap(), vec![1, 1, 1, 1, 2, 2, 2, 2]);
/// ```
#[derive(Debug)]
pub struct LoopFuser {
    config: FuserConfig,
    state: FuserState,
    stats: FuserStats,
    scan_scratch: Vec<usize>,
}

impl Default for LoopFuser {
    fn default() -> Self {
        Self::new(FuserConfig::default())
    }
}

impl LoopFuser {
    pub fn new(config: FuserConfig) -> Self {
        Self {
            config,
            state: FuserState::Idle,
            stats: FuserStats::default(),
            scan_scratch: Vec::new(),
        }
    }

    /// Process-wide fuser with the default configuration.
    pub fn global() -> &'static Mutex<LoopFuser> {
        static GLOBAL: OnceLock<Mutex<LoopFuser>> = OnceLock::new();
        GLOBAL.get_or_init(|| Mutex::new(LoopFuser::default()))
    }

    pub fn config(&self) -> &FuserConfig {
        &self.config
    }

    pub fn set_policy(&mut self, policy: ExecPolicy) {
        self.config.policy = policy;
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.config.verbose = verbose;
    }

    pub fn state(&self) -> FuserState {
        self.state
    }

    pub fn stats(&self) -> FuserStats {
        self.stats
    }

    /// Open a batch in the configured ordering mode.
    pub fn start_batch<'a>(&mut self) -> Result<BatchSession<'_, 'a>> {
        let preserve_order = self.config.preserve_order;
        self.start_batch_ordered(preserve_order)
    }

    /// Open a batch, choosing whether registration order is preserved.
    ///
    /// With `preserve_order`, scans and streams dispatch in registration
    /// order and, within a run of streams, iteration `j` of each loop runs
    /// after iteration `j` of the loops before it. Iterations at different
    /// offsets stay unordered, so a loop reading what an earlier loop wrote
    /// at another index needs a [`BatchSession::flush`] in between.
    ///
    /// Fails with [`FuserError::NestedBatch`] while another batch is open.
    pub fn start_batch_ordered<'a>(
        &mut self,
        preserve_order: bool,
    ) -> Result<BatchSession<'_, 'a>> {
        if self.state != FuserState::Idle {
            return Err(FuserError::NestedBatch);
        }
        self.state = FuserState::Open;
        self.stats.batches += 1;
        tracing::debug!(
            policy = %self.config.policy,
            preserve_order,
            fusion = self.config.fusion_enabled,
            "batch opened"
        );
        Ok(BatchSession {
            fuser: self,
            ledger: BatchLedger::new(),
            preserve_order,
            report: FlushReport::default(),
            finished: false,
        })
    }

    fn dispatch(
        &mut self,
        actions: &[Action<'_>],
        accumulators: &mut [usize],
        preserve_order: bool,
        fused: bool,
    ) -> Result<FlushReport> {
        if actions.is_empty() {
            return Ok(FlushReport::default());
        }
        self.state = FuserState::Flushing;
        let result = self.dispatch_runs(actions, accumulators, preserve_order, fused);
        self.state = FuserState::Open;
        result
    }

    fn dispatch_runs(
        &mut self,
        actions: &[Action<'_>],
        accumulators: &mut [usize],
        preserve_order: bool,
        fused: bool,
    ) -> Result<FlushReport> {
        let policy = self.config.policy;
        let verbose = self.config.verbose;
        let mut report = FlushReport {
            actions: actions.len(),
            indices: actions.iter().map(Action::len).sum(),
            ..FlushReport::default()
        };

        if verbose {
            for (k, action) in actions.iter().enumerate() {
                tracing::info!(
                    action = k,
                    kind = ?action.kind(),
                    start = action.range.start,
                    end = action.range.end,
                    offset = action.offset,
                    "pending action"
                );
            }
        }

        for run in group_runs(actions, preserve_order) {
            if run.scan {
                let summary = scan_fuse(
                    policy,
                    &run.actions,
                    accumulators,
                    &mut self.scan_scratch,
                    fused,
                )?;
                report.scan_actions += run.actions.len();
                report.kernels += summary.kernels;
                tracing::trace!(
                    actions = run.actions.len(),
                    selected = summary.selected,
                    "scan run"
                );
                if verbose {
                    let per_action = summary.counts.iter().zip(&summary.bases);
                    for (k, (count, base)) in per_action.enumerate() {
                        tracing::info!(scan = k, count, base, "scan action");
                    }
                }
            } else {
                let kernels = if preserve_order {
                    pack_ordered(policy, &run.actions, fused)?
                } else {
                    pack(policy, &run.actions, fused)?
                };
                report.stream_actions += run.actions.len();
                report.kernels += kernels;
            }
        }

        if report.kernels > 0 {
            report.synchronized = synchronize(policy, self.config.force_sync)?;
        }

        self.stats.flushes += 1;
        self.stats.actions += report.actions as u64;
        self.stats.kernels += report.kernels as u64;
        self.stats.device_syncs += u64::from(report.synchronized);

        if verbose {
            tracing::info!(
                actions = report.actions,
                kernels = report.kernels,
                indices = report.indices,
                synchronized = report.synchronized,
                "flush"
            );
        } else {
            tracing::debug!(
                actions = report.actions,
                kernels = report.kernels,
                indices = report.indices,
                "flush"
            );
        }
        Ok(report)
    }
}

/// Actions dispatched together through the same path.
struct Run<'r, 'a> {
    scan: bool,
    actions: SmallVec<[&'r Action<'a>; 16]>,
}

/// Split pending actions into dispatch runs.
///
/// Ordered batches keep contiguous runs in registration order. Otherwise
/// stream and scan actions each form one run, dispatched in the order their
/// first action was registered.
fn group_runs<'r, 'a>(
    actions: &'r [Action<'a>],
    preserve_order: bool,
) -> SmallVec<[Run<'r, 'a>; 2]> {
    let mut runs: SmallVec<[Run<'r, 'a>; 2]> = SmallVec::new();
    for action in actions {
        let scan = action.kind().is_scan();
        let slot = if preserve_order {
            runs.last_mut().filter(|run| run.scan == scan)
        } else {
            runs.iter_mut().find(|run| run.scan == scan)
        };
        match slot {
            Some(run) => run.actions.push(action),
            None => runs.push(Run {
                scan,
                actions: smallvec::smallvec![action],
            }),
        }
    }
    runs
}

// ============================================================================
// BatchSession
// ============================================================================

/// An open batch.
///
/// Closures registered here may borrow anything that outlives `'a`; they are
/// dropped by the flush that runs them.
pub struct BatchSession<'f, 'a> {
    fuser: &'f mut LoopFuser,
    ledger: BatchLedger<'a>,
    preserve_order: bool,
    report: FlushReport,
    finished: bool,
}

impl std::fmt::Debug for BatchSession<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSession")
            .field("pending", &self.ledger.len())
            .field("watermark", &self.ledger.watermark())
            .field("preserve_order", &self.preserve_order)
            .finish()
    }
}

impl<'f, 'a> BatchSession<'f, 'a> {
    pub fn preserves_order(&self) -> bool {
        self.preserve_order
    }

    pub fn policy(&self) -> ExecPolicy {
        self.fuser.config.policy
    }

    /// Memory space registered bodies should take their views in.
    pub fn context(&self) -> ExecContext {
        self.fuser.config.policy.context()
    }

    /// Number of registered actions not yet dispatched.
    pub fn pending(&self) -> usize {
        self.ledger.len()
    }

    /// Summed length of the pending actions.
    pub fn watermark(&self) -> usize {
        self.ledger.watermark()
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.fuser.set_verbose(verbose);
    }

    /// New accumulator starting at `initial`.
    pub fn accumulator(&mut self, initial: usize) -> AccumulatorId {
        self.ledger.add_accumulator(initial)
    }

    /// Current value of an accumulator; pending scans are not yet counted.
    pub fn accumulator_value(&self, id: AccumulatorId) -> Result<usize> {
        self.ledger.accumulator(id)
    }

    pub fn set_accumulator(&mut self, id: AccumulatorId, value: usize) -> Result<()> {
        self.ledger.set_accumulator(id, value)
    }

    /// Register a loop running `body` for every index of `range`.
    ///
    /// `body` runs at flush time, possibly in parallel with other iterations
    /// and other loops of the batch. Writes through
    /// [`ArrayView::set`](fusible_array::ArrayView::set) are `unsafe` for this
    /// reason: loops in one batch that write the same element race, and
    /// which write survives depends on scheduling.
    pub fn stream<B>(&mut self, range: Range<usize>, body: B) -> Result<()>
    where
        B: Fn(LoopIndex) + MaybeSendSync + 'a,
    {
        self.register(
            range,
            ActionOp::Stream {
                predicate: None,
                body: Box::new(body),
            },
        )
    }

    /// Register a loop running `body` for the indices where `predicate` holds.
    pub fn register_stream<P, B>(
        &mut self,
        range: Range<usize>,
        predicate: P,
        body: B,
    ) -> Result<()>
    where
        P: Fn(LoopIndex) -> bool + MaybeSendSync + 'a,
        B: Fn(LoopIndex) + MaybeSendSync + 'a,
    {
        self.register(
            range,
            ActionOp::Stream {
                predicate: Some(Box::new(predicate)),
                body: Box::new(body),
            },
        )
    }

    /// Register a compaction.
    ///
    /// `body` runs for each index where `predicate` holds, with
    /// [`LoopIndex::pos`] set to the next position of `accumulator`:
    /// selected indices are numbered consecutively, in index order, after
    /// everything counted by earlier scans sharing the accumulator.
    pub fn register_scan<P, B>(
        &mut self,
        range: Range<usize>,
        accumulator: AccumulatorId,
        predicate: P,
        body: B,
    ) -> Result<()>
    where
        P: Fn(LoopIndex) -> bool + MaybeSendSync + 'a,
        B: Fn(LoopIndex) + MaybeSendSync + 'a,
    {
        self.ledger.check_accumulator(accumulator)?;
        self.register(
            range,
            ActionOp::Scan {
                accumulator,
                predicate: Box::new(predicate),
                body: Box::new(body),
            },
        )
    }

    /// Register a counts-to-offsets conversion.
    ///
    /// For every `i` in `range`, `target[i]` receives the accumulator's
    /// value plus the sum of `counts` over the indices of `range` before `i`.
    /// The accumulator then advances by the total count.
    pub fn register_counts_to_offsets_scan<C>(
        &mut self,
        range: Range<usize>,
        accumulator: AccumulatorId,
        target: &HostDeviceArray<usize>,
        counts: C,
    ) -> Result<()>
    where
        C: Fn(LoopIndex) -> usize + MaybeSendSync + 'a,
    {
        self.ledger.check_accumulator(accumulator)?;
        check_range(&range)?;
        if target.len() < range.end {
            return Err(FuserError::ScanRangeMismatch {
                start: range.start,
                end: range.end,
                len: target.len(),
            });
        }
        self.register(
            range,
            ActionOp::CountsToOffsets {
                accumulator,
                target: target.clone(),
                counts: Box::new(counts),
            },
        )
    }

    /// Dispatch every pending action.
    ///
    /// Flushing an empty batch does nothing and reports nothing.
    pub fn flush(&mut self) -> Result<FlushReport> {
        self.flush_with(true)
    }

    /// Flush and close the batch, returning the final accumulator values.
    pub fn stop(mut self) -> Result<BatchOutcome> {
        self.flush()?;
        self.finished = true;
        Ok(BatchOutcome {
            session: self.ledger.session(),
            accumulators: self.ledger.take_accumulators(),
            report: self.report,
        })
    }

    fn register(&mut self, range: Range<usize>, op: ActionOp<'a>) -> Result<()> {
        check_range(&range)?;
        let scan = op.kind().is_scan();
        if let Some(last) = self.ledger.last_kind() {
            let boundary = self.preserve_order && last.is_scan() != scan;
            let full = self.ledger.len() >= self.fuser.config.max_pending_actions;
            if boundary || full {
                tracing::trace!(boundary, full, "flush before registration");
                self.flush()?;
            }
        }
        let offset = self.ledger.push(range, op);
        tracing::trace!(offset, watermark = self.ledger.watermark(), scan, "registered");
        if !self.fuser.config.fusion_enabled {
            self.flush_with(false)?;
        }
        Ok(())
    }

    fn flush_with(&mut self, fused: bool) -> Result<FlushReport> {
        if self.ledger.is_empty() {
            return Ok(FlushReport::default());
        }
        let actions = self.ledger.take_actions();
        let result = self
            .fuser
            .dispatch(&actions, self.ledger.accumulators_mut(), self.preserve_order, fused);
        self.ledger.recycle(actions);
        let report = result?;
        self.report.merge(&report);
        Ok(report)
    }
}

impl Drop for BatchSession<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.flush() {
                tracing::error!(error = %err, "flush of dropped batch failed");
            }
        }
        self.fuser.state = FuserState::Idle;
        tracing::debug!(
            actions = self.report.actions,
            kernels = self.report.kernels,
            "batch closed"
        );
    }
}

fn check_range(range: &Range<usize>) -> Result<()> {
    if range.start > range.end {
        return Err(FuserError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}
