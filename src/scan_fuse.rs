//! Fused dispatch of scan and counts-to-offsets actions.
//!
//! All pending scan actions are evaluated as one batch:
//!
//! 1. a tabulate kernel writes each index's increment into a shared buffer
//!    (the predicate as 0/1 for scans, the raw count for counts actions);
//! 2. one exclusive scan numbers the whole batch;
//! 3. per-action totals are read off the scanned buffer and folded into the
//!    accumulators in registration order, giving every action its base;
//!    totals that do not fit in `usize` fail the batch before any body runs;
//! 4. a write kernel calls scan bodies with their compacted position and
//!    stores counts-to-offsets results.

use fusible_array::{ArrayError, ArrayView};
use fusible_exec::{exclusive_scan, forall, tabulate, ExecPolicy};
use smallvec::SmallVec;

use crate::action::{Action, ActionOp, LoopIndex};
use crate::range_index::RangeTable;
use crate::{FuserError, Result};

/// Kernels launched by a non-empty fused scan.
pub(crate) const SCAN_KERNELS: usize = 3;

/// Result of one fused scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ScanSummary {
    /// Selected iterations (or summed counts) per action.
    pub(crate) counts: SmallVec<[usize; 8]>,
    /// First output position of each action.
    pub(crate) bases: SmallVec<[usize; 8]>,
    /// Sum of `counts`.
    pub(crate) selected: usize,
    pub(crate) kernels: usize,
}

/// Evaluate `actions` as one fused scan.
///
/// `accumulators` is the batch's arena; each action advances the
/// accumulator it names by its own count. `scratch` is reused between calls.
///
/// Fails with [`FuserError::CountOverflow`] when the batch total or an
/// advanced accumulator would reach `usize::MAX`; accumulators are left
/// untouched and no body runs in that case.
pub(crate) fn scan_fuse(
    policy: ExecPolicy,
    actions: &[&Action<'_>],
    accumulators: &mut [usize],
    scratch: &mut Vec<usize>,
    fused: bool,
) -> Result<ScanSummary> {
    let table = RangeTable::from_lengths(actions.iter().map(|a| a.len()));
    let total = table.total();
    let mut summary = ScanSummary::default();

    if total == 0 {
        for action in actions {
            summary.counts.push(0);
            summary
                .bases
                .push(action.accumulator().map_or(0, |id| accumulators[id.index()]));
        }
        return Ok(summary);
    }
    tracing::trace!(actions = actions.len(), total, ?policy, "fused scan");

    // Targets are resolved before any kernel runs.
    let targets = actions
        .iter()
        .map(|a| a.target().map(|t| t.view(policy.context())).transpose())
        .collect::<std::result::Result<SmallVec<[Option<ArrayView<usize>>; 8]>, ArrayError>>()?;

    scratch.clear();
    scratch.resize(total, 0);
    {
        let table = &table;
        tabulate(policy, scratch.as_mut_slice(), move |g| {
            table.locate_local(g).map_or(0, |(k, j)| {
                let action = actions[k];
                action.increment(action.index(j, fused))
            })
        })?;
    }
    // Saturating addition is still associative on unsigned values, so a
    // saturated total marks overflow anywhere in the batch.
    let grand = exclusive_scan(policy, scratch.as_mut_slice(), usize::saturating_add, 0)?;
    if grand == usize::MAX {
        return Err(FuserError::CountOverflow { accumulator: None });
    }
    let scanned: &[usize] = scratch;
    let at = move |g: usize| if g < total { scanned[g] } else { grand };

    let mut advanced: SmallVec<[usize; 8]> = accumulators.iter().copied().collect();
    for (k, action) in actions.iter().enumerate() {
        let count = at(table.end(k)) - at(table.start(k));
        let base = match action.accumulator() {
            Some(id) => {
                let slot = &mut advanced[id.index()];
                let base = *slot;
                *slot = base
                    .checked_add(count)
                    .filter(|&next| next != usize::MAX)
                    .ok_or(FuserError::CountOverflow {
                        accumulator: Some(id.index()),
                    })?;
                base
            }
            None => 0,
        };
        summary.counts.push(count);
        summary.bases.push(base);
    }
    accumulators.copy_from_slice(&advanced);
    summary.selected = grand;

    {
        let table = &table;
        let bases = &summary.bases;
        let targets = &targets;
        forall(policy, 0..total, move |g| {
            let Some((k, j)) = table.locate_local(g) else {
                return;
            };
            let action = actions[k];
            let before = at(g);
            let pos = bases[k] + before - at(table.start(k));
            match &action.op {
                ActionOp::Scan { body, .. } => {
                    if at(g + 1) > before {
                        body(LoopIndex {
                            pos,
                            ..action.index(j, fused)
                        });
                    }
                }
                ActionOp::CountsToOffsets { .. } => {
                    if let Some(view) = &targets[k] {
                        // SAFETY: each global index owns one target element.
                        unsafe { view.set(action.range.start + j, pos) };
                    }
                }
                ActionOp::Stream { .. } => {}
            }
        })?;
    }
    summary.kernels = SCAN_KERNELS;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionOp;
    use crate::ledger::BatchLedger;
    use fusible_array::HostDeviceArray;

    /// Fuse every pending action of `ledger` as one scan.
    fn fuse_pending(policy: ExecPolicy, ledger: &mut BatchLedger<'_>) -> Result<ScanSummary> {
        let actions = ledger.take_actions();
        let refs: Vec<&Action<'_>> = actions.iter().collect();
        let mut scratch = Vec::new();
        scan_fuse(policy, &refs, ledger.accumulators_mut(), &mut scratch, true)
    }

    #[test]
    fn test_dependent_scans_share_accumulator() {
        for policy in [ExecPolicy::Sequential, ExecPolicy::Threaded, ExecPolicy::Device] {
            let out = HostDeviceArray::<i32>::filled(12, -1);
            let view = out.view(policy.context()).unwrap();
            let mut ledger = BatchLedger::new();
            let acc = ledger.add_accumulator(0);
            // 2 + 2 + 8 selected iterations.
            for (lo, hi, tag) in [(0usize, 4usize, 10i32), (0, 2, 20), (0, 8, 30)] {
                let view = view.clone();
                let keep = hi - lo;
                ledger.push(
                    lo..hi,
                    ActionOp::Scan {
                        accumulator: acc,
                        predicate: Box::new(move |ix: LoopIndex| keep != 4 || ix.i % 2 == 0),
                        body: Box::new(move |ix: LoopIndex| unsafe {
                            view.set(ix.pos, tag + ix.i as i32)
                        }),
                    },
                );
            }
            let summary = fuse_pending(policy, &mut ledger).unwrap();

            assert_eq!(summary.counts.as_slice(), &[2, 2, 8]);
            assert_eq!(summary.bases.as_slice(), &[0, 2, 4]);
            assert_eq!(summary.selected, 12);
            assert_eq!(summary.kernels, SCAN_KERNELS);
            assert_eq!(ledger.accumulators_mut()[acc.index()], 12);
            let got = out.to_vec().unwrap();
            assert_eq!(&got[..4], &[10, 12, 20, 21], "{policy}");
            assert_eq!(&got[4..], &[30, 31, 32, 33, 34, 35, 36, 37]);
        }
    }

    #[test]
    fn test_counts_to_offsets_separate_accumulators() {
        let a = HostDeviceArray::<usize>::new(4);
        let b = HostDeviceArray::<usize>::new(4);
        let mut ledger = BatchLedger::new();
        let acc_a = ledger.add_accumulator(0);
        let acc_b = ledger.add_accumulator(0);
        for (target, acc, count) in [(&a, acc_a, 2usize), (&b, acc_b, 3usize)] {
            ledger.push(
                0..3,
                ActionOp::CountsToOffsets {
                    accumulator: acc,
                    target: target.clone(),
                    counts: Box::new(move |_: LoopIndex| count),
                },
            );
        }
        let summary = fuse_pending(ExecPolicy::Device, &mut ledger).unwrap();

        assert_eq!(summary.counts.as_slice(), &[6, 9]);
        assert_eq!(a.to_vec().unwrap()[..3], [0, 2, 4]);
        assert_eq!(b.to_vec().unwrap()[..3], [0, 3, 6]);
        assert_eq!(ledger.take_accumulators(), vec![6, 9]);
    }

    #[test]
    fn test_empty_scan_keeps_accumulators() {
        let mut ledger = BatchLedger::new();
        let acc = ledger.add_accumulator(5);
        ledger.push(
            3..3,
            ActionOp::Scan {
                accumulator: acc,
                predicate: Box::new(|_: LoopIndex| true),
                body: Box::new(|_: LoopIndex| panic!("empty scan ran")),
            },
        );
        let summary = fuse_pending(ExecPolicy::Sequential, &mut ledger).unwrap();
        assert_eq!(summary.kernels, 0);
        assert_eq!(summary.bases.as_slice(), &[5]);
        assert_eq!(ledger.accumulator(acc).unwrap(), 5);
    }

    #[test]
    fn test_freed_target_fails_before_kernels() {
        let target = HostDeviceArray::<usize>::new(2);
        target.free();
        let mut ledger = BatchLedger::new();
        let acc = ledger.add_accumulator(0);
        ledger.push(
            0..2,
            ActionOp::CountsToOffsets {
                accumulator: acc,
                target: target.clone(),
                counts: Box::new(|_: LoopIndex| -> usize { panic!("counts evaluated") }),
            },
        );
        let err = fuse_pending(ExecPolicy::Sequential, &mut ledger).unwrap_err();
        assert!(matches!(err, FuserError::Array(ArrayError::Freed { .. })));
        assert_eq!(ledger.accumulator(acc).unwrap(), 0);
    }

    #[test]
    fn test_count_total_overflow_rejected() {
        for policy in [ExecPolicy::Sequential, ExecPolicy::Device] {
            let target = HostDeviceArray::<usize>::filled(2, 7);
            let mut ledger = BatchLedger::new();
            let acc = ledger.add_accumulator(0);
            ledger.push(
                0..2,
                ActionOp::CountsToOffsets {
                    accumulator: acc,
                    target: target.clone(),
                    counts: Box::new(|_: LoopIndex| usize::MAX / 2 + 1),
                },
            );
            let err = fuse_pending(policy, &mut ledger).unwrap_err();
            assert!(matches!(err, FuserError::CountOverflow { accumulator: None }));
            assert_eq!(ledger.accumulator(acc).unwrap(), 0);
            assert_eq!(target.to_vec().unwrap(), vec![7, 7]);
        }
    }

    #[test]
    fn test_accumulator_overflow_leaves_arena_unchanged() {
        let mut ledger = BatchLedger::new();
        let low = ledger.add_accumulator(3);
        let high = ledger.add_accumulator(usize::MAX - 1);
        for acc in [low, high] {
            ledger.push(
                0..1,
                ActionOp::Scan {
                    accumulator: acc,
                    predicate: Box::new(|_: LoopIndex| true),
                    body: Box::new(|_: LoopIndex| panic!("body ran after overflow")),
                },
            );
        }
        let err = fuse_pending(ExecPolicy::Sequential, &mut ledger).unwrap_err();
        assert!(matches!(err, FuserError::CountOverflow { accumulator: Some(1) }));
        assert_eq!(ledger.take_accumulators(), vec![3, usize::MAX - 1]);
    }
}
