//! Loop fusion and batching for many small parallel loops.
//!
//! Launching a kernel per tiny loop wastes most of the time on launch and
//! synchronization overhead. A [`LoopFuser`] batch records loops instead of
//! running them, then dispatches the whole batch as a handful of kernels:
//!
//! - stream loops are concatenated into one synthetic index space and run as
//!   a single kernel, each index locating its loop with an upper-bound search
//!   over running end offsets ([`RangeTable`]);
//! - scan loops (compactions and counts-to-offsets conversions) share one
//!   tabulate, one exclusive scan and one write kernel, with per-loop output
//!   numbering carried by [accumulators](AccumulatorId).
//!
//! # Core Types
//!
//! - [`LoopFuser`]: owns the configuration and hands out batches
//! - [`BatchSession`]: an open batch; registration, flush and stop
//! - [`LoopIndex`]: index information passed to loop bodies
//! - [`HostDeviceArray`]: data shared between host code and kernels
//!
//! # Example
//!
//! ```rust
//! use fusible::{ExecPolicy, FuserConfig, HostDeviceArray, LoopFuser};
//!
//! let values = HostDeviceArray::from_vec(vec![5, -1, 7, -3, 2, -8, 4, 0]);
//! let kept = HostDeviceArray::<i32>::new(8);
//!
//! let mut fuser = LoopFuser::new(FuserConfig::default().with_policy(ExecPolicy::Device));
//! let ctx = fuser.config().policy.context();
//! let input = values.read_view(ctx).unwrap();
//! let output = kept.view(ctx).unwrap();
//!
//! let mut batch = fuser.start_batch().unwrap();
//! let count = batch.accumulator(0);
//! let keys = input.clone();
//! batch
//!     .register_scan(
//!         0..8,
//!         count,
//!         move |ix| keys.get(ix.i) > 0,
//!         move |ix| unsafe { output.set(ix.pos, input.get(ix.i)) },
//!     )
//!     .unwrap();
//! let outcome = batch.stop().unwrap();
//!
//! assert_eq!(outcome[count], 4);
//! assert_eq!(kept.to_vec().unwrap()[..4], [5, 7, 2, 4]);
//! ```
//!
//! # Features
//!
//! - `parallel` (default): threaded and device policies run on the rayon pool
//! - `force-sync`: synchronize the device after every flush in release builds

mod action;
mod config;
mod controller;
mod ledger;
pub mod numeric;
mod pack;
pub mod range_index;
mod scan_fuse;

// ============================================================================
// Batching
// ============================================================================
pub use action::{ActionKind, LoopIndex};
pub use config::{FuserConfig, DEFAULT_MAX_PENDING_ACTIONS};
pub use controller::{BatchOutcome, BatchSession, FlushReport, FuserState, FuserStats, LoopFuser};
pub use ledger::AccumulatorId;

// ============================================================================
// Range index
// ============================================================================
pub use range_index::{binary_search, RangeTable};

// ============================================================================
// Re-exports from the execution and array layers
// ============================================================================
pub use fusible_array::{ArrayError, ArrayView, HostDeviceArray, Residency};
pub use fusible_exec::{
    device_sync_count, device_synchronize, forall, ExecContext, ExecError, ExecPolicy,
};

// ============================================================================
// Error types
// ============================================================================

/// Errors reported by the loop fuser.
#[derive(Debug, thiserror::Error)]
pub enum FuserError {
    /// Failure in an execution primitive.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Failure resolving an array.
    #[error(transparent)]
    Array(#[from] ArrayError),

    /// A batch is already open on this fuser.
    #[error("a batch is already open; batches do not nest")]
    NestedBatch,

    /// Loop range with `start > end`.
    #[error("invalid loop range {start}..{end}")]
    InvalidRange { start: usize, end: usize },

    /// Counts-to-offsets target too short for the loop range.
    #[error("scan target of length {len} cannot hold range {start}..{end}")]
    ScanRangeMismatch { start: usize, end: usize, len: usize },

    /// Accumulator handle from another batch.
    #[error("unknown accumulator {id}; batch has {count}")]
    UnknownAccumulator { id: usize, count: usize },

    /// Scan counts whose total, or whose sum with an accumulator, does not
    /// fit in `usize`.
    #[error("scan count overflow{}", match accumulator {
        Some(id) => format!(" in accumulator {id}"),
        None => String::new(),
    })]
    CountOverflow { accumulator: Option<usize> },
}

/// Result type for fuser operations.
pub type Result<T> = std::result::Result<T, FuserError>;
