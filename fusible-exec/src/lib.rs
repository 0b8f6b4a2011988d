//! Execution policies and parallel primitives for fusible loops.
//!
//! This crate is the backend layer underneath the loop fuser: it knows how to
//! run a single loop over `[0, n)` on a chosen backend, and nothing about
//! batching. The fuser packs many small loops into one call to these
//! primitives.
//!
//! # Policies
//!
//! - [`ExecPolicy::Sequential`]: plain host loop, in index order
//! - [`ExecPolicy::Threaded`]: host loop split across the rayon pool
//! - [`ExecPolicy::Device`]: simulated accelerator, every index is an
//!   independent task operating on device-resident data
//!
//! # Primitives
//!
//! - [`forall`]: parallel-for over an index range
//! - [`tabulate`]: `out[i] = f(i)`
//! - [`reduce`]: map-reduce over an index range
//! - [`exclusive_scan`], [`exclusive_scan_into`], [`inclusive_scan`]: prefix scans
//! - [`synchronize`], [`device_synchronize`]: device barriers
//!
//! # Example
//!
//! ```rust
//! use fusible_exec::{exclusive_scan, ExecPolicy};
//!
//! let mut counts = vec![2usize, 0, 3, 1];
//! let total = exclusive_scan(ExecPolicy::Sequential, &mut counts, |a, b| a + b, 0).unwrap();
//! assert_eq!(counts, vec![0, 2, 2, 5]);
//! assert_eq!(total, 6);
//! ```

mod device;
mod element;
mod forall;
mod policy;
mod scan;
#[cfg(feature = "parallel")]
mod threading;

pub use device::{device_sync_count, device_synchronize, synchronize};
pub use element::{Element, MaybeSend, MaybeSendSync, MaybeSync};
pub use forall::{forall, reduce, tabulate};
pub use policy::{ExecContext, ExecPolicy};
pub use scan::{exclusive_scan, exclusive_scan_into, exclusive_sum, inclusive_scan};

// ============================================================================
// Constants
// ============================================================================

/// Minimum loop length for threaded host execution.
///
/// Host loops at or below this length run on the calling thread; the rayon
/// dispatch overhead dominates for shorter loops.
pub const MIN_THREAD_LENGTH: usize = 1 << 15;

/// Minimum number of elements per chunk in a parallel scan.
pub const SCAN_MIN_CHUNK: usize = 1 << 12;

// ============================================================================
// Error types
// ============================================================================

/// Errors reported by the execution primitives.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Loop range with `start > end`.
    #[error("invalid loop range {start}..{end}")]
    InvalidRange { start: usize, end: usize },

    /// Scan input and output lengths differ.
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Result type for execution primitives.
pub type Result<T> = std::result::Result<T, ExecError>;
