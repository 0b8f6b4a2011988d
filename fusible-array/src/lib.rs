//! Host/device arrays for fusible loops.
//!
//! [`HostDeviceArray`] owns one logical buffer with a host copy and a lazily
//! allocated device copy. Requesting a pointer or view in an
//! [`ExecContext`](fusible_exec::ExecContext) migrates the data there on
//! demand; reads through the host API bring it back. Loop bodies capture
//! [`ArrayView`]s, which are cheap to clone and valid on any worker.
//!
//! # Example
//!
//! ```rust
//! use fusible_array::HostDeviceArray;
//! use fusible_exec::{forall, ExecContext, ExecPolicy};
//!
//! let data = HostDeviceArray::from_vec(vec![0i32; 8]);
//! let view = data.view(ExecContext::Device).unwrap();
//! // SAFETY: every iteration writes a distinct element.
//! forall(ExecPolicy::Device, 0..8, |i| unsafe { view.set(i, i as i32 * 10) }).unwrap();
//!
//! // The host copy is stale until it is read through a migrating access.
//! assert_eq!(data.peek_host().unwrap(), vec![0; 8]);
//! assert_eq!(data.get(3).unwrap(), 30);
//! ```

mod array;
mod view;

pub use array::{HostDeviceArray, Residency};
pub use view::ArrayView;

/// Errors reported by host/device arrays.
#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    /// The array was freed and no longer hands out pointers.
    #[error("array '{name}' used after free")]
    Freed { name: String },

    /// Host-side element access outside the array.
    #[error("index {index} out of bounds for array of length {len}")]
    OutOfBounds { index: usize, len: usize },

    /// Bulk copy with a source of the wrong length.
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Result type for array operations.
pub type Result<T> = std::result::Result<T, ArrayError>;
