//! Kernel-side array handle.

use std::fmt;
use std::sync::Arc;

use fusible_exec::ExecContext;

use crate::array::Storage;

/// Bounds-checked handle to an array's data in one memory space.
///
/// A view is what a loop body captures: it is `Send + Sync`, cheap to
/// clone, and keeps the underlying storage alive. Element accesses take
/// `&self`, the way a kernel thread writes through a shared device pointer,
/// so the writing methods are `unsafe`: the caller guarantees that no two
/// iterations touch the same element at once.
///
/// Writes are recorded on the array, so a host read after the kernel ran
/// migrates again even if the host copy was refreshed after the view was
/// taken.
pub struct ArrayView<T> {
    ptr: *mut T,
    len: usize,
    context: ExecContext,
    _storage: Arc<Storage<T>>,
}

// SAFETY: the view only exposes element-wise copies of `T`; the storage it
// points into is kept alive by `_storage`.
unsafe impl<T: Send> Send for ArrayView<T> {}
unsafe impl<T: Send + Sync> Sync for ArrayView<T> {}

impl<T> Clone for ArrayView<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: self.ptr,
            len: self.len,
            context: self.context,
            _storage: Arc::clone(&self._storage),
        }
    }
}

impl<T> fmt::Debug for ArrayView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayView")
            .field("len", &self.len)
            .field("context", &self.context)
            .finish()
    }
}

impl<T> ArrayView<T> {
    pub(crate) fn new(storage: Arc<Storage<T>>, ptr: *mut T, context: ExecContext) -> Self {
        let len = storage.len;
        Self {
            ptr,
            len,
            context,
            _storage: storage,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Memory space this view points into.
    pub fn context(&self) -> ExecContext {
        self.context
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    /// The viewed data as a slice.
    ///
    /// # Safety
    /// No iteration may write the array while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[T] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }

    /// The viewed data as a mutable slice.
    ///
    /// # Safety
    /// The caller must be the only accessor of the array while the slice is
    /// alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [T] {
        self._storage.mark_written(self.context);
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }

    #[inline]
    fn check(&self, index: usize) {
        assert!(
            index < self.len,
            "index {index} out of bounds for view of length {}",
            self.len
        );
    }
}

impl<T: Copy> ArrayView<T> {
    #[inline]
    pub fn get(&self, index: usize) -> T {
        self.check(index);
        // SAFETY: bounds checked; storage alive.
        unsafe { *self.ptr.add(index) }
    }

    /// Write element `index`.
    ///
    /// # Safety
    /// No other access to element `index`, through this view or any other
    /// handle to the array, may run concurrently with the write.
    #[inline]
    pub unsafe fn set(&self, index: usize, value: T) {
        self.check(index);
        *self.ptr.add(index) = value;
        self._storage.mark_written(self.context);
    }

    /// Replace element `index` with `f(old)`.
    ///
    /// # Safety
    /// As for [`set`](Self::set).
    #[inline]
    pub unsafe fn update(&self, index: usize, f: impl FnOnce(T) -> T) {
        self.check(index);
        let p = self.ptr.add(index);
        *p = f(*p);
        self._storage.mark_written(self.context);
    }
}
