//! Shared host/device buffer with lazy residency tracking.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fusible_exec::{Element, ExecContext};
use parking_lot::Mutex;

use crate::view::ArrayView;
use crate::{ArrayError, Result};

/// Snapshot of where an array's data is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Residency {
    /// Host copy holds the latest data.
    pub host_valid: bool,
    /// Device copy holds the latest data.
    pub device_valid: bool,
    /// Device buffer has been allocated.
    pub device_allocated: bool,
    /// [`HostDeviceArray::free`] was called.
    pub freed: bool,
    /// Number of host/device copies performed so far.
    pub migrations: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

pub(crate) struct Storage<T> {
    pub(crate) len: usize,
    host: UnsafeCell<Vec<T>>,
    device: UnsafeCell<Vec<T>>,
    residency: Mutex<Residency>,
    /// Set by views that wrote the host copy since the last acquire.
    host_written: AtomicBool,
    /// Set by views that wrote the device copy since the last acquire.
    device_written: AtomicBool,
}

impl<T> Storage<T> {
    /// Record a write through a view in `context`.
    #[inline]
    pub(crate) fn mark_written(&self, context: ExecContext) {
        let flag = match context {
            ExecContext::Host => &self.host_written,
            ExecContext::Device => &self.device_written,
        };
        // Plain load first so concurrent writers share the cache line.
        if !flag.load(Ordering::Relaxed) {
            flag.store(true, Ordering::Release);
        }
    }
}

// The buffers are only resized while `residency` is locked and before any
// pointer into them is handed out; element accesses through views follow the
// same contract as raw device pointers.
unsafe impl<T: Send> Send for Storage<T> {}
unsafe impl<T: Send + Sync> Sync for Storage<T> {}

/// Fixed-length array mirrored between host and device memory.
///
/// Cloning a `HostDeviceArray` yields another handle to the same data, the
/// way a host/device pointer is copied into every kernel that uses it.
pub struct HostDeviceArray<T> {
    storage: Arc<Storage<T>>,
    name: Option<Arc<str>>,
}

impl<T> Clone for HostDeviceArray<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            name: self.name.clone(),
        }
    }
}

impl<T> fmt::Debug for HostDeviceArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDeviceArray")
            .field("name", &self.name)
            .field("len", &self.storage.len)
            .field("residency", &*self.storage.residency.lock())
            .finish()
    }
}

impl<T: Element + Default> HostDeviceArray<T> {
    /// Host-resident array of `len` default values.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![T::default(); len])
    }
}

impl<T: Element> HostDeviceArray<T> {
    /// Host-resident array taking ownership of `data`.
    pub fn from_vec(data: Vec<T>) -> Self {
        let len = data.len();
        Self {
            storage: Arc::new(Storage {
                len,
                host: UnsafeCell::new(data),
                device: UnsafeCell::new(Vec::new()),
                residency: Mutex::new(Residency {
                    host_valid: true,
                    device_valid: false,
                    device_allocated: false,
                    freed: false,
                    migrations: 0,
                }),
                host_written: AtomicBool::new(false),
                device_written: AtomicBool::new(false),
            }),
            name: None,
        }
    }

    /// Host-resident array of `len` copies of `value`.
    pub fn filled(len: usize, value: T) -> Self {
        Self::from_vec(vec![value; len])
    }

    /// Attach a name used in diagnostics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    pub fn len(&self) -> usize {
        self.storage.len
    }

    pub fn is_empty(&self) -> bool {
        self.storage.len == 0
    }

    /// `true` when both handles refer to the same data.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn residency(&self) -> Residency {
        let mut res = self.storage.residency.lock();
        self.absorb_view_writes(&mut res);
        *res
    }

    pub fn migration_count(&self) -> usize {
        self.storage.residency.lock().migrations
    }

    pub fn is_freed(&self) -> bool {
        self.storage.residency.lock().freed
    }

    /// Release the array.
    ///
    /// Later pointer requests through any handle fail with
    /// [`ArrayError::Freed`]. Memory is returned once the last handle and
    /// view are dropped, so kernels still holding views stay valid.
    pub fn free(&self) {
        let mut res = self.storage.residency.lock();
        res.freed = true;
        tracing::trace!(array = self.name(), "free");
    }

    /// Raw pointer to the data in `context`.
    ///
    /// With `migrate`, the data is first made current in `context` and the
    /// other space is marked stale, since the caller may write through the
    /// pointer. Without it the pointer is returned as is: reading through a
    /// host pointer obtained this way shows whatever the host copy last held.
    pub fn get_pointer(&self, context: ExecContext, migrate: bool) -> Result<*mut T> {
        let mut res = self.storage.residency.lock();
        self.check_live(&res)?;
        if migrate {
            self.acquire(&mut res, context, Access::Write);
        } else if context == ExecContext::Device {
            self.allocate_device(&mut res);
        }
        Ok(self.raw_ptr(context))
    }

    /// Kernel-side view of the data in `context`, migrating as needed.
    pub fn view(&self, context: ExecContext) -> Result<ArrayView<T>> {
        let ptr = self.get_pointer(context, true)?;
        Ok(ArrayView::new(Arc::clone(&self.storage), ptr, context))
    }

    /// View for kernels that only read: the data is made current in
    /// `context` and the other space stays valid.
    pub fn read_view(&self, context: ExecContext) -> Result<ArrayView<T>> {
        let mut res = self.storage.residency.lock();
        self.check_live(&res)?;
        self.acquire(&mut res, context, Access::Read);
        let ptr = self.raw_ptr(context);
        drop(res);
        Ok(ArrayView::new(Arc::clone(&self.storage), ptr, context))
    }

    /// Host view; shorthand for `view(ExecContext::Host)`.
    pub fn host_view(&self) -> Result<ArrayView<T>> {
        self.view(ExecContext::Host)
    }

    /// Copy of the current data, migrated to the host.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut res = self.storage.residency.lock();
        self.check_live(&res)?;
        self.acquire(&mut res, ExecContext::Host, Access::Read);
        // SAFETY: the host copy is current and the lock is held.
        Ok(unsafe { (*self.storage.host.get()).clone() })
    }

    /// Copy of the host buffer without migrating.
    ///
    /// After a device kernel wrote the array this still shows the old host
    /// contents.
    pub fn peek_host(&self) -> Result<Vec<T>> {
        let res = self.storage.residency.lock();
        self.check_live(&res)?;
        // SAFETY: the lock is held; no migration touches the host buffer.
        Ok(unsafe { (*self.storage.host.get()).clone() })
    }

    /// Read one element on the host.
    pub fn get(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let mut res = self.storage.residency.lock();
        self.check_live(&res)?;
        self.acquire(&mut res, ExecContext::Host, Access::Read);
        // SAFETY: index checked, host copy current, lock held.
        Ok(unsafe { *(*self.storage.host.get()).as_ptr().add(index) })
    }

    /// Write one element on the host.
    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        let mut res = self.storage.residency.lock();
        self.check_live(&res)?;
        self.acquire(&mut res, ExecContext::Host, Access::Write);
        // SAFETY: index checked, host copy current, lock held.
        unsafe { *(*self.storage.host.get()).as_mut_ptr().add(index) = value };
        Ok(())
    }

    /// Overwrite the whole array from host data.
    pub fn copy_from_slice(&self, src: &[T]) -> Result<()> {
        if src.len() != self.len() {
            return Err(ArrayError::LengthMismatch {
                expected: self.len(),
                found: src.len(),
            });
        }
        let mut res = self.storage.residency.lock();
        self.check_live(&res)?;
        self.absorb_view_writes(&mut res);
        // Every element is overwritten, so stale host data need not be fetched.
        res.host_valid = true;
        res.device_valid = false;
        // SAFETY: lengths match and the lock is held.
        unsafe { (*self.storage.host.get()).copy_from_slice(src) };
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(ArrayError::OutOfBounds {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }

    fn check_live(&self, res: &Residency) -> Result<()> {
        if res.freed {
            return Err(ArrayError::Freed {
                name: self.name().to_string(),
            });
        }
        Ok(())
    }

    fn raw_ptr(&self, context: ExecContext) -> *mut T {
        // SAFETY: only the buffer address is taken; buffers are never
        // reallocated after the device copy is first created.
        unsafe {
            match context {
                ExecContext::Host => (*self.storage.host.get()).as_mut_ptr(),
                ExecContext::Device => (*self.storage.device.get()).as_mut_ptr(),
            }
        }
    }

    fn allocate_device(&self, res: &mut Residency) {
        if res.device_allocated {
            return;
        }
        // SAFETY: called with the residency lock held; no device pointer
        // exists before allocation.
        unsafe {
            let host = &*self.storage.host.get();
            *self.storage.device.get() = host.clone();
        }
        res.device_allocated = true;
        res.device_valid = res.host_valid;
        res.migrations += 1;
        tracing::trace!(array = self.name(), len = self.len(), "allocate device copy");
    }

    /// Fold writes made through views since the last acquire into `res`.
    ///
    /// A view stays valid across later acquires, so a kernel that runs after
    /// the host read the array still leaves the host copy stale.
    fn absorb_view_writes(&self, res: &mut Residency) {
        if self.storage.device_written.swap(false, Ordering::AcqRel) {
            res.device_valid = true;
            res.host_valid = false;
        }
        if self.storage.host_written.swap(false, Ordering::AcqRel) {
            res.host_valid = true;
            if res.device_allocated {
                res.device_valid = false;
            }
        }
    }

    fn acquire(&self, res: &mut Residency, context: ExecContext, access: Access) {
        self.absorb_view_writes(res);
        match context {
            ExecContext::Host => {
                if !res.host_valid {
                    // SAFETY: lock held; the device copy is the valid one and
                    // both buffers have `len` elements.
                    unsafe {
                        let device = &*self.storage.device.get();
                        (*self.storage.host.get()).copy_from_slice(device);
                    }
                    res.host_valid = true;
                    res.migrations += 1;
                    tracing::trace!(
                        array = self.name(),
                        len = self.len(),
                        "migrate device -> host"
                    );
                }
                if access == Access::Write {
                    res.device_valid = false;
                }
            }
            ExecContext::Device => {
                self.allocate_device(res);
                if !res.device_valid {
                    // SAFETY: as above, with the roles swapped.
                    unsafe {
                        let host = &*self.storage.host.get();
                        (*self.storage.device.get()).copy_from_slice(host);
                    }
                    res.device_valid = true;
                    res.migrations += 1;
                    tracing::trace!(
                        array = self.name(),
                        len = self.len(),
                        "migrate host -> device"
                    );
                }
                if access == Access::Write {
                    res.host_valid = false;
                }
            }
        }
    }
}
