//! Element bounds and feature-gated thread-safety markers.
//!
//! With the `parallel` feature, [`MaybeSend`] and [`MaybeSync`] require the
//! real [`Send`] and [`Sync`]: loop bodies may run on rayon workers. Without
//! it every loop runs on the calling thread, so the markers are implemented
//! for all types and bodies may capture `Rc`, `Cell`, and friends.

#[cfg(feature = "parallel")]
mod markers {
    pub trait MaybeSend: Send {}
    impl<T: Send> MaybeSend for T {}

    pub trait MaybeSync: Sync {}
    impl<T: Sync> MaybeSync for T {}

    pub trait MaybeSendSync: Send + Sync {}
    impl<T: Send + Sync> MaybeSendSync for T {}
}

#[cfg(not(feature = "parallel"))]
mod markers {
    pub trait MaybeSend {}
    impl<T> MaybeSend for T {}

    pub trait MaybeSync {}
    impl<T> MaybeSync for T {}

    pub trait MaybeSendSync {}
    impl<T> MaybeSendSync for T {}
}

pub use markers::{MaybeSend, MaybeSendSync, MaybeSync};

/// Bound shared by every value stored in a device array or carried through
/// a scan.
///
/// Elements are plain data: they are copied between host and device buffers
/// bit for bit and moved freely between workers.
pub trait Element: Copy + Send + Sync + 'static {}

impl<T> Element for T where T: Copy + Send + Sync + 'static {}
