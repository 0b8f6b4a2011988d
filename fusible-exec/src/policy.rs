//! Backend selection.

use std::fmt;

/// Where a loop executes.
///
/// The same policy value drives ordinary loops and fused dispatches, so a
/// batch always runs on the backend its loops would have used unfused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecPolicy {
    /// Host loop on the calling thread, in index order.
    Sequential,
    /// Host loop split across the rayon pool.
    Threaded,
    /// Simulated accelerator operating on device-resident buffers.
    Device,
}

impl ExecPolicy {
    /// `Threaded` with the `parallel` feature, `Sequential` without it.
    #[cfg(feature = "parallel")]
    pub const DEFAULT: ExecPolicy = ExecPolicy::Threaded;
    #[cfg(not(feature = "parallel"))]
    pub const DEFAULT: ExecPolicy = ExecPolicy::Sequential;

    /// Memory space the policy's loops read and write.
    pub fn context(self) -> ExecContext {
        match self {
            ExecPolicy::Sequential | ExecPolicy::Threaded => ExecContext::Host,
            ExecPolicy::Device => ExecContext::Device,
        }
    }

    /// `true` for the accelerator backend.
    pub fn is_device(self) -> bool {
        matches!(self, ExecPolicy::Device)
    }

    /// `true` when iterations may run concurrently.
    pub fn is_parallel(self) -> bool {
        cfg!(feature = "parallel") && !matches!(self, ExecPolicy::Sequential)
    }
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ExecPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecPolicy::Sequential => "sequential",
            ExecPolicy::Threaded => "threaded",
            ExecPolicy::Device => "device",
        };
        f.write_str(name)
    }
}

/// Memory space in which a raw array pointer is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecContext {
    Host,
    Device,
}
