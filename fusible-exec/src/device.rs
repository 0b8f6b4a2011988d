//! Device synchronization.
//!
//! The simulated accelerator completes every launch before returning, so a
//! synchronization is an explicit barrier that always succeeds. It is still
//! issued and counted wherever a real accelerator would need one, which keeps
//! call sites honest and lets tests observe forced synchronizations.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::policy::ExecPolicy;
use crate::Result;

static SYNC_COUNT: AtomicU64 = AtomicU64::new(0);

/// Block until all outstanding device work has completed.
pub fn device_synchronize() -> Result<()> {
    let n = SYNC_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::trace!(syncs = n, "device synchronize");
    Ok(())
}

/// Synchronize after a dispatch under `policy` when `force` is set.
///
/// Host policies never need a barrier. Returns whether a synchronization was
/// issued.
pub fn synchronize(policy: ExecPolicy, force: bool) -> Result<bool> {
    if policy.is_device() && force {
        device_synchronize()?;
        return Ok(true);
    }
    Ok(false)
}

/// Number of device synchronizations issued by this process.
pub fn device_sync_count() -> u64 {
    SYNC_COUNT.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synchronize_only_on_forced_device() {
        assert!(!synchronize(ExecPolicy::Threaded, true).unwrap());
        assert!(!synchronize(ExecPolicy::Device, false).unwrap());

        let before = device_sync_count();
        assert!(synchronize(ExecPolicy::Device, true).unwrap());
        assert!(device_sync_count() > before);
    }
}
