//! Fuser configuration.

use fusible_exec::ExecPolicy;

/// Pending actions that trigger an automatic flush.
pub const DEFAULT_MAX_PENDING_ACTIONS: usize = 16 * 1024;

/// Settings of a [`LoopFuser`](crate::LoopFuser).
///
/// # Example
///
/// ```
/// use fusible::{ExecPolicy, FuserConfig};
///
/// let config = FuserConfig::default()
///     .with_policy(ExecPolicy::Sequential)
///     .with_preserve_order(true);
/// assert!(config.preserve_order);
/// assert!(config.fusion_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuserConfig {
    /// Where fused kernels run.
    pub policy: ExecPolicy,
    /// Default ordering mode of new batches.
    pub preserve_order: bool,
    /// Log per-action detail at info level on every flush.
    pub verbose: bool,
    /// Synchronize the device after every flush that launched kernels.
    pub force_sync: bool,
    /// When `false`, every registered action runs immediately on its own.
    pub fusion_enabled: bool,
    /// Pending-action count at which registration flushes first.
    pub max_pending_actions: usize,
}

impl Default for FuserConfig {
    fn default() -> Self {
        Self {
            policy: ExecPolicy::DEFAULT,
            preserve_order: false,
            verbose: false,
            force_sync: cfg!(any(debug_assertions, feature = "force-sync")),
            fusion_enabled: true,
            max_pending_actions: DEFAULT_MAX_PENDING_ACTIONS,
        }
    }
}

impl FuserConfig {
    pub fn with_policy(mut self, policy: ExecPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_force_sync(mut self, force_sync: bool) -> Self {
        self.force_sync = force_sync;
        self
    }

    pub fn with_fusion(mut self, enabled: bool) -> Self {
        self.fusion_enabled = enabled;
        self
    }

    /// Clamped to at least one action.
    pub fn with_max_pending_actions(mut self, max: usize) -> Self {
        self.max_pending_actions = max.max(1);
        self
    }
}
