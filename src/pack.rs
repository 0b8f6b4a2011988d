//! Packed dispatch of stream actions.
//!
//! A group of pending stream actions is concatenated into one synthetic
//! index space and launched as a single kernel. Each index finds its owning
//! action with an upper-bound search over the running end offsets.

use fusible_exec::{forall, ExecPolicy};

use crate::action::Action;
use crate::range_index::RangeTable;
use crate::Result;

/// Run `actions` as one kernel over their concatenated ranges.
///
/// Returns the number of kernels launched: zero when every action is empty.
pub(crate) fn pack(policy: ExecPolicy, actions: &[&Action<'_>], fused: bool) -> Result<usize> {
    let table = RangeTable::from_lengths(actions.iter().map(|a| a.len()));
    let total = table.total();
    if total == 0 {
        return Ok(0);
    }
    tracing::trace!(actions = actions.len(), total, ?policy, "pack");

    let table = &table;
    forall(policy, 0..total, move |global| {
        if let Some((k, j)) = table.locate_local(global) {
            let action = actions[k];
            action.run_stream(action.index(j, fused));
        }
    })?;
    Ok(1)
}

/// Run `actions` as one kernel over `[0, longest)`, each index visiting the
/// actions in registration order.
///
/// Iteration `j` of an action runs after iteration `j` of every action
/// registered before it, which keeps index-wise dependencies between
/// consecutive loops intact. Nothing orders iterations with different `j`:
/// a loop reading an element an earlier loop writes at another offset may
/// see the old value.
pub(crate) fn pack_ordered(
    policy: ExecPolicy,
    actions: &[&Action<'_>],
    fused: bool,
) -> Result<usize> {
    let longest = actions.iter().map(|a| a.len()).max().unwrap_or(0);
    if longest == 0 {
        return Ok(0);
    }
    tracing::trace!(actions = actions.len(), longest, ?policy, "pack ordered");

    forall(policy, 0..longest, move |j| {
        for action in actions {
            if j < action.len() {
                action.run_stream(action.index(j, fused));
            }
        }
    })?;
    Ok(1)
}
