//! Prefix scans.
//!
//! A scan with an associative operator `op` and identity `e` produces, for
//! every position, the reduction of the elements before it (exclusive) or up
//! to and including it (inclusive). Compaction and counts-to-offsets
//! conversions are exclusive sums.

use std::ops::Add;

use num_traits::Zero;

use crate::element::{Element, MaybeSync};
use crate::policy::ExecPolicy;
use crate::{ExecError, Result};

#[cfg(feature = "parallel")]
use crate::threading::par_scan;
#[cfg(feature = "parallel")]
use crate::SCAN_MIN_CHUNK;

/// Scan `data` in place on the calling thread and return the total.
pub(crate) fn sequential_scan<T, Op>(data: &mut [T], op: &Op, identity: T, inclusive: bool) -> T
where
    T: Copy,
    Op: Fn(T, T) -> T,
{
    let mut acc = identity;
    if inclusive {
        for x in data.iter_mut() {
            acc = op(acc, *x);
            *x = acc;
        }
    } else {
        for x in data.iter_mut() {
            let v = *x;
            *x = acc;
            acc = op(acc, v);
        }
    }
    acc
}

fn scan_with_policy<T, Op>(
    policy: ExecPolicy,
    data: &mut [T],
    op: &Op,
    identity: T,
    inclusive: bool,
) -> T
where
    T: Element,
    Op: Fn(T, T) -> T + MaybeSync,
{
    #[cfg(feature = "parallel")]
    {
        if policy.is_parallel() && data.len() > SCAN_MIN_CHUNK {
            return par_scan(data, op, identity, inclusive, SCAN_MIN_CHUNK);
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = policy;
    sequential_scan(data, op, identity, inclusive)
}

/// Exclusive scan in place.
///
/// After the call `data[i] = op(identity, data[0], ..., data[i-1])` and the
/// return value is the reduction of the whole input. `op` must be
/// associative; the parallel path regroups operands.
///
/// # Example
///
/// ```rust
/// use fusible_exec::{exclusive_scan, ExecPolicy};
///
/// let mut flags = vec![1u32, 0, 1, 1, 0];
/// let selected = exclusive_scan(ExecPolicy::DEFAULT, &mut flags, |a, b| a + b, 0).unwrap();
/// assert_eq!(flags, vec![0, 1, 1, 2, 3]);
/// assert_eq!(selected, 3);
/// ```
pub fn exclusive_scan<T, Op>(policy: ExecPolicy, data: &mut [T], op: Op, identity: T) -> Result<T>
where
    T: Element,
    Op: Fn(T, T) -> T + MaybeSync,
{
    Ok(scan_with_policy(policy, data, &op, identity, false))
}

/// Exclusive scan from `input` into `output`.
///
/// Both slices must have the same length.
pub fn exclusive_scan_into<T, Op>(
    policy: ExecPolicy,
    input: &[T],
    output: &mut [T],
    op: Op,
    identity: T,
) -> Result<T>
where
    T: Element,
    Op: Fn(T, T) -> T + MaybeSync,
{
    if input.len() != output.len() {
        return Err(ExecError::LengthMismatch {
            expected: input.len(),
            found: output.len(),
        });
    }
    output.copy_from_slice(input);
    exclusive_scan(policy, output, op, identity)
}

/// Inclusive scan in place; returns the total.
pub fn inclusive_scan<T, Op>(policy: ExecPolicy, data: &mut [T], op: Op, identity: T) -> Result<T>
where
    T: Element,
    Op: Fn(T, T) -> T + MaybeSync,
{
    Ok(scan_with_policy(policy, data, &op, identity, true))
}

/// Exclusive prefix sum in place; returns the sum of the input.
pub fn exclusive_sum<T>(policy: ExecPolicy, data: &mut [T]) -> Result<T>
where
    T: Element + Zero + Add<Output = T>,
{
    exclusive_scan(policy, data, |a, b| a + b, T::zero())
}
