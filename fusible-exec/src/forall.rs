//! Parallel-for, tabulate, and reduce over index ranges.

use std::ops::Range;

use crate::element::{Element, MaybeSend, MaybeSync};
use crate::policy::ExecPolicy;
use crate::{ExecError, Result};

#[cfg(feature = "parallel")]
use crate::threading::{par_for_chunked, par_for_each_index, par_reduce, par_tabulate};
#[cfg(feature = "parallel")]
use crate::MIN_THREAD_LENGTH;

fn check_range(range: &Range<usize>) -> Result<()> {
    if range.start > range.end {
        return Err(ExecError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}

/// Run `f(i)` for every `i` in `range` under `policy`.
///
/// Sequential execution visits indices in order. Threaded and device
/// execution give no ordering between iterations: two iterations writing the
/// same location race, exactly as two threads of an accelerator kernel would.
///
/// # Example
///
/// ```rust
/// use fusible_exec::{forall, ExecPolicy};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let sum = AtomicUsize::new(0);
/// forall(ExecPolicy::DEFAULT, 0..100, |i| {
///     sum.fetch_add(i, Ordering::Relaxed);
/// })
/// .unwrap();
/// assert_eq!(sum.into_inner(), 4950);
/// ```
pub fn forall<F>(policy: ExecPolicy, range: Range<usize>, f: F) -> Result<()>
where
    F: Fn(usize) + MaybeSync,
{
    check_range(&range)?;
    if range.is_empty() {
        return Ok(());
    }
    match policy {
        ExecPolicy::Sequential => range.for_each(f),
        ExecPolicy::Threaded => {
            #[cfg(feature = "parallel")]
            {
                if range.len() > MIN_THREAD_LENGTH {
                    par_for_chunked(range.start, range.end, &f);
                    return Ok(());
                }
            }
            range.for_each(f);
        }
        ExecPolicy::Device => {
            #[cfg(feature = "parallel")]
            {
                par_for_each_index(range.start, range.end, &f);
            }
            #[cfg(not(feature = "parallel"))]
            {
                range.for_each(f);
            }
        }
    }
    Ok(())
}

/// Fill `out` with `f(i)` for every position.
pub fn tabulate<T, F>(policy: ExecPolicy, out: &mut [T], f: F) -> Result<()>
where
    T: MaybeSend,
    F: Fn(usize) -> T + MaybeSync,
{
    #[cfg(feature = "parallel")]
    {
        let threaded = match policy {
            ExecPolicy::Sequential => false,
            ExecPolicy::Threaded => out.len() > MIN_THREAD_LENGTH,
            ExecPolicy::Device => true,
        };
        if threaded {
            par_tabulate(out, &f);
            return Ok(());
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = policy;
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = f(i);
    }
    Ok(())
}

/// Map every index in `range` and fold the results with `op`.
///
/// `op` must be associative and `identity` its neutral element; parallel
/// policies combine partial results in an unspecified grouping.
pub fn reduce<T, M, R>(
    policy: ExecPolicy,
    range: Range<usize>,
    map: M,
    op: R,
    identity: T,
) -> Result<T>
where
    T: Element,
    M: Fn(usize) -> T + MaybeSync,
    R: Fn(T, T) -> T + MaybeSync,
{
    check_range(&range)?;
    #[cfg(feature = "parallel")]
    {
        let threaded = match policy {
            ExecPolicy::Sequential => false,
            ExecPolicy::Threaded => range.len() > MIN_THREAD_LENGTH,
            ExecPolicy::Device => true,
        };
        if threaded {
            return Ok(par_reduce(range.start, range.end, &map, &op, identity));
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = policy;
    Ok(range.fold(identity, |acc, i| op(acc, map(i))))
}
