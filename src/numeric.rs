//! Whole-array numeric helpers.
//!
//! Each helper runs as its own kernel under the given policy, outside any
//! batch.

use std::ops::Add;

use fusible_array::HostDeviceArray;
use fusible_exec::{exclusive_sum, forall, reduce, Element, ExecPolicy};
use num_traits::{AsPrimitive, Zero};

use crate::Result;

/// Fill `array` with `start, start + 1, start + 2, ...`.
///
/// # Example
///
/// ```
/// use fusible::{numeric, ExecPolicy, HostDeviceArray};
///
/// let a = HostDeviceArray::<i32>::new(4);
/// numeric::iota(ExecPolicy::DEFAULT, &a, 10).unwrap();
/// assert_eq!(a.to_vec().unwrap(), vec![10, 11, 12, 13]);
/// ```
pub fn iota<T>(policy: ExecPolicy, array: &HostDeviceArray<T>, start: T) -> Result<()>
where
    T: Element + Add<Output = T>,
    usize: AsPrimitive<T>,
{
    let view = array.view(policy.context())?;
    // SAFETY: every iteration writes its own element.
    forall(policy, 0..array.len(), |i| unsafe { view.set(i, start + i.as_()) })?;
    Ok(())
}

/// Set every element of `array` to `value`.
pub fn fill<T: Element>(policy: ExecPolicy, array: &HostDeviceArray<T>, value: T) -> Result<()> {
    let view = array.view(policy.context())?;
    // SAFETY: as in `iota`.
    forall(policy, 0..array.len(), |i| unsafe { view.set(i, value) })?;
    Ok(())
}

/// Sum of all elements.
pub fn sum<T>(policy: ExecPolicy, array: &HostDeviceArray<T>) -> Result<T>
where
    T: Element + Zero + Add<Output = T>,
{
    let view = array.read_view(policy.context())?;
    Ok(reduce(policy, 0..array.len(), |i| view.get(i), |a, b| a + b, T::zero())?)
}

/// In-place exclusive prefix sum starting at `init`; returns `init` plus the
/// sum of the input.
///
/// # Example
///
/// ```
/// use fusible::{numeric, ExecPolicy, HostDeviceArray};
///
/// let counts = HostDeviceArray::from_vec(vec![2usize, 2, 2]);
/// let total = numeric::exclusive_scan(ExecPolicy::Sequential, &counts, 0).unwrap();
/// assert_eq!(counts.to_vec().unwrap(), vec![0, 2, 4]);
/// assert_eq!(total, 6);
/// ```
pub fn exclusive_scan<T>(policy: ExecPolicy, array: &HostDeviceArray<T>, init: T) -> Result<T>
where
    T: Element + Zero + Add<Output = T> + PartialEq,
{
    let view = array.view(policy.context())?;
    // SAFETY: `view` is the only live access to the array for this call.
    let data = unsafe { view.as_mut_slice() };
    let total = exclusive_sum(policy, data)?;
    if init != T::zero() {
        // SAFETY: `data` is no longer used; iterations touch distinct elements.
        forall(policy, 0..array.len(), |i| unsafe { view.update(i, |v| init + v) })?;
    }
    Ok(init + total)
}
