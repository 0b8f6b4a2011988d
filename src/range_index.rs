//! Range lookup over a batch's synthetic index space.
//!
//! A dispatch of N actions with lengths `l_0, ..., l_{N-1}` covers the
//! synthetic index space `[0, l_0 + ... + l_{N-1})`, action `k` owning the
//! window `[end_{k-1}, end_k)`. [`RangeTable`] stores the exclusive end
//! offsets; the owner of a global index `g` is the first action whose end
//! exceeds `g`, found with an upper-bound binary search.
//!
//! Lookups allocate nothing and never panic, so they can run inside every
//! iteration of a fused kernel. A miss is reported as `None`.

/// Binary search over a sorted slice.
///
/// With `upper_bound`, returns the index of the first element strictly
/// greater than `key`. Otherwise returns the index of an element equal to
/// `key`. Returns `None` when no such element exists.
///
/// # Example
///
/// ```rust
/// use fusible::range_index::binary_search;
///
/// let ends = [17, 34, 51, 68];
/// assert_eq!(binary_search(&ends, &37, true), Some(2));
/// assert_eq!(binary_search(&ends, &34, true), Some(2));
/// assert_eq!(binary_search(&ends, &68, true), None);
/// assert_eq!(binary_search(&ends, &51, false), Some(2));
/// ```
#[inline]
pub fn binary_search<T: Ord>(sorted: &[T], key: &T, upper_bound: bool) -> Option<usize> {
    if upper_bound {
        let idx = sorted.partition_point(|x| x <= key);
        (idx < sorted.len()).then_some(idx)
    } else {
        sorted.binary_search(key).ok()
    }
}

/// Table of contiguous, non-overlapping index windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeTable {
    ends: Vec<usize>,
}

impl RangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ends: Vec::with_capacity(capacity),
        }
    }

    /// Table whose windows have the given lengths, in order.
    pub fn from_lengths<I: IntoIterator<Item = usize>>(lengths: I) -> Self {
        let mut table = Self::new();
        for len in lengths {
            table.push(len);
        }
        table
    }

    /// Append a window of `len` indices; returns its start offset.
    pub fn push(&mut self, len: usize) -> usize {
        let start = self.total();
        self.ends.push(start + len);
        start
    }

    pub fn clear(&mut self) {
        self.ends.clear();
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// Size of the whole index space.
    pub fn total(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    /// First index of window `i`.
    pub fn start(&self, i: usize) -> usize {
        if i == 0 {
            0
        } else {
            self.ends[i - 1]
        }
    }

    /// One past the last index of window `i`.
    pub fn end(&self, i: usize) -> usize {
        self.ends[i]
    }

    pub fn ends(&self) -> &[usize] {
        &self.ends
    }

    /// Window owning global index `key`, or `None` past the end.
    ///
    /// Empty windows never own an index.
    #[inline]
    pub fn locate(&self, key: usize) -> Option<usize> {
        binary_search(&self.ends, &key, true)
    }

    /// Owning window and the offset of `key` inside it.
    #[inline]
    pub fn locate_local(&self, key: usize) -> Option<(usize, usize)> {
        let i = self.locate(key)?;
        Some((i, key - self.start(i)))
    }
}
