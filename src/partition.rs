//! Splitting an input range into contiguous shards.

use std::ops::Range;

use crate::{Error, Result};

/// A contiguous half-open range `[start, end)` of the input, tagged with its shard index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shard {
    /// Position of this shard in shard order, in `[0, shard_count)`.
    pub index: usize,
    /// First input index covered by this shard.
    pub start: usize,
    /// One past the last input index covered by this shard.
    pub end: usize,
}

impl Shard {
    /// Number of input items covered by this shard. An inverted range covers none.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if this shard covers no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The covered index range, for slicing the input.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Split `[0, length)` into `shard_count` contiguous, disjoint shards.
///
/// The first `length % shard_count` shards receive one extra item, so shard
/// sizes never differ by more than one. Shards may be empty when
/// `length < shard_count`.
///
/// # Example
///
/// ```rust
/// use parallel_reduce::partition::split;
///
/// let shards = split(7, 3).unwrap();
/// let lens: Vec<usize> = shards.iter().map(|s| s.len()).collect();
/// assert_eq!(lens, vec![3, 2, 2]);
/// ```
pub fn split(length: usize, shard_count: usize) -> Result<Vec<Shard>> {
    if shard_count == 0 {
        return Err(Error::InvalidArgument(
            "shard_count must be at least 1".to_string(),
        ));
    }

    let base = length / shard_count;
    let extra = length % shard_count;

    let mut shards = Vec::with_capacity(shard_count);
    let mut start = 0;
    for index in 0..shard_count {
        let len = if index < extra { base + 1 } else { base };
        shards.push(Shard {
            index,
            start,
            end: start + len,
        });
        start += len;
    }
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(length: usize, shards: &[Shard]) {
        let mut cursor = 0;
        for (i, shard) in shards.iter().enumerate() {
            assert_eq!(shard.index, i);
            assert_eq!(shard.start, cursor, "shards must be contiguous");
            cursor = shard.end;
        }
        assert_eq!(cursor, length);
    }

    #[test]
    fn test_split_is_disjoint_and_balanced() {
        for length in 0..40 {
            for shard_count in 1..12 {
                let shards = split(length, shard_count).unwrap();
                assert_eq!(shards.len(), shard_count);
                assert_covers(length, &shards);

                let max = shards.iter().map(Shard::len).max().unwrap();
                let min = shards.iter().map(Shard::len).min().unwrap();
                assert!(max - min <= 1, "len={length} k={shard_count}");
            }
        }
    }

    #[test]
    fn test_longer_shards_come_first() {
        let shards = split(6, 4).unwrap();
        let lens: Vec<usize> = shards.iter().map(Shard::len).collect();
        assert_eq!(lens, vec![2, 2, 1, 1]);
    }

    #[test]
    fn test_more_shards_than_items_yields_empty_shards() {
        let shards = split(2, 4).unwrap();
        assert!(!shards[0].is_empty());
        assert!(!shards[1].is_empty());
        assert!(shards[2].is_empty());
        assert!(shards[3].is_empty());
        assert_eq!(shards[3].range(), 2..2);
    }

    #[test]
    fn test_zero_shards_is_rejected() {
        assert!(matches!(split(10, 0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_inverted_shard_is_empty() {
        let shard = Shard { index: 0, start: 5, end: 2 };
        assert_eq!(shard.len(), 0);
        assert!(shard.is_empty());
    }
}
