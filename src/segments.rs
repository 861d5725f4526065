//! Segment index
//!
//! Maps extents of the logical torrent byte space (all files concatenated in
//! order) onto per-file extents. The index is immutable once built and is
//! shared read-only by every piece handle of a torrent.

use std::fmt;
use std::iter::FusedIterator;

use crate::error::{Result, StorageError};

/// Half-open byte range `[start, start + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub start: u64,
    pub length: u64,
}

impl Extent {
    /// Create a new extent
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Exclusive end offset, or None on overflow
    pub fn checked_end(&self) -> Option<u64> {
        self.start.checked_add(self.length)
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Check if the extent covers no bytes
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.checked_end() {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, +{})", self.start, self.length),
        }
    }
}

/// Lookup structure from logical extents to `(file index, local extent)` pairs
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
    /// Logical start offset of each file
    starts: Vec<u64>,
    /// Logical end offset of each file (non-decreasing)
    ends: Vec<u64>,
}

impl SegmentIndex {
    /// Build an index from ordered file lengths.
    ///
    /// Offsets saturate at `u64::MAX`; `Info::validate` rejects such layouts.
    pub fn new<I>(lengths: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut starts = Vec::new();
        let mut ends = Vec::new();
        let mut offset = 0u64;
        for length in lengths {
            starts.push(offset);
            offset = offset.saturating_add(length);
            ends.push(offset);
        }
        Self { starts, ends }
    }

    /// Total length of the logical byte space
    pub fn total_length(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    /// Number of files, including zero-length ones
    pub fn file_count(&self) -> usize {
        self.starts.len()
    }

    /// Logical extent occupied by a file
    pub fn file_extent(&self, file_index: usize) -> Option<Extent> {
        let start = *self.starts.get(file_index)?;
        Some(Extent::new(start, self.ends[file_index] - start))
    }

    /// Resolve a logical extent into per-file extents.
    ///
    /// The returned iterator is lazy and yields pairs in ascending file order;
    /// callers may stop consuming at any point. Zero-length files are never
    /// yielded. An extent reaching past the end of the content is rejected.
    pub fn locate(&self, extent: Extent) -> Result<Locate<'_>> {
        let total = self.total_length();
        match extent.checked_end() {
            Some(end) if end <= total => {}
            _ => {
                return Err(StorageError::precondition(format!(
                    "extent {} outside content of {} bytes",
                    extent, total
                )));
            }
        }

        // First file whose end lies beyond the start offset
        let file = self.ends.partition_point(|&end| end <= extent.start);

        Ok(Locate {
            index: self,
            file,
            position: extent.start,
            remaining: extent.length,
        })
    }
}

/// Iterator returned by [`SegmentIndex::locate`]
///
/// Cloning the iterator restarts the walk from the clone's current position.
#[derive(Debug, Clone)]
pub struct Locate<'a> {
    index: &'a SegmentIndex,
    file: usize,
    position: u64,
    remaining: u64,
}

impl Locate<'_> {
    /// Bytes not yet yielded
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for Locate<'_> {
    type Item = (usize, Extent);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.file < self.index.file_count() {
            let file = self.file;
            self.file += 1;

            let start = self.index.starts[file];
            let end = self.index.ends[file];
            if end <= self.position {
                continue;
            }

            let local_start = self.position - start;
            let take = (end - self.position).min(self.remaining);
            self.position += take;
            self.remaining -= take;
            return Some((file, Extent::new(local_start, take)));
        }
        None
    }
}

impl FusedIterator for Locate<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(index: &SegmentIndex, start: u64, length: u64) -> Vec<(usize, Extent)> {
        index.locate(Extent::new(start, length)).unwrap().collect()
    }

    #[test]
    fn test_total_length() {
        let index = SegmentIndex::new([5, 0, 8]);
        assert_eq!(index.total_length(), 13);
        assert_eq!(index.file_count(), 3);
        assert_eq!(SegmentIndex::new([]).total_length(), 0);
    }

    #[test]
    fn test_piece_straddling_zero_length_file() {
        let index = SegmentIndex::new([5, 0, 8]);
        assert_eq!(
            collect(&index, 4, 4),
            vec![(0, Extent::new(4, 1)), (2, Extent::new(0, 3))]
        );
    }

    #[test]
    fn test_boundaries_of_each_piece() {
        let index = SegmentIndex::new([5, 0, 8]);
        assert_eq!(collect(&index, 0, 4), vec![(0, Extent::new(0, 4))]);
        assert_eq!(collect(&index, 8, 4), vec![(2, Extent::new(3, 4))]);
        assert_eq!(collect(&index, 12, 1), vec![(2, Extent::new(7, 1))]);
    }

    #[test]
    fn test_extent_starting_on_file_boundary() {
        let index = SegmentIndex::new([5, 0, 0, 8]);
        assert_eq!(collect(&index, 5, 2), vec![(3, Extent::new(0, 2))]);
    }

    #[test]
    fn test_spanning_many_files() {
        let index = SegmentIndex::new([2, 0, 3, 0, 0, 1, 4]);
        assert_eq!(
            collect(&index, 1, 8),
            vec![
                (0, Extent::new(1, 1)),
                (2, Extent::new(0, 3)),
                (5, Extent::new(0, 1)),
                (6, Extent::new(0, 3)),
            ]
        );
    }

    #[test]
    fn test_empty_extent_yields_nothing() {
        let index = SegmentIndex::new([5, 8]);
        assert!(collect(&index, 3, 0).is_empty());
        assert!(collect(&index, 13, 0).is_empty());
    }

    #[test]
    fn test_extent_beyond_total_is_rejected() {
        let index = SegmentIndex::new([5, 8]);
        let err = index.locate(Extent::new(10, 4)).unwrap_err();
        assert!(err.is_precondition());
        assert!(index.locate(Extent::new(u64::MAX, 2)).is_err());
    }

    #[test]
    fn test_early_termination() {
        let index = SegmentIndex::new([1, 1, 1, 1]);
        let mut locate = index.locate(Extent::new(0, 4)).unwrap();
        assert_eq!(locate.next(), Some((0, Extent::new(0, 1))));
        assert_eq!(locate.remaining(), 3);
        let first_two: Vec<_> = index.locate(Extent::new(0, 4)).unwrap().take(2).collect();
        assert_eq!(first_two.len(), 2);
    }

    #[test]
    fn test_clone_restarts_from_position() {
        let index = SegmentIndex::new([2, 2, 2]);
        let mut locate = index.locate(Extent::new(1, 4)).unwrap();
        locate.next();
        let rest: Vec<_> = locate.clone().collect();
        let again: Vec<_> = locate.collect();
        assert_eq!(rest, again);
        assert_eq!(rest, vec![(1, Extent::new(0, 2)), (2, Extent::new(0, 1))]);
    }

    #[test]
    fn test_file_extent() {
        let index = SegmentIndex::new([5, 0, 8]);
        assert_eq!(index.file_extent(1), Some(Extent::new(5, 0)));
        assert_eq!(index.file_extent(2), Some(Extent::new(5, 8)));
        assert_eq!(index.file_extent(3), None);
    }

    #[test]
    fn test_extent_display() {
        assert_eq!(Extent::new(4, 4).to_string(), "[4, 8)");
    }

    fn layout() -> impl Strategy<Value = (Vec<u64>, u64, u64)> {
        prop::collection::vec(0u64..16, 1..12)
            .prop_filter("non-empty content", |lengths| lengths.iter().sum::<u64>() > 0)
            .prop_flat_map(|lengths| {
                let total: u64 = lengths.iter().sum();
                (Just(lengths), 0..total)
            })
            .prop_flat_map(|(lengths, start)| {
                let total: u64 = lengths.iter().sum();
                (Just(lengths), Just(start), 0..=(total - start))
            })
    }

    proptest! {
        #[test]
        fn prop_located_bytes_match_direct_slice((lengths, start, length) in layout()) {
            let mut files = Vec::new();
            let mut next = 0u8;
            for &len in &lengths {
                let data: Vec<u8> = (0..len).map(|_| { next = next.wrapping_add(1); next }).collect();
                files.push(data);
            }
            let concatenated: Vec<u8> = files.concat();

            let index = SegmentIndex::new(lengths.iter().copied());
            let pieces: Vec<_> = index.locate(Extent::new(start, length)).unwrap().collect();

            let sum: u64 = pieces.iter().map(|(_, e)| e.length).sum();
            prop_assert_eq!(sum, length);

            let mut gathered = Vec::new();
            for (file, extent) in pieces {
                prop_assert!(lengths[file] > 0);
                gathered.extend_from_slice(&files[file][extent.start as usize..extent.end() as usize]);
            }
            prop_assert_eq!(&gathered[..], &concatenated[start as usize..(start + length) as usize]);
        }

        #[test]
        fn prop_zero_length_files_only_shift_indices(
            (lengths, start, length) in layout(),
            insert_at in prop::collection::vec(0usize..12, 0..6),
        ) {
            let plain = SegmentIndex::new(lengths.iter().copied());

            // Remember which original file each padded slot came from
            let mut padded = Vec::new();
            let mut origin = Vec::new();
            for (i, &len) in lengths.iter().enumerate() {
                for _ in insert_at.iter().filter(|&&at| at == i) {
                    padded.push(0);
                    origin.push(None);
                }
                padded.push(len);
                origin.push(Some(i));
            }
            let with_zeros = SegmentIndex::new(padded);

            let expected: Vec<_> = plain.locate(Extent::new(start, length)).unwrap().collect();
            let actual: Vec<_> = with_zeros
                .locate(Extent::new(start, length))
                .unwrap()
                .map(|(file, extent)| (origin[file].unwrap(), extent))
                .collect();
            prop_assert_eq!(expected, actual);
        }
    }
}
