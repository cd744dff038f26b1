//! Byte ranges and partition planning.

const MIB: u64 = 1024 * 1024;

/// A byte range [start, end) (half-open) of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive).
    pub end: u64,
}

impl ByteRange {
    /// Length of this range in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// curl range spec (inclusive end) for the part of this range starting at `offset`.
    /// Returns None when nothing is left to fetch.
    pub fn remaining_from(&self, offset: u64) -> Option<String> {
        let from = self.start.max(offset);
        if from >= self.end {
            return None;
        }
        Some(format!("{}-{}", from, self.end - 1))
    }
}

/// Number of segments for a resource of `total_size` bytes:
/// `min(max_parts, max(1, total_size / (part_size_mb MiB)))`.
pub fn segment_count(total_size: u64, max_parts: usize, part_size_mb: u64) -> usize {
    let per_part = part_size_mb.max(1).saturating_mul(MIB);
    let by_size = (total_size / per_part).max(1);
    let max_parts = max_parts.max(1) as u64;
    by_size.min(max_parts) as usize
}

/// Splits `total_size` bytes into `count` contiguous ranges of `total_size / count`
/// bytes each; the last range absorbs the remainder.
///
/// Returns an empty vec if `total_size` is 0 or `count` is 0.
pub fn plan_segments(total_size: u64, count: usize) -> Vec<ByteRange> {
    if total_size == 0 || count == 0 {
        return Vec::new();
    }
    let count = (count as u64).min(total_size);
    let size = total_size / count;

    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let start = i * size;
        let end = if i == count - 1 { total_size } else { start + size };
        out.push(ByteRange { start, end });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_count_scales_with_size() {
        assert_eq!(segment_count(9 * MIB, 10, 3), 3);
        assert_eq!(segment_count(10 * MIB, 10, 3), 3);
        assert_eq!(segment_count(100 * MIB, 10, 3), 10);
        assert_eq!(segment_count(1024, 10, 3), 1);
        assert_eq!(segment_count(0, 10, 3), 1);
    }

    #[test]
    fn segment_count_clamps_degenerate_config() {
        assert_eq!(segment_count(50 * MIB, 0, 3), 1);
        assert_eq!(segment_count(5 * MIB, 10, 0), 5);
    }

    #[test]
    fn plan_last_absorbs_remainder() {
        let segs = plan_segments(10, 4);
        assert_eq!(segs.len(), 4);
        assert_eq!(segs[0], ByteRange { start: 0, end: 2 });
        assert_eq!(segs[1], ByteRange { start: 2, end: 4 });
        assert_eq!(segs[2], ByteRange { start: 4, end: 6 });
        assert_eq!(segs[3], ByteRange { start: 6, end: 10 });
    }

    #[test]
    fn plan_covers_total_without_gaps_or_overlaps() {
        for total in [1u64, 2, 7, 1000, 3 * MIB + 17, 9 * MIB, 123_456_789] {
            for max_parts in [1usize, 2, 3, 10, 16] {
                for part_mb in [1u64, 3, 8] {
                    let count = segment_count(total, max_parts, part_mb);
                    assert!(count >= 1 && count <= max_parts);
                    let segs = plan_segments(total, count);
                    assert_eq!(segs.len(), count.min(total as usize));
                    assert_eq!(segs[0].start, 0);
                    assert_eq!(segs.last().unwrap().end, total);
                    for pair in segs.windows(2) {
                        assert_eq!(pair[0].end, pair[1].start);
                    }
                    assert_eq!(segs.iter().map(|s| s.len()).sum::<u64>(), total);
                }
            }
        }
    }

    #[test]
    fn plan_nine_mib_three_parts() {
        let segs = plan_segments(9 * MIB, segment_count(9 * MIB, 10, 3));
        assert_eq!(segs.len(), 3);
        assert!(segs.iter().all(|s| s.len() == 3 * MIB));
    }

    #[test]
    fn plan_empty() {
        assert!(plan_segments(0, 4).is_empty());
        assert!(plan_segments(100, 0).is_empty());
    }

    #[test]
    fn remaining_from_offset() {
        let r = ByteRange { start: 100, end: 200 };
        assert_eq!(r.remaining_from(100).as_deref(), Some("100-199"));
        assert_eq!(r.remaining_from(150).as_deref(), Some("150-199"));
        assert_eq!(r.remaining_from(199).as_deref(), Some("199-199"));
        assert_eq!(r.remaining_from(200), None);
        assert_eq!(r.remaining_from(250), None);
    }

    #[test]
    fn range_len() {
        let r = ByteRange { start: 0, end: 99 };
        assert_eq!(r.len(), 99);
        assert!(ByteRange { start: 42, end: 42 }.is_empty());
    }
}
