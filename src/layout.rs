/// Sizing of the on-block structures: 4-byte size header, occupancy bitmap,
/// then as many fixed-size data slots as fit.
///
/// The bitmap needs one bit per slot plus the reference bit, and the slot
/// count depends on how many bytes the bitmap eats, so the two are solved
/// jointly. `compute` uses the closed form; the iterative variant lives in
/// the tests as a cross-check.

/// Smallest logical size accepted. A tiny slot would make the bitmap
/// overhead dominate the block and stretch the recovery scan.
pub const MIN_SIZE: usize = 16;

/// Byte length of the size header at the start of the block.
pub const HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Size of one erase block, `B`.
    pub block_size: usize,
    /// Aligned logical slot size, `S`. Multiple of 4, at least [`MIN_SIZE`].
    pub size: usize,
    /// Bitmap length in bytes, `M`. Multiple of 4.
    pub bitmap_size: usize,
}

impl Layout {
    /// Derive the layout for a requested logical size, or `None` if the
    /// request cannot fit. A request below the minimum is raised to it;
    /// anything larger than `B - 8` leaves no room for header + bitmap.
    pub fn compute(block_size: usize, requested: usize) -> Option<Layout> {
        if requested == 0 || requested > block_size.saturating_sub(2 * HEADER_SIZE) {
            return None;
        }
        let size = (requested.max(MIN_SIZE) + 3) & !3;

        // Most slots any bitmap size allows: each slot costs S bytes plus
        // one bitmap bit, and the reference bit costs one more.
        let n_max = ((block_size - HEADER_SIZE) * 8 - 1) / (size * 8 + 1);
        // Bytes for n_max + 1 bits, rounded up to a 4-byte boundary. The
        // bitmap length is persisted nowhere wider than 15 bits.
        let bitmap_size = (((n_max + 1 + 31) / 8) & !3).min(0x7ffc);

        Some(Layout {
            block_size,
            size,
            bitmap_size,
        })
    }

    /// Number of data slots in one epoch.
    pub fn slot_count(&self) -> usize {
        (self.block_size - HEADER_SIZE - self.bitmap_size) / self.size
    }

    /// Byte offset of slot 0, just past the header and bitmap.
    pub fn first_slot(&self) -> usize {
        HEADER_SIZE + self.bitmap_size
    }

    /// Byte offset of slot `index`.
    pub fn slot_offset(&self, index: usize) -> usize {
        self.first_slot() + index * self.size
    }

    /// Bitmap bit recording the slot at `offset` (bit 0 is the reference bit).
    pub fn slot_bit(&self, offset: usize) -> usize {
        1 + (offset - self.first_slot()) / self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B: usize = 4096;

    /// The simple-but-slow way to size the map: grow the bitmap
    /// 4 bytes at a time until it can hold one bit per slot plus the
    /// reference bit.
    fn iterative_bitmap_size(block_size: usize, size: usize) -> usize {
        let mut m = 0;
        loop {
            m += 4;
            let n = (block_size - HEADER_SIZE - m) / size;
            if n + 1 <= m * 8 {
                return m;
            }
        }
    }

    #[test]
    fn closed_form_matches_iterative_for_all_valid_sizes() {
        for size in (MIN_SIZE..=B - 8).step_by(4) {
            let layout = Layout::compute(B, size).unwrap();
            assert_eq!(
                layout.bitmap_size,
                iterative_bitmap_size(B, layout.size),
                "disagreement at S={size}"
            );
        }
    }

    #[test]
    fn bitmap_is_minimal_and_sufficient() {
        for size in (MIN_SIZE..=B - 8).step_by(4) {
            let layout = Layout::compute(B, size).unwrap();
            let m = layout.bitmap_size;
            let fits = |m: usize| (B - HEADER_SIZE - m) / layout.size + 1 <= m * 8;
            assert!(fits(m), "S={size}: M={m} too small");
            if m > 4 {
                assert!(!fits(m - 4), "S={size}: M={} would already fit", m - 4);
            }
        }
    }

    #[test]
    fn minimum_size_geometry_is_fixed() {
        let layout = Layout::compute(B, MIN_SIZE).unwrap();
        assert_eq!(layout.size, 16);
        assert_eq!(layout.bitmap_size, 32);
        assert_eq!(layout.slot_count(), 253);
        assert!(layout.slot_count() >= 200);
        assert_eq!(layout.first_slot(), 36);
    }

    #[test]
    fn request_is_clamped_and_aligned() {
        assert_eq!(Layout::compute(B, 1).unwrap().size, MIN_SIZE);
        assert_eq!(Layout::compute(B, 17).unwrap().size, 20);
        assert_eq!(Layout::compute(B, 100).unwrap().size, 100);
    }

    #[test]
    fn oversized_and_zero_requests_are_rejected() {
        assert!(Layout::compute(B, 0).is_none());
        assert!(Layout::compute(B, B - 8).is_some());
        assert!(Layout::compute(B, B - 7).is_none());
        assert!(Layout::compute(B, B).is_none());
    }

    #[test]
    fn slots_never_overrun_the_block() {
        for size in (MIN_SIZE..=B - 8).step_by(4) {
            let layout = Layout::compute(B, size).unwrap();
            let end = layout.slot_offset(layout.slot_count() - 1) + layout.size;
            assert!(end <= B, "S={size}: last slot ends at {end}");
            assert!(layout.slot_count() >= 1);
        }
    }
}
