//! Occupancy bitmap: one reference bit plus one bit per slot.
//!
//! Bit 0 is never programmed and so records the device's erased polarity for
//! the current epoch. Bit `1 + k` is flipped away from that polarity exactly
//! when slot `k` has been written. Slots are consumed strictly in order, so
//! the first bit still at the erased value marks the first never-written
//! slot, and the slot before it holds the current version. No slot contents
//! are inspected to find it.

use crate::layout::Layout;

/// Erased polarity recorded by the reference bit.
pub fn erased_value(bitmap: &[u8]) -> bool {
    bitmap[0] & 0x01 != 0
}

/// Offset of the current valid slot according to the bitmap, or 0 if the
/// bitmap is inconsistent. A fully-consumed bitmap yields an offset past the
/// end of the block; the caller's range check rejects it.
pub fn current_offset(layout: &Layout, bitmap: &[u8]) -> usize {
    let erased = erased_value(bitmap);

    // Bit 1 covers slot 0 and must differ from the reference bit, otherwise
    // no version was ever recorded and the rest of the map means nothing.
    if (bitmap[0] & 0x02 != 0) == erased {
        return 0;
    }

    let mut offset = layout.first_slot();
    for (byte_no, &byte) in bitmap.iter().enumerate() {
        let first_bit = if byte_no == 0 { 2 } else { 0 };
        for bit in first_bit..8 {
            let untouched = (byte & (1 << bit) != 0) == erased;
            if untouched {
                return offset;
            }
            offset += layout.size;
        }
    }
    offset
}

/// Flip the bit recording the slot at `offset` away from the erased value.
/// Returns the index of the bitmap byte that changed, so the caller can
/// write back just its 4-byte-aligned chunk.
pub fn flag_slot(layout: &Layout, bitmap: &mut [u8], offset: usize) -> usize {
    let bit = layout.slot_bit(offset);
    let byte_no = bit >> 3;
    let mask = 1u8 << (bit & 7);

    if erased_value(bitmap) {
        bitmap[byte_no] &= !mask;
    } else {
        bitmap[byte_no] |= mask;
    }
    byte_no
}
