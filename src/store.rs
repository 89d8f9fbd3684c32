//! The versioned slot store: a RAM buffer that reads and writes like plain
//! memory, plus an explicit commit that appends the buffer as a new version
//! inside one flash erase block, erasing only when the slot log is full.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::bitmap;
use crate::error::{EepromError, FlashError, Result};
use crate::flash::{FlashDevice, InterruptGate, NoGate};
use crate::layout::{Layout, HEADER_SIZE};

pub struct EepromStore<F: FlashDevice, G: InterruptGate = NoGate> {
    flash: F,
    gate: G,
    block: u32,
    layout: Option<Layout>,
    data: Vec<u8>,
    bitmap: Vec<u8>,
    /// Offset of the slot currently believed valid; 0 means none.
    offset: usize,
    dirty: bool,
}

// Flash primitives, each inside exactly one suspension bracket. Free
// functions so callers can borrow the data buffer at the same time.
fn erase<F: FlashDevice, G: InterruptGate>(
    flash: &mut F,
    gate: &mut G,
    block: u32,
) -> std::result::Result<(), FlashError> {
    gate.suspended(|| flash.erase_block(block))
}

fn read<F: FlashDevice, G: InterruptGate>(
    flash: &mut F,
    gate: &mut G,
    block: u32,
    offset: usize,
    buf: &mut [u8],
) -> std::result::Result<(), FlashError> {
    gate.suspended(|| flash.read_block(block, offset, buf))
}

fn write<F: FlashDevice, G: InterruptGate>(
    flash: &mut F,
    gate: &mut G,
    block: u32,
    offset: usize,
    data: &[u8],
) -> std::result::Result<(), FlashError> {
    gate.suspended(|| flash.write_block(block, offset, data))
}

impl<F: FlashDevice> EepromStore<F, NoGate> {
    /// Store over `block` with nothing to suspend around flash operations.
    pub fn new(flash: F, block: u32) -> Self {
        Self::with_gate(flash, NoGate, block)
    }
}

impl<F: FlashDevice, G: InterruptGate> EepromStore<F, G> {
    pub fn with_gate(flash: F, gate: G, block: u32) -> Self {
        EepromStore {
            flash,
            gate,
            block,
            layout: None,
            data: Vec::new(),
            bitmap: Vec::new(),
            offset: 0,
            dirty: false,
        }
    }

    /// Size the store for `requested` logical bytes and recover the most
    /// recently committed version from flash, if one exists.
    ///
    /// An unusable size (zero, or too large for the block) leaves the store
    /// unconfigured. Finding no compatible image on flash is not an error:
    /// it is the expected state the first time a size is used, and after the
    /// requested size changes. The buffer then starts zeroed and dirty.
    pub fn configure(&mut self, requested: usize) {
        let Some(layout) = Layout::compute(self.flash.block_size(), requested) else {
            warn!(requested, "configuration rejected: size does not fit the block");
            return;
        };

        // Defensive: always fresh buffers, sized for the new layout.
        self.data = vec![0; layout.size];
        self.bitmap = vec![0; layout.bitmap_size];
        self.offset = 0;
        self.dirty = true;
        self.layout = Some(layout);

        self.recover(layout);
    }

    /// Reconstruct "last durably written" purely from the block's bytes.
    fn recover(&mut self, layout: Layout) {
        let mut header = [0u8; HEADER_SIZE];
        if read(&mut self.flash, &mut self.gate, self.block, 0, &mut header).is_err() {
            debug!("header unreadable, treating block as empty");
            return;
        }
        if LittleEndian::read_u32(&header) != layout.size as u32 {
            debug!(size = layout.size, "size header mismatch, stale epoch");
            return;
        }

        if read(
            &mut self.flash,
            &mut self.gate,
            self.block,
            HEADER_SIZE,
            &mut self.bitmap,
        )
        .is_err()
        {
            return;
        }

        let offset = bitmap::current_offset(&layout, &self.bitmap);
        if offset == 0 || offset + layout.size > layout.block_size {
            debug!(offset, "bitmap names no usable slot");
            return;
        }

        if read(
            &mut self.flash,
            &mut self.gate,
            self.block,
            offset,
            &mut self.data,
        )
        .is_err()
        {
            return;
        }

        self.offset = offset;
        self.dirty = false;
        debug!(offset, "recovered current version");
    }

    /// Logical size, or 0 when unconfigured.
    pub fn length(&self) -> usize {
        self.layout.map_or(0, |l| l.size)
    }

    /// Whether the buffer differs from what is durably stored (or nothing
    /// was ever stored).
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn read(&self, address: usize) -> u8 {
        self.data.get(address).copied().unwrap_or(0)
    }

    pub fn write(&mut self, address: usize, value: u8) {
        if let Some(byte) = self.data.get_mut(address) {
            if *byte != value {
                *byte = value;
                self.dirty = true;
            }
        }
    }

    /// Copy `out.len()` bytes starting at `address` out of the buffer.
    /// Leaves `out` untouched if the span is out of range.
    pub fn get(&self, address: usize, out: &mut [u8]) {
        if let Some(src) = self.data.get(address..address.saturating_add(out.len())) {
            out.copy_from_slice(src);
        }
    }

    /// Copy `value` into the buffer at `address`; no-op if out of range.
    /// Dirties only when a byte actually changes. Once dirty, the comparison
    /// is skipped and the copy happens unconditionally.
    pub fn put(&mut self, address: usize, value: &[u8]) {
        let end = address.saturating_add(value.len());
        if let Some(dst) = self.data.get_mut(address..end) {
            if self.dirty || *dst != *value {
                dst.copy_from_slice(value);
                self.dirty = true;
            }
        }
    }

    /// Durably persist the buffer as the newest version.
    ///
    /// Appends into the next free slot while the epoch has room, otherwise
    /// erases the block, rewrites the header, and starts over at slot 0.
    /// On failure the previous committed version remains the one a rescan
    /// will find, with one exception described in the module tests: a
    /// bitmap write that fails after the slot data went down leaves the new
    /// data durable but unrecorded.
    pub fn commit(&mut self) -> Result<()> {
        let Some(layout) = self.layout else {
            return Err(EepromError::NotConfigured);
        };
        if !self.dirty && self.offset != 0 {
            return Ok(());
        }

        let saved_offset = self.offset;
        let full = self.offset == 0 || self.offset + 2 * layout.size > layout.block_size;

        if full {
            debug!(offset = self.offset, "slot log full, erase cycle");
            erase(&mut self.flash, &mut self.gate, self.block)?;

            let mut header = [0u8; HEADER_SIZE];
            LittleEndian::write_u32(&mut header, layout.size as u32);
            write(&mut self.flash, &mut self.gate, self.block, 0, &header)?;

            // Learn the erased polarity from the device rather than assuming
            // it; the reference bit stays at whatever the erase left behind.
            let mut probe = [0u8; 4];
            read(
                &mut self.flash,
                &mut self.gate,
                self.block,
                HEADER_SIZE,
                &mut probe,
            )?;
            self.bitmap.fill(probe[0]);

            self.offset = layout.first_slot();
        } else {
            self.offset += layout.size;
        }

        if let Err(e) = write(
            &mut self.flash,
            &mut self.gate,
            self.block,
            self.offset,
            &self.data,
        ) {
            self.offset = saved_offset;
            return Err(e.into());
        }

        // Data is durable; record it in the bitmap. Only the 4-byte chunk
        // holding the changed bit goes down.
        let byte_no = bitmap::flag_slot(&layout, &mut self.bitmap, self.offset);
        let chunk = byte_no & !3;
        write(
            &mut self.flash,
            &mut self.gate,
            self.block,
            HEADER_SIZE + chunk,
            &self.bitmap[chunk..chunk + 4],
        )?;

        self.dirty = false;
        Ok(())
    }

    /// Commit while discarding the epoch's history: the block is erased
    /// first even if slots remain. On failure the prior offset is restored.
    pub fn commit_reset(&mut self) -> Result<()> {
        let Some(layout) = self.layout else {
            return Err(EepromError::NotConfigured);
        };
        let saved_offset = self.offset;
        self.offset = layout.block_size; // guarantees the full path
        self.dirty = true;
        match self.commit() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.offset = saved_offset;
                Err(e)
            }
        }
    }

    /// Erase the block immediately, leaving it structurally empty (no
    /// header, no bitmap) until the next commit writes them. The buffer is
    /// reallocated and starts zeroed and dirty.
    pub fn wipe(&mut self) -> Result<()> {
        let Some(layout) = self.layout else {
            return Err(EepromError::NotConfigured);
        };
        erase(&mut self.flash, &mut self.gate, self.block)?;
        self.data = vec![0; layout.size];
        self.bitmap = vec![0; layout.bitmap_size];
        self.offset = 0;
        self.dirty = true;
        Ok(())
    }

    /// Share of the current epoch's slot capacity already consumed, or
    /// `None` while no committed version exists — distinct from a first
    /// commit that rounds to 0%.
    pub fn percent_used(&self) -> Option<u32> {
        let layout = self.layout?;
        if self.offset == 0 {
            return None;
        }
        let copies = layout.slot_count();
        let copy_no = 1 + (self.offset - layout.first_slot()) / layout.size;
        Some((100 * copy_no / copies) as u32)
    }

    /// Final commit, then release buffers. The store drops back to the
    /// unconfigured state; a commit failure is logged, not propagated.
    pub fn teardown(&mut self) {
        if self.layout.is_none() {
            return;
        }
        if let Err(e) = self.commit() {
            warn!(error = %e, "final commit failed during teardown");
        }
        self.layout = None;
        self.data = Vec::new();
        self.bitmap = Vec::new();
        self.offset = 0;
        self.dirty = false;
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the device back, e.g. to rebuild a store over the same media.
    pub fn into_flash(self) -> F {
        self.flash
    }
}
