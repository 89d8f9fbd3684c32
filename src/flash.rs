use crate::error::FlashError;

/// One erase-unit of NOR-style flash, addressed by block index.
///
/// The store is given exclusive use of exactly one block. Reads carry no
/// alignment requirement; writes must start on a 4-byte boundary and span a
/// multiple of 4 bytes, because that is how NOR program operations work.
/// Erasing returns every byte of the block to the device's erased value
/// (usually 0xFF, but the store never assumes which).
pub trait FlashDevice {
    /// Size in bytes of one erase block. Fixed for the device lifetime.
    fn block_size(&self) -> usize;

    fn erase_block(&mut self, block: u32) -> Result<(), FlashError>;

    fn read_block(&mut self, block: u32, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    fn write_block(&mut self, block: u32, offset: usize, data: &[u8]) -> Result<(), FlashError>;
}

/// Mutual-exclusion bracket around a single flash primitive.
///
/// While an erase or program operation is in flight, concurrent reads of the
/// device return undefined data, so any independently-scheduled activity that
/// might touch flash (an interrupt handler, a DMA engine) has to be held off
/// for the duration of the call. The bracket must cover exactly one primitive
/// at a time: prolonged suspension disrupts timing elsewhere in the host.
pub trait InterruptGate {
    fn suspended<R>(&mut self, op: impl FnOnce() -> R) -> R;
}

/// Gate for hosts with nothing to suspend (tests, single-context firmware).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGate;

impl InterruptGate for NoGate {
    fn suspended<R>(&mut self, op: impl FnOnce() -> R) -> R {
        op()
    }
}
