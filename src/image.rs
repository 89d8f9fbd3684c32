//! File-backed flash image. Gives the store real durability across process
//! restarts on a host: one memory-mapped file holds the blocks, erased
//! polarity 0xFF, and writes honour the same NOR programming rules the
//! simulator enforces.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::FlashError;
use crate::flash::FlashDevice;

const ERASED: u8 = 0xff;

pub struct MmapFlash {
    map: MmapMut,
    block_size: usize,
}

impl MmapFlash {
    /// Map `blocks` blocks of `block_size` bytes at `path`, creating and
    /// erasing the image if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>, block_size: usize, blocks: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = (block_size * blocks) as u64;
        let fresh = file.metadata()?.len() != len;
        if fresh {
            file.set_len(len)?;
        }

        let mut map = unsafe { MmapMut::map_mut(&file)? };
        if fresh {
            map.fill(ERASED);
            map.flush()?;
        }

        Ok(MmapFlash { map, block_size })
    }

    fn span(&self, block: u32, offset: usize, len: usize) -> Result<usize, FlashError> {
        let start = block as usize * self.block_size;
        if offset + len > self.block_size || start + self.block_size > self.map.len() {
            return Err(FlashError::OutOfBounds {
                offset,
                len,
                block_size: self.block_size,
            });
        }
        Ok(start + offset)
    }
}

impl FlashDevice for MmapFlash {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn erase_block(&mut self, block: u32) -> Result<(), FlashError> {
        let start = self.span(block, 0, self.block_size)?;
        self.map[start..start + self.block_size].fill(ERASED);
        self.map
            .flush_range(start, self.block_size)
            .map_err(FlashError::IoError)
    }

    fn read_block(&mut self, block: u32, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = self.span(block, offset, buf.len())?;
        buf.copy_from_slice(&self.map[start..start + buf.len()]);
        Ok(())
    }

    fn write_block(&mut self, block: u32, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(FlashError::Unaligned {
                offset,
                len: data.len(),
            });
        }
        let start = self.span(block, offset, data.len())?;
        for (cell, &byte) in self.map[start..].iter_mut().zip(data) {
            *cell &= byte;
        }
        self.map
            .flush_range(start, data.len())
            .map_err(FlashError::IoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EepromStore;
    use tempfile::tempdir;

    #[test]
    fn image_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("eeprom.img");

        {
            let flash = MmapFlash::open(&path, 4096, 2).unwrap();
            let mut store = EepromStore::new(flash, 1);
            store.configure(64);
            store.put(0, b"persist me..");
            store.commit().unwrap();
            store.teardown();
        }

        let flash = MmapFlash::open(&path, 4096, 2).unwrap();
        let mut store = EepromStore::new(flash, 1);
        store.configure(64);
        let mut out = [0u8; 12];
        store.get(0, &mut out);
        assert_eq!(&out, b"persist me..");
        assert!(!store.dirty());
    }

    #[test]
    fn fresh_image_starts_erased() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.img");
        let mut flash = MmapFlash::open(&path, 256, 1).unwrap();
        let mut buf = [0u8; 8];
        flash.read_block(0, 0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 8]);
    }

    #[test]
    fn bounds_and_alignment_are_enforced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bounds.img");
        let mut flash = MmapFlash::open(&path, 256, 1).unwrap();
        assert!(matches!(
            flash.write_block(0, 1, &[0; 4]),
            Err(FlashError::Unaligned { .. })
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            flash.read_block(0, 252, &mut buf),
            Err(FlashError::OutOfBounds { .. })
        ));
        assert!(matches!(
            flash.read_block(1, 0, &mut buf),
            Err(FlashError::OutOfBounds { .. })
        ));
    }
}
