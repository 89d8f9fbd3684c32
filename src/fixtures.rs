//! Deterministic test doubles: a simulated NOR device with fault injection
//! and a gate that counts its suspension brackets.
//!
//! `SimFlash` enforces real NOR behaviour so tests catch protocol
//! violations: programming can only move bits toward the programmed state,
//! writes must be 4-byte aligned, and an erase restores the erased byte.
//! Both erase polarities are supported to exercise the reference bit.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::FlashError;
use crate::flash::{FlashDevice, InterruptGate};

pub struct SimFlash {
    mem: Vec<u8>,
    block_size: usize,
    erased: u8,
    fail_erases: u32,
    fail_write_in: Option<u32>,
    pub erase_count: u32,
    pub write_count: u32,
    pub read_count: u32,
}

impl SimFlash {
    /// A freshly-erased device of `blocks` blocks.
    pub fn new(block_size: usize, blocks: usize) -> Self {
        Self::with_polarity(block_size, blocks, 0xff)
    }

    /// Same, but with an explicit erased byte (0xff or 0x00).
    pub fn with_polarity(block_size: usize, blocks: usize, erased: u8) -> Self {
        SimFlash {
            mem: vec![erased; block_size * blocks],
            block_size,
            erased,
            fail_erases: 0,
            fail_write_in: None,
            erase_count: 0,
            write_count: 0,
            read_count: 0,
        }
    }

    /// Fail the next `n` erase attempts.
    pub fn fail_next_erases(&mut self, n: u32) {
        self.fail_erases = n;
    }

    /// Fail the `n`-th upcoming write (1 = the very next one).
    pub fn fail_write_in(&mut self, n: u32) {
        self.fail_write_in = Some(n);
    }

    /// Raw bytes of one block, for hand inspection and image surgery.
    pub fn block(&self, block: u32) -> &[u8] {
        let start = block as usize * self.block_size;
        &self.mem[start..start + self.block_size]
    }

    /// Overwrite a block with a hand-constructed image, bypassing NOR rules.
    pub fn load_image(&mut self, block: u32, image: &[u8]) {
        assert_eq!(image.len(), self.block_size);
        let start = block as usize * self.block_size;
        self.mem[start..start + self.block_size].copy_from_slice(image);
    }

    fn span(&self, block: u32, offset: usize, len: usize) -> Result<usize, FlashError> {
        if offset + len > self.block_size {
            return Err(FlashError::OutOfBounds {
                offset,
                len,
                block_size: self.block_size,
            });
        }
        Ok(block as usize * self.block_size + offset)
    }
}

impl FlashDevice for SimFlash {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn erase_block(&mut self, block: u32) -> Result<(), FlashError> {
        if self.fail_erases > 0 {
            self.fail_erases -= 1;
            return Err(FlashError::EraseFailed { block });
        }
        let start = self.span(block, 0, self.block_size)?;
        self.mem[start..start + self.block_size].fill(self.erased);
        self.erase_count += 1;
        Ok(())
    }

    fn read_block(&mut self, block: u32, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = self.span(block, offset, buf.len())?;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        self.read_count += 1;
        Ok(())
    }

    fn write_block(&mut self, block: u32, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(FlashError::Unaligned {
                offset,
                len: data.len(),
            });
        }
        if let Some(n) = self.fail_write_in {
            if n <= 1 {
                self.fail_write_in = None;
                return Err(FlashError::WriteFailed {
                    block,
                    offset,
                    len: data.len(),
                });
            }
            self.fail_write_in = Some(n - 1);
        }
        let start = self.span(block, offset, data.len())?;
        for (cell, &byte) in self.mem[start..].iter_mut().zip(data) {
            // Programming only moves bits away from the erased state.
            *cell = if self.erased == 0xff {
                *cell & byte
            } else {
                *cell | byte
            };
        }
        self.write_count += 1;
        Ok(())
    }
}

/// Gate that tallies how many suspension brackets were entered, through a
/// shared counter the test keeps a clone of.
#[derive(Debug, Default, Clone)]
pub struct CountingGate {
    pub brackets: Rc<Cell<u32>>,
}

impl InterruptGate for CountingGate {
    fn suspended<R>(&mut self, op: impl FnOnce() -> R) -> R {
        self.brackets.set(self.brackets.get() + 1);
        op()
    }
}
