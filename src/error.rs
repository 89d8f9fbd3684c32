use thiserror::Error;
use std::io;

/// Failures reported by a [`crate::flash::FlashDevice`] implementation.
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("erase of block {block} failed")]
    EraseFailed { block: u32 },

    #[error("read of {len} bytes at block {block} offset {offset} failed")]
    ReadFailed { block: u32, offset: usize, len: usize },

    #[error("write of {len} bytes at block {block} offset {offset} failed")]
    WriteFailed { block: u32, offset: usize, len: usize },

    #[error("access out of bounds: offset {offset} len {len}, block size {block_size}")]
    OutOfBounds { offset: usize, len: usize, block_size: usize },

    #[error("write not 4-byte aligned: offset {offset} len {len}")]
    Unaligned { offset: usize, len: usize },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum EepromError {
    #[error("store has not been configured")]
    NotConfigured,

    #[error(transparent)]
    Flash(#[from] FlashError),
}

pub type Result<T> = std::result::Result<T, EepromError>;
