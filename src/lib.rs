//! EEPROM emulation on top of a single NOR flash erase block.
//!
//! NOR flash erases slowly and only in whole blocks, and every erase costs
//! wear. This crate gives a caller a RAM buffer that behaves like ordinary
//! byte-addressable memory, and an explicit [`EepromStore::commit`] that
//! persists it while erasing as rarely as possible: the block holds a small
//! size header, an occupancy bitmap, and a log of fixed-size slots, each
//! slot one committed version of the data. Commits append into the next
//! free slot; only when the log is exhausted is the block erased and the
//! log restarted. The most recent version is located from the bitmap alone,
//! so recovery after a restart needs no slot scanning and no prior state.
//!
//! Flash access goes through the [`FlashDevice`] trait; an
//! [`InterruptGate`] brackets each primitive so timing-sensitive activity
//! elsewhere in the host can be held off for exactly one operation at a
//! time. [`fixtures::SimFlash`] simulates a NOR device (with fault
//! injection) and [`image::MmapFlash`] backs the block with a
//! memory-mapped file.

pub mod bitmap;
pub mod error;
pub mod fixtures;
pub mod flash;
pub mod image;
pub mod layout;
pub mod store;

pub use error::{EepromError, FlashError, Result};
pub use flash::{FlashDevice, InterruptGate, NoGate};
pub use layout::Layout;
pub use store::EepromStore;
