// Licensed under the Apache-2.0 license

//! Generic interface for flash storage access.

use core::result::Result;

/// Byte addressable access to one flash device. Drivers implement this trait;
/// everything above it is free of register and pointer access.
///
/// NOR semantics apply: erased bytes read as `0xFF`, `write` can only clear
/// bits, and `erase` works on whole sectors of `erase_size()` bytes.
pub trait FlashStorage {
    /// Read from the flash storage, filling the provided buffer with data
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError>;

    /// Write to the flash storage with the full contents of the buffer, starting at the specified address
    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashDrvError>;

    /// Erase `length` bytes starting at address `address`. Both must be
    /// multiples of `erase_size()`.
    fn erase(&self, address: usize, length: usize) -> Result<(), FlashDrvError>;

    /// Returns the size of the flash storage in bytes.
    fn capacity(&self) -> usize;

    /// Returns the erase sector size in bytes.
    fn erase_size(&self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[repr(usize)]
pub enum FlashDrvError {
    /// Generic failure condition
    #[error("flash operation failed")]
    FAIL = 1,
    /// Underlying system is busy; retry
    #[error("flash busy")]
    BUSY = 2,
    /// The component is powered down
    #[error("flash powered down")]
    OFF = 4,
    /// An invalid parameter was passed
    #[error("invalid flash address or length")]
    INVAL = 6,
    /// Parameter passed was too large
    #[error("flash access out of range")]
    SIZE = 7,
    /// Operation is not supported (write protected region)
    #[error("flash region write protected")]
    NOSUPPORT = 10,
}

impl From<FlashDrvError> for usize {
    fn from(err: FlashDrvError) -> usize {
        err as usize
    }
}
