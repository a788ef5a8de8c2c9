// Licensed under the Apache-2.0 license

use crate::hil::{FlashDrvError, FlashStorage};
use fuota_config::boot::{PartitionId, UpdateSlot};
use fuota_config::{FlashDevice, FlashLayout, PartitionRegion};

/// Represents a partition within the flash memory.
///
/// A `FlashPartition` provides a view into a contiguous region of the underlying
/// flash, allowing for read, write, and erase operations within the
/// specified bounds. All operations are checked to ensure they do not exceed
/// the partition's boundaries, and a read-only partition rejects every write
/// and erase.
///
/// # Fields
/// - `driver`: Reference to the flash storage controller driver.
/// - `name`: Name of the partition (for debugging or identification).
/// - `base_offset`: The starting offset of the partition within the flash.
/// - `length`: The size of the partition in bytes.
/// - `read_only`: Set for write-protected partitions such as the factory image.
pub struct FlashPartition<'a> {
    driver: &'a dyn FlashStorage,
    name: &'static str,
    base_offset: usize,
    length: usize,
    read_only: bool,
}

impl<'a> FlashPartition<'a> {
    /// Creates a new writable `FlashPartition` instance.
    ///
    /// # Arguments
    ///
    /// * `driver` - Reference to the flash storage controller.
    /// * `name` - Static string slice representing the partition name.
    /// * `base_offset` - The starting offset of the partition within the flash.
    /// * `length` - The length of the partition in bytes.
    ///
    /// # Returns
    ///
    /// Returns `Ok(FlashPartition)` if the partition fits within the flash capacity,
    /// otherwise returns `Err(FlashDrvError::SIZE)` if the partition exceeds the flash size.
    pub fn new(
        driver: &'a dyn FlashStorage,
        name: &'static str,
        base_offset: usize,
        length: usize,
    ) -> Result<Self, FlashDrvError> {
        let capacity = driver.capacity();
        if base_offset + length > capacity {
            return Err(FlashDrvError::SIZE);
        }
        Ok(FlashPartition {
            driver,
            name,
            base_offset,
            length,
            read_only: false,
        })
    }

    /// Creates a write-protected partition. Writes and erases fail with
    /// `FlashDrvError::NOSUPPORT`.
    pub fn new_read_only(
        driver: &'a dyn FlashStorage,
        name: &'static str,
        base_offset: usize,
        length: usize,
    ) -> Result<Self, FlashDrvError> {
        let mut partition = Self::new(driver, name, base_offset, length)?;
        partition.read_only = true;
        Ok(partition)
    }

    /// Reads data from the flash partition into the provided buffer, starting at the specified offset within the partition.
    ///
    /// # Arguments
    ///
    /// * `partition_offset` - The offset within the partition from which to start reading.
    /// * `buf` - The mutable buffer to fill with the read data.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the read operation is successful.
    /// Returns `Err(FlashDrvError::SIZE)` if the requested range exceeds the partition size, or propagates errors from the underlying flash controller.
    pub fn read(&self, partition_offset: usize, buf: &mut [u8]) -> Result<(), FlashDrvError> {
        if partition_offset + buf.len() > self.length {
            return Err(FlashDrvError::SIZE);
        }
        self.driver.read(buf, self.base_offset + partition_offset)
    }

    /// Writes data to the flash partition, starting at the specified offset within the partition.
    ///
    /// # Arguments
    ///
    /// * `partition_offset` - The offset within the partition at which to start writing.
    /// * `buf` - The buffer containing the data to write.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the write operation is successful.
    /// Returns `Err(FlashDrvError::SIZE)` if the write would exceed the partition size,
    /// `Err(FlashDrvError::NOSUPPORT)` if the partition is read-only,
    /// or propagates errors from the underlying flash controller.
    pub fn write(&self, partition_offset: usize, buf: &[u8]) -> Result<(), FlashDrvError> {
        if self.read_only {
            return Err(FlashDrvError::NOSUPPORT);
        }
        if partition_offset + buf.len() > self.length {
            return Err(FlashDrvError::SIZE);
        }
        self.driver.write(buf, self.base_offset + partition_offset)
    }

    /// Erases a region of the flash partition, starting at the specified offset within the partition.
    ///
    /// # Arguments
    ///
    /// * `partition_offset` - The offset within the partition at which to start erasing.
    /// * `len` - The number of bytes to erase.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the erase operation is successful.
    /// Returns `Err(FlashDrvError::SIZE)` if the erase range exceeds the partition size,
    /// `Err(FlashDrvError::NOSUPPORT)` if the partition is read-only,
    /// or propagates errors from the underlying flash controller.
    pub fn erase(&self, partition_offset: usize, len: usize) -> Result<(), FlashDrvError> {
        if self.read_only {
            return Err(FlashDrvError::NOSUPPORT);
        }
        if partition_offset + len > self.length {
            return Err(FlashDrvError::SIZE);
        }
        self.driver.erase(self.base_offset + partition_offset, len)
    }

    /// Erases the sectors covering the first `len` bytes of the partition.
    pub fn erase_prefix(&self, len: usize) -> Result<(), FlashDrvError> {
        let len = self.round_up_to_sector(len);
        if len == 0 {
            return Ok(());
        }
        self.erase(0, len)
    }

    pub fn erase_all(&self) -> Result<(), FlashDrvError> {
        self.erase(0, self.length)
    }

    /// Returns `true` if `len` bytes starting at `partition_offset` all read
    /// back as erased.
    pub fn is_erased(&self, partition_offset: usize, len: usize) -> Result<bool, FlashDrvError> {
        let mut buf = [0u8; 64];
        let mut offset = 0;
        while offset < len {
            let chunk = core::cmp::min(buf.len(), len - offset);
            self.read(partition_offset + offset, &mut buf[..chunk])?;
            if buf[..chunk].iter().any(|&b| b != 0xFF) {
                return Ok(false);
            }
            offset += chunk;
        }
        Ok(true)
    }

    pub fn round_up_to_sector(&self, len: usize) -> usize {
        let sector = self.erase_size();
        len.div_ceil(sector) * sector
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn erase_size(&self) -> usize {
        self.driver.erase_size()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// All partitions of a device, resolved against the flash drivers.
pub struct FlashMap<'a> {
    pub factory: FlashPartition<'a>,
    pub slot_a: FlashPartition<'a>,
    pub slot_b: FlashPartition<'a>,
    pub active: FlashPartition<'a>,
    pub settings: FlashPartition<'a>,
    pub frag_session: FlashPartition<'a>,
    pub frag_scratch: FlashPartition<'a>,
}

impl<'a> FlashMap<'a> {
    /// Builds every partition of `layout`. The factory partition is always
    /// write-protected.
    pub fn new(
        internal: &'a dyn FlashStorage,
        external: &'a dyn FlashStorage,
        layout: &FlashLayout,
    ) -> Result<Self, FlashDrvError> {
        let driver = |region: &PartitionRegion| -> &'a dyn FlashStorage {
            match region.device {
                FlashDevice::Internal => internal,
                FlashDevice::External => external,
            }
        };
        let make = |name: &'static str, region: &PartitionRegion| {
            FlashPartition::new(
                driver(region),
                name,
                region.offset as usize,
                region.size as usize,
            )
        };
        Ok(FlashMap {
            factory: FlashPartition::new_read_only(
                driver(&layout.factory),
                "factory",
                layout.factory.offset as usize,
                layout.factory.size as usize,
            )?,
            slot_a: make("slot_a", &layout.slot_a)?,
            slot_b: make("slot_b", &layout.slot_b)?,
            active: make("active", &layout.active)?,
            settings: make("settings", &layout.settings)?,
            frag_session: make("frag_session", &layout.frag_session)?,
            frag_scratch: make("frag_scratch", &layout.frag_scratch)?,
        })
    }

    pub fn partition(&self, id: PartitionId) -> &FlashPartition<'a> {
        match id {
            PartitionId::Factory => &self.factory,
            PartitionId::SlotA => &self.slot_a,
            PartitionId::SlotB => &self.slot_b,
            PartitionId::Active => &self.active,
        }
    }

    pub fn slot(&self, slot: UpdateSlot) -> &FlashPartition<'a> {
        self.partition(slot.into())
    }
}
