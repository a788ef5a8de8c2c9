// Licensed under the Apache-2.0 license

//! On-flash journal of the fragment session.
//!
//! Layout of the session partition:
//!
//! | Offset | Content |
//! |--------|---------|
//! | 0      | `SessionRecord` |
//! | 256    | received journal, one bit per fragment position |
//!
//! A journal bit starts erased (1) and is cleared by a single-byte write
//! once the fragment's payload is on flash, so progress is persisted
//! without any erase. Data positions come first, parity positions follow.

use core::mem::offset_of;

use flash_image::crc32;
use fuota_config::boot::UpdateSlot;
use fuota_storage::{FlashDrvError, FlashPartition};
use log::warn;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::bitmap::{FragmentBitmap, MAX_DATA_FRAGMENTS, MAX_REDUNDANCY};
use crate::frag_decoder::SessionParams;

pub const SESSION_MAGIC: u32 = 0x5E55_F4A6;
pub const SESSION_VERSION: u16 = 1;
pub const JOURNAL_OFFSET: usize = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SessionRecord {
    pub magic: U32,
    pub version: U16,
    pub fragment_size: U16,
    pub fragment_count: U16,
    pub redundancy: U16,
    pub session_id: u8,
    pub target_slot: u8,
    pub reserved: [u8; 14],
    pub crc32: U32,
}

const _: () = assert!(core::mem::size_of::<SessionRecord>() == 32);

impl SessionRecord {
    fn new(params: &SessionParams) -> Self {
        let mut record = SessionRecord {
            magic: SESSION_MAGIC.into(),
            version: SESSION_VERSION.into(),
            fragment_size: params.fragment_size.into(),
            fragment_count: params.fragment_count.into(),
            redundancy: params.redundancy.into(),
            session_id: params.session_id,
            target_slot: params.target as u8,
            reserved: [0; 14],
            crc32: U32::new(0),
        };
        record.crc32 = record.compute_crc().into();
        record
    }

    fn compute_crc(&self) -> u32 {
        crc32(&self.as_bytes()[..offset_of!(SessionRecord, crc32)])
    }

    fn params(&self) -> Option<SessionParams> {
        if self.magic.get() != SESSION_MAGIC
            || self.version.get() != SESSION_VERSION
            || self.compute_crc() != self.crc32.get()
        {
            return None;
        }
        Some(SessionParams {
            session_id: self.session_id,
            fragment_count: self.fragment_count.get(),
            fragment_size: self.fragment_size.get(),
            redundancy: self.redundancy.get(),
            target: UpdateSlot::try_from(self.target_slot).ok()?,
        })
    }
}

/// Bytes of journal needed for `positions` fragment positions.
pub fn journal_len(positions: usize) -> usize {
    positions.div_ceil(8)
}

/// Starts a fresh journal for `params`, dropping any previous one.
pub fn create(partition: &FlashPartition, params: &SessionParams) -> Result<(), FlashDrvError> {
    partition.erase_all()?;
    partition.write(0, SessionRecord::new(params).as_bytes())
}

pub fn mark_received(partition: &FlashPartition, position: usize) -> Result<(), FlashDrvError> {
    let byte = !(1u8 << (position % 8));
    partition.write(JOURNAL_OFFSET + position / 8, &[byte])
}

pub fn discard(partition: &FlashPartition) -> Result<(), FlashDrvError> {
    partition.erase_all()
}

/// Reads back the session of a previous run, if any.
pub fn load(partition: &FlashPartition) -> Result<Option<(SessionParams, FragmentBitmap)>, FlashDrvError> {
    let mut buf = [0u8; core::mem::size_of::<SessionRecord>()];
    partition.read(0, &mut buf)?;
    let Ok(record) = SessionRecord::read_from_bytes(&buf[..]) else {
        return Ok(None);
    };
    let Some(params) = record.params() else {
        return Ok(None);
    };
    let n = params.fragment_count as usize;
    let r = params.redundancy as usize;
    if n == 0 || n > MAX_DATA_FRAGMENTS || r > MAX_REDUNDANCY {
        warn!("[frag] stored session has unsupported geometry {}+{}", n, r);
        return Ok(None);
    }

    let mut received = FragmentBitmap::new(n + r);
    let mut chunk = [0u8; 64];
    let total = journal_len(n + r);
    let mut offset = 0;
    while offset < total {
        let len = core::cmp::min(chunk.len(), total - offset);
        partition.read(JOURNAL_OFFSET + offset, &mut chunk[..len])?;
        for (i, byte) in chunk[..len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) == 0 {
                    received.set((offset + i) * 8 + bit);
                }
            }
        }
        offset += len;
    }
    Ok(Some((params, received)))
}
