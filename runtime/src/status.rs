// Licensed under the Apache-2.0 license

//! Read-only diagnostic snapshot for fleet monitoring.

use flash_image::{FirmwareVersion, RebootCause};
use fuota_config::boot::{SettingsFlags, UpdateSettings, UpdateSlot};
use fuota_storage::RebootInfo;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::frag_decoder::SessionProgress;

pub const STATUS_REPORT_SIZE: usize = 16;

const STATUS_ACKNOWLEDGED: u8 = 1 << 0;
const STATUS_ROLLED_BACK: u8 = 1 << 1;
const STATUS_SESSION_ACTIVE: u8 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub current_slot: UpdateSlot,
    pub next_slot: UpdateSlot,
    pub boot_attempt_count: u8,
    pub acknowledged: bool,
    pub rolled_back: bool,
    pub last_reboot_cause: RebootCause,
    pub fault_count: u8,
    pub session: Option<SessionProgress>,
    /// Version of the running image, if its header is readable.
    pub firmware_version: Option<FirmwareVersion>,
}

/// Uplink encoding of a `StatusReport`.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct StatusPayload {
    current_slot: u8,
    next_slot: u8,
    boot_attempt_count: u8,
    flags: u8,
    last_reboot_cause: u8,
    fault_count: u8,
    received: U16,
    needed: U16,
    parity_received: U16,
    fw_version: U32,
}

const _: () = assert!(core::mem::size_of::<StatusPayload>() == STATUS_REPORT_SIZE);

impl StatusReport {
    pub fn new(
        settings: &UpdateSettings,
        reboot: &RebootInfo,
        session: Option<SessionProgress>,
        firmware_version: Option<FirmwareVersion>,
    ) -> Self {
        StatusReport {
            current_slot: settings.current_slot,
            next_slot: settings.next_slot,
            boot_attempt_count: settings.boot_attempt_count,
            acknowledged: settings.acknowledged(),
            rolled_back: settings.flags.contains(SettingsFlags::ROLLED_BACK),
            last_reboot_cause: reboot.cause,
            fault_count: reboot.fault_count,
            session,
            firmware_version,
        }
    }

    pub fn encode(&self) -> [u8; STATUS_REPORT_SIZE] {
        let mut flags = 0;
        if self.acknowledged {
            flags |= STATUS_ACKNOWLEDGED;
        }
        if self.rolled_back {
            flags |= STATUS_ROLLED_BACK;
        }
        if self.session.is_some() {
            flags |= STATUS_SESSION_ACTIVE;
        }
        let clamp = |n: usize| U16::new(n.min(u16::MAX as usize) as u16);
        let payload = StatusPayload {
            current_slot: self.current_slot as u8,
            next_slot: self.next_slot as u8,
            boot_attempt_count: self.boot_attempt_count,
            flags,
            last_reboot_cause: self.last_reboot_cause as u8,
            fault_count: self.fault_count,
            received: clamp(self.session.map_or(0, |s| s.received())),
            needed: clamp(self.session.map_or(0, |s| s.fragment_count)),
            parity_received: clamp(self.session.map_or(0, |s| s.parity_received)),
            fw_version: self.firmware_version.map_or(0, |v| v.0).into(),
        };
        let mut out = [0u8; STATUS_REPORT_SIZE];
        out.copy_from_slice(payload.as_bytes());
        out
    }
}
