/*++

Licensed under the Apache-2.0 license.

File Name:

    boot_selector.rs

Abstract:

    Boot slot selection state machine. Runs once per reset, to
    completion, and ends either with an image installed in the Active
    region or in RecoveryWait.

--*/

use crate::context::SystemContext;
use crate::installer::{self, InstallError};
use flash_image::FirmwareVersion;
use fuota_config::boot::{PartitionId, SettingsFlags, UpdateSettings, UpdateSlot};
use fuota_config::{FAULT_RESET_LIMIT, MAX_BOOT_ATTEMPTS};
use image_verifier::ImageInfo;
use log::{error, info, warn};
use smlang::statemachine;

statemachine! {
    derive_states: [Clone, Copy, Debug],
    derive_events: [Clone, Copy, Debug],
    transitions: {
        // syntax: CurrentState + Event = NextState
        // Every edge points further down the fallback chain, so the machine
        // always reaches Booting or RecoveryWait.

        // a pending update wins over the attempt counter
        *CheckPendingUpdate + UpdateAccepted = Booting,
        CheckPendingUpdate + UpdateRejected = SelectPrimary,
        CheckPendingUpdate + NoUpdatePending = SelectPrimary,

        SelectPrimary + PrimaryValid = BootPrimary,
        SelectPrimary + AttemptsExhausted = Rollback,
        SelectPrimary + EscalateToFactory = FactoryEscalation,
        SelectPrimary + ImageRejected = SelectAlternate,

        Rollback + ImageAccepted = Booting,
        Rollback + RollbackUnavailable = BootPrimary,

        FactoryEscalation + ImageAccepted = Booting,
        FactoryEscalation + EscalationAborted = BootPrimary,

        BootPrimary + ImageAccepted = Booting,
        BootPrimary + ImageRejected = SelectAlternate,

        SelectAlternate + ImageAccepted = Booting,
        SelectAlternate + ImageRejected = RestoreFactory,

        RestoreFactory + ImageAccepted = Booting,
        RestoreFactory + ImageRejected = BootActiveDirect,

        BootActiveDirect + ImageAccepted = Booting,
        BootActiveDirect + ImageRejected = RecoveryWait,
    }
}

/// Where execution continues after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootTarget {
    /// `partition` was installed into `Active`, which now holds `info`.
    Slot {
        partition: PartitionId,
        info: ImageInfo,
    },
    /// No slot could be installed but `Active` still holds a valid image.
    ActiveDirect(ImageInfo),
    /// Nothing bootable is left.
    RecoveryWait,
}

impl BootTarget {
    pub fn info(&self) -> Option<&ImageInfo> {
        match self {
            BootTarget::Slot { info, .. } | BootTarget::ActiveDirect(info) => Some(info),
            BootTarget::RecoveryWait => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootDecision {
    pub target: BootTarget,
    /// Settings as left in the store by this selection.
    pub settings: UpdateSettings,
}

/// State machine extended variables.
pub(crate) struct Selection {
    settings: UpdateSettings,
    target: Option<BootTarget>,
}

impl StateMachineContext for Selection {}

/// Runs the boot selection state machine to completion.
pub fn select_boot_target(ctx: &mut SystemContext) -> BootDecision {
    let settings = ctx.settings.read_settings();
    info!(
        "[boot] settings: current={:?} next={:?} attempts={} flags={:?}, last reset {:?}",
        settings.current_slot,
        settings.next_slot,
        settings.boot_attempt_count,
        settings.flags,
        ctx.reboot_info.cause
    );

    let mut state_machine = StateMachine::new(Selection {
        settings,
        target: None,
    });

    loop {
        let state = *state_machine.state();
        let selection = state_machine.context_mut();
        let event = match state {
            States::CheckPendingUpdate => check_pending_update(ctx, selection),
            States::SelectPrimary => select_primary(ctx, selection),
            States::Rollback => rollback(ctx, selection),
            States::FactoryEscalation => factory_escalation(ctx, selection),
            States::BootPrimary => boot_primary(ctx, selection),
            States::SelectAlternate => select_alternate(ctx, selection),
            States::RestoreFactory => restore_factory(ctx, selection),
            States::BootActiveDirect => boot_active_direct(ctx, selection),
            States::Booting | States::RecoveryWait => break,
        };
        if state_machine.process_event(event).is_err() {
            error!("[boot] no transition from {:?} on {:?}", state, event);
            state_machine.context_mut().target = None;
            break;
        }
        info!(
            "[boot] Transitioning from {:?} to {:?}",
            state,
            state_machine.state()
        );
    }

    let selection = state_machine.context();
    let target = selection.target.unwrap_or(BootTarget::RecoveryWait);
    if target == BootTarget::RecoveryWait {
        error!("[boot] no bootable image found, entering recovery wait");
    }
    BootDecision {
        target,
        settings: selection.settings,
    }
}

/// Version of the image currently in `Active`, used as the floor for new
/// candidates.
fn running_version(ctx: &SystemContext) -> Option<FirmwareVersion> {
    ctx.validator
        .read_header(&ctx.flash.active)
        .ok()
        .map(|header| header.firmware_version())
}

fn install_slot(ctx: &SystemContext, slot: UpdateSlot) -> Result<ImageInfo, InstallError> {
    installer::install_image(ctx.validator, ctx.flash.slot(slot), &ctx.flash.active)
}

/// Writes the result of a successful switch to `slot` and records the target.
fn adopt_slot(
    ctx: &mut SystemContext,
    selection: &mut Selection,
    slot: UpdateSlot,
    info: ImageInfo,
    flags_set: SettingsFlags,
    flags_cleared: SettingsFlags,
) {
    selection.settings.adopt(slot);
    selection.settings.flags.remove(flags_cleared);
    selection.settings.flags.insert(flags_set);
    ctx.persist(&selection.settings);
    ctx.reboot.clear_fault_count();
    selection.target = Some(BootTarget::Slot {
        partition: slot.into(),
        info,
    });
}

fn check_pending_update(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    let settings = selection.settings;
    if !settings.update_pending() {
        return Events::NoUpdatePending;
    }

    let next = settings.next_slot;
    let floor = running_version(ctx);
    let result = ctx
        .validator
        .validate_candidate(ctx.flash.slot(next), floor)
        .map_err(InstallError::InvalidSource)
        .and_then(|_| install_slot(ctx, next));

    match result {
        Ok(info) => {
            info!("[boot] switching to {:?} v{}", next, info.version);
            adopt_slot(
                ctx,
                selection,
                next,
                info,
                SettingsFlags::empty(),
                SettingsFlags::ROLLED_BACK | SettingsFlags::FACTORY_RESTORED,
            );
            Events::UpdateAccepted
        }
        Err(err) => {
            warn!(
                "[boot] rejected update in {:?}: {}, staying on {:?}",
                next, err, settings.current_slot
            );
            selection.settings.next_slot = settings.current_slot;
            ctx.persist(&selection.settings);
            Events::UpdateRejected
        }
    }
}

fn select_primary(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    let current = selection.settings.current_slot;
    if let Err(err) = ctx.validator.validate(ctx.flash.slot(current)) {
        warn!("[boot] current slot {:?} invalid: {}", current, err);
        return Events::ImageRejected;
    }
    if selection.settings.acknowledged() {
        return Events::PrimaryValid;
    }

    let attempts = selection.settings.boot_attempt_count.saturating_add(1);
    let rolled_back = selection.settings.flags.contains(SettingsFlags::ROLLED_BACK);
    let faults = ctx.reboot_info.fault_count;
    if rolled_back && (faults >= FAULT_RESET_LIMIT || attempts >= MAX_BOOT_ATTEMPTS) {
        warn!(
            "[boot] {:?} failing after a rollback ({} attempts, {} faults in a row)",
            current, attempts, faults
        );
        return Events::EscalateToFactory;
    }
    if attempts >= MAX_BOOT_ATTEMPTS {
        warn!(
            "[boot] {:?} never acknowledged after {} boots",
            current, selection.settings.boot_attempt_count
        );
        return Events::AttemptsExhausted;
    }

    selection.settings.boot_attempt_count = attempts;
    ctx.persist(&selection.settings);
    Events::PrimaryValid
}

fn rollback(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    let previous = selection.settings.current_slot.opposite();
    match install_slot(ctx, previous) {
        Ok(info) => {
            warn!("[boot] rolling back to {:?} v{}", previous, info.version);
            adopt_slot(
                ctx,
                selection,
                previous,
                info,
                SettingsFlags::ROLLED_BACK,
                SettingsFlags::empty(),
            );
            Events::ImageAccepted
        }
        Err(err) => {
            warn!("[boot] cannot roll back to {:?}: {}", previous, err);
            Events::RollbackUnavailable
        }
    }
}

fn restore_factory_image(
    ctx: &mut SystemContext,
    selection: &mut Selection,
) -> Result<(), InstallError> {
    let info = installer::restore_factory(
        ctx.validator,
        &ctx.flash.factory,
        &ctx.flash.slot_a,
        &ctx.flash.active,
    )?;
    adopt_slot(
        ctx,
        selection,
        UpdateSlot::A,
        info,
        SettingsFlags::FACTORY_RESTORED,
        SettingsFlags::ROLLED_BACK,
    );
    Ok(())
}

fn factory_escalation(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    match restore_factory_image(ctx, selection) {
        Ok(()) => Events::ImageAccepted,
        Err(err) => {
            warn!("[boot] factory escalation aborted: {}", err);
            Events::EscalationAborted
        }
    }
}

fn boot_primary(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    let current = selection.settings.current_slot;
    match install_slot(ctx, current) {
        Ok(info) => {
            selection.target = Some(BootTarget::Slot {
                partition: current.into(),
                info,
            });
            Events::ImageAccepted
        }
        Err(err) => {
            warn!("[boot] cannot install {:?}: {}", current, err);
            Events::ImageRejected
        }
    }
}

fn select_alternate(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    let alternate = selection.settings.current_slot.opposite();
    match install_slot(ctx, alternate) {
        Ok(info) => {
            warn!("[boot] falling back to {:?} v{}", alternate, info.version);
            adopt_slot(
                ctx,
                selection,
                alternate,
                info,
                SettingsFlags::empty(),
                SettingsFlags::empty(),
            );
            Events::ImageAccepted
        }
        Err(err) => {
            warn!("[boot] alternate slot {:?} unusable: {}", alternate, err);
            Events::ImageRejected
        }
    }
}

fn restore_factory(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    match restore_factory_image(ctx, selection) {
        Ok(()) => Events::ImageAccepted,
        Err(err) => {
            warn!("[boot] factory restore failed: {}", err);
            Events::ImageRejected
        }
    }
}

fn boot_active_direct(ctx: &mut SystemContext, selection: &mut Selection) -> Events {
    match ctx.validator.validate(&ctx.flash.active) {
        Ok(info) => {
            warn!("[boot] booting {} directly, v{}", ctx.flash.active.name(), info.version);
            selection.target = Some(BootTarget::ActiveDirect(info));
            Events::ImageAccepted
        }
        Err(err) => {
            warn!("[boot] {} unusable: {}", ctx.flash.active.name(), err);
            Events::ImageRejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_image::{ImageType, RebootCause};
    use fuota_config::boot::BootConfig;
    use fuota_storage::ResetFlags;
    use fuota_testing::{ImageBuilder, TestDevice};
    use image_verifier::{ImageValidator, ImageVerifier};

    fn v(major: u8, minor: u8) -> FirmwareVersion {
        FirmwareVersion::new(major, minor, 0, 0)
    }

    fn app(version: FirmwareVersion) -> Vec<u8> {
        ImageBuilder::new(version).build()
    }

    fn factory_image() -> Vec<u8> {
        ImageBuilder::new(v(0, 1))
            .image_type(ImageType::Factory)
            .build()
    }

    fn settings(current: UpdateSlot, next: UpdateSlot, attempts: u8, flags: SettingsFlags) -> UpdateSettings {
        UpdateSettings {
            current_slot: current,
            next_slot: next,
            boot_attempt_count: attempts,
            flags,
        }
    }

    /// One reset of the device: runs selection with the given reset flags.
    fn boot_with(device: &TestDevice, flags: ResetFlags) -> BootDecision {
        let map = device.flash_map();
        let mut store = device.settings_store();
        let validator = ImageValidator::new();
        let mut ctx = SystemContext::new(&map, &mut store, &validator, &device.reboot_ram, flags);
        select_boot_target(&mut ctx)
    }

    fn boot(device: &TestDevice) -> BootDecision {
        boot_with(device, ResetFlags::SOFTWARE)
    }

    fn active_version(device: &TestDevice) -> Option<FirmwareVersion> {
        let map = device.flash_map();
        ImageValidator::new().validate(&map.active).ok().map(|i| i.version)
    }

    fn booted_slot(decision: &BootDecision) -> Option<PartitionId> {
        match decision.target {
            BootTarget::Slot { partition, .. } => Some(partition),
            _ => None,
        }
    }

    #[test]
    fn test_fresh_device_boots_slot_a() {
        fuota_testing::init_logging();
        let device = TestDevice::new();
        device.program(PartitionId::SlotA, &app(v(1, 0)));

        let decision = boot_with(&device, ResetFlags::POWER_ON);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        assert_eq!(active_version(&device), Some(v(1, 0)));
        assert_eq!(device.settings().boot_attempt_count, 1);
    }

    #[test]
    fn test_acknowledged_boot_keeps_counter() {
        let device = TestDevice::new();
        device.program(PartitionId::SlotA, &app(v(1, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::A, 0, SettingsFlags::ACKNOWLEDGED));

        for _ in 0..5 {
            let decision = boot(&device);
            assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        }
        assert_eq!(device.settings().boot_attempt_count, 0);
    }

    #[test]
    fn test_pending_update_is_adopted() {
        let device = TestDevice::new();
        device.program(PartitionId::SlotA, &app(v(1, 0)));
        device.program(PartitionId::SlotB, &app(v(1, 1)));
        device.program(PartitionId::Active, &app(v(1, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::B, 2, SettingsFlags::ACKNOWLEDGED));

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotB));
        assert_eq!(active_version(&device), Some(v(1, 1)));
        // The switch resets the counter instead of inheriting the stale one.
        assert_eq!(
            device.settings(),
            settings(UpdateSlot::B, UpdateSlot::B, 0, SettingsFlags::empty())
        );
    }

    #[test]
    fn test_invalid_pending_update_is_dropped() {
        let device = TestDevice::new();
        device.program(PartitionId::SlotA, &app(v(1, 0)));
        let candidate = app(v(1, 1));
        device.program(PartitionId::SlotB, &candidate);
        device.corrupt(PartitionId::SlotB, candidate.len() - 1, 0x04);
        device.program(PartitionId::Active, &app(v(1, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::B, 0, SettingsFlags::ACKNOWLEDGED));

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        assert_eq!(active_version(&device), Some(v(1, 0)));
        let stored = device.settings();
        assert_eq!(stored.current_slot, UpdateSlot::A);
        assert_eq!(stored.next_slot, UpdateSlot::A);
    }

    #[test]
    fn test_downgrade_is_rejected_at_boot() {
        let device = TestDevice::new();
        device.program(PartitionId::SlotA, &app(v(2, 0)));
        device.program(PartitionId::SlotB, &app(v(1, 9)));
        device.program(PartitionId::Active, &app(v(2, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::B, 0, SettingsFlags::ACKNOWLEDGED));

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        assert_eq!(active_version(&device), Some(v(2, 0)));
    }

    #[test]
    fn test_corrupt_current_falls_through_to_alternate() {
        let device = TestDevice::new();
        let image = app(v(1, 1));
        device.program(PartitionId::SlotA, &image);
        device.corrupt(PartitionId::SlotA, 700, 0x01);
        device.program(PartitionId::SlotB, &app(v(1, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::A, 0, SettingsFlags::ACKNOWLEDGED));

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotB));
        assert_eq!(active_version(&device), Some(v(1, 0)));
        assert_eq!(device.settings().current_slot, UpdateSlot::B);
    }

    #[test]
    fn test_rollback_after_unacknowledged_boots() {
        fuota_testing::init_logging();
        let device = TestDevice::new();
        device.program(PartitionId::SlotA, &app(v(1, 0)));
        device.program(PartitionId::SlotB, &app(v(1, 1)));
        device.program(PartitionId::Active, &app(v(1, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::B, 0, SettingsFlags::ACKNOWLEDGED));

        // Boots 1 to 3 run the new image, none of them acknowledges it.
        for _ in 0..3 {
            assert_eq!(booted_slot(&boot(&device)), Some(PartitionId::SlotB));
            assert_eq!(active_version(&device), Some(v(1, 1)));
        }

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        assert_eq!(active_version(&device), Some(v(1, 0)));
        let stored = device.settings();
        assert_eq!(stored.current_slot, UpdateSlot::A);
        assert_eq!(stored.boot_attempt_count, 0);
        assert!(stored.flags.contains(SettingsFlags::ROLLED_BACK));
    }

    #[test]
    fn test_rollback_unavailable_keeps_primary() {
        let device = TestDevice::new();
        device.program(PartitionId::SlotB, &app(v(1, 1)));
        device.write_settings(&settings(UpdateSlot::B, UpdateSlot::B, 2, SettingsFlags::empty()));

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotB));
        assert_eq!(device.settings().current_slot, UpdateSlot::B);
    }

    #[test]
    fn test_second_failure_escalates_to_factory() {
        let device = TestDevice::new();
        device.program(PartitionId::Factory, &factory_image());
        device.program(PartitionId::SlotA, &app(v(1, 0)));
        device.program(PartitionId::SlotB, &app(v(1, 1)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::A, 2, SettingsFlags::ROLLED_BACK));

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        assert_eq!(active_version(&device), Some(v(0, 1)));
        let stored = device.settings();
        assert_eq!(stored.current_slot, UpdateSlot::A);
        assert!(stored.flags.contains(SettingsFlags::FACTORY_RESTORED));
        assert!(!stored.flags.contains(SettingsFlags::ROLLED_BACK));
    }

    #[test]
    fn test_repeated_faults_escalate_to_factory() {
        let device = TestDevice::new();
        device.program(PartitionId::Factory, &factory_image());
        device.program(PartitionId::SlotA, &app(v(1, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::A, 0, SettingsFlags::ROLLED_BACK));
        boot_with(&device, ResetFlags::POWER_ON);

        for _ in 0..2 {
            device.inject_fault(RebootCause::HardFault);
            boot(&device);
            device.write_settings(&settings(UpdateSlot::A, UpdateSlot::A, 0, SettingsFlags::ROLLED_BACK));
        }
        assert_eq!(active_version(&device), Some(v(1, 0)));

        device.inject_fault(RebootCause::HardFault);
        boot(&device);
        assert_eq!(active_version(&device), Some(v(0, 1)));
        assert_eq!(device.reboot_tracker().last().fault_count, 0);
    }

    #[test]
    fn test_escalation_without_factory_boots_primary() {
        let device = TestDevice::new();
        device.program(PartitionId::SlotA, &app(v(1, 0)));
        device.write_settings(&settings(UpdateSlot::A, UpdateSlot::A, 2, SettingsFlags::ROLLED_BACK));

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        assert_eq!(active_version(&device), Some(v(1, 0)));
    }

    #[test]
    fn test_factory_restore_when_both_slots_invalid() {
        let device = TestDevice::new();
        device.program(PartitionId::Factory, &factory_image());

        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
        assert_eq!(active_version(&device), Some(v(0, 1)));
        assert!(device
            .settings()
            .flags
            .contains(SettingsFlags::FACTORY_RESTORED));

        // Slot A now carries the factory image and boots normally.
        let decision = boot(&device);
        assert_eq!(booted_slot(&decision), Some(PartitionId::SlotA));
    }

    #[test]
    fn test_active_direct_when_nothing_else_validates() {
        let device = TestDevice::new();
        device.program(PartitionId::Active, &app(v(3, 0)));

        let decision = boot(&device);
        assert!(matches!(decision.target, BootTarget::ActiveDirect(info) if info.version == v(3, 0)));
        assert_eq!(device.settings(), UpdateSettings::default());
    }

    #[test]
    fn test_recovery_wait_when_nothing_validates() {
        let device = TestDevice::new();
        let decision = boot(&device);
        assert_eq!(decision.target, BootTarget::RecoveryWait);
        assert!(decision.target.info().is_none());
    }

    #[derive(Clone, Copy, Debug)]
    enum Content {
        Blank,
        Valid,
        Corrupt,
        Newer,
    }

    const CONTENTS: [Content; 4] = [Content::Blank, Content::Valid, Content::Corrupt, Content::Newer];

    fn provision(device: &TestDevice, id: PartitionId, content: Content, image_type: ImageType) {
        let version = match content {
            Content::Newer => v(5, 0),
            _ => v(1, 0),
        };
        let image = ImageBuilder::new(version).image_type(image_type).build();
        match content {
            Content::Blank => device.wipe(id),
            Content::Valid | Content::Newer => device.program(id, &image),
            Content::Corrupt => {
                device.program(id, &image);
                device.corrupt(id, 1200, 0x20);
            }
        }
    }

    /// Exercises the selector over every combination of slot contents and a
    /// spread of settings. Selection must always terminate, and whenever it
    /// picks an image, `Active` must hold a valid one.
    #[test]
    fn test_selection_always_terminates_with_valid_target() {
        let settings_variants = [
            None,
            Some(settings(UpdateSlot::A, UpdateSlot::A, 0, SettingsFlags::ACKNOWLEDGED)),
            Some(settings(UpdateSlot::A, UpdateSlot::B, 0, SettingsFlags::ACKNOWLEDGED)),
            Some(settings(UpdateSlot::B, UpdateSlot::A, 1, SettingsFlags::empty())),
            Some(settings(UpdateSlot::B, UpdateSlot::B, 2, SettingsFlags::empty())),
            Some(settings(UpdateSlot::A, UpdateSlot::A, 2, SettingsFlags::ROLLED_BACK)),
            Some(settings(UpdateSlot::B, UpdateSlot::B, 255, SettingsFlags::FACTORY_RESTORED)),
        ];

        for factory in CONTENTS {
            for slot_a in CONTENTS {
                for slot_b in CONTENTS {
                    for active in CONTENTS {
                        for variant in settings_variants.iter() {
                            let device = TestDevice::new();
                            provision(&device, PartitionId::Factory, factory, ImageType::Factory);
                            provision(&device, PartitionId::SlotA, slot_a, ImageType::Application);
                            provision(&device, PartitionId::SlotB, slot_b, ImageType::Application);
                            provision(&device, PartitionId::Active, active, ImageType::Application);
                            if let Some(variant) = variant {
                                device.write_settings(variant);
                            }

                            let decision = boot(&device);
                            let case = (factory, slot_a, slot_b, active, variant);
                            let anything_valid = [factory, slot_a, slot_b, active]
                                .iter()
                                .any(|c| matches!(c, Content::Valid | Content::Newer));
                            match decision.target {
                                BootTarget::RecoveryWait => {
                                    assert!(!anything_valid, "recovery wait for {:?}", case)
                                }
                                BootTarget::Slot { info, .. } | BootTarget::ActiveDirect(info) => {
                                    let map = device.flash_map();
                                    let installed = ImageValidator::new()
                                        .validate(&map.active)
                                        .unwrap_or_else(|e| panic!("{:?}: {}", case, e));
                                    assert!(installed.same_image(&info), "{:?}", case);
                                }
                            }
                            // Settings on flash always match the decision.
                            if decision.target != BootTarget::RecoveryWait {
                                assert_eq!(device.settings_store().read_settings(), decision.settings);
                            }
                        }
                    }
                }
            }
        }
    }
}
