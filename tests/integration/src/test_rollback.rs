// Licensed under the Apache-2.0 license

#[cfg(test)]
mod test {
    use crate::test::{
        boot, booted_version, crash, provisioned_device, run_application, run_until,
        update_over_the_air, v, MINUTE,
    };
    use flash_image::RebootCause;
    use fuota_config::boot::{SettingsFlags, UpdateSlot};
    use fuota_storage::ResetFlags;
    use fuota_testing::TestDevice;

    /// v1.0 acknowledged in SlotA, v1.1 delivered and rebooted into once.
    fn device_on_new_image() -> TestDevice {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);
        update_over_the_air(&device, v(1, 1), 1);
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 1)));
        device
    }

    #[test]
    fn test_crashing_update_rolls_back() {
        let device = device_on_new_image();

        // Boots 1 to 3 run v1.1, which crashes every time.
        for attempt in 1..=2 {
            crash(&device);
            let decision = boot(&device, ResetFlags::SOFTWARE);
            assert_eq!(booted_version(&decision), Some(v(1, 1)));
            assert_eq!(decision.settings.boot_attempt_count, attempt);
        }
        crash(&device);

        // By the 4th boot the previous image runs again.
        let decision = boot(&device, ResetFlags::SOFTWARE);
        assert_eq!(booted_version(&decision), Some(v(1, 0)));
        assert_eq!(decision.settings.current_slot, UpdateSlot::A);
        assert!(decision.settings.flags.contains(SettingsFlags::ROLLED_BACK));

        run_application(&device, 2, |agent| {
            let status = agent.status();
            assert!(status.rolled_back);
            assert_eq!(status.last_reboot_cause, RebootCause::HardFault);

            assert_eq!(run_until(agent, 10 * MINUTE), None);
            let status = agent.status();
            assert!(status.acknowledged);
            assert!(!status.rolled_back);
            assert_eq!(status.fault_count, 0);
        });

        let decision = boot(&device, ResetFlags::SOFTWARE);
        assert_eq!(booted_version(&decision), Some(v(1, 0)));
        assert_eq!(decision.settings.boot_attempt_count, 0);
    }

    #[test]
    fn test_watchdog_resets_count_as_failed_boots() {
        let device = device_on_new_image();
        for _ in 0..3 {
            run_application(&device, 3, |agent| run_until(agent, 5 * MINUTE));
            boot(&device, ResetFlags::WATCHDOG);
        }
        assert_eq!(device.settings().current_slot, UpdateSlot::A);
        assert_eq!(device.reboot_tracker().last().cause, RebootCause::Watchdog);
    }

    #[test]
    fn test_second_failure_escalates_to_factory() {
        let device = device_on_new_image();
        for _ in 0..3 {
            crash(&device);
            boot(&device, ResetFlags::SOFTWARE);
        }
        assert_eq!(device.settings().current_slot, UpdateSlot::A);

        // The image rolled back to is broken too.
        for _ in 0..2 {
            crash(&device);
            let decision = boot(&device, ResetFlags::SOFTWARE);
            assert_eq!(booted_version(&decision), Some(v(1, 0)));
        }
        crash(&device);
        let decision = boot(&device, ResetFlags::SOFTWARE);
        assert_eq!(booted_version(&decision), Some(v(0, 1)));
        assert!(decision
            .settings
            .flags
            .contains(SettingsFlags::FACTORY_RESTORED));
        assert!(!decision.settings.flags.contains(SettingsFlags::ROLLED_BACK));

        // A device running the factory image still takes updates.
        run_application(&device, 4, |agent| run_until(agent, 10 * MINUTE));
        update_over_the_air(&device, v(1, 2), 5);
        let decision = boot(&device, ResetFlags::SOFTWARE);
        assert_eq!(booted_version(&decision), Some(v(1, 2)));
        assert_eq!(decision.settings.current_slot, UpdateSlot::B);
        assert!(!decision
            .settings
            .flags
            .contains(SettingsFlags::FACTORY_RESTORED));
    }

    #[test]
    fn test_acknowledged_image_survives_faults() {
        let device = device_on_new_image();
        run_application(&device, 6, |agent| run_until(agent, 10 * MINUTE));

        for _ in 0..5 {
            crash(&device);
            let decision = boot(&device, ResetFlags::SOFTWARE);
            assert_eq!(booted_version(&decision), Some(v(1, 1)));
        }
        assert_eq!(device.reboot_tracker().last().fault_count, 5);
        assert_eq!(device.settings().boot_attempt_count, 0);
    }
}
