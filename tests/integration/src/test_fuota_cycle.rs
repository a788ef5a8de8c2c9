// Licensed under the Apache-2.0 license

#[cfg(test)]
mod test {
    use crate::test::{
        boot, booted_version, position_count, provisioned_device, run_application, run_until,
        send_positions, signed_app, transmit, transmit_shuffled, update_over_the_air, v,
        FRAGMENT_SIZE, MINUTE,
    };
    use flash_image::RebootCause;
    use fuota_config::boot::{PartitionId, UpdateSlot};
    use fuota_rom::BootTarget;
    use fuota_runtime::fec::encode_fragments;
    use fuota_runtime::{AgentError, DecoderError, FuotaEvent, SchedulerError};
    use fuota_storage::ResetFlags;
    use fuota_testing::ImageBuilder;
    use image_verifier::ValidationError;

    #[test]
    fn test_update_over_lossy_link() {
        let device = provisioned_device(v(1, 0));
        assert_eq!(booted_version(&boot(&device, ResetFlags::POWER_ON)), Some(v(1, 0)));

        let image = signed_app(v(1, 1));
        let reboot_at = run_application(&device, 1, |agent| {
            // 50 data fragments plus 20 parity, 5 of them lost.
            transmit(agent, 1, &image, 20, 5, 1);
            assert_eq!(agent.last_error(), None);
            let status = agent.status();
            assert_eq!(status.next_slot, UpdateSlot::B);
            assert!(!status.acknowledged);
            run_until(agent, 30 * MINUTE)
        })
        .expect("reboot scheduled");
        assert!(reboot_at >= 10 * MINUTE);

        let decision = boot(&device, ResetFlags::SOFTWARE);
        assert!(matches!(
            decision.target,
            BootTarget::Slot {
                partition: PartitionId::SlotB,
                ..
            }
        ));
        assert_eq!(booted_version(&decision), Some(v(1, 1)));
        assert_eq!(device.reboot_tracker().last().cause, RebootCause::ImageUpgrade);

        // The new image survives its stability window.
        run_application(&device, 2, |agent| {
            assert_eq!(run_until(agent, 11 * MINUTE), None);
            let status = agent.status();
            assert!(status.acknowledged);
            assert_eq!(status.current_slot, UpdateSlot::B);
            assert_eq!(status.firmware_version, Some(v(1, 1)));
        });

        let decision = boot(&device, ResetFlags::SOFTWARE);
        assert_eq!(booted_version(&decision), Some(v(1, 1)));
        assert_eq!(decision.settings.boot_attempt_count, 0);
    }

    #[test]
    fn test_parity_covers_lost_fragments() {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);
        update_over_the_air(&device, v(1, 1), 3);
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 1)));
    }

    #[test]
    fn test_shuffled_delivery_losing_all_redundancy() {
        for seed in 10..14 {
            let device = provisioned_device(v(1, 0));
            boot(&device, ResetFlags::POWER_ON);
            let image = signed_app(v(1, 1));
            let rebooted = run_application(&device, seed, |agent| {
                transmit_shuffled(agent, seed as u8, &image, 8, 8, seed);
                assert_eq!(agent.last_error(), None, "seed {}", seed);
                assert_eq!(agent.status().next_slot, UpdateSlot::B, "seed {}", seed);
                run_until(agent, 30 * MINUTE)
            });
            assert!(rebooted.is_some(), "seed {}", seed);
            assert_eq!(
                device.read_partition(PartitionId::SlotB, image.len()),
                image,
                "seed {}",
                seed
            );
            assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 1)));
        }
    }

    #[test]
    fn test_parity_first_replaces_lost_data() {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);
        let image = signed_app(v(1, 1));
        let redundancy = 6;
        let data = position_count(&image, 0);

        // Every parity fragment, highest index first, then the data
        // fragments minus the first `redundancy`.
        let mut positions: Vec<usize> = (data..data + redundancy).rev().collect();
        positions.extend(redundancy..data);
        let rebooted = run_application(&device, 5, |agent| {
            send_positions(agent, 5, &image, redundancy, &positions);
            assert_eq!(agent.last_error(), None);
            assert!(agent.status().session.is_none());
            run_until(agent, 30 * MINUTE)
        });
        assert!(rebooted.is_some());
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 1)));
    }

    #[test]
    fn test_too_many_losses_leave_running_image() {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);
        let image = signed_app(v(1, 1));
        run_application(&device, 8, |agent| {
            transmit_shuffled(agent, 8, &image, 4, 5, 8);
            assert!(agent.status().session.is_some());
            assert_eq!(run_until(agent, 25 * 60 * MINUTE), None);
            assert!(agent.status().session.is_none());
            assert_eq!(
                agent.last_error(),
                Some(AgentError::Decoder(DecoderError::InsufficientFragments))
            );
            assert_eq!(agent.status().next_slot, UpdateSlot::A);
        });
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 0)));
    }

    #[test]
    fn test_consecutive_updates_alternate_slots() {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);
        for (round, minor) in (1..=3).enumerate() {
            update_over_the_air(&device, v(1, minor), 10 + round as u64);
            let decision = boot(&device, ResetFlags::SOFTWARE);
            assert_eq!(booted_version(&decision), Some(v(1, minor)));
            run_application(&device, 20, |agent| run_until(agent, 10 * MINUTE));
        }
        let settings = device.settings();
        assert_eq!(settings.current_slot, UpdateSlot::B);
        assert!(settings.acknowledged());
    }

    #[test]
    fn test_unsigned_image_is_discarded() {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);

        let image = ImageBuilder::new(v(1, 1)).build();
        let rebooted = run_application(&device, 4, |agent| {
            transmit(agent, 4, &image, 4, 0, 4);
            assert_eq!(
                agent.last_error(),
                Some(AgentError::Scheduler(SchedulerError::Rejected(
                    ValidationError::SignatureInvalid
                )))
            );
            run_until(agent, 60 * MINUTE)
        });
        assert_eq!(rebooted, None);
        assert!(device
            .read_partition(PartitionId::SlotB, 256)
            .iter()
            .all(|b| *b == 0xFF));
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 0)));
    }

    #[test]
    fn test_interrupted_install_is_redone() {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);
        update_over_the_air(&device, v(1, 1), 5);

        // Supply drops while the bootloader copies SlotB into Active.
        device.internal.cut_power_after(1000);
        device.external.cut_power_after(0);
        boot(&device, ResetFlags::SOFTWARE);
        device.power_cycle();

        let decision = boot(&device, ResetFlags::POWER_ON);
        assert_eq!(booted_version(&decision), Some(v(1, 1)));
        assert_eq!(device.settings().current_slot, UpdateSlot::B);
    }

    #[test]
    fn test_session_spans_power_cycle() {
        let device = provisioned_device(v(1, 0));
        boot(&device, ResetFlags::POWER_ON);
        let image = signed_app(v(1, 1));

        // First half of the data fragments, then the device loses power.
        let half = image.len() / FRAGMENT_SIZE / 2;
        run_application(&device, 6, |agent| {
            let truncated = &image[..half * FRAGMENT_SIZE];
            let (data, _) = encode_fragments(truncated, FRAGMENT_SIZE, 0);
            let total = image.len().div_ceil(FRAGMENT_SIZE);
            agent.dispatch(FuotaEvent::SessionSetup {
                session_id: 6,
                fragment_count: total as u16,
                fragment_size: FRAGMENT_SIZE as u16,
                redundancy: 0,
            });
            for (i, payload) in data.iter().enumerate() {
                agent.dispatch(FuotaEvent::Fragment {
                    session_id: 6,
                    index: i as u16,
                    is_redundant: false,
                    payload,
                });
            }
            assert_eq!(agent.status().session.map(|s| s.data_received), Some(half));
        });
        device.power_cycle();
        boot(&device, ResetFlags::POWER_ON);

        // The sender repeats the whole session; already stored fragments
        // are recognised.
        let rebooted = run_application(&device, 7, |agent| {
            assert_eq!(agent.status().session.map(|s| s.data_received), Some(half));
            transmit(agent, 6, &image, 0, 0, 7);
            assert_eq!(agent.last_error(), None);
            run_until(agent, 30 * MINUTE)
        });
        assert!(rebooted.is_some());
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 1)));
    }
}
