// Licensed under the Apache-2.0 license

#[cfg(test)]
mod test {
    use crate::test::{
        boot, booted_version, run_application, run_until, signed_app, update_over_the_air, v,
        MINUTE,
    };
    use fuota_config::boot::{PartitionId, UpdateSlot};
    use fuota_rom::recovery::{run_recovery, MAX_RECOVERY_CHUNK};
    use fuota_rom::{
        BootTarget, LedPattern, RecoveryChannel, RecoveryRequest, StatusIndicator, SystemContext,
    };
    use fuota_storage::ResetFlags;
    use fuota_testing::{keys, ImageBuilder, TestDevice};
    use image_verifier::{EcdsaP384Verifier, ImageValidator};
    use std::collections::VecDeque;

    /// Serial link feeding pre-recorded requests.
    struct Uplink(VecDeque<(RecoveryRequest, Vec<u8>)>);

    impl Uplink {
        fn new() -> Self {
            Uplink(VecDeque::new())
        }

        fn send_image(mut self, image: &[u8]) -> Self {
            for (i, chunk) in image.chunks(MAX_RECOVERY_CHUNK).enumerate() {
                self.0.push_back((
                    RecoveryRequest::Write {
                        offset: (i * MAX_RECOVERY_CHUNK) as u32,
                        len: chunk.len(),
                    },
                    chunk.to_vec(),
                ));
            }
            self.0.push_back((RecoveryRequest::Complete, Vec::new()));
            self
        }
    }

    impl RecoveryChannel for Uplink {
        fn receive(&mut self, buf: &mut [u8; MAX_RECOVERY_CHUNK]) -> RecoveryRequest {
            let (request, data) = self.0.pop_front().expect("uplink exhausted");
            buf[..data.len()].copy_from_slice(&data);
            request
        }
    }

    #[derive(Default)]
    struct Led(Vec<LedPattern>);

    impl StatusIndicator for Led {
        fn show(&mut self, pattern: LedPattern) {
            self.0.push(pattern);
        }
    }

    fn recover(device: &TestDevice, uplink: &mut Uplink) -> Vec<LedPattern> {
        let verifier = EcdsaP384Verifier::from_sec1(&keys::verifying_key_sec1()).expect("test key");
        let validator = ImageValidator::with_signature(&verifier);
        let map = device.flash_map();
        let mut store = device.settings_store();
        let mut ctx = SystemContext::new(
            &map,
            &mut store,
            &validator,
            &device.reboot_ram,
            ResetFlags::POWER_ON,
        );
        let mut led = Led::default();
        run_recovery(&mut ctx, uplink, &mut led);
        led.0
    }

    #[test]
    fn test_blank_device_is_recovered_and_updated() {
        fuota_testing::init_logging();
        let device = TestDevice::new();
        assert_eq!(boot(&device, ResetFlags::POWER_ON).target, BootTarget::RecoveryWait);

        let mut uplink = Uplink::new()
            .send_image(&ImageBuilder::new(v(1, 0)).build())
            .send_image(&signed_app(v(1, 0)));
        let shown = recover(&device, &mut uplink);
        assert_eq!(
            shown,
            vec![
                LedPattern::RecoveryWait,
                LedPattern::Receiving,
                LedPattern::Rejected,
                LedPattern::Receiving,
                LedPattern::Accepted,
            ]
        );
        assert!(uplink.0.is_empty());

        let decision = boot(&device, ResetFlags::SOFTWARE);
        assert_eq!(booted_version(&decision), Some(v(1, 0)));
        assert_eq!(decision.settings.current_slot, UpdateSlot::A);

        run_application(&device, 1, |agent| run_until(agent, 10 * MINUTE));
        update_over_the_air(&device, v(1, 1), 2);
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 1)));
    }

    #[test]
    fn test_recovery_accepts_older_image() {
        fuota_testing::init_logging();
        let device = TestDevice::new();
        // A newer image in Active, but torn.
        device.program(PartitionId::Active, &signed_app(v(2, 0)));
        device.corrupt(PartitionId::Active, 300, 0x10);
        assert_eq!(boot(&device, ResetFlags::POWER_ON).target, BootTarget::RecoveryWait);

        let mut uplink = Uplink::new().send_image(&signed_app(v(1, 0)));
        recover(&device, &mut uplink);
        assert_eq!(booted_version(&boot(&device, ResetFlags::SOFTWARE)), Some(v(1, 0)));
    }
}
