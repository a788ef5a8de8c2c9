// Licensed under the Apache-2.0 license

mod test_fuota_cycle;
mod test_recovery;
mod test_rollback;

#[cfg(test)]
mod test {
    use flash_image::{FirmwareVersion, ImageType};
    use fuota_config::boot::{PartitionId, SettingsFlags, UpdateSettings};
    use fuota_config::FuotaTimings;
    use fuota_rom::{select_boot_target, BootDecision, SystemContext};
    use fuota_runtime::fec::encode_fragments;
    use fuota_runtime::{AgentAction, FuotaAgent, FuotaEvent};
    use fuota_storage::ResetFlags;
    use fuota_testing::{keys, ImageBuilder, TestDevice};
    use image_verifier::{EcdsaP384Verifier, ImageValidator};
    use log::info;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::time::Duration;

    pub const FRAGMENT_SIZE: usize = 48;
    pub const MINUTE: Duration = Duration::from_secs(60);

    pub type Agent<'a> = FuotaAgent<'a, StdRng>;

    pub fn v(major: u8, minor: u8) -> FirmwareVersion {
        FirmwareVersion::new(major, minor, 0, 0)
    }

    pub fn signed_app(version: FirmwareVersion) -> Vec<u8> {
        ImageBuilder::new(version).signed().build()
    }

    pub fn signed_factory() -> Vec<u8> {
        ImageBuilder::new(v(0, 1))
            .image_type(ImageType::Factory)
            .signed()
            .build()
    }

    fn verifier() -> EcdsaP384Verifier {
        EcdsaP384Verifier::from_sec1(&keys::verifying_key_sec1()).expect("test public key")
    }

    /// A device as it leaves the factory: `version` in SlotA and Active,
    /// acknowledged, with a factory image.
    pub fn provisioned_device(version: FirmwareVersion) -> TestDevice {
        fuota_testing::init_logging();
        let device = TestDevice::new();
        let image = signed_app(version);
        device.program(PartitionId::Factory, &signed_factory());
        device.program(PartitionId::SlotA, &image);
        device.program(PartitionId::Active, &image);
        device.write_settings(&UpdateSettings {
            flags: SettingsFlags::ACKNOWLEDGED,
            ..UpdateSettings::default()
        });
        device
    }

    /// One run of the bootloader with signature enforcement.
    pub fn boot(device: &TestDevice, flags: ResetFlags) -> BootDecision {
        let verifier = verifier();
        let validator = ImageValidator::with_signature(&verifier);
        let map = device.flash_map();
        let mut store = device.settings_store();
        let mut ctx = SystemContext::new(&map, &mut store, &validator, &device.reboot_ram, flags);
        let decision = select_boot_target(&mut ctx);
        info!("[test] boot decision {:?}", decision.target);
        decision
    }

    pub fn booted_version(decision: &BootDecision) -> Option<FirmwareVersion> {
        decision.target.info().map(|info| info.version)
    }

    /// Runs the application once, from uptime zero, and hands its update
    /// agent to `f`.
    pub fn run_application<T>(device: &TestDevice, seed: u64, f: impl FnOnce(&mut Agent) -> T) -> T {
        let verifier = verifier();
        let validator = ImageValidator::with_signature(&verifier);
        let map = device.flash_map();
        let mut store = device.settings_store();
        let mut agent = FuotaAgent::new(
            &map,
            &mut store,
            &validator,
            &device.reboot_ram,
            FuotaTimings::default(),
            StdRng::seed_from_u64(seed),
        );
        agent.start(Duration::ZERO);
        f(&mut agent)
    }

    /// Announces `image` as session `session_id` with `redundancy` parity
    /// fragments and sends the fragments at `positions`, in that order.
    /// Positions past the data fragments are parity fragments.
    pub fn send_positions(
        agent: &mut Agent,
        session_id: u8,
        image: &[u8],
        redundancy: usize,
        positions: &[usize],
    ) {
        let (data, parity) = encode_fragments(image, FRAGMENT_SIZE, redundancy);
        agent.dispatch(FuotaEvent::SessionSetup {
            session_id,
            fragment_count: data.len() as u16,
            fragment_size: FRAGMENT_SIZE as u16,
            redundancy: redundancy as u16,
        });
        for &position in positions {
            let (index, is_redundant, payload) = match position.checked_sub(data.len()) {
                None => (position, false, &data[position]),
                Some(j) => (j, true, &parity[j]),
            };
            agent.dispatch(FuotaEvent::Fragment {
                session_id,
                index: index as u16,
                is_redundant,
                payload,
            });
        }
    }

    /// Number of fragment positions `image` takes with `redundancy` parity.
    pub fn position_count(image: &[u8], redundancy: usize) -> usize {
        image.len().div_ceil(FRAGMENT_SIZE) + redundancy
    }

    /// Sends `image` with `redundancy` parity fragments, dropping `lost`
    /// random fragments. Data goes first, then parity.
    pub fn transmit(agent: &mut Agent, session_id: u8, image: &[u8], redundancy: usize, lost: usize, seed: u64) {
        let mut positions: Vec<usize> = (0..position_count(image, redundancy)).collect();
        positions.shuffle(&mut StdRng::seed_from_u64(seed));
        let mut kept = positions.split_off(lost);
        kept.sort_unstable();
        send_positions(agent, session_id, image, redundancy, &kept);
    }

    /// Like `transmit`, but fragments arrive in random order.
    pub fn transmit_shuffled(
        agent: &mut Agent,
        session_id: u8,
        image: &[u8],
        redundancy: usize,
        lost: usize,
        seed: u64,
    ) {
        let mut positions: Vec<usize> = (0..position_count(image, redundancy)).collect();
        positions.shuffle(&mut StdRng::seed_from_u64(seed));
        send_positions(agent, session_id, image, redundancy, &positions[lost..]);
    }

    /// Ticks once a minute up to `until`. Returns the uptime at which the
    /// agent asked for a reboot.
    pub fn run_until(agent: &mut Agent, until: Duration) -> Option<Duration> {
        let mut now = Duration::ZERO;
        while now <= until {
            if agent.dispatch(FuotaEvent::Tick { now }) == AgentAction::Reboot {
                return Some(now);
            }
            now += MINUTE;
        }
        None
    }

    /// Delivers `version` over the air and lets the scheduled reboot happen.
    pub fn update_over_the_air(device: &TestDevice, version: FirmwareVersion, seed: u64) {
        let image = signed_app(version);
        let rebooted = run_application(device, seed, |agent| {
            transmit(agent, seed as u8, &image, 24, 4, seed);
            assert_eq!(agent.last_error(), None);
            run_until(agent, 30 * MINUTE)
        });
        assert!(rebooted.is_some(), "no reboot scheduled for v{}", version);
    }

    /// The application crashes shortly after start without acknowledging.
    pub fn crash(device: &TestDevice) {
        run_application(device, 0, |agent| run_until(agent, MINUTE));
        device.inject_fault(flash_image::RebootCause::HardFault);
    }
}
