// Licensed under the Apache-2.0 license

//! Application-side half of the update protocol.
//!
//! Once a received image validates, the scheduler records the switch in the
//! update settings and arms a reboot at a random point of the jitter window.
//! After a boot into unacknowledged firmware it runs the stability window;
//! surviving it is the only way an image becomes trusted.

use core::time::Duration;

use flash_image::{FirmwareVersion, RebootCause};
use fuota_config::boot::{BootConfig, BootConfigError, SettingsFlags, UpdateSettings, UpdateSlot};
use fuota_config::FuotaTimings;
use fuota_storage::{FlashDrvError, FlashMap, RebootInfoStore, RebootTracker};
use image_verifier::{ImageInfo, ImageVerifier, ValidationError};
use log::{error, info, warn};
use rand::Rng;

use crate::timer::OneShotTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("image was received into the running slot")]
    RunningSlot,
    #[error("candidate rejected: {0}")]
    Rejected(ValidationError),
    #[error("settings update failed: {0}")]
    Settings(#[from] BootConfigError),
    #[error("flash access failed: {0}")]
    Flash(#[from] FlashDrvError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    None,
    /// The planned reboot is due. The cause is already recorded.
    Reboot,
}

pub struct UpdateScheduler<'a> {
    flash: &'a FlashMap<'a>,
    settings: &'a mut dyn BootConfig,
    validator: &'a dyn ImageVerifier,
    reboot: RebootTracker<'a>,
    timings: FuotaTimings,
    reboot_timer: OneShotTimer,
    stability_timer: OneShotTimer,
    /// The running image was acknowledged, by a previous run or this one.
    running_trusted: bool,
}

impl<'a> UpdateScheduler<'a> {
    pub fn new(
        flash: &'a FlashMap<'a>,
        settings: &'a mut dyn BootConfig,
        validator: &'a dyn ImageVerifier,
        reboot_store: &'a dyn RebootInfoStore,
        timings: FuotaTimings,
    ) -> Self {
        UpdateScheduler {
            flash,
            settings,
            validator,
            reboot: RebootTracker::new(reboot_store),
            timings,
            reboot_timer: OneShotTimer::new(),
            stability_timer: OneShotTimer::new(),
            running_trusted: false,
        }
    }

    pub fn settings(&self) -> UpdateSettings {
        self.settings.read_settings()
    }

    pub fn timings(&self) -> &FuotaTimings {
        &self.timings
    }

    pub fn reboot_info(&self) -> &RebootTracker<'a> {
        &self.reboot
    }

    /// Version of the image in the execution partition.
    pub fn running_version(&self) -> Option<FirmwareVersion> {
        self.validator
            .read_header(&self.flash.active)
            .ok()
            .map(|header| header.firmware_version())
    }

    /// Called once after the application has initialized.
    pub fn on_boot(&mut self, now: Duration) {
        let settings = self.settings.read_settings();
        self.running_trusted = settings.acknowledged();
        if !self.running_trusted {
            info!(
                "[fuota] {:?} is on trial, acknowledging in {:?}",
                settings.current_slot, self.timings.stability_window
            );
            self.stability_timer
                .schedule(now, self.timings.stability_window);
        }
        self.reboot.mark_app_started();
    }

    /// Validates a fully received image and, if it is acceptable, requests
    /// the switch and schedules the reboot. Returns the reboot delay.
    pub fn on_image_complete<R: Rng + ?Sized>(
        &mut self,
        now: Duration,
        target: UpdateSlot,
        rng: &mut R,
    ) -> Result<Duration, SchedulerError> {
        let mut settings = self.settings.read_settings();
        if target == settings.current_slot {
            return Err(SchedulerError::RunningSlot);
        }

        let partition = self.flash.slot(target);
        let info = match self
            .validator
            .validate_candidate(partition, self.running_version())
        {
            Ok(info) => info,
            Err(err) => {
                warn!("[fuota] rejecting image in {}: {}", partition.name(), err);
                if matches!(
                    err,
                    ValidationError::SignatureInvalid | ValidationError::VersionRollback { .. }
                ) {
                    partition.erase_all()?;
                }
                return Err(SchedulerError::Rejected(err));
            }
        };

        settings.next_slot = target;
        settings.boot_attempt_count = 0;
        settings.flags.remove(SettingsFlags::ACKNOWLEDGED);
        self.settings.write_settings(&settings)?;

        let delay = self.reboot_delay(rng);
        self.reboot_timer.schedule(now, delay);
        log_scheduled(&info, target, delay);
        Ok(delay)
    }

    fn reboot_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.timings.reboot_delay_min.as_millis() as u64;
        let max = self.timings.reboot_delay_max.as_millis() as u64;
        if max <= min {
            return self.timings.reboot_delay_min;
        }
        Duration::from_millis(rng.gen_range(min..=max))
    }

    /// Advances both timers.
    pub fn poll(&mut self, now: Duration) -> SchedulerAction {
        if self.stability_timer.poll(now) {
            if let Err(err) = self.acknowledge() {
                error!("[fuota] acknowledgment failed: {}", err);
            }
        }
        if self.reboot_timer.poll(now) {
            info!("[fuota] rebooting into the new image");
            self.reboot.record_reset_cause(RebootCause::ImageUpgrade);
            return SchedulerAction::Reboot;
        }
        SchedulerAction::None
    }

    /// Marks the running image as trusted.
    pub fn acknowledge(&mut self) -> Result<(), SchedulerError> {
        let mut settings = self.settings.read_settings();
        settings.flags.insert(SettingsFlags::ACKNOWLEDGED);
        settings.flags.remove(SettingsFlags::ROLLED_BACK);
        settings.boot_attempt_count = 0;
        self.settings.write_settings(&settings)?;
        self.stability_timer.cancel();
        self.running_trusted = true;
        self.reboot.clear_fault_count();
        info!("[fuota] {:?} acknowledged", settings.current_slot);
        Ok(())
    }

    /// Withdraws a requested switch before the reboot happens, e.g. because
    /// a new session will overwrite the candidate slot.
    pub fn cancel_pending_update(&mut self) -> Result<(), SchedulerError> {
        self.reboot_timer.cancel();
        let mut settings = self.settings.read_settings();
        if !settings.update_pending() {
            return Ok(());
        }
        settings.next_slot = settings.current_slot;
        if self.running_trusted {
            settings.flags.insert(SettingsFlags::ACKNOWLEDGED);
        }
        self.settings.write_settings(&settings)?;
        info!("[fuota] pending switch to {:?} withdrawn", settings.current_slot.opposite());
        Ok(())
    }

    pub fn reboot_pending(&self, now: Duration) -> Option<Duration> {
        self.reboot_timer.remaining(now)
    }

    pub fn on_trial(&self) -> bool {
        self.stability_timer.is_armed()
    }
}

fn log_scheduled(info: &ImageInfo, target: UpdateSlot, delay: Duration) {
    info!(
        "[fuota] v{} build {:#x} ready in {:?}, rebooting in {}s",
        info.version,
        info.build_id,
        target,
        delay.as_secs()
    );
}
