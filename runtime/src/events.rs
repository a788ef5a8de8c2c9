// Licensed under the Apache-2.0 license

//! Single entry point between the wireless stack and the update subsystem.
//!
//! The radio stack turns every callback into a `FuotaEvent` and hands it to
//! `FuotaAgent::dispatch` from task context. Flash is only ever touched from
//! there.

use core::time::Duration;

use fuota_config::boot::{BootConfig, UpdateSlot};
use fuota_config::FuotaTimings;
use fuota_storage::{FlashMap, RebootInfoStore};
use image_verifier::ImageVerifier;
use log::{debug, error, info, warn};
use rand::RngCore;

use crate::frag_decoder::{DecoderError, FragStatus, FragmentDecoder, SessionParams};
use crate::scheduler::{SchedulerAction, SchedulerError, UpdateScheduler};
use crate::status::StatusReport;
use crate::timer::OneShotTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuotaEvent<'p> {
    /// A fragmentation session was announced.
    SessionSetup {
        session_id: u8,
        fragment_count: u16,
        fragment_size: u16,
        redundancy: u16,
    },
    Fragment {
        session_id: u8,
        index: u16,
        is_redundant: bool,
        payload: &'p [u8],
    },
    /// The wireless stack gave up on a session.
    SessionTimeout { session_id: u8 },
    /// Monotonic uptime, delivered periodically.
    Tick { now: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    None,
    /// Reset the device now.
    Reboot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("fragment decoder: {0}")]
    Decoder(#[from] DecoderError),
    #[error("update scheduler: {0}")]
    Scheduler(#[from] SchedulerError),
}

pub struct FuotaAgent<'a, R: RngCore> {
    decoder: FragmentDecoder<'a>,
    scheduler: UpdateScheduler<'a>,
    session_timer: OneShotTimer,
    now: Duration,
    rng: R,
    last_error: Option<AgentError>,
}

impl<'a, R: RngCore> FuotaAgent<'a, R> {
    pub fn new(
        flash: &'a FlashMap<'a>,
        settings: &'a mut dyn BootConfig,
        validator: &'a dyn ImageVerifier,
        reboot_store: &'a dyn RebootInfoStore,
        timings: FuotaTimings,
        rng: R,
    ) -> Self {
        FuotaAgent {
            decoder: FragmentDecoder::new(flash),
            scheduler: UpdateScheduler::new(flash, settings, validator, reboot_store, timings),
            session_timer: OneShotTimer::new(),
            now: Duration::ZERO,
            rng,
            last_error: None,
        }
    }

    /// Starts the stability window if needed and resumes an interrupted
    /// session.
    pub fn start(&mut self, now: Duration) {
        self.now = now;
        self.scheduler.on_boot(now);
        match self.decoder.resume() {
            Ok(Some(FragStatus::Complete { target, .. })) => self.image_complete(target),
            Ok(Some(_)) => self.arm_session_timer(),
            Ok(None) => {}
            Err(err) => self.report(err.into()),
        }
    }

    pub fn dispatch(&mut self, event: FuotaEvent) -> AgentAction {
        match event {
            FuotaEvent::SessionSetup {
                session_id,
                fragment_count,
                fragment_size,
                redundancy,
            } => {
                let params = SessionParams {
                    session_id,
                    fragment_count,
                    fragment_size,
                    redundancy,
                    target: self.scheduler.settings().current_slot.opposite(),
                };
                self.setup_session(params);
            }
            FuotaEvent::Fragment {
                session_id,
                index,
                is_redundant,
                payload,
            } => self.fragment(session_id, index, is_redundant, payload),
            FuotaEvent::SessionTimeout { session_id } => {
                if self.active_session() == Some(session_id) {
                    self.session_timer.cancel();
                    if let Err(err) = self.decoder.on_session_timeout() {
                        self.report(err.into());
                    }
                }
            }
            FuotaEvent::Tick { now } => return self.tick(now),
        }
        AgentAction::None
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::new(
            &self.scheduler.settings(),
            &self.scheduler.reboot_info().last(),
            self.decoder.progress(),
            self.scheduler.running_version(),
        )
    }

    /// Most recent failure, kept for the diagnostic surface.
    pub fn last_error(&self) -> Option<AgentError> {
        self.last_error
    }

    pub fn scheduler(&mut self) -> &mut UpdateScheduler<'a> {
        &mut self.scheduler
    }

    fn active_session(&self) -> Option<u8> {
        self.decoder.session_params().map(|p| p.session_id)
    }

    fn setup_session(&mut self, params: SessionParams) {
        if self.decoder.session_params() == Some(params) {
            debug!("[fuota] session {} announced again", params.session_id);
            return;
        }
        // Late announcements of a finished session must not wipe its image.
        if self.decoder.completed_session() == Some(params) {
            debug!("[fuota] session {} already complete", params.session_id);
            return;
        }
        // The candidate slot is about to be overwritten.
        if let Err(err) = self.scheduler.cancel_pending_update() {
            self.report(err.into());
        }
        match self.decoder.begin_session(params) {
            Ok(()) => self.arm_session_timer(),
            Err(err) => {
                self.session_timer.cancel();
                self.report(err.into());
            }
        }
    }

    fn fragment(&mut self, session_id: u8, index: u16, is_redundant: bool, payload: &[u8]) {
        if self.active_session() != Some(session_id) {
            debug!("[fuota] fragment for unknown session {}", session_id);
            return;
        }
        match self.decoder.receive_fragment(index, is_redundant, payload) {
            Ok(FragStatus::Accepted) => self.arm_session_timer(),
            Ok(FragStatus::Duplicate) => {}
            Ok(FragStatus::Complete { target, .. }) => {
                self.session_timer.cancel();
                self.image_complete(target);
            }
            Err(err) => {
                if self.decoder.session_params().is_none() {
                    self.session_timer.cancel();
                }
                self.report(err.into());
            }
        }
    }

    fn tick(&mut self, now: Duration) -> AgentAction {
        self.now = core::cmp::max(self.now, now);
        if self.session_timer.poll(self.now) {
            if let Err(err) = self.decoder.on_session_timeout() {
                self.report(err.into());
            }
        }
        match self.scheduler.poll(self.now) {
            SchedulerAction::Reboot => AgentAction::Reboot,
            SchedulerAction::None => AgentAction::None,
        }
    }

    fn image_complete(&mut self, target: UpdateSlot) {
        match self
            .scheduler
            .on_image_complete(self.now, target, &mut self.rng)
        {
            Ok(delay) => info!("[fuota] update staged, reboot in {:?}", delay),
            Err(err) => self.report(err.into()),
        }
    }

    fn arm_session_timer(&mut self) {
        let timeout = self.scheduler.timings().session_timeout;
        self.session_timer.schedule(self.now, timeout);
    }

    fn report(&mut self, err: AgentError) {
        match err {
            AgentError::Decoder(DecoderError::Flash(_)) | AgentError::Scheduler(_) => {
                error!("[fuota] {}", err)
            }
            _ => warn!("[fuota] {}", err),
        }
        self.last_error = Some(err);
    }
}
