// Licensed under the Apache-2.0 license

//! Reassembles an image from lossy, out-of-order fragments straight into
//! flash.
//!
//! Data fragment `i` is written to the target slot at `i * fragment_size`
//! and parity fragment `j` to the scratch partition at `j * fragment_size`.
//! RAM holds only the session parameters and the received bitmap. Any
//! `fragment_count` fragments determine the image, so the session completes
//! as soon as that many have arrived, in whatever order. The missing data
//! fragments are then solved for one bounded byte window at a time, reading
//! every operand back from flash.

use alloc::vec;
use alloc::vec::Vec;

use fuota_config::boot::UpdateSlot;
use fuota_storage::{FlashDrvError, FlashMap};
use log::{debug, info, warn};

use crate::bitmap::{FragmentBitmap, MAX_DATA_FRAGMENTS, MAX_REDUNDANCY};
use crate::fec::{self, CauchyInverse};
use crate::session;

/// Default RAM budget for the right-hand sides of one decoding window.
pub const DEFAULT_WINDOW_BUDGET: usize = 16 * 1024;

/// Geometry of a fragmentation session, as announced by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub session_id: u8,
    /// Number of data fragments `N`.
    pub fragment_count: u16,
    /// Bytes per fragment, a whole number of code symbols.
    pub fragment_size: u16,
    /// Number of parity fragments `R` the sender will append.
    pub redundancy: u16,
    pub target: UpdateSlot,
}

impl SessionParams {
    pub fn image_len(&self) -> usize {
        self.fragment_count as usize * self.fragment_size as usize
    }

    fn positions(&self) -> usize {
        self.fragment_count as usize + self.redundancy as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragStatus {
    /// Stored; the image is not complete yet.
    Accepted,
    /// Already received, ignored.
    Duplicate,
    /// Every data fragment is on flash. The session is closed.
    Complete {
        target: UpdateSlot,
        /// Data fragments recovered from parity.
        reconstructed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecoderError {
    #[error("no fragmentation session in progress")]
    NoSession,
    #[error("session parameters do not fit the device")]
    InvalidParams,
    #[error("fragment index {0} out of range")]
    IndexOutOfRange(u16),
    #[error("fragment of {0} bytes does not match the session")]
    BadFragmentSize(usize),
    #[error("not enough fragments to rebuild the image")]
    InsufficientFragments,
    #[error("session expired")]
    Expired,
    #[error("flash access failed: {0}")]
    Flash(#[from] FlashDrvError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub session_id: u8,
    pub data_received: usize,
    pub parity_received: usize,
    pub fragment_count: usize,
    pub redundancy: usize,
}

impl SessionProgress {
    pub fn received(&self) -> usize {
        self.data_received + self.parity_received
    }
}

struct ActiveSession {
    params: SessionParams,
    received: FragmentBitmap,
}

impl ActiveSession {
    fn data_received(&self) -> usize {
        self.received
            .count_range(0, self.params.fragment_count as usize)
    }

    fn parity_received(&self) -> usize {
        self.received.count() - self.data_received()
    }
}

pub struct FragmentDecoder<'a> {
    flash: &'a FlashMap<'a>,
    session: Option<ActiveSession>,
    completed: Option<SessionParams>,
    window_budget: usize,
}

impl<'a> FragmentDecoder<'a> {
    pub fn new(flash: &'a FlashMap<'a>) -> Self {
        FragmentDecoder {
            flash,
            session: None,
            completed: None,
            window_budget: DEFAULT_WINDOW_BUDGET,
        }
    }

    /// Overrides the RAM budget of the reconstruction pass.
    pub fn with_window_budget(mut self, budget: usize) -> Self {
        self.window_budget = core::cmp::max(budget, 1);
        self
    }

    pub fn session_params(&self) -> Option<SessionParams> {
        self.session.as_ref().map(|s| s.params)
    }

    /// Parameters of the last session this decoder completed, until the
    /// next session begins.
    pub fn completed_session(&self) -> Option<SessionParams> {
        self.completed
    }

    pub fn progress(&self) -> Option<SessionProgress> {
        self.session.as_ref().map(|s| SessionProgress {
            session_id: s.params.session_id,
            data_received: s.data_received(),
            parity_received: s.parity_received(),
            fragment_count: s.params.fragment_count as usize,
            redundancy: s.params.redundancy as usize,
        })
    }

    fn check_params(&self, params: &SessionParams) -> Result<(), DecoderError> {
        let n = params.fragment_count as usize;
        let r = params.redundancy as usize;
        let size = params.fragment_size as usize;
        let fits = n > 0
            && size > 0
            && size % fec::SYMBOL_SIZE == 0
            && n <= MAX_DATA_FRAGMENTS
            && r <= MAX_REDUNDANCY
            && params.image_len() <= self.flash.slot(params.target).len()
            && r * size <= self.flash.frag_scratch.len()
            && session::JOURNAL_OFFSET + session::journal_len(params.positions())
                <= self.flash.frag_session.len();
        if fits {
            Ok(())
        } else {
            Err(DecoderError::InvalidParams)
        }
    }

    /// Opens a new session, replacing any session in progress. Prepares the
    /// target slot and the parity scratch area.
    pub fn begin_session(&mut self, params: SessionParams) -> Result<(), DecoderError> {
        self.check_params(&params)?;
        if let Some(previous) = self.session.take() {
            warn!(
                "[frag] session {} replaced by session {}",
                previous.params.session_id, params.session_id
            );
        }
        let size = params.fragment_size as usize;
        self.flash.slot(params.target).erase_prefix(params.image_len())?;
        self.flash
            .frag_scratch
            .erase_prefix(params.redundancy as usize * size)?;
        session::create(&self.flash.frag_session, &params)?;

        info!(
            "[frag] session {}: {} x {} bytes + {} parity into {:?}",
            params.session_id, params.fragment_count, size, params.redundancy, params.target
        );
        self.completed = None;
        self.session = Some(ActiveSession {
            params,
            received: FragmentBitmap::new(params.positions()),
        });
        Ok(())
    }

    /// Picks up a session persisted by a previous run.
    ///
    /// Returns `None` when there was none. A session that already holds
    /// enough fragments is completed right away.
    pub fn resume(&mut self) -> Result<Option<FragStatus>, DecoderError> {
        let Some((params, received)) = session::load(&self.flash.frag_session)? else {
            return Ok(None);
        };
        if self.check_params(&params).is_err() {
            warn!("[frag] dropping stored session {}", params.session_id);
            session::discard(&self.flash.frag_session)?;
            return Ok(None);
        }
        info!(
            "[frag] resuming session {} with {} of {} fragments",
            params.session_id,
            received.count(),
            params.fragment_count
        );
        self.session = Some(ActiveSession { params, received });
        self.try_complete().map(Some)
    }

    pub fn receive_fragment(
        &mut self,
        index: u16,
        is_redundant: bool,
        payload: &[u8],
    ) -> Result<FragStatus, DecoderError> {
        let session = self.session.as_mut().ok_or(DecoderError::NoSession)?;
        let params = session.params;
        let size = params.fragment_size as usize;
        if payload.len() != size {
            return Err(DecoderError::BadFragmentSize(payload.len()));
        }

        let position = if is_redundant {
            if index >= params.redundancy {
                return Err(DecoderError::IndexOutOfRange(index));
            }
            params.fragment_count as usize + index as usize
        } else {
            if index >= params.fragment_count {
                return Err(DecoderError::IndexOutOfRange(index));
            }
            index as usize
        };
        if session.received.get(position) {
            return Ok(FragStatus::Duplicate);
        }

        let offset = index as usize * size;
        if is_redundant {
            self.flash.frag_scratch.write(offset, payload)?;
        } else {
            self.flash.slot(params.target).write(offset, payload)?;
        }
        session::mark_received(&self.flash.frag_session, position)?;
        session.received.set(position);

        self.try_complete()
    }

    /// Ends the session after its inactivity timeout.
    ///
    /// An open session is never complete, so ending one is a failure:
    /// `InsufficientFragments` when fragments arrived but too few to rebuild
    /// the image, `Expired` when nothing arrived at all.
    pub fn on_session_timeout(&mut self) -> Result<(), DecoderError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let received = session.received.count();
        warn!(
            "[frag] session {} ended with {} of {} needed fragments",
            session.params.session_id, received, session.params.fragment_count
        );
        session::discard(&self.flash.frag_session)?;
        if received == 0 {
            Err(DecoderError::Expired)
        } else {
            Err(DecoderError::InsufficientFragments)
        }
    }

    fn try_complete(&mut self) -> Result<FragStatus, DecoderError> {
        let Some(session) = self.session.as_ref() else {
            return Err(DecoderError::NoSession);
        };
        let n = session.params.fragment_count as usize;
        if session.received.count() < n {
            return Ok(FragStatus::Accepted);
        }

        let missing = n - session.data_received();
        if missing > 0 {
            self.reconstruct(session)?;
        }
        let params = session.params;
        info!(
            "[frag] session {} complete, {} fragments rebuilt",
            params.session_id, missing
        );
        self.close()?;
        self.completed = Some(params);
        Ok(FragStatus::Complete {
            target: params.target,
            reconstructed: missing,
        })
    }

    fn close(&mut self) -> Result<(), DecoderError> {
        self.session = None;
        session::discard(&self.flash.frag_session)?;
        Ok(())
    }

    /// Solves for the missing data fragments and writes them to the target
    /// slot. The caller guarantees that at least as many parity fragments as
    /// missing data fragments are on flash.
    fn reconstruct(&self, session: &ActiveSession) -> Result<(), DecoderError> {
        let params = &session.params;
        let n = params.fragment_count as usize;
        let size = params.fragment_size as usize;
        let missing: Vec<usize> = session.received.missing(0, n).collect();
        let m = missing.len();
        let rows: Vec<usize> = session
            .received
            .present(n, params.positions())
            .map(|p| p - n)
            .take(m)
            .collect();
        if rows.len() < m {
            return Err(DecoderError::InsufficientFragments);
        }
        debug!("[frag] rebuilding {} data fragments", m);

        let xs: Vec<u16> = rows.iter().map(|&r| fec::parity_point(n, r)).collect();
        let inverse = CauchyInverse::new(
            xs.clone(),
            missing.iter().map(|&c| fec::data_point(c)).collect(),
        );
        let mut weights = vec![0u16; m];
        let mut prefix = vec![0u16; m];

        let slot = self.flash.slot(params.target);
        let scratch = &self.flash.frag_scratch;
        let window = core::cmp::max(
            fec::SYMBOL_SIZE,
            core::cmp::min(size, self.window_budget / m) / fec::SYMBOL_SIZE * fec::SYMBOL_SIZE,
        );
        let mut rhs = vec![0u8; m * window];
        let mut chunk = vec![0u8; window];
        let mut start = 0;
        while start < size {
            let len = core::cmp::min(window, size - start);

            // Right-hand side: parity payload with every received data
            // fragment folded out.
            for (a, &row) in rows.iter().enumerate() {
                scratch.read(row * size + start, &mut rhs[a * window..a * window + len])?;
            }
            for column in session.received.present(0, n) {
                slot.read(column * size + start, &mut chunk[..len])?;
                let y = fec::data_point(column);
                for (w, &x) in weights.iter_mut().zip(&xs) {
                    *w = x ^ y;
                }
                fec::batch_inv(&mut weights, &mut prefix);
                for (a, &w) in weights.iter().enumerate() {
                    fec::mul_acc(&mut rhs[a * window..a * window + len], &chunk[..len], w);
                }
            }

            let sides: Vec<&[u8]> = (0..m).map(|a| &rhs[a * window..a * window + len]).collect();
            for (b, &column) in missing.iter().enumerate() {
                inverse.solve_into(b, &sides, &mut chunk[..len]);
                slot.write(column * size + start, &chunk[..len])?;
            }
            start += len;
        }
        Ok(())
    }
}
