// Licensed under the Apache-2.0 license

//! Application-side firmware update: fragment reassembly with forward error
//! correction, update scheduling and the acknowledgment window.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod bitmap;
pub mod events;
pub mod fec;
pub mod frag_decoder;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod timer;

pub use events::{AgentAction, AgentError, FuotaAgent, FuotaEvent};
pub use frag_decoder::{DecoderError, FragStatus, FragmentDecoder, SessionParams, SessionProgress};
pub use scheduler::{SchedulerAction, SchedulerError, UpdateScheduler};
pub use status::{StatusReport, STATUS_REPORT_SIZE};
pub use timer::OneShotTimer;
