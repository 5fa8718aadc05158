//! Admission control for Missive's gated routes.
//!
//! Every gated request is run through an [`AdmissionPipeline`]: a fixed
//! sequence of [`Gate`]s (opening hours, role, rate limit) that each either
//! admit the request or reject it with a [`Rejection`]. The first rejection
//! wins and later gates never see the request.
//!
//! The rate limiter is in-memory and per-process. It is not shared between
//! server instances and starts empty after a restart.

pub mod gates;
pub mod identity;
pub mod pipeline;
pub mod rate_limit;

pub use gates::{Gate, HoursGate, RateGate, RoleGate};
pub use identity::ClientIdentity;
pub use pipeline::{AdmissionConfig, AdmissionPipeline, GateContext, GateRequest, RequestKind, Requester};
pub use rate_limit::RateLimiter;

/// Why a gate turned a request away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("rate limit exceeded, max {max} per {}", describe_window(.window_secs))]
    RateLimited { max: usize, window_secs: u64 },

    #[error("restricted to {open:02}:00–{close:02}:00")]
    OutsideAllowedHours { open: u32, close: u32 },

    #[error("login required")]
    Unauthorized,

    #[error("insufficient permissions")]
    Forbidden,
}

fn describe_window(secs: &u64) -> String {
    match *secs {
        60 => "minute".to_string(),
        3600 => "hour".to_string(),
        1 => "second".to_string(),
        n => format!("{n} seconds"),
    }
}

/// Outcome of a single gate, or of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_admit(&self) -> bool {
        matches!(self, Self::Admit)
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Self::Admit => Ok(()),
            Self::Reject(rejection) => Err(rejection),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateConfigError {
    #[error("opening hours must lie within 0..=24, got {open}..{close}")]
    InvalidHours { open: u32, close: u32 },

    #[error("rate limit needs a non-zero request budget and window")]
    InvalidRateLimit,
}
