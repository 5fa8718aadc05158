use chrono::Timelike;

use missive_types::models::Role;

use crate::pipeline::{GateContext, GateRequest, RequestKind};
use crate::rate_limit::RateLimiter;
use crate::{GateConfigError, Rejection, Verdict};

/// A pass/fail predicate over one request.
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, req: &GateRequest<'_>, ctx: &GateContext) -> Verdict;
}

/// Admits only while the local hour is inside `[open, close)`.
/// `open > close` wraps past midnight; `open == close` never admits.
#[derive(Debug, Clone, Copy)]
pub struct HoursGate {
    open: u32,
    close: u32,
}

impl HoursGate {
    pub fn new(open: u32, close: u32) -> Result<Self, GateConfigError> {
        if open > 23 || close > 24 {
            return Err(GateConfigError::InvalidHours { open, close });
        }
        Ok(Self { open, close })
    }

    pub fn allows_hour(&self, hour: u32) -> bool {
        if self.open <= self.close {
            self.open <= hour && hour < self.close
        } else {
            hour >= self.open || hour < self.close
        }
    }
}

impl Gate for HoursGate {
    fn name(&self) -> &'static str {
        "hours"
    }

    fn check(&self, _req: &GateRequest<'_>, ctx: &GateContext) -> Verdict {
        if self.allows_hour(ctx.local_time.hour()) {
            Verdict::Admit
        } else {
            Verdict::Reject(Rejection::OutsideAllowedHours {
                open: self.open,
                close: self.close,
            })
        }
    }
}

/// Requires an authenticated requester holding one of the allowed roles.
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Vec<Role>,
}

impl RoleGate {
    pub fn new(allowed: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl Gate for RoleGate {
    fn name(&self) -> &'static str {
        "role"
    }

    fn check(&self, req: &GateRequest<'_>, _ctx: &GateContext) -> Verdict {
        match req.requester {
            None => Verdict::Reject(Rejection::Unauthorized),
            Some(requester) if self.allowed.contains(&requester.role) => Verdict::Admit,
            Some(_) => Verdict::Reject(Rejection::Forbidden),
        }
    }
}

/// Spends rate-limit quota on writes. Reads pass without touching the limiter.
#[derive(Clone)]
pub struct RateGate {
    limiter: RateLimiter,
}

impl RateGate {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl Gate for RateGate {
    fn name(&self) -> &'static str {
        "rate"
    }

    fn check(&self, req: &GateRequest<'_>, ctx: &GateContext) -> Verdict {
        match req.kind {
            RequestKind::Read => Verdict::Admit,
            RequestKind::Write => self.limiter.check_and_record(req.identity, ctx.now),
        }
    }
}
