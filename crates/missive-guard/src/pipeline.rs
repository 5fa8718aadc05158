use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveTime;
use tracing::{debug, warn};
use uuid::Uuid;

use missive_types::models::Role;

use crate::gates::{Gate, HoursGate, RateGate, RoleGate};
use crate::identity::ClientIdentity;
use crate::rate_limit::RateLimiter;
use crate::{GateConfigError, Verdict};

/// Only writes spend rate-limit quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

impl RequestKind {
    pub fn from_method(method: &str) -> Self {
        match method {
            "POST" | "PUT" | "PATCH" | "DELETE" => Self::Write,
            _ => Self::Read,
        }
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

pub struct GateRequest<'a> {
    pub identity: &'a ClientIdentity,
    pub requester: Option<&'a Requester>,
    pub kind: RequestKind,
}

/// Clock readings shared by every gate for one request.
#[derive(Debug, Clone, Copy)]
pub struct GateContext {
    pub now: Instant,
    pub local_time: NaiveTime,
}

impl GateContext {
    pub fn capture() -> Self {
        Self {
            now: Instant::now(),
            local_time: chrono::Local::now().time(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// `None` disables the opening-hours gate.
    pub open_hours: Option<(u32, u32)>,
    pub allowed_roles: Vec<Role>,
    pub max_writes: usize,
    pub window: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            open_hours: Some((18, 21)),
            allowed_roles: vec![Role::Admin, Role::Moderator],
            max_writes: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Gates run in insertion order; the first rejection ends evaluation.
#[derive(Clone, Default)]
pub struct AdmissionPipeline {
    gates: Vec<Arc<dyn Gate>>,
}

impl AdmissionPipeline {
    pub fn new() -> Self {
        Self { gates: Vec::new() }
    }

    pub fn with_gate(mut self, gate: Arc<dyn Gate>) -> Self {
        self.gates.push(gate);
        self
    }

    /// The production order: opening hours, then role, then rate limit, so
    /// requests turned away earlier never spend quota.
    pub fn standard(config: &AdmissionConfig, limiter: RateLimiter) -> Result<Self, GateConfigError> {
        let mut pipeline = Self::new();

        if let Some((open, close)) = config.open_hours {
            pipeline = pipeline.with_gate(Arc::new(HoursGate::new(open, close)?));
        }

        Ok(pipeline
            .with_gate(Arc::new(RoleGate::new(config.allowed_roles.iter().copied())))
            .with_gate(Arc::new(RateGate::new(limiter))))
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|gate| gate.name()).collect()
    }

    pub fn evaluate(&self, req: &GateRequest<'_>, ctx: &GateContext) -> Verdict {
        for gate in &self.gates {
            if let Verdict::Reject(rejection) = gate.check(req, ctx) {
                warn!(
                    gate = gate.name(),
                    client = %req.identity,
                    user = req.requester.map(|r| r.username.as_str()).unwrap_or("Anonymous"),
                    reason = %rejection,
                    "request rejected"
                );
                return Verdict::Reject(rejection);
            }
        }

        debug!(client = %req.identity, kind = ?req.kind, "request admitted");
        Verdict::Admit
    }
}
