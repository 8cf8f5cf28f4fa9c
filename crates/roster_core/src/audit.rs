//! Auditing interceptor.
//!
//! # Responsibility
//! - Stamp creation and modification time/actor on lifecycle transitions.
//! - Consume actor identity and time from injected capabilities.
//!
//! # Invariants
//! - `on_create` sets created and updated stamps to the same instant.
//! - `on_update` never touches created stamps.
//! - Stamping is only invoked for rows that are actually written.

use crate::model::audit::{ActorId, AuditFields};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Supplies the actor of the current unit of work.
pub trait AuditorAware {
    fn current_auditor(&self) -> Option<ActorId>;
}

impl<F> AuditorAware for F
where
    F: Fn() -> Option<ActorId>,
{
    fn current_auditor(&self) -> Option<ActorId> {
        self()
    }
}

/// Supplies wall-clock time in epoch milliseconds.
pub trait Clock {
    fn now_millis(&self) -> i64;
}

/// `Clock` backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
            })
    }
}

/// Always reports the same actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedAuditor(pub ActorId);

impl AuditorAware for FixedAuditor {
    fn current_auditor(&self) -> Option<ActorId> {
        Some(self.0.clone())
    }
}

/// Reports a fresh random id on every call.
///
/// Placeholder for applications that have not wired a real principal yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidAuditor;

impl AuditorAware for UuidAuditor {
    fn current_auditor(&self) -> Option<ActorId> {
        Some(Uuid::new_v4().to_string())
    }
}

/// Stamping policy applied by the persistence context during writes.
pub struct Auditing {
    auditor: Option<Box<dyn AuditorAware>>,
    clock: Box<dyn Clock>,
}

impl Default for Auditing {
    fn default() -> Self {
        Self {
            auditor: None,
            clock: Box::new(SystemClock),
        }
    }
}

impl Auditing {
    /// Time-only auditing: actor columns stay empty.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auditor(mut self, auditor: impl AuditorAware + 'static) -> Self {
        self.auditor = Some(Box::new(auditor));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub(crate) fn on_create(&self, fields: &mut AuditFields) {
        let now = self.clock.now_millis();
        let actor = self.current_auditor();
        fields.created_at = Some(now);
        fields.updated_at = Some(now);
        fields.created_by = actor.clone();
        fields.updated_by = actor;
    }

    pub(crate) fn on_update(&self, fields: &mut AuditFields) {
        fields.updated_at = Some(self.clock.now_millis());
        fields.updated_by = self.current_auditor();
    }

    fn current_auditor(&self) -> Option<ActorId> {
        self.auditor
            .as_ref()
            .and_then(|auditor| auditor.current_auditor())
    }
}
