//! Audit stamps carried by audited entities.
//!
//! # Invariants
//! - `created_at`/`created_by` are set once, on first persist.
//! - `updated_at` moves only when a flush writes a changed row.

use serde::{Deserialize, Serialize};

/// Identity of the actor performing a unit of work.
pub type ActorId = String;

/// Creation/modification timestamps (epoch milliseconds) and actors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    pub(crate) created_at: Option<i64>,
    pub(crate) updated_at: Option<i64>,
    pub(crate) created_by: Option<ActorId>,
    pub(crate) updated_by: Option<ActorId>,
}

impl AuditFields {
    pub fn created_at(&self) -> Option<i64> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<i64> {
        self.updated_at
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn updated_by(&self) -> Option<&str> {
        self.updated_by.as_deref()
    }
}
