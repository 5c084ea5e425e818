//! # skillbox-approval
//!
//! The `proposed → validated → approved` lifecycle of user-proposed skills and
//! the append-only audit log recording every step of it.

pub mod audit;
pub mod workflow;

pub use audit::{AuditEntry, AuditEvent, AuditLog};
pub use workflow::{ApprovalWorkflow, Proposal};
