//! Session lifecycle and audit trail for the competency portal.
//!
//! Three cooperating services over a shared relational store:
//!
//! - [`session_manager::SessionManager`] — create/validate/extend/invalidate
//!   sessions, per-user concurrency cap, login anomaly policy.
//! - [`cleanup::CleanupScheduler`] — periodic conditional bulk expiry sweep
//!   with an explicit start/stop lifecycle.
//! - [`audit::AuditLogger`] — write-once audit trail with field redaction,
//!   activity-feed projection, and permission-denial escalation.
//!
//! Concurrent transitions are resolved in storage: every state change is a
//! conditional UPDATE whose guard restates the expected current state, so
//! racing writers get exactly one winner and no read-modify-write windows.
//! Session bookkeeping fails open — storage errors are logged and turned
//! into sentinel returns, never surfaced to the caller's request path.

pub mod anomaly;
pub mod audit;
pub mod cleanup;
pub mod config;
pub mod device;
pub mod errors;
pub mod geo;
pub mod models;
pub mod session_manager;
pub mod store;
pub mod token;

pub use audit::{AuditLogger, AuditReport, RequestCapture, ResponseCapture};
pub use cleanup::CleanupScheduler;
pub use config::{AuditConfig, CleanupConfig, SessionConfig};
pub use errors::{StoreError, StoreResult};
pub use session_manager::{CreatedSession, SessionManager};
pub use store::{AuditStore, MemoryStore, NotificationSink, SessionStore, SqlStore};
