//! Append-only JSON-lines audit log for the PlayNite rule gate.
//!
//! Every rule evaluation the middleware performs, plus service lifecycle
//! events, can be recorded as one JSON object per line. Producers hold a
//! cheap [`AuditSink`] handle; a background task owns the file.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) = AuditSink::start("/var/log/playnite/audit.jsonl").await?;
//!
//! sink.record(AuditEntry::new(
//!     AuditEventType::ServiceStarted,
//!     AuditSource::new("playnite-gate"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ));
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{AuditEntry, AuditEventType, AuditSource, EvaluationRecord};
pub use sink::AuditSink;
pub use writer::{AuditWriteError, AuditWriter};
