//! Append-only audit trail, delivered through an in-process outbox.
//!
//! Mutations queue entries onto an unbounded channel and continue; a
//! writer task drains the channel into the `audit_log` table. The trail is
//! observability output only: nothing in the request path ever reads it or
//! waits for it.

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::db;

/// One audit record describing one mutation.
#[derive(Clone, Debug)]
pub struct Entry {
    pub tenant_id: db::tenant::Id,
    pub user_id: db::user::Id,
    pub action: String,
    pub details: Value,
    pub recorded_at: OffsetDateTime,
}

/// Producer half of the outbox. Recording never blocks and never fails
/// the mutation that produced the entry.
#[derive(Clone)]
pub struct Sink(mpsc::UnboundedSender<Entry>);

impl Sink {
    pub fn record(&self, entry: Entry) {
        if self.0.send(entry).is_err() {
            tracing::warn!("audit outbox closed, entry dropped");
        }
    }
}

pub fn outbox() -> (Sink, mpsc::UnboundedReceiver<Entry>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Sink(tx), rx)
}

/// Drains the outbox into the `audit_log` table, in queue order.
///
/// A failed append is retried once; an entry that still cannot be
/// persisted is dead-lettered into the log in full rather than silently
/// lost.
pub async fn write_entries(
    db: db::Client,
    mut entries: mpsc::UnboundedReceiver<Entry>,
) {
    while let Some(entry) = entries.recv().await {
        if let Err(e) = db.append_audit_entry(&entry).await {
            tracing::warn!("audit append failed, retrying: {e}");
            if let Err(e) = db.append_audit_entry(&entry).await {
                tracing::error!(
                    action = %entry.action,
                    details = %entry.details,
                    "audit entry dead-lettered: {e}",
                );
            }
        }
    }
}
