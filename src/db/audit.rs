use uuid::Uuid;

use crate::audit::Entry;

use super::{Client, Error};

impl Client {
    /// Direct insert used by the outbox writer.
    ///
    /// Appending is the one mutation that must not itself queue an audit
    /// entry, or the trail would feed on its own writes.
    pub async fn append_audit_entry(
        &self,
        entry: &Entry,
    ) -> Result<(), Error> {
        const SQL: &str = "\
            INSERT INTO audit_log (id, tenant_id, user_id, action, \
                                   details, recorded_at) \
            VALUES ($1, $2, $3, $4, $5, $6)";
        self.conn()
            .await?
            .execute(
                SQL,
                &[
                    &Uuid::new_v4(),
                    &entry.tenant_id,
                    &entry.user_id,
                    &entry.action,
                    &entry.details,
                    &entry.recorded_at,
                ],
            )
            .await?;
        Ok(())
    }
}
