use std::error::Error as StdError;

use derive_more::Display;
use enum_utils::TryFromRepr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio_postgres::types::{
    accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql, Type,
};
use uuid::Uuid;

use super::{
    customer,
    note::{self, NewNote},
    part, user, Error, Scoped,
};

#[derive(Clone, Debug)]
pub struct Ticket {
    pub id: Id,
    pub subject: String,
    pub status: Status,
    pub customer_id: customer::Id,
    pub assigned_to_id: Option<user::Id>,
    pub cancellation_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, PartialEq,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<u128> for Id {
    fn from(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl FromSql<'_> for Id {
    accepts!(UUID);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Uuid::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for Id {
    accepts!(UUID);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, TryFromRepr, PartialEq, Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Accepted at intake, nobody works on it yet.
    Open = 1,

    /// A technician is actively working on it.
    InProgress = 2,

    /// Work is suspended until ordered parts arrive. Still counts against
    /// the assignee's workload.
    WaitingForParts = 3,

    /// Repair finished, device not yet handed back.
    Resolved = 4,

    /// Handed back to the customer.
    Closed = 5,

    /// Abandoned; consumed parts have been returned to stock.
    Cancelled = 6,
}

impl FromSql<'_> for Status {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let status = Self::try_from(repr).map_err(|_| "invalid status")?;
        Ok(status)
    }
}

impl ToSql for Status {
    accepts!(INT2);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from((*self) as u8);
        repr.to_sql(ty, out)
    }
}

#[derive(Clone, Debug)]
pub struct NewTicket {
    pub subject: String,
    pub customer_id: customer::Id,
}

/// Outcome of a transactional attempt to claim an unassigned ticket.
#[derive(Clone, Debug)]
pub enum Claim {
    /// The claim committed; the ticket now belongs to the assignee.
    Won(Ticket),

    /// The in-transaction re-check found the ticket already assigned:
    /// a concurrent claimant committed first.
    Lost,
}

/// Stock returned to inventory by a cancellation.
#[derive(Clone, Copy, Debug)]
pub struct RestoredPart {
    pub part_id: part::Id,
    pub quantity: usize,
}

fn from_row(row: &tokio_postgres::Row) -> Ticket {
    Ticket {
        id: row.get("id"),
        subject: row.get("subject"),
        status: row.get("status"),
        customer_id: row.get("customer_id"),
        assigned_to_id: row.get("assigned_to_id"),
        cancellation_reason: row.get("cancellation_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Scoped<'_> {
    pub async fn get_ticket(&self, id: Id) -> Result<Option<Ticket>, Error> {
        const SQL: &str = "\
            SELECT id, subject, status, customer_id, assigned_to_id, \
                   cancellation_reason, created_at, updated_at \
            FROM tickets \
            WHERE id = $1 AND tenant_id = $2 \
            LIMIT 1";
        Ok(self
            .conn()
            .await?
            .query_opt(SQL, &[&id, &self.scope().tenant_id])
            .await?
            .map(|row| from_row(&row)))
    }

    pub async fn get_tickets_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Ticket>, Error> {
        let offset = i64::try_from(offset).unwrap();
        let limit = i64::try_from(limit).unwrap();

        const SQL: &str = "\
            SELECT id, subject, status, customer_id, assigned_to_id, \
                   cancellation_reason, created_at, updated_at \
            FROM tickets \
            WHERE tenant_id = $1 \
            ORDER BY created_at DESC, \
                     id DESC \
            OFFSET $2 LIMIT $3";
        Ok(self
            .conn()
            .await?
            .query(SQL, &[&self.scope().tenant_id, &offset, &limit])
            .await?
            .iter()
            .map(from_row)
            .collect())
    }

    pub async fn get_tickets_count(&self) -> Result<usize, Error> {
        const SQL: &str =
            "SELECT COUNT(*) FROM tickets WHERE tenant_id = $1";
        Ok(self
            .conn()
            .await?
            .query_one(SQL, &[&self.scope().tenant_id])
            .await?
            .get::<_, i64>(0)
            .try_into()
            .unwrap())
    }

    /// Tickets the technician is actively carrying. Resolved, closed and
    /// cancelled tickets do not count.
    pub async fn count_active_tickets(
        &self,
        technician: user::Id,
    ) -> Result<usize, Error> {
        const SQL: &str = "\
            SELECT COUNT(*) \
            FROM tickets \
            WHERE tenant_id = $1 \
              AND assigned_to_id = $2 \
              AND status IN ($3, $4, $5)";
        Ok(self
            .conn()
            .await?
            .query_one(
                SQL,
                &[
                    &self.scope().tenant_id,
                    &technician,
                    &Status::Open,
                    &Status::InProgress,
                    &Status::WaitingForParts,
                ],
            )
            .await?
            .get::<_, i64>(0)
            .try_into()
            .unwrap())
    }

    pub async fn insert_ticket(
        &self,
        new: NewTicket,
    ) -> Result<Ticket, Error> {
        const SQL: &str = "\
            INSERT INTO tickets (id, tenant_id, subject, status, \
                                 customer_id, created_by_id, created_at, \
                                 updated_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)";

        let now = OffsetDateTime::now_utc();
        let ticket = Ticket {
            id: Id::new(),
            subject: new.subject,
            status: Status::Open,
            customer_id: new.customer_id,
            assigned_to_id: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.conn()
            .await?
            .execute(
                SQL,
                &[
                    &ticket.id,
                    &self.scope().tenant_id,
                    &ticket.subject,
                    &ticket.status,
                    &ticket.customer_id,
                    &self.scope().actor_id,
                    &now,
                ],
            )
            .await?;

        self.audit(
            "CREATE_TICKET",
            json!({
                "ticketId": ticket.id,
                "customerId": ticket.customer_id,
                "subject": ticket.subject,
            }),
        );

        Ok(ticket)
    }

    /// Assigns an unassigned ticket under a row lock.
    ///
    /// The assignment is only written after re-reading `assigned_to_id`
    /// with the row locked: a pre-flight check outside the transaction is
    /// not enough, since two claimants may both have observed the ticket
    /// unassigned. Exactly one of two concurrent claims commits; the other
    /// gets [`Claim::Lost`].
    pub async fn claim_ticket(
        &self,
        id: Id,
        assignee: user::Id,
    ) -> Result<Claim, Error> {
        const LOCK_SQL: &str = "\
            SELECT assigned_to_id \
            FROM tickets \
            WHERE id = $1 AND tenant_id = $2 \
            FOR UPDATE";
        const CLAIM_SQL: &str = "\
            UPDATE tickets \
            SET assigned_to_id = $3, \
                status = $4, \
                updated_by_id = $5, \
                updated_at = $6 \
            WHERE id = $1 AND tenant_id = $2 \
            RETURNING id, subject, status, customer_id, assigned_to_id, \
                      cancellation_reason, created_at, updated_at";

        let scope = self.scope();

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let row = tx
            .query_opt(LOCK_SQL, &[&id, &scope.tenant_id])
            .await?
            .ok_or(Error::NotFound)?;
        if row.get::<_, Option<user::Id>>("assigned_to_id").is_some() {
            return Ok(Claim::Lost);
        }

        let row = tx
            .query_one(
                CLAIM_SQL,
                &[
                    &id,
                    &scope.tenant_id,
                    &assignee,
                    &Status::InProgress,
                    &scope.actor_id,
                    &OffsetDateTime::now_utc(),
                ],
            )
            .await?;
        tx.commit().await?;

        Ok(Claim::Won(from_row(&row)))
    }

    /// Moves the ticket to `status` and, if given, appends a note, as one
    /// transaction.
    pub async fn update_ticket_status(
        &self,
        id: Id,
        status: Status,
        note: Option<NewNote<'_>>,
    ) -> Result<Ticket, Error> {
        const SQL: &str = "\
            UPDATE tickets \
            SET status = $3, \
                updated_by_id = $4, \
                updated_at = $5 \
            WHERE id = $1 AND tenant_id = $2 \
            RETURNING id, subject, status, customer_id, assigned_to_id, \
                      cancellation_reason, created_at, updated_at";

        let scope = self.scope();

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let ticket = tx
            .query_opt(
                SQL,
                &[
                    &id,
                    &scope.tenant_id,
                    &status,
                    &scope.actor_id,
                    &OffsetDateTime::now_utc(),
                ],
            )
            .await?
            .map(|row| from_row(&row))
            .ok_or(Error::NotFound)?;
        if let Some(note) = note {
            note::insert_in_tx(&tx, scope, id, note).await?;
        }
        tx.commit().await?;

        Ok(ticket)
    }

    /// Puts a cancelled ticket back in progress, clearing the recorded
    /// cancellation reason.
    pub async fn reopen_ticket(
        &self,
        id: Id,
        note: Option<NewNote<'_>>,
    ) -> Result<Ticket, Error> {
        const SQL: &str = "\
            UPDATE tickets \
            SET status = $3, \
                cancellation_reason = NULL, \
                updated_by_id = $4, \
                updated_at = $5 \
            WHERE id = $1 AND tenant_id = $2 \
            RETURNING id, subject, status, customer_id, assigned_to_id, \
                      cancellation_reason, created_at, updated_at";

        let scope = self.scope();

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let ticket = tx
            .query_opt(
                SQL,
                &[
                    &id,
                    &scope.tenant_id,
                    &Status::InProgress,
                    &scope.actor_id,
                    &OffsetDateTime::now_utc(),
                ],
            )
            .await?
            .map(|row| from_row(&row))
            .ok_or(Error::NotFound)?;
        if let Some(note) = note {
            note::insert_in_tx(&tx, scope, id, note).await?;
        }
        tx.commit().await?;

        Ok(ticket)
    }

    /// Cancels the ticket and returns its consumed parts to stock, as one
    /// atomic unit: a transaction abort leaves neither a cancelled ticket
    /// with unrestored stock nor restored stock on a live ticket.
    ///
    /// Only usage rows not yet reversed are restored, and restoring marks
    /// them reversed, so a cancel → reopen → cancel cycle cannot return
    /// the same parts to stock twice.
    pub async fn cancel_ticket(
        &self,
        id: Id,
        reason: &str,
    ) -> Result<(Ticket, Vec<RestoredPart>), Error> {
        const CANCEL_SQL: &str = "\
            UPDATE tickets \
            SET status = $3, \
                cancellation_reason = $4, \
                updated_by_id = $5, \
                updated_at = $6 \
            WHERE id = $1 AND tenant_id = $2 \
            RETURNING id, subject, status, customer_id, assigned_to_id, \
                      cancellation_reason, created_at, updated_at";
        const REVERSE_SQL: &str = "\
            UPDATE part_usages \
            SET reversed_at = $3 \
            WHERE ticket_id = $1 AND tenant_id = $2 \
              AND reversed_at IS NULL \
            RETURNING part_id, quantity";
        const RESTORE_SQL: &str = "\
            UPDATE parts \
            SET quantity = quantity + $3, \
                updated_by_id = $4, \
                updated_at = $5 \
            WHERE id = $1 AND tenant_id = $2";

        let scope = self.scope();
        let now = OffsetDateTime::now_utc();

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let ticket = tx
            .query_opt(
                CANCEL_SQL,
                &[
                    &id,
                    &scope.tenant_id,
                    &Status::Cancelled,
                    &reason,
                    &scope.actor_id,
                    &now,
                ],
            )
            .await?
            .map(|row| from_row(&row))
            .ok_or(Error::NotFound)?;

        // The RETURNING set is exactly what gets restored: reversing and
        // summing in one statement keeps the ledger and the counters in
        // step even if another usage row lands mid-flight.
        let mut restored = Vec::<RestoredPart>::new();
        for row in tx.query(REVERSE_SQL, &[&id, &scope.tenant_id, &now]).await?
        {
            let part_id = row.get("part_id");
            let quantity =
                usize::try_from(row.get::<_, i32>("quantity")).unwrap();
            match restored.iter_mut().find(|p| p.part_id == part_id) {
                Some(part) => part.quantity += quantity,
                None => restored.push(RestoredPart { part_id, quantity }),
            }
        }
        for part in &restored {
            let updated = tx
                .execute(
                    RESTORE_SQL,
                    &[
                        &part.part_id,
                        &scope.tenant_id,
                        &i32::try_from(part.quantity).unwrap(),
                        &scope.actor_id,
                        &now,
                    ],
                )
                .await?;
            if updated == 0 {
                return Err(Error::NotFound);
            }
        }
        tx.commit().await?;

        Ok((ticket, restored))
    }
}
