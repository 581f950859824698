use std::error::Error as StdError;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Transaction,
};
use uuid::Uuid;

use super::{ticket, user, Error, Scope, Scoped};

/// Append-only, author-attributed note on a ticket. Internal notes are for
/// staff eyes; non-internal ones may be shown to the customer.
#[derive(Clone, Debug)]
pub struct TicketNote {
    pub id: Id,
    pub ticket_id: ticket::Id,
    pub author_id: user::Id,
    pub content: String,
    pub is_internal: bool,
    pub created_at: OffsetDateTime,
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

/// Note content to append alongside a ticket transition, inside the
/// transition's own transaction.
#[derive(Clone, Copy, Debug)]
pub struct NewNote<'a> {
    pub author: user::Id,
    pub content: &'a str,
    pub is_internal: bool,
}

pub(super) async fn insert_in_tx(
    tx: &Transaction<'_>,
    scope: Scope,
    ticket_id: ticket::Id,
    note: NewNote<'_>,
) -> Result<(), tokio_postgres::Error> {
    const SQL: &str = "\
        INSERT INTO ticket_notes (id, tenant_id, ticket_id, author_id, \
                                  content, is_internal, created_at) \
        VALUES ($1, $2, $3, $4, $5, $6, $7)";
    tx.execute(
        SQL,
        &[
            &Id::new(),
            &scope.tenant_id,
            &ticket_id,
            &note.author,
            &note.content,
            &note.is_internal,
            &OffsetDateTime::now_utc(),
        ],
    )
    .await
    .map(drop)
}

impl Scoped<'_> {
    pub async fn get_ticket_notes(
        &self,
        ticket_id: ticket::Id,
    ) -> Result<Vec<TicketNote>, Error> {
        const SQL: &str = "\
            SELECT id, ticket_id, author_id, content, is_internal, \
                   created_at \
            FROM ticket_notes \
            WHERE ticket_id = $1 AND tenant_id = $2 \
            ORDER BY created_at, id";
        Ok(self
            .conn()
            .await?
            .query(SQL, &[&ticket_id, &self.scope().tenant_id])
            .await?
            .into_iter()
            .map(|row| TicketNote {
                id: row.get("id"),
                ticket_id: row.get("ticket_id"),
                author_id: row.get("author_id"),
                content: row.get("content"),
                is_internal: row.get("is_internal"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
