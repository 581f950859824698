use std::error::Error as StdError;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio_postgres::types::{
    accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql, Type,
};
use uuid::Uuid;

use super::{ticket, Error, Scoped};

/// Stock counter for one spare part. `quantity` never goes below zero:
/// draws are conditional on sufficient stock and run under a row lock.
#[derive(Clone, Debug)]
pub struct Part {
    pub id: Id,
    pub name: String,
    pub quantity: usize,
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

#[derive(Clone, Debug)]
pub struct NewPart {
    pub name: String,
    pub quantity: usize,
}

/// Outcome of a transactional attempt to draw stock for a ticket.
#[derive(Clone, Debug)]
pub enum StockDraw {
    /// Stock was decremented and a usage ledger row recorded; carries the
    /// part with its post-draw quantity.
    Drawn(Part),

    /// Not enough stock; nothing was written.
    Insufficient { available: usize },
}

fn from_row(row: &tokio_postgres::Row) -> Part {
    Part {
        id: row.get("id"),
        name: row.get("name"),
        quantity: usize::try_from(row.get::<_, i32>("quantity")).unwrap(),
    }
}

impl Scoped<'_> {
    pub async fn get_part(&self, id: Id) -> Result<Option<Part>, Error> {
        const SQL: &str = "\
            SELECT id, name, quantity \
            FROM parts \
            WHERE id = $1 AND tenant_id = $2 \
            LIMIT 1";
        Ok(self
            .conn()
            .await?
            .query_opt(SQL, &[&id, &self.scope().tenant_id])
            .await?
            .map(|row| from_row(&row)))
    }

    pub async fn get_parts(&self) -> Result<Vec<Part>, Error> {
        const SQL: &str = "\
            SELECT id, name, quantity \
            FROM parts \
            WHERE tenant_id = $1 \
            ORDER BY name, id";
        Ok(self
            .conn()
            .await?
            .query(SQL, &[&self.scope().tenant_id])
            .await?
            .iter()
            .map(from_row)
            .collect())
    }

    pub async fn insert_part(&self, new: NewPart) -> Result<Part, Error> {
        const SQL: &str = "\
            INSERT INTO parts (id, tenant_id, name, quantity, \
                               created_by_id, created_at) \
            VALUES ($1, $2, $3, $4, $5, $6)";

        let part = Part {
            id: Id::new(),
            name: new.name,
            quantity: new.quantity,
        };

        self.conn()
            .await?
            .execute(
                SQL,
                &[
                    &part.id,
                    &self.scope().tenant_id,
                    &part.name,
                    &i32::try_from(part.quantity).unwrap(),
                    &self.scope().actor_id,
                    &OffsetDateTime::now_utc(),
                ],
            )
            .await?;

        self.audit(
            "CREATE_PART",
            json!({
                "partId": part.id,
                "name": part.name,
                "quantity": part.quantity,
            }),
        );

        Ok(part)
    }

    /// Consumes `quantity` units of a part for a ticket: decrements the
    /// stock counter and appends a usage ledger row in one transaction.
    ///
    /// The part row is locked for the duration, so concurrent draws cannot
    /// overdraw the counter.
    pub async fn draw_part(
        &self,
        id: Id,
        ticket_id: ticket::Id,
        quantity: usize,
    ) -> Result<StockDraw, Error> {
        const LOCK_SQL: &str = "\
            SELECT id, name, quantity \
            FROM parts \
            WHERE id = $1 AND tenant_id = $2 \
            FOR UPDATE";
        const DRAW_SQL: &str = "\
            UPDATE parts \
            SET quantity = quantity - $3, \
                updated_by_id = $4, \
                updated_at = $5 \
            WHERE id = $1 AND tenant_id = $2";
        const USAGE_SQL: &str = "\
            INSERT INTO part_usages (id, tenant_id, ticket_id, part_id, \
                                     quantity, created_by_id, created_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7)";

        let scope = self.scope();
        let quantity_sql = i32::try_from(quantity).unwrap();

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let mut part = tx
            .query_opt(LOCK_SQL, &[&id, &scope.tenant_id])
            .await?
            .map(|row| from_row(&row))
            .ok_or(Error::NotFound)?;
        if part.quantity < quantity {
            return Ok(StockDraw::Insufficient {
                available: part.quantity,
            });
        }

        let now = OffsetDateTime::now_utc();
        tx.execute(
            DRAW_SQL,
            &[
                &id,
                &scope.tenant_id,
                &quantity_sql,
                &scope.actor_id,
                &now,
            ],
        )
        .await?;
        tx.execute(
            USAGE_SQL,
            &[
                &Uuid::new_v4(),
                &scope.tenant_id,
                &ticket_id,
                &id,
                &quantity_sql,
                &scope.actor_id,
                &now,
            ],
        )
        .await?;
        tx.commit().await?;

        part.quantity -= quantity;
        Ok(StockDraw::Drawn(part))
    }
}
