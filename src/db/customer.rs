use std::{collections::HashMap, error::Error as StdError};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio_postgres::types::{
    accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql, Type,
};
use uuid::Uuid;

use super::{Error, Scoped};

#[derive(Clone, Debug)]
pub struct Customer {
    pub id: Id,
    pub name: String,
    pub phone: Option<String>,
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
pub struct NewCustomer {
    pub name: String,
    pub phone: Option<String>,
}

fn from_row(row: &tokio_postgres::Row) -> Customer {
    Customer {
        id: row.get("id"),
        name: row.get("name"),
        phone: row.get("phone"),
    }
}

impl Scoped<'_> {
    pub async fn get_customer(
        &self,
        id: Id,
    ) -> Result<Option<Customer>, Error> {
        const SQL: &str = "\
            SELECT id, name, phone \
            FROM customers \
            WHERE id = $1 AND tenant_id = $2 \
            LIMIT 1";
        Ok(self
            .conn()
            .await?
            .query_opt(SQL, &[&id, &self.scope().tenant_id])
            .await?
            .map(|row| from_row(&row)))
    }

    pub async fn get_customers_by_ids(
        &self,
        ids: &[Id],
    ) -> Result<HashMap<Id, Customer>, Error> {
        const SQL: &str = "\
            SELECT id, name, phone \
            FROM customers \
            WHERE id IN (SELECT unnest($1::UUID[])) AND tenant_id = $2 \
            LIMIT $3";

        let limit = i64::try_from(ids.len()).unwrap();

        Ok(self
            .conn()
            .await?
            .query(SQL, &[&ids, &self.scope().tenant_id, &limit])
            .await?
            .into_iter()
            .map(|row| {
                let customer = from_row(&row);
                (customer.id, customer)
            })
            .collect())
    }

    pub async fn insert_customer(
        &self,
        new: NewCustomer,
    ) -> Result<Customer, Error> {
        const SQL: &str = "\
            INSERT INTO customers (id, tenant_id, name, phone, \
                                   created_by_id, created_at) \
            VALUES ($1, $2, $3, $4, $5, $6)";

        let customer = Customer {
            id: Id::new(),
            name: new.name,
            phone: new.phone,
        };

        self.conn()
            .await?
            .execute(
                SQL,
                &[
                    &customer.id,
                    &self.scope().tenant_id,
                    &customer.name,
                    &customer.phone,
                    &self.scope().actor_id,
                    &OffsetDateTime::now_utc(),
                ],
            )
            .await?;

        self.audit(
            "CREATE_CUSTOMER",
            json!({
                "customerId": customer.id,
                "name": customer.name,
            }),
        );

        Ok(customer)
    }
}
