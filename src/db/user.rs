use std::{collections::HashMap, error::Error as StdError};

use derive_more::Display;
use enum_utils::TryFromRepr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio_postgres::types::{
    accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql, Type,
};
use uuid::Uuid;

use super::{tenant, Client, Error, Scoped};

#[derive(Clone, Debug)]
pub struct User {
    pub id: Id,
    pub tenant_id: tenant::Id,
    pub name: String,
    pub login: String,
    pub password_hash: PasswordHash,
    pub role: Role,
    pub status: Status,
    pub max_concurrent_tickets: usize,
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
pub enum Role {
    Admin = 1,
    Technician = 2,
    Receptionist = 3,
}

impl FromSql<'_> for Role {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let role = Self::try_from(repr).map_err(|_| "invalid role")?;
        Ok(role)
    }
}

impl ToSql for Role {
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

/// Availability of a technician for new assignments.
///
/// Anything but [`Status::Available`] blocks `take`/`assign` admission.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, TryFromRepr, PartialEq,
    Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[display("AVAILABLE")]
    Available = 1,
    #[display("ON_VACATION")]
    OnVacation = 2,
    #[display("ON_LEAVE")]
    OnLeave = 3,
    #[display("IN_TRAINING")]
    InTraining = 4,
    #[display("SICK_LEAVE")]
    SickLeave = 5,
    #[display("UNAVAILABLE")]
    Unavailable = 6,
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

#[derive(Clone, Debug, PartialEq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(secret: &str) -> Self {
        // TODO: Use real hash function.
        Self(secret.to_string())
    }
}

impl FromSql<'_> for PasswordHash {
    accepts!(TEXT);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        String::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for PasswordHash {
    accepts!(TEXT);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

/// Staff account payload before the guard stamps ownership onto it.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub login: String,
    pub password_hash: PasswordHash,
    pub role: Role,
    pub status: Status,
    pub max_concurrent_tickets: usize,
}

/// Fields an account update may touch. `None` leaves a field unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct UserUpdate {
    pub status: Option<Status>,
    pub max_concurrent_tickets: Option<usize>,
}

fn from_row(row: &tokio_postgres::Row) -> User {
    User {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        login: row.get("login"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        status: row.get("status"),
        max_concurrent_tickets: usize::try_from(
            row.get::<_, i32>("max_concurrent_tickets"),
        )
        .unwrap(),
    }
}

impl Client {
    /// Unscoped lookup used by authentication only: the caller's tenant is
    /// not known until the account row is found.
    pub async fn get_user_by_login(
        &self,
        login: &str,
    ) -> Result<Option<User>, Error> {
        const SQL: &str = "\
            SELECT id, tenant_id, name, login, password_hash, role, \
                   status, max_concurrent_tickets \
            FROM users \
            WHERE login = $1 \
            LIMIT 1";
        Ok(self
            .conn()
            .await?
            .query_opt(SQL, &[&login])
            .await?
            .map(|row| from_row(&row)))
    }
}

impl Scoped<'_> {
    pub async fn get_user(&self, id: Id) -> Result<Option<User>, Error> {
        const SQL: &str = "\
            SELECT id, tenant_id, name, login, password_hash, role, \
                   status, max_concurrent_tickets \
            FROM users \
            WHERE id = $1 AND tenant_id = $2 \
            LIMIT 1";
        Ok(self
            .conn()
            .await?
            .query_opt(SQL, &[&id, &self.scope().tenant_id])
            .await?
            .map(|row| from_row(&row)))
    }

    pub async fn get_users_by_ids(
        &self,
        ids: &[Id],
    ) -> Result<HashMap<Id, User>, Error> {
        const SQL: &str = "\
            SELECT id, tenant_id, name, login, password_hash, role, \
                   status, max_concurrent_tickets \
            FROM users \
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
                let user = from_row(&row);
                (user.id, user)
            })
            .collect())
    }

    pub async fn insert_user(&self, new: NewUser) -> Result<User, Error> {
        const SQL: &str = "\
            INSERT INTO users (id, tenant_id, name, login, password_hash, \
                               role, status, max_concurrent_tickets, \
                               created_by_id, created_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)";

        let user = User {
            id: Id::new(),
            tenant_id: self.scope().tenant_id,
            name: new.name,
            login: new.login,
            password_hash: new.password_hash,
            role: new.role,
            status: new.status,
            max_concurrent_tickets: new.max_concurrent_tickets,
        };

        self.conn()
            .await?
            .execute(
                SQL,
                &[
                    &user.id,
                    &user.tenant_id,
                    &user.name,
                    &user.login,
                    &user.password_hash,
                    &user.role,
                    &user.status,
                    &i32::try_from(user.max_concurrent_tickets).unwrap(),
                    &self.scope().actor_id,
                    &OffsetDateTime::now_utc(),
                ],
            )
            .await?;

        self.audit(
            "CREATE_USER",
            json!({
                "userId": user.id,
                "login": user.login,
                "role": user.role,
            }),
        );

        Ok(user)
    }

    /// Conditional mutation: touches the row only when it belongs to this
    /// scope's tenant, otherwise fails with [`Error::NotFound`] without
    /// writing anything.
    pub async fn update_user(
        &self,
        id: Id,
        update: UserUpdate,
    ) -> Result<User, Error> {
        const SQL: &str = "\
            UPDATE users \
            SET status = COALESCE($3, status), \
                max_concurrent_tickets = \
                    COALESCE($4, max_concurrent_tickets), \
                updated_by_id = $5, \
                updated_at = $6 \
            WHERE id = $1 AND tenant_id = $2 \
            RETURNING id, tenant_id, name, login, password_hash, role, \
                      status, max_concurrent_tickets";

        let max_concurrent_tickets = update
            .max_concurrent_tickets
            .map(|max| i32::try_from(max).unwrap());
        let user = self
            .conn()
            .await?
            .query_opt(
                SQL,
                &[
                    &id,
                    &self.scope().tenant_id,
                    &update.status,
                    &max_concurrent_tickets,
                    &self.scope().actor_id,
                    &OffsetDateTime::now_utc(),
                ],
            )
            .await?
            .map(|row| from_row(&row))
            .ok_or(Error::NotFound)?;

        self.audit(
            "UPDATE_USER",
            json!({
                "userId": user.id,
                "status": update.status,
                "maxConcurrentTickets": update.max_concurrent_tickets,
            }),
        );

        Ok(user)
    }
}
