pub mod audit;
pub mod customer;
pub mod note;
pub mod part;
pub mod tenant;
pub mod ticket;
pub mod user;

use deadpool_postgres::{
    ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod,
    Runtime,
};
use derive_more::{Display, From};
use time::OffsetDateTime;
use tokio_postgres::NoTls;

use crate::{audit::Sink, config};

pub use deadpool_postgres::CreatePoolError;

pub use self::{
    customer::Customer, note::TicketNote, part::Part, ticket::Ticket,
    user::User,
};

#[derive(Debug, Display, From)]
pub enum Error {
    /// The targeted row does not exist within the calling tenant's scope.
    #[display("row not found in tenant scope")]
    NotFound,

    #[display("{_0}")]
    #[from]
    Pool(PoolError),

    #[display("{_0}")]
    #[from]
    Postgres(tokio_postgres::Error),
}

pub fn connect(
    config: config::Db,
    audit: Sink,
) -> Result<Client, CreatePoolError> {
    let mut pool_config = deadpool_postgres::Config {
        url: Some(config.url),
        manager: Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        }),
        ..deadpool_postgres::Config::default()
    };
    if let Some(max) = config.max_connections {
        pool_config.pool = Some(PoolConfig::new(max));
    }

    pool_config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map(|pool| Client { pool, audit })
}

#[derive(Clone)]
pub struct Client {
    pool: Pool,
    audit: Sink,
}

impl Client {
    /// Returns a view of the database restricted to the given tenant and
    /// attributed to the given actor.
    pub fn scoped(&self, scope: Scope) -> Scoped<'_> {
        Scoped { db: self, scope }
    }

    async fn conn(&self) -> Result<Object, Error> {
        self.pool.get().await.map_err(Into::into)
    }
}

/// Calling context every scoped operation runs under.
///
/// Built from authenticated request claims, never from request payloads.
#[derive(Clone, Copy, Debug)]
pub struct Scope {
    pub tenant_id: tenant::Id,
    pub actor_id: user::Id,
}

/// Tenant-scoped, actor-attributed view of the database.
///
/// Every read issued through this view carries the tenant predicate in its
/// `WHERE` clause, every insert is stamped with the owning tenant and the
/// acting user, and every update targets `id AND tenant_id` in a single
/// conditional statement whose affected-row count decides between success
/// and [`Error::NotFound`]. A row of another tenant can therefore neither
/// be returned nor mutated, even by a caller that forgot to scope its own
/// predicate. Entity operations are deliberately unreachable from a bare
/// [`Client`].
pub struct Scoped<'c> {
    db: &'c Client,
    scope: Scope,
}

impl Scoped<'_> {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    async fn conn(&self) -> Result<Object, Error> {
        self.db.conn().await
    }

    /// Queues one audit entry describing a mutation this view performed.
    ///
    /// Delivery runs through the audit outbox and never blocks or fails the
    /// mutation itself.
    pub fn audit(&self, action: &str, details: serde_json::Value) {
        self.db.audit.record(crate::audit::Entry {
            tenant_id: self.scope.tenant_id,
            user_id: self.scope.actor_id,
            action: action.to_string(),
            details,
            recorded_at: OffsetDateTime::now_utc(),
        });
    }
}
