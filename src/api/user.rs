use serde::{Deserialize, Serialize};

use crate::db;

pub use crate::db::user::{Id, PasswordHash, Role, Status};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub name: String,
    pub role: Role,
    pub status: Status,
    pub max_concurrent_tickets: usize,
}

impl From<db::User> for User {
    fn from(user: db::User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            role: user.role,
            status: user.status,
            max_concurrent_tickets: user.max_concurrent_tickets,
        }
    }
}
