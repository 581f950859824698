use serde::{Deserialize, Serialize};

use crate::db;

pub use crate::db::customer::Id;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Id,
    pub name: String,
    pub phone: Option<String>,
}

impl From<db::Customer> for Customer {
    fn from(customer: db::Customer) -> Self {
        Self {
            id: customer.id,
            name: customer.name,
            phone: customer.phone,
        }
    }
}
