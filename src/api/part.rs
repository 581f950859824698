use serde::{Deserialize, Serialize};

use crate::db;

pub use crate::db::part::Id;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub id: Id,
    pub name: String,
    pub quantity: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub parts: Vec<Part>,
}

impl From<db::Part> for Part {
    fn from(part: db::Part) -> Self {
        Self {
            id: part.id,
            name: part.name,
            quantity: part.quantity,
        }
    }
}
