use serde::{Deserialize, Serialize};

use crate::api;

pub use crate::db::ticket::{Id, Status};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Id,
    pub subject: String,
    pub status: Status,
    pub customer: api::Customer,
    pub assigned_to: Option<api::User>,
    pub cancellation_reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub tickets: Vec<Ticket>,
    pub total_count: usize,
}

/// Response of the lifecycle action endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub ticket: Ticket,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: crate::db::note::Id,
    pub author_id: api::user::Id,
    pub content: String,
    pub is_internal: bool,
    /// Unix timestamp, seconds.
    pub created_at: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notes {
    pub notes: Vec<Note>,
}
