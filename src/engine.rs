//! Ticket lifecycle engine.
//!
//! One dispatch entry point validates an action's preconditions, performs
//! the state transition (and any coupled note/inventory writes) through
//! the tenant-scoped database view, and queues one audit entry describing
//! the transition in human-readable form.

use derive_more::{Display, From};
use serde::Deserialize;
use serde_json::json;

use crate::{
    db::{
        self,
        note::NewNote,
        part::{self, StockDraw},
        ticket::{self, Claim, Status},
        user, Scoped,
    },
    workload,
};

/// A lifecycle action requested for one ticket.
///
/// The tagged representation makes each action's required fields part of
/// the type: an unknown action name or a missing `note` fails at parse
/// time, before anything is touched.
#[derive(Clone, Debug, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    /// The acting technician claims the ticket for themselves.
    Take,

    /// The ticket is claimed on behalf of another technician.
    Assign { assigned_to_id: user::Id },

    Start,

    WaitForParts { note: String },

    Resume { note: Option<String> },

    Resolve { note: String },

    /// Hand the repaired device back; an optional note is customer-visible.
    Deliver { note: Option<String> },

    Cancel { cancellation_reason: String },

    Reopen { note: Option<String> },
}

impl Action {
    /// Parses a request body, reporting unknown actions and missing
    /// required fields as [`Error::Validation`].
    pub fn parse(body: serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(body)
            .map_err(|e| Error::Validation(e.to_string()))
    }
}

/// Result of a successfully dispatched action.
#[derive(Debug)]
pub struct Outcome {
    pub ticket: db::Ticket,
    pub message: String,
}

#[derive(Debug, Display, From)]
pub enum Error {
    /// The request is malformed for the chosen action.
    #[display("{_0}")]
    Validation(String),

    /// A precondition does not hold: capacity exhausted, technician
    /// unavailable, or the assignment race was lost.
    #[display("{_0}")]
    Conflict(String),

    #[display("Ticket not found")]
    TicketNotFound,

    #[display("Technician not found")]
    TechnicianNotFound,

    #[display("Part not found")]
    PartNotFound,

    #[display("{_0}")]
    #[from]
    Db(db::Error),
}

/// Dispatches one lifecycle action against one ticket.
pub async fn dispatch(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket_id: ticket::Id,
    action: Action,
) -> Result<Outcome, Error> {
    let ticket = db
        .get_ticket(ticket_id)
        .await?
        .ok_or(Error::TicketNotFound)?;

    match action {
        Action::Take => take(db, actor, ticket).await,
        Action::Assign { assigned_to_id } => {
            assign(db, actor, ticket, assigned_to_id).await
        }
        Action::Start => start(db, actor, ticket).await,
        Action::WaitForParts { note } => {
            wait_for_parts(db, actor, ticket, &note).await
        }
        Action::Resume { note } => {
            resume(db, actor, ticket, note.as_deref()).await
        }
        Action::Resolve { note } => resolve(db, actor, ticket, &note).await,
        Action::Deliver { note } => {
            deliver(db, actor, ticket, note.as_deref()).await
        }
        Action::Cancel {
            cancellation_reason,
        } => cancel(db, actor, ticket, &cancellation_reason).await,
        Action::Reopen { note } => {
            reopen(db, actor, ticket, note.as_deref()).await
        }
    }
}

/// Attaches `quantity` units of a part to the ticket, drawing them from
/// stock.
pub async fn attach_part(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket_id: ticket::Id,
    part_id: part::Id,
    quantity: usize,
) -> Result<part::Part, Error> {
    if quantity == 0 {
        return Err(Error::Validation(
            "quantity must be positive".to_string(),
        ));
    }

    let ticket = db
        .get_ticket(ticket_id)
        .await?
        .ok_or(Error::TicketNotFound)?;

    let part = match db.draw_part(part_id, ticket.id, quantity).await {
        Ok(StockDraw::Drawn(part)) => part,
        Ok(StockDraw::Insufficient { available }) => {
            return Err(Error::Conflict(format!(
                "Insufficient stock ({available} available)"
            )));
        }
        Err(db::Error::NotFound) => return Err(Error::PartNotFound),
        Err(e) => return Err(e.into()),
    };

    db.audit(
        "ADD_TICKET_PART",
        json!({
            "ticketId": ticket.id,
            "partId": part.id,
            "quantity": quantity,
        }),
    );

    Ok(part)
}

const ALREADY_ASSIGNED: &str =
    "Ticket is already assigned to another technician";

async fn take(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
) -> Result<Outcome, Error> {
    if ticket.assigned_to_id.is_some() {
        return Err(Error::Conflict(ALREADY_ASSIGNED.to_string()));
    }
    admit(db, actor).await?;

    let ticket = claim(db, ticket, actor.id).await?;
    let message =
        format!("{} took ticket #{}", actor.name, short_id(ticket.id));
    db.audit(
        "TAKE_TICKET",
        json!({
            "ticketId": ticket.id,
            "technicianId": actor.id,
        }),
    );

    Ok(Outcome { ticket, message })
}

async fn assign(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
    assignee_id: user::Id,
) -> Result<Outcome, Error> {
    if ticket.assigned_to_id.is_some() {
        return Err(Error::Conflict(ALREADY_ASSIGNED.to_string()));
    }
    let assignee = db
        .get_user(assignee_id)
        .await?
        .ok_or(Error::TechnicianNotFound)?;
    admit(db, &assignee).await?;

    let ticket = claim(db, ticket, assignee.id).await?;
    let message = format!(
        "{} assigned ticket #{} to {}",
        actor.name,
        short_id(ticket.id),
        assignee.name,
    );
    db.audit(
        "ASSIGN_TICKET",
        json!({
            "ticketId": ticket.id,
            "technicianId": assignee.id,
        }),
    );

    Ok(Outcome { ticket, message })
}

/// Admission control: a technician may only receive a ticket while
/// available and under their concurrent-ticket limit.
async fn admit(db: &Scoped<'_>, technician: &db::User) -> Result<(), Error> {
    if technician.status != user::Status::Available {
        return Err(Error::Conflict(format!(
            "Technician is {}",
            technician.status,
        )));
    }

    let workload = workload::of_technician(db, technician).await?;
    if workload.is_full() {
        return Err(Error::Conflict(format!(
            "Workload limit reached ({} tickets)",
            workload.max,
        )));
    }

    Ok(())
}

async fn claim(
    db: &Scoped<'_>,
    ticket: db::Ticket,
    assignee: user::Id,
) -> Result<db::Ticket, Error> {
    match db.claim_ticket(ticket.id, assignee).await? {
        Claim::Won(ticket) => Ok(ticket),
        Claim::Lost => Err(Error::Conflict(ALREADY_ASSIGNED.to_string())),
    }
}

async fn start(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
) -> Result<Outcome, Error> {
    let ticket = db
        .update_ticket_status(ticket.id, Status::InProgress, None)
        .await?;
    let message = format!(
        "{} started work on ticket #{}",
        actor.name,
        short_id(ticket.id),
    );
    db.audit("START_TICKET", json!({ "ticketId": ticket.id }));

    Ok(Outcome { ticket, message })
}

async fn wait_for_parts(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
    note: &str,
) -> Result<Outcome, Error> {
    let ticket = db
        .update_ticket_status(
            ticket.id,
            Status::WaitingForParts,
            Some(NewNote {
                author: actor.id,
                content: note,
                is_internal: true,
            }),
        )
        .await?;
    let message = format!(
        "{} marked ticket #{} as waiting for parts",
        actor.name,
        short_id(ticket.id),
    );
    db.audit(
        "WAIT_FOR_PARTS",
        json!({ "ticketId": ticket.id, "note": note }),
    );

    Ok(Outcome { ticket, message })
}

async fn resume(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
    note: Option<&str>,
) -> Result<Outcome, Error> {
    let note = note.map(|content| NewNote {
        author: actor.id,
        content,
        is_internal: true,
    });
    let ticket = db
        .update_ticket_status(ticket.id, Status::InProgress, note)
        .await?;
    let message = format!(
        "{} resumed work on ticket #{}",
        actor.name,
        short_id(ticket.id),
    );
    db.audit("RESUME_TICKET", json!({ "ticketId": ticket.id }));

    Ok(Outcome { ticket, message })
}

async fn resolve(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
    note: &str,
) -> Result<Outcome, Error> {
    let ticket = db
        .update_ticket_status(
            ticket.id,
            Status::Resolved,
            Some(NewNote {
                author: actor.id,
                content: note,
                is_internal: true,
            }),
        )
        .await?;
    let message =
        format!("{} resolved ticket #{}", actor.name, short_id(ticket.id));
    db.audit(
        "RESOLVE_TICKET",
        json!({ "ticketId": ticket.id, "note": note }),
    );

    Ok(Outcome { ticket, message })
}

async fn deliver(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
    note: Option<&str>,
) -> Result<Outcome, Error> {
    let note = note.map(|content| NewNote {
        author: actor.id,
        content,
        is_internal: false,
    });
    let ticket = db
        .update_ticket_status(ticket.id, Status::Closed, note)
        .await?;
    let message =
        format!("{} delivered ticket #{}", actor.name, short_id(ticket.id));
    db.audit("DELIVER_TICKET", json!({ "ticketId": ticket.id }));

    Ok(Outcome { ticket, message })
}

async fn cancel(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
    reason: &str,
) -> Result<Outcome, Error> {
    let (ticket, restored) = db.cancel_ticket(ticket.id, reason).await?;
    let message = format!(
        "{} cancelled ticket #{}",
        actor.name,
        short_id(ticket.id),
    );
    db.audit(
        "CANCEL_TICKET",
        json!({
            "ticketId": ticket.id,
            "reason": reason,
            "restored": restored
                .iter()
                .map(|part| {
                    json!({
                        "partId": part.part_id,
                        "quantity": part.quantity,
                    })
                })
                .collect::<Vec<_>>(),
        }),
    );

    Ok(Outcome { ticket, message })
}

async fn reopen(
    db: &Scoped<'_>,
    actor: &db::User,
    ticket: db::Ticket,
    note: Option<&str>,
) -> Result<Outcome, Error> {
    let content = note.map(|note| format!("Ticket reopened: {note}"));
    let note = content.as_deref().map(|content| NewNote {
        author: actor.id,
        content,
        is_internal: true,
    });
    let ticket = db.reopen_ticket(ticket.id, note).await?;
    let message =
        format!("{} reopened ticket #{}", actor.name, short_id(ticket.id));
    db.audit("REOPEN_TICKET", json!({ "ticketId": ticket.id }));

    Ok(Outcome { ticket, message })
}

fn short_id(id: ticket::Id) -> String {
    let id = id.to_string();
    id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Action, Error};

    #[test]
    fn parses_take() {
        assert!(matches!(
            Action::parse(json!({ "action": "take" })),
            Ok(Action::Take),
        ));
    }

    #[test]
    fn parses_assign_with_camel_case_field() {
        let action = Action::parse(json!({
            "action": "assign",
            "assignedToId": "a23f2ae8-4cb2-46fe-b6a1-7f83a4a0e1a4",
        }));
        assert!(matches!(action, Ok(Action::Assign { .. })));
    }

    #[test]
    fn rejects_assign_without_assignee() {
        let err = Action::parse(json!({ "action": "assign" })).unwrap_err();
        let Error::Validation(message) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(message.contains("assignedToId"), "{message}");
    }

    #[test]
    fn rejects_wait_for_parts_without_note() {
        let err =
            Action::parse(json!({ "action": "wait_for_parts" })).unwrap_err();
        let Error::Validation(message) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(message.contains("note"), "{message}");
    }

    #[test]
    fn rejects_resolve_without_note() {
        let err = Action::parse(json!({ "action": "resolve" })).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_cancel_without_reason() {
        let err = Action::parse(json!({ "action": "cancel" })).unwrap_err();
        let Error::Validation(message) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(message.contains("cancellationReason"), "{message}");
    }

    #[test]
    fn rejects_unknown_action() {
        let err =
            Action::parse(json!({ "action": "escalate" })).unwrap_err();
        let Error::Validation(message) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert!(message.contains("unknown variant"), "{message}");
    }

    #[test]
    fn resume_note_is_optional() {
        assert!(matches!(
            Action::parse(json!({ "action": "resume" })),
            Ok(Action::Resume { note: None }),
        ));
        assert!(matches!(
            Action::parse(json!({
                "action": "resume",
                "note": "parts arrived",
            })),
            Ok(Action::Resume { note: Some(_) }),
        ));
    }
}
