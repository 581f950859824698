pub mod common;

use repair_shop::api;
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn cancel_restores_consumed_parts() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;

    let panel = admin.add_part("Panel", 10).await.unwrap();
    let battery = admin.add_part("Battery", 10).await.unwrap();
    admin.add_ticket_part(ticket.id, panel.id, 2).await.unwrap();
    admin
        .add_ticket_part(ticket.id, battery.id, 5)
        .await
        .unwrap();

    let outcome = admin
        .ticket_action(
            ticket.id,
            json!({
                "action": "cancel",
                "cancellationReason": "Customer changed their mind",
            }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.ticket.status, api::ticket::Status::Cancelled);
    assert_eq!(
        outcome.ticket.cancellation_reason.as_deref(),
        Some("Customer changed their mind"),
    );

    let parts = admin.get_parts().await.unwrap().parts;
    let quantity_of = |id| {
        parts
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.quantity)
            .unwrap()
    };
    assert_eq!(quantity_of(panel.id), 10);
    assert_eq!(quantity_of(battery.id), 10);
}

#[tokio::test]
async fn cant_cancel_without_reason() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;

    let err = admin
        .ticket_action(ticket.id, json!({ "action": "cancel" }))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert!(err.error.contains("cancellationReason"), "{}", err.error);

    let ticket = admin.get_ticket(ticket.id).await.unwrap();
    assert_eq!(ticket.status, api::ticket::Status::Open);
    assert_eq!(ticket.cancellation_reason, None);
}

#[tokio::test]
async fn reopen_clears_cancellation_reason() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;
    admin
        .ticket_action(
            ticket.id,
            json!({
                "action": "cancel",
                "cancellationReason": "Ordered by mistake",
            }),
        )
        .await
        .unwrap();

    let outcome = admin
        .ticket_action(
            ticket.id,
            json!({ "action": "reopen", "note": "customer came back" }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.ticket.status, api::ticket::Status::InProgress);
    assert_eq!(outcome.ticket.cancellation_reason, None);

    let notes = admin.get_ticket_notes(ticket.id).await.unwrap().notes;
    assert_eq!(
        notes.last().unwrap().content,
        "Ticket reopened: customer came back",
    );
}

#[tokio::test]
async fn repeated_cancel_does_not_double_restore() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;

    let panel = admin.add_part("Panel", 10).await.unwrap();
    admin.add_ticket_part(ticket.id, panel.id, 4).await.unwrap();

    admin
        .ticket_action(
            ticket.id,
            json!({ "action": "cancel", "cancellationReason": "First" }),
        )
        .await
        .unwrap();
    admin
        .ticket_action(ticket.id, json!({ "action": "reopen" }))
        .await
        .unwrap();
    admin
        .ticket_action(
            ticket.id,
            json!({ "action": "cancel", "cancellationReason": "Second" }),
        )
        .await
        .unwrap();

    let parts = admin.get_parts().await.unwrap().parts;
    let panel = parts.iter().find(|p| p.id == panel.id).unwrap();
    assert_eq!(panel.quantity, 10);
}
