pub mod common;

use repair_shop::api;
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn starts_work() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;

    let outcome = admin
        .ticket_action(ticket.id, json!({ "action": "start" }))
        .await
        .unwrap();

    assert_eq!(outcome.ticket.status, api::ticket::Status::InProgress);
}

#[tokio::test]
async fn waits_for_parts_with_internal_note() {
    let admin = common::admin_a().await;
    let (tech, _) = common::technician(&admin, 3).await;
    let ticket = common::open_ticket(&admin).await;
    tech.take_ticket(ticket.id).await.unwrap();

    let outcome = tech
        .ticket_action(
            ticket.id,
            json!({
                "action": "wait_for_parts",
                "note": "Ordered a replacement panel",
            }),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome.ticket.status,
        api::ticket::Status::WaitingForParts,
    );

    let notes = tech.get_ticket_notes(ticket.id).await.unwrap().notes;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].content, "Ordered a replacement panel");
    assert!(notes[0].is_internal);
}

#[tokio::test]
async fn cant_wait_for_parts_without_note() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;

    let err = admin
        .ticket_action(ticket.id, json!({ "action": "wait_for_parts" }))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert!(err.error.contains("note"), "{}", err.error);

    let ticket = admin.get_ticket(ticket.id).await.unwrap();
    assert_eq!(ticket.status, api::ticket::Status::Open);
}

#[tokio::test]
async fn resumes_work() {
    let admin = common::admin_a().await;
    let (tech, _) = common::technician(&admin, 3).await;
    let ticket = common::open_ticket(&admin).await;
    tech.take_ticket(ticket.id).await.unwrap();
    tech.ticket_action(
        ticket.id,
        json!({ "action": "wait_for_parts", "note": "Ordered parts" }),
    )
    .await
    .unwrap();

    let outcome = tech
        .ticket_action(
            ticket.id,
            json!({ "action": "resume", "note": "Parts arrived" }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.ticket.status, api::ticket::Status::InProgress);

    let notes = tech.get_ticket_notes(ticket.id).await.unwrap().notes;
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[1].content, "Parts arrived");
}

#[tokio::test]
async fn resolves_with_note() {
    let admin = common::admin_a().await;
    let (tech, _) = common::technician(&admin, 3).await;
    let ticket = common::open_ticket(&admin).await;
    tech.take_ticket(ticket.id).await.unwrap();

    let outcome = tech
        .ticket_action(
            ticket.id,
            json!({ "action": "resolve", "note": "Replaced the panel" }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.ticket.status, api::ticket::Status::Resolved);
}

#[tokio::test]
async fn cant_resolve_without_note() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;

    let err = admin
        .ticket_action(ticket.id, json!({ "action": "resolve" }))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert!(err.error.contains("note"), "{}", err.error);
}

#[tokio::test]
async fn delivers_with_customer_visible_note() {
    let admin = common::admin_a().await;
    let (tech, _) = common::technician(&admin, 3).await;
    let ticket = common::open_ticket(&admin).await;
    tech.take_ticket(ticket.id).await.unwrap();
    tech.ticket_action(
        ticket.id,
        json!({ "action": "resolve", "note": "Replaced the panel" }),
    )
    .await
    .unwrap();

    let outcome = tech
        .ticket_action(
            ticket.id,
            json!({ "action": "deliver", "note": "Picked up in store" }),
        )
        .await
        .unwrap();

    assert_eq!(outcome.ticket.status, api::ticket::Status::Closed);

    let notes = tech.get_ticket_notes(ticket.id).await.unwrap().notes;
    let delivery = notes.last().unwrap();
    assert_eq!(delivery.content, "Picked up in store");
    assert!(!delivery.is_internal);
}

#[tokio::test]
async fn rejects_unknown_action() {
    let admin = common::admin_a().await;
    let ticket = common::open_ticket(&admin).await;

    let err = admin
        .ticket_action(ticket.id, json!({ "action": "escalate" }))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert!(err.error.contains("unknown variant"), "{}", err.error);
}

#[tokio::test]
async fn action_on_missing_ticket_is_not_found() {
    let admin = common::admin_a().await;

    let err = admin
        .ticket_action(
            api::ticket::Id::from(0xdead_beef),
            json!({ "action": "start" }),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::NOT_FOUND);
    assert_eq!(err.error, "Ticket not found");
}
