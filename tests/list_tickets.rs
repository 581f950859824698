pub mod common;

use repair_shop::api;

#[tokio::test]
async fn lists_tickets_with_customer_and_assignee() {
    let admin = common::admin_a().await;
    let (tech, tech_user) = common::technician(&admin, 3).await;
    let ticket = common::open_ticket(&admin).await;
    tech.take_ticket(ticket.id).await.unwrap();

    let list = admin.get_tickets(0, 1000).await.unwrap();
    assert!(list.total_count >= 1);

    let listed = list
        .tickets
        .iter()
        .find(|t| t.id == ticket.id)
        .expect("created ticket missing from the listing");
    assert_eq!(listed.subject, "Cracked screen");
    assert_eq!(listed.status, api::ticket::Status::InProgress);
    assert_eq!(listed.customer.name, "Dana");
    assert_eq!(
        listed.assigned_to.as_ref().map(|u| u.id),
        Some(tech_user.id),
    );
}

#[tokio::test]
async fn paginates_with_total_count() {
    let admin = common::admin_a().await;
    for _ in 0..3 {
        common::open_ticket(&admin).await;
    }

    let all = admin.get_tickets(0, 1000).await.unwrap();
    assert!(all.total_count >= 3);

    let page = admin.get_tickets(1, 2).await.unwrap();
    assert_eq!(page.tickets.len(), 2);
    assert!(page.total_count >= 3);
}

#[tokio::test]
async fn get_ticket_returns_view() {
    let admin = common::admin_a().await;
    let created = common::open_ticket(&admin).await;

    let ticket = admin.get_ticket(created.id).await.unwrap();
    assert_eq!(ticket.id, created.id);
    assert_eq!(ticket.subject, "Cracked screen");
    assert_eq!(ticket.status, api::ticket::Status::Open);
    assert_eq!(ticket.assigned_to, None);
    assert_eq!(ticket.cancellation_reason, None);
    assert_eq!(ticket.customer.name, "Dana");
}
