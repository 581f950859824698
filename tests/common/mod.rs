use constcat::concat;
use repair_shop::api;
use reqwest::StatusCode;
use serde_json::json;

const BASE_URL: &str = "http://localhost:3000";

/// Error envelope returned by the API.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
}

pub struct Client {
    inner: reqwest::Client,
    pub auth_token: Option<String>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
            auth_token: None,
        }
    }

    pub async fn auth(mut self, login: &str, password: &str) -> Self {
        const URL: &str = concat!(BASE_URL, "/auth");

        self.auth_token = Some(
            self.inner
                .post(URL)
                .json(&json!({
                    "login": login,
                    "password": password,
                }))
                .send()
                .await
                .expect("failed to send a request")
                .error_for_status()
                .expect("wrong status code")
                .text()
                .await
                .expect("failed to get a response"),
        );

        self
    }

    fn authorized(
        &self,
        req: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth_token {
            req.header("Authorization", format!("Bearer {token}"))
        } else {
            req
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        req: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = req.send().await.expect("failed to send a request");
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json().await.expect("failed to get a response"))
        } else {
            let body: serde_json::Value =
                resp.json().await.expect("failed to get an error response");
            Err(ApiError {
                status,
                error: body["error"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            })
        }
    }

    pub async fn user(&self) -> Result<api::User, ApiError> {
        const URL: &str = concat!(BASE_URL, "/user");
        Self::send(self.authorized(self.inner.get(URL))).await
    }

    pub async fn add_user(
        &self,
        name: &str,
        login: &str,
        password: &str,
        role: api::user::Role,
        max_concurrent_tickets: usize,
    ) -> Result<api::User, ApiError> {
        const URL: &str = concat!(BASE_URL, "/users");
        Self::send(self.authorized(self.inner.post(URL)).json(&json!({
            "name": name,
            "login": login,
            "password": password,
            "role": role,
            "maxConcurrentTickets": max_concurrent_tickets,
        })))
        .await
    }

    pub async fn edit_user(
        &self,
        id: api::user::Id,
        status: Option<api::user::Status>,
        max_concurrent_tickets: Option<usize>,
    ) -> Result<api::User, ApiError> {
        const URL: &str = concat!(BASE_URL, "/users");
        Self::send(
            self.authorized(self.inner.patch(format!("{URL}/{id}"))).json(
                &json!({
                    "status": status,
                    "maxConcurrentTickets": max_concurrent_tickets,
                }),
            ),
        )
        .await
    }

    pub async fn add_customer(
        &self,
        name: &str,
    ) -> Result<api::Customer, ApiError> {
        const URL: &str = concat!(BASE_URL, "/customers");
        Self::send(self.authorized(self.inner.post(URL)).json(&json!({
            "name": name,
        })))
        .await
    }

    pub async fn add_part(
        &self,
        name: &str,
        quantity: usize,
    ) -> Result<api::Part, ApiError> {
        const URL: &str = concat!(BASE_URL, "/parts");
        Self::send(self.authorized(self.inner.post(URL)).json(&json!({
            "name": name,
            "quantity": quantity,
        })))
        .await
    }

    pub async fn get_parts(&self) -> Result<api::part::List, ApiError> {
        const URL: &str = concat!(BASE_URL, "/parts");
        Self::send(self.authorized(self.inner.get(URL))).await
    }

    pub async fn add_ticket(
        &self,
        customer_id: api::customer::Id,
        subject: &str,
    ) -> Result<api::Ticket, ApiError> {
        const URL: &str = concat!(BASE_URL, "/tickets");
        Self::send(self.authorized(self.inner.post(URL)).json(&json!({
            "customerId": customer_id,
            "subject": subject,
        })))
        .await
    }

    pub async fn get_ticket(
        &self,
        id: api::ticket::Id,
    ) -> Result<api::Ticket, ApiError> {
        const URL: &str = concat!(BASE_URL, "/tickets");
        Self::send(self.authorized(self.inner.get(format!("{URL}/{id}"))))
            .await
    }

    pub async fn get_tickets(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<api::ticket::List, ApiError> {
        const URL: &str = concat!(BASE_URL, "/tickets");
        Self::send(self.authorized(
            self.inner
                .get(format!("{URL}?offset={offset}&limit={limit}")),
        ))
        .await
    }

    pub async fn get_ticket_notes(
        &self,
        id: api::ticket::Id,
    ) -> Result<api::ticket::Notes, ApiError> {
        const URL: &str = concat!(BASE_URL, "/tickets");
        Self::send(
            self.authorized(self.inner.get(format!("{URL}/{id}/notes"))),
        )
        .await
    }

    pub async fn add_ticket_part(
        &self,
        id: api::ticket::Id,
        part_id: api::part::Id,
        quantity: usize,
    ) -> Result<api::Part, ApiError> {
        const URL: &str = concat!(BASE_URL, "/tickets");
        Self::send(
            self.authorized(self.inner.post(format!("{URL}/{id}/parts")))
                .json(&json!({
                    "partId": part_id,
                    "quantity": quantity,
                })),
        )
        .await
    }

    pub async fn ticket_action(
        &self,
        id: api::ticket::Id,
        body: serde_json::Value,
    ) -> Result<api::ticket::ActionOutcome, ApiError> {
        const URL: &str = concat!(BASE_URL, "/tickets");
        Self::send(
            self.authorized(self.inner.post(format!("{URL}/{id}/actions")))
                .json(&body),
        )
        .await
    }

    pub async fn take_ticket(
        &self,
        id: api::ticket::Id,
    ) -> Result<api::ticket::ActionOutcome, ApiError> {
        self.ticket_action(id, json!({ "action": "take" })).await
    }
}

pub async fn admin_a() -> Client {
    Client::new().auth("admin-a", "password").await
}

pub async fn admin_b() -> Client {
    Client::new().auth("admin-b", "password").await
}

pub fn unique_login(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Creates a fresh technician in the admin's tenant and logs them in.
pub async fn technician(
    admin: &Client,
    max_concurrent_tickets: usize,
) -> (Client, api::User) {
    let login = unique_login("tech");
    let user = admin
        .add_user(
            "Taylor",
            &login,
            "password",
            api::user::Role::Technician,
            max_concurrent_tickets,
        )
        .await
        .expect("failed to create a technician");
    let client = Client::new().auth(&login, "password").await;
    (client, user)
}

/// Creates a customer and an open, unassigned ticket for them.
pub async fn open_ticket(admin: &Client) -> api::Ticket {
    let customer = admin
        .add_customer("Dana")
        .await
        .expect("failed to create a customer");
    admin
        .add_ticket(customer.id, "Cracked screen")
        .await
        .expect("failed to create a ticket")
}
