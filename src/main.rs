use std::{error::Error, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, RequestPartsExt as _, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use derive_more::From;
use futures::{future::OptionFuture, FutureExt as _};
use itertools::Itertools as _;
use jsonwebtoken::{
    decode, encode, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio::{fs, net, task};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

use repair_shop::{api, audit, db, engine, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = fs::read_to_string("config.toml").await?;
    let config = toml::from_str::<Config>(&config)?;

    let (audit_sink, audit_entries) = audit::outbox();
    let db_client = db::connect(config.db, audit_sink)?;

    task::spawn(audit::write_entries(db_client.clone(), audit_entries));

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);
    for origin in &config.http.cors.allowed_origins {
        cors = cors.allow_origin(origin.parse::<HeaderValue>()?);
    }

    let app = Router::new()
        .route("/auth", post(auth))
        .route("/user", get(get_user))
        .route("/users", post(add_user))
        .route("/users/:id", patch(edit_user))
        .route("/customers", post(add_customer))
        .route("/parts", get(list_parts).post(add_part))
        .route("/tickets", get(list_tickets).post(add_ticket))
        .route("/tickets/:id", get(get_ticket))
        .route("/tickets/:id/notes", get(list_ticket_notes))
        .route("/tickets/:id/parts", post(add_ticket_part))
        .route("/tickets/:id/actions", post(ticket_action))
        .layer(cors)
        .with_state(Arc::new(AppState {
            db_client,
            jwt_expiration_time: config.jwt.expiration_time,
            jwt_decoding_key: DecodingKey::from_secret(
                config.jwt.secret.as_bytes(),
            ),
            jwt_encoding_key: EncodingKey::from_secret(
                config.jwt.secret.as_bytes(),
            ),
        }));

    let listener = net::TcpListener::bind(config.http.server.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    tracing::error!("internal error: {e}");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

#[derive(Deserialize)]
struct AuthInput {
    login: String,
    password: String,
}

async fn auth(
    State(state): State<SharedAppState>,
    Json(AuthInput { login, password }): Json<AuthInput>,
) -> Result<String, AuthError> {
    use AuthError as E;

    let password_hash = api::user::PasswordHash::new(&password);

    let user = state
        .db_client
        .get_user_by_login(&login)
        .await?
        .filter(|u| u.password_hash == password_hash)
        .ok_or(E::WrongLoginOrPassword)?;

    let expires_at = OffsetDateTime::now_utc() + state.jwt_expiration_time;
    encode(
        &Header::default(),
        &AuthClaims {
            user_id: user.id,
            tenant_id: user.tenant_id,
            exp: expires_at.unix_timestamp(),
        },
        &state.jwt_encoding_key,
    )
    .map_err(|_| E::InvalidToken)
}

#[derive(Debug, From)]
pub enum AuthError {
    #[from]
    DbError(db::Error),
    InvalidToken,
    WrongLoginOrPassword,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::InvalidToken => {
                error_body(StatusCode::UNAUTHORIZED, "Unauthorized")
            }
            Self::WrongLoginOrPassword => error_body(
                StatusCode::FORBIDDEN,
                "Wrong login or password",
            ),
        }
    }
}

async fn get_user(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
) -> Result<Json<api::User>, GetUserError> {
    use GetUserError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let my = db
        .get_user(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;

    Ok(Json(my.into()))
}

#[derive(Debug, From)]
pub enum GetUserError {
    #[from]
    DbError(db::Error),
    UserNotFound,
}

impl IntoResponse for GetUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::UserNotFound => internal_error("authenticated user is gone"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddUserInput {
    name: String,
    login: String,
    password: String,
    role: api::user::Role,
    max_concurrent_tickets: usize,
}

async fn add_user(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(input): Json<AddUserInput>,
) -> Result<Json<api::User>, AddUserError> {
    use AddUserError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let my = db
        .get_user(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;
    if my.role != db::user::Role::Admin {
        return Err(E::Forbidden);
    }

    let user = db
        .insert_user(db::user::NewUser {
            name: input.name,
            login: input.login,
            password_hash: api::user::PasswordHash::new(&input.password),
            role: input.role,
            status: db::user::Status::Available,
            max_concurrent_tickets: input.max_concurrent_tickets,
        })
        .await?;

    Ok(Json(user.into()))
}

#[derive(Debug, From)]
pub enum AddUserError {
    #[from]
    DbError(db::Error),
    Forbidden,
    UserNotFound,
}

impl IntoResponse for AddUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::Forbidden => error_body(StatusCode::FORBIDDEN, "Forbidden"),
            Self::UserNotFound => internal_error("authenticated user is gone"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditUserInput {
    status: Option<api::user::Status>,
    max_concurrent_tickets: Option<usize>,
}

async fn edit_user(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::user::Id>,
    Json(input): Json<EditUserInput>,
) -> Result<Json<api::User>, EditUserError> {
    use EditUserError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let my = db
        .get_user(auth_claims.user_id)
        .await?
        .ok_or(E::ActorNotFound)?;
    if my.role != db::user::Role::Admin && my.id != id {
        return Err(E::Forbidden);
    }

    let user = db
        .update_user(
            id,
            db::user::UserUpdate {
                status: input.status,
                max_concurrent_tickets: input.max_concurrent_tickets,
            },
        )
        .await
        .map_err(|e| match e {
            db::Error::NotFound => E::UserNotFound,
            e => E::DbError(e),
        })?;

    Ok(Json(user.into()))
}

#[derive(Debug, From)]
pub enum EditUserError {
    #[from]
    DbError(db::Error),
    ActorNotFound,
    Forbidden,
    UserNotFound,
}

impl IntoResponse for EditUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::ActorNotFound => {
                internal_error("authenticated user is gone")
            }
            Self::Forbidden => error_body(StatusCode::FORBIDDEN, "Forbidden"),
            Self::UserNotFound => {
                error_body(StatusCode::NOT_FOUND, "User not found")
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCustomerInput {
    name: String,
    phone: Option<String>,
}

async fn add_customer(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(input): Json<AddCustomerInput>,
) -> Result<Json<api::Customer>, AddCustomerError> {
    let db = state.db_client.scoped(auth_claims.scope());
    let customer = db
        .insert_customer(db::customer::NewCustomer {
            name: input.name,
            phone: input.phone,
        })
        .await?;

    Ok(Json(customer.into()))
}

#[derive(Debug, From)]
pub enum AddCustomerError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for AddCustomerError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
        }
    }
}

async fn list_parts(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
) -> Result<Json<api::part::List>, ListPartsError> {
    let db = state.db_client.scoped(auth_claims.scope());
    let parts = db.get_parts().await?;

    Ok(Json(api::part::List {
        parts: parts.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Debug, From)]
pub enum ListPartsError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for ListPartsError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPartInput {
    name: String,
    quantity: usize,
}

async fn add_part(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(input): Json<AddPartInput>,
) -> Result<Json<api::Part>, AddPartError> {
    use AddPartError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let my = db
        .get_user(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;
    if my.role != db::user::Role::Admin {
        return Err(E::Forbidden);
    }

    let part = db
        .insert_part(db::part::NewPart {
            name: input.name,
            quantity: input.quantity,
        })
        .await?;

    Ok(Json(part.into()))
}

#[derive(Debug, From)]
pub enum AddPartError {
    #[from]
    DbError(db::Error),
    Forbidden,
    UserNotFound,
}

impl IntoResponse for AddPartError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::Forbidden => error_body(StatusCode::FORBIDDEN, "Forbidden"),
            Self::UserNotFound => internal_error("authenticated user is gone"),
        }
    }
}

#[derive(Deserialize)]
struct ListTicketsInput {
    offset: usize,
    limit: usize,
}

async fn list_tickets(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Query(ListTicketsInput { offset, limit }): Query<ListTicketsInput>,
) -> Result<Json<api::ticket::List>, ListTicketsError> {
    use ListTicketsError as E;

    let db = state.db_client.scoped(auth_claims.scope());

    let page_fut = db.get_tickets_page(offset, limit);
    let total_count_fut = db.get_tickets_count();
    let (page, total_count) = tokio::try_join!(page_fut, total_count_fut)?;

    let customer_ids = page
        .iter()
        .map(|ticket| ticket.customer_id)
        .unique()
        .collect::<Vec<_>>();
    let assignee_ids = page
        .iter()
        .filter_map(|ticket| ticket.assigned_to_id)
        .unique()
        .collect::<Vec<_>>();
    let customers_fut = db.get_customers_by_ids(&customer_ids);
    let assignees_fut = db.get_users_by_ids(&assignee_ids);
    let (customers, assignees) =
        tokio::try_join!(customers_fut, assignees_fut)?;

    let tickets = page
        .into_iter()
        .map(|ticket| {
            let customer = customers
                .get(&ticket.customer_id)
                .ok_or(E::CustomerNotFound(ticket.customer_id))?;
            let assigned_to = ticket
                .assigned_to_id
                .map(|id| assignees.get(&id).ok_or(E::UserNotFound(id)))
                .transpose()?;
            Ok::<_, E>(api::Ticket {
                id: ticket.id,
                subject: ticket.subject,
                status: ticket.status,
                customer: customer.clone().into(),
                assigned_to: assigned_to.cloned().map(Into::into),
                cancellation_reason: ticket.cancellation_reason,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(api::ticket::List {
        tickets,
        total_count,
    }))
}

#[derive(Debug, From)]
pub enum ListTicketsError {
    #[from]
    DbError(db::Error),
    CustomerNotFound(api::customer::Id),
    UserNotFound(api::user::Id),
}

impl IntoResponse for ListTicketsError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::CustomerNotFound(id) => {
                internal_error(format!("dangling customer reference {id}"))
            }
            Self::UserNotFound(id) => {
                internal_error(format!("dangling user reference {id}"))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTicketInput {
    customer_id: api::customer::Id,
    subject: String,
}

async fn add_ticket(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(input): Json<AddTicketInput>,
) -> Result<Json<api::Ticket>, AddTicketError> {
    use AddTicketError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let customer = db
        .get_customer(input.customer_id)
        .await?
        .ok_or(E::CustomerNotFound)?;

    let ticket = db
        .insert_ticket(db::ticket::NewTicket {
            subject: input.subject,
            customer_id: customer.id,
        })
        .await?;

    Ok(Json(api::Ticket {
        id: ticket.id,
        subject: ticket.subject,
        status: ticket.status,
        customer: customer.into(),
        assigned_to: None,
        cancellation_reason: ticket.cancellation_reason,
    }))
}

#[derive(Debug, From)]
pub enum AddTicketError {
    #[from]
    DbError(db::Error),
    CustomerNotFound,
}

impl IntoResponse for AddTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::CustomerNotFound => {
                error_body(StatusCode::NOT_FOUND, "Customer not found")
            }
        }
    }
}

async fn get_ticket(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::ticket::Id>,
) -> Result<Json<api::Ticket>, GetTicketError> {
    use GetTicketError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let ticket = db.get_ticket(id).await?.ok_or(E::TicketNotFound)?;
    let ticket = ticket_view(&db, ticket).await?;

    Ok(Json(ticket))
}

#[derive(Debug, From)]
pub enum GetTicketError {
    #[from]
    DbError(db::Error),
    TicketNotFound,
    #[from]
    View(TicketViewError),
}

impl IntoResponse for GetTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::TicketNotFound => {
                error_body(StatusCode::NOT_FOUND, "Ticket not found")
            }
            Self::View(e) => e.into_response(),
        }
    }
}

async fn list_ticket_notes(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::ticket::Id>,
) -> Result<Json<api::ticket::Notes>, ListTicketNotesError> {
    use ListTicketNotesError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let ticket = db.get_ticket(id).await?.ok_or(E::TicketNotFound)?;
    let notes = db.get_ticket_notes(ticket.id).await?;

    Ok(Json(api::ticket::Notes {
        notes: notes
            .into_iter()
            .map(|note| api::ticket::Note {
                id: note.id,
                author_id: note.author_id,
                content: note.content,
                is_internal: note.is_internal,
                created_at: note.created_at.unix_timestamp(),
            })
            .collect(),
    }))
}

#[derive(Debug, From)]
pub enum ListTicketNotesError {
    #[from]
    DbError(db::Error),
    TicketNotFound,
}

impl IntoResponse for ListTicketNotesError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::TicketNotFound => {
                error_body(StatusCode::NOT_FOUND, "Ticket not found")
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTicketPartInput {
    part_id: api::part::Id,
    quantity: usize,
}

async fn add_ticket_part(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::ticket::Id>,
    Json(input): Json<AddTicketPartInput>,
) -> Result<Json<api::Part>, TicketActionError> {
    use TicketActionError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let my = db
        .get_user(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;

    let part =
        engine::attach_part(&db, &my, id, input.part_id, input.quantity)
            .await?;

    Ok(Json(part.into()))
}

async fn ticket_action(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::ticket::Id>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<api::ticket::ActionOutcome>, TicketActionError> {
    use TicketActionError as E;

    let db = state.db_client.scoped(auth_claims.scope());
    let my = db
        .get_user(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;

    let action = engine::Action::parse(body)?;
    let outcome = engine::dispatch(&db, &my, id, action).await?;
    let ticket = ticket_view(&db, outcome.ticket).await?;

    Ok(Json(api::ticket::ActionOutcome {
        success: true,
        ticket,
        message: outcome.message,
    }))
}

#[derive(Debug, From)]
pub enum TicketActionError {
    #[from]
    DbError(db::Error),
    #[from]
    Engine(engine::Error),
    UserNotFound,
    #[from]
    View(TicketViewError),
}

impl IntoResponse for TicketActionError {
    fn into_response(self) -> Response {
        use engine::Error as EngineError;

        match self {
            Self::DbError(db::Error::NotFound) => {
                error_body(StatusCode::NOT_FOUND, "Ticket not found")
            }
            Self::DbError(e) => internal_error(e),
            Self::Engine(e) => match e {
                EngineError::Validation(message)
                | EngineError::Conflict(message) => {
                    error_body(StatusCode::BAD_REQUEST, &message)
                }
                EngineError::TicketNotFound
                | EngineError::Db(db::Error::NotFound) => {
                    error_body(StatusCode::NOT_FOUND, "Ticket not found")
                }
                EngineError::TechnicianNotFound => {
                    error_body(StatusCode::NOT_FOUND, "Technician not found")
                }
                EngineError::PartNotFound => {
                    error_body(StatusCode::NOT_FOUND, "Part not found")
                }
                EngineError::Db(e) => internal_error(e),
            },
            Self::UserNotFound => internal_error("authenticated user is gone"),
            Self::View(e) => e.into_response(),
        }
    }
}

/// Joins a ticket row with its customer and assignee views.
#[derive(Debug, From)]
pub enum TicketViewError {
    #[from]
    DbError(db::Error),
    CustomerNotFound(api::customer::Id),
    UserNotFound(api::user::Id),
}

impl IntoResponse for TicketViewError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(e) => internal_error(e),
            Self::CustomerNotFound(id) => {
                internal_error(format!("dangling customer reference {id}"))
            }
            Self::UserNotFound(id) => {
                internal_error(format!("dangling user reference {id}"))
            }
        }
    }
}

async fn ticket_view(
    db: &db::Scoped<'_>,
    ticket: db::Ticket,
) -> Result<api::Ticket, TicketViewError> {
    use TicketViewError as E;

    let customer = db
        .get_customer(ticket.customer_id)
        .await?
        .ok_or(E::CustomerNotFound(ticket.customer_id))?;
    let assigned_to =
        OptionFuture::from(ticket.assigned_to_id.map(|id| async move {
            db.get_user(id).await?.ok_or(E::UserNotFound(id))
        }))
        .map(Option::transpose)
        .await?;

    Ok(api::Ticket {
        id: ticket.id,
        subject: ticket.subject,
        status: ticket.status,
        customer: customer.into(),
        assigned_to: assigned_to.map(Into::into),
        cancellation_reason: ticket.cancellation_reason,
    })
}

type SharedAppState = Arc<AppState>;

struct AppState {
    db_client: db::Client,

    jwt_expiration_time: Duration,

    jwt_decoding_key: DecodingKey,

    jwt_encoding_key: EncodingKey,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct AuthClaims {
    user_id: api::user::Id,
    tenant_id: db::tenant::Id,
    exp: i64,
}

impl AuthClaims {
    fn scope(&self) -> db::Scope {
        db::Scope {
            tenant_id: self.tenant_id,
            actor_id: self.user_id,
        }
    }
}

#[async_trait]
impl FromRequestParts<SharedAppState> for AuthClaims {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &SharedAppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::InvalidToken)?;
        let token_data = decode::<Self>(
            bearer.token(),
            &state.jwt_decoding_key,
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        Ok(token_data.claims)
    }
}
