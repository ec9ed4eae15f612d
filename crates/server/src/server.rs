use axum::{
    Extension, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use subtle::ConstantTimeEq;

use std::{collections::HashSet, sync::Arc};

use crate::{WebhookVerifier, accounts, admin, items, rules, transactions, webhook};
use engine::{Engine, users};

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub db: DatabaseConnection,
    pub webhook: Arc<dyn WebhookVerifier>,
    /// Usernames allowed on `/admin/*`.
    pub admins: Arc<HashSet<String>>,
}

impl ServerState {
    pub fn new(
        engine: Engine,
        db: DatabaseConnection,
        webhook: Arc<dyn WebhookVerifier>,
        admins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            db,
            webhook,
            admins: Arc::new(admins.into_iter().collect()),
        }
    }
}

async fn auth(
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(TypedHeader(auth_header)) = auth_header else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if auth_header.username().is_empty() || auth_header.password().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user = users::Entity::find()
        .filter(users::Column::Username.eq(auth_header.username()))
        .one(&state.db)
        .await
        .map_err(|err| {
            tracing::error!("failed to load user: {err}");
            StatusCode::UNAUTHORIZED
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let password_matches: bool = user
        .password
        .as_bytes()
        .ct_eq(auth_header.password().as_bytes())
        .into();
    if !password_matches {
        return Err(StatusCode::UNAUTHORIZED);
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn require_admin(
    Extension(user): Extension<users::Model>,
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.admins.contains(&user.username) {
        tracing::warn!(user_id = user.id, "admin route refused");
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(request).await)
}

pub fn router(state: ServerState) -> Router {
    let admin = Router::new()
        .route("/admin/sync", post(admin::sync_all))
        .route("/admin/recategorize", post(admin::recategorize))
        .route("/admin/cache/{domain}/clear", post(admin::clear_cache))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let authenticated = Router::new()
        .route("/items", get(items::list))
        .route("/items/link-token", post(items::link_token))
        .route("/items/exchange", post(items::exchange))
        .route("/items/{item_id}", axum::routing::delete(items::unlink))
        .route("/items/{item_id}/accounts", get(accounts::list))
        .route("/items/{item_id}/sync", post(items::sync))
        .route(
            "/accounts/{account_id}/transactions",
            get(transactions::list),
        )
        .route(
            "/transactions/{id}",
            axum::routing::patch(transactions::update).delete(transactions::delete),
        )
        .route("/rules", get(rules::list).post(rules::create))
        .route("/rules/apply", post(rules::apply))
        .route(
            "/rules/{rule_id}",
            get(rules::get).put(rules::update).delete(rules::delete),
        )
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    Router::new()
        .route("/webhook", post(webhook::receive))
        .merge(authenticated)
        .with_state(state)
}

pub async fn run(state: ServerState, bind: &str) {
    let listener = match tokio::net::TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind server listener on {bind}: {err}");
            return;
        }
    };
    if let Err(err) = run_with_listener(state, listener).await {
        tracing::error!("server failed: {err}");
    }
}

pub async fn run_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state)).await
}
