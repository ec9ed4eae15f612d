use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::EngineError;

use serde::Serialize;
pub use server::{ServerState, router, run, run_with_listener};
pub use webhook::{SharedSecretVerifier, WebhookVerifier};

mod accounts;
mod admin;
mod items;
mod rules;
mod server;
mod transactions;
mod webhook;

pub mod types {
    pub mod item {
        pub use api_types::item::{ExchangeToken, ItemList, ItemView, LinkTokenView};
    }

    pub mod account {
        pub use api_types::account::{AccountList, AccountView};
    }

    pub mod transaction {
        pub use api_types::transaction::{TransactionList, TransactionUpdate, TransactionView};
    }

    pub mod rule {
        pub use api_types::rule::{CategoryChangeView, RuleList, RuleNew, RuleRun, RuleView};
    }

    pub mod sync {
        pub use api_types::sync::{ItemSync, Recategorized, SyncAll, SyncCounts};
    }

    pub mod webhook {
        pub use api_types::webhook::{Webhook, WebhookAck};
    }
}

pub enum ServerError {
    Engine(EngineError),
    Unauthorized,
    Generic(String),
}

#[derive(Serialize)]
struct Error {
    error: String,
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::ExistingKey(_) | EngineError::SyncConflict(_) => StatusCode::CONFLICT,
        EngineError::Aggregator(_) => StatusCode::BAD_GATEWAY,
        EngineError::Database(_) | EngineError::InvalidConfig(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        EngineError::InvalidName(_)
        | EngineError::InvalidCondition(_)
        | EngineError::InvalidCacheDomain(_)
        | EngineError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn message_for_engine_error(err: EngineError) -> String {
    match err {
        EngineError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        EngineError::InvalidConfig(msg) => {
            tracing::error!("configuration error: {msg}");
            "internal server error".to_string()
        }
        EngineError::Aggregator(agg_err) => {
            tracing::warn!("aggregator error: {agg_err}");
            "upstream aggregator error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ServerError::Engine(err) => (status_for_engine_error(&err), message_for_engine_error(err)),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ServerError::Generic(err) => (StatusCode::BAD_REQUEST, err),
        };

        (status, Json(Error { error })).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}
