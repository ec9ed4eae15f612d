//! Aggregator webhook receiver.
//!
//! The route is outside Basic auth; every request goes through the
//! configured [`WebhookVerifier`] first. An accepted transactions event
//! schedules a background sync of the item and returns immediately.

use api_types::webhook::{Webhook, WebhookAck};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use engine::WebhookOutcome;
use subtle::ConstantTimeEq;

use crate::{ServerError, server::ServerState};

pub const VERIFICATION_HEADER: &str = "plaid-verification";

/// Authenticates an inbound webhook request.
pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> bool;
}

/// Accepts requests whose `plaid-verification` header equals a shared
/// secret. An empty secret accepts nothing.
#[derive(Clone)]
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SharedSecretVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretVerifier").finish_non_exhaustive()
    }
}

impl WebhookVerifier for SharedSecretVerifier {
    fn verify(&self, headers: &HeaderMap, _body: &[u8]) -> bool {
        if self.secret.is_empty() {
            return false;
        }
        let Some(provided) = headers
            .get(VERIFICATION_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return false;
        };

        let expected = self.secret.as_bytes();
        let provided = provided.as_bytes();
        if expected.len() != provided.len() {
            return false;
        }
        expected.ct_eq(provided).into()
    }
}

pub async fn receive(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServerError> {
    if !state.webhook.verify(&headers, &body) {
        tracing::warn!("webhook rejected by verifier");
        return Err(ServerError::Unauthorized);
    }

    let payload: Webhook = serde_json::from_slice(&body)
        .map_err(|err| ServerError::Generic(format!("invalid webhook body: {err}")))?;

    let outcome = state
        .engine
        .handle_webhook(
            &payload.webhook_type,
            &payload.webhook_code,
            &payload.item_id,
        )
        .await?;

    let sync_scheduled = match outcome {
        WebhookOutcome::Ignored => false,
        WebhookOutcome::SyncRequested { item_id } => {
            let _ = state.engine.spawn_sync(item_id);
            true
        }
    };

    Ok(Json(WebhookAck {
        received: true,
        sync_scheduled,
    }))
}
