//! Identity webhook intake
//!
//! The identity provider posts organization, user and membership events to
//! `POST /webhooks/identity`; each one is applied through the
//! [`IdentityResolver`]. `GET /health` answers for load balancers.

use crate::core::error::{EvergreenError, EvergreenResult, ValidationError};
use crate::core::identity_resolver::{IdentityEvent, IdentityResolver};
use crate::core::store::IdentityStore;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared state of the webhook handlers
pub struct AppState<S> {
    pub resolver: IdentityResolver<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

/// Build the webhook router around a resolver
pub fn router<S>(resolver: IdentityResolver<S>) -> Router
where
    S: IdentityStore + 'static,
{
    Router::new()
        .route("/webhooks/identity", post(identity_webhook::<S>))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { resolver })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Parse and apply one event
///
/// The body is decoded here rather than by the `Json<IdentityEvent>`
/// extractor so a malformed event gets the same error body as every other
/// failure.
async fn identity_webhook<S>(State(state): State<AppState<S>>, Json(body): Json<Value>) -> Response
where
    S: IdentityStore + 'static,
{
    let event: IdentityEvent = match serde_json::from_value(body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed identity event");
            return EvergreenError::from(ValidationError::InvalidEvent {
                message: e.to_string(),
            })
            .into_response();
        }
    };

    let kind = event_kind(&event);
    match state.resolver.handle_event(event).await {
        Ok(()) => {
            tracing::info!(event = kind, "Applied identity event");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            tracing::warn!(event = kind, code = e.error_code(), error = %e, "Identity event failed");
            e.into_response()
        }
    }
}

fn event_kind(event: &IdentityEvent) -> &'static str {
    match event {
        IdentityEvent::OrganizationCreated { .. } => "organization.created",
        IdentityEvent::UserCreated(_) => "user.created",
        IdentityEvent::UserUpdated(_) => "user.updated",
        IdentityEvent::MembershipCreated { .. } => "organizationMembership.created",
    }
}

/// Serve the router with graceful shutdown on Ctrl+C or SIGTERM
pub async fn serve(app: Router, addr: &str) -> EvergreenResult<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Identity webhook listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
