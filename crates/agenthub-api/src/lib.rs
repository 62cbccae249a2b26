//! agenthub-api
//!
//! The HTTP surface of the control plane: auth resolution, idempotency
//! enforcement, the single error→HTTP mapping boundary, and every `/v1`
//! route. Domain logic stays in the engine crates; handlers translate DTOs
//! and sequence the interlocks (resolve → reserve → policy → breaker →
//! engine → complete).

pub mod auth;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod routes;
pub mod state;
pub mod types;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use config::{AccessMode, RuntimeConfig};
pub use state::AppState;

/// Build the full `/v1` router. Routes that authenticate carry the auth
/// middleware; the diagnostics and contract endpoints are public.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/v1/diagnostics/config", get(routes::diagnostics::config_report))
        .route("/v1/delegations/contract", get(routes::delegations::contract));

    let protected = Router::new()
        // Identity
        .route("/v1/identity/agents", post(routes::identity::create_agent))
        .route("/v1/identity/agents/:id", get(routes::identity::get_agent))
        .route(
            "/v1/identity/agents/:id/credentials",
            post(routes::identity::create_credential),
        )
        .route(
            "/v1/identity/credentials/:id/rotate",
            post(routes::identity::rotate_credential),
        )
        .route(
            "/v1/identity/credentials/:id/revoke",
            post(routes::identity::revoke_credential),
        )
        .route(
            "/v1/identity/agents/:id/revoke",
            post(routes::identity::revoke_agent),
        )
        .route(
            "/v1/identity/revocations/bulk",
            post(routes::identity::revoke_bulk),
        )
        .route(
            "/v1/identity/revocations",
            get(routes::identity::list_revocations),
        )
        // Delegation tokens
        .route(
            "/v1/identity/delegation-tokens",
            post(routes::tokens::issue_token),
        )
        .route(
            "/v1/identity/delegation-tokens/verify",
            post(routes::tokens::verify_token),
        )
        .route(
            "/v1/identity/delegation-tokens/:id/chain",
            get(routes::tokens::token_chain),
        )
        // Federation trust registry
        .route(
            "/v1/identity/trust-registry/domains",
            post(routes::federation::register_domain)
                .get(routes::federation::list_domains),
        )
        .route(
            "/v1/identity/agents/:id/attest",
            post(routes::federation::attest_agent),
        )
        .route(
            "/v1/identity/attestations/:id/verify",
            get(routes::federation::verify_attestation),
        )
        // Delegation lifecycle
        .route("/v1/delegations", post(routes::delegations::create_delegation))
        .route(
            "/v1/delegations/:id/status",
            get(routes::delegations::delegation_status),
        )
        // Budget governance
        .route("/v1/budget/events", post(routes::budget::record_event))
        .route("/v1/budget/:token_id", get(routes::budget::evaluate))
        // Reliability
        .route(
            "/v1/reliability/slo-dashboard",
            get(routes::reliability::slo_dashboard),
        )
        .route(
            "/v1/reliability/breaker/reset",
            post(routes::reliability::reset_breaker),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    public.merge(protected).layer(cors).with_state(state)
}
