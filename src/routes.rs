use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{self, AppState};
use crate::auth::{api_key_middleware, internal_secret_middleware};
use crate::rate_limit::rate_limit_middleware;
use crate::usage::usage_middleware;

/// Assemble the full router: public health probe, the tenant plane behind
/// auth -> rate limit -> usage accounting, and the internal plane behind the
/// shared secret.
pub fn create_router(state: AppState, internal_secret: String) -> Router {
    let public = Router::new().route("/health", get(api::health_check));

    let tenant_plane = Router::new()
        .route("/scores", post(api::update_score))
        .route("/scores/batch-update", post(api::batch_update_scores))
        .route("/leaderboards", post(api::create_leaderboard))
        .route("/leaderboards", get(api::list_leaderboards))
        .route("/leaderboards/:id", get(api::get_leaderboard))
        .route("/leaderboards/:id", put(api::update_leaderboard))
        .route("/leaderboards/:id", delete(api::delete_leaderboard))
        .route("/leaderboards/:id/top", get(api::get_top))
        .route("/leaderboards/:id/rank/:user_id", get(api::get_rank))
        .route("/leaderboards/:id/seasons", post(api::create_season))
        .route("/leaderboards/:id/seasons", get(api::list_seasons))
        .route("/seasons/:id", patch(api::update_season))
        .route("/seasons/:id", delete(api::delete_season))
        .layer(
            // Executes top-down: authenticate, then rate limit, then account.
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(
                    state.auth.clone(),
                    api_key_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.limiter.clone(),
                    rate_limit_middleware,
                ))
                .layer(middleware::from_fn_with_state(
                    state.usage.clone(),
                    usage_middleware,
                )),
        );

    let internal_plane = Router::new()
        .route("/tenants", post(api::create_tenant))
        .route("/tenants/:id", delete(api::delete_tenant))
        .route("/projects", post(api::create_project))
        .route("/api-keys", post(api::create_api_key))
        .route("/api-keys/project/:id", get(api::list_api_keys))
        .route("/api-keys/:id/rotate", post(api::rotate_api_key))
        .route("/api-keys/:id", delete(api::revoke_api_key))
        .route("/validate", post(api::validate_api_key))
        .route("/subscriptions", post(api::create_subscription))
        .route("/subscriptions/tenant/:id", get(api::get_tenant_subscription))
        .route("/subscriptions/:id/cancel", patch(api::cancel_subscription))
        .route("/subscriptions/:id/usage-check", get(api::usage_check))
        .route("/usage/record", post(api::record_usage))
        .route("/usage/tenant/:id", get(api::get_tenant_usage))
        .layer(middleware::from_fn_with_state(
            internal_secret,
            internal_secret_middleware,
        ));

    public
        .merge(tenant_plane)
        .merge(internal_plane)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}
