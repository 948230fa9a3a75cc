//! REST API layer: route handlers, middleware, DTOs, and router composition.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod openapi;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints, bound to
/// `state`.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(handlers::routes(&state))
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
    };

    router.with_state(state)
}
