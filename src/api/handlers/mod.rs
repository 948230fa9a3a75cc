//! REST endpoint handlers organized by resource.

pub mod report;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new().merge(report::routes(state))
}
