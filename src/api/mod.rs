// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::flows::EncryptedEnvelope;
use crate::state::{AppState, FlowKind};

pub mod flows;
pub mod health;

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/flows/{flow}", post(flows::flow_exchange))
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(flows::flow_exchange, health::health, health::liveness),
    components(
        schemas(
            EncryptedEnvelope,
            FlowKind,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Flows", description = "Encrypted WhatsApp Flow data exchange"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
