//! Listener metrics endpoint.

use actix_web::{HttpResponse, Responder, get, web};

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus exposition text", content_type = "text/plain")
    )
)]
#[get("/metrics")]
/// Serve the cached listener gauges. The poller refreshes the text on
/// its own cadence.
pub async fn listener_metrics(state: web::Data<AppState>) -> impl Responder {
    let text = state
        .metrics_text
        .lock()
        .map(|t| t.clone())
        .unwrap_or_default();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(text)
}
