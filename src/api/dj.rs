//! DJ livestream takeover endpoints.
//!
//! Authentication happens upstream; the DJ id in the request body is
//! trusted here.

use actix_web::{HttpResponse, Responder, post, web};

use crate::models::{DjActionResponse, DjStartRequest, DjStopRequest};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/dj/start",
    request_body = DjStartRequest,
    responses(
        (status = 200, description = "Broadcast started", body = DjActionResponse),
        (status = 409, description = "Another DJ is already live", body = DjActionResponse)
    )
)]
#[post("/dj/start")]
/// Take over the live channel. Fails when someone is already streaming.
pub async fn dj_start(
    state: web::Data<AppState>,
    body: web::Json<DjStartRequest>,
) -> impl Responder {
    let Ok(mut live) = state.live.lock() else {
        return HttpResponse::InternalServerError().finish();
    };
    if live.start(&body.dj) {
        tracing::info!(dj = %body.dj, channel = %live.channel, "live broadcast started");
        HttpResponse::Ok().json(DjActionResponse {
            ok: true,
            message: "stream started, you can connect to icecast now".to_string(),
        })
    } else {
        HttpResponse::Conflict().json(DjActionResponse {
            ok: false,
            message: "someone else is already streaming".to_string(),
        })
    }
}

#[utoipa::path(
    post,
    path = "/dj/stop",
    request_body = DjStopRequest,
    responses(
        (status = 200, description = "Broadcast stopped", body = DjActionResponse),
        (status = 403, description = "Caller is not the broadcasting DJ", body = DjActionResponse)
    )
)]
#[post("/dj/stop")]
/// End a live broadcast. Allowed for the broadcasting DJ or an admin.
pub async fn dj_stop(
    state: web::Data<AppState>,
    body: web::Json<DjStopRequest>,
) -> impl Responder {
    let Ok(mut live) = state.live.lock() else {
        return HttpResponse::InternalServerError().finish();
    };
    if live.stop(&body.dj, body.admin) {
        tracing::info!(dj = %body.dj, "live broadcast stopped");
        HttpResponse::Ok().json(DjActionResponse {
            ok: true,
            message: "stream ended".to_string(),
        })
    } else {
        HttpResponse::Forbidden().json(DjActionResponse {
            ok: false,
            message: "you are not streaming".to_string(),
        })
    }
}
