//! Channel status endpoint.

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, Responder, get, web};

use crate::state::{AppState, CachedStatus};

#[utoipa::path(
    get,
    path = "/playlist/{channel}.json",
    params(
        ("channel" = String, Path, description = "Channel id")
    ),
    responses(
        (status = 200, description = "Latest cached status for the channel", body = crate::models::ChannelPayload),
        (status = 404, description = "Unknown channel"),
        (status = 500, description = "Most recent poll failed")
    )
)]
#[get("/playlist/{channel}.json")]
/// Serve the last-written cache entry for a channel. Never waits on the
/// player or the streaming server.
pub async fn channel_playlist(
    req: HttpRequest,
    state: web::Data<AppState>,
    channel: web::Path<String>,
) -> impl Responder {
    let id = channel.into_inner();
    let Some(ch) = state.channel(&id) else {
        return not_found_page(&req, &state);
    };

    match ch.read() {
        CachedStatus::Ok { payload, .. } => HttpResponse::Ok().json(payload),
        CachedStatus::Unavailable { reason, code, .. } => {
            let status =
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status).body(reason)
        }
    }
}

/// Serve the site's 404 page, or a plain 404 when it is missing.
pub fn not_found_page(req: &HttpRequest, state: &AppState) -> HttpResponse {
    match actix_files::NamedFile::open(state.http_dir.join("404.html")) {
        Ok(file) => {
            let mut resp = file.into_response(req);
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
        Err(_) => HttpResponse::NotFound().body("not found"),
    }
}
