use utoipa::OpenApi;

use crate::api;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::playlist::channel_playlist,
        api::dj::dj_start,
        api::dj::dj_stop,
        api::metrics::listener_metrics,
        api::health::health,
    ),
    components(
        schemas(
            models::ChannelPayload,
            models::PlaylistResponse,
            models::LiveResponse,
            models::TrackInfo,
            models::LiveTrack,
            models::RecentTrack,
            models::StreamData,
            models::ListenerStats,
            models::LiveListeners,
            models::DjStartRequest,
            models::DjStopRequest,
            models::DjActionResponse,
            api::health::HealthResponse,
        )
    ),
    tags(
        (name = "radio-hub-server", description = "Radio station backend API")
    )
)]
pub struct ApiDoc;
