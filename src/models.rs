//! API models and OpenAPI schemas.
//!
//! Defines the JSON shapes served for channel status, livestream state,
//! and DJ actions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A sanitized track record: the artist, albumartist, album, track,
/// time, date and title fields from the player, with everything else
/// (file paths, queue ids) dropped. Fields missing from the player's
/// report are absent from the JSON rather than null.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TrackInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub albumartist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl TrackInfo {
    /// Build a track record from a raw player field map, keeping exactly
    /// the intersection with the allow-list.
    pub fn sanitized(fields: &HashMap<String, String>) -> Self {
        let pick = |key: &str| fields.get(key).cloned();
        Self {
            artist: pick("artist"),
            albumartist: pick("albumartist"),
            album: pick("album"),
            track: pick("track"),
            time: pick("time"),
            date: pick("date"),
            title: pick("title"),
        }
    }
}

/// A historical livestream track with its approximated play time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecentTrack {
    pub artist: String,
    pub title: String,
    /// Seconds between this track's detection and its successor's.
    pub time: f64,
}

/// Per-channel listener counts from the metrics backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListenerStats {
    /// Peak listeners over the trailing window.
    pub peak: u64,
    /// Listeners right now.
    pub current: u64,
}

impl ListenerStats {
    /// Degraded value when the metrics backend is unreachable: at least
    /// the polling process counts as one listener.
    pub fn fallback() -> Self {
        Self {
            peak: 1,
            current: 1,
        }
    }
}

/// Listener count reported by the streaming server for a live broadcast.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct LiveListeners {
    pub current: u64,
}

/// Broadcast info attached to every channel payload.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StreamData {
    pub live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dj_name: Option<String>,
}

impl StreamData {
    pub fn offline() -> Self {
        Self {
            live: false,
            dj_name: None,
        }
    }
}

/// Status payload for a channel playing from its normal queue.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PlaylistResponse {
    /// Up to five previously played tracks, oldest first.
    pub before: Vec<TrackInfo>,
    pub current: TrackInfo,
    /// Up to five upcoming tracks, nearest first.
    pub after: Vec<TrackInfo>,
    /// Seconds into the current track.
    pub elapsed: i64,
    pub stream_data: StreamData,
    pub listeners: ListenerStats,
}

/// Current-track metadata for a live broadcast.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LiveTrack {
    pub artist: String,
    pub title: String,
    pub album: String,
}

/// Status payload for a channel under live-broadcast takeover.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LiveResponse {
    /// Recently played tracks, most recent first. Times are approximated
    /// from detection intervals since exact lengths are unknown.
    pub before: Vec<RecentTrack>,
    pub current: LiveTrack,
    /// Seconds into the current track. May briefly be negative around a
    /// track change because detection times include the stream delay.
    pub elapsed: i64,
    pub stream_data: StreamData,
    pub listeners: LiveListeners,
}

/// Either payload shape served from `/playlist/{channel}.json`.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ChannelPayload {
    Playlist(PlaylistResponse),
    Live(LiveResponse),
}

/// Request body for `/dj/start`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DjStartRequest {
    /// DJ identifier (authenticated upstream).
    pub dj: String,
}

/// Request body for `/dj/stop`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DjStopRequest {
    /// DJ identifier (authenticated upstream).
    pub dj: String,
    /// Admins may stop any broadcast.
    #[serde(default)]
    pub admin: bool,
}

/// Outcome of a DJ action.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DjActionResponse {
    pub ok: bool,
    pub message: String,
}
