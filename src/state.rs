//! Shared application state.
//!
//! Owns the per-channel status cache, the live-broadcast state, and the
//! cached metrics text. Injected into both the actix handlers and the
//! poller thread; there are no ambient globals.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::config::{ChannelConfigResolved, LivestreamSettings};
use crate::history::LiveBroadcastState;
use crate::models::ChannelPayload;

/// Cache entry before the first poll tick completes.
pub const NOT_CONNECTED_YET: &str = "Not connected to player yet.";
/// Player unreachable during the most recent tick.
pub const PLAYER_UNAVAILABLE: &str = "Could not connect to player.";
/// Streaming-server status unreachable during the most recent tick.
pub const STREAM_UNAVAILABLE: &str = "Could not connect to stream.";

/// Last-known status for a channel. Readers always get whatever the most
/// recent poll wrote; staleness is not an error, only a failed poll is.
#[derive(Clone, Debug)]
pub enum CachedStatus {
    Ok {
        payload: ChannelPayload,
        refreshed: SystemTime,
    },
    Unavailable {
        reason: &'static str,
        code: u16,
        refreshed: SystemTime,
    },
}

impl CachedStatus {
    pub fn unavailable(reason: &'static str) -> Self {
        CachedStatus::Unavailable {
            reason,
            code: 500,
            refreshed: SystemTime::now(),
        }
    }

    pub fn ok(payload: ChannelPayload) -> Self {
        CachedStatus::Ok {
            payload,
            refreshed: SystemTime::now(),
        }
    }
}

/// One channel's config and cache entry. The poller is the only writer;
/// request handlers only read.
pub struct ChannelState {
    pub config: ChannelConfigResolved,
    cache: Mutex<CachedStatus>,
}

impl ChannelState {
    pub fn new(config: ChannelConfigResolved) -> Self {
        Self {
            config,
            cache: Mutex::new(CachedStatus::unavailable(NOT_CONNECTED_YET)),
        }
    }

    /// Read the latest snapshot without blocking on any I/O.
    pub fn read(&self) -> CachedStatus {
        match self.cache.lock() {
            Ok(cache) => cache.clone(),
            Err(_) => CachedStatus::unavailable(NOT_CONNECTED_YET),
        }
    }

    /// Replace the snapshot. Last write wins; there is no merging.
    pub fn write(&self, status: CachedStatus) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = status;
        }
    }
}

/// Shared state for actix handlers and the poller thread.
pub struct AppState {
    /// Configured channels in config order.
    pub channels: Vec<ChannelState>,
    /// Live-broadcast takeover state, mutated by the poller (track
    /// history) and the DJ handlers (start/stop) under this one lock.
    pub live: Mutex<LiveBroadcastState>,
    /// Resolved live-broadcast settings.
    pub livestream: LivestreamSettings,
    /// Cached Prometheus exposition text, refreshed by the poller.
    pub metrics_text: Mutex<String>,
    /// Static site directory, also home of the 404 page.
    pub http_dir: PathBuf,
}

impl AppState {
    pub fn new(
        channels: Vec<ChannelConfigResolved>,
        live: LiveBroadcastState,
        livestream: LivestreamSettings,
        http_dir: PathBuf,
    ) -> Self {
        Self {
            channels: channels.into_iter().map(ChannelState::new).collect(),
            live: Mutex::new(live),
            livestream,
            metrics_text: Mutex::new(crate::listeners::exposition(&[])),
            http_dir,
        }
    }

    pub fn channel(&self, id: &str) -> Option<&ChannelState> {
        self.channels.iter().find(|ch| ch.config.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListenerStats, PlaylistResponse, StreamData, TrackInfo};

    fn channel(id: &str) -> ChannelConfigResolved {
        ChannelConfigResolved {
            id: id.to_string(),
            mpd_host: "localhost".to_string(),
            mpd_port: 6600,
        }
    }

    fn settings() -> LivestreamSettings {
        LivestreamSettings {
            channel: "cyberia".to_string(),
            stream_delay_secs: 7,
            album_title: "live".to_string(),
        }
    }

    fn payload() -> ChannelPayload {
        ChannelPayload::Playlist(PlaylistResponse {
            before: Vec::new(),
            current: TrackInfo::default(),
            after: Vec::new(),
            elapsed: 0,
            stream_data: StreamData::offline(),
            listeners: ListenerStats::fallback(),
        })
    }

    #[test]
    fn cache_starts_not_connected() {
        let ch = ChannelState::new(channel("cyberia"));
        match ch.read() {
            CachedStatus::Unavailable { reason, code, .. } => {
                assert_eq!(reason, NOT_CONNECTED_YET);
                assert_eq!(code, 500);
            }
            CachedStatus::Ok { .. } => panic!("expected the initial sentinel"),
        }
    }

    #[test]
    fn cache_last_write_wins() {
        let ch = ChannelState::new(channel("cyberia"));
        ch.write(CachedStatus::ok(payload()));
        ch.write(CachedStatus::unavailable(PLAYER_UNAVAILABLE));
        match ch.read() {
            CachedStatus::Unavailable { reason, .. } => assert_eq!(reason, PLAYER_UNAVAILABLE),
            CachedStatus::Ok { .. } => panic!("expected the unavailable entry"),
        }
    }

    #[test]
    fn channels_resolve_by_id() {
        let state = AppState::new(
            vec![channel("cyberia"), channel("swing")],
            LiveBroadcastState::new(&settings()),
            settings(),
            PathBuf::from("/srv/http"),
        );
        assert!(state.channel("swing").is_some());
        assert!(state.channel("cafe").is_none());
    }
}
