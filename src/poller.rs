//! Fixed-interval channel status poller.
//!
//! One background thread refreshes every channel's cache each tick:
//! from the player for queued channels, or from the streaming server's
//! status document (at a reduced rate) for the live-broadcast channel.
//! Failures are isolated per channel and surfaced only through that
//! channel's cache entry. Player connections live on this thread and
//! are never shared.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use actix_web::web;

use crate::config::InfluxDbConfig;
use crate::history::{LiveBroadcastState, unix_now};
use crate::icecast::{self, Source};
use crate::listeners::{self, ListenerStatsClient};
use crate::models::{
    ChannelPayload, ListenerStats, LiveListeners, LiveResponse, LiveTrack, PlaylistResponse,
    StreamData,
};
use crate::player::ChannelPlayer;
use crate::state::{AppState, CachedStatus, ChannelState, PLAYER_UNAVAILABLE, STREAM_UNAVAILABLE};

const WINDOW_BEFORE: usize = 5;
const WINDOW_AFTER: usize = 5;

/// The live channel refreshes once per this many of its ticks; hitting
/// the status endpoint every second buys nothing for a web-facing cache.
const LIVE_REFRESH_TICKS: u32 = 5;
const LIVE_REFRESH_PHASE: u32 = 1;

/// The Prometheus snapshot refreshes on this tick cadence.
const METRICS_REFRESH_TICKS: u32 = 30;

/// Poller settings resolved at startup.
pub struct PollerConfig {
    /// Streaming-server status document URL.
    pub status_url: String,
    /// Metrics backend, when configured.
    pub influxdb: Option<InfluxDbConfig>,
    /// Tick interval.
    pub interval: Duration,
}

/// Handle for the running poller. Dropping it does not stop the thread;
/// call [`PollerHandle::stop`] during shutdown, before the livestream
/// snapshot is persisted.
pub struct PollerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Stop scheduling ticks and wait for any in-flight tick to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn the poller thread.
pub fn spawn_status_poller(state: web::Data<AppState>, cfg: PollerConfig) -> PollerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let thread = std::thread::spawn(move || run(state, cfg, stop_flag));
    tracing::info!("status poller started");
    PollerHandle {
        stop,
        thread: Some(thread),
    }
}

fn run(state: web::Data<AppState>, cfg: PollerConfig, stop: Arc<AtomicBool>) {
    let mut players: HashMap<String, ChannelPlayer> = state
        .channels
        .iter()
        .map(|ch| (ch.config.id.clone(), ChannelPlayer::new(&ch.config)))
        .collect();
    let stats_client = cfg.influxdb.as_ref().map(ListenerStatsClient::new);
    let mut live_counter: u32 = 0;
    let mut metrics_counter: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        tick(
            &state,
            &cfg,
            &mut players,
            stats_client.as_ref(),
            &mut live_counter,
            &mut metrics_counter,
        );
        // A slow tick starts the next one immediately instead of drifting.
        if let Some(remaining) = cfg.interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
    tracing::info!("status poller stopped");
}

fn tick(
    state: &AppState,
    cfg: &PollerConfig,
    players: &mut HashMap<String, ChannelPlayer>,
    stats_client: Option<&ListenerStatsClient>,
    live_counter: &mut u32,
    metrics_counter: &mut u32,
) {
    // Listener stats are batched once per tick across all channels.
    let channel_ids: Vec<String> = state
        .channels
        .iter()
        .map(|ch| ch.config.id.clone())
        .collect();
    let stats = stats_client
        .map(|client| client.fetch_all(&channel_ids))
        .unwrap_or_default();

    if *metrics_counter == 0 {
        refresh_metrics(state, &cfg.status_url);
    }
    *metrics_counter = (*metrics_counter + 1) % METRICS_REFRESH_TICKS;

    for ch in &state.channels {
        let live_now = state
            .live
            .lock()
            .map(|live| live.active && live.channel == ch.config.id)
            .unwrap_or(false);

        if live_now {
            if live_refresh_due(live_counter) {
                refresh_live_channel(state, &cfg.status_url, ch);
            }
            continue;
        }

        if let Some(player) = players.get_mut(&ch.config.id) {
            refresh_player_channel(ch, player, stats.get(&ch.config.id).copied());
        }
    }
}

/// Advance the live throttle counter; true on the refresh phase.
fn live_refresh_due(counter: &mut u32) -> bool {
    *counter = (*counter + 1) % LIVE_REFRESH_TICKS;
    *counter == LIVE_REFRESH_PHASE
}

fn refresh_player_channel(
    ch: &ChannelState,
    player: &mut ChannelPlayer,
    stats: Option<ListenerStats>,
) {
    if let Err(e) = player.ensure_connected() {
        tracing::warn!(channel = %ch.config.id, error = %e, "player unreachable");
        ch.write(CachedStatus::unavailable(PLAYER_UNAVAILABLE));
        return;
    }

    match player.playlist_window(WINDOW_BEFORE, WINDOW_AFTER) {
        Ok(window) => {
            let payload = ChannelPayload::Playlist(PlaylistResponse {
                before: window.before,
                current: window.current,
                after: window.after,
                elapsed: window.elapsed,
                stream_data: StreamData::offline(),
                listeners: stats.unwrap_or_else(ListenerStats::fallback),
            });
            ch.write(CachedStatus::ok(payload));
        }
        Err(e) => {
            tracing::warn!(channel = %ch.config.id, error = %e, "playlist fetch failed");
            // The exchange may have left the protocol desynced.
            player.disconnect();
            ch.write(CachedStatus::unavailable(PLAYER_UNAVAILABLE));
        }
    }
}

fn refresh_live_channel(state: &AppState, status_url: &str, ch: &ChannelState) {
    let doc = match icecast::fetch_status(status_url) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(channel = %ch.config.id, error = %e, "stream status unreachable");
            ch.write(CachedStatus::unavailable(STREAM_UNAVAILABLE));
            return;
        }
    };

    let source = icecast::find_live_source(&doc, &ch.config.id);
    let now = unix_now();
    let payload = match state.live.lock() {
        Ok(mut live) => build_live_payload(&mut live, source, &state.livestream.album_title, now),
        Err(_) => return,
    };
    ch.write(CachedStatus::ok(ChannelPayload::Live(payload)));
}

/// Fold one detected stream state into the broadcast history and render
/// the live payload. When no source matches yet, the placeholder
/// metadata is still recorded so elapsed timing starts at connect.
fn build_live_payload(
    live: &mut LiveBroadcastState,
    source: Option<&Source>,
    album_fallback: &str,
    now: f64,
) -> LiveResponse {
    let mut artist = String::new();
    let mut title = String::new();
    let mut album = album_fallback.to_string();
    let mut current_listeners = 0u64;

    if let Some(source) = source {
        if let Some(a) = source.artist.as_deref() {
            artist = a.trim().to_string();
        }
        if let Some(t) = source.title.as_deref() {
            title = t.trim().to_string();
        }
        if let Some(al) = source.album.as_deref() {
            album = al.trim().to_string();
        }
        if let Some(listeners) = source.listeners.as_ref() {
            current_listeners = listeners.value();
        }
    }

    live.record(&artist, &title, now);

    LiveResponse {
        before: live.before_list(),
        current: LiveTrack {
            artist,
            title,
            album,
        },
        elapsed: live.elapsed(now),
        stream_data: StreamData {
            live: live.active,
            dj_name: live.current_dj.clone(),
        },
        listeners: LiveListeners {
            current: current_listeners,
        },
    }
}

fn refresh_metrics(state: &AppState, status_url: &str) {
    match icecast::fetch_status(status_url) {
        Ok(doc) => {
            let text = listeners::exposition(&icecast::listener_snapshot(&doc));
            if let Ok(mut cached) = state.metrics_text.lock() {
                *cached = text;
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "metrics snapshot fetch failed; keeping previous text");
        }
    }
}
