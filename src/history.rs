//! Live-broadcast takeover state and track history.
//!
//! Tracks who is broadcasting, the recently played tracks detected from
//! the stream, and persists the whole structure across restarts.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::LivestreamSettings;
use crate::models::RecentTrack;

/// Five history entries plus the current track.
pub const MAX_RECENT_TRACKS: usize = 6;

/// On-disk snapshot schema version. The track shape has changed across
/// revisions, so mismatches start from an empty state instead of
/// misreading old data.
const SNAPSHOT_VERSION: u32 = 2;

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A track detected on the live stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LivestreamTrack {
    pub artist: String,
    pub title: String,
    /// Detection time (unix seconds) plus the stream delay, so elapsed
    /// values match what a listener hears.
    pub first_seen: f64,
}

/// Whether a DJ has taken over the live channel, and what has played.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveBroadcastState {
    pub active: bool,
    pub current_dj: Option<String>,
    /// Channel replaced by live broadcasts.
    pub channel: String,
    pub stream_delay_secs: u64,
    /// Detection-ordered history, capped at [`MAX_RECENT_TRACKS`]. The
    /// last entry is the current track.
    pub last_played: Vec<LivestreamTrack>,
}

impl LiveBroadcastState {
    pub fn new(settings: &LivestreamSettings) -> Self {
        Self {
            active: false,
            current_dj: None,
            channel: settings.channel.clone(),
            stream_delay_secs: settings.stream_delay_secs,
            last_played: Vec::new(),
        }
    }

    /// Record a detected track. Appends only when the title differs from
    /// the current last entry (exact string compare), then evicts the
    /// oldest entries past the cap.
    pub fn record(&mut self, artist: &str, title: &str, now: f64) {
        let same = self
            .last_played
            .last()
            .is_some_and(|last| last.title == title);
        if same {
            return;
        }
        self.last_played.push(LivestreamTrack {
            artist: artist.to_string(),
            title: title.to_string(),
            first_seen: now + self.stream_delay_secs as f64,
        });
        while self.last_played.len() > MAX_RECENT_TRACKS {
            self.last_played.remove(0);
        }
    }

    /// History excluding the current track, most recent first. Each
    /// entry's play time is approximated as the gap to its successor's
    /// detection, since exact track lengths for a live encode are
    /// unknown.
    pub fn before_list(&self) -> Vec<RecentTrack> {
        let mut before = Vec::new();
        if self.last_played.len() < 2 {
            return before;
        }
        for i in (0..self.last_played.len() - 1).rev() {
            let track = &self.last_played[i];
            let next = &self.last_played[i + 1];
            before.push(RecentTrack {
                artist: track.artist.clone(),
                title: track.title.clone(),
                time: next.first_seen - track.first_seen,
            });
        }
        before
    }

    /// Seconds into the current track. Briefly negative right after a
    /// track change because detection times include the stream delay.
    pub fn elapsed(&self, now: f64) -> i64 {
        self.last_played
            .last()
            .map(|last| (now - last.first_seen) as i64)
            .unwrap_or(0)
    }

    /// DJ takeover. Succeeds only when nobody is currently live.
    pub fn start(&mut self, dj: &str) -> bool {
        if self.current_dj.is_some() {
            return false;
        }
        self.active = true;
        self.current_dj = Some(dj.to_string());
        self.last_played.clear();
        true
    }

    /// End a takeover. Succeeds for the broadcasting DJ or an admin.
    pub fn stop(&mut self, dj: &str, is_admin: bool) -> bool {
        let owns = self.current_dj.as_deref() == Some(dj);
        if !owns && !is_admin {
            return false;
        }
        self.active = false;
        self.current_dj = None;
        self.last_played.clear();
        true
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    schema_version: u32,
    livestream: LiveBroadcastState,
}

/// Load the persisted broadcast state, falling back to an empty inactive
/// state when the file is missing, unreadable, or from another schema
/// version. The configured channel and stream delay always win over
/// whatever was persisted.
pub fn load_state(path: &Path, settings: &LivestreamSettings) -> LiveBroadcastState {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::info!(path = %path.display(), error = %e, "no livestream snapshot; starting fresh");
            return LiveBroadcastState::new(settings);
        }
    };
    let snapshot = match serde_json::from_str::<Snapshot>(&raw) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable livestream snapshot; starting fresh");
            return LiveBroadcastState::new(settings);
        }
    };
    if snapshot.schema_version != SNAPSHOT_VERSION {
        tracing::warn!(
            path = %path.display(),
            found = snapshot.schema_version,
            expected = SNAPSHOT_VERSION,
            "livestream snapshot from another schema version; starting fresh"
        );
        return LiveBroadcastState::new(settings);
    }
    let mut state = snapshot.livestream;
    state.channel = settings.channel.clone();
    state.stream_delay_secs = settings.stream_delay_secs;
    state
}

/// Persist the broadcast state. Called after the poller has stopped.
pub fn save_state(path: &Path, state: &LiveBroadcastState) -> Result<()> {
    let snapshot = Snapshot {
        schema_version: SNAPSHOT_VERSION,
        livestream: state.clone(),
    };
    let raw = serde_json::to_string_pretty(&snapshot).context("encode livestream snapshot")?;
    std::fs::write(path, raw).with_context(|| format!("write snapshot {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LivestreamSettings {
        LivestreamSettings {
            channel: "cyberia".to_string(),
            stream_delay_secs: 7,
            album_title: "live".to_string(),
        }
    }

    fn state() -> LiveBroadcastState {
        LiveBroadcastState::new(&settings())
    }

    #[test]
    fn record_dedups_consecutive_titles() {
        let mut s = state();
        s.record("dj", "Song A", 100.0);
        s.record("dj", "Song A", 101.0);
        s.record("dj", "Song B", 200.0);
        let titles: Vec<&str> = s.last_played.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Song A", "Song B"]);
    }

    #[test]
    fn record_is_case_sensitive() {
        let mut s = state();
        s.record("dj", "song a", 100.0);
        s.record("dj", "Song A", 101.0);
        assert_eq!(s.last_played.len(), 2);
    }

    #[test]
    fn record_evicts_oldest_past_cap() {
        let mut s = state();
        for i in 0..9 {
            s.record("dj", &format!("track {i}"), i as f64 * 100.0);
        }
        assert_eq!(s.last_played.len(), MAX_RECENT_TRACKS);
        assert_eq!(s.last_played[0].title, "track 3");
        assert_eq!(s.last_played.last().unwrap().title, "track 8");
    }

    #[test]
    fn record_applies_stream_delay() {
        let mut s = state();
        s.record("dj", "Song A", 100.0);
        assert_eq!(s.last_played[0].first_seen, 107.0);
    }

    #[test]
    fn before_list_pairs_entries_reverse_chronological() {
        let mut s = state();
        s.stream_delay_secs = 0;
        s.record("a1", "T1", 10.0);
        s.record("a2", "T2", 40.0);
        s.record("a3", "T3", 100.0);
        let before = s.before_list();
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].title, "T2");
        assert_eq!(before[0].time, 60.0);
        assert_eq!(before[1].title, "T1");
        assert_eq!(before[1].time, 30.0);
    }

    #[test]
    fn before_list_empty_without_history() {
        let mut s = state();
        assert!(s.before_list().is_empty());
        s.record("dj", "only", 10.0);
        assert!(s.before_list().is_empty());
    }

    #[test]
    fn elapsed_can_go_negative_near_transition() {
        let mut s = state();
        s.record("dj", "Song A", 100.0);
        // first_seen is 107; a tick right after detection sees -6.
        assert_eq!(s.elapsed(101.0), -6);
        assert_eq!(s.elapsed(120.0), 13);
    }

    #[test]
    fn start_refuses_second_dj() {
        let mut s = state();
        assert!(s.start("alice"));
        assert!(s.active);
        assert_eq!(s.current_dj.as_deref(), Some("alice"));
        assert!(s.last_played.is_empty());

        assert!(!s.start("bob"));
        assert_eq!(s.current_dj.as_deref(), Some("alice"));
    }

    #[test]
    fn stop_requires_owner_or_admin() {
        let mut s = state();
        s.start("alice");
        s.record("alice", "Song A", 100.0);

        assert!(!s.stop("bob", false));
        assert!(s.active);

        assert!(s.stop("bob", true));
        assert!(!s.active);
        assert_eq!(s.current_dj, None);
        assert!(s.last_played.is_empty());
    }

    #[test]
    fn stop_by_owner() {
        let mut s = state();
        s.start("alice");
        assert!(s.stop("alice", false));
        assert!(!s.active);
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("livestream.json");
        let mut s = state();
        s.start("alice");
        s.record("alice", "Song A", 100.0);
        save_state(&path, &s).unwrap();

        let loaded = load_state(&path, &settings());
        assert!(loaded.active);
        assert_eq!(loaded.current_dj.as_deref(), Some("alice"));
        assert_eq!(loaded.last_played, s.last_played);
    }

    #[test]
    fn load_defaults_when_missing_or_garbled() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_state(&dir.path().join("nope.json"), &settings());
        assert!(!missing.active);

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        let garbled = load_state(&path, &settings());
        assert!(!garbled.active);
        assert!(garbled.last_played.is_empty());
    }

    #[test]
    fn load_rejects_other_schema_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        let mut s = state();
        s.start("alice");
        let raw = serde_json::to_string(&Snapshot {
            schema_version: SNAPSHOT_VERSION + 1,
            livestream: s,
        })
        .unwrap();
        std::fs::write(&path, raw).unwrap();

        let loaded = load_state(&path, &settings());
        assert!(!loaded.active);
    }
}
