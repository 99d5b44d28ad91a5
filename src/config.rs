//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves defaults. Invalid
//! configuration aborts startup before the poller runs.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Seconds of streaming-server buffering compensated for when timing
/// live tracks.
pub const DEFAULT_STREAM_DELAY_SECS: u64 = 7;

const DEFAULT_LIVE_ALBUM_TITLE: &str = "\u{1f3b5} L I V E S T R E A M \u{1f3b5}";

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Directory of static site files.
    pub http_dir: Option<String>,
    /// Path of the livestream snapshot file.
    pub state_path: Option<String>,
    /// Channel definitions.
    pub channels: Option<Vec<ChannelConfig>>,
    /// Streaming-server status settings.
    pub icecast: Option<IcecastConfig>,
    /// Metrics backend settings. Listener stats degrade to a default
    /// when absent.
    pub influxdb: Option<InfluxDbConfig>,
    /// Live-broadcast settings.
    pub livestream: Option<LivestreamConfig>,
}

/// Channel config from TOML.
#[derive(Debug, Deserialize)]
pub struct ChannelConfig {
    /// Stable channel id used in URLs and stream mounts.
    pub id: String,
    /// Player control host.
    pub mpd_host: String,
    /// Player control port.
    pub mpd_port: u16,
}

/// Streaming-server status configuration.
#[derive(Debug, Deserialize)]
pub struct IcecastConfig {
    /// Full URL of the status document, e.g.
    /// `http://127.0.0.1:8000/status-json.xsl`.
    pub status_url: String,
}

/// Metrics backend (InfluxDB) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxDbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub db: String,
}

/// Live-broadcast configuration.
#[derive(Debug, Deserialize)]
pub struct LivestreamConfig {
    /// Channel taken over by live broadcasts.
    pub channel: Option<String>,
    /// Stream delay override in seconds.
    pub stream_delay_secs: Option<u64>,
    /// Album title shown while no metadata has arrived from the stream.
    pub album_title: Option<String>,
}

/// Resolved channel config.
#[derive(Debug, Clone)]
pub struct ChannelConfigResolved {
    /// Channel id.
    pub id: String,
    /// Player host.
    pub mpd_host: String,
    /// Player port.
    pub mpd_port: u16,
}

/// Resolved live-broadcast settings.
#[derive(Debug, Clone)]
pub struct LivestreamSettings {
    /// Channel taken over by live broadcasts.
    pub channel: String,
    /// Stream delay in seconds.
    pub stream_delay_secs: u64,
    /// Fallback album title for the live payload.
    pub album_title: String,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

/// Extract and validate the static site directory.
pub fn http_dir_from_config(cfg: &ServerConfig) -> Result<PathBuf> {
    let dir = cfg
        .http_dir
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("http_dir is required in config"))?;
    let dir = PathBuf::from(dir);
    if !dir.is_dir() {
        return Err(anyhow::anyhow!("http_dir {:?} is not a directory", dir));
    }
    Ok(dir)
}

/// Extract the snapshot path from config.
pub fn state_path_from_config(cfg: &ServerConfig) -> Result<PathBuf> {
    let path = cfg
        .state_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("state_path is required in config"))?;
    Ok(PathBuf::from(path))
}

/// Resolve channel configs, rejecting empty or duplicate definitions.
pub fn channels_from_config(cfg: &ServerConfig) -> Result<Vec<ChannelConfigResolved>> {
    let defined = cfg
        .channels
        .as_deref()
        .filter(|chs| !chs.is_empty())
        .ok_or_else(|| anyhow::anyhow!("at least one [[channels]] entry is required"))?;

    let mut channels = Vec::with_capacity(defined.len());
    let mut seen = std::collections::HashSet::new();
    for ch in defined {
        if ch.id.is_empty() {
            return Err(anyhow::anyhow!("channel id must not be empty"));
        }
        if !seen.insert(ch.id.clone()) {
            return Err(anyhow::anyhow!("duplicate channel id {}", ch.id));
        }
        channels.push(ChannelConfigResolved {
            id: ch.id.clone(),
            mpd_host: ch.mpd_host.clone(),
            mpd_port: ch.mpd_port,
        });
    }

    Ok(channels)
}

/// Extract the streaming-server status URL.
pub fn icecast_status_url_from_config(cfg: &ServerConfig) -> Result<String> {
    let icecast = cfg
        .icecast
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("[icecast] section is required"))?;
    Ok(icecast.status_url.trim_end_matches('/').to_string())
}

/// Resolve live-broadcast settings. The live channel must be one of the
/// configured channels.
pub fn livestream_from_config(
    cfg: &ServerConfig,
    channels: &[ChannelConfigResolved],
) -> Result<LivestreamSettings> {
    let channel = cfg
        .livestream
        .as_ref()
        .and_then(|ls| ls.channel.clone())
        .unwrap_or_else(|| channels[0].id.clone());
    if !channels.iter().any(|ch| ch.id == channel) {
        return Err(anyhow::anyhow!(
            "livestream channel {} is not a configured channel",
            channel
        ));
    }
    let stream_delay_secs = cfg
        .livestream
        .as_ref()
        .and_then(|ls| ls.stream_delay_secs)
        .unwrap_or(DEFAULT_STREAM_DELAY_SECS);
    let album_title = cfg
        .livestream
        .as_ref()
        .and_then(|ls| ls.album_title.clone())
        .unwrap_or_else(|| DEFAULT_LIVE_ALBUM_TITLE.to_string());
    Ok(LivestreamSettings {
        channel,
        stream_delay_secs,
        album_title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ServerConfig {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn channels_parse_and_resolve() {
        let cfg = parse(
            r#"
            [[channels]]
            id = "cyberia"
            mpd_host = "localhost"
            mpd_port = 6601

            [[channels]]
            id = "swing"
            mpd_host = "localhost"
            mpd_port = 6602
            "#,
        );
        let channels = channels_from_config(&cfg).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "cyberia");
        assert_eq!(channels[1].mpd_port, 6602);
    }

    #[test]
    fn channels_reject_duplicates() {
        let cfg = parse(
            r#"
            [[channels]]
            id = "cyberia"
            mpd_host = "localhost"
            mpd_port = 6601

            [[channels]]
            id = "cyberia"
            mpd_host = "localhost"
            mpd_port = 6602
            "#,
        );
        assert!(channels_from_config(&cfg).is_err());
    }

    #[test]
    fn channels_required() {
        let cfg = parse("");
        assert!(channels_from_config(&cfg).is_err());
    }

    #[test]
    fn livestream_defaults_to_first_channel() {
        let cfg = parse(
            r#"
            [[channels]]
            id = "cyberia"
            mpd_host = "localhost"
            mpd_port = 6601
            "#,
        );
        let channels = channels_from_config(&cfg).unwrap();
        let live = livestream_from_config(&cfg, &channels).unwrap();
        assert_eq!(live.channel, "cyberia");
        assert_eq!(live.stream_delay_secs, DEFAULT_STREAM_DELAY_SECS);
    }

    #[test]
    fn livestream_channel_must_exist() {
        let cfg = parse(
            r#"
            [[channels]]
            id = "cyberia"
            mpd_host = "localhost"
            mpd_port = 6601

            [livestream]
            channel = "nope"
            "#,
        );
        let channels = channels_from_config(&cfg).unwrap();
        assert!(livestream_from_config(&cfg, &channels).is_err());
    }

    #[test]
    fn bind_from_config_parses_when_present() {
        let cfg = parse(r#"bind = "127.0.0.1:3000""#);
        let addr = bind_from_config(&cfg).unwrap().unwrap();
        assert_eq!(addr, "127.0.0.1:3000".parse().unwrap());
    }
}
