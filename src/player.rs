//! Player (MPD protocol) client adapter.
//!
//! Wraps one channel's line-protocol control connection with timeouts,
//! a liveness probe, and reconnect-on-failure. Connections are owned by
//! the poller thread and never shared.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::ops::Range;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::config::ChannelConfigResolved;
use crate::models::TrackInfo;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Tracks visible around the current queue position.
#[derive(Debug, Clone)]
pub struct PlaylistWindow {
    /// Previously played tracks, oldest first.
    pub before: Vec<TrackInfo>,
    pub current: TrackInfo,
    /// Upcoming tracks, nearest first.
    pub after: Vec<TrackInfo>,
    /// Seconds into the current track.
    pub elapsed: i64,
}

/// Parsed `status` fields we care about.
#[derive(Debug, Clone, Copy)]
struct PlayerPosition {
    pos: usize,
    queue_len: usize,
    elapsed: f64,
}

/// Compute the clamped before/after queue ranges for a window request.
/// Positions near either end of the queue must not produce out-of-range
/// slices.
pub fn window_bounds(
    pos: usize,
    queue_len: usize,
    before_n: usize,
    after_n: usize,
) -> (Range<usize>, Range<usize>) {
    let clamp = |x: usize| x.min(queue_len);
    let before = pos.saturating_sub(before_n)..clamp(pos);
    let after = clamp(pos + 1)..clamp(pos + after_n + 1);
    (before, after)
}

/// Group flat `key: value` response pairs into per-track maps. A new
/// track starts at each `file` key.
fn group_records(pairs: Vec<(String, String)>) -> Vec<HashMap<String, String>> {
    let mut records = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    for (key, value) in pairs {
        if key == "file" {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(HashMap::new());
        }
        if let Some(rec) = current.as_mut() {
            rec.insert(key, value);
        }
    }
    if let Some(done) = current {
        records.push(done);
    }
    records
}

/// One open control connection.
struct PlayerConn {
    reader: BufReader<TcpStream>,
}

impl PlayerConn {
    fn open(host: &str, port: u16) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("resolve player address {host}:{port}"))?
            .next()
            .ok_or_else(|| anyhow::anyhow!("no address for player {host}:{port}"))?;
        let stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT)
            .with_context(|| format!("connect to player {addr}"))?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        let mut reader = BufReader::new(stream);
        let mut greeting = String::new();
        reader.read_line(&mut greeting)?;
        if !greeting.starts_with("OK MPD") {
            bail!("unexpected player greeting: {}", greeting.trim_end());
        }
        Ok(Self { reader })
    }

    /// Send one command and collect its `key: value` response pairs.
    /// Keys are lowercased; the player reports them in mixed case.
    fn command(&mut self, cmd: &str) -> Result<Vec<(String, String)>> {
        let stream = self.reader.get_mut();
        stream.write_all(cmd.as_bytes())?;
        stream.write_all(b"\n")?;

        let mut pairs = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                bail!("player closed the connection");
            }
            let line = line.trim_end();
            if line == "OK" {
                return Ok(pairs);
            }
            if line.starts_with("ACK") {
                bail!("player error: {line}");
            }
            if let Some((key, value)) = line.split_once(": ") {
                pairs.push((key.to_ascii_lowercase(), value.to_string()));
            }
        }
    }

    fn ping(&mut self) -> Result<()> {
        self.command("ping").map(|_| ())
    }

    fn position(&mut self) -> Result<PlayerPosition> {
        let status: HashMap<String, String> = self.command("status")?.into_iter().collect();
        let pos = status
            .get("song")
            .context("player is not playing")?
            .parse::<usize>()
            .context("parse queue position")?;
        let queue_len = status
            .get("playlistlength")
            .context("status missing playlistlength")?
            .parse::<usize>()
            .context("parse queue length")?;
        let elapsed = status
            .get("elapsed")
            .map(|e| e.parse::<f64>())
            .transpose()
            .context("parse elapsed")?
            .unwrap_or(0.0);
        Ok(PlayerPosition {
            pos,
            queue_len,
            elapsed,
        })
    }

    fn playlist_range(&mut self, range: Range<usize>) -> Result<Vec<HashMap<String, String>>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let pairs = self.command(&format!("playlistinfo {}:{}", range.start, range.end))?;
        Ok(group_records(pairs))
    }

    fn playlist_at(&mut self, pos: usize) -> Result<HashMap<String, String>> {
        let pairs = self.command(&format!("playlistinfo {pos}"))?;
        group_records(pairs)
            .into_iter()
            .next()
            .with_context(|| format!("no track at queue position {pos}"))
    }
}

/// Per-channel player adapter owned by the poller.
pub struct ChannelPlayer {
    host: String,
    port: u16,
    conn: Option<PlayerConn>,
}

impl ChannelPlayer {
    pub fn new(cfg: &ChannelConfigResolved) -> Self {
        Self {
            host: cfg.mpd_host.clone(),
            port: cfg.mpd_port,
            conn: None,
        }
    }

    /// Probe the existing connection; on failure discard it, open a
    /// fresh one, and probe again.
    pub fn ensure_connected(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.as_mut() {
            if conn.ping().is_ok() {
                return Ok(());
            }
            self.conn = None;
        }
        let mut conn = PlayerConn::open(&self.host, self.port)?;
        conn.ping()?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Drop the connection so the next tick reconnects. Called after a
    /// failed exchange, which may leave the protocol desynced.
    pub fn disconnect(&mut self) {
        self.conn = None;
    }

    /// Fetch the sanitized playlist window around the current track.
    pub fn playlist_window(&mut self, before_n: usize, after_n: usize) -> Result<PlaylistWindow> {
        let conn = self.conn.as_mut().context("not connected to player")?;
        let position = conn.position()?;
        let (before_range, after_range) =
            window_bounds(position.pos, position.queue_len, before_n, after_n);

        let mut before: Vec<TrackInfo> = conn
            .playlist_range(before_range)?
            .iter()
            .map(TrackInfo::sanitized)
            .collect();
        // Chronological order: oldest first, nearest the current track last.
        before.reverse();
        let current = TrackInfo::sanitized(&conn.playlist_at(position.pos)?);
        let after = conn
            .playlist_range(after_range)?
            .iter()
            .map(TrackInfo::sanitized)
            .collect();

        Ok(PlaylistWindow {
            before,
            current,
            after,
            elapsed: position.elapsed as i64,
        })
    }
}
