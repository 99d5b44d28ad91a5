//! Streaming-server status fetching and parsing.
//!
//! Fetches the Icecast status document and extracts the live source for
//! a channel plus per-source listener counts.

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Root of the status document (`/status-json.xsl`).
#[derive(Debug, Deserialize)]
pub struct StatusDocument {
    pub icestats: IceStats,
}

#[derive(Debug, Deserialize)]
pub struct IceStats {
    /// Absent when nothing is connected at all.
    #[serde(default)]
    source: Option<OneOrMany>,
}

/// Icecast emits `source` as a single object when one mount is up and as
/// an array otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Source),
    Many(Vec<Source>),
}

impl IceStats {
    pub fn sources(&self) -> &[Source] {
        match self.source.as_ref() {
            None => &[],
            Some(OneOrMany::One(source)) => std::slice::from_ref(source),
            Some(OneOrMany::Many(sources)) => sources,
        }
    }
}

/// One mounted source from the status document.
#[derive(Debug, Clone, Deserialize)]
pub struct Source {
    pub listenurl: String,
    /// Absent on the metadata-only fallback placeholder mount.
    pub server_type: Option<String>,
    pub server_name: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub listeners: Option<ListenerCount>,
}

/// Listener counts arrive as a number or a numeric string depending on
/// the Icecast version.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListenerCount {
    Number(u64),
    Text(String),
}

impl ListenerCount {
    pub fn value(&self) -> u64 {
        match self {
            ListenerCount::Number(n) => *n,
            ListenerCount::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

/// Per-source listener count attributed to a channel and format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceListeners {
    pub channel: String,
    pub format: String,
    pub listeners: u64,
}

/// Fetch and parse the status document.
pub fn fetch_status(status_url: &str) -> Result<StatusDocument> {
    let mut resp = ureq::get(status_url)
        .config()
        .timeout_per_call(Some(FETCH_TIMEOUT))
        .build()
        .call()
        .map_err(|e| anyhow::anyhow!("stream status request failed: {e}"))?;
    let doc = resp
        .body_mut()
        .read_json::<StatusDocument>()
        .map_err(|e| anyhow::anyhow!("parse stream status: {e}"))?;
    Ok(doc)
}

/// Find the authoritative live source for a channel: its listen URL must
/// contain the channel id and its type must indicate audio, which rules
/// out the metadata-only fallback mount. First match wins, in server
/// order.
pub fn find_live_source<'a>(doc: &'a StatusDocument, channel: &str) -> Option<&'a Source> {
    doc.icestats.sources().iter().find(|source| {
        source.listenurl.contains(channel)
            && source
                .server_type
                .as_deref()
                .is_some_and(|t| t.contains("audio"))
    })
}

/// Listener counts per channel and format, read from each source's
/// `server_name` ("<channel> (<fmt>)", with an optional "[mpd] " prefix).
pub fn listener_snapshot(doc: &StatusDocument) -> Vec<SourceListeners> {
    doc.icestats
        .sources()
        .iter()
        .filter_map(|source| {
            let name = source.server_name.as_deref()?;
            let listeners = source.listeners.as_ref()?.value();
            let (channel, format) = split_server_name(name)?;
            Some(SourceListeners {
                channel,
                format,
                listeners,
            })
        })
        .collect()
}

fn split_server_name(name: &str) -> Option<(String, String)> {
    let name = name.strip_prefix("[mpd] ").unwrap_or(name);
    let open = name.rfind(" (")?;
    let format = name[open + 2..].strip_suffix(')')?;
    if format.is_empty() || name[..open].is_empty() {
        return None;
    }
    Some((name[..open].to_string(), format.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(raw: &str) -> StatusDocument {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn parses_source_array() {
        let doc = doc(
            r#"{"icestats": {"source": [
                {"listenurl": "http://radio/cyberia.ogg", "server_type": "audio/ogg", "listeners": 3},
                {"listenurl": "http://radio/swing.mp3", "server_type": "audio/mpeg", "listeners": "2"}
            ]}}"#,
        );
        let sources = doc.icestats.sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].listeners.as_ref().unwrap().value(), 3);
        assert_eq!(sources[1].listeners.as_ref().unwrap().value(), 2);
    }

    #[test]
    fn parses_single_source_object() {
        let doc = doc(
            r#"{"icestats": {"source":
                {"listenurl": "http://radio/cyberia.ogg", "server_type": "audio/ogg"}
            }}"#,
        );
        assert_eq!(doc.icestats.sources().len(), 1);
    }

    #[test]
    fn parses_missing_source() {
        let doc = doc(r#"{"icestats": {}}"#);
        assert!(doc.icestats.sources().is_empty());
    }

    #[test]
    fn live_source_requires_audio_type() {
        let doc = doc(
            r#"{"icestats": {"source": [
                {"listenurl": "http://radio/cyberia.ogg"},
                {"listenurl": "http://radio/cyberia.ogg", "server_type": "application/ogg"},
                {"listenurl": "http://radio/cyberia.ogg", "server_type": "audio/ogg", "title": "live one"}
            ]}}"#,
        );
        let source = find_live_source(&doc, "cyberia").unwrap();
        assert_eq!(source.title.as_deref(), Some("live one"));
    }

    #[test]
    fn live_source_matches_channel_in_url() {
        let doc = doc(
            r#"{"icestats": {"source": [
                {"listenurl": "http://radio/swing.ogg", "server_type": "audio/ogg"}
            ]}}"#,
        );
        assert!(find_live_source(&doc, "cyberia").is_none());
        assert!(find_live_source(&doc, "swing").is_some());
    }

    #[test]
    fn first_matching_source_wins() {
        let doc = doc(
            r#"{"icestats": {"source": [
                {"listenurl": "http://radio/cyberia.ogg", "server_type": "audio/ogg", "title": "first"},
                {"listenurl": "http://radio/cyberia.mp3", "server_type": "audio/mpeg", "title": "second"}
            ]}}"#,
        );
        let source = find_live_source(&doc, "cyberia").unwrap();
        assert_eq!(source.title.as_deref(), Some("first"));
    }

    #[test]
    fn snapshot_reads_channel_and_format_from_server_name() {
        let doc = doc(
            r#"{"icestats": {"source": [
                {"listenurl": "u", "server_name": "[mpd] cyberia (ogg)", "listeners": 4},
                {"listenurl": "u", "server_name": "swing (mp3)", "listeners": "1"},
                {"listenurl": "u", "server_name": "unparseable"},
                {"listenurl": "u", "listeners": 9}
            ]}}"#,
        );
        let snapshot = listener_snapshot(&doc);
        assert_eq!(
            snapshot,
            vec![
                SourceListeners {
                    channel: "cyberia".to_string(),
                    format: "ogg".to_string(),
                    listeners: 4,
                },
                SourceListeners {
                    channel: "swing".to_string(),
                    format: "mp3".to_string(),
                    listeners: 1,
                },
            ]
        );
    }

    #[test]
    fn split_server_name_edge_cases() {
        assert_eq!(
            split_server_name("cafe (ogg)"),
            Some(("cafe".to_string(), "ogg".to_string()))
        );
        assert_eq!(split_server_name("(ogg)"), None);
        assert_eq!(split_server_name("cafe"), None);
        assert_eq!(split_server_name("cafe ()"), None);
    }
}
