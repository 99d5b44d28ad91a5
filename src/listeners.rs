//! Listener statistics from the metrics backend.
//!
//! Queries InfluxDB for per-channel listener counts, batched once per
//! poll tick, and renders the Prometheus exposition text served from
//! `/metrics`. Metrics failures never fail a tick; stats degrade to a
//! default instead.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::config::InfluxDbConfig;
use crate::icecast::SourceListeners;
use crate::models::ListenerStats;

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Trailing window for peak listener counts.
const PEAK_WINDOW: &str = "12h";

/// Client for the metrics backend's HTTP query API.
pub struct ListenerStatsClient {
    base_url: String,
    user: String,
    pass: String,
    db: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    series: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

impl ListenerStatsClient {
    pub fn new(cfg: &InfluxDbConfig) -> Self {
        Self {
            base_url: format!("http://{}:{}", cfg.host, cfg.port),
            user: cfg.user.clone(),
            pass: cfg.pass.clone(),
            db: cfg.db.clone(),
        }
    }

    /// Fetch peak and current listener counts for every channel in one
    /// pair of queries. Channels missing from the reply degrade to the
    /// fallback value; a failed query degrades all of them.
    pub fn fetch_all(&self, channels: &[String]) -> HashMap<String, ListenerStats> {
        if channels.is_empty() {
            return HashMap::new();
        }
        let fields: Vec<String> = channels.iter().map(|ch| format!("\"{ch}\"")).collect();
        let peak_query = format!(
            "SELECT {} FROM channel_listeners WHERE time >= now() - {PEAK_WINDOW}",
            fields
                .iter()
                .zip(channels)
                .map(|(f, ch)| format!("max({f}) AS \"{ch}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let current_query = format!(
            "SELECT {} FROM channel_listeners ORDER BY time DESC LIMIT 1",
            fields.join(", ")
        );

        let peaks = match self.query_row(&peak_query) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(error = %e, "peak listener query failed");
                HashMap::new()
            }
        };
        let currents = match self.query_row(&current_query) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(error = %e, "current listener query failed");
                HashMap::new()
            }
        };

        stats_by_channel(channels, &peaks, &currents)
    }

    /// Run one query and flatten its first result row into
    /// column-name -> value.
    fn query_row(&self, q: &str) -> Result<HashMap<String, u64>> {
        let url = format!("{}/query", self.base_url);
        let mut resp = ureq::get(&url)
            .query("db", &self.db)
            .query("u", &self.user)
            .query("p", &self.pass)
            .query("q", q)
            .config()
            .timeout_per_call(Some(QUERY_TIMEOUT))
            .build()
            .call()
            .map_err(|e| anyhow::anyhow!("metrics query failed: {e}"))?;
        let parsed = resp
            .body_mut()
            .read_json::<QueryResponse>()
            .map_err(|e| anyhow::anyhow!("parse metrics reply: {e}"))?;
        Ok(first_row(&parsed))
    }
}

fn first_row(resp: &QueryResponse) -> HashMap<String, u64> {
    let mut row = HashMap::new();
    let Some(series) = resp.results.first().and_then(|r| r.series.first()) else {
        return row;
    };
    let Some(values) = series.values.first() else {
        return row;
    };
    for (column, value) in series.columns.iter().zip(values) {
        if column == "time" {
            continue;
        }
        if let Some(n) = value.as_f64() {
            row.insert(column.clone(), n as u64);
        }
    }
    row
}

/// Combine the two query rows into per-channel stats. A channel absent
/// from a row counts as one listener (the polling process itself).
fn stats_by_channel(
    channels: &[String],
    peaks: &HashMap<String, u64>,
    currents: &HashMap<String, u64>,
) -> HashMap<String, ListenerStats> {
    channels
        .iter()
        .map(|ch| {
            let fallback = ListenerStats::fallback();
            (
                ch.clone(),
                ListenerStats {
                    peak: peaks.get(ch).copied().unwrap_or(fallback.peak),
                    current: currents.get(ch).copied().unwrap_or(fallback.current),
                },
            )
        })
        .collect()
}

/// Render the Prometheus exposition text: one gauge line per
/// channel-and-format pair, summed across sources and emitted in a
/// stable order.
pub fn exposition(snapshot: &[SourceListeners]) -> String {
    let mut totals: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for entry in snapshot {
        *totals
            .entry((entry.channel.as_str(), entry.format.as_str()))
            .or_insert(0) += entry.listeners;
    }

    let mut out = String::new();
    out.push_str("# HELP listeners Current listeners by channel and format.\n");
    out.push_str("# TYPE listeners gauge\n");
    for ((channel, format), listeners) in totals {
        out.push_str(&format!(
            "listeners{{channel=\"{channel}\",format=\"{format}\"}} {listeners}\n"
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_entry(channel: &str, format: &str, listeners: u64) -> SourceListeners {
        SourceListeners {
            channel: channel.to_string(),
            format: format.to_string(),
            listeners,
        }
    }

    #[test]
    fn first_row_maps_columns_to_values() {
        let resp: QueryResponse = serde_json::from_str(
            r#"{"results": [{"series": [{
                "columns": ["time", "cyberia", "swing"],
                "values": [["2024-01-01T00:00:00Z", 5, null]]
            }]}]}"#,
        )
        .unwrap();
        let row = first_row(&resp);
        assert_eq!(row.get("cyberia"), Some(&5));
        assert_eq!(row.get("swing"), None);
        assert_eq!(row.get("time"), None);
    }

    #[test]
    fn first_row_empty_when_no_series() {
        let resp: QueryResponse = serde_json::from_str(r#"{"results": [{}]}"#).unwrap();
        assert!(first_row(&resp).is_empty());
    }

    #[test]
    fn stats_fall_back_to_one_listener() {
        let channels = vec!["cyberia".to_string(), "swing".to_string()];
        let peaks = HashMap::from([("cyberia".to_string(), 7u64)]);
        let currents = HashMap::from([("cyberia".to_string(), 2u64)]);
        let stats = stats_by_channel(&channels, &peaks, &currents);
        assert_eq!(
            stats["cyberia"],
            ListenerStats {
                peak: 7,
                current: 2
            }
        );
        assert_eq!(stats["swing"], ListenerStats::fallback());
    }

    #[test]
    fn exposition_sums_and_orders_pairs() {
        let snapshot = vec![
            snapshot_entry("swing", "ogg", 2),
            snapshot_entry("cyberia", "mp3", 1),
            snapshot_entry("cyberia", "ogg", 3),
            snapshot_entry("cyberia", "ogg", 2),
        ];
        let text = exposition(&snapshot);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# HELP listeners Current listeners by channel and format.");
        assert_eq!(lines[1], "# TYPE listeners gauge");
        assert_eq!(lines[2], "listeners{channel=\"cyberia\",format=\"mp3\"} 1");
        assert_eq!(lines[3], "listeners{channel=\"cyberia\",format=\"ogg\"} 5");
        assert_eq!(lines[4], "listeners{channel=\"swing\",format=\"ogg\"} 2");
    }

    #[test]
    fn exposition_with_no_sources_has_only_headers() {
        let text = exposition(&[]);
        assert_eq!(text.lines().count(), 2);
    }
}
