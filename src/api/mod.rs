//! HTTP API handlers.
//!
//! Defines the actix routes for channel status, DJ takeover, and
//! metrics. Handlers only read already-computed state; no network I/O
//! happens on a request thread.

pub mod dj;
pub mod health;
pub mod metrics;
pub mod playlist;

pub use dj::{dj_start, dj_stop};
pub use metrics::listener_metrics;
pub use playlist::channel_playlist;
