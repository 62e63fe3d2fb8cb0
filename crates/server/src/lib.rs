//! streamgrab HTTP server: command API, WebSocket event channel and metrics.

pub mod api;
pub mod metrics;
pub mod state;
