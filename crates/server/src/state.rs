use streamgrab_core::{Config, DownloadScheduler, EventBroadcaster, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    scheduler: DownloadScheduler,
    events: EventBroadcaster,
}

impl AppState {
    pub fn new(config: Config, scheduler: DownloadScheduler, events: EventBroadcaster) -> Self {
        Self {
            config,
            scheduler,
            events,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn scheduler(&self) -> &DownloadScheduler {
        &self.scheduler
    }

    /// Broadcaster feeding the WebSocket channel.
    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }
}
