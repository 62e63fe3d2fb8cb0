use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - At least one download slot
/// - At least one transfer attempt per mirror
/// - Non-empty event buffers
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.scheduler.max_concurrent_downloads == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_concurrent_downloads must be at least 1".to_string(),
        ));
    }

    if config.resolver.transfer_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "resolver.transfer_attempts must be at least 1".to_string(),
        ));
    }

    if config.events.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "events.buffer_size must be at least 1".to_string(),
        ));
    }

    Ok(())
}
