use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Engine concurrency and retry budget are at least 1
/// - Backoff values are finite, non-negative and base <= max
/// - Every stage timeout is at least 1 second
/// - Notification distribution list is not empty
/// - Configured service URLs use http or https
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    // Engine validation
    let engine = &config.engine;
    if engine.max_concurrent_tickets == 0 {
        return Err(invalid("engine.max_concurrent_tickets must be at least 1"));
    }
    if engine.retry_max_attempts == 0 {
        return Err(invalid("engine.retry_max_attempts must be at least 1"));
    }
    for (name, value) in [
        ("retry_backoff_base_seconds", engine.retry_backoff_base_seconds),
        ("retry_backoff_max_seconds", engine.retry_backoff_max_seconds),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(invalid(&format!(
                "engine.{} must be a finite, non-negative number",
                name
            )));
        }
    }
    if engine.retry_backoff_base_seconds > engine.retry_backoff_max_seconds {
        return Err(invalid(
            "engine.retry_backoff_base_seconds cannot exceed engine.retry_backoff_max_seconds",
        ));
    }
    let timeouts = &engine.timeouts;
    for (name, value) in [
        ("poll_seconds", timeouts.poll_seconds),
        ("inspect_seconds", timeouts.inspect_seconds),
        ("release_seconds", timeouts.release_seconds),
        ("update_seconds", timeouts.update_seconds),
        ("notify_seconds", timeouts.notify_seconds),
    ] {
        if value == 0 {
            return Err(invalid(&format!(
                "engine.timeouts.{} must be at least 1",
                name
            )));
        }
    }

    // Notifier validation
    if config.notifier.distribution_list.trim().is_empty() {
        return Err(invalid("notifier.distribution_list cannot be empty"));
    }

    // Collaborator URLs
    if let Some(servicenow) = &config.servicenow {
        check_url("servicenow.url", &servicenow.url)?;
        if servicenow.tables.is_empty() {
            return Err(invalid("servicenow.tables cannot be empty"));
        }
    }
    if let Some(gateway) = &config.gateway {
        check_url("gateway.url", &gateway.url)?;
    }

    Ok(())
}

fn check_url(name: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid(&format!("{} must start with http:// or https://", name)))
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
