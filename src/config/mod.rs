mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{
    ConnectionConfig, KEY_MAPPING, LoggingSettings, Settings, native_key,
};

/// Loads the configuration from the default file and environment variables
/// A `.env` file in the working directory is read first when present
/// Environment variables use the `BROKERLINK` prefix and `__` between sections,
/// e.g. `BROKERLINK__CONNECTION__PROVIDER_URL`
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("BROKERLINK")
                .prefix_separator("__")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let connection = partial.connection;
    let logging = partial.logging;

    Ok(Settings {
        connection: ConnectionConfig {
            initial_context_factory: connection
                .as_ref()
                .and_then(|c| c.initial_context_factory.clone())
                .unwrap_or(default.connection.initial_context_factory),
            provider_url: connection
                .as_ref()
                .and_then(|c| c.provider_url.clone())
                .unwrap_or(default.connection.provider_url),
            connection_factory_name: connection
                .as_ref()
                .and_then(|c| c.connection_factory_name.clone())
                .unwrap_or(default.connection.connection_factory_name),
            username: connection
                .as_ref()
                .and_then(|c| c.username.clone())
                .or(default.connection.username),
            password: connection
                .as_ref()
                .and_then(|c| c.password.clone())
                .or(default.connection.password),
            properties: connection
                .and_then(|c| c.properties)
                .unwrap_or(default.connection.properties),
        },
        logging: LoggingSettings {
            level: logging
                .and_then(|l| l.level)
                .unwrap_or(default.logging.level),
        },
    })
}

#[cfg(test)]
mod tests;
