//! The `config` module loads application settings and parses connection
//! strings.
//!
//! Settings come from an optional `config/default.*` file and `CMDQ_`
//! prefixed environment variables (`__` separates nesting levels, e.g.
//! `CMDQ_CONNECTION__PORT`), merged over `Settings::default()`.

pub mod dsn;
mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use dsn::{ConnectionConfig, ConnectionOptions};
pub use settings::{ApplicationSettings, ConnectionSettings, Settings};

pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("CMDQ")
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    let connection = partial.connection;
    let application = partial.application;

    Ok(Settings {
        connection: ConnectionSettings {
            dsn: connection.as_ref().and_then(|c| c.dsn.clone()),
            host: connection
                .as_ref()
                .and_then(|c| c.host.clone())
                .unwrap_or(default.connection.host),
            port: connection
                .as_ref()
                .and_then(|c| c.port)
                .unwrap_or(default.connection.port),
            lazy: connection
                .as_ref()
                .and_then(|c| c.lazy)
                .unwrap_or(default.connection.lazy),
            redelivery_delay_secs: connection
                .as_ref()
                .and_then(|c| c.redelivery_delay_secs)
                .unwrap_or(default.connection.redelivery_delay_secs),
        },
        application: ApplicationSettings {
            name: application
                .as_ref()
                .and_then(|a| a.name.clone())
                .unwrap_or(default.application.name),
            log_level: application
                .as_ref()
                .and_then(|a| a.log_level.clone())
                .unwrap_or(default.application.log_level),
        },
        routes: partial.routes.unwrap_or(default.routes),
    })
}
