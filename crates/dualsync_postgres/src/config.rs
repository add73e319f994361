//! Connection settings for the origin and cloud stores.

use dualsync_core::ConfigError;
use dualsync_engine::EngineConfig;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::path::Path;
use std::time::Duration;

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain TCP only.
    Disable,
    /// TLS when the server offers it.
    #[default]
    Prefer,
    /// Fail unless TLS is negotiated.
    Require,
}

impl From<TlsMode> for PgSslMode {
    fn from(mode: TlsMode) -> Self {
        match mode {
            TlsMode::Disable => PgSslMode::Disable,
            TlsMode::Prefer => PgSslMode::Prefer,
            TlsMode::Require => PgSslMode::Require,
        }
    }
}

/// Settings for one PostgreSQL store.
///
/// Durations are given in whole seconds when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub user: String,
    /// Password, if the server asks for one.
    pub password: Option<String>,
    /// TLS mode.
    pub tls: TlsMode,
    /// Upper bound of the connection pool.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Idle connections older than this are closed.
    #[serde(with = "opt_secs")]
    pub idle_timeout: Option<Duration>,
    /// Per-statement timeout set on every connection.
    #[serde(with = "opt_secs")]
    pub statement_timeout: Option<Duration>,
    /// Schema holding the replicated tables.
    pub schema: String,
}

impl StoreConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            database: "postgres".into(),
            user: "postgres".into(),
            password: None,
            tls: TlsMode::Prefer,
            max_connections: 5,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_timeout: Some(Duration::from_secs(300)),
            schema: "public".into(),
        }
    }

    /// Sets host and port.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets login credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = user.into();
        self.password = password;
        self
    }

    /// Sets the TLS mode.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the pool acquire timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the idle timeout; `None` keeps idle connections forever.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the statement timeout; `None` uses the server default.
    #[must_use]
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Sets the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Connection options for one session.
    ///
    /// Sessions run in UTC so timestamps round-trip unchanged.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .ssl_mode(self.tls.into())
            .application_name("dualsync");
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options.options(self.session_settings())
    }

    /// Pool options.
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
    }

    fn session_settings(&self) -> Vec<(&'static str, String)> {
        let mut settings = vec![("TimeZone", "UTC".to_string())];
        if let Some(timeout) = self.statement_timeout {
            settings.push(("statement_timeout", timeout.as_millis().to_string()));
        }
        settings
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to connect an engine: both stores and the engine
/// settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicationConfig {
    /// The legacy store.
    pub origin: StoreConfig,
    /// The cloud store.
    pub cloud: StoreConfig,
    /// Engine settings.
    pub engine: EngineConfig,
}

impl ReplicationConfig {
    /// Creates a configuration from two store configs and default engine
    /// settings.
    pub fn new(origin: StoreConfig, cloud: StoreConfig) -> Self {
        Self {
            origin,
            cloud,
            engine: EngineConfig::default(),
        }
    }

    /// Sets the engine settings.
    #[must_use]
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_secs)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(de)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.tls, TlsMode::Prefer);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.schema, "public");
    }

    #[test]
    fn builder() {
        let config = StoreConfig::new()
            .with_host("db.internal", 6432)
            .with_database("erp")
            .with_credentials("sync", Some("secret".into()))
            .with_tls(TlsMode::Require)
            .with_max_connections(2)
            .with_statement_timeout(None);
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6432);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.tls, TlsMode::Require);
        assert_eq!(config.statement_timeout, None);
    }

    #[test]
    fn session_settings_carry_timeout() {
        let config = StoreConfig::new().with_statement_timeout(Some(Duration::from_secs(5)));
        let settings = config.session_settings();
        assert!(settings.contains(&("TimeZone", "UTC".to_string())));
        assert!(settings.contains(&("statement_timeout", "5000".to_string())));

        let config = config.with_statement_timeout(None);
        assert_eq!(config.session_settings().len(), 1);
    }

    #[test]
    fn parse_document() {
        let json = r#"{
            "origin": { "host": "erp-db", "database": "erp", "tls": "disable" },
            "cloud": {
                "host": "cloud-db",
                "database": "mobile",
                "password": "pw",
                "connect_timeout": 10,
                "idle_timeout": null,
                "statement_timeout": 60
            },
            "engine": { "halt_on_error": true }
        }"#;
        let config = ReplicationConfig::from_json_str(json).unwrap();
        assert_eq!(config.origin.host, "erp-db");
        assert_eq!(config.origin.tls, TlsMode::Disable);
        assert_eq!(config.origin.port, 5432);
        assert_eq!(config.cloud.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.cloud.idle_timeout, None);
        assert_eq!(config.cloud.statement_timeout, Some(Duration::from_secs(60)));
        assert!(config.engine.halt_on_error);
        assert_eq!(config.engine.marker_column, "origin_marker");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let json = r#"{ "origin": { "hots": "x" } }"#;
        assert!(ReplicationConfig::from_json_str(json).is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replication.json");
        std::fs::write(&path, r#"{ "cloud": { "schema": "mobile" } }"#).unwrap();
        let config = ReplicationConfig::from_json_file(&path).unwrap();
        assert_eq!(config.cloud.schema, "mobile");
        assert_eq!(config.origin, StoreConfig::default());

        assert!(ReplicationConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
