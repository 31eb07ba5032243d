use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Plain environment variables read on top of every other source, with the
/// keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("DB_HOST", "postgres.host"),
    ("DB_PORT", "postgres.port"),
    ("DB_NAME", "postgres.database"),
    ("DB_USER", "postgres.username"),
    ("DB_PASS", "postgres.password"),
    ("SLOT_NAME", "replication.slot_name"),
    ("PUBLICATION_NAME", "replication.publication"),
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub replication: ReplicationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicationConfig {
    pub slot_name: String,
    pub publication: String,
    /// Create the replication slot if it does not exist yet.
    #[serde(default = "default_create_slot")]
    pub create_slot: bool,
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    #[serde(default)]
    pub handler_failure: HandlerFailurePolicy,
}

/// What the dispatcher does when a handler returns an error.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerFailurePolicy {
    /// Stop consuming and return the error from `start`.
    #[default]
    Abort,
    /// Log the error and keep delivering.
    LogAndContinue,
}

impl Config {
    /// Loads configuration from the environment only.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(None::<&Path>)
    }

    /// Loads configuration from built-in defaults, an optional TOML file,
    /// `PG_DISPATCH_*` variables (`__` separates nesting levels, e.g.
    /// `PG_DISPATCH_POSTGRES__HOST`), and finally the plain `DB_HOST`,
    /// `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASS`, `SLOT_NAME` and
    /// `PUBLICATION_NAME` variables.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    fn load_with_env<P, F>(path: Option<P>, env: F) -> Result<Self, config::ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .set_default("postgres.host", "localhost")?
            .set_default("postgres.port", 5432)?
            .set_default("postgres.database", "gonzalo123")?
            .set_default("postgres.username", "username")?
            .set_default("postgres.password", "password")?
            .set_default("replication.slot_name", "slot1")?
            .set_default("replication.publication", "pub1")?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_ref()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PG_DISPATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in ENV_OVERRIDES {
            builder = builder.set_override_option(*key, env(var))?;
        }

        builder.build()?.try_deserialize()
    }

    /// Connection settings for the control connection. Built field by field
    /// so credentials are passed through verbatim.
    pub fn postgres_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.postgres.host)
            .port(self.postgres.port)
            .user(&self.postgres.username)
            .password(&self.postgres.password)
            .dbname(&self.postgres.database)
            .connect_timeout(self.connect_timeout());
        pg
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.postgres.connect_timeout_secs)
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_create_slot() -> bool {
    true
}

fn default_status_interval_secs() -> u64 {
    10
}
