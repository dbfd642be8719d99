//! Migrator settings
//!
//! [`Settings::load`] reads `config/dbmigrate.toml` (section `[database]`) and
//! `DBMIGRATE__*` environment variables. Command-line front ends usually load
//! first and then override individual fields.

use crate::migration::MigrateError;
use crate::provider;
use config::{Config, ConfigError, Environment, File};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const DEFAULT_MIGRATIONS_TABLE: &str = "migrations";

const CONFIG_FILE: &str = "config/dbmigrate.toml";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex")
});

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Engine identifier (`sqlite`, `postgres`, `mysql`)
    #[serde(default)]
    pub engine: String,
    /// Database name; a file path for SQLite
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Directory holding migration files, relative to the project directory
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,
    /// Ledger table name
    #[serde(default = "default_migrations_table")]
    pub migrations_table: String,
    /// Roll back versions whose down file is missing or empty by only removing the ledger row
    #[serde(default)]
    pub allow_missing_downs: bool,
}

fn default_migrations_dir() -> String {
    DEFAULT_MIGRATIONS_DIR.to_string()
}

fn default_migrations_table() -> String {
    DEFAULT_MIGRATIONS_TABLE.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: String::new(),
            database: String::new(),
            host: None,
            port: None,
            user: None,
            password: None,
            migrations_dir: default_migrations_dir(),
            migrations_table: default_migrations_table(),
            allow_missing_downs: false,
        }
    }
}

impl Settings {
    /// Settings for `engine` and `database` with every other option at its default.
    pub fn new(engine: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Load settings from `config/dbmigrate.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix("DBMIGRATE").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // The file exists but is unreadable or malformed; keep going with env only
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("failed to load {CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(Environment::with_prefix("DBMIGRATE").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        match settings.get::<Settings>("database") {
            Ok(s) => Ok(s),
            // No [database] section anywhere: start from defaults and let the caller fill in
            Err(ConfigError::NotFound(_)) => Ok(Settings::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "Database configuration could not be loaded from file or environment: {e}"
            ))),
        }
    }

    /// Check the settings a migrator cannot run without.
    ///
    /// Empty `migrations_dir`/`migrations_table` are reset to their defaults.
    ///
    /// # Errors
    ///
    /// - `EngineNotSpecified` / `DatabaseNotSpecified` when either is blank
    /// - `UnknownEngine` when no provider is registered for the engine
    /// - `InvalidTableName` when the ledger table is not a plain identifier
    pub fn validate(&mut self) -> Result<(), MigrateError> {
        if self.migrations_dir.trim().is_empty() {
            self.migrations_dir = default_migrations_dir();
        }
        if self.migrations_table.trim().is_empty() {
            self.migrations_table = default_migrations_table();
        }

        if self.engine.trim().is_empty() {
            return Err(MigrateError::EngineNotSpecified);
        }
        if self.database.trim().is_empty() {
            return Err(MigrateError::DatabaseNotSpecified);
        }
        if provider::provider(&self.engine).is_none() {
            return Err(MigrateError::UnknownEngine(self.engine.clone()));
        }
        if !IDENTIFIER.is_match(&self.migrations_table) {
            return Err(MigrateError::InvalidTableName(self.migrations_table.clone()));
        }
        Ok(())
    }
}
