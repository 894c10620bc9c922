use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Postgres,
}

impl Default for StorageKind {
    fn default() -> Self {
        Self::Postgres
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub kind: StorageKind,

    #[serde(default)]
    pub database: DatabaseSettings,
}

#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub username: String,

    /// Supplied through the secrets file or `APP__STORAGE__DATABASE__PASSWORD`; never serialized.
    #[serde(skip_serializing, default = "DatabaseSettings::default_password")]
    pub password: Secret<String>,

    pub database_name: String,

    #[serde(default)]
    pub require_ssl: bool,

    #[serde(default = "DatabaseSettings::default_max_connections")]
    pub max_connections: u32,

    #[serde(
        default = "DatabaseSettings::default_acquire_timeout",
        rename = "acquire_timeout_secs"
    )]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub acquire_timeout: Duration,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("database_name", &self.database_name)
            .field("require_ssl", &self.require_ssl)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

impl PartialEq for DatabaseSettings {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
            && self.database_name == other.database_name
            && self.require_ssl == other.require_ssl
            && self.max_connections == other.max_connections
            && self.acquire_timeout == other.acquire_timeout
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: Self::default_password(),
            database_name: "telemetry".to_string(),
            require_ssl: false,
            max_connections: Self::default_max_connections(),
            acquire_timeout: Self::default_acquire_timeout(),
        }
    }
}

impl DatabaseSettings {
    fn default_password() -> Secret<String> {
        Secret::new(String::new())
    }

    pub const fn default_max_connections() -> u32 {
        10
    }

    pub const fn default_acquire_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl { PgSslMode::Require } else { PgSslMode::Prefer };

        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
            .database(&self.database_name)
            .ssl_mode(ssl_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_test::{assert_de_tokens, assert_ser_tokens, Token};

    #[test]
    fn test_storage_kind_serde() {
        assert_ser_tokens(
            &StorageKind::Memory,
            &[Token::UnitVariant { name: "StorageKind", variant: "memory" }],
        );
        assert_de_tokens(
            &StorageKind::Postgres,
            &[Token::UnitVariant { name: "StorageKind", variant: "postgres" }],
        );
    }

    #[test]
    fn test_database_settings_password_is_read_not_written() {
        let settings = DatabaseSettings {
            host: "db.internal".to_string(),
            password: Secret::new("hunter2".to_string()),
            acquire_timeout: Duration::from_secs(5),
            ..DatabaseSettings::default()
        };

        assert_de_tokens(
            &settings,
            &[
                Token::Struct { name: "DatabaseSettings", len: 5 },
                Token::Str("host"),
                Token::Str("db.internal"),
                Token::Str("port"),
                Token::U16(5432),
                Token::Str("username"),
                Token::Str("postgres"),
                Token::Str("password"),
                Token::Str("hunter2"),
                Token::Str("database_name"),
                Token::Str("telemetry"),
                Token::Str("acquire_timeout_secs"),
                Token::U64(5),
                Token::StructEnd,
            ],
        );

        assert_ser_tokens(
            &settings,
            &[
                Token::Struct { name: "DatabaseSettings", len: 7 },
                Token::Str("host"),
                Token::Str("db.internal"),
                Token::Str("port"),
                Token::U16(5432),
                Token::Str("username"),
                Token::Str("postgres"),
                Token::Str("database_name"),
                Token::Str("telemetry"),
                Token::Str("require_ssl"),
                Token::Bool(false),
                Token::Str("max_connections"),
                Token::U32(10),
                Token::Str("acquire_timeout_secs"),
                Token::U64(5),
                Token::StructEnd,
            ],
        );

        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
    }
}
