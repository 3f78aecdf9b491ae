use anyhow::{bail, Context};
use db_pool::env_utils::{parse_env_optional, parse_env_with_default};
use db_pool::DbConfig;
use s3_utils::S3Config;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::security::jwt::ACCESS_TOKEN_EXPIRY_SECS;

pub const SERVICE_NAME: &str = "notification-service";

/// Shortest accepted JWT signing secret, in bytes
pub const MIN_JWT_SECRET_LEN: usize = 32;

const DEVELOPMENT_JWT_SECRET: &str = "notifyall-development-secret-change-me-0000";

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub store: StoreBackend,
    pub database: Option<DbConfig>,
    pub objects: ObjectBackend,
    pub s3: S3Config,
    pub jwt: JwtConfig,
    pub bootstrap_admin_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        matches!(self.env.as_str(), "development" | "dev" | "test")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => bail!("unknown STORE_BACKEND: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectBackend {
    Memory,
    S3,
}

impl FromStr for ObjectBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(ObjectBackend::Memory),
            "s3" => Ok(ObjectBackend::S3),
            other => bail!("unknown OBJECT_STORE_BACKEND: {}", other),
        }
    }
}

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiry_secs: i64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("expiry_secs", &self.expiry_secs)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env_with_default("APP_PORT", 8000),
        };

        let store = match std::env::var("STORE_BACKEND") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => StoreBackend::Memory,
        };
        let database = match store {
            StoreBackend::Postgres => Some(
                DbConfig::from_env(SERVICE_NAME)
                    .map_err(anyhow::Error::msg)
                    .context("STORE_BACKEND=postgres requires a database")?,
            ),
            StoreBackend::Memory => None,
        };

        let objects = match std::env::var("OBJECT_STORE_BACKEND") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => ObjectBackend::Memory,
        };

        let jwt = JwtConfig {
            secret: jwt_secret(&app)?,
            expiry_secs: parse_env_with_default("JWT_EXPIRY_SECONDS", ACCESS_TOKEN_EXPIRY_SECS),
        };
        if jwt.expiry_secs <= 0 {
            bail!("JWT_EXPIRY_SECONDS must be positive");
        }

        Ok(Config {
            app,
            store,
            database,
            objects,
            s3: S3Config::from_env(),
            jwt,
            bootstrap_admin_email: parse_env_optional::<String>("NOTIFYALL_BOOTSTRAP_ADMIN_EMAIL"),
        })
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.app.host.clone(), self.app.port)
    }
}

fn jwt_secret(app: &AppConfig) -> anyhow::Result<String> {
    let secret = match parse_env_optional::<String>("JWT_SECRET") {
        Some(secret) => secret,
        None if app.is_development() => DEVELOPMENT_JWT_SECRET.to_string(),
        None => bail!("JWT_SECRET must be set when APP_ENV={}", app.env),
    };

    if secret.len() < MIN_JWT_SECRET_LEN {
        bail!(
            "JWT_SECRET must be at least {} bytes, got {}",
            MIN_JWT_SECRET_LEN,
            secret.len()
        );
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_HOST",
        "APP_PORT",
        "STORE_BACKEND",
        "OBJECT_STORE_BACKEND",
        "DATABASE_URL",
        "JWT_SECRET",
        "JWT_EXPIRY_SECONDS",
        "NOTIFYALL_BOOTSTRAP_ADMIN_EMAIL",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_development_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();

        assert_eq!(config.app.port, 8000);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.objects, ObjectBackend::Memory);
        assert!(config.database.is_none());
        assert_eq!(config.jwt.expiry_secs, ACCESS_TOKEN_EXPIRY_SECS);
        assert!(config.jwt.secret.len() >= MIN_JWT_SECRET_LEN);
        assert!(config.bootstrap_admin_email.is_none());
    }

    #[test]
    #[serial]
    fn test_production_requires_secret() {
        clear_env();
        std::env::set_var("APP_ENV", "production");
        assert!(Config::from_env().is_err());

        std::env::set_var("JWT_SECRET", "too-short");
        assert!(Config::from_env().is_err());

        std::env::set_var("JWT_SECRET", "a-production-secret-that-is-long-enough");
        assert!(Config::from_env().is_ok());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_postgres_backend_requires_database_url() {
        clear_env();
        std::env::set_var("STORE_BACKEND", "postgres");
        assert!(Config::from_env().is_err());

        std::env::set_var("DATABASE_URL", "postgres://localhost/notifyall");
        let config = Config::from_env().unwrap();
        assert_eq!(config.store, StoreBackend::Postgres);
        assert_eq!(
            config.database.unwrap().database_url,
            "postgres://localhost/notifyall"
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unknown_backend_rejected() {
        clear_env();
        std::env::set_var("OBJECT_STORE_BACKEND", "ftp");
        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_jwt_secret_is_redacted() {
        let jwt = JwtConfig {
            secret: "super-secret".to_string(),
            expiry_secs: 60,
        };
        assert!(!format!("{:?}", jwt).contains("super-secret"));
    }
}
