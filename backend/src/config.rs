use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::models::DEFAULT_INITIAL_RATING;
use crate::service::rating_service::DEFAULT_K_FACTOR;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub rating: RatingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub rust_log: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(anyhow!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Attempts per transaction before contention is reported as a conflict.
    pub retry_attempts: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expires_in_secs: i64,
    pub jwt_issuer: String,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RatingConfig {
    pub initial_rating: i32,
    pub k_factor: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            initial_rating: DEFAULT_INITIAL_RATING,
            k_factor: DEFAULT_K_FACTOR,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend: StoreBackend = parse_or(&lookup, "STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = lookup("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("DATABASE_URL must be set when STORE_BACKEND=postgres"));
        }

        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 16 {
            return Err(anyhow!("JWT_SECRET must be at least 16 characters"));
        }

        let bcrypt_cost: u32 = parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(anyhow!("BCRYPT_COST must be between 4 and 31"));
        }

        let retry_attempts: usize = parse_or(&lookup, "STORE_RETRY_ATTEMPTS", 3)?;
        if retry_attempts == 0 {
            return Err(anyhow!("STORE_RETRY_ATTEMPTS must be at least 1"));
        }

        let k_factor: f64 = parse_or(&lookup, "RATING_K_FACTOR", DEFAULT_K_FACTOR)?;
        if !(k_factor.is_finite() && k_factor > 0.0) {
            return Err(anyhow!("RATING_K_FACTOR must be a positive number"));
        }

        Ok(Config {
            server: ServerConfig {
                port: parse_or(&lookup, "PORT", 8080)?,
                host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                rust_log: lookup("RUST_LOG")
                    .unwrap_or_else(|| "caps_elo_backend=info,actix_web=info".to_string()),
            },
            store: StoreConfig {
                backend,
                database_url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
                retry_attempts,
            },
            auth: AuthConfig {
                jwt_secret,
                jwt_expires_in_secs: parse_or(&lookup, "JWT_EXPIRES_IN_SECS", 7 * 24 * 3600)?,
                jwt_issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "CapsElo".to_string()),
                bcrypt_cost,
            },
            rating: RatingConfig {
                initial_rating: parse_or(&lookup, "RATING_INITIAL", DEFAULT_INITIAL_RATING)?,
                k_factor,
            },
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value for {}: {}", key, e)),
        None => Ok(default),
    }
}
