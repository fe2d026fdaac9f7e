use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::services::{LifecyclePolicy, RelaySettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Database; `None` runs on the in-memory store
    pub database_url: Option<String>,
    pub db_max_connections: u32,

    // Evidence
    pub upload_dir: PathBuf,

    pub policy: LifecyclePolicy,
    pub relay: RelaySettings,

    /// Staff identities seeded into the directory at startup
    pub staff_ids: Vec<Uuid>,
    pub log_json: bool,
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn radius(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value = parsed(name, default)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be a positive number of metres".to_string(),
        });
    }
    Ok(value)
}

fn reward(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    let value = parsed(name, default)?;
    if value < 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "rewards cannot be negative".to_string(),
        });
    }
    Ok(value)
}

fn millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parsed(name, default).map(Duration::from_millis)
}

fn staff_ids() -> Result<Vec<Uuid>, ConfigError> {
    let raw = env::var("STAFF_IDS").unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Uuid>().map_err(|e| ConfigError::Invalid {
                name: "STAFF_IDS",
                value: s.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = LifecyclePolicy::default();
        let policy = LifecyclePolicy {
            staff_geofence_meters: radius("STAFF_GEOFENCE_METERS", defaults.staff_geofence_meters)?,
            citizen_geofence_meters: radius(
                "CITIZEN_GEOFENCE_METERS",
                defaults.citizen_geofence_meters,
            )?,
            report_filed_reward: reward("REWARD_REPORT_FILED", defaults.report_filed_reward)?,
            issue_resolved_reward: reward("REWARD_ISSUE_RESOLVED", defaults.issue_resolved_reward)?,
            resolution_verified_reward: reward(
                "REWARD_RESOLUTION_VERIFIED",
                defaults.resolution_verified_reward,
            )?,
            max_evidence_bytes: parsed("MAX_EVIDENCE_BYTES", defaults.max_evidence_bytes)?,
        };

        let relay = RelaySettings {
            poll_interval: millis("RELAY_POLL_INTERVAL_MS", 2000)?,
            batch_size: parsed("RELAY_BATCH_SIZE", 100)?,
            max_attempts: parsed("RELAY_MAX_ATTEMPTS", 5)?,
            initial_backoff: millis("RELAY_INITIAL_BACKOFF_MS", 500)?,
            send_timeout: millis("RELAY_SEND_TIMEOUT_MS", 5000)?,
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed("PORT", 8080)?,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 10)?,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),
            policy,
            relay,
            staff_ids: staff_ids()?,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}
