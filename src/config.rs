use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime configuration for the taskwire backend.
///
/// Loaded from environment variables (with `.env` support via dotenvy in
/// main). CLI flags may override individual fields after loading.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Token lifetime applied by `taskwire token` and any other issuer.
    pub jwt_expires_hours: i64,
    /// Allowed CORS origins for the HTTP/WebSocket surface.
    pub cors_origins: Vec<String>,
    pub reminders: ReminderConfig,
}

/// Configuration for the scheduled reminder sweep.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub enabled: bool,
    /// Seconds-resolution cron expression (sec min hour dom mon dow).
    pub schedule: String,
    /// Tasks incomplete and older than this many hours are reminder-eligible.
    pub threshold_hours: i64,
}

pub const DEFAULT_JWT_SECRET: &str = "change_me_in_production";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            db_path: PathBuf::from("taskwire.db"),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expires_hours: 24,
            cors_origins: vec!["http://localhost:3000".to_string()],
            reminders: ReminderConfig::default(),
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // 08:00 daily
            schedule: "0 0 8 * * *".to_string(),
            threshold_hours: 24,
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset. Malformed numeric values are errors rather than
    /// silent fallbacks.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match std::env::var("PORT") {
            Ok(v) => v.parse::<u16>().context("Invalid PORT value")?,
            Err(_) => defaults.port,
        };
        let db_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret);
        let jwt_expires_hours = match std::env::var("JWT_EXPIRES_HOURS") {
            Ok(v) => v.parse::<i64>().context("Invalid JWT_EXPIRES_HOURS value")?,
            Err(_) => defaults.jwt_expires_hours,
        };
        let cors_origins = match std::env::var("CORS_ORIGIN") {
            Ok(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.cors_origins,
        };

        let enabled = std::env::var("CRON_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.reminders.enabled);
        let schedule =
            std::env::var("CRON_REMINDER_SCHEDULE").unwrap_or(defaults.reminders.schedule);
        let threshold_hours = match std::env::var("TASK_REMINDER_THRESHOLD_HOURS") {
            Ok(v) => v
                .parse::<i64>()
                .context("Invalid TASK_REMINDER_THRESHOLD_HOURS value")?,
            Err(_) => defaults.reminders.threshold_hours,
        };

        Ok(Self {
            port,
            db_path,
            jwt_secret,
            jwt_expires_hours,
            cors_origins,
            reminders: ReminderConfig {
                enabled,
                schedule,
                threshold_hours,
            },
        })
    }
}
