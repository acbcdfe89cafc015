//! Configuration management for the booking engine.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unparseable numbers fall back to their defaults; grid bounds are validated
//! when the [`SlotGrid`] is built.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tutor_booking_core::{Result, SlotGrid};

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` configuration; `None` selects the in-memory store
    pub database: Option<DatabaseConfig>,
    /// Daily booking window
    pub grid: GridConfig,
    /// Commit retry behaviour
    pub commit: CommitConfig,
    /// Outbox dispatcher settings
    pub outbox: OutboxConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Daily grid window, as `"HH:MM"` strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// First bookable grid point
    pub open: String,
    /// Last bookable grid point (inclusive)
    pub close: String,
}

/// Commit retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Retries after a lost version check
    pub max_retries: usize,
    /// First backoff delay in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,
}

/// Outbox dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Entries handled per drain
    pub batch_size: usize,
    /// Attempts before an entry is marked failed
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database: lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .map(|url| DatabaseConfig {
                    url,
                    max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                    connect_timeout: parse(&lookup, "DATABASE_CONNECT_TIMEOUT").unwrap_or(30),
                }),
            grid: GridConfig {
                open: lookup("BOOKING_GRID_OPEN").unwrap_or_else(|| "09:00".to_string()),
                close: lookup("BOOKING_GRID_CLOSE").unwrap_or_else(|| "21:30".to_string()),
            },
            commit: CommitConfig {
                max_retries: parse(&lookup, "BOOKING_COMMIT_MAX_RETRIES").unwrap_or(3),
                initial_delay_ms: parse(&lookup, "BOOKING_COMMIT_INITIAL_DELAY_MS").unwrap_or(20),
                max_delay_ms: parse(&lookup, "BOOKING_COMMIT_MAX_DELAY_MS").unwrap_or(500),
            },
            outbox: OutboxConfig {
                batch_size: parse(&lookup, "BOOKING_OUTBOX_BATCH_SIZE").unwrap_or(50),
                max_attempts: parse(&lookup, "BOOKING_OUTBOX_MAX_ATTEMPTS").unwrap_or(5),
            },
        }
    }

    /// The configured daily grid.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::InvalidGridAlignment` if a bound is not a grid
    /// time, or `BookingError::InvalidTimeRange` if `close` precedes `open`.
    pub fn slot_grid(&self) -> Result<SlotGrid> {
        SlotGrid::new(self.grid.open.parse()?, self.grid.close.parse()?)
    }

    /// The commit retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.commit.max_retries)
            .initial_delay(Duration::from_millis(self.commit.initial_delay_ms))
            .max_delay(Duration::from_millis(self.commit.max_delay_ms))
            .build()
    }
}

/// Parse a trimmed value for `key`; missing or malformed values yield `None`.
fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}
