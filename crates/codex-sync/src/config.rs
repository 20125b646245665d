use std::env;

use thiserror::Error;

pub const EVENT_CHANNEL_CAPACITY_ENV: &str = "CODEX_SYNC_EVENT_CHANNEL_CAPACITY";
pub const DEBUG_LOG_CAPACITY_ENV: &str = "CODEX_SYNC_DEBUG_LOG_CAPACITY";

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_DEBUG_LOG_CAPACITY: usize = 200;

/// Broadcast slots are allocated up front, so the channel is capped.
pub const MAX_EVENT_CHANNEL_CAPACITY: usize = 1 << 16;
pub const MAX_DEBUG_LOG_CAPACITY: usize = 100_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Slots in the inbound broadcast channel before slow subscribers lag.
    pub event_channel_capacity: usize,
    /// Records retained by the default ring debug sink.
    pub debug_log_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            debug_log_capacity: DEFAULT_DEBUG_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid CODEX_SYNC_EVENT_CHANNEL_CAPACITY: {0}")]
    InvalidEventChannelCapacity(String),
    #[error("invalid CODEX_SYNC_DEBUG_LOG_CAPACITY: {0}")]
    InvalidDebugLogCapacity(String),
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys use defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let event_channel_capacity = lookup(EVENT_CHANNEL_CAPACITY_ENV)
            .unwrap_or_else(|| DEFAULT_EVENT_CHANNEL_CAPACITY.to_string());
        let event_channel_capacity =
            parse_capacity(&event_channel_capacity, MAX_EVENT_CHANNEL_CAPACITY)
                .map_err(ConfigError::InvalidEventChannelCapacity)?;

        let debug_log_capacity = lookup(DEBUG_LOG_CAPACITY_ENV)
            .unwrap_or_else(|| DEFAULT_DEBUG_LOG_CAPACITY.to_string());
        let debug_log_capacity = parse_capacity(&debug_log_capacity, MAX_DEBUG_LOG_CAPACITY)
            .map_err(ConfigError::InvalidDebugLogCapacity)?;

        Ok(Self {
            event_channel_capacity,
            debug_log_capacity,
        })
    }
}

fn parse_capacity(raw: &str, max: usize) -> Result<usize, String> {
    let value = raw
        .trim()
        .parse::<usize>()
        .map_err(|error| error.to_string())?;
    if value == 0 {
        return Err("must be greater than zero".to_string());
    }
    if value > max {
        return Err(format!("{value} exceeds the maximum of {max}"));
    }
    Ok(value)
}
