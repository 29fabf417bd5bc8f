use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::debug_mode;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000/api";
pub const DEFAULT_STREAM_URL: &str = "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8";

/// Backoff policy for persistence calls that fail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one; `1` disables retries.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSettings {
    /// Fraction of the measured throughput a variant may use.
    pub abr_safety_factor: f64,
    /// Lower bound for media playlist refreshes on live streams.
    pub min_refresh_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            abr_safety_factor: 0.8,
            min_refresh_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CanvasSettings {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub default_stream_url: String,
    /// When set, overlays persist to a local SQLite file instead of the REST backend.
    pub database_path: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub stream: StreamSettings,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        let mut retry = RetryPolicy::default();
        if debug_mode() {
            retry.base_delay_ms = 10;
            retry.max_delay_ms = 100;
            retry.jitter_ms = 0;
        }

        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            request_timeout_ms: 10_000,
            default_stream_url: DEFAULT_STREAM_URL.into(),
            database_path: None,
            retry,
            stream: StreamSettings::default(),
        }
    }
}

impl CanvasSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CanvasSettings>,
}

impl SettingsStore {
    /// Opens the settings file at `path`; a missing or unreadable file yields defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring malformed settings at {}: {err}", path.display());
                CanvasSettings::default()
            })
        } else {
            CanvasSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> CanvasSettings {
        self.read().clone()
    }

    pub fn update<F>(&self, apply: F) -> Result<CanvasSettings>
    where
        F: FnOnce(&mut CanvasSettings),
    {
        let mut guard = self.write();
        apply(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: CanvasSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings at {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &CanvasSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, CanvasSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CanvasSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
