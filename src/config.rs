use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::client::poller::PollerConfig;
use crate::ocr::arbitrator::ArbitrationConfig;
use crate::ocr::dispatcher::DEFAULT_NATIVE_CONFIDENCE;
use crate::ocr::engine::EngineConfig;

#[derive(Clone, Debug)]
pub struct Config {
    /// Postgres registry when set, in-memory registry otherwise
    pub database_url: Option<String>,
    pub server_address: String,
    pub upload_path: String,
    pub tessdata_path: Option<String>,

    pub default_language: String,
    pub fallback_languages: Vec<String>,
    pub low_confidence_threshold: f32,
    pub early_exit_confidence: f32,
    pub length_multiplier: f32,
    pub confidence_multiplier: f32,
    pub native_text_confidence: f32,

    pub max_concurrent_jobs: usize,
    pub job_permit_wait_seconds: u64,
    /// In-flight jobs untouched this long are marked errored
    pub stale_job_seconds: u64,

    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    pub poll_max_consecutive_errors: u32,
    pub poll_stall_restart_after: u32,
    pub poll_slow_after: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Config {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            server_address: text("SERVER_ADDRESS", "0.0.0.0:8000"),
            upload_path: text("UPLOAD_PATH", "./uploads"),
            tessdata_path: lookup("TESSDATA_PATH").filter(|v| !v.trim().is_empty()),

            default_language: text("OCR_DEFAULT_LANGUAGE", "eng"),
            fallback_languages: text("OCR_FALLBACK_LANGUAGES", "eng,spa,fra,deu,ita,por")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            low_confidence_threshold: number(&lookup, "OCR_LOW_CONFIDENCE_THRESHOLD", 40.0)?,
            early_exit_confidence: number(&lookup, "OCR_EARLY_EXIT_CONFIDENCE", 75.0)?,
            length_multiplier: number(&lookup, "OCR_LENGTH_MULTIPLIER", 1.2)?,
            confidence_multiplier: number(&lookup, "OCR_CONFIDENCE_MULTIPLIER", 0.8)?,
            native_text_confidence: number(&lookup, "NATIVE_TEXT_CONFIDENCE", DEFAULT_NATIVE_CONFIDENCE)?,

            max_concurrent_jobs: number(&lookup, "MAX_CONCURRENT_JOBS", 4)?,
            job_permit_wait_seconds: number(&lookup, "JOB_PERMIT_WAIT_SECONDS", 300)?,
            stale_job_seconds: number(&lookup, "STALE_JOB_SECONDS", 1800)?,

            poll_interval_ms: number(&lookup, "POLL_INTERVAL_MS", 2000)?,
            poll_max_attempts: number(&lookup, "POLL_MAX_ATTEMPTS", 60)?,
            poll_max_consecutive_errors: number(&lookup, "POLL_MAX_CONSECUTIVE_ERRORS", 3)?,
            poll_stall_restart_after: number(&lookup, "POLL_STALL_RESTART_AFTER", 10)?,
            poll_slow_after: number(&lookup, "POLL_SLOW_AFTER", 20)?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tessdata_path: self.tessdata_path.as_ref().map(PathBuf::from),
        }
    }

    pub fn arbitration_config(&self) -> ArbitrationConfig {
        ArbitrationConfig {
            fallback_languages: self.fallback_languages.clone(),
            low_confidence_threshold: self.low_confidence_threshold,
            early_exit_confidence: self.early_exit_confidence,
            length_multiplier: self.length_multiplier,
            confidence_multiplier: self.confidence_multiplier,
            base_language: self.default_language.clone(),
            ..ArbitrationConfig::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts,
            max_consecutive_errors: self.poll_max_consecutive_errors,
            stall_restart_after: self.poll_stall_restart_after,
            slow_after: self.poll_slow_after,
        }
    }

    pub fn job_permit_wait(&self) -> Duration {
        Duration::from_secs(self.job_permit_wait_seconds)
    }

    pub fn stale_job_after(&self) -> Duration {
        Duration::from_secs(self.stale_job_seconds)
    }
}

fn number<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", raw, key, e)),
        None => Ok(default),
    }
}
