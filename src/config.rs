use crate::error::{AppError, Result};

pub const HN_API_URL: &str = "https://hacker-news.firebaseio.com/v0";

/// Ranks kept per category. Anything past this is treated as unranked.
pub const MAX_RANK: usize = 90;

/// Stories per listing page. The attention coefficients were fitted against
/// three pages of this size, so changing it means re-fitting them.
pub const PAGE_SIZE: usize = 30;

/// Concurrent item-detail requests during a crawl.
pub const ITEM_FETCH_CONCURRENCY: usize = 16;

/// Seconds between the crawl deadline and the next minute boundary.
pub const TICK_SLACK_SECS: u64 = 1;

/// The archive worker is only signalled when at least this much of the tick remains.
pub const ARCHIVE_SIGNAL_MIN_REMAINING_SECS: u64 = 5;

/// Upload workers per archive pass.
pub const ARCHIVE_WORKERS: usize = 10;

/// Candidates selected per archive pass.
pub const ARCHIVE_BATCH_SIZE: i64 = 20;

/// /health/crawl reports unhealthy when the last crawl is older than this.
pub const CRAWL_STALE_SECS: i64 = 300;

/// Default model constants, fitted offline.
pub const DEFAULT_FATIGUE_FACTOR: f64 = 0.003462767;
pub const DEFAULT_PRIOR_WEIGHT: f64 = 2.2956;
pub const DEFAULT_GRAVITY: f64 = 1.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub enum ArchiveTarget {
    Dir(String),
    Http(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub db_path: String,
    pub api_port: u16,
    pub hn_api_url: String,
    /// Where archived time series go (ARCHIVE_DIR or ARCHIVE_URL). None disables archival.
    pub archive_target: Option<ArchiveTarget>,
    /// Minimum age of an item's last sample before it may be archived (ARCHIVE_AFTER_DAYS)
    pub archive_after_days: i64,
    pub fatigue_factor: f64,
    pub prior_weight: f64,
    pub gravity: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") | Err(_) => LogFormat::Pretty,
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "LOG_FORMAT must be 'json' or 'pretty', got '{other}'"
                )))
            }
        };

        let archive_target = match (std::env::var("ARCHIVE_DIR"), std::env::var("ARCHIVE_URL")) {
            (Ok(_), Ok(_)) => {
                return Err(AppError::Config(
                    "set only one of ARCHIVE_DIR and ARCHIVE_URL".to_string(),
                ))
            }
            (Ok(dir), Err(_)) => Some(ArchiveTarget::Dir(dir)),
            (Err(_), Ok(url)) => Some(ArchiveTarget::Http(url.trim_end_matches('/').to_string())),
            (Err(_), Err(_)) => None,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "ranker.db".to_string()),
            api_port: parse_env("API_PORT", 8080)?,
            hn_api_url: std::env::var("HN_API_URL")
                .unwrap_or_else(|_| HN_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            archive_target,
            archive_after_days: parse_env("ARCHIVE_AFTER_DAYS", 21)?,
            fatigue_factor: parse_env("FATIGUE_FACTOR", DEFAULT_FATIGUE_FACTOR)?,
            prior_weight: parse_env("PRIOR_WEIGHT", DEFAULT_PRIOR_WEIGHT)?,
            gravity: parse_env("GRAVITY", DEFAULT_GRAVITY)?,
        })
    }
}

/// Unset falls back to `default`; a value that does not parse is a startup error.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_uses_default_when_unset() {
        let v: u16 = parse_env("RANKER_TEST_UNSET_PORT", 8080).unwrap();
        assert_eq!(v, 8080);
    }

    #[test]
    fn parse_env_rejects_garbage() {
        std::env::set_var("RANKER_TEST_BAD_FLOAT", "not-a-number");
        let err = parse_env::<f64>("RANKER_TEST_BAD_FLOAT", 1.0).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
