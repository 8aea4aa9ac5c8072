//! Engine configuration loaded from environment variables.
//!
//! Every setting has a default; unset or unparseable variables fall back
//! to it.
//!
//! | Variable                      | Default            | Description                           |
//! |-------------------------------|--------------------|---------------------------------------|
//! | `VIDSEARCH_BATCH_SIZE`        | `32`               | Frames embedded per batch             |
//! | `VIDSEARCH_EMBED_WORKERS`     | `0`                | Embedding threads (0 = one per core)  |
//! | `VIDSEARCH_EMBED_TIMEOUT_MS`  | `30000`            | Bound on one batch or query embedding |
//! | `VIDSEARCH_DECODE_TIMEOUT_MS` | `30000`            | Wait bound for the next sampled frame |
//! | `VIDSEARCH_EMBED_RETRIES`     | `2`                | Extra attempts per failed batch       |
//! | `VIDSEARCH_SKIP_DEGENERATE`   | `false`            | Drop zero-norm frames, don't fail     |
//! | `VIDSEARCH_QUERY_CACHE`       | `128`              | Cached query embeddings (0 = off)     |
//! | `VIDSEARCH_FPS`               | `1.0`              | Default sampling rate                 |
//! | `VIDSEARCH_TOP_K`             | `5`                | Default number of results             |
//! | `VIDSEARCH_FRAME_DIR`         | `frames`           | Frame image directory                 |
//! | `VIDSEARCH_INDEX_PATH`        | `video_index.svid` | Default persisted index               |
//! | `VIDSEARCH_LOG_LEVEL`         | `info`             | tracing filter                        |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IndexError, Result};
use crate::index::DegeneratePolicy;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub embed_workers: usize,
    pub embed_timeout: Duration,
    pub decode_timeout: Duration,
    pub embed_retries: usize,
    pub skip_degenerate: bool,
    pub query_cache_capacity: usize,
    pub default_fps: f64,
    pub default_top_k: usize,
    pub frame_dir: PathBuf,
    pub index_path: PathBuf,
    /// Tracing filter string, e.g. `"vidsearch=debug,info"`
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            embed_workers: 0,
            embed_timeout: Duration::from_secs(30),
            decode_timeout: Duration::from_secs(30),
            embed_retries: 2,
            skip_degenerate: false,
            query_cache_capacity: 128,
            default_fps: 1.0,
            default_top_k: 5,
            frame_dir: PathBuf::from("frames"),
            index_path: PathBuf::from("video_index.svid"),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    #[rustfmt::skip]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            batch_size:           env_parse("VIDSEARCH_BATCH_SIZE", d.batch_size),
            embed_workers:        env_parse("VIDSEARCH_EMBED_WORKERS", d.embed_workers),
            embed_timeout:        env_millis("VIDSEARCH_EMBED_TIMEOUT_MS", d.embed_timeout),
            decode_timeout:       env_millis("VIDSEARCH_DECODE_TIMEOUT_MS", d.decode_timeout),
            embed_retries:        env_parse("VIDSEARCH_EMBED_RETRIES", d.embed_retries),
            skip_degenerate:      env_bool("VIDSEARCH_SKIP_DEGENERATE", d.skip_degenerate),
            query_cache_capacity: env_parse("VIDSEARCH_QUERY_CACHE", d.query_cache_capacity),
            default_fps:          env_parse("VIDSEARCH_FPS", d.default_fps),
            default_top_k:        env_parse("VIDSEARCH_TOP_K", d.default_top_k),
            frame_dir:            env_parse("VIDSEARCH_FRAME_DIR", d.frame_dir),
            index_path:           env_parse("VIDSEARCH_INDEX_PATH", d.index_path),
            log_level:            env_str("VIDSEARCH_LOG_LEVEL", &d.log_level),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(IndexError::InvalidConfig(msg.to_string()));
        if self.batch_size == 0 {
            return fail("batch_size must be > 0");
        }
        if self.embed_timeout.is_zero() || self.decode_timeout.is_zero() {
            return fail("timeouts must be > 0");
        }
        if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
            return fail("default_fps must be > 0");
        }
        if self.default_top_k == 0 {
            return fail("default_top_k must be >= 1");
        }
        Ok(())
    }

    pub fn degenerate_policy(&self) -> DegeneratePolicy {
        if self.skip_degenerate {
            DegeneratePolicy::Skip
        } else {
            DegeneratePolicy::Reject
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
