use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::srs::SchedulerParams;

/// Session composition and prefetch tuning.
#[derive(Debug, Clone)]
pub struct SchedulerTuning {
    /// Hard ceiling on items one study session will ever hold.
    pub session_cap: usize,
    /// Remaining-item count at which prefetch kicks in.
    pub low_water_mark: usize,
    pub prefetch_batch_size: i64,
    /// Bound on the cross-session recently-seen history.
    pub seen_history_limit: usize,
    /// Idle time after which a session is force-flushed and evicted.
    pub session_idle_timeout: Duration,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            session_cap: 50,
            low_water_mark: 5,
            prefetch_batch_size: 20,
            seen_history_limit: 200,
            session_idle_timeout: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub database_url: String,
    pub params: SchedulerParams,
    pub tuning: SchedulerTuning,
    pub batch: BatchConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        let port = env_parse("PORT", 3000u16);
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://lexikon.db".to_string());

        let mut params = SchedulerParams::default();
        params.desired_retention = env_parse("DESIRED_RETENTION", params.desired_retention);
        params.lapse_factor = env_parse("LAPSE_FACTOR", params.lapse_factor);

        let defaults = SchedulerTuning::default();
        let tuning = SchedulerTuning {
            session_cap: env_parse("SESSION_CAP", defaults.session_cap),
            low_water_mark: env_parse("PREFETCH_LOW_WATER_MARK", defaults.low_water_mark),
            prefetch_batch_size: env_parse("PREFETCH_BATCH_SIZE", defaults.prefetch_batch_size),
            seen_history_limit: env_parse("SEEN_HISTORY_LIMIT", defaults.seen_history_limit),
            session_idle_timeout: Duration::from_millis(env_parse(
                "SESSION_IDLE_TIMEOUT_MS",
                defaults.session_idle_timeout.as_millis() as u64,
            )),
        };

        let batch_defaults = BatchConfig::default();
        let batch = BatchConfig {
            flush_threshold: env_parse("FLUSH_SIZE_THRESHOLD", batch_defaults.flush_threshold),
            flush_interval: Duration::from_millis(env_parse(
                "FLUSH_INTERVAL_MS",
                batch_defaults.flush_interval.as_millis() as u64,
            )),
            flush_batch_cap: env_parse("FLUSH_BATCH_CAP", batch_defaults.flush_batch_cap),
            retry_budget: env_parse("FLUSH_RETRY_BUDGET", batch_defaults.retry_budget),
        };

        Self {
            host,
            port,
            log_level,
            database_url,
            params,
            tuning,
            batch,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}
