//! Feed configuration with environment overrides.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `MATCHDAY_FPL_BASE_URL` | `https://fantasy.premierleague.com/api` |
//! | `MATCHDAY_FOOTBALL_DATA_BASE_URL` | `https://api.football-data.org/v4` |
//! | `MATCHDAY_FPL_PER_MINUTE` / `MATCHDAY_FPL_PER_DAY` | `60` / `20000` |
//! | `MATCHDAY_FOOTBALL_DATA_PER_MINUTE` / `MATCHDAY_FOOTBALL_DATA_PER_DAY` | `10` / `14400` |
//! | `MATCHDAY_FOOTBALL_DATA_TOKEN` (or `FOOTBALL_DATA_TOKEN`) | unset |
//! | `MATCHDAY_REQUEST_TIMEOUT_MS` | `10000` |
//! | `MATCHDAY_BREAKER_THRESHOLD` / `MATCHDAY_BREAKER_COOLDOWN_SECS` | `5` / `30` |
//! | `MATCHDAY_MAX_RETRIES` / `MATCHDAY_MAX_QUEUE_WAIT_SECS` | `3` / `90` |
//! | `MATCHDAY_TTL_REFERENCE_SECS` | `21600` |
//! | `MATCHDAY_TTL_FIXTURES_SECS` | `1800` |
//! | `MATCHDAY_TTL_LIVE_SECS` / `MATCHDAY_TTL_LIVE_ACTIVE_SECS` | `120` / `30` |
//! | `MATCHDAY_CACHE_MAX_ENTRIES` / `MATCHDAY_CACHE_MAX_BYTES` | `512` / `67108864` |
//! | `MATCHDAY_SWEEP_INTERVAL_SECS` / `MATCHDAY_HEALTH_INTERVAL_SECS` | `60` / `300` |
//! | `MATCHDAY_ERROR_COOLDOWN_SECS` | `60` |

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::time::Duration;

use crate::adapters::{football_data, fpl};
use crate::cache::{CacheLimits, TtlPolicy};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::coordinator::RoutingTable;
use crate::error::ConfigError;
use crate::match_window::MatchWindowConfig;
use crate::rate_limiter::RateLimitConfig;
use crate::scheduler::SchedulerConfig;
use crate::ProviderId;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection, quota and breaker settings for one provider.
#[derive(Clone, PartialEq, Eq)]
pub struct SourcePolicy {
    pub provider: ProviderId,
    pub base_url: String,
    pub rate_limit: RateLimitConfig,
    pub request_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
    pub auth_token: Option<String>,
}

impl Debug for SourcePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePolicy")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .field("request_timeout", &self.request_timeout)
            .field("breaker", &self.breaker)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SourcePolicy {
    pub fn fpl_default() -> Self {
        Self {
            provider: ProviderId::Fpl,
            base_url: String::from(fpl::DEFAULT_BASE_URL),
            rate_limit: RateLimitConfig {
                per_minute: 60,
                per_day: 20_000,
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            breaker: CircuitBreakerConfig::default(),
            auth_token: None,
        }
    }

    /// Free-tier quota for football-data.org.
    pub fn football_data_default() -> Self {
        Self {
            provider: ProviderId::FootballData,
            base_url: String::from(football_data::DEFAULT_BASE_URL),
            rate_limit: RateLimitConfig {
                per_minute: 10,
                per_day: 14_400,
            },
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            breaker: CircuitBreakerConfig::default(),
            auth_token: None,
        }
    }

    pub fn default_for(provider: ProviderId) -> Self {
        match provider {
            ProviderId::Fpl => Self::fpl_default(),
            ProviderId::FootballData => Self::football_data_default(),
        }
    }

    pub fn with_rate_limit(mut self, per_minute: u32, per_day: u32) -> Self {
        self.rate_limit = RateLimitConfig {
            per_minute,
            per_day,
        };
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_breaker(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.breaker = CircuitBreakerConfig {
            failure_threshold,
            cooldown,
        };
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let prefix = self.provider.as_str();
        let checks = [
            ("per_minute", self.rate_limit.per_minute > 0),
            ("per_day", self.rate_limit.per_day > 0),
            ("request_timeout", !self.request_timeout.is_zero()),
            ("failure_threshold", self.breaker.failure_threshold > 0),
            ("breaker_cooldown", !self.breaker.cooldown.is_zero()),
        ];
        for (field, ok) in checks {
            if !ok {
                return Err(ConfigError::NonPositive {
                    field: format!("{prefix}.{field}"),
                });
            }
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::NonPositive {
                field: format!("{prefix}.base_url"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub sources: BTreeMap<ProviderId, SourcePolicy>,
    pub ttl: TtlPolicy,
    pub cache_limits: CacheLimits,
    pub scheduler: SchedulerConfig,
    pub match_window: MatchWindowConfig,
    pub sweep_interval: Duration,
    pub health_check_interval: Duration,
    /// Recovery delay for sources failing with anything other than a quota or breaker refusal.
    pub error_cooldown: Duration,
    pub routing: RoutingTable,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            sources: ProviderId::ALL
                .into_iter()
                .map(|provider| (provider, SourcePolicy::default_for(provider)))
                .collect(),
            ttl: TtlPolicy::default(),
            cache_limits: CacheLimits::default(),
            scheduler: SchedulerConfig::default(),
            match_window: MatchWindowConfig::default(),
            sweep_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(5 * 60),
            error_cooldown: Duration::from_secs(60),
            routing: RoutingTable::default(),
        }
    }
}

struct SourceVars {
    base_url: &'static str,
    per_minute: &'static str,
    per_day: &'static str,
}

const fn source_vars(provider: ProviderId) -> SourceVars {
    match provider {
        ProviderId::Fpl => SourceVars {
            base_url: "MATCHDAY_FPL_BASE_URL",
            per_minute: "MATCHDAY_FPL_PER_MINUTE",
            per_day: "MATCHDAY_FPL_PER_DAY",
        },
        ProviderId::FootballData => SourceVars {
            base_url: "MATCHDAY_FOOTBALL_DATA_BASE_URL",
            per_minute: "MATCHDAY_FOOTBALL_DATA_PER_MINUTE",
            per_day: "MATCHDAY_FOOTBALL_DATA_PER_DAY",
        },
    }
}

impl FeedConfig {
    /// Defaults overridden by `MATCHDAY_*` environment variables, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup: &lookup };
        let mut config = Self::default();

        let request_timeout = env.millis("MATCHDAY_REQUEST_TIMEOUT_MS")?;
        let threshold = env.parse::<u32>("MATCHDAY_BREAKER_THRESHOLD")?;
        let cooldown = env.secs("MATCHDAY_BREAKER_COOLDOWN_SECS")?;

        for (provider, policy) in &mut config.sources {
            let vars = source_vars(*provider);
            if let Some(base_url) = env.string(vars.base_url) {
                policy.base_url = base_url;
            }
            if let Some(per_minute) = env.parse(vars.per_minute)? {
                policy.rate_limit.per_minute = per_minute;
            }
            if let Some(per_day) = env.parse(vars.per_day)? {
                policy.rate_limit.per_day = per_day;
            }
            if let Some(timeout) = request_timeout {
                policy.request_timeout = timeout;
            }
            if let Some(threshold) = threshold {
                policy.breaker.failure_threshold = threshold;
            }
            if let Some(cooldown) = cooldown {
                policy.breaker.cooldown = cooldown;
            }
        }

        if let Some(policy) = config.sources.get_mut(&ProviderId::FootballData) {
            policy.auth_token = env
                .string("MATCHDAY_FOOTBALL_DATA_TOKEN")
                .or_else(|| env.string("FOOTBALL_DATA_TOKEN"));
        }

        if let Some(value) = env.secs("MATCHDAY_TTL_REFERENCE_SECS")? {
            config.ttl.reference = value;
        }
        if let Some(value) = env.secs("MATCHDAY_TTL_FIXTURES_SECS")? {
            config.ttl.fixtures = value;
        }
        if let Some(value) = env.secs("MATCHDAY_TTL_LIVE_SECS")? {
            config.ttl.live = value;
        }
        if let Some(value) = env.secs("MATCHDAY_TTL_LIVE_ACTIVE_SECS")? {
            config.ttl.live_active = value;
        }
        if let Some(value) = env.parse("MATCHDAY_CACHE_MAX_ENTRIES")? {
            config.cache_limits.max_entries = value;
        }
        if let Some(value) = env.parse("MATCHDAY_CACHE_MAX_BYTES")? {
            config.cache_limits.max_bytes = value;
        }
        if let Some(value) = env.parse("MATCHDAY_MAX_RETRIES")? {
            config.scheduler.retry.max_retries = value;
        }
        if let Some(value) = env.secs("MATCHDAY_MAX_QUEUE_WAIT_SECS")? {
            config.scheduler.max_queue_wait = value;
        }
        if let Some(value) = env.secs("MATCHDAY_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = value;
        }
        if let Some(value) = env.secs("MATCHDAY_HEALTH_INTERVAL_SECS")? {
            config.health_check_interval = value;
        }
        if let Some(value) = env.secs("MATCHDAY_ERROR_COOLDOWN_SECS")? {
            config.error_cooldown = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_source(mut self, policy: SourcePolicy) -> Self {
        self.sources.insert(policy.provider, policy);
        self
    }

    pub fn source(&self, provider: ProviderId) -> Result<&SourcePolicy, ConfigError> {
        self.sources
            .get(&provider)
            .ok_or(ConfigError::MissingSource { provider })
    }

    /// Startup validation. Routing is validated against adapter capabilities
    /// when the service is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for provider in ProviderId::ALL {
            self.source(provider)?.validate()?;
        }
        self.ttl.validate()?;
        self.cache_limits.validate()?;

        let durations = [
            ("scheduler.poll_interval", self.scheduler.poll_interval),
            ("scheduler.max_queue_wait", self.scheduler.max_queue_wait),
            ("sweep_interval", self.sweep_interval),
            ("health_check_interval", self.health_check_interval),
            ("error_cooldown", self.error_cooldown),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::NonPositive {
                    field: String::from(field),
                });
            }
        }
        Ok(())
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &'static str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        self.string(name)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|_| ConfigError::InvalidEnv { name, value })
            })
            .transpose()
    }

    fn secs(&self, name: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }

    fn millis(&self, name: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_millis))
    }
}
