//! Engine configuration loaded from environment variables.

use std::collections::HashSet;
use std::time::Duration;

use genforge_core::backoff::BackoffConfig;
use genforge_core::provider::ProviderKind;
use genforge_providers::ProviderSettings;

/// Startup configuration errors. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: String },

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Unknown provider {0:?} in ENABLED_PROVIDERS")]
    UnknownProvider(String),
}

/// Default per-provider concurrency.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default price of one job, in usage units.
pub fn default_cost_units(kind: ProviderKind) -> i64 {
    match kind {
        ProviderKind::ImageA => 10,
        ProviderKind::ImageB => 20,
        ProviderKind::ImageC => 8,
        ProviderKind::Music => 15,
        ProviderKind::Video => 30,
    }
}

/// Configuration of one enabled provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub settings: ProviderSettings,
    /// Maximum concurrent outbound calls (submit or poll) to this provider.
    pub concurrency: usize,
    /// Units debited per job.
    pub cost_units: i64,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, settings: ProviderSettings) -> Self {
        Self {
            kind,
            settings,
            concurrency: DEFAULT_CONCURRENCY,
            cost_units: default_cost_units(kind),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cost_units(mut self, cost_units: i64) -> Self {
        self.cost_units = cost_units;
        self
    }
}

/// Timing and retry configuration shared by every provider engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the dispatcher looks for pending jobs.
    pub dispatch_interval: Duration,
    /// How often the reconciler sweeps submitted jobs.
    pub reconcile_interval: Duration,
    /// A submitted job is polled once it has gone this long without a poll.
    pub stale_after: Duration,
    /// How often the retriever re-scans succeeded jobs.
    pub retrieval_sweep_interval: Duration,
    /// Backoff for submissions failing with transport errors.
    pub submit_backoff: BackoffConfig,
    /// Backoff for asset downloads within one retrieval round.
    pub download_backoff: BackoffConfig,
    /// Retrieval rounds before a job is left for operators.
    pub max_retrieval_rounds: i32,
    /// A dispatcher claim older than this may be taken over.
    pub claim_lease: Duration,
    /// How long shutdown waits for in-flight work.
    pub shutdown_grace: Duration,
    pub providers: Vec<ProviderConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            retrieval_sweep_interval: Duration::from_secs(30),
            submit_backoff: BackoffConfig::default().with_max_attempts(4),
            download_backoff: BackoffConfig::default().with_max_attempts(5),
            max_retrieval_rounds: 10,
            claim_lease: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(10),
            providers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `ENABLED_PROVIDERS`             | (none)  |
    /// | `DISPATCH_INTERVAL_SECS`        | `1`     |
    /// | `RECONCILE_INTERVAL_SECS`       | `10`    |
    /// | `STALE_AFTER_SECS`              | `30`    |
    /// | `RETRIEVAL_SWEEP_INTERVAL_SECS` | `30`    |
    /// | `SUBMIT_MAX_ATTEMPTS`           | `4`     |
    /// | `DOWNLOAD_MAX_ATTEMPTS`         | `5`     |
    /// | `MAX_RETRIEVAL_ROUNDS`          | `10`    |
    /// | `CLAIM_LEASE_SECS`              | `600`   |
    /// | `SHUTDOWN_GRACE_SECS`           | `10`    |
    ///
    /// Each enabled provider then reads `<PREFIX>_API_URL` and
    /// `<PREFIX>_WEBHOOK_SECRET` (required), `<PREFIX>_API_KEY`,
    /// `<PREFIX>_CONCURRENCY` (`4`), `<PREFIX>_COST_UNITS`,
    /// `<PREFIX>_REQUEST_TIMEOUT_SECS` (`60`) and `<PREFIX>_CALLBACK_URL`,
    /// where the prefix is `IMAGE_A`, `IMAGE_B`, `IMAGE_C`, `MUSIC` or `VIDEO`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };
        let defaults = Self::default();

        let submit_attempts = env.parse_or("SUBMIT_MAX_ATTEMPTS", 4u32)?;
        let download_attempts = env.parse_or("DOWNLOAD_MAX_ATTEMPTS", 5u32)?;

        let mut providers = Vec::new();
        for kind in enabled_providers(env.get("ENABLED_PROVIDERS").as_deref())? {
            providers.push(provider_config(&env, kind)?);
        }

        Ok(Self {
            dispatch_interval: env.nonzero_secs_or("DISPATCH_INTERVAL_SECS", 1)?,
            reconcile_interval: env.nonzero_secs_or("RECONCILE_INTERVAL_SECS", 10)?,
            stale_after: env.secs_or("STALE_AFTER_SECS", 30)?,
            retrieval_sweep_interval: env.nonzero_secs_or("RETRIEVAL_SWEEP_INTERVAL_SECS", 30)?,
            submit_backoff: defaults.submit_backoff.with_max_attempts(submit_attempts),
            download_backoff: defaults.download_backoff.with_max_attempts(download_attempts),
            max_retrieval_rounds: env.parse_or("MAX_RETRIEVAL_ROUNDS", 10i32)?.max(1),
            claim_lease: env.secs_or("CLAIM_LEASE_SECS", 600)?,
            shutdown_grace: env.secs_or("SHUTDOWN_GRACE_SECS", 10)?,
            providers,
        })
    }

    /// Configuration for `kind`, if it is enabled.
    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.kind == kind)
    }
}

/// Parse the comma-separated `ENABLED_PROVIDERS` list.
///
/// Blank entries are skipped and duplicates collapse; an unknown name is
/// an error.
fn enabled_providers(raw: Option<&str>) -> Result<Vec<ProviderKind>, ConfigError> {
    let mut seen = HashSet::new();
    let mut kinds = Vec::new();
    for name in raw.unwrap_or("").split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = ProviderKind::from_name(name)
            .map_err(|_| ConfigError::UnknownProvider(name.to_string()))?;
        if seen.insert(kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn provider_config(env: &Env<'_>, kind: ProviderKind) -> Result<ProviderConfig, ConfigError> {
    let prefix = kind.env_prefix();
    let var = |suffix: &str| format!("{prefix}_{suffix}");

    let api_url = env.require(&var("API_URL"))?;
    if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            name: var("API_URL"),
            value: api_url,
            reason: "must be an http(s) URL".into(),
        });
    }
    let webhook_secret = env.require(&var("WEBHOOK_SECRET"))?;
    let api_key = env.get(&var("API_KEY")).unwrap_or_default();

    let mut settings = ProviderSettings::new(api_url, api_key, webhook_secret)
        .with_request_timeout(env.nonzero_secs_or(&var("REQUEST_TIMEOUT_SECS"), 60)?);
    if let Some(callback) = env.get(&var("CALLBACK_URL")) {
        settings = settings.with_callback_url(callback);
    }

    let concurrency: usize = env.parse_or(&var("CONCURRENCY"), DEFAULT_CONCURRENCY)?;
    if concurrency == 0 {
        return Err(ConfigError::Invalid {
            name: var("CONCURRENCY"),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    let cost_units: i64 = env.parse_or(&var("COST_UNITS"), default_cost_units(kind))?;
    if cost_units <= 0 {
        return Err(ConfigError::Invalid {
            name: var("COST_UNITS"),
            value: cost_units.to_string(),
            reason: "must be positive".into(),
        });
    }

    Ok(ProviderConfig {
        kind,
        settings,
        concurrency,
        cost_units,
    })
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// A set, non-blank variable.
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &str) -> Result<String, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::Missing {
            name: name.to_string(),
        })
    }

    fn parse_or<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
                value: raw,
            }),
        }
    }

    fn secs_or(&self, name: &str, default: u64) -> Result<Duration, ConfigError> {
        self.parse_or(name, default).map(Duration::from_secs)
    }

    /// Like [`Env::secs_or`] for periods and timeouts, where zero is invalid.
    fn nonzero_secs_or(&self, name: &str, default: u64) -> Result<Duration, ConfigError> {
        let duration = self.secs_or(name, default)?;
        if duration.is_zero() {
            return Err(ConfigError::Invalid {
                name: name.to_string(),
                value: "0".into(),
                reason: "must be at least 1 second".into(),
            });
        }
        Ok(duration)
    }
}
