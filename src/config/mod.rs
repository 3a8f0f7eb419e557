//! Configuration management for pricewatch
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::extract::{FieldRule, RuleSet};
use crate::retry::RetryPolicy;
use crate::schedule::parse_run_time;
use crate::slot::{Slot, SlotKind};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Price source settings
    #[serde(default)]
    pub source: SourceConfig,

    /// HTTP fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Per-slot-kind politeness profiles
    #[serde(default)]
    pub politeness: PolitenessConfig,

    /// Prioritized extraction rules
    #[serde(default)]
    pub rules: RulesConfig,

    /// Crawl orchestration settings
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Daily schedule settings
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Price source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// A link is accepted only when it starts with one of these prefixes
    #[serde(default = "default_link_prefixes")]
    pub link_prefixes: Vec<String>,

    /// Seller label for the reference slot when none is recoverable
    #[serde(default = "default_reference_seller")]
    pub reference_seller: String,

    /// Seller label for competitor slots when none is recoverable
    #[serde(default = "default_unknown_seller")]
    pub unknown_seller: String,
}

impl SourceConfig {
    /// Fallback seller label for a slot
    pub fn fallback_seller(&self, slot: Slot) -> &str {
        match slot.kind() {
            SlotKind::Reference => &self.reference_seller,
            SlotKind::Competitor => &self.unknown_seller,
        }
    }
}

/// HTTP fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Client identity strings, one picked at random per request
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Global request ceiling across all hosts
    #[serde(default = "default_max_requests_per_second")]
    pub max_requests_per_second: u32,

    /// Whether to respect robots.txt
    #[serde(default = "default_respect_robots")]
    pub respect_robots_txt: bool,
}

/// Inclusive range of milliseconds a randomized pause is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// No pause at all
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Draw a pause from the range
    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(fastrand::u64(self.min_ms..=self.max_ms))
    }
}

/// Politeness profile applied to one kind of slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessProfile {
    /// Pause before each fetch
    pub fetch_delay: DelayRange,

    /// Pause after a target in a manually started run
    pub manual_gap: DelayRange,

    /// Pause after a target in a scheduled run
    pub scheduled_gap: DelayRange,
}

impl PolitenessProfile {
    /// A profile that never pauses
    pub fn immediate() -> Self {
        Self {
            fetch_delay: DelayRange::none(),
            manual_gap: DelayRange::none(),
            scheduled_gap: DelayRange::none(),
        }
    }
}

/// Politeness profiles keyed by slot kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    #[serde(default = "default_reference_profile")]
    pub reference: PolitenessProfile,

    #[serde(default = "default_competitor_profile")]
    pub competitor: PolitenessProfile,
}

fn default_reference_profile() -> PolitenessProfile {
    PolitenessProfile {
        fetch_delay: default_reference_fetch_delay(),
        manual_gap: default_reference_manual_gap(),
        scheduled_gap: default_reference_scheduled_gap(),
    }
}

fn default_competitor_profile() -> PolitenessProfile {
    PolitenessProfile {
        fetch_delay: default_competitor_fetch_delay(),
        manual_gap: default_competitor_manual_gap(),
        scheduled_gap: default_competitor_scheduled_gap(),
    }
}

impl PolitenessConfig {
    /// Look up the profile for a slot
    pub fn for_slot(&self, slot: Slot) -> &PolitenessProfile {
        match slot.kind() {
            SlotKind::Reference => &self.reference,
            SlotKind::Competitor => &self.competitor,
        }
    }

    /// Profiles that never pause (tests, dry runs)
    pub fn immediate() -> Self {
        Self {
            reference: PolitenessProfile::immediate(),
            competitor: PolitenessProfile::immediate(),
        }
    }
}

/// Extraction rule lists, tried in order per field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_title_rules")]
    pub title: Vec<FieldRule>,

    #[serde(default = "default_price_rules")]
    pub price: Vec<FieldRule>,

    #[serde(default = "default_seller_rules")]
    pub seller: Vec<FieldRule>,
}

impl RulesConfig {
    /// Compile the rule lists
    pub fn compile(&self) -> Result<RuleSet> {
        RuleSet::compile(&self.title, &self.price, &self.seller)
    }
}

/// Crawl orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Number of recent error strings kept in the crawl status
    #[serde(default = "default_error_buffer")]
    pub error_buffer: usize,

    /// Delay before the single-item run that follows a link edit
    #[serde(default = "default_edit_refresh_delay")]
    pub edit_refresh_delay_secs: u64,
}

/// Daily schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// IANA time zone the run time is interpreted in
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// Scheduler loop wake period in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Run time (HH:MM) used when no schedule is persisted
    #[serde(default = "default_run_time")]
    pub default_run_time: String,

    /// Whether automated runs include the reference slot by default
    #[serde(default = "default_include_reference")]
    pub include_reference: bool,
}

impl ScheduleConfig {
    /// Parse the configured time zone
    pub fn tz(&self) -> Result<Tz> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("Unknown time zone: {}", self.time_zone)))
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Write attempts before giving up on contention
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Backoff delay cap in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// SQLite busy timeout in milliseconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Default purge window in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for pricewatch data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            link_prefixes: default_link_prefixes(),
            reference_seller: default_reference_seller(),
            unknown_seller: default_unknown_seller(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agents: default_user_agents(),
            timeout_secs: default_fetch_timeout(),
            max_requests_per_second: default_max_requests_per_second(),
            respect_robots_txt: default_respect_robots(),
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            reference: default_reference_profile(),
            competitor: default_competitor_profile(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            title: default_title_rules(),
            price: default_price_rules(),
            seller: default_seller_rules(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            error_buffer: default_error_buffer(),
            edit_refresh_delay_secs: default_edit_refresh_delay(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
            tick_secs: default_tick_secs(),
            default_run_time: default_run_time(),
            include_reference: default_include_reference(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            busy_timeout_ms: default_busy_timeout(),
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Get the default base directory for pricewatch (~/.pricewatch)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pricewatch")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("pricewatch.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("pricewatch.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if pricewatch is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.link_prefixes.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::Config(
                "source.link_prefixes must name at least one prefix".to_string(),
            ));
        }

        if self.fetch.user_agents.is_empty() {
            return Err(Error::Config(
                "fetch.user_agents must not be empty".to_string(),
            ));
        }

        if self.fetch.max_requests_per_second == 0 {
            return Err(Error::Config(
                "fetch.max_requests_per_second must be positive".to_string(),
            ));
        }

        for (name, profile) in [
            ("reference", &self.politeness.reference),
            ("competitor", &self.politeness.competitor),
        ] {
            for (field, range) in [
                ("fetch_delay", profile.fetch_delay),
                ("manual_gap", profile.manual_gap),
                ("scheduled_gap", profile.scheduled_gap),
            ] {
                if range.min_ms > range.max_ms {
                    return Err(Error::Config(format!(
                        "politeness.{}.{}: min_ms must be <= max_ms",
                        name, field
                    )));
                }
            }
        }

        if self.store.retry_attempts == 0 {
            return Err(Error::Config(
                "store.retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.schedule.tick_secs == 0 {
            return Err(Error::Config(
                "schedule.tick_secs must be positive".to_string(),
            ));
        }

        self.schedule.tz()?;
        parse_run_time(&self.schedule.default_run_time)?;
        self.rules.compile()?;

        Ok(())
    }
}
