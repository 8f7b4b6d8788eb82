//! DebateDaemon configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Main DebateDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Rate-limit retry policy around every generation call
    pub gateway: GatewayConfig,

    /// Session scheduling cycle
    pub scheduler: SchedulerConfig,

    /// Round dispatch cycle
    pub dispatcher: DispatcherConfig,

    /// Worker pool and chaining
    pub executor: ExecutorConfig,

    /// History compression for long sessions
    pub compression: CompressionConfig,

    /// Token budgets for the closing artifacts
    pub completion: CompletionConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Directory with `.pmt` files overriding the embedded prompts
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: Option<PathBuf>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that required environment variables are set and that the
    /// scheduling parameters are usable. Call this early in startup to fail
    /// fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        self.llm.get_api_key()?;
        self.validate_parameters()
    }

    /// Parameter checks that do not touch the environment
    pub fn validate_parameters(&self) -> Result<()> {
        if self.scheduler.roster_size == 0 {
            return Err(eyre!("scheduler.roster-size must be at least 1"));
        }
        if self.scheduler.max_sessions_per_participant == 0 {
            return Err(eyre!("scheduler.max-sessions-per-participant must be at least 1"));
        }
        if self.executor.workers == 0 {
            return Err(eyre!("executor.workers must be at least 1"));
        }
        if self.executor.max_deliveries == 0 {
            return Err(eyre!("executor.max-deliveries must be at least 1"));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(eyre!("dispatcher.batch-size must be at least 1"));
        }
        if self.gateway.backoff_base < 1.0 {
            return Err(eyre!("gateway.backoff-base must be at least 1.0"));
        }
        // A deferred turn must come back before the dispatcher treats its round as stalled
        let backoff_ms = i64::try_from(self.executor.chain_backoff_ms).unwrap_or(i64::MAX);
        if backoff_ms >= self.dispatcher.stall_timeout_ms() {
            return Err(eyre!(
                "executor.chain-backoff-ms ({}) must be below dispatcher.stall-timeout-secs ({}s)",
                self.executor.chain_backoff_ms,
                self.dispatcher.stall_timeout_secs
            ));
        }
        if self.completion.close_lease_secs == 0 {
            return Err(eyre!("completion.close-lease-secs must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .debatedaemon.yml
        let local_config = PathBuf::from(".debatedaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/debatedaemon/debatedaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("debatedaemon").join("debatedaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("anthropic" or "openai")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response (caps every request)
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
            timeout_ms: 120_000,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| eyre!("LLM API key not found. Set the {} environment variable.", self.api_key_env))
    }
}

/// Retry policy for rate-limited generation calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Retries after the first rate-limited attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Exponential base: delay = base^attempt * unit
    #[serde(rename = "backoff-base")]
    pub backoff_base: f64,

    /// Backoff unit in milliseconds
    #[serde(rename = "backoff-unit-ms")]
    pub backoff_unit_ms: u64,

    /// Upper bound on a single backoff delay, before jitter
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Uniform random jitter added to each delay, in [0, jitter)
    #[serde(rename = "jitter-ms")]
    pub jitter_ms: u64,

    /// Maximum concurrent provider calls
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: 2.0,
            backoff_unit_ms: 1000,
            max_delay_ms: 60_000,
            jitter_ms: 1000,
            max_concurrent: 10,
        }
    }
}

/// Round dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Seconds between dispatch cycles
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// Maximum rounds dispatched per cycle
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// A processing round with no progress for this long is re-driven
    #[serde(rename = "stall-timeout-secs")]
    pub stall_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            batch_size: 20,
            stall_timeout_secs: 900,
        }
    }
}

impl DispatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stall_timeout_ms(&self) -> i64 {
        (self.stall_timeout_secs as i64).saturating_mul(1000)
    }
}

/// Worker pool and chaining configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Bounded queue capacity
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Deliveries of one item before an infrastructure failure drops it
    #[serde(rename = "max-deliveries")]
    pub max_deliveries: u32,

    /// Attempts for a participant whose generation stays rate limited
    #[serde(rename = "max-chain-attempts")]
    pub max_chain_attempts: u32,

    /// Delay before a rate-limited participant is re-enqueued, in milliseconds
    #[serde(rename = "chain-backoff-ms")]
    pub chain_backoff_ms: u64,

    /// Token budget for one statement
    #[serde(rename = "statement-max-tokens")]
    pub statement_max_tokens: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_deliveries: 3,
            max_chain_attempts: 3,
            chain_backoff_ms: 60_000,
            statement_max_tokens: 1024,
        }
    }
}

impl ExecutorConfig {
    pub fn chain_backoff(&self) -> Duration {
        Duration::from_millis(self.chain_backoff_ms)
    }
}

/// Context compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Rounds numbered at or above this get tiered context
    pub threshold: u32,

    /// Token budget for a rolling summary
    #[serde(rename = "summary-max-tokens")]
    pub summary_max_tokens: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: 4,
            summary_max_tokens: 1024,
        }
    }
}

/// Token budgets for the session-closing calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    #[serde(rename = "summary-max-tokens")]
    pub summary_max_tokens: u32,

    #[serde(rename = "verdict-max-tokens")]
    pub verdict_max_tokens: u32,

    #[serde(rename = "persona-max-tokens")]
    pub persona_max_tokens: u32,

    /// How long a session close owns its claim before recovery may take over
    #[serde(rename = "close-lease-secs")]
    pub close_lease_secs: u64,
}

impl CompletionConfig {
    pub fn close_lease_ms(&self) -> i64 {
        (self.close_lease_secs as i64).saturating_mul(1000)
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            summary_max_tokens: 2048,
            verdict_max_tokens: 2048,
            persona_max_tokens: 1024,
            close_lease_secs: 1800,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for DebateStore data
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/debatedaemon on Linux)
        let store_dir = dirs::data_dir()
            .map(|d| d.join("debatedaemon"))
            .unwrap_or_else(|| PathBuf::from(".debatestore"))
            .to_string_lossy()
            .into_owned();

        Self { store_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.gateway.max_retries, 5);
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.compression.threshold, 4);
        assert!(config.prompts_dir.is_none());
        config.validate_parameters().unwrap();
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  provider: openai
  model: gpt-4o
  api-key-env: MY_API_KEY
  max-tokens: 4096

gateway:
  max-retries: 2
  backoff-base: 3.0
  jitter-ms: 0

scheduler:
  roster-size: 3
  max-sessions-per-participant: 1
  default-mode: extended

dispatcher:
  stall-timeout-secs: 60

executor:
  workers: 8
  chain-backoff-ms: 500

compression:
  threshold: 6

prompts-dir: /etc/debatedaemon/prompts
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.gateway.max_retries, 2);
        assert_eq!(config.gateway.backoff_base, 3.0);
        assert_eq!(config.gateway.jitter_ms, 0);
        assert_eq!(config.scheduler.roster_size, 3);
        assert_eq!(config.scheduler.max_sessions_per_participant, 1);
        assert_eq!(config.scheduler.default_mode, crate::domain::DebateMode::Extended);
        assert_eq!(config.dispatcher.stall_timeout_ms(), 60_000);
        assert_eq!(config.executor.workers, 8);
        assert_eq!(config.executor.chain_backoff(), Duration::from_millis(500));
        assert_eq!(config.compression.threshold, 6);
        assert_eq!(
            config.prompts_dir,
            Some(PathBuf::from("/etc/debatedaemon/prompts"))
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
llm:
  model: claude-haiku
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "claude-haiku");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.dispatcher.batch_size, 20);
        assert_eq!(config.scheduler.roster_size, 4);
    }

    #[test]
    fn test_validate_parameters_rejects_zero_roster() {
        let mut config = Config::default();
        config.scheduler.roster_size = 0;
        assert!(config.validate_parameters().is_err());

        let mut config = Config::default();
        config.executor.workers = 0;
        assert!(config.validate_parameters().is_err());
    }

    #[test]
    fn test_validate_parameters_rejects_backoff_past_stall_timeout() {
        let mut config = Config::default();
        config.dispatcher.stall_timeout_secs = 60;
        config.executor.chain_backoff_ms = 60_000;
        let err = config.validate_parameters().unwrap_err();
        assert!(err.to_string().contains("chain-backoff-ms"));

        config.executor.chain_backoff_ms = 59_999;
        assert!(config.validate_parameters().is_ok());

        config.completion.close_lease_secs = 0;
        assert!(config.validate_parameters().is_err());
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let config = LlmConfig {
            api_key_env: "DEBATEDAEMON_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let err = config.get_api_key().unwrap_err();
        assert!(err.to_string().contains("DEBATEDAEMON_TEST_UNSET_KEY"));
    }

    #[test]
    #[serial]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "executor:\n  workers: 2").unwrap();
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.executor.workers, 2);
    }

    #[test]
    #[serial]
    fn test_load_explicit_missing_path_fails() {
        let path = PathBuf::from("/nonexistent/debatedaemon.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
