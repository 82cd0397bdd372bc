//! Configuration loading, environment overrides and validation
//!
//! Configuration is a single TOML file with three kinds of sections:
//!
//! ```toml
//! [postgres]
//! host = "db.example.com"
//! user = "etl"
//! password = "..."
//! database = "warehouse"
//! port = 5432
//! schema = "dw_data"
//!
//! [polling]
//! running_delay_secs = 60
//! account_delay_secs = 10
//!
//! [instances.vantage]
//! api_base_url = "https://webapi.collaboratemd.com/v1"
//! username = "..."
//! password = "..."
//! accounts = ["10031998", "10032271"]
//! report_configs = [
//!     { report_id = "10062054", filter_id = "10137065", name = "ar_aging" },
//! ]
//! ```
//!
//! Every scalar can be overridden from the environment using `<SECTION>_<KEY>`
//! upper-cased, e.g. `POSTGRES_PASSWORD`, `POLLING_RUNNING_DELAY_SECS`,
//! `INSTANCE_VANTAGE_PASSWORD`. Environment values win over file values.
//!
//! # File resolution priority
//! 1. Command-line argument (highest priority)
//! 2. `CMDETL_CONFIG` environment variable
//! 3. `./config/config.toml`
//! 4. `<user config dir>/cmdetl/config.toml` (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "CMDETL_CONFIG";

/// Configuration file looked up relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

const DEFAULT_POSTGRES_PORT: u16 = 5432;
const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_RUNNING_DELAY_SECS: u64 = 60;
const DEFAULT_DUPLICATE_DELAY_SECS: u64 = 60;
const DEFAULT_ACCOUNT_DELAY_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Validated configuration
// ============================================================================

/// One report the vendor should generate for every account of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub report_id: String,
    pub filter_id: String,
    pub name: String,
}

/// A configured tenant with its own API credentials, accounts and reports
#[derive(Clone)]
pub struct InstanceConfig {
    pub instance_key: String,
    pub api_base_url: String,
    pub username: String,
    pub password: String,
    pub accounts: Vec<String>,
    pub report_configs: Vec<ReportConfig>,
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("instance_key", &self.instance_key)
            .field("api_base_url", &self.api_base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("accounts", &self.accounts)
            .field("report_configs", &self.report_configs)
            .finish()
    }
}

/// Ledger database settings, shared by all instances
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    /// Schema holding `account_reports`. Always a plain SQL identifier.
    pub schema: String,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("port", &self.port)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Timings for the report poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Wait before re-requesting a report the vendor says is still running
    pub running_delay: Duration,
    /// Wait before re-requesting after the vendor returned a known identifier
    pub duplicate_delay: Duration,
    /// Pause between two accounts of the same instance (upstream rate limits)
    pub account_delay: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Cap on requests per account/report pair; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            running_delay: Duration::from_secs(DEFAULT_RUNNING_DELAY_SECS),
            duplicate_delay: Duration::from_secs(DEFAULT_DUPLICATE_DELAY_SECS),
            account_delay: Duration::from_secs(DEFAULT_ACCOUNT_DELAY_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: None,
        }
    }
}

/// Complete, validated pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub postgres: PostgresConfig,
    pub polling: PollingConfig,
    /// Instances keyed by instance key
    pub instances: BTreeMap<String, InstanceConfig>,
}

impl PipelineConfig {
    /// Load and validate a configuration file, applying process environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text, applying process environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::from_toml_str_with_env(content, |key| std::env::var(key).ok())
    }

    /// Parse and validate TOML text with an explicit environment lookup
    pub fn from_toml_str_with_env<F>(content: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        raw.resolve(&env)
    }

    /// Look up one instance by key
    pub fn instance(&self, instance_key: &str) -> Result<&InstanceConfig> {
        self.instances.get(instance_key).ok_or_else(|| {
            Error::NotFound(format!(
                "Instance '{}' not found. Available instances: {}",
                instance_key,
                self.instance_keys().join(", ")
            ))
        })
    }

    /// All instance keys in sorted order
    pub fn instance_keys(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    /// Keep only the named instances. An empty selection keeps everything.
    pub fn retain_instances(&mut self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            self.instance(key)?;
        }
        self.instances.retain(|key, _| keys.contains(key));
        Ok(())
    }
}

/// Resolve the configuration file path
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: Working directory
    let local = PathBuf::from(DEFAULT_CONFIG_PATH);
    if local.exists() {
        return Ok(local);
    }

    // Priority 4: Per-user configuration directory
    if let Some(dir) = dirs::config_dir() {
        let user = dir.join("cmdetl").join("config.toml");
        if user.exists() {
            return Ok(user);
        }
    }

    Err(Error::Config(format!(
        "No configuration file found. Pass --config, set {}, or create {}",
        CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH
    )))
}

/// True for names safe to splice into SQL as an unquoted identifier
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Raw TOML model
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    postgres: RawPostgres,
    polling: RawPolling,
    instances: BTreeMap<String, RawInstance>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPostgres {
    host: Option<String>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    port: Option<u16>,
    schema: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPolling {
    running_delay_secs: Option<u64>,
    duplicate_delay_secs: Option<u64>,
    account_delay_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawInstance {
    api_base_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    accounts: Option<Vec<String>>,
    report_configs: Vec<RawReportConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReportConfig {
    report_id: Option<String>,
    filter_id: Option<String>,
    name: Option<String>,
}

/// Environment variable name for a `(section, key)` pair
fn env_key(section: &str, key: &str) -> String {
    format!("{}_{}", section, key)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Environment value for `(section, key)` if set, else the file value
fn override_str<F>(env: &F, section: &str, key: &str, fallback: Option<String>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(&env_key(section, key)).or(fallback)
}

/// Numeric variant of [`override_str`]; unparsable env values are recorded as errors
fn override_num<F, T>(
    env: &F,
    section: &str,
    key: &str,
    fallback: Option<T>,
    errors: &mut Vec<String>,
) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let name = env_key(section, key);
    match env(&name) {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                errors.push(format!("{}: '{}' is not a valid number", name, value));
                fallback
            }
        },
        None => fallback,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl RawConfig {
    fn resolve<F>(self, env: &F) -> Result<PipelineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut errors = Vec::new();

        let postgres = self.postgres.resolve(env, &mut errors);
        let polling = self.polling.resolve(env, &mut errors);

        if self.instances.is_empty() {
            errors.push(
                "No instances configured (expected [instances.<key>] sections)".to_string(),
            );
        }

        let mut instances = BTreeMap::new();
        for (key, raw) in self.instances {
            if let Some(instance) = raw.resolve(&key, env, &mut errors) {
                instances.insert(key, instance);
            }
        }

        match postgres {
            Some(postgres) if errors.is_empty() => Ok(PipelineConfig {
                postgres,
                polling,
                instances,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

impl RawPostgres {
    fn resolve<F>(self, env: &F, errors: &mut Vec<String>) -> Option<PostgresConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        const SECTION: &str = "POSTGRES";

        let host = non_empty(override_str(env, SECTION, "host", self.host));
        let user = non_empty(override_str(env, SECTION, "user", self.user));
        let database = non_empty(override_str(env, SECTION, "database", self.database));
        let password = override_str(env, SECTION, "password", self.password)
            .unwrap_or_default();
        let port = override_num(env, SECTION, "port", self.port, errors)
            .unwrap_or(DEFAULT_POSTGRES_PORT);
        let schema = non_empty(override_str(env, SECTION, "schema", self.schema))
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());

        if host.is_none() {
            errors.push("postgres: missing host".to_string());
        }
        if user.is_none() {
            errors.push("postgres: missing user".to_string());
        }
        if database.is_none() {
            errors.push("postgres: missing database".to_string());
        }
        if !is_sql_identifier(&schema) {
            errors.push(format!(
                "postgres: schema '{}' is not a valid SQL identifier",
                schema
            ));
        }

        Some(PostgresConfig {
            host: host?,
            user: user?,
            password,
            database: database?,
            port,
            schema,
        })
    }
}

impl RawPolling {
    fn resolve<F>(self, env: &F, errors: &mut Vec<String>) -> PollingConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        const SECTION: &str = "POLLING";
        let defaults = PollingConfig::default();

        let secs = |key: &str, value: Option<u64>, fallback: Duration, errors: &mut Vec<String>| {
            override_num(env, SECTION, key, value, errors)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        let running_delay = secs(
            "running_delay_secs",
            self.running_delay_secs,
            defaults.running_delay,
            errors,
        );
        let duplicate_delay = secs(
            "duplicate_delay_secs",
            self.duplicate_delay_secs,
            defaults.duplicate_delay,
            errors,
        );
        let account_delay = secs(
            "account_delay_secs",
            self.account_delay_secs,
            defaults.account_delay,
            errors,
        );
        let request_timeout = secs(
            "request_timeout_secs",
            self.request_timeout_secs,
            defaults.request_timeout,
            errors,
        );

        // Zero means "no cap", matching an absent setting
        let max_attempts = override_num(env, SECTION, "max_attempts", self.max_attempts, errors)
            .filter(|n| *n > 0);

        if request_timeout.is_zero() {
            errors.push(
                "polling: request_timeout_secs must be greater than zero".to_string(),
            );
        }

        PollingConfig {
            running_delay,
            duplicate_delay,
            account_delay,
            request_timeout,
            max_attempts,
        }
    }
}

impl RawInstance {
    fn resolve<F>(self, key: &str, env: &F, errors: &mut Vec<String>) -> Option<InstanceConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let section = format!("INSTANCE_{}", key);
        let before = errors.len();

        let api_base_url =
            non_empty(override_str(env, &section, "api_base_url", self.api_base_url));
        let username = non_empty(override_str(env, &section, "username", self.username));
        let password = non_empty(override_str(env, &section, "password", self.password));

        if api_base_url.is_none() {
            errors.push(format!("Instance '{}': missing api_base_url", key));
        }
        if username.is_none() {
            errors.push(format!("Instance '{}': missing username", key));
        }
        if password.is_none() {
            errors.push(format!("Instance '{}': missing password", key));
        }

        let accounts: Vec<String> = self
            .accounts
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if accounts.is_empty() {
            errors.push(format!("Instance '{}': missing or invalid accounts list", key));
        }

        let mut seen_ids = HashSet::new();
        let mut report_configs = Vec::with_capacity(self.report_configs.len());
        for (index, raw) in self.report_configs.into_iter().enumerate() {
            let report_id = non_empty(raw.report_id);
            let filter_id = non_empty(raw.filter_id);
            let name = non_empty(raw.name);

            match (report_id, filter_id, name) {
                (Some(report_id), Some(filter_id), Some(name)) => {
                    if !seen_ids.insert(report_id.clone()) {
                        errors.push(format!(
                            "Instance '{}': duplicate report_id {} in report_configs",
                            key, report_id
                        ));
                        continue;
                    }
                    report_configs.push(ReportConfig {
                        report_id,
                        filter_id,
                        name,
                    });
                }
                _ => errors.push(format!(
                    "Instance '{}': report_configs[{}] must define report_id, filter_id and name",
                    key, index
                )),
            }
        }

        if errors.len() > before {
            return None;
        }

        Some(InstanceConfig {
            instance_key: key.to_string(),
            api_base_url: api_base_url?.trim_end_matches('/').to_string(),
            username: username?,
            password: password?,
            accounts,
            report_configs,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
