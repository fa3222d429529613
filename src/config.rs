use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Switches that decide how strictly the enrollment workflow treats its inputs.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Fail enrollment creation when any schedule id is unknown instead of skipping it
    #[serde(default)]
    pub strict_schedule_ids: bool,

    /// Refuse to seat a student in a schedule that is already full
    #[serde(default)]
    pub enforce_capacity: bool,

    /// Require the expected prior status for approve/reject/confirm/drop
    #[serde(default = "default_true_bool")]
    pub guard_transitions: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            strict_schedule_ids: false,
            enforce_capacity: false,
            guard_transitions: true,
        }
    }
}

/// Role to category overrides. An empty map keeps the built-in table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AccessConfig {
    #[serde(default)]
    pub roles: HashMap<String, Vec<String>>,
}

/// Process-wide settings, validated once at startup
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[validate(custom = "validate_database_url")]
    pub database_url: String,

    /// HS256 signing key
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: usize,

    /// Expected `iss` claim
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Expected `aud` claim
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// `development`, `test`, `staging`, `production`...
    #[validate(length(min = 1))]
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of the human formatter
    #[serde(default)]
    pub log_json: bool,

    /// Apply pending migrations before serving
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma separated origin list
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Opt into permissive CORS outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default)]
    pub cors_allow_credentials: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Upper bound on handler execution time
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,

    /// Bounded capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,

    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub access: AccessConfig,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything not passed in
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: 3600,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            workflow: WorkflowConfig::default(),
            access: AccessConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    fn is_test(&self) -> bool {
        self.environment.eq_ignore_ascii_case("test")
    }

    /// At least one non-blank origin is listed
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.is_test() || self.cors_allow_any_origin
    }

    /// Clamps a requested page size into the configured bounds
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.api_default_page_size)
            .clamp(1, self.api_max_page_size.max(1))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !(self.is_development() || self.is_test())
            && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET
        {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_auth_issuer() -> String {
    "enrollment-auth".to_string()
}

fn default_auth_audience() -> String {
    "enrollment-api".to_string()
}

fn validate_database_url(url: &str) -> Result<(), ValidationError> {
    const SCHEMES: [&str; 3] = ["postgres://", "postgresql://", "sqlite:"];
    if SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        Ok(())
    } else {
        let mut err = ValidationError::new("database_url");
        err.message = Some("Must start with postgres://, postgresql:// or sqlite:".into());
        Err(err)
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    if LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some(format!("log_level must be one of {}", LEVELS.join(", ")).into());
        Err(err)
    }
}

/// Placeholders that show up in copied sample configs
const PLACEHOLDER_SECRETS: [&str; 4] = [
    "CHANGE_THIS_SECRET_IN_PRODUCTION",
    "INSECURE_DEFAULT_DO_NOT_USE_IN_PRODUCTION",
    "your-secret-key",
    "default-secret-key",
];

fn weak_secret_reason(secret: &str) -> Option<&'static str> {
    let distinct = secret.chars().collect::<std::collections::HashSet<_>>().len();

    if secret.len() < 64 {
        Some("JWT secret must be at least 64 characters")
    } else if PLACEHOLDER_SECRETS
        .iter()
        .any(|placeholder| secret.eq_ignore_ascii_case(placeholder))
    {
        Some("JWT secret is a sample placeholder; generate a random one")
    } else if distinct == 1 {
        Some("JWT secret is a single repeated character")
    } else if distinct < 10 {
        Some("JWT secret needs at least 10 distinct characters")
    } else {
        None
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    match weak_secret_reason(secret.trim()) {
        None => Ok(()),
        Some(reason) => {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some(reason.into());
            Err(err)
        }
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Installs the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("enrollment_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    // try_init so repeated calls (tests, CLI subcommands) stay harmless
    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Reads `AppConfig` for the environment named by `RUN_ENV`/`APP_ENV`.
///
/// Sources, later ones winning:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Same layering as [`load_config`] but rooted at `dir` for an explicit environment
pub fn load_config_from(dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    // jwt_secret has no default on purpose
    let config = Config::builder()
        .set_default("database_url", "sqlite://enrollment.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET with a secure random string (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.check()?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

impl AppConfig {
    /// Runs derive-based validation followed by the cross-field checks
    pub fn check(&self) -> Result<(), AppConfigError> {
        self.validate().map_err(|e| {
            error!("Configuration validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;

        self.validate_additional_constraints().map_err(|e| {
            error!("Configuration security validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_SECRET: &str =
        "k9Qz7LmP2xVt8RwYb4NcHs6JdFg3AeUo1KiZrTy5WqXv0MnBp7LsDj2GhCf8Ek4Q";

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            STRONG_SECRET.into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://registrar.example.edu".into());
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn dev_secret_rejected_in_production() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        let err = cfg.validate_additional_constraints().unwrap_err();
        assert!(err.field_errors().contains_key("jwt_secret"));
    }

    #[test]
    fn weak_secret_and_bad_url_fail_validation() {
        let mut cfg = base_config();
        cfg.jwt_secret = "a".repeat(70);
        cfg.database_url = "mysql://localhost/db".into();
        cfg.log_level = "loud".into();

        let err = cfg.validate().unwrap_err();
        let fields = err.field_errors();
        assert!(fields.contains_key("jwt_secret"));
        assert!(fields.contains_key("database_url"));
        assert!(fields.contains_key("log_level"));
    }

    #[test]
    fn workflow_defaults_guard_transitions_only() {
        let workflow = WorkflowConfig::default();
        assert!(!workflow.strict_schedule_ids);
        assert!(!workflow.enforce_capacity);
        assert!(workflow.guard_transitions);
    }

    #[test]
    fn page_size_is_clamped() {
        let cfg = base_config();
        assert_eq!(cfg.page_size(None), 20);
        assert_eq!(cfg.page_size(Some(0)), 1);
        assert_eq!(cfg.page_size(Some(10_000)), 100);
    }

    #[test]
    fn nested_sections_deserialize_from_toml() {
        let raw = format!(
            r#"
            database_url = "sqlite::memory:"
            jwt_secret = "{STRONG_SECRET}"
            jwt_expiration = 3600
            host = "127.0.0.1"
            environment = "test"

            [workflow]
            enforce_capacity = true

            [access.roles]
            registrar = ["ENROLLMENT", "PAYMENT"]
            "#
        );

        let cfg: AppConfig = Config::builder()
            .add_source(File::from_str(&raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(cfg.workflow.enforce_capacity);
        assert!(cfg.workflow.guard_transitions);
        assert_eq!(
            cfg.access.roles.get("registrar"),
            Some(&vec!["ENROLLMENT".to_string(), "PAYMENT".to_string()])
        );
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn environment_file_overrides_default_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            format!(
                "jwt_secret = \"{STRONG_SECRET}\"\nport = 9000\nlog_level = \"debug\"\n\n[workflow]\nenforce_capacity = false\n"
            ),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging.toml"),
            "database_url = \"sqlite::memory:\"\ncors_allow_any_origin = true\n\n[workflow]\nenforce_capacity = true\n",
        )
        .unwrap();

        let cfg = load_config_from(dir.path(), "staging").unwrap();

        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.log_level(), "debug");
        assert_eq!(cfg.database_url(), "sqlite::memory:");
        assert!(cfg.workflow.enforce_capacity);
    }

    #[test]
    fn missing_secret_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.toml"), "port = 9000\n").unwrap();

        let err = load_config_from(dir.path(), "development").unwrap_err();
        assert!(matches!(err, AppConfigError::Load(_)));
    }
}
