use crate::models::auth::SettingsError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CareDataSettings {
    pub api: ApiSettings,
    pub cognito: CognitoSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Backend REST base URL, without a trailing slash
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CognitoSettings {
    pub enabled: bool,
    pub user_pool_id: Option<String>,
    pub client_id: Option<String>,
    /// Only set for app clients created with a secret; enables `SECRET_HASH`
    pub client_secret: Option<String>,
    pub region: String,
    /// Hosted-UI domain, e.g. `your-domain.auth.ap-southeast-2.amazoncognito.com`
    pub domain: Option<String>,
    pub scopes: Vec<String>,
    pub identity_provider: String,
    pub redirect_sign_in: String,
    pub redirect_sign_out: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub store_path: String,
    /// When set, the session file is encrypted at rest with a key derived from this
    pub store_key: Option<String>,
    pub sign_in_path: String,
    pub post_login_redirect: String,
    pub resend_cooldown_secs: u64,
    pub sign_out_timeout_ms: u64,
    pub callback_recheck_delays_ms: Vec<u64>,
    pub callback_watch_secs: u64,
    pub callback_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for CognitoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            user_pool_id: None,
            client_id: None,
            client_secret: None,
            region: "ap-southeast-2".to_string(),
            domain: None,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            identity_provider: "Google".to_string(),
            redirect_sign_in: "http://localhost:5173/".to_string(),
            redirect_sign_out: "http://localhost:5173/".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            store_path: "caredata-session.json".to_string(),
            store_key: None,
            sign_in_path: "/login".to_string(),
            post_login_redirect: "/dashboard".to_string(),
            resend_cooldown_secs: 60,
            sign_out_timeout_ms: 1000,
            callback_recheck_delays_ms: vec![300, 800, 1500, 2500],
            callback_watch_secs: 5,
            callback_poll_interval_ms: 500,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CareDataSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// Also loads `.env` and initializes the logger.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_env_file();

        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        Self::initialize_logging(&settings.logging);
        Ok(settings)
    }

    /// Load base settings from TOML file(s) or use defaults
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (applied separately afterwards)
    /// 2. Settings.toml in `CAREDATA_SECRETS_DIR`
    /// 3. Settings.toml in the current directory
    /// 4. Defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or its TOML is invalid.
    pub fn load_base_settings() -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_toml(&fs::read_to_string(&default_config_path)?)?;
            log::info!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("CAREDATA_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                settings = Self::from_toml(&fs::read_to_string(&secrets_path)?)?;
                log::info!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                log::info!(
                    "ℹ CAREDATA_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Parse settings from a TOML document; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has mistyped values.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(basic_toml::from_str(content)?)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_api_env_overrides(&mut settings.api);
        Self::apply_cognito_env_overrides(&mut settings.cognito);
        Self::apply_session_env_overrides(&mut settings.session);
        if let Ok(level) = std::env::var("RUST_LOG") {
            settings.logging.level = level;
        }
    }

    fn apply_api_env_overrides(api: &mut ApiSettings) {
        if let Ok(base_url) = std::env::var("API_BASE_URL") {
            api.base_url = base_url;
        }
        api.base_url = api.base_url.trim_end_matches('/').to_string();
        Self::apply_numeric_env_override("API_TIMEOUT_SECS", &mut api.timeout_secs);
    }

    fn apply_cognito_env_overrides(cognito: &mut CognitoSettings) {
        if let Ok(flag) = std::env::var("USE_COGNITO") {
            cognito.enabled = matches!(flag.trim(), "true" | "1");
        }
        Self::apply_optional_env_override("USER_POOL_ID", &mut cognito.user_pool_id);
        Self::apply_optional_env_override("CLIENT_ID", &mut cognito.client_id);
        Self::apply_optional_env_override("CLIENT_SECRET", &mut cognito.client_secret);
        Self::apply_optional_env_override("COGNITO_DOMAIN", &mut cognito.domain);
        if let Ok(region) = std::env::var("REGION") {
            if !region.trim().is_empty() {
                cognito.region = region;
            }
        }
        if let Ok(redirect) = std::env::var("REDIRECT_SIGN_IN") {
            cognito.redirect_sign_in = redirect;
        }
        if let Ok(redirect) = std::env::var("REDIRECT_SIGN_OUT") {
            cognito.redirect_sign_out = redirect;
        }
        cognito.domain = cognito.domain.as_deref().map(normalize_domain);
    }

    fn apply_session_env_overrides(session: &mut SessionSettings) {
        if let Ok(path) = std::env::var("SESSION_STORE_PATH") {
            session.store_path = path;
        }
        Self::apply_optional_env_override("SESSION_STORE_KEY", &mut session.store_key);
    }

    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Empty values count as unset
    fn apply_optional_env_override(env_var: &str, target: &mut Option<String>) {
        if let Ok(value) = std::env::var(env_var) {
            *target = if value.trim().is_empty() {
                None
            } else {
                Some(value)
            };
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    fn initialize_logging(logging: &LoggingSettings) {
        let env = env_logger::Env::default().default_filter_or(logging.level.as_str());
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("Logger already initialized");
        }
    }

    /// Federated identity is on and has the identifiers it needs
    #[must_use]
    pub fn is_cognito_enabled(&self) -> bool {
        self.cognito.enabled
            && self.cognito.user_pool_id.is_some()
            && self.cognito.client_id.is_some()
    }

    /// Google sign-in through the hosted UI needs a hosted-UI domain as well
    #[must_use]
    pub fn is_cognito_google_enabled(&self) -> bool {
        self.is_cognito_enabled() && self.cognito.domain.is_some()
    }
}

impl CognitoSettings {
    /// Regional user-pool JSON API endpoint
    #[must_use]
    pub fn idp_endpoint(&self) -> String {
        format!("https://cognito-idp.{}.amazonaws.com/", self.region)
    }

    #[must_use]
    pub fn hosted_ui_base(&self) -> Option<String> {
        self.domain
            .as_deref()
            .map(|domain| format!("https://{}", normalize_domain(domain)))
    }
}

impl SessionSettings {
    #[must_use]
    pub fn resend_cooldown(&self) -> Duration {
        Duration::from_secs(self.resend_cooldown_secs)
    }

    #[must_use]
    pub fn sign_out_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_out_timeout_ms)
    }

    #[must_use]
    pub fn callback_recheck_delays(&self) -> Vec<Duration> {
        self.callback_recheck_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    #[must_use]
    pub fn callback_watch_window(&self) -> Duration {
        Duration::from_secs(self.callback_watch_secs)
    }

    #[must_use]
    pub fn callback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.callback_poll_interval_ms)
    }
}

/// Strip scheme and trailing slash from a hosted-UI domain
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    domain
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}
