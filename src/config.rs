use anyhow::{anyhow, Context, Result};
use keyring::Entry;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::api::DEFAULT_MODEL;

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_API_BASE_URL";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_VISION_MODEL: &str = "OPENAI_VISION_MODEL";
pub const ENV_HISTORY_WINDOW: &str = "STUDYCHAT_HISTORY_WINDOW";
pub const ENV_DB_PATH: &str = "STUDYCHAT_DB";

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
/// Prior turns sent when only the recent part of the history is used.
pub const RECENT_WINDOW: usize = 10;

const KEYRING_SERVICE: &str = "studychat_api_key";
const KEYRING_USER: &str = "default";

/// Credentials and endpoint handed to the API client at construction.
#[derive(Clone, PartialEq)]
pub struct ApiConfig {
    pub api_key: String,
    /// `None` means the public OpenAI endpoint.
    pub base_url: Option<String>,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// How much prior conversation goes out with each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryWindow {
    #[default]
    Full,
    Recent(usize),
}

impl FromStr for HistoryWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "all" => Ok(HistoryWindow::Full),
            "recent" => Ok(HistoryWindow::Recent(RECENT_WINDOW)),
            other => other
                .parse::<usize>()
                .map(HistoryWindow::Recent)
                .map_err(|_| anyhow!("Invalid history window '{}': expected 'full', 'recent' or a number", s)),
        }
    }
}

/// Model selection and request shaping used by the chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub text_model: String,
    pub vision_model: String,
    pub history_window: HistoryWindow,
    pub temperature: Option<f32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            text_model: DEFAULT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            history_window: HistoryWindow::Full,
            temperature: None,
        }
    }
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub vision_model: Option<String>,
    pub history_window: Option<HistoryWindow>,
    pub temperature: Option<f32>,
    pub db_path: Option<PathBuf>,
}

/// Everything read at startup, in one place.
#[derive(Debug, Clone)]
pub struct AppConfig {
    api_key: Option<String>,
    pub base_url: Option<String>,
    pub session: SessionConfig,
    pub db_path: PathBuf,
}

impl AppConfig {
    /// Reads the process environment (and the OS keyring for the API key).
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        Self::from_lookup(
            |name| std::env::var(name).ok(),
            get_api_key_from_keyring,
            overrides,
        )
    }

    /// Builds the configuration from an arbitrary variable lookup. `keyring`
    /// is only consulted when no API key is set in the variables.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        keyring: impl FnOnce() -> Option<String>,
        overrides: ConfigOverrides,
    ) -> Result<Self> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let history_window = match overrides.history_window {
            Some(window) => window,
            None => lookup(ENV_HISTORY_WINDOW)
                .map(|raw| raw.parse::<HistoryWindow>())
                .transpose()
                .context(format!("Failed to read {}", ENV_HISTORY_WINDOW))?
                .unwrap_or_default(),
        };

        let session = SessionConfig {
            text_model: overrides
                .model
                .or_else(|| lookup(ENV_MODEL))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            vision_model: overrides
                .vision_model
                .or_else(|| lookup(ENV_VISION_MODEL))
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
            history_window,
            temperature: overrides.temperature,
        };

        let db_path = match overrides.db_path.or_else(|| lookup(ENV_DB_PATH).map(PathBuf::from)) {
            Some(path) => path,
            None => default_db_path()?,
        };

        let api_key = lookup(ENV_API_KEY)
            .or_else(|| keyring().filter(|key| !key.trim().is_empty()));
        if api_key.is_none() {
            log::warn!("No API key found in {} or the OS keyring", ENV_API_KEY);
        }

        Ok(Self {
            api_key,
            base_url: overrides.base_url.or_else(|| lookup(ENV_BASE_URL)),
            session,
            db_path,
        })
    }

    /// The API client configuration; fails when no key was configured.
    pub fn api_config(&self) -> Result<ApiConfig> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            anyhow!(
                "API key is not configured. Set {} or run `studychat set-key <KEY>`.",
                ENV_API_KEY
            )
        })?;
        Ok(ApiConfig {
            api_key,
            base_url: self.base_url.clone(),
        })
    }
}

/// `<platform data-local dir>/studychat/studychat.sqlite`
pub fn default_db_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "studychat")
        .map(|dirs| dirs.data_local_dir().join("studychat.sqlite"))
        .context("Failed to resolve a data directory for the history database; pass --db")
}

/// The key stored by [`set_api_key_in_keyring`], if any.
pub fn get_api_key_from_keyring() -> Option<String> {
    let entry = match Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        Ok(entry) => entry,
        Err(e) => {
            log::debug!("Keyring unavailable: {:?}", e);
            return None;
        }
    };
    log::debug!("Retrieving API key from keyring for service: {}", KEYRING_SERVICE);
    match entry.get_password() {
        Ok(key) => Some(key),
        Err(e) => {
            log::debug!("No API key in keyring: {:?}", e);
            None
        }
    }
}

/// Stores an API key in the OS keyring.
///
/// The key is read back through a fresh entry, so a backend that accepts the
/// write but keeps nothing is reported as an error.
pub fn set_api_key_in_keyring(api_key: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for service: {}", KEYRING_SERVICE);
    entry
        .set_password(api_key)
        .context("Failed to set API key in keyring")?;

    match get_api_key_from_keyring() {
        Some(stored) if stored == api_key => Ok(()),
        _ => Err(anyhow!(
            "The OS keyring did not keep the API key. Set {} instead.",
            ENV_API_KEY
        )),
    }
}
