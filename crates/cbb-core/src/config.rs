use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{errors::Error, Result};

pub const DEFAULT_CERTBOT_PATH: &str = "/path/to/certbot-auto";
pub const DEFAULT_CHANNEL: &str = "#general";
pub const DEFAULT_SUDO: &str = "sudo";
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 14);
/// Longest accepted renewal period. Certificates expire long before this.
pub const MAX_RENEW_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 366);

/// Plugin configuration: what the certbot commands and the renewal timer read.
///
/// Key names match the host-facing schema (`cert_paths`, `certbot`, `channel`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Watched certificate paths. No duplicates; each existed when added.
    pub cert_paths: Vec<String>,
    /// Path to the certbot executable.
    pub certbot: String,
    /// Channel that receives scheduled renewal output.
    pub channel: String,
    /// Privilege-escalation prefix for certbot calls that need root.
    pub sudo: Option<String>,
    pub renew_interval_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            cert_paths: Vec::new(),
            certbot: DEFAULT_CERTBOT_PATH.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            sudo: Some(DEFAULT_SUDO.to_string()),
            renew_interval_secs: DEFAULT_RENEW_INTERVAL.as_secs(),
        }
    }
}

impl PluginConfig {
    /// The timer period, kept within `1s..=MAX_RENEW_INTERVAL`.
    pub fn renew_interval(&self) -> Duration {
        // A zero period would make the timer spin.
        Duration::from_secs(self.renew_interval_secs.clamp(1, MAX_RENEW_INTERVAL.as_secs()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.renew_interval_secs > MAX_RENEW_INTERVAL.as_secs() {
            return Err(Error::Config(format!(
                "renew_interval_secs must be at most {}, got {}",
                MAX_RENEW_INTERVAL.as_secs(),
                self.renew_interval_secs
            )));
        }
        Ok(())
    }

    /// The privilege prefix, if one is configured and non-blank.
    pub fn sudo_prefix(&self) -> Option<&str> {
        self.sudo.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Host-supplied overrides. Only the fields that are present replace defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub cert_paths: Option<Vec<String>>,
    pub certbot: Option<String>,
    pub channel: Option<String>,
    /// `Some("")` disables the privilege prefix.
    pub sudo: Option<String>,
    pub renew_interval_secs: Option<u64>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Parse overrides from a JSON object. Unknown keys are ignored.
    pub fn from_json(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Overrides from `CERTBOT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env_str)
    }

    /// Overrides from `CERTBOT_*` variables resolved through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let renew_interval_secs = match var("CERTBOT_RENEW_INTERVAL_SECS") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("CERTBOT_RENEW_INTERVAL_SECS is not a number: {raw}"))
            })?),
            None => None,
        };

        Ok(Self {
            cert_paths: var("CERTBOT_CERT_PATHS").map(|v| parse_csv(&v)),
            certbot: var("CERTBOT_PATH").and_then(non_empty),
            channel: var("CERTBOT_CHANNEL").and_then(non_empty),
            sudo: var("CERTBOT_SUDO"),
            renew_interval_secs,
        })
    }
}

/// Shallow merge: copy `defaults`, then overwrite only the fields present in
/// `overrides`.
pub fn merge(defaults: &PluginConfig, overrides: &ConfigOverrides) -> PluginConfig {
    let mut out = defaults.clone();
    if let Some(v) = &overrides.cert_paths {
        out.cert_paths = v.clone();
    }
    if let Some(v) = &overrides.certbot {
        out.certbot = v.clone();
    }
    if let Some(v) = &overrides.channel {
        out.channel = v.clone();
    }
    if let Some(v) = &overrides.sudo {
        out.sudo = non_empty(v.clone());
    }
    if let Some(v) = overrides.renew_interval_secs {
        out.renew_interval_secs = v;
    }
    out
}

/// The single live `PluginConfig`, shared by command handlers and the timer.
///
/// Readers take a snapshot; the lock is never held across a certbot run, so a
/// change is picked up by the next invocation without a restart.
#[derive(Clone, Debug)]
pub struct SharedConfig {
    inner: Arc<Mutex<PluginConfig>>,
}

impl SharedConfig {
    pub fn new(cfg: PluginConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cfg)),
        }
    }

    pub async fn snapshot(&self) -> PluginConfig {
        self.inner.lock().await.clone()
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut PluginConfig) -> R) -> R {
        let mut guard = self.inner.lock().await;
        f(&mut guard)
    }
}

/// Outbound message spacing for the chat host.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleSettings {
    pub global_min_interval: Duration,
    pub per_chat_min_interval: Duration,
}

/// Process-level configuration: host credentials plus the effective plugin config.
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub telegram_bot_token: String,
    pub telegram_allowed_users: Vec<i64>,
    pub throttle: ThrottleSettings,
    pub plugin: PluginConfig,
}

impl BotConfig {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if telegram_allowed_users.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ALLOWED_USERS environment variable is required".to_string(),
            ));
        }

        let throttle = ThrottleSettings {
            global_min_interval: Duration::from_millis(
                env_u64("THROTTLE_GLOBAL_MS").unwrap_or(40),
            ),
            per_chat_min_interval: Duration::from_millis(
                env_u64("THROTTLE_CHAT_MS").unwrap_or(1050),
            ),
        };

        let plugin = load_plugin_config(env_path("CBB_CONFIG_FILE").as_deref())?;

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            throttle,
            plugin,
        })
    }
}

/// Defaults, then the JSON override file (if any), then `CERTBOT_*` env vars.
pub fn load_plugin_config(file: Option<&Path>) -> Result<PluginConfig> {
    resolve_plugin_config(file, &ConfigOverrides::from_env()?)
}

/// Same layering as [`load_plugin_config`], with the variable overrides given.
pub fn resolve_plugin_config(
    file: Option<&Path>,
    var_overrides: &ConfigOverrides,
) -> Result<PluginConfig> {
    let cfg = merge(&apply_file_overrides(file)?, var_overrides);
    cfg.validate()?;
    Ok(cfg)
}

fn apply_file_overrides(file: Option<&Path>) -> Result<PluginConfig> {
    let mut cfg = PluginConfig::default();

    if let Some(path) = file {
        let overrides = ConfigOverrides::from_json_file(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        cfg = merge(&cfg, &overrides);
    }
    Ok(cfg)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
