use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// File name looked up in a project root.
pub const CONFIG_FILE: &str = "echoes.toml";

/// Environment variable overriding [`SyncConfig::mode`].
pub const SYNC_MODE_ENV: &str = "ECHOES_SYNC_MODE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoesConfig {
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Credit granted by each `Request`.
    #[serde(default = "default_request_batch")]
    pub request_batch: u32,
    /// Bound of every in-process channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub mode: SyncMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_batch: default_request_batch(),
            channel_capacity: default_channel_capacity(),
            mode: SyncMode::default(),
        }
    }
}

impl SyncConfig {
    /// Reject values no session can run with.
    ///
    /// # Errors
    ///
    /// When `request_batch` or `channel_capacity` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.request_batch == 0 {
            bail!("sync.request_batch must be at least 1");
        }
        if self.channel_capacity == 0 {
            bail!("sync.channel_capacity must be at least 1");
        }
        Ok(())
    }
}

/// How long a sync session lasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Finish once everything the peer acknowledged has been served.
    #[default]
    Once,
    /// Keep serving new events until a side finishes or cancels.
    Live,
}

impl SyncMode {
    /// Parse a mode name, accepting legacy aliases.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "once" | "oneshot" => Some(Self::Once),
            "live" | "continuous" => Some(Self::Live),
            _ => None,
        }
    }
}

/// Load `<root>/echoes.toml`, or defaults when the file does not exist.
///
/// # Errors
///
/// When the file exists but cannot be read, parsed or validated.
pub fn load_config(root: &Path) -> Result<EchoesConfig> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(EchoesConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<EchoesConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .sync
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// [`load_config`] with environment overrides applied.
///
/// # Errors
///
/// As [`load_config`], or when `ECHOES_SYNC_MODE` names no known mode.
pub fn resolve_config(root: &Path) -> Result<EchoesConfig> {
    let mut config = load_config(root)?;
    config.sync.mode = resolve_mode(config.sync.mode, env::var(SYNC_MODE_ENV).ok())?;
    Ok(config)
}

fn resolve_mode(file_mode: SyncMode, env_mode: Option<String>) -> Result<SyncMode> {
    match env_mode.as_deref().map(str::trim) {
        None | Some("") => Ok(file_mode),
        Some(raw) => SyncMode::parse(raw)
            .with_context(|| format!("{SYNC_MODE_ENV}={raw:?} is not one of once, live")),
    }
}

const fn default_request_batch() -> u32 {
    64
}

const fn default_channel_capacity() -> usize {
    32
}
