//! Studio settings, loaded from RON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::dispatch::DispatchConfig;
use crate::core::splitter::{Locale, SplitRules};
use crate::schema::screenplay::VoiceParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a cheerful virtual streamer chatting with your viewers.
Begin every sentence with one of five emotion tags to show how you feel:
[neutral], [happy], [angry], [sad] or [relaxed].
Example: [happy]Welcome back everyone!
Keep replies short and conversational.";

/// How replies are cut into sentences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitSettings {
    Locale(Locale),
    Rules(SplitRules),
}

impl SplitSettings {
    pub fn rules(&self) -> SplitRules {
        match self {
            SplitSettings::Locale(locale) => SplitRules::for_locale(*locale),
            SplitSettings::Rules(rules) => rules.clone(),
        }
    }
}

impl Default for SplitSettings {
    fn default() -> Self {
        SplitSettings::Locale(Locale::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    pub poll_interval_secs: u64,
    /// Comments remembered for deduplication; 0 turns dedup off.
    pub dedup_capacity: usize,
    /// Comments containing this marker are never answered.
    pub exclude_marker: String,
    pub seed: Option<u64>,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            dedup_capacity: 512,
            exclude_marker: "#".to_string(),
            seed: None,
        }
    }
}

/// Names under which two streamers exchange replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    pub my_name: String,
    pub other_name: String,
    #[serde(default = "default_relay_interval")]
    pub poll_interval_secs: u64,
}

fn default_relay_interval() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub system_prompt: String,
    pub voice: VoiceParams,
    pub split: SplitSettings,
    /// Most recent messages sent along with the system prompt.
    pub history_window: usize,
    pub dispatch: DispatchConfig,
    pub live: LiveSettings,
    pub relay: Option<RelaySettings>,
    /// Inline chat credential; takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    pub api_key_env: String,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            voice: VoiceParams::default(),
            split: SplitSettings::default(),
            history_window: 10,
            dispatch: DispatchConfig::default(),
            live: LiveSettings::default(),
            relay: None,
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl StudioConfig {
    /// Load settings from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<StudioConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse settings from a RON string. Missing fields take defaults.
    pub fn parse_ron(input: &str) -> Result<StudioConfig, ConfigError> {
        let mut config: StudioConfig = ron::from_str(input)?;
        config.voice = config.voice.clamped();
        Ok(config)
    }

    /// The chat credential, if one is configured inline or in the environment.
    pub fn credential(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }
}
