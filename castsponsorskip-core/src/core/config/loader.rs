use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

use directories::BaseDirs;
use log::{debug, trace, warn};

use crate::core::config::{Config, ConfigError, Result};
use crate::core::segments::Action;

const ENV_PREFIX: &str = "CSS_";
const CONFIG_DIR_NAME: &str = "sponsorblockcast";
const CONFIG_FILE_NAMES: [&str; 2] = ["config.yaml", "config.yml"];

/// The configuration values overridden on the command line.
///
/// Unset fields leave the environment/config-file values in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub devices: Option<Vec<String>>,
    pub discover_interval: Option<Duration>,
    pub paused_interval: Option<Duration>,
    pub playing_interval: Option<Duration>,
    pub skip_delay: Option<Duration>,
    pub ignore_segment_duration: Option<Duration>,
    pub network_interface: Option<String>,
    pub skip_sponsors: Option<bool>,
    pub categories: Option<Vec<String>>,
    pub action_types: Option<Vec<Action>>,
    pub youtube_api_key: Option<String>,
    pub mute_ads: Option<bool>,
}

impl Config {
    /// Load the application configuration.
    ///
    /// Values are merged with the following precedence, highest first: command line
    /// overrides, `CSS_` environment variables, deprecated environment variables,
    /// the first existing config file, built-in defaults.
    pub fn load(overrides: ConfigOverrides) -> Result<Config> {
        let environment: HashMap<String, String> = env::vars().collect();
        Self::load_from(overrides, &environment, &Self::config_file_candidates())
    }

    fn load_from(
        overrides: ConfigOverrides,
        environment: &HashMap<String, String>,
        files: &[PathBuf],
    ) -> Result<Config> {
        let mut config = Self::load_file(files)?;

        config.apply_deprecated_env(environment);
        config.apply_env(environment)?;
        config.apply_overrides(overrides);
        config.finalize()?;

        trace!("Loaded application config {:?}", config);
        Ok(config)
    }

    fn config_file_candidates() -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(4);

        if let Some(base_dirs) = BaseDirs::new() {
            let config_dir = base_dirs.config_dir().join(CONFIG_DIR_NAME);
            for name in CONFIG_FILE_NAMES {
                files.push(config_dir.join(name));
            }
        }
        for name in CONFIG_FILE_NAMES {
            files.push(PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(name));
        }

        files
    }

    fn load_file(files: &[PathBuf]) -> Result<Config> {
        for file in files {
            match fs::read_to_string(file) {
                Ok(contents) => {
                    debug!("Loading config file {}", file.display());
                    return serde_yaml::from_str(&contents).map_err(|e| {
                        ConfigError::InvalidFile(file.display().to_string(), e.to_string())
                    });
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ConfigError::InvalidFile(
                        file.display().to_string(),
                        e.to_string(),
                    ))
                }
            }
        }

        Ok(Config::default())
    }

    fn apply_deprecated_env(&mut self, environment: &HashMap<String, String>) {
        if let Some(value) = environment.get("SBCSCANINTERVAL") {
            if let Ok(secs) = value.parse::<u64>() {
                let interval = Duration::from_secs(secs);
                warn!(
                    "SBCSCANINTERVAL is deprecated. Please set \"CSS_DISCOVER_INTERVAL={}\" instead.",
                    humantime::format_duration(interval)
                );
                self.discover_interval = interval;
            }
        }

        if let Some(value) = environment.get("SBCPOLLINTERVAL") {
            if let Ok(secs) = value.parse::<u64>() {
                let interval = Duration::from_secs(secs);
                warn!(
                    "SBCPOLLINTERVAL is deprecated. Please set \"CSS_PLAYING_INTERVAL={}\" instead.",
                    humantime::format_duration(interval)
                );
                self.playing_interval = interval;
            }
        }

        if let Some(value) = environment.get("SBCCATEGORIES") {
            let categories: Vec<String> = value
                .split(' ')
                .filter(|e| !e.is_empty())
                .map(|e| e.to_string())
                .collect();
            warn!(
                "SBCCATEGORIES is deprecated. Please set \"CSS_CATEGORIES={}\" instead.",
                categories.join(",")
            );
            self.categories = categories;
        }

        if let Some(value) = environment.get("SBCYOUTUBEAPIKEY") {
            warn!("SBCYOUTUBEAPIKEY is deprecated. Please set \"CSS_YOUTUBE_API_KEY\" instead.");
            self.youtube_api_key = Some(value.clone());
        }
    }

    fn apply_env(&mut self, environment: &HashMap<String, String>) -> Result<()> {
        if let Some(value) = env_value(environment, "log-level") {
            self.log_level = value;
        }
        if let Some(value) = env_value(environment, "devices") {
            self.devices = split_list(&value);
        }
        if let Some(value) = env_value(environment, "discover-interval") {
            self.discover_interval = parse_env_duration("discover-interval", &value)?;
        }
        if let Some(value) = env_value(environment, "paused-interval") {
            self.paused_interval = parse_env_duration("paused-interval", &value)?;
        }
        if let Some(value) = env_value(environment, "playing-interval") {
            self.playing_interval = parse_env_duration("playing-interval", &value)?;
        }
        if let Some(value) = env_value(environment, "skip-delay") {
            self.skip_delay = parse_env_duration("skip-delay", &value)?;
        }
        if let Some(value) = env_value(environment, "ignore-segment-duration") {
            self.ignore_segment_duration = parse_env_duration("ignore-segment-duration", &value)?;
        }
        if let Some(value) = env_value(environment, "network-interface") {
            self.network_interface = Some(value).filter(|e| !e.is_empty());
        }
        if let Some(value) = env_value(environment, "skip-sponsors") {
            self.skip_sponsors = parse_env_bool("skip-sponsors", &value)?;
        }
        if let Some(value) = env_value(environment, "categories") {
            self.categories = split_list(&value);
        }
        if let Some(value) = env_value(environment, "action-types") {
            self.action_types = split_list(&value)
                .iter()
                .map(|e| {
                    Action::from_str(e).map_err(|err| {
                        ConfigError::InvalidValue("action-types".to_string(), err.to_string())
                    })
                })
                .collect::<Result<Vec<Action>>>()?;
        }
        if let Some(value) = env_value(environment, "youtube-api-key") {
            self.youtube_api_key = Some(value).filter(|e| !e.is_empty());
        }
        if let Some(value) = env_value(environment, "mute-ads") {
            self.mute_ads = parse_env_bool("mute-ads", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(value) = overrides.log_level {
            self.log_level = value;
        }
        if let Some(value) = overrides.devices {
            self.devices = value;
        }
        if let Some(value) = overrides.discover_interval {
            self.discover_interval = value;
        }
        if let Some(value) = overrides.paused_interval {
            self.paused_interval = value;
        }
        if let Some(value) = overrides.playing_interval {
            self.playing_interval = value;
        }
        if let Some(value) = overrides.skip_delay {
            self.skip_delay = value;
        }
        if let Some(value) = overrides.ignore_segment_duration {
            self.ignore_segment_duration = value;
        }
        if let Some(value) = overrides.network_interface {
            self.network_interface = Some(value).filter(|e| !e.is_empty());
        }
        if let Some(value) = overrides.skip_sponsors {
            self.skip_sponsors = value;
        }
        if let Some(value) = overrides.categories {
            self.categories = value;
        }
        if let Some(value) = overrides.action_types {
            self.action_types = value;
        }
        if let Some(value) = overrides.youtube_api_key {
            self.youtube_api_key = Some(value).filter(|e| !e.is_empty());
        }
        if let Some(value) = overrides.mute_ads {
            self.mute_ads = value;
        }
    }
}

fn env_value(environment: &HashMap<String, String>, flag: &str) -> Option<String> {
    let key = format!("{}{}", ENV_PREFIX, flag.to_uppercase().replace('-', "_"));
    environment.get(&key).cloned()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

fn parse_env_duration(flag: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ConfigError::InvalidValue(flag.to_string(), format!("{}: {}", value, e)))
}

fn parse_env_bool(flag: &str, value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .map_err(|e| ConfigError::InvalidValue(flag.to_string(), format!("{}: {}", value, e)))
}
