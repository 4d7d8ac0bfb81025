use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use notenanny_core::TriggerConfig;
use notenanny_core::config::{DEFAULT_CONFIG_TAG, DEFAULT_FORMAT_TRIGGER, DEFAULT_RUN_TRIGGER};
use serde::Deserialize;
use thiserror::Error;

use crate::cli::Cli;

const BEAR_DATABASE: &str =
    "Library/Containers/net.shinyfrog.bear/Data/Documents/Application Data/database.sqlite";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("config_tag must be a single word, got {0:?}")]
    ConfigTag(String),
    #[error("no location for the {0} store; pass it on the command line or set [store] path")]
    MissingStorePath(StoreKind),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Bear's note database (read-only).
    #[default]
    Bear,
    /// Markdown and text files under a directory.
    Directory,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bear => f.write_str("bear"),
            Self::Directory => f.write_str("directory"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerSettings {
    pub run: String,
    pub format: String,
    pub format_on_run: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            run: DEFAULT_RUN_TRIGGER.to_string(),
            format: DEFAULT_FORMAT_TRIGGER.to_string(),
            format_on_run: false,
        }
    }
}

/// Contents of `config.toml`. Every field is optional in the file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub poll_interval_ms: u64,
    pub exec_timeout_secs: u64,
    pub kill_grace_ms: u64,
    pub temp_dir: Option<PathBuf>,
    pub store_retries: usize,
    pub config_tag: String,
    pub store: StoreSettings,
    pub triggers: TriggerSettings,
    /// Language tag to formatter command line.
    pub formatters: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            exec_timeout_secs: 60,
            kill_grace_ms: 2000,
            temp_dir: None,
            store_retries: 3,
            config_tag: DEFAULT_CONFIG_TAG.to_string(),
            store: StoreSettings::default(),
            triggers: TriggerSettings::default(),
            formatters: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("notenanny").join("config.toml"))
    }

    /// An explicit path must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        match fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text, &path),
            Err(err) if !required && err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(SettingsError::Read { path, source }),
        }
    }

    pub fn from_toml(text: &str, path: &Path) -> Result<Self, SettingsError> {
        toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Command-line values win over the file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(kind) = cli.store {
            self.store.kind = kind;
        } else if cli.dir.is_some() {
            self.store.kind = StoreKind::Directory;
        } else if cli.bear_db.is_some() {
            self.store.kind = StoreKind::Bear;
        }
        let path = match self.store.kind {
            StoreKind::Bear => cli.bear_db.as_ref(),
            StoreKind::Directory => cli.dir.as_ref(),
        };
        if let Some(path) = path {
            self.store.path = Some(path.clone());
        }
        if let Some(ms) = cli.interval_ms {
            self.poll_interval_ms = ms;
        }
        if let Some(secs) = cli.timeout_secs {
            self.exec_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.poll_interval_ms == 0 {
            return Err(SettingsError::Zero("poll_interval_ms"));
        }
        if self.exec_timeout_secs == 0 {
            return Err(SettingsError::Zero("exec_timeout_secs"));
        }
        let tag = self.config_tag.trim();
        if tag.is_empty() || tag.contains(char::is_whitespace) || tag.contains('`') {
            return Err(SettingsError::ConfigTag(self.config_tag.clone()));
        }
        Ok(())
    }

    pub fn store_path(&self) -> Result<PathBuf, SettingsError> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        match self.store.kind {
            StoreKind::Bear => dirs::home_dir()
                .map(|home| home.join(BEAR_DATABASE))
                .ok_or(SettingsError::MissingStorePath(StoreKind::Bear)),
            StoreKind::Directory => Err(SettingsError::MissingStorePath(StoreKind::Directory)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Starting trigger snapshot; config notes refine it at runtime.
    pub fn trigger_config(&self) -> TriggerConfig {
        let mut config = TriggerConfig {
            run_marker: self.triggers.run.clone(),
            format_marker: self.triggers.format.clone(),
            format_on_run: self.triggers.format_on_run,
            config_tag: self.config_tag.trim().to_string(),
            ..TriggerConfig::default()
        };
        for (tag, command) in &self.formatters {
            config.set_formatter(tag, command);
        }
        config
    }
}
