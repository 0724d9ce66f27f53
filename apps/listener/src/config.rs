use std::{fs, io, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use realtime_transport::{RealtimeSettings, DEFAULT_CHANNEL, DEFAULT_HEARTBEAT_INTERVAL};
use serde::Deserialize;
use shared::domain::{ChangeFilter, WILDCARD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub realtime_url: Option<String>,
    pub api_key: Option<String>,
    pub channel: String,
    pub schema: String,
    pub table: String,
    pub event: String,
    pub heartbeat_seconds: u64,
    pub autostart: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            realtime_url: None,
            api_key: None,
            channel: DEFAULT_CHANNEL.into(),
            schema: WILDCARD.into(),
            table: WILDCARD.into(),
            event: WILDCARD.into(),
            heartbeat_seconds: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            autostart: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    realtime_url: Option<String>,
    api_key: Option<String>,
    channel: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    event: Option<String>,
    heartbeat_seconds: Option<u64>,
    autostart: Option<bool>,
}

/// Defaults, then the TOML file at `path` if it exists, then environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            settings.apply_file(file_cfg);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}

impl Settings {
    fn apply_file(&mut self, file_cfg: FileSettings) {
        if let Some(v) = file_cfg.realtime_url {
            self.realtime_url = Some(v);
        }
        if let Some(v) = file_cfg.api_key {
            self.api_key = Some(v);
        }
        if let Some(v) = file_cfg.channel {
            self.channel = v;
        }
        if let Some(v) = file_cfg.schema {
            self.schema = v;
        }
        if let Some(v) = file_cfg.table {
            self.table = v;
        }
        if let Some(v) = file_cfg.event {
            self.event = v;
        }
        if let Some(v) = file_cfg.heartbeat_seconds {
            self.heartbeat_seconds = v;
        }
        if let Some(v) = file_cfg.autostart {
            self.autostart = v;
        }
    }

    /// Later keys win: `SUPABASE_URL < REALTIME_URL < APP__REALTIME_URL`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in ["SUPABASE_URL", "REALTIME_URL", "APP__REALTIME_URL"] {
            if let Some(v) = lookup(key) {
                self.realtime_url = Some(v);
            }
        }
        for key in ["SUPABASE_ANON_KEY", "REALTIME_API_KEY", "APP__REALTIME_API_KEY"] {
            if let Some(v) = lookup(key) {
                self.api_key = Some(v);
            }
        }
        if let Some(v) = lookup("APP__CHANNEL") {
            self.channel = v;
        }
        if let Some(v) = lookup("APP__SCHEMA") {
            self.schema = v;
        }
        if let Some(v) = lookup("APP__TABLE") {
            self.table = v;
        }
        if let Some(v) = lookup("APP__EVENT") {
            self.event = v;
        }
        if let Some(v) = lookup("APP__HEARTBEAT_SECONDS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.heartbeat_seconds = parsed;
            }
        }
        if let Some(v) = lookup("APP__AUTOSTART") {
            if let Ok(parsed) = v.parse::<bool>() {
                self.autostart = parsed;
            }
        }
    }

    pub fn change_filter(&self) -> ChangeFilter {
        ChangeFilter {
            schema: self.schema.clone(),
            table: self.table.clone(),
            event: self.event.clone(),
        }
    }

    pub fn realtime_settings(&self) -> anyhow::Result<RealtimeSettings> {
        let url = self
            .realtime_url
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("missing realtime url; set --url, REALTIME_URL or realtime_url"))?;
        let api_key = self
            .api_key
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("missing api key; set --api-key, REALTIME_API_KEY or api_key")
            })?;

        let mut realtime = RealtimeSettings::new(url, api_key);
        realtime.channel = self.channel.clone();
        realtime.heartbeat_interval = Duration::from_secs(self.heartbeat_seconds.max(1));
        Ok(realtime)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
