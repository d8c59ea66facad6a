//! Configuration for folio, read from `.folio/config.toml`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub preview: PreviewConfig,
    pub worker: WorkerConfig,
    pub provider: ProviderConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> eyre::Result<()> {
        let interval = self.preview.refresh_interval;
        if !interval.is_finite() || interval <= 0.0 {
            eyre::bail!(
                "preview.refresh_interval must be a positive number of seconds, got {}",
                interval
            );
        }
        if self.provider.poll_ms == 0 {
            eyre::bail!("provider.poll_ms must be at least 1");
        }
        Ok(())
    }
}

/// `[preview]`: refresh timing and fonts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
    /// Seconds between an edit and the automatic refresh.
    pub refresh_interval: f64,
    /// Debounce for cursor sync, in milliseconds.
    pub sync_delay_ms: u64,
    /// Whether the preview reloads by itself after edits.
    pub auto_reload: bool,
    /// Whether the preview follows the editor cursor.
    pub sync_to_editor: bool,
    pub fonts: FontSettings,
}

impl PreviewConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_interval)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            refresh_interval: 2.0,
            sync_delay_ms: 100,
            auto_reload: true,
            sync_to_editor: true,
            fonts: FontSettings::default(),
        }
    }
}

/// Which family the renderer uses when a document names none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardFamily {
    #[default]
    Serif,
    Sans,
    Mono,
}

/// Font settings pushed to the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FontSettings {
    pub base_size: u32,
    pub mono_size: u32,
    pub minimum_size: u32,
    pub serif_family: String,
    pub sans_family: String,
    pub mono_family: String,
    /// Missing means serif.
    pub standard_family: Option<StandardFamily>,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            base_size: 18,
            mono_size: 14,
            minimum_size: 8,
            serif_family: "Liberation Serif".to_string(),
            sans_family: "Liberation Sans".to_string(),
            mono_family: "Liberation Mono".to_string(),
            standard_family: None,
        }
    }
}

impl FontSettings {
    /// Resolve the standard family selector to a concrete family.
    pub fn resolve(&self) -> ResolvedFonts {
        let standard = match self.standard_family.unwrap_or_default() {
            StandardFamily::Serif => &self.serif_family,
            StandardFamily::Sans => &self.sans_family,
            StandardFamily::Mono => &self.mono_family,
        };
        ResolvedFonts {
            base_size: self.base_size,
            mono_size: self.mono_size,
            minimum_size: self.minimum_size,
            standard_family: standard.clone(),
            serif_family: self.serif_family.clone(),
            sans_family: self.sans_family.clone(),
            mono_family: self.mono_family.clone(),
        }
    }
}

/// Font settings with the standard family resolved, as the view receives them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFonts {
    pub base_size: u32,
    pub mono_size: u32,
    pub minimum_size: u32,
    pub standard_family: String,
    pub serif_family: String,
    pub sans_family: String,
    pub mono_family: String,
}

/// `[worker]`: background parse worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Coalescing window before each queue drain, in milliseconds.
    pub coalesce_ms: u64,
}

impl WorkerConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { coalesce_ms: 1000 }
    }
}

/// `[provider]`: content provider polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub poll_ms: u64,
}

impl ProviderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { poll_ms: 10 }
    }
}

/// `[server]`: HTTP bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Fixed port. When unset the first free port from 3000 is used.
    pub port: Option<u16>,
}
