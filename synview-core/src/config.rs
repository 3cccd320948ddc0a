use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::layout::{FitMode, LayoutMode};

/// Numeric zoom levels offered by the zoom list and used by wheel zoom.
pub const ZOOM_PERCENTAGES: [u32; 9] = [50, 70, 85, 100, 125, 150, 200, 300, 400];

/// Scale of a numeric zoom level on a screen with the given DPI (PDF points
/// are 1/72 inch).
pub fn zoom_scale(percent: u32, screen_dpi: f64) -> f64 {
    f64::from(percent) / 100.0 * screen_dpi / 72.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomMode {
    BestFit,
    FitWidth,
    Percent(u32),
}

impl ZoomMode {
    pub fn fit_mode(self) -> FitMode {
        match self {
            ZoomMode::BestFit => FitMode::FitBoth,
            ZoomMode::FitWidth => FitMode::FitWidth,
            ZoomMode::Percent(_) => FitMode::Numeric,
        }
    }
}

impl fmt::Display for ZoomMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoomMode::BestFit => f.write_str("Best Fit"),
            ZoomMode::FitWidth => f.write_str("Fit Page Width"),
            ZoomMode::Percent(percent) => write!(f, "{percent}%"),
        }
    }
}

impl FromStr for ZoomMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "Best Fit" => Ok(ZoomMode::BestFit),
            "Fit Page Width" => Ok(ZoomMode::FitWidth),
            other => {
                let digits = other.strip_suffix('%').unwrap_or(other).trim();
                let percent: u32 = digits
                    .parse()
                    .map_err(|_| anyhow!("unknown zoom mode {other:?}"))?;
                if percent == 0 {
                    return Err(anyhow!("zoom level must be positive"));
                }
                Ok(ZoomMode::Percent(percent))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimatedScroll {
    Off,
    #[default]
    Always,
    Autosync,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSection {
    #[serde_as(as = "DisplayFromStr")]
    pub zoom_mode: ZoomMode,
    pub pagelayout: LayoutMode,
    pub autosync: bool,
    pub animated_scroll: AnimatedScroll,
    /// Render cache budget in megabytes.
    pub cache_size: u64,
    pub screen_dpi: f64,
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            zoom_mode: ZoomMode::FitWidth,
            pagelayout: LayoutMode::Continuous,
            autosync: false,
            animated_scroll: AnimatedScroll::Always,
            cache_size: 150,
            screen_dpi: 96.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileSection {
    pub synctex: bool,
    pub pause: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub preview: PreviewSection,
    pub compile: CompileSection,
}

impl PreviewConfig {
    pub fn cache_budget_bytes(&self) -> u64 {
        self.preview.cache_size.saturating_mul(1024 * 1024)
    }
}

pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Option<PreviewConfig>>;
    fn save(&self, config: &PreviewConfig) -> Result<()>;
}

pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory at {:?}", parent))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Option<PreviewConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open config file {:?}", self.path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let config = toml::from_str(&buf)
            .with_context(|| format!("failed to decode config file {:?}", self.path))?;
        Ok(Some(config))
    }

    fn save(&self, config: &PreviewConfig) -> Result<()> {
        let tmp = self.path.with_extension("toml.tmp");
        let payload = toml::to_string_pretty(config)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp config file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    inner: Mutex<Option<PreviewConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PreviewConfig) -> Self {
        Self {
            inner: Mutex::new(Some(config)),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Option<PreviewConfig>> {
        Ok(self.inner.lock().clone())
    }

    fn save(&self, config: &PreviewConfig) -> Result<()> {
        *self.inner.lock() = Some(config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn zoom_modes_parse_and_display() {
        assert_eq!("Best Fit".parse::<ZoomMode>().unwrap(), ZoomMode::BestFit);
        assert_eq!(
            "Fit Page Width".parse::<ZoomMode>().unwrap(),
            ZoomMode::FitWidth
        );
        assert_eq!("125%".parse::<ZoomMode>().unwrap(), ZoomMode::Percent(125));
        assert_eq!(ZoomMode::Percent(85).to_string(), "85%");
        assert!("sideways".parse::<ZoomMode>().is_err());
        assert!("0%".parse::<ZoomMode>().is_err());
    }

    #[test]
    fn hundred_percent_matches_screen_dpi() {
        assert!((zoom_scale(100, 72.0) - 1.0).abs() < 1e-12);
        assert!((zoom_scale(100, 96.0) - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: PreviewConfig = toml::from_str(
            r#"
            [preview]
            pagelayout = "single_page"
            zoom_mode = "150%"
            "#,
        )
        .unwrap();

        assert_eq!(config.preview.pagelayout, LayoutMode::SinglePage);
        assert_eq!(config.preview.zoom_mode, ZoomMode::Percent(150));
        assert_eq!(config.preview.animated_scroll, AnimatedScroll::Always);
        assert_eq!(config.cache_budget_bytes(), 150 * 1024 * 1024);
        assert!(!config.compile.pause);
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("nested/preview.toml")).unwrap();
        assert!(store.load().unwrap().is_none());

        let mut config = PreviewConfig::default();
        config.preview.animated_scroll = AnimatedScroll::Autosync;
        config.compile.pause = true;
        store.save(&config).unwrap();

        assert_eq!(store.load().unwrap(), Some(config));
        assert!(!store.path().with_extension("toml.tmp").exists());
    }

    #[test]
    fn memory_store_keeps_last_save() {
        let store = MemoryConfigStore::new();
        assert!(store.load().unwrap().is_none());
        let mut config = PreviewConfig::default();
        config.preview.autosync = true;
        store.save(&config).unwrap();
        assert!(store.load().unwrap().unwrap().preview.autosync);
    }
}
