//! `perfassess.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "perfassess.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Chart decoration shared by every rendered figure.
    #[serde(default)]
    pub chart: ChartStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ChartStyle {
    pub foreground: String,
    pub background: String,
    pub font_family: String,
    pub title_font_family: String,
    pub font_size: u32,
    pub tick_font_size: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            foreground: "#2E2E3E".to_string(),
            background: "rgba(0, 0, 0, 0)".to_string(),
            font_family: "Roboto Light".to_string(),
            title_font_family: "Roboto Black".to_string(),
            font_size: 32,
            tick_font_size: 16,
            width: 1400,
            height: 900,
        }
    }
}

impl Config {
    /// Reads the chart configuration at `path`. The file is optional: when it
    /// is absent, unreadable or malformed the default chart style is used.
    pub fn load_optional(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no chart config, using default style");
                return Self::default();
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    "cannot read chart config, using default style: {err}"
                );
                return Self::default();
            }
        };
        toml::from_str::<Config>(&raw).unwrap_or_else(|err| {
            tracing::warn!(
                path = %path.display(),
                "invalid chart config, using default style: {err}"
            );
            Self::default()
        })
    }
}
