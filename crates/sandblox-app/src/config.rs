// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clap::Parser;
use sandblox_render::RenderSize;
use sandblox_render_vk::DEFAULT_CLEAR_COLOR;
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "sandblox.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config file; missing means built-in defaults
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Initial window width in pixels (overrides the config file)
    #[arg(long)]
    pub width: Option<u32>,

    /// Initial window height in pixels (overrides the config file)
    #[arg(long)]
    pub height: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "Sandblox Client".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

impl WindowCfg {
    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.width, self.height)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(width) = args.width {
            self.window.width = width;
        }
        if let Some(height) = args.height {
            self.window.height = height;
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Never fails: a missing file or a bad one falls back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no config at {}; using defaults", path.display());
            return AppCfg::default();
        }
        Err(e) => {
            warn!("cannot read {}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    match parse_cfg(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("ignoring malformed {}: {e}", path.display());
            AppCfg::default()
        }
    }
}
