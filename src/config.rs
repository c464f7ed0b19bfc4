//! Configuration for fbterm.
//!
//! Everything tunable lives in one `Config` struct that deserializes from
//! TOML. Every section and field carries a default, so a partial file (or
//! no file at all) always yields a working setup. CLI flags override the
//! file; the file overrides the defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::palette::{DEFAULT_PALETTE, PALETTE_SIZE};
use crate::pixel::Color;

/// Root configuration container.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub shell: ShellConfig,
    pub font: FontConfig,
    pub palette: PaletteConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Framebuffer device node.
    pub fbdev: PathBuf,
    /// Sysfs directory holding `virtual_size` and `bits_per_pixel`.
    pub sysfs: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Program to spawn. Unset means `$SHELL`, then `/bin/sh`.
    pub program: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FontConfig {
    /// External font file in the bundled text format. Unset means the
    /// embedded font.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaletteConfig {
    /// Sixteen `#rrggbb` entries. Bad or missing entries fall back to the
    /// defaults one by one.
    pub colors: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            shell: ShellConfig::default(),
            font: FontConfig::default(),
            palette: PaletteConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fbdev: PathBuf::from("/dev/fb0"),
            sysfs: PathBuf::from("/sys/class/graphics/fb0"),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self { program: None }
    }
}

impl Default for FontConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            colors: DEFAULT_PALETTE
                .iter()
                .map(|c| format!("#{:02x}{:02x}{:02x}", c.r, c.g, c.b))
                .collect(),
        }
    }
}

impl Config {
    /// Parse a TOML string. Unknown keys are tolerated, missing ones take
    /// defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load from `path`. A missing file yields the defaults; an unreadable
    /// or malformed file is an error worth stopping for.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// The default config file location: `~/.config/fbterm/config.toml`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/"));
        home.join(".config/fbterm/config.toml")
    }

    /// Shell to spawn: config, then `$SHELL`, then `/bin/sh`.
    pub fn shell_program(&self) -> String {
        if let Some(program) = &self.shell.program {
            return program.clone();
        }
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }

    /// Resolve the palette entries, warning on (and skipping) bad ones.
    pub fn resolve_palette(&self) -> [Color; PALETTE_SIZE] {
        let mut palette = DEFAULT_PALETTE;
        if self.palette.colors.len() != PALETTE_SIZE {
            warn!(
                entries = self.palette.colors.len(),
                "palette does not have exactly {PALETTE_SIZE} colors; missing entries keep defaults"
            );
        }
        for (i, slot) in palette.iter_mut().enumerate() {
            if let Some(hex) = self.palette.colors.get(i).map(String::as_str) {
                match Color::from_hex(hex) {
                    Some(color) => *slot = color,
                    None => warn!(index = i, hex, "unparseable palette color; keeping default"),
                }
            }
        }
        palette
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.device.fbdev, PathBuf::from("/dev/fb0"));
        assert_eq!(config.device.sysfs, PathBuf::from("/sys/class/graphics/fb0"));
        assert_eq!(config.shell.program, None);
        assert_eq!(config.font.path, None);
        assert_eq!(config.palette.colors.len(), PALETTE_SIZE);
        assert_eq!(config.resolve_palette(), DEFAULT_PALETTE);
    }

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let config = Config::from_toml(
            r#"
[device]
fbdev = "/dev/fb1"
"#,
        )
        .expect("partial parse");
        assert_eq!(config.device.fbdev, PathBuf::from("/dev/fb1"));
        assert_eq!(config.device.sysfs, PathBuf::from("/sys/class/graphics/fb0"));
        assert_eq!(config.resolve_palette(), DEFAULT_PALETTE);
    }

    #[test]
    fn palette_overrides_apply_entrywise() {
        let config = Config::from_toml(
            r##"
[palette]
colors = ["#000000", "#ff0000", "not-a-color"]
"##,
        )
        .expect("parse");
        let palette = config.resolve_palette();
        assert_eq!(palette[0], Color::rgb(0, 0, 0));
        assert_eq!(palette[1], Color::rgb(0xFF, 0, 0));
        // The bad entry and the missing tail keep their defaults.
        assert_eq!(palette[2], DEFAULT_PALETTE[2]);
        assert_eq!(palette[15], DEFAULT_PALETTE[15]);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(Config::from_toml("this is not [[ valid toml").is_err());
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(&dir.path().join("nope.toml")).expect("load");
        assert_eq!(config.device.fbdev, PathBuf::from("/dev/fb0"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[shell]\nprogram = \"/bin/dash\"\n").expect("write");
        let config = Config::load(&path).expect("load");
        assert_eq!(config.shell.program.as_deref(), Some("/bin/dash"));
        assert_eq!(config.shell_program(), "/bin/dash");
    }
}
