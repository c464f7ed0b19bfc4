//! fbterm: a PTY-attached shell on the Linux raw framebuffer.
//!
//! Spawns a shell under a pseudo-terminal, interprets its output stream as
//! text plus ANSI control sequences, and rasterizes a 6×12 bitmap font into
//! `/dev/fb0`. Keyboard input on the controlling terminal is forwarded
//! unchanged to the shell.
//!
//! Startup failures (no framebuffer, no pty) exit non-zero with a
//! diagnostic; a normal shell exit ends the process with exit code 0.

mod config;
mod error;
mod font;
mod framebuffer;
mod geometry;
mod logging;
mod palette;
mod parser;
mod pixel;
mod pty;
mod raster;
mod screen;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use config::Config;
use font::GlyphTable;
use framebuffer::DeviceBuffer;
use geometry::ScreenGeometry;
use screen::Screen;

/// fbterm: a shell on the raw framebuffer
#[derive(Parser, Debug)]
#[command(name = "fbterm", version, about = "A PTY-attached shell on the Linux framebuffer")]
struct Args {
    /// Framebuffer device node (default /dev/fb0)
    #[arg(long)]
    device: Option<PathBuf>,

    /// Sysfs directory describing the framebuffer geometry
    #[arg(long)]
    sysfs: Option<PathBuf>,

    /// Shell to spawn (defaults to $SHELL, then /bin/sh)
    #[arg(short, long)]
    shell: Option<String>,

    /// Bitmap font file in the bundled text format
    #[arg(short, long)]
    font: Option<PathBuf>,

    /// Config file (default ~/.config/fbterm/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    let fbdev = args.device.unwrap_or_else(|| config.device.fbdev.clone());
    let sysfs = args.sysfs.unwrap_or_else(|| config.device.sysfs.clone());
    let shell = args.shell.unwrap_or_else(|| config.shell_program());
    let font_path = args.font.or_else(|| config.font.path.clone());

    let geometry = ScreenGeometry::probe(&sysfs)?;
    tracing::info!(
        width = geometry.width_px,
        height = geometry.height_px,
        format = ?geometry.format,
        "probed framebuffer geometry"
    );

    let device = DeviceBuffer::open(&fbdev, &geometry)?;
    let table = match &font_path {
        Some(path) => GlyphTable::from_file(path)
            .with_context(|| format!("loading font {}", path.display()))?,
        None => GlyphTable::bundled(),
    };
    let screen = Screen::new(geometry, table, config.resolve_palette());
    let session = pty::PtySession::spawn(&shell, &geometry)?;

    // The framebuffer console keeps drawing its own text cursor on top of
    // ours unless told not to.
    let _console_cursor = ConsoleCursorGuard::hide();

    let code = pty::run(session, parser::Parser::new(), screen, device)?;
    tracing::info!(code, "session ended");
    Ok(())
}

/// Hides the hosting console's text cursor for the session and brings it
/// back on drop.
struct ConsoleCursorGuard;

impl ConsoleCursorGuard {
    fn hide() -> Self {
        let mut out = std::io::stdout();
        let _ = out.write_all(b"\x1b[?25l\x1b[?1c");
        let _ = out.flush();
        Self
    }
}

impl Drop for ConsoleCursorGuard {
    fn drop(&mut self) {
        let mut out = std::io::stdout();
        let _ = out.write_all(b"\x1b[?25h\x1b[?0c");
        let _ = out.flush();
    }
}
