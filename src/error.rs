//! Error kinds for fbterm.
//!
//! Startup failures (probe, map, pty) are fatal and surface through `main`
//! with a diagnostic; I/O errors during the session loop end the loop
//! cleanly. Parser inconsistencies never reach this type; the parser
//! recovers by discarding its buffer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FbtermError {
    /// The sysfs geometry files could not be read or understood.
    #[error("framebuffer probe failed: {0}")]
    DeviceProbe(String),

    /// The framebuffer device could not be opened or memory-mapped.
    #[error("framebuffer mapping failed: {0}")]
    DeviceMap(String),

    /// PTY allocation, shell spawn, or master handle setup failed.
    #[error("pty failure: {0}")]
    Pty(String),

    /// Read/write failure during the session loop.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
