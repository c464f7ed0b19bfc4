//! PTY session and the single-threaded I/O loop.
//!
//! Architecture (data flows):
//!
//! ```text
//! [shell under pty slave]
//!       │ byte stream (master read)
//!       ▼
//! [poll loop] ──► Parser ──TerminalOp──► Screen ──► shadow buffer
//!       │                                               │ flush + caret
//!       │ stdin bytes (master write)                    ▼
//!       └──────────────────────────────────────► /dev/fb0 mapping
//! ```
//!
//! One `poll(2)` over the PTY master and stdin is the only place the loop
//! blocks. Everything else (parse, rasterize, flush) runs to completion on
//! this thread before the next poll.

use std::io::{Read, Write};
use std::os::fd::BorrowedFd;

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use rustix::event::{PollFd, PollFlags, poll};
use rustix::termios::{self, LocalModes, OptionalActions, SpecialCodeIndex, Termios};
use tracing::{debug, info, warn};

use crate::error::FbtermError;
use crate::font::{FONT_HEIGHT, FONT_WIDTH};
use crate::framebuffer::DeviceBuffer;
use crate::geometry::ScreenGeometry;
use crate::parser::Parser;
use crate::screen::Screen;

/// Largest single read from either fd per wakeup.
const READ_CHUNK: usize = 2048;

/// Puts stdin into cbreak mode (no line buffering, no echo) and restores the
/// saved attributes on drop, so the hosting terminal comes back usable even
/// when the session ends by panic.
pub struct CbreakGuard {
    saved: Termios,
}

impl CbreakGuard {
    pub fn enable() -> Result<Self, FbtermError> {
        let stdin = std::io::stdin();
        let saved = termios::tcgetattr(&stdin).map_err(std::io::Error::from)?;
        let mut raw = saved.clone();
        raw.local_modes.remove(LocalModes::ICANON | LocalModes::ECHO);
        raw.special_codes[SpecialCodeIndex::VMIN] = 1;
        raw.special_codes[SpecialCodeIndex::VTIME] = 0;
        termios::tcsetattr(&stdin, OptionalActions::Now, &raw)
            .map_err(std::io::Error::from)?;
        Ok(Self { saved })
    }
}

impl Drop for CbreakGuard {
    fn drop(&mut self) {
        let stdin = std::io::stdin();
        let _ = termios::tcsetattr(&stdin, OptionalActions::Now, &self.saved);
    }
}

/// A shell running under a PTY, plus the master-side handles.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtySession {
    /// Open a PTY sized to the screen's character grid and spawn `shell` on
    /// the slave side with TERM/COLUMNS/LINES set to match.
    pub fn spawn(shell: &str, geometry: &ScreenGeometry) -> Result<Self, FbtermError> {
        let cols = geometry.width_px / FONT_WIDTH;
        let lines = geometry.height_px / FONT_HEIGHT;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: lines as u16,
                cols: cols as u16,
                pixel_width: geometry.width_px as u16,
                pixel_height: geometry.height_px as u16,
            })
            .map_err(|e| FbtermError::Pty(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLUMNS", cols.to_string());
        cmd.env("LINES", lines.to_string());

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| FbtermError::Pty(format!("spawn {shell}: {e}")))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| FbtermError::Pty(format!("clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| FbtermError::Pty(format!("take writer: {e}")))?;

        info!(shell, cols, lines, "spawned shell under pty");
        Ok(Self { master: pair.master, reader, writer, child })
    }
}

/// Flush the shadow buffer to the device, then overlay the cursor caret
/// directly on the mapping so it never smears into the shadow.
fn present(device: &mut DeviceBuffer, screen: &Screen) {
    device.flush(screen.buffer());
    if let Some((offset, bytes, len)) = screen.caret_span() {
        device.write_at(offset, &bytes[..len]);
    }
    device.sync();
}

/// Run the session until the shell exits or I/O fails. Returns the child's
/// exit code; the emulator itself exits 0 either way.
pub fn run(
    mut session: PtySession,
    mut parser: Parser,
    mut screen: Screen,
    mut device: DeviceBuffer,
) -> Result<u32, FbtermError> {
    let _cbreak = CbreakGuard::enable()?;

    let master_fd = session
        .master
        .as_raw_fd()
        .ok_or_else(|| FbtermError::Pty("pty master exposes no fd".into()))?;
    // SAFETY: the master (and with it the fd) outlives every poll below.
    let master_fd = unsafe { BorrowedFd::borrow_raw(master_fd) };
    let stdin = std::io::stdin();

    // Paint the empty screen before the shell says anything.
    present(&mut device, &screen);

    loop {
        let mut fds = [
            PollFd::new(&master_fd, PollFlags::IN),
            PollFd::new(&stdin, PollFlags::IN),
        ];
        match poll(&mut fds, None) {
            Ok(_) => {}
            Err(e) if e == rustix::io::Errno::INTR => continue,
            Err(e) => return Err(FbtermError::Io(e.into())),
        }
        let master_ready =
            fds[0].revents().intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR);
        let stdin_ready = fds[1].revents().intersects(PollFlags::IN);

        if master_ready && !drain_shell_output(&mut session, &mut parser, &mut screen, &mut device)?
        {
            break;
        }
        if stdin_ready && !forward_stdin(&mut session, &stdin)? {
            // The keyboard is gone; there is nobody left to drive the shell.
            debug!("stdin closed; ending session");
            let _ = session.child.kill();
            break;
        }
    }

    let status = session
        .child
        .wait()
        .map_err(|e| FbtermError::Pty(format!("wait: {e}")))?;
    debug!(code = status.exit_code(), "shell exited");
    Ok(status.exit_code())
}

/// Read one chunk of shell output, apply it, and repaint. Returns `false`
/// when the stream has ended (shell exit shows up as EOF or EIO here).
fn drain_shell_output(
    session: &mut PtySession,
    parser: &mut Parser,
    screen: &mut Screen,
    device: &mut DeviceBuffer,
) -> Result<bool, FbtermError> {
    let mut buf = [0u8; READ_CHUNK];
    match session.reader.read(&mut buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            for op in parser.advance(&buf[..n]) {
                screen.apply(op);
            }
            present(device, screen);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(true),
        Err(e) => {
            // The kernel reports a vanished slave side as EIO.
            debug!("pty master read ended: {e}");
            Ok(false)
        }
    }
}

/// Forward one chunk of keyboard input to the shell. Returns `false` when
/// stdin has closed.
fn forward_stdin(session: &mut PtySession, stdin: &std::io::Stdin) -> Result<bool, FbtermError> {
    let mut buf = [0u8; READ_CHUNK];
    // Read the fd directly: the Stdin handle's internal buffer would hide
    // bytes from the readiness poll.
    let n = match rustix::io::read(stdin, &mut buf) {
        Ok(0) => return Ok(false),
        Ok(n) => n,
        Err(e) if e == rustix::io::Errno::INTR => return Ok(true),
        Err(e) => return Err(FbtermError::Io(e.into())),
    };
    match session.writer.write(&buf[..n]) {
        Ok(written) => {
            if written < n {
                // Not retried; a full pty kernel buffer would stall the loop.
                warn!(written, n, "short write to pty master");
            }
            let _ = session.writer.flush();
            Ok(true)
        }
        Err(e) => {
            debug!("pty master write ended: {e}");
            Ok(false)
        }
    }
}

#[cfg(all(test, feature = "fb-integration-tests"))]
mod integration_tests {
    use super::*;
    use crate::pixel::PixelFormat;

    /// Needs a working /dev/ptmx; run via the fb-integration-tests feature.
    #[test]
    fn spawns_a_shell_and_reads_output() {
        let geometry =
            ScreenGeometry { width_px: 240, height_px: 96, format: PixelFormat::Bgra32 };
        let mut session =
            PtySession::spawn("/bin/sh", &geometry).expect("pty spawn");
        session.writer.write_all(b"exit\n").expect("write");
        let mut buf = [0u8; 1024];
        // The shell echoes in cbreak-less pty mode; any bytes at all prove
        // the plumbing.
        let n = session.reader.read(&mut buf).expect("read");
        assert!(n > 0);
        let status = session.child.wait().expect("wait");
        assert!(status.success());
    }
}
