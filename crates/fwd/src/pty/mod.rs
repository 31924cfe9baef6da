// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! PTY lifecycle and local-terminal plumbing.

pub mod nbio;
pub mod spawn;

pub use spawn::{PtyPair, PtySession};

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use anyhow::Context;
use nix::errno::Errno;
use nix::libc;
use nix::sys::stat::Mode;
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, LocalFlags, SetArg, Termios};
use nix::unistd::mkfifo;
use tokio::io::unix::AsyncFd;

use nbio::NbFd;

/// Whether the given fd refers to a terminal.
pub fn is_tty<F: std::os::fd::AsFd>(fd: F) -> bool {
    tcgetattr(fd).is_ok()
}

/// Query the terminal size of an fd; `None` when it is not a TTY.
// TIOCGWINSZ requires a raw libc::ioctl call
#[allow(unsafe_code)]
pub fn local_winsize(fd: &impl AsRawFd) -> Option<(u16, u16)> {
    let mut ws = libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };
    // SAFETY: TIOCGWINSZ only fills the provided winsize struct.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };
    if ret == 0 && ws.ws_col > 0 && ws.ws_row > 0 {
        Some((ws.ws_col, ws.ws_row))
    } else {
        None
    }
}

/// Raw-mode guard for the forwarder's own terminal. Restores the saved
/// attributes on drop, including on error paths.
pub struct RawMode {
    saved: Termios,
}

impl RawMode {
    /// Switch stdin to raw mode. Returns `None` when stdin is not a TTY.
    pub fn enable() -> Option<Self> {
        let saved = tcgetattr(io::stdin()).ok()?;
        let mut raw = saved.clone();
        cfmakeraw(&mut raw);
        raw.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &raw).ok()?;
        Some(Self { saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = tcsetattr(io::stdin(), SetArg::TCSAFLUSH, &self.saved);
    }
}

/// Create (if needed) and open the session's stdin FIFO.
///
/// Opened read+write so poll-style readiness never reports a spurious EOF
/// while no writer is connected.
pub fn open_stdin_fifo(path: &Path) -> anyhow::Result<AsyncFd<NbFd>> {
    match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(err) => return Err(err).with_context(|| format!("mkfifo {}", path.display())),
    }
    let file = File::options()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .with_context(|| format!("opening FIFO {}", path.display()))?;
    let fd: OwnedFd = file.into();
    Ok(AsyncFd::new(NbFd(fd)).context("registering FIFO with the reactor")?)
}
