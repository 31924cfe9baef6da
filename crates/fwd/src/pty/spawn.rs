// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use anyhow::{bail, Context};
use nix::libc;
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::sys::termios::Termios;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::Mutex;

use super::nbio::{read_chunk, set_nonblocking, write_all, NbFd};

// Not exposed by libc on every Linux target.
#[cfg(target_os = "linux")]
const TIOCSCTTY: libc::c_ulong = 0x540e;
#[cfg(not(target_os = "linux"))]
const TIOCSCTTY: libc::c_ulong = libc::TIOCSCTTY as libc::c_ulong;

/// An open master/slave PTY pair, not yet attached to a child.
///
/// Opening is separated from forking so PTY allocation failures are fatal
/// before the forwarder touches any session state on disk.
pub struct PtyPair {
    master: OwnedFd,
    slave: OwnedFd,
    cols: u16,
    rows: u16,
}

impl PtyPair {
    pub fn open(cols: u16, rows: u16) -> anyhow::Result<Self> {
        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        let pty = openpty(Some(&winsize), None::<&Termios>).context("openpty failed")?;
        Ok(Self { master: pty.master, slave: pty.slave, cols, rows })
    }

    /// Fork `command` onto the slave side.
    ///
    /// The child becomes session leader with the slave as its controlling
    /// tty, dup2'd onto fds 0/1/2, gets `TERM=xterm-256color` and
    /// `VIBETUNNEL_SESSION_ID`, and execs. The parent keeps only the
    /// master.
    // fork requires unsafe: the child is in a partially-initialized state
    #[allow(unsafe_code)]
    pub fn spawn(self, command: &[String], session_id: &str) -> anyhow::Result<PtySession> {
        if command.is_empty() {
            bail!("empty command");
        }

        // SAFETY: the child only performs exec-or-_exit after the fork.
        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => {
                drop(self.master);
                let code = child_exec(self.slave, command, session_id);
                // Only reached when setup or exec failed.
                // SAFETY: _exit is async-signal-safe and does not unwind.
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => {
                drop(self.slave);
                set_nonblocking(&self.master)?;
                let master = AsyncFd::new(NbFd(self.master))
                    .context("registering PTY master with the reactor")?;
                Ok(PtySession {
                    master,
                    write_lock: Mutex::new(()),
                    child,
                    cols: AtomicU16::new(self.cols),
                    rows: AtomicU16::new(self.rows),
                    reaped: AtomicBool::new(false),
                })
            }
        }
    }
}

/// A child process running under a fresh PTY.
///
/// The slave side is consumed by the fork; only the master fd is retained.
/// Writes are serialized through an internal lock so the IPC stdin path and
/// the local stdin path never interleave partial writes.
pub struct PtySession {
    master: AsyncFd<NbFd>,
    write_lock: Mutex<()>,
    child: Pid,
    cols: AtomicU16,
    rows: AtomicU16,
    reaped: AtomicBool,
}

impl PtySession {

    pub fn pid(&self) -> i32 {
        self.child.as_raw()
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols.load(Ordering::Relaxed), self.rows.load(Ordering::Relaxed))
    }

    /// Read a chunk of child output from the master.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        read_chunk(&self.master, buf).await
    }

    /// Write bytes to the child's input, serialized against other writers.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let _guard = self.write_lock.lock().await;
        write_all(&self.master, data).await
    }

    /// Resize the PTY.
    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.cols.store(cols, Ordering::Relaxed);
        self.rows.store(rows, Ordering::Relaxed);

        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ sets the window size on the PTY master fd; the
        // Winsize struct is fully initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", io::Error::last_os_error());
        }
        Ok(())
    }

    /// Deliver a signal to the child's process group (the child is the
    /// session leader, so its pid doubles as the pgid).
    pub fn signal_group(&self, signal: Signal) -> anyhow::Result<()> {
        killpg(self.child, signal).context("killpg failed")?;
        Ok(())
    }

    /// Block until the child exits; returns the decoded exit code
    /// (`128 + signal` for signalled exits).
    pub async fn wait(&self) -> anyhow::Result<i32> {
        let pid = self.child;
        let code = tokio::task::spawn_blocking(move || wait_for_exit(pid))
            .await
            .context("join wait thread")??;
        self.reaped.store(true, Ordering::Release);
        Ok(code)
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.reaped.load(Ordering::Acquire) {
            return;
        }
        // Best-effort shutdown of an unreaped child: SIGHUP then SIGKILL.
        let _ = killpg(self.child, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = killpg(self.child, Signal::SIGKILL);
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
    }
}

/// Post-fork child setup: new session, controlling tty, stdio on the
/// slave, environment, exec. Returns the exit code for `_exit` when any
/// step fails.
// setsid/TIOCSCTTY/dup2 on the raw slave fd require unsafe libc calls
#[allow(unsafe_code)]
fn child_exec(slave: OwnedFd, command: &[String], session_id: &str) -> i32 {
    let fd = slave.into_raw_fd();

    // SAFETY: plain syscalls on a valid fd; no Rust invariants involved.
    unsafe {
        if libc::setsid() == -1 {
            return 127;
        }
        if libc::ioctl(fd, TIOCSCTTY, 0) == -1 && libc::ioctl(fd, TIOCSCTTY, 1) == -1 {
            return 127;
        }
        if libc::dup2(fd, 0) == -1 || libc::dup2(fd, 1) == -1 || libc::dup2(fd, 2) == -1 {
            return 127;
        }
        if fd > 2 {
            libc::close(fd);
        }
    }

    std::env::set_var("TERM", "xterm-256color");
    std::env::set_var("VIBETUNNEL_SESSION_ID", session_id);

    let Ok(c_args) = command
        .iter()
        .map(|s| CString::new(s.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
    else {
        return 127;
    };
    let _ = execvp(&c_args[0], &c_args);
    127
}

/// Block until the child exits and decode the wait status.
fn wait_for_exit(pid: Pid) -> anyhow::Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
