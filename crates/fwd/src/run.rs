// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Forwarder runtime: supervises one child under a PTY, records its output,
//! serves the control socket, and keeps `session.json` current.
//!
//! Four concurrent activities run until the child exits: the PTY reader
//! (filter → recorder → local stdout), the local stdin and FIFO input
//! paths, the IPC accept loop, and the periodic watchers (local TTY size,
//! external `session.json` edits).

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context as _;
use nix::libc;
use nix::sys::signal::Signal;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vibetunnel_protocol::asciinema::Header;
use vibetunnel_protocol::session::{
    self, SessionRecord, SessionStatus, TitleMode, IPC_SOCKET, SESSION_FILE, STDIN_FILE,
    STDOUT_FILE,
};

use crate::config::Config;
use crate::pty::{self, PtyPair, PtySession, RawMode};
use crate::recorder::Recorder;
use crate::title::{self, TitleFilter};

const WINSIZE_POLL: Duration = Duration::from_millis(200);
const META_POLL: Duration = Duration::from_millis(500);

/// Shared state the IPC server and the watchers act on.
pub struct Controller {
    pub pty: PtySession,
    pub recorder: Arc<Recorder>,
    session_id: String,
    session_path: PathBuf,
    record: parking_lot::Mutex<SessionRecord>,
    /// Serializes local stdout so title injection and PTY output never
    /// interleave.
    stdout: tokio::sync::Mutex<tokio::io::Stdout>,
    title_mode: TitleMode,
    name: parking_lot::Mutex<String>,
    initial_size: (u16, u16),
    stdout_is_tty: bool,
}

impl Controller {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current_name(&self) -> String {
        self.name.lock().clone()
    }

    async fn write_stdout(&self, data: &[u8]) {
        let mut out = self.stdout.lock().await;
        let _ = out.write_all(data).await;
        let _ = out.flush().await;
    }

    /// Inject the session title into the local terminal (static mode only).
    async fn emit_title(&self) {
        if self.title_mode != TitleMode::Static {
            return;
        }
        let seq = title::title_sequence(&self.current_name());
        self.write_stdout(&seq).await;
    }

    pub async fn handle_stdin(&self, data: &[u8]) -> anyhow::Result<()> {
        self.pty.write_all(data).await?;
        if let Err(e) = self.recorder.write_input(data) {
            warn!("recording input failed: {e:#}");
        }
        Ok(())
    }

    pub fn handle_resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        if cols == 0 || rows == 0 {
            anyhow::bail!("resize to {cols}x{rows} rejected");
        }
        self.pty.resize(cols, rows)?;
        if let Err(e) = self.recorder.write_resize(cols, rows) {
            warn!("recording resize failed: {e:#}");
        }
        Ok(())
    }

    /// Resize back to the local TTY (or the launch size without one).
    pub fn handle_reset_size(&self) -> anyhow::Result<()> {
        let (cols, rows) = pty::local_winsize(&std::io::stdout()).unwrap_or(self.initial_size);
        if (cols, rows) != self.pty.size() {
            self.handle_resize(cols, rows)?;
        }
        Ok(())
    }

    pub fn handle_kill(&self, signal: Option<i32>) -> anyhow::Result<()> {
        let signal = match signal {
            Some(raw) => Signal::try_from(raw).context("unknown signal number")?,
            None => Signal::SIGTERM,
        };
        info!("delivering {signal} to the child process group");
        self.pty.signal_group(signal)
    }

    pub async fn handle_update_title(&self, name: &str) -> anyhow::Result<()> {
        session::patch_name(&self.session_path, name)?;
        *self.name.lock() = name.to_owned();
        self.emit_title().await;
        Ok(())
    }

    /// Rewrite `session.json`, merging over the on-disk copy so concurrent
    /// renames and unknown keys survive. Failures are logged; the in-memory
    /// record stays authoritative and the next change retries.
    fn persist(&self, mutate: impl FnOnce(&mut SessionRecord)) {
        let mut record = self.record.lock();
        if let Ok(disk) = session::load(&self.session_path) {
            *record = disk;
        }
        mutate(&mut record);
        if let Err(e) = session::store(&self.session_path, &record) {
            warn!("session.json write failed (will retry on next change): {e:#}");
        }
    }
}

/// One-shot `--update-title` invocation: patch the name and exit.
pub fn update_title(config: &Config, title: &str) -> anyhow::Result<()> {
    let id = config
        .session_id
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--update-title requires --session-id"))?;
    let path = session::session_dir(&config.control_dir(), id).join(SESSION_FILE);
    session::patch_name(&path, title)
}

/// Run one forwarded session to completion; returns the child's exit code.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    if std::env::var("VIBETUNNEL_SESSION_ID").map(|v| !v.is_empty()).unwrap_or(false) {
        anyhow::bail!(
            "already inside a VibeTunnel session; refusing to wrap the forwarder in itself"
        );
    }

    let control_dir = config.control_dir();
    let id = match config.session_id.clone() {
        Some(id) => id,
        None => session::generate_id(),
    };
    let dir = session::session_dir(&control_dir, &id);
    let session_path = dir.join(SESSION_FILE);

    // A live directory under this id is a fatal conflict; a dead one is
    // adopted by wiping it.
    if dir.exists() {
        match session::load(&session_path) {
            Ok(existing) if existing.status.is_alive() => {
                anyhow::bail!(
                    "session {id} already exists with status {}",
                    existing.status.as_str()
                );
            }
            _ => {
                std::fs::remove_dir_all(&dir)
                    .with_context(|| format!("clearing stale session dir {}", dir.display()))?;
            }
        }
    }
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating session dir {}", dir.display()))?;

    let (cols, rows) = initial_size(&config);

    // PTY allocation failures abort before any session state lands on disk.
    let pty_pair = PtyPair::open(cols, rows)?;

    let name = config.session_name.clone().unwrap_or_else(|| command_basename(&config.command));
    let working_dir = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_owned());

    let mut record =
        SessionRecord::new(id.clone(), name.clone(), config.command.clone(), working_dir);
    record.initial_cols = Some(cols);
    record.initial_rows = Some(rows);
    record.attached_via_vt = Some(false);
    session::store(&session_path, &record).context("writing initial session.json")?;

    let mut header = Header::new(cols, rows);
    header.timestamp = Some(chrono::Utc::now().timestamp());
    header.command = Some(config.command.join(" "));
    header.title = Some(name.clone());
    let recorder = Arc::new(Recorder::create(&dir.join(STDOUT_FILE), &header)?);

    let fifo = pty::open_stdin_fifo(&dir.join(STDIN_FILE))?;

    let sock_path = dir.join(IPC_SOCKET);
    let _ = std::fs::remove_file(&sock_path);
    let listener = UnixListener::bind(&sock_path)
        .with_context(|| format!("binding {}", sock_path.display()))?;

    let pty_session = match pty_pair.spawn(&config.command, &id) {
        Ok(p) => p,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e.context("spawning the child under a PTY"));
        }
    };

    // Raw mode while we own the terminal; restored on drop. Only when both
    // ends are the user's terminal, so piped invocations stay untouched.
    let interactive = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    let _raw = if interactive { RawMode::enable() } else { None };

    let ctl = Arc::new(Controller {
        pty: pty_session,
        recorder: Arc::clone(&recorder),
        session_id: id.clone(),
        session_path: session_path.clone(),
        record: parking_lot::Mutex::new(record),
        stdout: tokio::sync::Mutex::new(tokio::io::stdout()),
        title_mode: config.title_mode.normalized(),
        name: parking_lot::Mutex::new(name),
        initial_size: (cols, rows),
        stdout_is_tty: std::io::stdout().is_terminal(),
    });

    let pid = ctl.pty.pid();
    ctl.persist(|rec| {
        rec.status = SessionStatus::Running;
        rec.pid = Some(pid);
    });
    info!("session {id} running (pid {pid}, {cols}x{rows})");

    let shutdown = CancellationToken::new();
    tokio::spawn(crate::ipc_server::serve(listener, Arc::clone(&ctl), shutdown.child_token()));
    tokio::spawn(fifo_loop(fifo, Arc::clone(&ctl), shutdown.child_token()));
    tokio::spawn(signal_loop(Arc::clone(&ctl), shutdown.child_token()));
    if interactive {
        tokio::spawn(stdin_loop(Arc::clone(&ctl), shutdown.child_token()));
    }

    ctl.emit_title().await;
    let exit_code = main_loop(&ctl, &config).await?;
    shutdown.cancel();

    if let Err(e) = recorder.write_exit(exit_code, &id) {
        warn!("recording exit event failed: {e:#}");
    }
    ctl.persist(|rec| {
        rec.status = SessionStatus::Exited;
        rec.exit_code = Some(exit_code);
        rec.pid = None;
    });
    info!("session {id} exited with code {exit_code}");

    Ok(exit_code)
}

/// PTY reader plus the periodic watchers. Returns the decoded exit code.
async fn main_loop(ctl: &Arc<Controller>, config: &Config) -> anyhow::Result<i32> {
    let mut filter = TitleFilter::new(config.title_mode);
    let mut buf = vec![0u8; 8192];
    let mut out = Vec::with_capacity(8192);

    let mut winsize_tick = tokio::time::interval(WINSIZE_POLL);
    let mut meta_tick = tokio::time::interval(META_POLL);
    let mut last_mtime = file_mtime(&ctl.session_path);

    loop {
        tokio::select! {
            result = ctl.pty.read(&mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        out.clear();
                        filter.feed(&buf[..n], &mut out);
                        forward_output(ctl, &out).await;
                    }
                    // A closed PTY raises EIO on Linux.
                    Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                    Err(e) => return Err(e).context("reading PTY master"),
                }
            }
            _ = winsize_tick.tick() => {
                if ctl.stdout_is_tty {
                    if let Some((cols, rows)) = pty::local_winsize(&std::io::stdout()) {
                        if (cols, rows) != ctl.pty.size() {
                            if let Err(e) = ctl.handle_resize(cols, rows) {
                                warn!("TTY-driven resize failed: {e:#}");
                            }
                        }
                    }
                }
            }
            _ = meta_tick.tick() => {
                let mtime = file_mtime(&ctl.session_path);
                if mtime != last_mtime {
                    last_mtime = mtime;
                    reload_external_edits(ctl).await;
                }
            }
        }
    }

    // A partial escape sequence at EOF is replayed verbatim.
    out.clear();
    filter.finish(&mut out);
    forward_output(ctl, &out).await;

    ctl.pty.wait().await
}

async fn forward_output(ctl: &Controller, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    if let Err(e) = ctl.recorder.write_output(data) {
        warn!("recording output failed: {e:#}");
    }
    ctl.write_stdout(data).await;
}

/// Pick up `session.json` edits made behind our back (e.g. a concurrent
/// `--update-title`): adopt the new name and refresh the injected title.
async fn reload_external_edits(ctl: &Controller) {
    let disk = match session::load(&ctl.session_path) {
        Ok(disk) => disk,
        Err(e) => {
            debug!("session.json unreadable during watch: {e:#}");
            return;
        }
    };
    let changed = {
        let mut name = ctl.name.lock();
        if *name != disk.name {
            *name = disk.name.clone();
            true
        } else {
            false
        }
    };
    *ctl.record.lock() = disk;
    if changed {
        ctl.emit_title().await;
    }
}

/// Forward the local terminal's keystrokes into the PTY.
async fn stdin_loop(ctl: Arc<Controller>, shutdown: CancellationToken) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = stdin.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        if let Err(e) = ctl.handle_stdin(&buf[..n]).await {
            debug!("stdin forward failed: {e:#}");
            break;
        }
    }
}

/// Drain the session's stdin FIFO into the PTY.
async fn fifo_loop(
    fifo: tokio::io::unix::AsyncFd<crate::pty::nbio::NbFd>,
    ctl: Arc<Controller>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = crate::pty::nbio::read_chunk(&fifo, &mut buf) => result,
        };
        match result {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = ctl.handle_stdin(&buf[..n]).await {
                    debug!("fifo forward failed: {e:#}");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("fifo read failed: {e}");
                break;
            }
        }
    }
}

/// Forward termination signals to the child's process group and keep
/// waiting; the main loop observes the PTY closing.
async fn signal_loop(ctl: Arc<Controller>, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(_) => return,
    };
    loop {
        let forwarded = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sigterm.recv() => Signal::SIGTERM,
            _ = sigint.recv() => Signal::SIGINT,
        };
        info!("forwarding {forwarded} to the child process group");
        if let Err(e) = ctl.pty.signal_group(forwarded) {
            warn!("signal forward failed: {e:#}");
        }
    }
}

/// Initial terminal size: explicit flags, then the local TTY, then 120x40
/// when driven from a terminal-ish stdin, then 80x24.
fn initial_size(config: &Config) -> (u16, u16) {
    if let (Some(cols), Some(rows)) = (config.cols, config.rows) {
        return (cols, rows);
    }
    if let Some(size) = pty::local_winsize(&std::io::stdout()) {
        return size;
    }
    if std::io::stdin().is_terminal() {
        (120, 40)
    } else {
        (80, 24)
    }
}

fn command_basename(command: &[String]) -> String {
    command
        .first()
        .map(|arg0| arg0.rsplit('/').next().unwrap_or(arg0).to_owned())
        .unwrap_or_else(|| "session".to_owned())
}

fn file_mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
