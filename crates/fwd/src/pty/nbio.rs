// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Nonblocking fd plumbing shared by the PTY master and the stdin FIFO.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

/// Newtype wrapper around `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
pub struct NbFd(pub OwnedFd);

impl AsRawFd for NbFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// Set the given file descriptor to non-blocking mode.
pub fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Read one chunk from the async fd, waiting for readiness as needed.
pub async fn read_chunk(afd: &AsyncFd<NbFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::read(inner, buf).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Write the whole buffer to the async fd.
pub async fn write_all(afd: &AsyncFd<NbFd>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::write(inner, &data[offset..]).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

pub fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
