// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Control-socket server: accepts connections on `ipc.sock` and dispatches
//! framed messages to the session controller.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vibetunnel_protocol::ipc::{Frame, IpcCodec, MessageType};

use crate::run::Controller;

/// Accept loop. Each connection is served concurrently; a connection error
/// only tears down that connection.
pub async fn serve(listener: UnixListener, ctl: Arc<Controller>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let ctl = Arc::clone(&ctl);
                        let token = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, ctl, token).await {
                                debug!("ipc connection ended: {e:#}");
                            }
                        });
                    }
                    Err(e) => warn!("ipc accept error: {e}"),
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    ctl: Arc<Controller>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, IpcCodec);
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = framed.next() => frame,
        };
        let frame = match frame {
            None => break,
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                // Framing violations are fatal for the connection.
                let _ = framed.send(Frame::error(&format!("protocol error: {e}"))).await;
                return Err(e.into());
            }
        };
        if let Err(e) = dispatch(&frame, &ctl).await {
            warn!("ipc {:?} failed: {e:#}", frame.kind);
            let _ = framed.send(Frame::error(&format!("{e:#}"))).await;
        }
    }
    Ok(())
}

async fn dispatch(frame: &Frame, ctl: &Controller) -> anyhow::Result<()> {
    match frame.kind {
        MessageType::StdinData => ctl.handle_stdin(&frame.payload).await,
        MessageType::Resize => {
            let (cols, rows) = frame.parse_resize()?;
            ctl.handle_resize(cols, rows)
        }
        MessageType::ResetSize => ctl.handle_reset_size(),
        MessageType::Kill => ctl.handle_kill(frame.parse_kill()?),
        MessageType::UpdateTitle => {
            let name = std::str::from_utf8(&frame.payload)?;
            ctl.handle_update_title(name).await
        }
        // Server→client kinds have no meaning inbound.
        MessageType::Status | MessageType::Error => Ok(()),
    }
}
