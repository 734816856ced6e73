// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON-over-TCP listener for operators.
//!
//! Accepts connections speaking the `ClientEnvelope`/`ClientResponse`
//! protocol defined in `changer-protocol`, one JSON object per line.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use changer_core::{ChangerCommand, ChangerRequest, ChangerSnapshot};
use changer_protocol::{client_command_to_changer, parse_envelope, ClientResponse, TokenValidator};

/// Run the operator listener until shutdown.
pub async fn run_control_listener(
    addr: SocketAddr,
    changer_tx: mpsc::Sender<ChangerRequest>,
    validator: Arc<dyn TokenValidator>,
    snapshot_rx: watch::Receiver<ChangerSnapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Control listener on {}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                info!("Operator connected: {}", peer);
                let tx = changer_tx.clone();
                let srx = snapshot_rx.clone();
                let validator = Arc::clone(&validator);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(socket, peer, tx, validator, srx).await {
                        error!("Operator {} error: {:?}", peer, e);
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                info!("Control listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn send_response<W>(writer: &mut W, resp: &ClientResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let resp_line = serde_json::to_string(resp)? + "\n";
    writer.write_all(resp_line.as_bytes()).await?;
    writer.flush().await
}

async fn handle_client<S>(
    stream: S,
    addr: SocketAddr,
    tx: mpsc::Sender<ChangerRequest>,
    validator: Arc<dyn TokenValidator>,
    snapshot_rx: watch::Receiver<ChangerSnapshot>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            info!("Operator {} disconnected", addr);
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope = match parse_envelope(trimmed) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Invalid JSON from {}: {} / {:?}", addr, trimmed, e);
                let resp = ClientResponse::error(format!("Invalid JSON: {}", e));
                send_response(&mut writer, &resp).await?;
                continue;
            }
        };

        if let Err(err) = validator.validate(envelope.token.as_deref()) {
            warn!("Rejected command from {}: {}", addr, err);
            send_response(&mut writer, &ClientResponse::error(err.to_string())).await?;
            continue;
        }

        let cmd = client_command_to_changer(envelope.cmd);

        // Snapshot reads do not queue behind a running command.
        if cmd == ChangerCommand::GetSnapshot {
            let snapshot = snapshot_rx.borrow().clone();
            send_response(&mut writer, &ClientResponse::ok(snapshot)).await?;
            continue;
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        let req = ChangerRequest {
            cmd,
            respond_to: resp_tx,
        };

        if let Err(e) = tx.send(req).await {
            error!("Failed to send request to changer_task: {:?}", e);
            let resp = ClientResponse::error("Internal error: changer task not available");
            send_response(&mut writer, &resp).await?;
            continue;
        }

        let resp = match resp_rx.await {
            Ok(Ok(snapshot)) => ClientResponse::ok(snapshot),
            Ok(Err(err)) => ClientResponse::error(err.to_string()),
            Err(e) => {
                error!("Changer response oneshot recv error: {:?}", e);
                ClientResponse::error("Internal error waiting for changer response")
            }
        };
        send_response(&mut writer, &resp).await?;
    }

    Ok(())
}
