// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line-protocol listener for robot event connections.
//!
//! Each connection is read sequentially: a message is fully handled, QR
//! decoding included, before the next line is read.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use changer_protocol::parse_line;

use crate::dispatch::RobotDispatcher;

/// Run the robot event listener until shutdown.
pub async fn run_listener(
    addr: SocketAddr,
    dispatcher: Arc<RobotDispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Robot listener on {}", addr);
    serve(listener, dispatcher, &mut shutdown_rx).await
}

async fn serve(
    listener: TcpListener,
    dispatcher: Arc<RobotDispatcher>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                info!("Robot connected: {}", peer);
                let dispatcher = Arc::clone(&dispatcher);
                let conn_shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_robot(socket, peer, dispatcher, conn_shutdown).await {
                        error!("Robot {} error: {:?}", peer, e);
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Robot listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_robot<S>(
    stream: S,
    peer: SocketAddr,
    dispatcher: Arc<RobotDispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let bytes_read = tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => read?,
            _ = shutdown_rx.changed() => break,
        };
        if bytes_read == 0 {
            info!("Robot {} disconnected", peer);
            break;
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            warn!("Dropped non UTF-8 line from {}", peer);
            continue;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let msg = match parse_line(trimmed) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropped line from {}: {}", peer, e);
                continue;
            }
        };

        if let Some(reply) = dispatcher.handle(msg).await {
            writer.write_all(reply.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use changer_core::changer::controller::{ChangerEvent, ChangerEventBus, FireArgs};
    use changer_core::{ChangerState, SampleChanger};

    use crate::vision::{NoCamera, RqrrDecoder, Vision};

    fn dispatcher(changer: &SampleChanger) -> Arc<RobotDispatcher> {
        let mut bus = ChangerEventBus::new();
        changer.subscribe(&mut bus);
        let vision = Arc::new(Vision::new(Box::new(NoCamera), Box::new(RqrrDecoder)));
        Arc::new(RobotDispatcher::new(changer.clone(), Arc::new(bus), vision))
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    #[tokio::test]
    async fn test_connection_replies_and_skips_garbage() {
        let changer = SampleChanger::new(2);
        let (client, server) = tokio::io::duplex(256);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(handle_robot(server, peer(), dispatcher(&changer), shutdown_rx));

        let (reader, mut writer) = tokio::io::split(client);
        let mut reader = BufReader::new(reader);
        writer
            .write_all(b"\nhello robot\nSlot:7:1\nGET x\n")
            .await
            .unwrap();
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        assert_eq!(reply, "x 1\n");

        drop(writer);
        drop(reader);
        task.await.unwrap().unwrap();
        assert_eq!(changer.state(), ChangerState::Home);
    }

    #[tokio::test]
    async fn test_connection_survives_invalid_utf8() {
        let changer = SampleChanger::new(2);
        let (client, server) = tokio::io::duplex(256);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(handle_robot(server, peer(), dispatcher(&changer), shutdown_rx));

        let (reader, mut writer) = tokio::io::split(client);
        let mut reader = BufReader::new(reader);
        writer.write_all(b"QR:\xff\xfe\nGET x\n").await.unwrap();
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        assert_eq!(reply, "x 1\n");

        drop(writer);
        drop(reader);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_drives_scan() {
        let changer = SampleChanger::new(2);
        changer
            .fire(ChangerEvent::ScanSamples, FireArgs::default())
            .unwrap();
        let (client, server) = tokio::io::duplex(256);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(handle_robot(server, peer(), dispatcher(&changer), shutdown_rx));

        let (mut reader, mut writer) = tokio::io::split(client);
        writer
            .write_all(b"QR:1\nQR:2\nSlot:1:1\nSlot:2:0\nok\n")
            .await
            .unwrap();
        writer.shutdown().await.unwrap();
        let mut rest = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut reader, &mut rest)
            .await
            .unwrap();
        task.await.unwrap().unwrap();

        assert!(rest.is_empty());
        assert_eq!(changer.state(), ChangerState::Home);
        assert_eq!(changer.samples(), vec!["@0", ""]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let changer = SampleChanger::new(2);
        let (_client, server) = tokio::io::duplex(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(handle_robot(server, peer(), dispatcher(&changer), shutdown_rx));
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_listener_accepts_tcp() {
        let changer = SampleChanger::new(2);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let dispatcher = dispatcher(&changer);
        let server =
            tokio::spawn(async move { serve(listener, dispatcher, &mut shutdown_rx).await });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"GET status\n").await.unwrap();
        let mut reply = String::new();
        BufReader::new(reader).read_line(&mut reply).await.unwrap();
        assert_eq!(reply, "status 1\n");

        shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_listener_outlives_closed_connection() {
        let changer = SampleChanger::new(2);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let dispatcher = dispatcher(&changer);
        let server =
            tokio::spawn(async move { serve(listener, dispatcher, &mut shutdown_rx).await });

        let mut first = tokio::net::TcpStream::connect(addr).await.unwrap();
        first.write_all(b"bogus\n\xff\n").await.unwrap();
        drop(first);

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"GET x\n").await.unwrap();
        let mut reply = String::new();
        BufReader::new(reader).read_line(&mut reply).await.unwrap();
        assert_eq!(reply, "x 1\n");

        shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
