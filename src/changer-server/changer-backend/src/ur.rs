// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Universal Robots dashboard server backend.
//!
//! The dashboard server speaks newline terminated text on port 29999: one
//! command per line, one reply line per command. A greeting line is sent on
//! connect. The connection is opened lazily and dropped on any I/O error so
//! the next request reconnects.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use changer_core::changer::controller::{ExponentialBackoff, RetryPolicy};
use changer_core::driver::{
    ChangerDriver, DriverAccess, DriverFuture, DriverInfo, DriverStatus, RobotMode, SafetyStatus,
};
use changer_core::DynResult;

/// Default TCP port of the dashboard server.
pub const DASHBOARD_PORT: u16 = 29999;

const LOADING_PROGRAM: &str = "Loading program:";
const FILE_NOT_FOUND: &str = "File not found:";
const LOAD_FAILED: &str = "Error while loading program";
const NO_PROGRAM_LOADED: &str = "No program loaded";

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn read_reply(&mut self, limit: Duration) -> DynResult<String> {
        let mut line = String::new();
        let n = timeout(limit, self.reader.read_line(&mut line))
            .await
            .map_err(|_| "dashboard read timeout")??;
        if n == 0 {
            return Err("dashboard closed the connection".into());
        }
        Ok(line.trim().to_string())
    }

    async fn exchange(&mut self, command: &str, limit: Duration) -> DynResult<String> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        let reply = self.read_reply(limit).await?;
        debug!("UR dashboard: {} -> {}", command, reply);
        Ok(reply)
    }
}

pub struct UrDashboard {
    info: DriverInfo,
    addr: String,
    timeout: Duration,
    retry: ExponentialBackoff,
    conn: Option<Connection>,
}

impl UrDashboard {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        let addr = addr.into();
        Self {
            info: DriverInfo {
                manufacturer: "Universal Robots".to_string(),
                model: "dashboard".to_string(),
                access: DriverAccess::Tcp { addr: addr.clone() },
            },
            addr,
            timeout,
            retry: ExponentialBackoff::default_robot(),
            conn: None,
        }
    }

    pub fn with_retry(mut self, retry: ExponentialBackoff) -> Self {
        self.retry = retry;
        self
    }

    async fn open(&self) -> DynResult<Connection> {
        let stream = timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| "dashboard connect timeout")??;
        let (reader, writer) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(reader),
            writer,
        };
        let greeting = conn.read_reply(self.timeout).await?;
        info!("Connected to UR dashboard at {}: {}", self.addr, greeting);
        Ok(conn)
    }

    async fn connect(&self) -> DynResult<Connection> {
        let mut attempt = 0;
        loop {
            match self.open().await {
                Ok(conn) => return Ok(conn),
                Err(e) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "UR dashboard {} unavailable ({}), retrying in {:?}",
                        self.addr, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(format!(
                        "UR dashboard {} unreachable after {} attempts: {}",
                        self.addr,
                        attempt + 1,
                        e
                    )
                    .into())
                }
            }
        }
    }

    async fn request(&mut self, command: &str) -> DynResult<String> {
        if self.conn.is_none() {
            self.conn = Some(self.connect().await?);
        }
        let limit = self.timeout;
        let Some(conn) = self.conn.as_mut() else {
            return Err("dashboard not connected".into());
        };
        let result = conn.exchange(command, limit).await;
        if result.is_err() {
            self.conn = None;
        }
        result
    }

    async fn read_status(&mut self) -> DynResult<DriverStatus> {
        let mode: RobotMode = parse_prefixed(&self.request("robotmode").await?, &["Robotmode:"])?;
        let safety: SafetyStatus = parse_prefixed(
            &self.request("safetystatus").await?,
            &["Safetystatus:", "Safetymode:"],
        )?;
        let remote_control = parse_flag(&self.request("is in remote control").await?, "")?;
        let program_running = parse_flag(&self.request("running").await?, "Program running:")?;
        let loaded_program = parse_loaded_program(&self.request("get loaded program").await?)?;
        Ok(DriverStatus {
            mode,
            safety,
            remote_control,
            program_running,
            loaded_program,
        })
    }

    async fn start(&mut self, name: &str, tag: &str) -> DynResult<()> {
        let status = self.read_status().await?;
        if let Some(reason) = status.blocker() {
            return Err(format!("cannot start {}: {}", name, reason).into());
        }
        let reply = self.request(&format!("load {}", name)).await?;
        check_load_reply(&reply, name)?;
        let reply = self.request("play").await?;
        expect_reply(&reply, "Starting program", "play")?;
        info!("UR: started {} ({})", name, tag);
        Ok(())
    }

    async fn command(&mut self, command: &'static str, expected: &'static str) -> DynResult<()> {
        let reply = self.request(command).await?;
        expect_reply(&reply, expected, command)
    }
}

impl ChangerDriver for UrDashboard {
    fn info(&self) -> &DriverInfo {
        &self.info
    }

    fn run_program<'a>(&'a mut self, name: &'a str, tag: &'a str) -> DriverFuture<'a, ()> {
        Box::pin(self.start(name, tag))
    }

    fn stop<'a>(&'a mut self) -> DriverFuture<'a, ()> {
        Box::pin(self.command("stop", "Stopped"))
    }

    fn pause<'a>(&'a mut self) -> DriverFuture<'a, ()> {
        Box::pin(self.command("pause", "Pausing program"))
    }

    fn play<'a>(&'a mut self) -> DriverFuture<'a, ()> {
        Box::pin(self.command("play", "Starting program"))
    }

    fn status<'a>(&'a mut self) -> DriverFuture<'a, DriverStatus> {
        Box::pin(self.read_status())
    }
}

fn unexpected(reply: &str) -> Box<dyn std::error::Error + Send + Sync> {
    format!("unexpected dashboard reply '{}'", reply).into()
}

fn parse_prefixed<T>(reply: &str, prefixes: &[&str]) -> DynResult<T>
where
    T: FromStr<Err = String>,
{
    let value = prefixes
        .iter()
        .find_map(|prefix| reply.strip_prefix(prefix))
        .ok_or_else(|| unexpected(reply))?;
    Ok(value.trim().parse::<T>()?)
}

fn parse_flag(reply: &str, prefix: &str) -> DynResult<bool> {
    let value = reply.strip_prefix(prefix).ok_or_else(|| unexpected(reply))?;
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(unexpected(reply)),
    }
}

/// File name of the loaded program, `None` when nothing is loaded.
fn parse_loaded_program(reply: &str) -> DynResult<Option<String>> {
    if reply.starts_with(NO_PROGRAM_LOADED) {
        return Ok(None);
    }
    let path = reply
        .strip_prefix("Loaded program:")
        .map(str::trim)
        .ok_or_else(|| unexpected(reply))?;
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    Ok(Some(name.to_string()))
}

fn check_load_reply(reply: &str, program: &str) -> DynResult<()> {
    if reply.starts_with(LOADING_PROGRAM) {
        Ok(())
    } else if reply.starts_with(FILE_NOT_FOUND) {
        Err(format!("program {} not found on robot", program).into())
    } else if reply.starts_with(LOAD_FAILED) {
        Err(format!("robot failed to load {}: {}", program, reply).into())
    } else {
        Err(unexpected(reply))
    }
}

fn expect_reply(reply: &str, expected: &str, command: &str) -> DynResult<()> {
    if reply.starts_with(expected) {
        Ok(())
    } else {
        Err(format!("dashboard '{}' failed: {}", command, reply).into())
    }
}
