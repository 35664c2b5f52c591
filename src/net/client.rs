//! Intercom client, used by the `stop` and `get` subcommands and by the
//! integration tests. One frame out, one frame in, per connection.

use crate::core::error::FramingError;
use crate::net::codec::{self, Command, Frame};
use anyhow::{bail, Context};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Intercom {
    addr: SocketAddr,
}

impl Intercom {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// One request/response exchange on a fresh connection.
    pub async fn send(&self, command: Command, payload: &[u8]) -> anyhow::Result<Frame> {
        let exchange = async {
            let mut stream = TcpStream::connect(self.addr).await?;
            codec::write_frame(&mut stream, command, payload).await?;
            stream.flush().await?;
            let frame = codec::read_frame(&mut stream)
                .await
                .map_err(|err: FramingError| std::io::Error::other(err.to_string()))?;
            Ok::<Frame, std::io::Error>(frame)
        };
        tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .context("intercom request timed out")?
            .with_context(|| format!("intercom request to {} failed", self.addr))
    }

    async fn send_json(&self, command: Command, value: &Value) -> anyhow::Result<Frame> {
        let payload = serde_json::to_vec(value)?;
        self.send(command, &payload).await
    }

    /// Fetch keys; the response SET payload is returned as a JSON map.
    pub async fn get(&self, keys: &[String]) -> anyhow::Result<Value> {
        let frame = self.send_json(Command::Get, &json!(keys)).await?;
        match frame.command() {
            Some(Command::Set) => Ok(serde_json::from_slice(&frame.payload)?),
            Some(Command::Err) => {
                bail!("server error: {}", String::from_utf8_lossy(&frame.payload))
            }
            _ => bail!("unexpected response '{}'", frame.command),
        }
    }

    /// Store a mapping of keys.
    pub async fn set(&self, values: &Value) -> anyhow::Result<()> {
        let frame = self.send_json(Command::Set, values).await?;
        expect_ack(&frame)
    }

    /// Execute a device command.
    pub async fn command(&self, device: &str, action: &Value) -> anyhow::Result<Frame> {
        self.send_json(Command::Cmd, &json!([device, action])).await
    }

    /// Ask the daemon to shut down.
    pub async fn off(&self) -> anyhow::Result<()> {
        let frame = self.send(Command::Off, b"").await?;
        expect_ack(&frame)
    }

    /// Fire a throwaway frame to pop a listener that is blocked in
    /// accept, ignoring any outcome. Used right after [`Intercom::off`].
    pub async fn poke(&self) {
        let _ = self.send(Command::Ack, b"").await;
    }
}

fn expect_ack(frame: &Frame) -> anyhow::Result<()> {
    match frame.command() {
        Some(Command::Ack) => Ok(()),
        Some(Command::Err) => {
            bail!("server error: {}", String::from_utf8_lossy(&frame.payload))
        }
        _ => bail!("unexpected response '{}'", frame.command),
    }
}
