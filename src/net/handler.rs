//! Intercom connection handler.
//!
//! Protocol contract: exactly one request frame in, exactly one response
//! frame out, then the connection closes. Framing failures close the
//! socket without a response; everything else gets either ACK, a SET
//! frame with a JSON payload, or an ERR frame with a diagnostic string.

use crate::control::plane::ControlPlane;
use crate::core::error::{IoError, ProtocolError};
use crate::core::logbuf::{LogBuffer, LogHandle};
use crate::core::settings::Settings;
use crate::io::{InputOutput, Snapshot};
use crate::net::codec::{self, Command, Frame};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Everything a connection can touch.
pub struct HandlerContext {
    pub settings: Arc<Settings>,
    pub plane: Arc<ControlPlane>,
    pub io: Arc<dyn InputOutput>,
    pub logs: Arc<LogBuffer>,
    pub log_handle: LogHandle,
    pub latest: Arc<RwLock<Snapshot>>,
    pub interval_tx: watch::Sender<u64>,
    pub shutdown_tx: watch::Sender<bool>,
}

enum Reply {
    Ack,
    Set(Value),
}

enum PostAction {
    Shutdown,
}

/// Serve one connection: read one frame, answer it, close.
pub async fn handle_connection<S>(mut stream: S, ctx: Arc<HandlerContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = match codec::read_frame(&mut stream).await {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "dropping connection on framing error");
            return;
        }
    };

    let (reply, post) = match dispatch(&frame, &ctx) {
        Ok((reply, post)) => (reply, post),
        Err(err) => {
            debug!(command = %frame.command, error = %err, "request rejected");
            let _ = codec::write_frame(&mut stream, Command::Err, err.to_string().as_bytes())
                .await;
            let _ = stream.shutdown().await;
            return;
        }
    };

    let write_result = match &reply {
        Reply::Ack => codec::write_frame(&mut stream, Command::Ack, b"").await,
        Reply::Set(value) => {
            let payload = serde_json::to_vec(value).unwrap_or_default();
            // Stored values are unbounded, so a GET can legitimately
            // produce more than one frame can carry.
            if payload.len() > codec::MAX_PAYLOAD {
                warn!(bytes = payload.len(), "response exceeds the frame size limit");
                codec::write_frame(&mut stream, Command::Err, b"Response too large.").await
            } else {
                codec::write_frame(&mut stream, Command::Set, &payload).await
            }
        }
    };
    if let Err(err) = write_result {
        debug!(error = %err, "failed to write response");
    }
    let _ = stream.shutdown().await;

    // The response is on the wire before the daemon starts tearing down.
    if let Some(PostAction::Shutdown) = post {
        let _ = ctx.shutdown_tx.send(true);
    }
}

fn dispatch(
    frame: &Frame,
    ctx: &HandlerContext,
) -> Result<(Reply, Option<PostAction>), ProtocolError> {
    match frame.command() {
        Some(Command::Off) => Ok((Reply::Ack, Some(PostAction::Shutdown))),
        Some(Command::Set) => handle_set(frame, ctx).map(|r| (r, None)),
        Some(Command::Get) => handle_get(frame, ctx).map(|r| (r, None)),
        Some(Command::Del) => handle_del(frame, ctx).map(|r| (r, None)),
        Some(Command::Cmd) => handle_cmd(frame, ctx).map(|r| (r, None)),
        _ => Err(ProtocolError::UnknownCommand),
    }
}

fn handle_set(frame: &Frame, ctx: &HandlerContext) -> Result<Reply, ProtocolError> {
    let object = parse_object(&frame.payload)?;

    let mut affected_pids = BTreeSet::new();
    for (key, value) in &object {
        ctx.settings.set(key, value.clone());

        let top = key.split('/').next().unwrap_or(key);
        if let Some(id) = top.strip_prefix("pid") {
            if !id.is_empty() {
                affected_pids.insert(id.to_string());
            }
        }

        match key.as_str() {
            "readoutInterval" => {
                if let Some(ms) = coerce_u64(value) {
                    let _ = ctx.interval_tx.send(ms);
                } else {
                    warn!(%value, "readoutInterval is not a positive integer");
                }
            }
            "logLevel" => {
                if let Some(directive) = value.as_str() {
                    if let Err(err) = ctx.log_handle.set_level(directive) {
                        warn!(directive, error = %err, "log level change rejected");
                    }
                }
            }
            _ => {}
        }
    }

    // One reconfigure per touched loop, after all keys are stored.
    for id in affected_pids {
        ctx.plane.reconfigure(&id);
    }

    Ok(Reply::Ack)
}

fn handle_get(frame: &Frame, ctx: &HandlerContext) -> Result<Reply, ProtocolError> {
    let keys = parse_list(&frame.payload)?;

    let mut response = Map::new();
    for key in keys {
        let value = match key.as_str() {
            "log" => Value::Array(ctx.logs.lines().into_iter().map(Value::String).collect()),
            "data" => {
                serde_json::to_value(&*ctx.latest.read()).unwrap_or(Value::Null)
            }
            _ => ctx.settings.get(&key).unwrap_or(Value::Null),
        };
        response.insert(key, value);
    }
    Ok(Reply::Set(Value::Object(response)))
}

fn handle_del(frame: &Frame, ctx: &HandlerContext) -> Result<Reply, ProtocolError> {
    let keys = parse_list(&frame.payload)?;
    for key in keys {
        // Only the log buffer is deletable; settings keys are changed
        // by overwriting, never removed, so stray DELs cannot
        // unconfigure a loop.
        if key == "log" {
            ctx.logs.clear();
        }
    }
    Ok(Reply::Ack)
}

fn handle_cmd(frame: &Frame, ctx: &HandlerContext) -> Result<Reply, ProtocolError> {
    let (device, action) = parse_pair(&frame.payload)?;

    if let Some(id) = device.strip_prefix("pid") {
        if id.is_empty() {
            return Err(ProtocolError::NoPidName);
        }
        if !ctx.plane.contains(id) {
            return Err(ProtocolError::UnknownPid(id.to_string()));
        }
        return match action.as_str() {
            Some("components") => {
                let (p, i, d) = ctx
                    .plane
                    .components(id)
                    .ok_or_else(|| ProtocolError::UnknownPid(id.to_string()))?;
                let mut response = Map::new();
                response.insert(format!("pid{id}/components"), json!([p, i, d]));
                Ok(Reply::Set(Value::Object(response)))
            }
            Some("reset") => {
                ctx.plane.reset(id);
                Ok(Reply::Ack)
            }
            _ => Err(ProtocolError::UnknownPidCommand),
        };
    }

    if device == "sensors" {
        let command = action.as_str().ok_or(ProtocolError::UnknownDeviceCommand)?;
        if let Err(err) = ctx.io.execute(command) {
            warn!(command, error = %err, "sensor command failed");
        }
        return Ok(Reply::Ack);
    }

    if let Some(name) = device.strip_prefix("out") {
        if name.is_empty() {
            return Err(ProtocolError::NoOutputName);
        }
        let value = coerce_f64(&action).ok_or(ProtocolError::NotANumber)?;
        match ctx.io.write(&device, value) {
            Ok(()) => {}
            Err(IoError::ChannelUnknown(name)) => warn!("Output '{name}' is unknown."),
            Err(err) => warn!(channel = %device, error = %err, "output dispatch failed"),
        }
        return Ok(Reply::Ack);
    }

    if device == "tinkerforge" {
        if action.as_str() != Some("enumerate") {
            return Err(ProtocolError::UnknownDeviceCommand);
        }
        return match ctx.io.enumerate() {
            Ok(()) => Ok(Reply::Ack),
            Err(IoError::NotSupported) => Err(ProtocolError::NoHardwareLink),
            Err(err) => {
                warn!(error = %err, "device enumeration failed");
                Ok(Reply::Ack)
            }
        };
    }

    Err(ProtocolError::UnknownDevice(device))
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::NoContent);
    }
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ProtocolError::NotAMapping),
    }
}

fn parse_list(payload: &[u8]) -> Result<Vec<String>, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::NoContent);
    }
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(ProtocolError::NotAList),
            })
            .collect(),
        _ => Err(ProtocolError::NotAList),
    }
}

fn parse_pair(payload: &[u8]) -> Result<(String, Value), ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::NoContent);
    }
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Array(mut items)) if items.len() == 2 => {
            let action = items.pop().unwrap_or(Value::Null);
            match items.pop() {
                Some(Value::String(device)) => Ok((device, action)),
                _ => Err(ProtocolError::NotAPair),
            }
        }
        _ => Err(ProtocolError::NotAPair),
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
