//! Intercom wire codec.
//!
//! One frame is an 8-byte header followed by the payload:
//!
//! ```text
//! +-----------+---------------------+------------------+
//! | command   | length              | payload          |
//! | 3 ASCII   | 5 ASCII digits,     | exactly `length` |
//! | letters   | zero-padded decimal | bytes            |
//! +-----------+---------------------+------------------+
//! ```
//!
//! The command set is closed; encoding takes the [`Command`] enum so an
//! unknown command cannot be put on the wire. Decoding keeps the raw
//! command string because an unrecognized-but-well-formed command is a
//! protocol error (answered with `ERR`), not a framing error.

use crate::core::error::FramingError;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size: 3 command letters + 5 length digits.
pub const HEADER_LEN: usize = 8;

/// Largest payload representable in the 5-digit length field.
pub const MAX_PAYLOAD: usize = 99_999;

/// The closed set of intercom commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Acknowledge a command without a specified response type.
    Ack,
    /// Error message (UTF-8 diagnostic payload).
    Err,
    /// Echo the message back.
    Eco,
    /// Save storage to disk.
    Sav,
    /// Tell the other side to switch off.
    Off,
    /// Execute a device command.
    Cmd,
    /// Get variables; response is SET.
    Get,
    /// Set variables (mapping payload).
    Set,
    /// Delete variables.
    Del,
    /// Set and publish variables.
    Pub,
    /// Get all variables; response is SET.
    Dmp,
    /// ASCII variant of GET.
    Gea,
    /// ASCII variant of SET.
    Sea,
    /// ASCII variant of DEL.
    Dea,
    /// ASCII variant of PUB.
    Pua,
}

impl Command {
    /// All commands, for validation and tests.
    pub const ALL: [Command; 15] = [
        Command::Ack,
        Command::Err,
        Command::Eco,
        Command::Sav,
        Command::Off,
        Command::Cmd,
        Command::Get,
        Command::Set,
        Command::Del,
        Command::Pub,
        Command::Dmp,
        Command::Gea,
        Command::Sea,
        Command::Dea,
        Command::Pua,
    ];

    /// The 3-letter wire code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::Ack => "ACK",
            Command::Err => "ERR",
            Command::Eco => "ECO",
            Command::Sav => "SAV",
            Command::Off => "OFF",
            Command::Cmd => "CMD",
            Command::Get => "GET",
            Command::Set => "SET",
            Command::Del => "DEL",
            Command::Pub => "PUB",
            Command::Dmp => "DMP",
            Command::Gea => "GEA",
            Command::Sea => "SEA",
            Command::Dea => "DEA",
            Command::Pua => "PUA",
        }
    }

    /// Parse a wire code; `None` for codes outside the closed set.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ACK" => Some(Command::Ack),
            "ERR" => Some(Command::Err),
            "ECO" => Some(Command::Eco),
            "SAV" => Some(Command::Sav),
            "OFF" => Some(Command::Off),
            "CMD" => Some(Command::Cmd),
            "GET" => Some(Command::Get),
            "SET" => Some(Command::Set),
            "DEL" => Some(Command::Del),
            "PUB" => Some(Command::Pub),
            "DMP" => Some(Command::Dmp),
            "GEA" => Some(Command::Gea),
            "SEA" => Some(Command::Sea),
            "DEA" => Some(Command::Dea),
            "PUA" => Some(Command::Pua),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded intercom frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw 3-letter command string as received.
    pub command: String,
    /// Payload bytes (may be empty).
    pub payload: Bytes,
}

impl Frame {
    /// The command, if it is in the closed set.
    pub fn command(&self) -> Option<Command> {
        Command::from_code(&self.command)
    }
}

/// Encode one frame.
///
/// Panics if the payload exceeds [`MAX_PAYLOAD`]; producing such a frame
/// is a programmer error, not a runtime condition.
pub fn encode(command: Command, payload: &[u8]) -> Bytes {
    assert!(
        payload.len() <= MAX_PAYLOAD,
        "payload exceeds the 5-digit length field"
    );
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(command.as_str().as_bytes());
    buf.put_slice(format!("{:05}", payload.len()).as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// Read exactly one frame from `reader`, buffering partial reads.
///
/// Returns [`FramingError::Truncated`] if the stream ends before the
/// complete header and payload arrived.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact_or_truncated(reader, &mut header).await?;

    if !header[..3].iter().all(u8::is_ascii_uppercase)
        || !header[3..].iter().all(u8::is_ascii_digit)
    {
        return Err(FramingError::BadHeader);
    }

    let length = header[3..]
        .iter()
        .fold(0usize, |acc, b| acc * 10 + usize::from(b - b'0'));
    let command = String::from_utf8_lossy(&header[..3]).into_owned();

    let mut payload = vec![0u8; length];
    read_exact_or_truncated(reader, &mut payload).await?;

    Ok(Frame {
        command,
        payload: Bytes::from(payload),
    })
}

/// Write one frame to `writer`.
pub async fn write_frame<W>(
    writer: &mut W,
    command: Command,
    payload: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(command, payload)).await
}

async fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FramingError::Truncated)
        }
        Err(err) => Err(FramingError::Io(err)),
    }
}
