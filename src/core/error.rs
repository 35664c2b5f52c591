//! Error types for the controller.
//!
//! The error taxonomy follows the failure model: framing errors drop the
//! connection silently, protocol errors are reported to the peer as `ERR`
//! frames, device and persistence errors are logged and degrade gracefully
//! without ever crossing the readout-loop or handler boundary.

use thiserror::Error;

/// Errors while reading an intercom frame from the wire.
///
/// A framing error means the peer sent garbage or disconnected mid-frame;
/// the connection is closed without a response.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The connection closed before a complete header or payload arrived.
    #[error("connection closed before a complete frame arrived")]
    Truncated,

    /// The 8-byte header is not a 3-letter command plus 5 decimal digits.
    #[error("malformed frame header")]
    BadHeader,

    /// Underlying socket failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported to the remote peer as an `ERR` frame.
///
/// The `Display` text is the exact diagnostic string put on the wire, so
/// the messages are part of the protocol surface and must stay stable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The request command is not one the server dispatches on.
    #[error("Unknown command")]
    UnknownCommand,

    /// A command that requires a payload arrived without one.
    #[error("No message content")]
    NoContent,

    /// SET payload did not deserialize to a mapping.
    #[error("The content has to be a mapping.")]
    NotAMapping,

    /// GET/DEL payload did not deserialize to a list of key names.
    #[error("The content has to be a list.")]
    NotAList,

    /// CMD payload did not deserialize to a (device, command) pair.
    #[error("The content has to be a name-command pair.")]
    NotAPair,

    /// CMD addressed `pid` without an id suffix.
    #[error("No pid name given.")]
    NoPidName,

    /// CMD addressed a pid id that is not registered.
    #[error("Pid '{0}' unknown.")]
    UnknownPid(String),

    /// CMD addressed a pid with an action other than components/reset.
    #[error("Unknown pid command.")]
    UnknownPidCommand,

    /// CMD addressed `out` without a channel name suffix.
    #[error("No output name given.")]
    NoOutputName,

    /// CMD output value did not parse as a float.
    #[error("Value is not a number.")]
    NotANumber,

    /// CMD requested hardware re-enumeration but no hardware link exists.
    #[error("No tinkerforge connection.")]
    NoHardwareLink,

    /// CMD addressed a device name the server does not know.
    #[error("Unknown device '{0}'.")]
    UnknownDevice(String),

    /// CMD action is not supported for the addressed device.
    #[error("Unknown device command.")]
    UnknownDeviceCommand,

    /// Payload was present but not valid for the command.
    #[error("{0}")]
    Malformed(String),
}

/// Errors from the sensor/output port.
#[derive(Debug, Error)]
pub enum IoError {
    /// The named output channel does not exist on this driver.
    #[error("output '{0}' is unknown")]
    ChannelUnknown(String),

    /// The driver does not implement this capability (e.g. no hardware
    /// link to enumerate). Distinguished from a failed operation.
    #[error("not supported by this driver")]
    NotSupported,

    /// The device failed while executing the operation.
    #[error("device failure: {0}")]
    Device(String),
}

/// Errors from the database port, split by recovery strategy.
#[derive(Debug, Error)]
pub enum DbError {
    /// Connection-level failure: the link to the database is gone.
    /// Triggers a reconnect; the lost write is not retried inline.
    #[error("connection failure: {0}")]
    Connection(String),

    /// Statement-level failure: the connection is fine but the insert
    /// was rejected. Triggers a rollback and a log entry.
    #[error("statement failure: {0}")]
    Statement(String),
}

impl DbError {
    /// Whether this error should tear down the connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
