//! Library errors
//!
//! [Error] is what every component returns; [FailureReason] is the short
//! machine-readable code a finished job is reported with.

use std::{
    fmt::{Display, Formatter},
    io,
};

use miette::Diagnostic;
use strum::{Display, VariantNames};
use thiserror::Error;

use crate::flasher::FlashSize;

/// All possible errors returned by espburn
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Could not open a session with the device")]
    #[diagnostic(
        code(espburn::session_unavailable),
        help("Check that no other program is using the serial port and that the device is in download mode")
    )]
    SessionUnavailable(#[source] SessionError),

    #[error("Communication error while talking to the device")]
    #[diagnostic(code(espburn::transport))]
    Transport(#[source] SessionError),

    #[error("Timeout while running {0}")]
    #[diagnostic(
        code(espburn::transport_timeout),
        help("The serial link may be unreliable, try a lower baud rate and flash again")
    )]
    TransportTimeout(Operation),

    #[error("The flash size could not be detected")]
    #[diagnostic(
        code(espburn::geometry_unknown),
        help("Provide the flash size explicitly, the accepted values are: {:?}", FlashSize::VARIANTS)
    )]
    GeometryUnknown,

    #[error("Image of {len} bytes at offset {address:#x} will not fit in {capacity} bytes of flash")]
    #[diagnostic(
        code(espburn::image_too_large),
        help("Use a larger flash size, or change the flashing address")
    )]
    ImageTooLarge {
        address: u32,
        len: usize,
        capacity: u32,
    },

    #[error("MD5 of image does not match data in flash: expected {expected}, found {found}")]
    #[diagnostic(
        code(espburn::integrity_mismatch),
        help("The written data remains on the device, flash the image again")
    )]
    IntegrityMismatch { expected: Digest, found: Digest },

    #[error("Operation was cancelled by the user")]
    #[diagnostic(code(espburn::cancelled))]
    Cancelled,

    #[error("The flash size '{0}' is invalid")]
    #[diagnostic(
        code(espburn::invalid_flash_size),
        help("The accepted values are: {:?}", FlashSize::VARIANTS)
    )]
    InvalidFlashSize(String),

    #[error("Failed to read configuration file '{0}'")]
    #[diagnostic(code(espburn::config))]
    Config(String, #[source] ConfigError),

    #[error("Failed to compress image")]
    #[diagnostic(code(espburn::compression))]
    Compression(#[source] io::Error),

    #[error("Failed to start the flash worker")]
    #[diagnostic(code(espburn::worker_unavailable))]
    WorkerUnavailable(#[source] io::Error),

    #[error("The flash worker is no longer running")]
    #[diagnostic(code(espburn::worker_stopped))]
    WorkerStopped,
}

impl Error {
    /// The reason a job ending with this error is reported with
    pub fn reason(&self) -> FailureReason {
        match self {
            Error::SessionUnavailable(_) | Error::Transport(_) => FailureReason::SessionUnavailable,
            Error::TransportTimeout(_) => FailureReason::TransportTimeout,
            Error::GeometryUnknown | Error::InvalidFlashSize(_) => FailureReason::GeometryUnknown,
            Error::ImageTooLarge { .. } => FailureReason::ImageTooLarge,
            Error::IntegrityMismatch { .. } => FailureReason::IntegrityMismatch,
            Error::Cancelled => FailureReason::Aborted,
            Error::Config(..)
            | Error::Compression(_)
            | Error::WorkerUnavailable(_)
            | Error::WorkerStopped => FailureReason::SessionUnavailable,
        }
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Timeout(op) => Error::TransportTimeout(op),
            err => Error::Transport(err),
        }
    }
}

/// Short code a failed job is reported with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, VariantNames)]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    /// The session could not be opened, or the loader failed mid-session
    /// with anything other than a timeout (a rejected command or an I/O
    /// error, during a transfer or an erase)
    SessionUnavailable,
    GeometryUnknown,
    ImageTooLarge,
    TransportTimeout,
    IntegrityMismatch,
    Aborted,
}

/// Errors raised by a [DeviceSession](crate::session::DeviceSession)
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("Failed to connect to the device: {0}")]
    #[diagnostic(
        code(espburn::session::unavailable),
        help("Ensure that the device is connected and the reset and boot pins are not being held down")
    )]
    Unavailable(String),

    #[error("Timeout while running {0}")]
    #[diagnostic(code(espburn::session::timeout))]
    Timeout(Operation),

    #[error("The loader rejected {0}: {1}")]
    #[diagnostic(code(espburn::session::rejected))]
    Rejected(Operation, String),

    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(espburn::session::io))]
    Io(#[source] io::Error),
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => SessionError::Timeout(Operation::default()),
            _ => SessionError::Io(err),
        }
    }
}

/// The device operation a session error originates from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Operation {
    #[default]
    Unknown,
    Connect,
    DetectFlashSize,
    SetFlashParameters,
    BeginWrite,
    WriteBlock(u32),
    Checksum,
    EraseAll,
    Finish,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Unknown => write!(f, "command"),
            Operation::Connect => write!(f, "connect"),
            Operation::DetectFlashSize => write!(f, "flash size detection"),
            Operation::SetFlashParameters => write!(f, "set flash parameters"),
            Operation::BeginWrite => write!(f, "flash begin"),
            Operation::WriteBlock(seq) => write!(f, "flash block write #{seq}"),
            Operation::Checksum => write!(f, "flash MD5"),
            Operation::EraseAll => write!(f, "erase flash"),
            Operation::Finish => write!(f, "flash finish"),
        }
    }
}

/// An MD5 digest, displayed as lowercase hex
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Digest(pub [u8; 16]);

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 16]> for Digest {
    fn from(bytes: [u8; 16]) -> Self {
        Digest(bytes)
    }
}

/// Errors while loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub(crate) trait ResultExt {
    /// Mark the operation from which a timeout originates
    fn for_operation(self, operation: Operation) -> Self;
}

impl<T> ResultExt for Result<T, SessionError> {
    fn for_operation(self, operation: Operation) -> Self {
        match self {
            Err(SessionError::Timeout(Operation::Unknown)) => {
                Err(SessionError::Timeout(operation))
            }
            res => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_transport_timeout() {
        let err: Error = SessionError::Timeout(Operation::WriteBlock(3)).into();
        assert_eq!(err.reason(), FailureReason::TransportTimeout);
        assert_eq!(err.to_string(), "Timeout while running flash block write #3");
    }

    #[test]
    fn io_timeout_is_tagged_with_operation() {
        let res: Result<(), SessionError> =
            Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out").into());
        let err = res.for_operation(Operation::Checksum).unwrap_err();

        assert!(matches!(err, SessionError::Timeout(Operation::Checksum)));
    }

    #[test]
    fn other_session_errors_are_session_unavailable() {
        let err: Error = SessionError::Rejected(Operation::BeginWrite, "0xc6".into()).into();
        assert_eq!(err.reason(), FailureReason::SessionUnavailable);
    }

    #[test]
    fn digest_displays_as_hex() {
        let digest = Digest([
            0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
            0x42, 0x7e,
        ]);
        assert_eq!(digest.to_string(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
