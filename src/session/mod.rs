//! The device session capability consumed by the flashing engine
//!
//! A [DeviceSession] is an open, synchronised connection with a target
//! device's ROM or stub loader. How commands are framed on the wire, how the
//! chip is detected and whether the stub loader could be uploaded are all the
//! session's business; the engine only drives the high-level operations
//! below. Sessions are created per job by a [SessionConnector].

use std::time::Duration;

use crate::{error::SessionError, flasher::FlashSize};

pub mod mock;

/// Default timeout for a single loader command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Parameters for opening a flash write on the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteBegin {
    /// Size of the image once written to flash
    pub uncompressed_len: u32,
    /// Number of bytes that will be sent over the link
    pub transfer_len: u32,
    /// Flash offset to write at
    pub address: u32,
    /// Whether the blocks that follow are zlib compressed
    pub compressed: bool,
}

/// How a block is written by the loader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Plain,
    Compressed,
    Encrypted,
}

/// An open connection with a device loader
pub trait DeviceSession {
    /// Whether the accelerated stub loader is running
    fn is_stub(&self) -> bool;

    /// Number of bytes sent per block write
    fn block_size(&self) -> usize;

    /// The size of the attached flash, if the loader can report it
    fn flash_size(&mut self) -> Result<Option<FlashSize>, SessionError>;

    /// Tell the loader which flash size to operate with
    fn set_flash_parameters(&mut self, size: FlashSize) -> Result<(), SessionError>;

    /// Open a flash write, returning the number of blocks the loader expects
    fn begin_write(&mut self, begin: WriteBegin) -> Result<u32, SessionError>;

    /// Write a single block
    fn write_block(
        &mut self,
        kind: BlockKind,
        data: &[u8],
        sequence: u32,
        timeout: Duration,
    ) -> Result<(), SessionError>;

    /// MD5 of a flash region as computed on the device
    ///
    /// Returns `Ok(None)` when the running loader does not support it.
    fn checksum(&mut self, address: u32, len: u32) -> Result<Option<[u8; 16]>, SessionError>;

    /// Erase the entire flash, blocking until the device reports completion
    fn erase_all(&mut self) -> Result<(), SessionError>;

    /// Close out the pending flash write
    fn finish(&mut self, compressed: bool, reboot: bool) -> Result<(), SessionError>;

    /// Release the serial port
    fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens device sessions
pub trait SessionConnector: Send {
    /// Connect to the device on `port` and synchronise at `baud`
    fn connect(&mut self, port: &str, baud: u32)
        -> Result<Box<dyn DeviceSession>, SessionError>;
}

impl<F> SessionConnector for F
where
    F: FnMut(&str, u32) -> Result<Box<dyn DeviceSession>, SessionError> + Send,
{
    fn connect(
        &mut self,
        port: &str,
        baud: u32,
    ) -> Result<Box<dyn DeviceSession>, SessionError> {
        self(port, baud)
    }
}
