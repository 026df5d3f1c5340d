//! Mock device session for testing
//!
//! [MockDevice] simulates the flash of a device: block writes (plain,
//! compressed or encrypted) land in an in-memory flash array, and checksums
//! are computed over that array the way the stub loader would. Every call
//! made by the engine is recorded so tests can assert on the exact sequence.

use std::{
    io::Write,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use flate2::write::ZlibDecoder;

use super::{BlockKind, DeviceSession, SessionConnector, WriteBegin};
use crate::{
    error::{Operation, SessionError},
    flasher::FlashSize,
    transfer::CancelFlag,
    verify::md5_digest,
};

/// A call received by a mock session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Connect { port: String, baud: u32 },
    FlashSize,
    SetFlashParameters(FlashSize),
    BeginWrite(WriteBegin),
    WriteBlock {
        kind: BlockKind,
        sequence: u32,
        len: usize,
        timeout: Duration,
    },
    Checksum { address: u32, len: u32 },
    EraseAll,
    Finish { compressed: bool, reboot: bool },
    Close,
}

/// How the mock loader answers checksum requests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChecksumSupport {
    /// Compute the MD5 of the simulated flash
    #[default]
    Supported,
    /// Behave like a loader without the MD5 command
    Unsupported,
    /// Report a digest that never matches
    Corrupt,
}

struct PendingWrite {
    begin: WriteBegin,
    plain: Vec<u8>,
    decoder: Option<ZlibDecoder<Vec<u8>>>,
}

#[derive(Default)]
struct DeviceState {
    flash: Vec<u8>,
    calls: Vec<Call>,
    pending: Option<PendingWrite>,
}

/// Simulated device flash shared by every session opened against it
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// A device with erased flash of the given size
    pub fn new(size: FlashSize) -> Self {
        MockDevice {
            state: Arc::new(Mutex::new(DeviceState {
                flash: vec![0xff; size.size() as usize],
                ..Default::default()
            })),
        }
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of block writes received so far
    pub fn blocks_written(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::WriteBlock { .. }))
            .count()
    }

    /// Contents of a flash region
    pub fn read(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.lock();
        let start = (address as usize).min(state.flash.len());
        let end = (start + len).min(state.flash.len());

        state.flash[start..end].to_vec()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }
}

impl DeviceState {
    fn store(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        let end = start + data.len();
        if end > self.flash.len() {
            self.flash.resize(end, 0xff);
        }
        self.flash[start..end].copy_from_slice(data);
    }
}

/// A scripted session against a [MockDevice]
#[derive(Clone)]
pub struct MockSession {
    device: MockDevice,
    stub: bool,
    block_size: usize,
    flash_size: Option<FlashSize>,
    checksum: ChecksumSupport,
    timeout_at_block: Option<u32>,
    cancel_at_block: Option<(u32, CancelFlag)>,
}

impl MockSession {
    /// A stub loader session with a 1 KiB block size that reports a 4 MB
    /// flash
    pub fn new(device: MockDevice) -> Self {
        MockSession {
            device,
            stub: true,
            block_size: 0x400,
            flash_size: Some(FlashSize::_4Mb),
            checksum: ChecksumSupport::default(),
            timeout_at_block: None,
            cancel_at_block: None,
        }
    }

    pub fn with_stub(mut self, stub: bool) -> Self {
        self.stub = stub;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_flash_size(mut self, flash_size: Option<FlashSize>) -> Self {
        self.flash_size = flash_size;
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumSupport) -> Self {
        self.checksum = checksum;
        self
    }

    /// Time out when the block with the given sequence number is written
    pub fn timeout_at_block(mut self, sequence: u32) -> Self {
        self.timeout_at_block = Some(sequence);
        self
    }

    /// Raise `flag` once the block with the given sequence number is written
    pub fn cancel_at_block(mut self, sequence: u32, flag: CancelFlag) -> Self {
        self.cancel_at_block = Some((sequence, flag));
        self
    }

    pub fn device(&self) -> &MockDevice {
        &self.device
    }
}

impl DeviceSession for MockSession {
    fn is_stub(&self) -> bool {
        self.stub
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn flash_size(&mut self) -> Result<Option<FlashSize>, SessionError> {
        self.device.record(Call::FlashSize);
        Ok(self.flash_size)
    }

    fn set_flash_parameters(&mut self, size: FlashSize) -> Result<(), SessionError> {
        self.device.record(Call::SetFlashParameters(size));
        Ok(())
    }

    fn begin_write(&mut self, begin: WriteBegin) -> Result<u32, SessionError> {
        let mut state = self.device.lock();
        state.calls.push(Call::BeginWrite(begin));
        state.pending = Some(PendingWrite {
            begin,
            plain: Vec::new(),
            decoder: begin.compressed.then(|| ZlibDecoder::new(Vec::new())),
        });

        Ok((begin.transfer_len as usize).div_ceil(self.block_size) as u32)
    }

    fn write_block(
        &mut self,
        kind: BlockKind,
        data: &[u8],
        sequence: u32,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let mut state = self.device.lock();
        state.calls.push(Call::WriteBlock {
            kind,
            sequence,
            len: data.len(),
            timeout,
        });

        if self.timeout_at_block == Some(sequence) {
            return Err(SessionError::Timeout(Operation::WriteBlock(sequence)));
        }

        let Some(mut pending) = state.pending.take() else {
            return Err(SessionError::Rejected(
                Operation::WriteBlock(sequence),
                "no flash write in progress".into(),
            ));
        };

        let written = match pending.decoder.as_mut() {
            Some(decoder) => {
                decoder.write_all(data)?;
                decoder.flush()?;
                decoder.get_ref().clone()
            }
            None => {
                pending.plain.extend_from_slice(data);
                pending.plain.clone()
            }
        };
        let len = written.len().min(pending.begin.uncompressed_len as usize);
        state.store(pending.begin.address, &written[..len]);
        state.pending = Some(pending);
        drop(state);

        if let Some((at, flag)) = &self.cancel_at_block {
            if *at == sequence {
                flag.cancel();
            }
        }

        Ok(())
    }

    fn checksum(&mut self, address: u32, len: u32) -> Result<Option<[u8; 16]>, SessionError> {
        self.device.record(Call::Checksum { address, len });

        match self.checksum {
            ChecksumSupport::Unsupported => Ok(None),
            ChecksumSupport::Corrupt => Ok(Some([0u8; 16])),
            ChecksumSupport::Supported => {
                let mut data = self.device.read(address, len as usize);
                data.resize(len as usize, 0xff);

                Ok(Some(md5_digest(&data).0))
            }
        }
    }

    fn erase_all(&mut self) -> Result<(), SessionError> {
        let mut state = self.device.lock();
        state.calls.push(Call::EraseAll);
        state.flash.fill(0xff);

        Ok(())
    }

    fn finish(&mut self, compressed: bool, reboot: bool) -> Result<(), SessionError> {
        let mut state = self.device.lock();
        state.calls.push(Call::Finish { compressed, reboot });
        state.pending = None;

        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.device.record(Call::Close);
        Ok(())
    }
}

/// Hands out clones of a [MockSession], or refuses to connect
pub struct MockConnector {
    session: MockSession,
    unavailable: bool,
}

impl MockConnector {
    pub fn new(session: MockSession) -> Self {
        MockConnector {
            session,
            unavailable: false,
        }
    }

    /// A connector whose port can never be opened
    pub fn unavailable(session: MockSession) -> Self {
        MockConnector {
            session,
            unavailable: true,
        }
    }
}

impl SessionConnector for MockConnector {
    fn connect(
        &mut self,
        port: &str,
        baud: u32,
    ) -> Result<Box<dyn DeviceSession>, SessionError> {
        self.session.device.record(Call::Connect {
            port: port.to_string(),
            baud,
        });

        if self.unavailable {
            return Err(SessionError::Unavailable(format!(
                "could not open port {port}"
            )));
        }

        Ok(Box::new(self.session.clone()))
    }
}
