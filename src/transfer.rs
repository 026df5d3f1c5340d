//! Block-by-block transfer of a prepared image

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::{
    error::{Error, Operation, ResultExt},
    event::{Event, EventSink},
    image::PreparedImage,
    session::{BlockKind, DeviceSession, WriteBegin, DEFAULT_TIMEOUT},
};

/// Cooperative cancellation flag shared between the caller and the worker
///
/// The transfer engine only looks at it between blocks.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the running job
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress of a single image transfer
#[derive(Clone, Copy, Debug)]
pub struct TransferState {
    pub sequence: u32,
    pub bytes_written: u64,
    pub total_bytes: u64,
    pub started_at: Instant,
}

impl TransferState {
    fn new(total_bytes: u64) -> Self {
        TransferState {
            sequence: 0,
            bytes_written: 0,
            total_bytes,
            started_at: Instant::now(),
        }
    }

    fn advance(&mut self, len: usize) {
        self.sequence += 1;
        self.bytes_written = (self.bytes_written + len as u64).min(self.total_bytes);
    }
}

/// Statistics of a completed transfer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransferSummary {
    pub blocks: u32,
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

/// Write `image` to the device
///
/// Stops with [Error::Cancelled] at the next block boundary once `cancel` is
/// raised; blocks already written stay on the device.
pub fn write_image(
    session: &mut dyn DeviceSession,
    image: &PreparedImage,
    cancel: &CancelFlag,
    events: &mut dyn EventSink,
) -> Result<TransferSummary, Error> {
    let block_size = session.block_size();
    let address = image.address;

    let blocks = session
        .begin_write(WriteBegin {
            uncompressed_len: image.uncompressed_len as u32,
            transfer_len: image.data.len() as u32,
            address,
            compressed: image.compressed,
        })
        .for_operation(Operation::BeginWrite)?
        .max(1);

    let kind = match (image.compressed, image.encrypted) {
        (true, _) => BlockKind::Compressed,
        (false, true) => BlockKind::Encrypted,
        (false, false) => BlockKind::Plain,
    };
    let timeout = block_timeout(image);

    let mut state = TransferState::new(image.data.len() as u64);

    for chunk in image.data.chunks(block_size) {
        if cancel.is_cancelled() {
            info!(
                "Transfer cancelled at 0x{:08x} after {} of {} bytes",
                block_address(address, state.sequence, block_size),
                state.bytes_written,
                state.total_bytes
            );
            return Err(Error::Cancelled);
        }

        debug!(
            "Writing at 0x{:08x}... ({} %)",
            block_address(address, state.sequence, block_size),
            100 * (state.sequence + 1) / blocks
        );

        let mut block = chunk.to_vec();
        if !image.compressed {
            // Pad the last block with the erased state of the flash
            block.resize(block_size, 0xff);
        }

        session
            .write_block(kind, &block, state.sequence, timeout)
            .for_operation(Operation::WriteBlock(state.sequence))?;

        state.advance(chunk.len());
        events.emit(Event::Progress {
            address,
            bytes_written: state.bytes_written,
            total_bytes: state.total_bytes,
        });
    }

    let elapsed = state.started_at.elapsed();
    let line = summary_line(image, state.bytes_written, elapsed);
    info!("{line}");
    events.log(line);

    Ok(TransferSummary {
        blocks: state.sequence,
        bytes_sent: state.bytes_written,
        elapsed,
    })
}

/// Flash offset of a block, which may lie past the end of the address space
/// when no fit check was made
fn block_address(address: u32, sequence: u32, block_size: usize) -> u64 {
    address as u64 + sequence as u64 * block_size as u64
}

/// Timeout for each block write
///
/// A compressed block can inflate to many times its size, so the device needs
/// proportionally longer to write it.
pub fn block_timeout(image: &PreparedImage) -> Duration {
    if image.compressed {
        DEFAULT_TIMEOUT.mul_f64(image.ratio() * 2.0)
    } else {
        DEFAULT_TIMEOUT
    }
}

fn summary_line(image: &PreparedImage, sent: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();

    if image.compressed {
        let speed = if secs > 0.0 {
            format!(
                " (effective {:.1} kbit/s)",
                image.uncompressed_len as f64 / secs * 8.0 / 1000.0
            )
        } else {
            String::new()
        };

        format!(
            "Wrote {} bytes ({} compressed) at 0x{:08x} in {:.1} seconds{}...",
            image.uncompressed_len, sent, image.address, secs, speed
        )
    } else {
        let speed = if secs > 0.0 {
            format!(" ({:.1} kbit/s)", sent as f64 / secs * 8.0 / 1000.0)
        } else {
            String::new()
        };

        format!(
            "Wrote {} bytes at 0x{:08x} in {:.1} seconds{}...",
            sent, image.address, secs, speed
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        flasher::FlashSize,
        image::{prepare, ImageParams},
        session::mock::{Call, MockDevice, MockSession},
    };

    fn prepared(len: usize, compress: bool, encrypt: bool) -> PreparedImage {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        prepare(
            0x1000,
            &payload,
            &ImageParams {
                flash_mode: None,
                flash_freq: None,
                flash_size: Some(FlashSize::_1Mb),
                compress,
                encrypt,
            },
        )
        .unwrap()
        .unwrap()
    }

    fn progress(events: &[Event]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Progress { bytes_written, .. } => Some(*bytes_written),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_transfer_pads_last_block() {
        let device = MockDevice::new(FlashSize::_1Mb);
        let mut session = MockSession::new(device.clone()).with_block_size(0x100);
        let image = prepared(0x250, false, false);
        let mut events = Vec::new();

        let summary = write_image(&mut session, &image, &CancelFlag::new(), &mut events).unwrap();

        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.bytes_sent, 0x250);
        assert_eq!(progress(&events), vec![0x100, 0x200, 0x250]);

        let lens: Vec<_> = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::WriteBlock { kind, len, .. } => Some((kind, len)),
                _ => None,
            })
            .collect();
        assert_eq!(lens, vec![(BlockKind::Plain, 0x100); 3]);
        assert_eq!(device.read(0x1000, 0x250), image.data);
        assert_eq!(device.read(0x1250, 4), vec![0xff; 4]);
    }

    #[test]
    fn compressed_blocks_are_not_padded() {
        let device = MockDevice::new(FlashSize::_1Mb);
        let mut session = MockSession::new(device.clone()).with_block_size(0x400);
        let image = prepared(0x3000, true, false);
        let mut events = Vec::new();

        write_image(&mut session, &image, &CancelFlag::new(), &mut events).unwrap();

        let timeout = block_timeout(&image);
        assert!(timeout > DEFAULT_TIMEOUT);

        let blocks: Vec<_> = device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::WriteBlock {
                    kind, len, timeout, ..
                } => Some((kind, len, timeout)),
                _ => None,
            })
            .collect();
        let last = blocks.last().unwrap();
        assert_eq!(last.0, BlockKind::Compressed);
        assert_eq!(last.1, image.data.len() % 0x400);
        assert!(blocks.iter().all(|b| b.2 == timeout));
        assert_eq!(progress(&events).last(), Some(&(image.data.len() as u64)));
    }

    #[test]
    fn encrypted_images_use_encrypted_blocks() {
        let device = MockDevice::new(FlashSize::_1Mb);
        let mut session = MockSession::new(device.clone());
        let image = prepared(40, false, true);

        write_image(&mut session, &image, &CancelFlag::new(), &mut Vec::new()).unwrap();

        assert!(device.calls().contains(&Call::WriteBlock {
            kind: BlockKind::Encrypted,
            sequence: 0,
            len: 0x400,
            timeout: DEFAULT_TIMEOUT,
        }));
    }

    #[test]
    fn cancellation_stops_at_block_boundary() {
        let cancel = CancelFlag::new();
        let device = MockDevice::new(FlashSize::_1Mb);
        let mut session = MockSession::new(device.clone())
            .with_block_size(0x100)
            .cancel_at_block(1, cancel.clone());
        let image = prepared(0x500, false, false);
        let mut events = Vec::new();

        let err = write_image(&mut session, &image, &cancel, &mut events).unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(device.blocks_written(), 2);
        assert_eq!(progress(&events), vec![0x100, 0x200]);
    }

    #[test]
    fn block_timeout_is_fatal() {
        let device = MockDevice::new(FlashSize::_1Mb);
        let mut session = MockSession::new(device.clone())
            .with_block_size(0x100)
            .timeout_at_block(2);
        let image = prepared(0x500, false, false);

        let err = write_image(&mut session, &image, &CancelFlag::new(), &mut Vec::new())
            .unwrap_err();

        assert!(matches!(
            err,
            Error::TransportTimeout(Operation::WriteBlock(2))
        ));
        assert_eq!(device.blocks_written(), 3);
    }

    #[test]
    fn block_address_does_not_overflow() {
        assert_eq!(block_address(0x1000, 2, 0x400), 0x1800);
        assert_eq!(block_address(0xffff_fc00, 4, 0x400), 0xffff_fc00 + 4 * 0x400);
    }
}
