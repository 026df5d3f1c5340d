//! Write firmware images to a target device
//!
//! The [Flasher] sequences a [FlashJob]: it opens a session, resolves the
//! flash geometry, then prepares, transfers and verifies each image in turn
//! before closing the transfer out. Whatever happens, the session is closed
//! and exactly one [Event::JobResult] is reported.

use std::{
    fmt,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

pub use self::settings::{FlashFrequency, FlashMode, FlashSettings, FlashSize};
use crate::{
    config::Config,
    erase::erase_flash,
    error::{Error, Operation, ResultExt},
    event::{Event, EventSink, JobReport, JobResult},
    geometry::{check_fit, resolve_flash_size, FlashSizeMode},
    image::{prepare, Compression, ImageParams},
    session::{DeviceSession, SessionConnector, WriteBegin},
    transfer::{write_image, CancelFlag},
    verify::verify,
};

mod settings;

/// Baud rate used for flashing unless a job asks otherwise
pub const FLASH_BAUD: u32 = 576_000;

/// A raw image and the flash offset to write it at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub addr: u32,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn new(addr: u32, data: impl Into<Vec<u8>>) -> Self {
        Segment {
            addr,
            data: data.into(),
        }
    }
}

/// One firmware programming request
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct FlashJob {
    /// Serial port the device is attached to
    pub port: String,
    pub baud: u32,
    /// Images in the order they are written
    pub images: Vec<Segment>,
    pub flash_size: FlashSizeMode,
    pub flash_mode: Option<FlashMode>,
    pub flash_freq: Option<FlashFrequency>,
    pub compress: Compression,
    pub encrypt: bool,
}

impl FlashJob {
    pub fn new(port: impl Into<String>, images: Vec<Segment>) -> Self {
        FlashJob {
            port: port.into(),
            baud: FLASH_BAUD,
            images,
            flash_size: FlashSizeMode::default(),
            flash_mode: None,
            flash_freq: None,
            compress: Compression::default(),
            encrypt: false,
        }
    }

    /// A job using the defaults from the configuration file
    pub fn from_config(port: impl Into<String>, images: Vec<Segment>, config: &Config) -> Self {
        let flash = config.flash;

        FlashJob {
            baud: config.baudrate.unwrap_or(FLASH_BAUD),
            flash_size: flash
                .size
                .map_or(FlashSizeMode::Detect, FlashSizeMode::Explicit),
            flash_mode: flash.mode,
            flash_freq: flash.freq,
            compress: config.compression,
            encrypt: config.encrypt,
            ..FlashJob::new(port, images)
        }
    }

    pub fn with_flash_size(mut self, flash_size: FlashSizeMode) -> Self {
        self.flash_size = flash_size;
        self
    }

    pub fn with_flash_mode(mut self, mode: Option<FlashMode>) -> Self {
        self.flash_mode = mode;
        self
    }

    pub fn with_flash_freq(mut self, freq: Option<FlashFrequency>) -> Self {
        self.flash_freq = freq;
        self
    }

    pub fn with_compression(mut self, compress: Compression) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }
}

/// Where a job currently stands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Idle,
    Connecting,
    Resolving,
    /// Writing the image with the given index
    Writing(usize),
    Finalizing,
    Done,
    Aborted,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Aborted | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Connecting => write!(f, "connecting"),
            JobState::Resolving => write!(f, "resolving flash size"),
            JobState::Writing(i) => write!(f, "writing image {i}"),
            JobState::Finalizing => write!(f, "finalizing"),
            JobState::Done => write!(f, "done"),
            JobState::Aborted => write!(f, "aborted"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Runs flash and erase jobs against devices opened through a
/// [SessionConnector]
pub struct Flasher {
    connector: Box<dyn SessionConnector>,
    cancel: CancelFlag,
    state: JobState,
}

impl Flasher {
    pub fn new(connector: Box<dyn SessionConnector>, cancel: CancelFlag) -> Self {
        Flasher {
            connector,
            cancel,
            state: JobState::Idle,
        }
    }

    /// The flag that cancels the running job
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Run a flash job to completion, reporting the outcome through `events`
    pub fn flash(&mut self, job: &FlashJob, events: &mut dyn EventSink) -> JobReport {
        let started = Instant::now();
        self.cancel.reset();

        let result = self.run(job, events);

        self.transition(match &result {
            Ok(()) => JobState::Done,
            Err(Error::Cancelled) => JobState::Aborted,
            Err(_) => JobState::Failed,
        });

        let report = job_report(result, started.elapsed());
        events.emit(Event::JobResult(report.clone()));

        report
    }

    /// Erase the entire flash of the device on `port`
    ///
    /// Reports [Event::EraseComplete] on success, a failed
    /// [Event::JobResult] otherwise.
    pub fn erase(&mut self, port: &str, baud: u32, events: &mut dyn EventSink) -> JobReport {
        let started = Instant::now();

        let result = erase_flash(self.connector.as_mut(), port, baud);
        let report = job_report(result, started.elapsed());

        if report.is_success() {
            events.log("Flash erase complete".to_string());
            events.emit(Event::EraseComplete);
        } else {
            events.emit(Event::JobResult(report.clone()));
        }

        report
    }

    fn run(&mut self, job: &FlashJob, events: &mut dyn EventSink) -> Result<(), Error> {
        self.transition(JobState::Connecting);
        let mut session = self
            .connector
            .connect(&job.port, job.baud)
            .for_operation(Operation::Connect)
            .map_err(|e| {
                events.log(format!("Failed to open serial port {}", job.port));
                Error::SessionUnavailable(e)
            })?;
        events.log(format!("Connected to {}, flashing will start shortly", job.port));

        let result = self.write_flash(session.as_mut(), job, events);

        if let Err(e) = session.close() {
            warn!("Failed to close session: {e}");
        }

        result
    }

    fn write_flash(
        &mut self,
        session: &mut dyn DeviceSession,
        job: &FlashJob,
        events: &mut dyn EventSink,
    ) -> Result<(), Error> {
        self.transition(JobState::Resolving);
        let flash_size = resolve_flash_size(session, job.flash_size)?;

        // Every image has to fit before a single byte is sent
        for segment in &job.images {
            check_fit(segment.addr, segment.data.len(), flash_size)?;
        }

        let compress = job.compress.resolve(session.is_stub(), job.encrypt);
        if job.encrypt && job.compress == Compression::On {
            warn!("Compression is not supported with encryption, flashing uncompressed");
            events.log("Encrypted images are flashed uncompressed".to_string());
        }

        let params = ImageParams {
            flash_mode: job.flash_mode,
            flash_freq: job.flash_freq,
            flash_size,
            compress,
            encrypt: job.encrypt,
        };
        debug!("Image parameters: {params:?}");

        for (i, segment) in job.images.iter().enumerate() {
            self.transition(JobState::Writing(i));

            let Some(image) = prepare(segment.addr, &segment.data, &params)? else {
                events.log(format!("Image at {:#x} is empty, skipping", segment.addr));
                continue;
            };

            write_image(session, &image, &self.cancel, events)?;

            if let Some(md5) = image.md5 {
                verify(session, image.address, image.uncompressed_len as u32, md5)?;
            }
        }

        // A cancel raised during the final block is only seen here
        if self.cancel.is_cancelled() {
            info!("Job cancelled after the last block was written");
            return Err(Error::Cancelled);
        }

        self.transition(JobState::Finalizing);
        info!("Leaving...");

        if session.is_stub() {
            // A finish sent to the ROM loader would make it exit and run the
            // user code, so only the stub gets one
            session
                .begin_write(WriteBegin {
                    uncompressed_len: 0,
                    transfer_len: 0,
                    address: 0,
                    compressed: false,
                })
                .for_operation(Operation::BeginWrite)?;
            session
                .finish(compress, false)
                .for_operation(Operation::Finish)?;
        }

        Ok(())
    }

    fn transition(&mut self, state: JobState) {
        debug!("Job state: {} -> {}", self.state, state);
        self.state = state;
    }
}

fn job_report(result: Result<(), Error>, elapsed: Duration) -> JobReport {
    let secs = elapsed.as_secs_f64();

    let (result, message) = match result {
        Ok(()) => (
            JobResult::Success,
            format!("Firmware flashed successfully in {secs:.1} seconds"),
        ),
        Err(Error::Cancelled) => (
            JobResult::Failure(Error::Cancelled.reason()),
            format!("Flashing aborted after {secs:.1} seconds"),
        ),
        Err(e) => {
            warn!("{e}");
            (
                JobResult::Failure(e.reason()),
                format!("Flashing failed: {e} ({secs:.1} seconds)"),
            )
        }
    };

    JobReport {
        result,
        message,
        elapsed,
    }
}
