//! Flash firmware images onto ESP8266 class devices
//!
//! `espburn` sequences the writing of one or more raw images to a device's
//! flash: it resolves the flash size, prepares each image (padding, header
//! patching, hashing and compression), streams it block by block, and checks
//! the result against the device's own MD5. Talking to the loader on the wire
//! is left to a [DeviceSession](session::DeviceSession) implementation.
//!
//! Jobs usually run on a [FlashWorker], which reports progress and the final
//! outcome as [Event]s and can be cancelled at any block boundary.

pub mod config;
pub mod erase;
pub mod error;
pub mod event;
pub mod flasher;
pub mod geometry;
pub mod image;
pub mod logging;
pub mod session;
pub mod transfer;
pub mod verify;
pub mod worker;

pub use config::Config;
pub use error::Error;
pub use event::{Event, EventSink, JobReport, JobResult};
pub use flasher::{FlashJob, Flasher, Segment};
pub use transfer::CancelFlag;
pub use worker::FlashWorker;
