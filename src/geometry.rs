//! Flash geometry resolution

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Operation, ResultExt},
    flasher::FlashSize,
    session::DeviceSession,
};

/// How the flash capacity of a job is established
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashSizeMode {
    /// Ask the device
    #[default]
    Detect,
    /// Leave the flash size alone and skip all fit checks
    Keep,
    /// Use the given size
    Explicit(FlashSize),
}

/// Determine the flash capacity for a job
///
/// Returns `None` in [FlashSizeMode::Keep], where the caller vouches that the
/// images fit. In the other modes the chosen size is pushed to the session so
/// the loader's own flash parameters agree with the image header.
pub fn resolve_flash_size(
    session: &mut dyn DeviceSession,
    mode: FlashSizeMode,
) -> Result<Option<FlashSize>, Error> {
    let size = match mode {
        FlashSizeMode::Keep => {
            debug!("Keeping flash size, skipping size checks");
            return Ok(None);
        }
        FlashSizeMode::Explicit(size) => size,
        FlashSizeMode::Detect => session
            .flash_size()
            .for_operation(Operation::DetectFlashSize)?
            .ok_or(Error::GeometryUnknown)?,
    };

    info!("Configuring flash size: {size}");
    session
        .set_flash_parameters(size)
        .for_operation(Operation::SetFlashParameters)?;

    Ok(Some(size))
}

/// Ensure `len` bytes written at `address` fit within `capacity`
///
/// Without a capacity ([FlashSizeMode::Keep]) every image is accepted.
pub fn check_fit(address: u32, len: usize, capacity: Option<FlashSize>) -> Result<(), Error> {
    let Some(capacity) = capacity else {
        return Ok(());
    };

    if address as u64 + len as u64 > capacity.size() as u64 {
        return Err(Error::ImageTooLarge {
            address,
            len,
            capacity: capacity.size(),
        });
    }

    Ok(())
}
