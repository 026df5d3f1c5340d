//! Preparing raw images for transfer
//!
//! A raw image is padded to the loader's alignment, gets its header flash
//! parameters patched when it is a bootable image, is hashed for later
//! verification and finally compressed when the loader can inflate data.

use std::io::Write;

use flate2::{write::ZlibEncoder, Compression as ZlibCompression};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Digest, Error},
    flasher::{FlashFrequency, FlashMode, FlashSize},
    geometry::check_fit,
    verify::md5_digest,
};

/// Flash offset of the bootable image header
pub const BOOT_HEADER_ADDR: u32 = 0x0;
/// First byte of a bootable image
pub const ESP_MAGIC: u8 = 0xE9;

const PLAIN_ALIGNMENT: usize = 4;
const ENCRYPTED_ALIGNMENT: usize = 32;

/// Whether to compress images before sending them
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    On,
    Off,
    /// Compress whenever the stub loader is running
    #[default]
    Auto,
}

impl Compression {
    /// Decide whether a transfer is compressed
    ///
    /// Encrypted blocks have to arrive in their fixed size, so encryption
    /// always wins over compression. Only the stub loader can inflate data,
    /// so `Auto` also backs off without it.
    pub fn resolve(self, stub: bool, encrypt: bool) -> bool {
        if encrypt {
            return false;
        }

        match self {
            Compression::On => true,
            Compression::Off => false,
            Compression::Auto => stub,
        }
    }
}

/// Everything the preparer needs to know about the job
#[derive(Clone, Copy, Debug)]
pub struct ImageParams {
    pub flash_mode: Option<FlashMode>,
    pub flash_freq: Option<FlashFrequency>,
    /// `None` when the flash size is kept
    pub flash_size: Option<FlashSize>,
    pub compress: bool,
    pub encrypt: bool,
}

/// An image ready to be sent to the device
#[derive(Clone, Debug)]
pub struct PreparedImage {
    pub address: u32,
    /// Bytes to transfer, compressed if `compressed` is set
    pub data: Vec<u8>,
    /// Length of the padded, patched image as it ends up in flash
    pub uncompressed_len: usize,
    /// MD5 of the padded, patched image, not computed for encrypted images
    pub md5: Option<Digest>,
    pub compressed: bool,
    pub encrypted: bool,
}

impl PreparedImage {
    /// `uncompressed / compressed` size ratio, `1.0` for plain images
    pub fn ratio(&self) -> f64 {
        if self.compressed && !self.data.is_empty() {
            self.uncompressed_len as f64 / self.data.len() as f64
        } else {
            1.0
        }
    }
}

/// Pad `data` with zeros to a multiple of `alignment`
pub fn pad_to(mut data: Vec<u8>, alignment: usize) -> Vec<u8> {
    let rem = data.len() % alignment;
    if rem != 0 {
        data.resize(data.len() + alignment - rem, 0);
    }

    data
}

/// Prepare `payload` for writing at `address`
///
/// Returns `Ok(None)` for empty payloads, which are skipped rather than
/// treated as an error.
pub fn prepare(
    address: u32,
    payload: &[u8],
    params: &ImageParams,
) -> Result<Option<PreparedImage>, Error> {
    let alignment = if params.encrypt {
        ENCRYPTED_ALIGNMENT
    } else {
        PLAIN_ALIGNMENT
    };
    let mut image = pad_to(payload.to_vec(), alignment);

    if image.is_empty() {
        warn!("Image at {address:#x} is empty, skipping");
        return Ok(None);
    }

    check_fit(address, image.len(), params.flash_size)?;

    update_image_flash_params(&mut image, address, params);

    let md5 = (!params.encrypt).then(|| md5_digest(&image));
    let uncompressed_len = image.len();

    let data = if params.compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), ZlibCompression::best());
        encoder.write_all(&image).map_err(Error::Compression)?;
        encoder.finish().map_err(Error::Compression)?
    } else {
        image
    };

    debug!(
        "Prepared {uncompressed_len} byte image at {address:#x} ({} bytes to transfer)",
        data.len()
    );

    Ok(Some(PreparedImage {
        address,
        data,
        uncompressed_len,
        md5,
        compressed: params.compress,
        encrypted: params.encrypt,
    }))
}

/// Rewrite the flash mode, size and frequency in a bootable image's header
///
/// Only touches images written to [BOOT_HEADER_ADDR] that start with
/// [ESP_MAGIC]. Parameters left as `None` keep the header's current value.
pub fn update_image_flash_params(image: &mut [u8], address: u32, params: &ImageParams) {
    if address != BOOT_HEADER_ADDR || image.first() != Some(&ESP_MAGIC) {
        return;
    }

    if params.flash_mode.is_none() && params.flash_freq.is_none() && params.flash_size.is_none() {
        return;
    }

    if image.len() < 8 {
        warn!(
            "Image at {address:#x} is too short to contain a header, not updating flash parameters"
        );
        return;
    }

    let flash_mode = params.flash_mode.map_or(image[2], |mode| mode as u8);
    let flash_freq = params
        .flash_freq
        .map_or(image[3] & 0x0f, FlashFrequency::encode_flash_frequency);
    let flash_size = params
        .flash_size
        .map_or(image[3] & 0xf0, FlashSize::encode_flash_size);

    let flash_config = flash_size | flash_freq;
    if image[2] != flash_mode || image[3] != flash_config {
        debug!("Flash params set to {flash_mode:#04x}{flash_config:02x}");
    }

    image[2] = flash_mode;
    image[3] = flash_config;
}
