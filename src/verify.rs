//! Post-write integrity check

use log::{debug, info};
use md5::{Digest as _, Md5};

use crate::{
    error::{Digest, Error, Operation, ResultExt},
    session::DeviceSession,
};

/// Outcome of a successful verification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// The running loader cannot compute checksums
    Unsupported,
}

/// MD5 digest of `data`
pub fn md5_digest(data: &[u8]) -> Digest {
    let mut hasher = Md5::new();
    hasher.update(data);

    let mut digest = [0u8; 16];
    digest.copy_from_slice(hasher.finalize().as_slice());

    Digest(digest)
}

/// Compare the device's MD5 of `len` bytes at `address` against `expected`
pub fn verify(
    session: &mut dyn DeviceSession,
    address: u32,
    len: u32,
    expected: Digest,
) -> Result<Verification, Error> {
    let found = session
        .checksum(address, len)
        .for_operation(Operation::Checksum)?;

    let Some(found) = found.map(Digest) else {
        debug!("Loader does not support MD5 verification, skipping");
        return Ok(Verification::Unsupported);
    };

    if found != expected {
        debug!("File  md5: {expected}");
        debug!("Flash md5: {found}");
        debug!(
            "MD5 of 0xFF is {}",
            md5_digest(&vec![0xff; len as usize])
        );

        return Err(Error::IntegrityMismatch { expected, found });
    }

    info!("Hash of data verified");

    Ok(Verification::Verified)
}
