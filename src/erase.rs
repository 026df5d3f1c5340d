//! Full chip erase

use log::{info, warn};

use crate::{
    error::{Error, Operation, ResultExt},
    session::SessionConnector,
};

/// Erase the entire flash of the device on `port`
///
/// The session is opened for this erase alone and closed afterwards, whether
/// or not the erase succeeded.
pub fn erase_flash(
    connector: &mut dyn SessionConnector,
    port: &str,
    baud: u32,
) -> Result<(), Error> {
    let mut session = connector
        .connect(port, baud)
        .for_operation(Operation::Connect)
        .map_err(Error::SessionUnavailable)?;

    info!("Erasing the entire flash");
    let result = session
        .erase_all()
        .for_operation(Operation::EraseAll)
        .map_err(Error::from);

    if let Err(e) = session.close() {
        warn!("Failed to close session: {e}");
    }

    result
}
