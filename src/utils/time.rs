//! Timestamps and message tags.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{constants, ProtocolError, Result};

/// Get the current timestamp in milliseconds
///
/// # Errors
/// Returns a `ProtocolError::InvalidState` if the system time is earlier than UNIX_EPOCH
pub fn current_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .map_err(|_| ProtocolError::InvalidState(constants::ERR_SYSTEM_TIME.into()))
}

/// Produces `"{unix_seconds}.--{n}"` tags.
///
/// The counter never repeats within one generator, so tags stay unique among
/// outstanding requests even when several are issued in the same second.
#[derive(Debug, Default)]
pub struct MessageTagGenerator {
    counter: u64,
}

impl MessageTagGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_tag(&mut self) -> Result<String> {
        let seconds = current_timestamp()? / 1000;
        let tag = format!("{seconds}.--{}", self.counter);
        self.counter += 1;
        Ok(tag)
    }
}
