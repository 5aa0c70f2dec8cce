//! Exclusive audio device ownership
//!
//! The microphone and the speaker each have at most one owner. Owners hold a
//! [`DeviceLease`]; dropping it releases the device.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::{Error, Result};

/// How often a waiting acquirer retries
const ACQUIRE_POLL: Duration = Duration::from_millis(20);

/// An exclusively owned audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioDevice {
    Microphone,
    Speaker,
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microphone => f.write_str("microphone"),
            Self::Speaker => f.write_str("speaker"),
        }
    }
}

type Owners = Mutex<HashMap<AudioDevice, &'static str>>;

/// Hands out device leases
#[derive(Debug, Clone, Default)]
pub struct DeviceArbiter {
    owners: Arc<Owners>,
}

impl DeviceArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a device if it is free
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] naming the current owner
    pub fn try_acquire(&self, device: AudioDevice, owner: &'static str) -> Result<DeviceLease> {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = owners.get(&device) {
            return Err(Error::DeviceUnavailable(format!("{device} is in use by {current}")));
        }
        owners.insert(device, owner);
        tracing::trace!(%device, owner, "device acquired");

        Ok(DeviceLease {
            device,
            owner,
            owners: Arc::clone(&self.owners),
        })
    }

    /// Take a device, waiting up to `wait` for the current owner to let go
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if it is still held after `wait`
    pub async fn acquire(
        &self,
        device: AudioDevice,
        owner: &'static str,
        wait: Duration,
    ) -> Result<DeviceLease> {
        let deadline = Instant::now() + wait;
        loop {
            match self.try_acquire(device, owner) {
                Ok(lease) => return Ok(lease),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(_) => tokio::time::sleep(ACQUIRE_POLL).await,
            }
        }
    }

    /// Current owner of a device
    #[must_use]
    pub fn owner(&self, device: AudioDevice) -> Option<&'static str> {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device)
            .copied()
    }
}

/// Exclusive hold on a device, released on drop
#[derive(Debug)]
#[must_use = "the device is released as soon as the lease is dropped"]
pub struct DeviceLease {
    device: AudioDevice,
    owner: &'static str,
    owners: Arc<Owners>,
}

impl DeviceLease {
    #[must_use]
    pub const fn device(&self) -> AudioDevice {
        self.device
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device);
        tracing::trace!(device = %self.device, owner = self.owner, "device released");
    }
}
