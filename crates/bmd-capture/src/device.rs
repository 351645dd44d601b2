//! Device selection and the configuration steps shared by the probe and
//! the capture session.

use std::sync::Arc;

use bmd_core::{AudioConnection, CaptureError, CaptureParams, VideoConnection};
use tracing::debug;

use crate::sdk::{
    Configuration, DeckLinkApi, Device, DeviceIterator, DisplayMode, DisplayModeIterator, Input,
};

/// The selected device, kept together with the iterator that produced it.
///
/// Fields drop top to bottom: the device handle goes before its iterator.
pub(crate) struct DeviceHandle {
    device:   Arc<dyn Device>,
    _devices: Box<dyn DeviceIterator>,
    instance: usize,
}

impl DeviceHandle {
    /// Walk the device list to the zero-based `instance`.
    pub(crate) fn open(api: &dyn DeckLinkApi, instance: usize) -> Result<Self, CaptureError> {
        let mut devices = api.iterator().map_err(CaptureError::IteratorUnavailable)?;
        let mut seen = 0;
        loop {
            match devices.next_device() {
                Some(device) if seen == instance => {
                    debug!("Opened DeckLink #{} ({})", instance, device.model_name());
                    return Ok(Self { device, _devices: devices, instance });
                }
                Some(_) => seen += 1,
                None => return Err(CaptureError::DeviceNotFound { instance, available: seen }),
            }
        }
    }

    pub(crate) fn device(&self) -> &dyn Device {
        &*self.device
    }

    pub(crate) fn instance(&self) -> usize {
        self.instance
    }

    pub(crate) fn input(&self) -> Result<Arc<dyn Input>, CaptureError> {
        self.device.input().ok_or(CaptureError::InterfaceUnsupported("input"))
    }

    pub(crate) fn configuration(&self) -> Result<Arc<dyn Configuration>, CaptureError> {
        self.device
            .configuration()
            .ok_or(CaptureError::InterfaceUnsupported("configuration"))
    }
}

/// Route the requested connectors. `Unchanged` skips the call entirely.
pub(crate) fn apply_connections(
    configuration: &dyn Configuration,
    params: &CaptureParams,
) -> Result<(), CaptureError> {
    if params.video_connection != VideoConnection::Unchanged {
        configuration
            .set_video_input_connection(params.video_connection)
            .map_err(CaptureError::hardware("set video input connection"))?;
        debug!("Video input connection: {:?}", params.video_connection);
    }
    if params.audio_connection != AudioConnection::Unchanged {
        configuration
            .set_audio_input_connection(params.audio_connection)
            .map_err(CaptureError::hardware("set audio input connection"))?;
        debug!("Audio input connection: {:?}", params.audio_connection);
    }
    Ok(())
}

/// Advance a fresh display-mode iterator to `index`.
///
/// Returns the iterator together with the selected mode; modes before it are
/// released as the walk passes them.
pub(crate) fn select_mode(
    input: &dyn Input,
    index: usize,
) -> Result<(Box<dyn DisplayModeIterator>, Box<dyn DisplayMode>), CaptureError> {
    let mut modes = input
        .display_modes()
        .map_err(CaptureError::hardware("get display mode iterator"))?;
    let mut seen = 0;
    while let Some(mode) = modes.next_mode() {
        if seen == index {
            return Ok((modes, mode));
        }
        seen += 1;
    }
    Err(CaptureError::DisplayModeOutOfRange { index, available: seen })
}
