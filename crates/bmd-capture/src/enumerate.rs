//! Device and display-mode listing.

use bmd_core::{CaptureError, Direction, DisplayModeInfo, IoDirections};
use tracing::warn;

use crate::sdk::{DeckLinkApi, Device, DisplayModeIterator};

/// One row of the device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub index:            usize,
    pub model_name:       String,
    pub has_input:        bool,
    pub has_output:       bool,
    /// `None` when the device exposes no attributes interface.
    pub format_detection: Option<bool>,
}

pub fn list_devices(api: &dyn DeckLinkApi) -> Result<Vec<DeviceSummary>, CaptureError> {
    let mut devices = api.iterator().map_err(CaptureError::IteratorUnavailable)?;
    let mut out = Vec::new();
    while let Some(device) = devices.next_device() {
        out.push(DeviceSummary {
            index:            out.len(),
            model_name:       device.model_name(),
            has_input:        device.input().is_some(),
            has_output:       device.output().is_some(),
            format_detection: device
                .attributes()
                .and_then(|a| a.supports_input_format_detection().ok()),
        });
    }
    Ok(out)
}

/// Visit every display mode of the selected device(s) and direction(s).
///
/// `instance = None` visits all devices. The visitor receives the device
/// index, the direction, and the mode; modes the SDK cannot name are
/// skipped. Returns the number of modes visited.
pub fn enumerate_display_modes<F>(
    api: &dyn DeckLinkApi,
    instance: Option<usize>,
    directions: IoDirections,
    mut visit: F,
) -> Result<usize, CaptureError>
where
    F: FnMut(usize, Direction, &DisplayModeInfo),
{
    let mut devices = api.iterator().map_err(CaptureError::IteratorUnavailable)?;
    let mut visited = 0;
    let mut index = 0;
    while let Some(device) = devices.next_device() {
        if instance.map_or(true, |want| want == index) {
            for direction in [Direction::Input, Direction::Output] {
                if !directions.contains(direction) {
                    continue;
                }
                let Some(modes) = mode_iterator(&*device, direction) else { continue };
                visited += visit_modes(modes, |info| visit(index, direction, info));
            }
        }
        index += 1;
    }
    Ok(visited)
}

fn mode_iterator(device: &dyn Device, direction: Direction) -> Option<Box<dyn DisplayModeIterator>> {
    let result = match direction {
        Direction::Input => device.input()?.display_modes(),
        Direction::Output => device.output()?.display_modes(),
    };
    result
        .map_err(|e| warn!("{}: no {} display modes: {}", device.model_name(), direction, e))
        .ok()
}

fn visit_modes(mut modes: Box<dyn DisplayModeIterator>, mut visit: impl FnMut(&DisplayModeInfo)) -> usize {
    let mut n = 0;
    while let Some(mode) = modes.next_mode() {
        if mode.name().is_none() {
            continue;
        }
        visit(&mode.info());
        n += 1;
    }
    n
}
