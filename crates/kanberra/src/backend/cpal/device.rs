//! Output device lookup across all cpal hosts
//!
//! Device strings are either a bare device name, searched on every host, or
//! `[HOST] name` to pin one host (e.g. `[ALSA] hw:0,0`), matching the labels
//! returned by [`output_device_labels`].

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use crate::error::{KaError, KaResult};

/// Parsed device string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub name: String,
    pub host: Option<String>,
}

impl DeviceSpec {
    pub fn parse(device: &str) -> Self {
        let device = device.trim();
        if let Some(rest) = device.strip_prefix('[') {
            if let Some((host, name)) = rest.split_once(']') {
                return Self {
                    name: name.trim().to_string(),
                    host: Some(host.trim().to_string()),
                };
            }
        }
        Self {
            name: device.to_string(),
            host: None,
        }
    }

    pub fn label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Human-readable host name
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id).eq_ignore_ascii_case(name))
        .and_then(|id| cpal::host_from_id(id).ok())
}

fn find_on_host(host: &Host, name: &str) -> Option<cpal::Device> {
    host.output_devices()
        .ok()?
        .find(|d: &cpal::Device| d.name().ok().as_deref() == Some(name))
}

/// Resolve a device string to an output device. `None` picks the default
/// device of the default host. Nothing found is NOTAVAILABLE.
pub fn find_output_device(spec: Option<&DeviceSpec>) -> KaResult<cpal::Device> {
    let Some(spec) = spec else {
        return cpal::default_host()
            .default_output_device()
            .ok_or(KaError::NotAvailable);
    };

    if let Some(host_name) = &spec.host {
        let host = get_host_by_name(host_name).ok_or(KaError::NotAvailable)?;
        return find_on_host(&host, &spec.name).ok_or(KaError::NotAvailable);
    }

    for host_id in cpal::available_hosts() {
        match cpal::host_from_id(host_id) {
            Ok(host) => {
                if let Some(device) = find_on_host(&host, &spec.name) {
                    return Ok(device);
                }
            }
            Err(e) => log::debug!("[CPAL] Could not initialize host {:?}: {}", host_id, e),
        }
    }

    Err(KaError::NotAvailable)
}

/// Labels of every output device on every host
pub fn output_device_labels() -> Vec<String> {
    let mut labels = Vec::new();
    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(devices) = host.output_devices() else {
            continue;
        };
        let host = host_name(host_id);
        for device in devices {
            if let Ok(name) = device.name() {
                labels.push(DeviceSpec { name, host: Some(host.clone()) }.label());
            }
        }
    }
    labels
}
