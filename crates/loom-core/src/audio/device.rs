//! Output device enumeration and lookup
//!
//! Devices are enumerated from every available cpal host (ALSA, JACK,
//! PulseAudio, CoreAudio, WASAPI...), so a device id carries its host name
//! alongside the device name.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};
use crate::types::AudioSpec;

/// Sample rates probed against each supported config range
const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Display name of a cpal host
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// One output device and what it can do
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: DeviceId,
    pub name: String,
    /// Host backend name (e.g. "ALSA", "JACK")
    pub host: String,
    /// System default device of its host
    pub is_default: bool,
    /// Common sample rates inside the supported ranges, ascending
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl AudioDevice {
    /// Whether the device can run a stream of this shape without conversion
    pub fn supports(&self, spec: &AudioSpec) -> bool {
        self.max_channels >= spec.channels && self.sample_rates.contains(&spec.sample_rate)
    }
}

fn describe(device: &cpal::Device, host: &str, default_name: Option<&str>) -> Option<AudioDevice> {
    let name = device.name().ok()?;
    let configs: Vec<_> = device.supported_output_configs().ok()?.collect();
    if configs.is_empty() {
        return None;
    }

    let mut sample_rates = Vec::new();
    let mut max_channels = 0u16;
    for config in &configs {
        max_channels = max_channels.max(config.channels());
        for rate in COMMON_RATES {
            if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                && !sample_rates.contains(&rate)
            {
                sample_rates.push(rate);
            }
        }
    }
    sample_rates.sort_unstable();

    Some(AudioDevice {
        id: DeviceId::with_host(&name, host),
        is_default: default_name == Some(name.as_str()),
        name,
        host: host.to_string(),
        sample_rates,
        max_channels,
    })
}

/// Default devices first, then by host, then by name
fn sort_devices(devices: &mut [AudioDevice]) {
    devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// All output devices of every available host
pub fn get_output_devices() -> AudioResult<Vec<AudioDevice>> {
    let mut devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host
            .default_output_device()
            .and_then(|d: cpal::Device| d.name().ok());

        let outputs = match host.output_devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };
        devices.extend(
            outputs.filter_map(|device| describe(&device, &host_label, default_name.as_deref())),
        );
    }

    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }
    sort_devices(&mut devices);

    log::info!("Enumerated {} audio output devices", devices.len());
    Ok(devices)
}

/// The system default output device, or the first one found
pub fn get_default_device() -> AudioResult<AudioDevice> {
    let devices = get_output_devices()?;
    let fallback = devices.first().cloned();
    devices
        .into_iter()
        .find(|d| d.is_default)
        .or(fallback)
        .ok_or_else(|| AudioError::NoDefaultDevice("No output devices available".to_string()))
}

/// Resolve a configured device id to a cpal device
///
/// The id's host is searched first; without one (or when that host is
/// unavailable) every host is searched by device name.
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    if let Some(host) = id.host.as_deref().and_then(host_by_name) {
        return host
            .output_devices()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name))
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| cpal::host_from_id(host_id).ok())
        .filter_map(|host| host.output_devices().ok())
        .flatten()
        .find(|d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name))
        .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))
}

/// Default output device of the default host
pub fn get_cpal_default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))
}

/// Lightweight device entry for listings
#[derive(Debug, Clone)]
pub struct OutputDevice {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    pub is_default: bool,
}

impl From<AudioDevice> for OutputDevice {
    fn from(device: AudioDevice) -> Self {
        Self {
            id: device.id,
            name: device.name,
            host: device.host,
            is_default: device.is_default,
        }
    }
}

impl std::fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        Ok(())
    }
}

/// Output devices for listings; empty (and logged) when enumeration fails
pub fn get_available_output_devices() -> Vec<OutputDevice> {
    match get_output_devices() {
        Ok(devices) => devices.into_iter().map(OutputDevice::from).collect(),
        Err(e) => {
            log::warn!("Failed to enumerate audio devices: {}", e);
            Vec::new()
        }
    }
}
