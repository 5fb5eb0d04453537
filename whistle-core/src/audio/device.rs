//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Heuristic flag for devices that capture system output rather than a
    /// microphone.
    pub is_loopback_like: bool,
    /// Default capture rate, when the device reports one.
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
];

/// Best-effort heuristic for loopback/system-output capture devices.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List all available audio input devices, default first, loopback-like
/// devices last.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            return Vec::new();
        }
    };

    let mut list: Vec<DeviceInfo> = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            let config = device.default_input_config().ok();
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: is_loopback_like_name(&name),
                sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                channels: config.as_ref().map(|c| c.channels()),
                name,
            }
        })
        .collect();

    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.is_loopback_like, d.name.to_ascii_lowercase()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            is_default,
            is_loopback_like: is_loopback_like_name(name),
            sample_rate: Some(48_000),
            channels: Some(1),
        }
    }

    #[test]
    fn loopback_names_are_flagged() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("USB Microphone"));
    }

    #[test]
    fn default_sorts_first_and_loopback_last() {
        let mut list = vec![
            info("Stereo Mix", false),
            info("b mic", false),
            info("Headset", true),
            info("A mic", false),
        ];
        sort_devices(&mut list);
        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Headset", "A mic", "b mic", "Stereo Mix"]);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(info("USB Mic", true)).expect("serialize device");
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["isLoopbackLike"], false);
        assert_eq!(json["sampleRate"], 48_000);
    }
}
