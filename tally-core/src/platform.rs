//! Host platform collaborators
//!
//! - [`PlatformInfo`] describes the device for the one-time `platform` event.
//! - [`AdvertisingIdProvider`] resolves an advertising identifier, if the host
//!   has one.

/// Device description sent once per install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformDescriptor {
    pub manufacturer: String,
    pub model: String,
    pub os_name: String,
    pub os_version: String,
    pub arch: String,
    pub locale: String,
}

/// Source of the [`PlatformDescriptor`]
pub trait PlatformInfo: Send + Sync {
    fn descriptor(&self) -> PlatformDescriptor;
}

/// Describes the machine this process runs on.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl PlatformInfo for HostPlatform {
    fn descriptor(&self) -> PlatformDescriptor {
        PlatformDescriptor {
            manufacturer: read_dmi("sys_vendor"),
            model: read_dmi("product_name"),
            os_name: std::env::consts::OS.to_string(),
            os_version: os_version(),
            arch: std::env::consts::ARCH.to_string(),
            locale: locale(),
        }
    }
}

fn read_dmi(field: &str) -> String {
    std::fs::read_to_string(format!("/sys/class/dmi/id/{}", field))
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// `VERSION_ID` from os-release, empty when unavailable.
fn os_version() -> String {
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| {
            content.lines().find_map(|line| {
                line.strip_prefix("VERSION_ID=")
                    .map(|value| value.trim_matches('"').to_string())
            })
        })
        .unwrap_or_default()
}

/// First of `LC_ALL`, `LC_MESSAGES`, `LANG` without the encoding suffix.
fn locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
        .map(|value| value.split('.').next().unwrap_or_default().to_string())
        .unwrap_or_default()
}

/// Resolved advertising identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingInfo {
    pub id: String,
    /// The user opted out of ad tracking
    pub limit_ad_tracking: bool,
}

/// Best-effort advertising id lookup, called once on the first tick.
pub trait AdvertisingIdProvider: Send + Sync {
    fn advertising_info(&self) -> Option<AdvertisingInfo>;
}

/// Provider for hosts without an advertising id.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAdvertisingId;

impl AdvertisingIdProvider for NoAdvertisingId {
    fn advertising_info(&self) -> Option<AdvertisingInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_platform_reports_os_and_arch() {
        let descriptor = HostPlatform.descriptor();
        assert_eq!(descriptor.os_name, std::env::consts::OS);
        assert_eq!(descriptor.arch, std::env::consts::ARCH);
    }

    #[test]
    fn test_no_advertising_id() {
        assert!(NoAdvertisingId.advertising_info().is_none());
    }
}
