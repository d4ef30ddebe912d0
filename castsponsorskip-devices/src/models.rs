use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use mdns_sd::ResolvedService;

use castsponsorskip_core::core::config::DeviceAddr;

/// The device kind advertised by multi-device groups.
///
/// Groups aggregate other devices; watching them would act on streams twice.
pub const CAST_GROUP_DEVICE: &str = "Google Cast Group";

const INFO_ID: &str = "id";
const INFO_FRIENDLY_NAME: &str = "fn";
const INFO_MODEL: &str = "md";

/// A Cast endpoint produced by discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CastEntry {
    /// The stable identifier of the device.
    pub uuid: String,
    /// The friendly name of the device.
    pub name: String,
    /// The device kind, e.g. `Chromecast` or `Google Cast Group`.
    pub device: String,
    pub addr_v4: Option<Ipv4Addr>,
    pub addr_v6: Option<Ipv6Addr>,
    pub port: u16,
    /// The raw TXT records of the mDNS service.
    pub info: HashMap<String, String>,
}

impl CastEntry {
    /// Create an entry from a resolved mDNS service.
    pub fn from_service_info(info: &ResolvedService) -> Self {
        let fields: HashMap<String, String> = info
            .get_properties()
            .iter()
            .map(|e| (e.key().to_string(), e.val_str().to_string()))
            .collect();
        let addr_v4 = info
            .get_addresses()
            .iter()
            .map(|e| e.to_ip_addr())
            .find_map(|e| match e {
                IpAddr::V4(addr) => Some(addr),
                IpAddr::V6(_) => None,
            });
        let addr_v6 = info
            .get_addresses()
            .iter()
            .map(|e| e.to_ip_addr())
            .find_map(|e| match e {
                IpAddr::V4(_) => None,
                IpAddr::V6(addr) => Some(addr),
            });

        Self {
            uuid: fields.get(INFO_ID).cloned().unwrap_or_default(),
            name: fields.get(INFO_FRIENDLY_NAME).cloned().unwrap_or_default(),
            device: fields.get(INFO_MODEL).cloned().unwrap_or_default(),
            addr_v4,
            addr_v6,
            port: info.get_port(),
            info: fields,
        }
    }

    /// The address of the device, preferring IPv4.
    pub fn addr(&self) -> Option<IpAddr> {
        self.addr_v4
            .map(IpAddr::V4)
            .or_else(|| self.addr_v6.map(IpAddr::V6))
    }

    /// Returns false when the entry carries no identifying fields at all.
    pub fn is_identifiable(&self) -> bool {
        !self.uuid.is_empty() || !self.name.is_empty()
    }

    /// Returns true when the entry represents a multi-device group.
    pub fn is_group(&self) -> bool {
        self.device == CAST_GROUP_DEVICE
    }
}

impl From<&DeviceAddr> for CastEntry {
    /// Create a synthetic entry for a statically configured device address.
    fn from(device: &DeviceAddr) -> Self {
        let (addr_v4, addr_v6) = match device.addr {
            IpAddr::V4(addr) => (Some(addr), None),
            IpAddr::V6(addr) => (None, Some(addr)),
        };

        Self {
            uuid: device.host.clone(),
            name: device.host.clone(),
            device: String::new(),
            addr_v4,
            addr_v6,
            port: device.port,
            info: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_entry_addr_prefers_ipv4() {
        let entry = CastEntry {
            addr_v4: Some(Ipv4Addr::new(192, 168, 1, 10)),
            addr_v6: Some(Ipv6Addr::from_str("fe80::1").unwrap()),
            ..Default::default()
        };

        assert_eq!(
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))),
            entry.addr()
        );
    }

    #[test]
    fn test_entry_is_identifiable() {
        assert!(!CastEntry::default().is_identifiable());
        assert!(CastEntry {
            uuid: "abc".to_string(),
            ..Default::default()
        }
        .is_identifiable());
        assert!(CastEntry {
            name: "Living Room TV".to_string(),
            ..Default::default()
        }
        .is_identifiable());
    }

    #[test]
    fn test_entry_is_group() {
        let entry = CastEntry {
            device: CAST_GROUP_DEVICE.to_string(),
            ..Default::default()
        };

        assert!(entry.is_group());
    }

    #[test]
    fn test_entry_from_device_addr() {
        let device = DeviceAddr::from_str("[fe80::1]:9000").unwrap();

        let entry = CastEntry::from(&device);

        assert_eq!("[fe80::1]:9000", entry.uuid);
        assert_eq!(None, entry.addr_v4);
        assert_eq!(Some(Ipv6Addr::from_str("fe80::1").unwrap()), entry.addr_v6);
        assert_eq!(9000, entry.port);
    }
}
