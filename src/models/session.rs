use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

use pnet::util::MacAddr;

use crate::utilities::network_address;

/// Everything the capture loops need to know about the intercepted link.
///
/// Built once by the resolver (or from manual addresses) and read-only
/// afterwards; the capture loops share it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Capture device.
    pub device: String,
    pub netmask: Ipv4Addr,
    /// Network address of the capture device.
    pub network: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub gateway_mac: MacAddr,
    /// Address of the intercepting host.
    pub attacker_ip: Ipv4Addr,
    pub attacker_mac: MacAddr,
    pub target_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    /// Extra filter expression and-ed with each capture loop's own filter.
    pub filter: Option<String>,
}

/// Addresses supplied by the user in manual mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManualAddresses {
    pub netmask: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub gateway_mac: MacAddr,
    pub attacker_ip: Ipv4Addr,
    pub attacker_mac: MacAddr,
    pub target_mac: MacAddr,
}

impl Session {
    /// Build a session without any resolution.
    pub fn manual(device: &str, target_ip: Ipv4Addr, addresses: &ManualAddresses) -> Self {
        Session {
            device: device.to_string(),
            netmask: addresses.netmask,
            network: network_address(addresses.attacker_ip, addresses.netmask),
            gateway_ip: addresses.gateway_ip,
            gateway_mac: addresses.gateway_mac,
            attacker_ip: addresses.attacker_ip,
            attacker_mac: addresses.attacker_mac,
            target_ip,
            target_mac: addresses.target_mac,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }
}

impl Display for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "device={}", self.device)?;
        write!(f, " network={}", self.network)?;
        write!(f, " netmask={}", self.netmask)?;
        write!(f, " gateway_ip={}", self.gateway_ip)?;
        write!(f, " gateway_mac={}", self.gateway_mac)?;
        write!(f, " attacker_ip={}", self.attacker_ip)?;
        write!(f, " attacker_mac={}", self.attacker_mac)?;
        write!(f, " target_ip={}", self.target_ip)?;
        write!(f, " target_mac={}", self.target_mac)
    }
}
