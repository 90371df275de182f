//! Utilities.
use std::net::{IpAddr, Ipv4Addr};
use std::panic;
use std::process;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use log::{error, LevelFilter};
use pcap::Device;
use pnet::datalink::MacAddr;

use crate::neighbors::RoutingTable;

/// Configure the global logger used by the binaries.
pub fn configure_logger(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_micros()
        .init();
}

/// Exit the whole process when any thread panics.
///
/// Capture loops are long-lived threads that are only joined at shutdown;
/// without this a panic in one of them would go unnoticed.
pub fn exit_process_on_panic() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        error!("{}", info);
        default_hook(info);
        process::exit(1);
    }));
}

/// Return the interface carrying the default route, if any.
pub fn get_default_interface() -> String {
    if let Ok(table) = RoutingTable::from_native() {
        if let Some(route) = table.default_route() {
            return route.interface.clone();
        }
    }
    "".to_string()
}

/// Return the pcap device for the given interface.
// NOTE: We need this function to get the addresses associated to an interface,
// as a device created using interface.into() will contain an empty list of addresses.
fn get_device(interface: &str) -> Option<Device> {
    Device::list()
        .ok()?
        .into_iter()
        .find(|device| device.name.eq(interface))
}

/// Return the network mask and the network address of the device's first IPv4 address.
pub fn get_netmask(interface: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let device = get_device(interface).with_context(|| format!("no such device: {interface}"))?;
    device
        .addresses
        .iter()
        .find_map(|address| match (address.addr, address.netmask) {
            (IpAddr::V4(ip), Some(IpAddr::V4(netmask))) => {
                Some((netmask, network_address(ip, netmask)))
            }
            _ => None,
        })
        .with_context(|| format!("{interface} has no IPv4 network"))
}

/// Return the first IPv4 address of the device.
pub fn get_ipv4_address(interface: &str) -> Option<Ipv4Addr> {
    get_device(interface)?
        .addresses
        .iter()
        .find_map(|address| match address.addr {
            IpAddr::V4(ip) => Some(ip),
            _ => None,
        })
}

/// Return the MAC address of the device (if any).
pub fn get_mac_address(interface: &str) -> Option<MacAddr> {
    pnet::datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == interface)
        .and_then(|iface| iface.mac)
}

/// Lock a statistics mutex, ignoring poisoning.
///
/// Counters stay meaningful even if a thread panicked while holding them.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn network_address(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & u32::from(netmask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_address() {
        assert_eq!(
            network_address(
                Ipv4Addr::new(192, 168, 1, 42),
                Ipv4Addr::new(255, 255, 255, 0)
            ),
            Ipv4Addr::new(192, 168, 1, 0)
        );
    }
}
