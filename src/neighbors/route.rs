use std::fmt::{Debug, Formatter};
use std::net::Ipv4Addr;

use anyhow::Result;

use crate::neighbors::netlink::{align, ne_u16, ne_u32, RTMSG_LEN};

pub const AF_INET: u8 = 2;
pub const RT_TABLE_MAIN: u8 = 254;

pub const RTA_DST: u16 = 1;
pub const RTA_OIF: u16 = 4;
pub const RTA_GATEWAY: u16 = 5;
pub const RTA_PREFSRC: u16 = 7;
pub const RTA_TABLE: u16 = 15;

/// Size of `struct rtattr`.
const RTA_HDRLEN: usize = 4;

/// Timeout applied to the route dump.
pub const DEFAULT_NETLINK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// An IPv4 route of the main routing table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    /// 0.0.0.0 when the route carries no destination attribute.
    pub destination: Ipv4Addr,
    pub destination_length: u8,
    /// Preferred source address, 0.0.0.0 if absent.
    pub source: Ipv4Addr,
    /// 0.0.0.0 for directly connected routes.
    pub gateway: Ipv4Addr,
    pub interface_index: u32,
    /// Empty until resolved from the interface index.
    pub interface: String,
}

impl Default for RouteEntry {
    fn default() -> Self {
        Self {
            destination: Ipv4Addr::UNSPECIFIED,
            destination_length: 0,
            source: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            interface_index: 0,
            interface: String::new(),
        }
    }
}

impl RouteEntry {
    /// Decode the payload of an `RTM_NEWROUTE` message.
    ///
    /// Returns `None` for routes outside of the IPv4 family or the main table,
    /// and for payloads too short to hold a `struct rtmsg`.
    pub fn from_netlink(payload: &[u8]) -> Option<Self> {
        let rtmsg = payload.get(..RTMSG_LEN)?;
        let family = rtmsg[0];
        let mut table = rtmsg[4];

        let mut route = RouteEntry {
            destination_length: rtmsg[1],
            ..Default::default()
        };

        let mut attributes = payload.get(align(RTMSG_LEN)..).unwrap_or(&[]);
        while attributes.len() >= RTA_HDRLEN {
            let length = ne_u16(attributes, 0) as usize;
            let kind = ne_u16(attributes, 2);
            if length < RTA_HDRLEN || length > attributes.len() {
                break;
            }
            let data = &attributes[RTA_HDRLEN..length];
            match (kind, data.len()) {
                (RTA_DST, 4) => route.destination = ipv4(data),
                (RTA_GATEWAY, 4) => route.gateway = ipv4(data),
                (RTA_PREFSRC, 4) => route.source = ipv4(data),
                (RTA_OIF, 4) => route.interface_index = ne_u32(data, 0),
                // Tables above 255 only appear in this attribute.
                (RTA_TABLE, 4) => table = ne_u32(data, 0).min(u8::MAX as u32) as u8,
                _ => {}
            }
            attributes = attributes.get(align(length)..).unwrap_or(&[]);
        }

        if family != AF_INET || table != RT_TABLE_MAIN {
            return None;
        }
        Some(route)
    }

    pub fn is_default(&self) -> bool {
        self.destination == Ipv4Addr::UNSPECIFIED && self.destination_length == 0
    }
}

fn ipv4(data: &[u8]) -> Ipv4Addr {
    // Addresses are in network order, unlike the surrounding netlink fields.
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

/// The IPv4 main routing table.
pub struct RoutingTable {
    routes: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new(routes: Vec<RouteEntry>) -> Self {
        Self { routes }
    }

    /// Build a routing table by querying the kernel over netlink.
    #[cfg(target_os = "linux")]
    pub fn from_native() -> Result<Self> {
        let socket = crate::neighbors::NetlinkSocket::open(DEFAULT_NETLINK_TIMEOUT)?;
        let mut routes = socket.dump_routes()?;
        let interfaces = pnet::datalink::interfaces();
        for route in routes.iter_mut() {
            if let Some(interface) = interfaces
                .iter()
                .find(|interface| interface.index == route.interface_index)
            {
                route.interface = interface.name.clone();
            }
        }
        Ok(Self::new(routes))
    }

    #[cfg(not(target_os = "linux"))]
    pub fn from_native() -> Result<Self> {
        anyhow::bail!("routing table queries require netlink (Linux)")
    }

    pub fn all(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// The default route, i.e. the entry whose destination is 0.0.0.0.
    ///
    /// When several exist, the first one with a gateway wins.
    pub fn default_route(&self) -> Option<&RouteEntry> {
        let mut defaults = self.routes.iter().filter(|route| route.is_default());
        defaults
            .clone()
            .find(|route| route.gateway != Ipv4Addr::UNSPECIFIED)
            .or_else(|| defaults.next())
    }
}

impl Debug for RoutingTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.routes.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(destination: Ipv4Addr, length: u8, gateway: Ipv4Addr) -> RouteEntry {
        RouteEntry {
            destination,
            destination_length: length,
            gateway,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_route_prefers_gateway() {
        let table = RoutingTable::new(vec![
            route(Ipv4Addr::new(192, 168, 1, 0), 24, Ipv4Addr::UNSPECIFIED),
            route(Ipv4Addr::UNSPECIFIED, 0, Ipv4Addr::UNSPECIFIED),
            route(Ipv4Addr::UNSPECIFIED, 0, Ipv4Addr::new(192, 168, 1, 1)),
        ]);
        let default = table.default_route().unwrap();
        assert_eq!(default.gateway, Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_no_default_route() {
        let table = RoutingTable::new(vec![route(
            Ipv4Addr::new(10, 0, 0, 0),
            8,
            Ipv4Addr::new(10, 0, 0, 1),
        )]);
        assert!(table.default_route().is_none());
    }

    #[test]
    fn test_default_entry_is_unspecified() {
        let entry = RouteEntry::default();
        assert_eq!(entry.destination, Ipv4Addr::UNSPECIFIED);
        assert_eq!(entry.source, Ipv4Addr::UNSPECIFIED);
        assert_eq!(entry.gateway, Ipv4Addr::UNSPECIFIED);
        assert!(entry.is_default());
        assert!(entry.interface.is_empty());
    }

    #[test]
    fn test_rtmsg_too_short() {
        assert_eq!(RouteEntry::from_netlink(&[AF_INET, 0, 0]), None);
    }
}
