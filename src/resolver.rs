//! Resolve the addresses of the gateway, the local host and the target.
//!
//! Resolution runs once, before any capture loop, and goes through the
//! following states, each step blocking with its own deadline:
//!
//! `Init → MaskResolved → GatewayResolved → LocalResolved → TargetResolved`
//!
//! The probe capture and socket are opened once the network mask is known.
//! Hardware addresses are learned by sending an ICMP echo request and reading
//! the Ethernet source of the reply. If the gateway does not answer, a second
//! probe is sent to a fallback address beyond it: that reply is forwarded by
//! the gateway, so its Ethernet source is the gateway as well.
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use pnet::util::MacAddr;

use crate::error::ResolveError;
use crate::models::Session;
use crate::neighbors::RoutingTable;
use crate::receiver::EchoReceiver;
use crate::sender::EchoSender;
use crate::utilities::{get_ipv4_address, get_mac_address, get_netmask};

/// The network operations the resolver depends on.
pub trait Topology {
    /// Network mask and network address of the device.
    fn netmask(&mut self, device: &str) -> Result<(Ipv4Addr, Ipv4Addr)>;

    /// Open the capture and socket [`Topology::probe`] needs on the device.
    ///
    /// Called once, after the network mask is known.
    fn open_sockets(&mut self, _device: &str) -> Result<()> {
        Ok(())
    }

    /// Gateway of the default route, `None` if there is no default route.
    fn default_gateway(&mut self) -> Result<Option<Ipv4Addr>>;

    /// Arm the reply capture for `destination` and send it one echo request.
    fn probe(&mut self, destination: Ipv4Addr) -> Result<()>;

    /// Wait up to `timeout` for the echo reply of the last probe.
    fn await_reply(&mut self, source: Ipv4Addr, timeout: Duration) -> Result<Option<MacAddr>>;

    /// MAC and IPv4 address of the device.
    fn local_identity(&mut self, device: &str) -> Result<(MacAddr, Ipv4Addr)>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResolverState {
    Init,
    MaskResolved,
    GatewayResolved,
    LocalResolved,
    TargetResolved,
}

impl Display for ResolverState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResolverState::Init => "init",
            ResolverState::MaskResolved => "mask_resolved",
            ResolverState::GatewayResolved => "gateway_resolved",
            ResolverState::LocalResolved => "local_resolved",
            ResolverState::TargetResolved => "target_resolved",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct ResolverOptions {
    /// Deadline of each gateway probe (the fallback probe gets its own).
    pub gateway_timeout: Duration,
    /// Deadline of the target probe.
    pub target_timeout: Duration,
    /// Address probed through the gateway when the gateway itself is silent.
    pub fallback_address: Ipv4Addr,
    /// Log the resolved addresses at info level instead of debug.
    pub debug: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(2),
            target_timeout: Duration::from_secs(1),
            fallback_address: Ipv4Addr::new(8, 8, 8, 8),
            debug: false,
        }
    }
}

pub struct Resolver<T: Topology> {
    topology: T,
    options: ResolverOptions,
    state: ResolverState,
    fallback_used: bool,
}

impl<T: Topology> Resolver<T> {
    pub fn new(topology: T, options: ResolverOptions) -> Self {
        Self {
            topology,
            options,
            state: ResolverState::Init,
            fallback_used: false,
        }
    }

    pub fn state(&self) -> ResolverState {
        self.state
    }

    /// Whether the gateway was only reached through the fallback address.
    pub fn fallback_used(&self) -> bool {
        self.fallback_used
    }

    pub fn topology(&self) -> &T {
        &self.topology
    }

    /// Resolve every address of the session on `device` for `target_ip`.
    pub fn resolve(&mut self, device: &str, target_ip: Ipv4Addr) -> Result<Session, ResolveError> {
        let (netmask, network) =
            self.topology
                .netmask(device)
                .map_err(|source| ResolveError::Mask {
                    device: device.to_string(),
                    source,
                })?;
        self.advance(ResolverState::MaskResolved);

        self.topology
            .open_sockets(device)
            .map_err(|source| ResolveError::Socket {
                device: device.to_string(),
                source,
            })?;

        let gateway_ip = self
            .topology
            .default_gateway()
            .map_err(ResolveError::Routing)?
            .ok_or(ResolveError::NoDefaultRoute)?;
        let gateway_mac = self.resolve_gateway_mac(gateway_ip)?;
        self.advance(ResolverState::GatewayResolved);

        let (attacker_mac, attacker_ip) =
            self.topology
                .local_identity(device)
                .map_err(|source| ResolveError::Local {
                    device: device.to_string(),
                    source,
                })?;
        self.advance(ResolverState::LocalResolved);

        let target_mac = self
            .probe_once(target_ip, self.options.target_timeout)?
            .ok_or(ResolveError::TargetUnreachable(target_ip))?;
        self.advance(ResolverState::TargetResolved);

        let session = Session {
            device: device.to_string(),
            netmask,
            network,
            gateway_ip,
            gateway_mac,
            attacker_ip,
            attacker_mac,
            target_ip,
            target_mac,
            filter: None,
        };
        if self.options.debug {
            info!("gateway: {} is {}", gateway_mac, gateway_ip);
            info!("attacker: {} is {}", attacker_mac, attacker_ip);
            info!("target: {} is {}", target_mac, target_ip);
        } else {
            debug!("{}", session);
        }
        Ok(session)
    }

    fn advance(&mut self, state: ResolverState) {
        debug!("resolver {} -> {}", self.state, state);
        self.state = state;
    }

    fn resolve_gateway_mac(&mut self, gateway_ip: Ipv4Addr) -> Result<MacAddr, ResolveError> {
        let timeout = self.options.gateway_timeout;
        if let Some(mac) = self.probe_once(gateway_ip, timeout)? {
            return Ok(mac);
        }
        let fallback = self.options.fallback_address;
        debug!(
            "no echo reply from the gateway {} within {:?}, probing {} through it",
            gateway_ip, timeout, fallback
        );
        self.fallback_used = true;
        self.probe_once(fallback, timeout)?
            .ok_or(ResolveError::GatewayUnreachable {
                gateway: gateway_ip,
                fallback,
            })
    }

    fn probe_once(
        &mut self,
        destination: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Option<MacAddr>, ResolveError> {
        let to_error = |source| ResolveError::Probe {
            address: destination,
            source,
        };
        self.topology.probe(destination).map_err(to_error)?;
        self.topology
            .await_reply(destination, timeout)
            .map_err(to_error)
    }
}

/// [`Topology`] backed by netlink, pcap and a raw ICMP socket.
///
/// The capture and the socket are only opened by [`Topology::open_sockets`].
#[derive(Default)]
pub struct LiveTopology {
    sockets: Option<(EchoReceiver, EchoSender)>,
}

impl LiveTopology {
    pub fn new() -> Self {
        Self::default()
    }

    fn sockets(&mut self) -> Result<&mut (EchoReceiver, EchoSender)> {
        self.sockets
            .as_mut()
            .context("Echo sockets are not open")
    }
}

impl Topology for LiveTopology {
    fn netmask(&mut self, device: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
        get_netmask(device)
    }

    fn open_sockets(&mut self, device: &str) -> Result<()> {
        self.sockets = Some((EchoReceiver::new(device)?, EchoSender::new()?));
        Ok(())
    }

    fn default_gateway(&mut self) -> Result<Option<Ipv4Addr>> {
        let table = RoutingTable::from_native()?;
        debug!("routing table: {:?}", table);
        Ok(table.default_route().map(|route| route.gateway))
    }

    fn probe(&mut self, destination: Ipv4Addr) -> Result<()> {
        let (receiver, sender) = self.sockets()?;
        receiver.expect_reply_from(destination)?;
        sender.send(destination)
    }

    fn await_reply(&mut self, _source: Ipv4Addr, timeout: Duration) -> Result<Option<MacAddr>> {
        let (receiver, _) = self.sockets()?;
        receiver.next_reply_source(timeout)
    }

    fn local_identity(&mut self, device: &str) -> Result<(MacAddr, Ipv4Addr)> {
        let mac = get_mac_address(device).context("Device has no MAC address")?;
        let ip = get_ipv4_address(device).context("Device has no IPv4 address")?;
        Ok((mac, ip))
    }
}

/// Resolve a session on `device` for `target_ip` using the live network.
pub fn resolve(
    device: &str,
    target_ip: Ipv4Addr,
    options: ResolverOptions,
) -> Result<Session, ResolveError> {
    Resolver::new(LiveTopology::new(), options).resolve(device, target_ip)
}
