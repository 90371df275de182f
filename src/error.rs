//! Error types for the interception engine.
use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Fatal outcomes of topology resolution.
///
/// Each variant maps to a distinct process exit code so that a supervisor can
/// tell setup failures apart without parsing log output.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot determine the network mask of {device}: {source:#}")]
    Mask {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot open the probing sockets on {device}: {source:#}")]
    Socket {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot query the routing table: {0:#}")]
    Routing(#[source] anyhow::Error),

    #[error("no default route in the main routing table")]
    NoDefaultRoute,

    #[error("cannot probe {address}: {source:#}")]
    Probe {
        address: Ipv4Addr,
        #[source]
        source: anyhow::Error,
    },

    #[error("no echo reply from the gateway {gateway} nor through the fallback {fallback}")]
    GatewayUnreachable { gateway: Ipv4Addr, fallback: Ipv4Addr },

    #[error("cannot determine the addresses of {device}: {source:#}")]
    Local {
        device: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no echo reply from the target {0}")]
    TargetUnreachable(Ipv4Addr),
}

impl ResolveError {
    /// Process exit code reported for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::Mask { .. } => 1,
            ResolveError::Socket { .. } => 2,
            ResolveError::Routing(_) => 3,
            ResolveError::NoDefaultRoute => 4,
            ResolveError::Probe { .. } => 5,
            ResolveError::Local { .. } => 6,
            ResolveError::GatewayUnreachable { .. } => 12,
            ResolveError::TargetUnreachable(_) => 13,
        }
    }
}

/// Failures to start a capture loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open a capture on {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: pcap::Error,
    },

    #[error("cannot install filter {filter:?} on {device}: {source}")]
    Filter {
        device: String,
        filter: String,
        #[source]
        source: pcap::Error,
    },

    #[error("cannot spawn the capture thread: {0}")]
    Spawn(#[source] io::Error),
}

/// An injection failure, reported per frame.
#[derive(Debug, Error)]
#[error("cannot relay frame: {0:#}")]
pub struct RelayError(#[source] pub anyhow::Error);

/// Invalid records in a routing-table response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NetlinkError {
    #[error("truncated netlink message: {needed} bytes needed, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid netlink message length {0}")]
    InvalidLength(u32),

    #[error("kernel returned error {0} to the route dump")]
    Kernel(i32),
}

/// A frame that cannot be decoded.
///
/// The classifier reports this instead of reading out of bounds; the frame is
/// still relayed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedPacket {
    #[error("truncated {layer} header ({available} bytes available)")]
    Truncated {
        layer: &'static str,
        available: usize,
    },

    #[error("invalid {layer} header length ({length} bytes)")]
    InvalidHeaderLength { layer: &'static str, length: usize },

    #[error("unsupported ARP address sizes (hardware {hardware}, protocol {protocol})")]
    UnsupportedArp { hardware: u8, protocol: u8 },
}
