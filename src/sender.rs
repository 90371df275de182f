//! Send active probes (ICMP echo requests).
//!
//! Probes go through a layer-4 socket so that the kernel performs the
//! link-layer resolution: the reply that comes back is what reveals the
//! peer's MAC address to the passive capture.
use std::net::{IpAddr, Ipv4Addr};

use anyhow::{Context, Result};
use log::debug;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::TransportChannelType::Layer4;
use pnet::transport::TransportProtocol::Ipv4;
use pnet::transport::{transport_channel, TransportSender};
use rand::{thread_rng, Rng};

use crate::builder::{build_echo_request, echo_request, ECHO_REQUEST_SIZE};

pub struct EchoSender {
    buffer: [u8; ECHO_REQUEST_SIZE],
    identifier: u16,
    sequence: u16,
    sender: TransportSender,
}

impl EchoSender {
    pub fn new() -> Result<Self> {
        let (sender, _) = transport_channel(4096, Layer4(Ipv4(IpNextHeaderProtocols::Icmp)))
            .context("Cannot open ICMP socket (missing CAP_NET_RAW?)")?;
        Ok(EchoSender {
            buffer: [0u8; ECHO_REQUEST_SIZE],
            identifier: thread_rng().gen(),
            sequence: 0,
            sender,
        })
    }

    /// Send one echo request to `destination`.
    pub fn send(&mut self, destination: Ipv4Addr) -> Result<()> {
        self.sequence = self.sequence.wrapping_add(1);
        build_echo_request(&mut self.buffer, self.identifier, self.sequence)?;
        let packet = echo_request(&self.buffer)?;
        self.sender
            .send_to(packet, IpAddr::V4(destination))
            .with_context(|| format!("Cannot send echo request to {destination}"))?;
        debug!(
            "echo_request dst={} id={} seq={}",
            destination, self.identifier, self.sequence
        );
        Ok(())
    }
}
