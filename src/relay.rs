//! Re-emit captured frames on the peer-facing interface.
use anyhow::{Context, Result};
use log::trace;
use pcap::{Active, Capture};
use pnet::packet::ethernet::EthernetPacket;

use crate::builder::{build_ethernet, ETHERNET_HEADER_SIZE};
use crate::error::RelayError;

/// Something that puts raw Ethernet frames on the wire.
pub trait Injector {
    fn inject(&mut self, frame: &[u8]) -> Result<()>;
}

impl Injector for Capture<Active> {
    fn inject(&mut self, frame: &[u8]) -> Result<()> {
        self.sendpacket(frame).context("Cannot inject frame")
    }
}

/// Outcome of a call to [`Relay::relay`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Relayed {
    /// The frame was handed to the injector.
    Sent,
    /// The frame has no Ethernet header and was dropped.
    Dropped,
}

pub struct Relay<I: Injector> {
    buffer: Vec<u8>,
    injector: I,
}

impl<I: Injector> Relay<I> {
    pub fn new(injector: I) -> Self {
        Self {
            buffer: Vec::with_capacity(65536),
            injector,
        }
    }

    pub fn injector(&self) -> &I {
        &self.injector
    }

    /// Rebuild `frame` with its own ethertype and MAC addresses and inject it.
    ///
    /// The payload beyond the Ethernet header is copied unchanged. Frames
    /// shorter than an Ethernet header cannot be re-emitted.
    pub fn relay(&mut self, frame: &[u8]) -> Result<Relayed, RelayError> {
        let Some(ethernet) = EthernetPacket::new(frame) else {
            trace!("dropping {} bytes frame without Ethernet header", frame.len());
            return Ok(Relayed::Dropped);
        };
        build_ethernet(
            &mut self.buffer,
            ethernet.get_ethertype(),
            ethernet.get_destination(),
            ethernet.get_source(),
            &frame[ETHERNET_HEADER_SIZE..],
        )
        .map_err(RelayError)?;
        self.injector.inject(&self.buffer).map_err(RelayError)?;
        Ok(Relayed::Sent)
    }
}
