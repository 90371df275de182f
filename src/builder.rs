//! Functions for building the frames and probes emitted by the engine.
use anyhow::{Context, Result};
use pnet::packet::ethernet::{EtherType, EthernetPacket, MutableEthernetPacket};
use pnet::packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet::packet::icmp::{echo_request, IcmpTypes};
use pnet::packet::Packet as _;
use pnet::util::{self, MacAddr};

/// Size of the Ethernet header.
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// Size of the echo request probes, header included.
pub const ECHO_REQUEST_SIZE: usize = 64;

/// Build an Ethernet frame carrying `payload` into `buffer`.
///
/// The buffer is resized to exactly the frame length.
pub fn build_ethernet(
    buffer: &mut Vec<u8>,
    ethertype: EtherType,
    destination: MacAddr,
    source: MacAddr,
    payload: &[u8],
) -> Result<()> {
    buffer.clear();
    buffer.resize(EthernetPacket::minimum_packet_size(), 0);
    buffer.extend_from_slice(payload);
    let mut ethernet =
        MutableEthernetPacket::new(&mut buffer[..]).context("Cannot build Ethernet header")?;
    ethernet.set_destination(destination);
    ethernet.set_source(source);
    ethernet.set_ethertype(ethertype);
    Ok(())
}

/// Build an ICMP Echo Request with a zero payload into `buffer`.
pub fn build_echo_request(buffer: &mut [u8], identifier: u16, sequence: u16) -> Result<()> {
    buffer.fill(0);
    let mut echo =
        MutableEchoRequestPacket::new(buffer).context("Cannot build ICMP Echo Request header")?;
    echo.set_icmp_type(IcmpTypes::EchoRequest);
    echo.set_icmp_code(echo_request::IcmpCodes::NoCode);
    echo.set_identifier(identifier);
    echo.set_sequence_number(sequence);
    let checksum = util::checksum(echo.packet(), 1);
    echo.set_checksum(checksum);
    Ok(())
}

/// View `buffer` as the echo request built by [`build_echo_request`].
pub fn echo_request(buffer: &[u8]) -> Result<EchoRequestPacket<'_>> {
    EchoRequestPacket::new(buffer).context("Cannot read ICMP Echo Request header")
}
