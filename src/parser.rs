//! Classify captured frames.
//!
//! Every header is decoded from a bounds-checked view of the frame: a header
//! that does not fit in the captured bytes yields a [`MalformedPacket`]
//! instead of an out-of-bounds read. A broken TCP or UDP header does not
//! discard the IPv4 summary: it is recorded in [`Ipv4Summary::transport_error`].
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

use log::debug;
use pnet::packet::arp::{ArpOperation, ArpOperations, ArpPacket};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::util::MacAddr;
use strum::Display as StrumDisplay;

use crate::builder::ETHERNET_HEADER_SIZE;
use crate::error::MalformedPacket;
use crate::http::{HttpDecoder, HTTP_PORT};

/// Transport protocol of an IPv4 packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq, StrumDisplay)]
pub enum Transport {
    #[strum(to_string = "ICMP")]
    Icmp,
    #[strum(to_string = "TCP")]
    Tcp,
    #[strum(to_string = "UDP")]
    Udp,
    #[strum(to_string = "OTHER")]
    Other,
}

impl From<IpNextHeaderProtocol> for Transport {
    fn from(value: IpNextHeaderProtocol) -> Self {
        match value {
            IpNextHeaderProtocols::Icmp => Transport::Icmp,
            IpNextHeaderProtocols::Tcp => Transport::Tcp,
            IpNextHeaderProtocols::Udp => Transport::Udp,
            _ => Transport::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Summary {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Raw protocol number.
    pub protocol: u8,
    pub transport: Transport,
    /// Source and destination ports, for TCP and UDP.
    pub ports: Option<(u16, u16)>,
    /// TCP payload length, `None` for other protocols.
    pub tcp_payload_length: Option<usize>,
    /// Set when the TCP or UDP header does not fit in the captured bytes.
    pub transport_error: Option<MalformedPacket>,
}

impl Display for Ipv4Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} >> {}  {}", self.source, self.destination, self.transport)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArpSummary {
    pub operation: ArpOperation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

impl Display for ArpSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.operation {
            ArpOperations::Request => {
                write!(f, "who was {} talk to {}", self.target_ip, self.sender_ip)
            }
            ArpOperations::Reply => write!(f, "{} is {}", self.sender_mac, self.sender_ip),
            other => write!(f, "arp operation {} from {}", other.0, self.sender_ip),
        }
    }
}

/// What the classifier learned about a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Ipv4(Ipv4Summary),
    Arp(ArpSummary),
    /// Any other ethertype, not decoded.
    Other(EtherType),
}

impl Display for Classification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Ipv4(summary) => summary.fmt(f),
            Classification::Arp(summary) => summary.fmt(f),
            Classification::Other(ethertype) => write!(f, "ethertype 0x{:04x}", ethertype.0),
        }
    }
}

/// Decodes frames and hands HTTP payloads to a [`HttpDecoder`].
pub struct Classifier<D: HttpDecoder> {
    decoder: D,
}

impl<D: HttpDecoder> Classifier<D> {
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Classify one Ethernet frame.
    pub fn classify(&mut self, frame: &[u8]) -> Result<Classification, MalformedPacket> {
        let ethernet = EthernetPacket::new(frame).ok_or(MalformedPacket::Truncated {
            layer: "Ethernet",
            available: frame.len(),
        })?;
        let payload = frame.get(ETHERNET_HEADER_SIZE..).unwrap_or_default();
        match ethernet.get_ethertype() {
            EtherTypes::Ipv4 => self.classify_ipv4(payload).map(Classification::Ipv4),
            EtherTypes::Arp => classify_arp(payload).map(Classification::Arp),
            other => Ok(Classification::Other(other)),
        }
    }

    fn classify_ipv4(&mut self, packet: &[u8]) -> Result<Ipv4Summary, MalformedPacket> {
        let ip = Ipv4Packet::new(packet).ok_or(MalformedPacket::Truncated {
            layer: "IPv4",
            available: packet.len(),
        })?;
        let header_length = ip.get_header_length() as usize * 4;
        if header_length < Ipv4Packet::minimum_packet_size() {
            return Err(MalformedPacket::InvalidHeaderLength {
                layer: "IPv4",
                length: header_length,
            });
        }
        // Drop the Ethernet padding of short frames when the total length allows it.
        let total_length = ip.get_total_length() as usize;
        let segment = if header_length <= total_length && total_length <= packet.len() {
            &packet[header_length..total_length]
        } else {
            packet
                .get(header_length..)
                .ok_or(MalformedPacket::Truncated {
                    layer: "IPv4 options",
                    available: packet.len(),
                })?
        };

        let protocol = ip.get_next_level_protocol();
        let mut summary = Ipv4Summary {
            source: ip.get_source(),
            destination: ip.get_destination(),
            protocol: protocol.0,
            transport: protocol.into(),
            ports: None,
            tcp_payload_length: None,
            transport_error: None,
        };

        // The summary stands even when the transport header is unusable.
        if let Err(error) = self.decode_transport(&mut summary, segment) {
            debug!("{} >> {} {}", summary.source, summary.destination, error);
            summary.transport_error = Some(error);
        }

        Ok(summary)
    }

    fn decode_transport(
        &mut self,
        summary: &mut Ipv4Summary,
        segment: &[u8],
    ) -> Result<(), MalformedPacket> {
        match summary.transport {
            Transport::Tcp => {
                let tcp = TcpPacket::new(segment).ok_or(MalformedPacket::Truncated {
                    layer: "TCP",
                    available: segment.len(),
                })?;
                // The data offset covers the options, up to 60 bytes.
                let data_offset = tcp.get_data_offset() as usize * 4;
                if data_offset < TcpPacket::minimum_packet_size() {
                    return Err(MalformedPacket::InvalidHeaderLength {
                        layer: "TCP",
                        length: data_offset,
                    });
                }
                let payload = segment.get(data_offset..).ok_or(MalformedPacket::Truncated {
                    layer: "TCP options",
                    available: segment.len(),
                })?;
                let (source, destination) = (tcp.get_source(), tcp.get_destination());
                if destination == HTTP_PORT {
                    self.decoder.decode_request(payload);
                }
                if source == HTTP_PORT {
                    self.decoder.decode_reply(payload);
                }
                summary.ports = Some((source, destination));
                summary.tcp_payload_length = Some(payload.len());
            }
            Transport::Udp => {
                let udp = UdpPacket::new(segment).ok_or(MalformedPacket::Truncated {
                    layer: "UDP",
                    available: segment.len(),
                })?;
                summary.ports = Some((udp.get_source(), udp.get_destination()));
            }
            Transport::Icmp | Transport::Other => {}
        }
        Ok(())
    }
}

fn classify_arp(packet: &[u8]) -> Result<ArpSummary, MalformedPacket> {
    let arp = ArpPacket::new(packet).ok_or(MalformedPacket::Truncated {
        layer: "ARP",
        available: packet.len(),
    })?;
    let (hardware, protocol) = (arp.get_hw_addr_len(), arp.get_proto_addr_len());
    if hardware != 6 || protocol != 4 {
        return Err(MalformedPacket::UnsupportedArp { hardware, protocol });
    }
    Ok(ArpSummary {
        operation: arp.get_operation(),
        sender_mac: arp.get_sender_hw_addr(),
        sender_ip: arp.get_sender_proto_addr(),
        target_ip: arp.get_target_proto_addr(),
    })
}
