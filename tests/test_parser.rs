use std::net::Ipv4Addr;

use onpath::http::HttpDecoder;
use onpath::parser::{Classification, Classifier, Transport};
use onpath::MalformedPacket;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherType, EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::udp::MutableUdpPacket;
use pnet::util::MacAddr;

const SOURCE_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x03);
const DESTINATION_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x02);

/// Records the payloads it is given.
#[derive(Default)]
struct RecordingDecoder {
    requests: Vec<Vec<u8>>,
    replies: Vec<Vec<u8>>,
}

impl HttpDecoder for RecordingDecoder {
    fn decode_request(&mut self, payload: &[u8]) {
        self.requests.push(payload.to_vec());
    }

    fn decode_reply(&mut self, payload: &[u8]) {
        self.replies.push(payload.to_vec());
    }
}

fn ethernet(ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; 14 + payload.len()];
    let mut packet = MutableEthernetPacket::new(&mut buffer).unwrap();
    packet.set_destination(DESTINATION_MAC);
    packet.set_source(SOURCE_MAC);
    packet.set_ethertype(ethertype);
    buffer[14..].copy_from_slice(payload);
    buffer
}

fn ipv4(protocol: IpNextHeaderProtocol, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; 20 + payload.len()];
    let mut packet = MutableIpv4Packet::new(&mut buffer).unwrap();
    packet.set_version(4);
    packet.set_header_length(5);
    packet.set_total_length((20 + payload.len()) as u16);
    packet.set_ttl(64);
    packet.set_next_level_protocol(protocol);
    packet.set_source(Ipv4Addr::new(192, 168, 1, 3));
    packet.set_destination(Ipv4Addr::new(93, 184, 216, 34));
    buffer[20..].copy_from_slice(payload);
    buffer
}

fn tcp(source: u16, destination: u16, payload: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; 20 + payload.len()];
    let mut packet = MutableTcpPacket::new(&mut buffer).unwrap();
    packet.set_source(source);
    packet.set_destination(destination);
    packet.set_data_offset(5);
    buffer[20..].copy_from_slice(payload);
    buffer
}

fn arp_request() -> Vec<u8> {
    let mut buffer = vec![0u8; 28];
    let mut packet = MutableArpPacket::new(&mut buffer).unwrap();
    packet.set_hardware_type(ArpHardwareTypes::Ethernet);
    packet.set_protocol_type(EtherTypes::Ipv4);
    packet.set_hw_addr_len(6);
    packet.set_proto_addr_len(4);
    packet.set_operation(ArpOperations::Request);
    packet.set_sender_hw_addr(SOURCE_MAC);
    packet.set_sender_proto_addr(Ipv4Addr::new(192, 168, 1, 3));
    packet.set_target_hw_addr(MacAddr::zero());
    packet.set_target_proto_addr(Ipv4Addr::new(192, 168, 1, 1));
    buffer
}

fn classifier() -> Classifier<RecordingDecoder> {
    Classifier::new(RecordingDecoder::default())
}

#[test]
fn test_arp_request() {
    let frame = ethernet(EtherTypes::Arp, &arp_request());
    let classification = classifier().classify(&frame).unwrap();
    assert_eq!(
        classification.to_string(),
        "who was 192.168.1.1 talk to 192.168.1.3"
    );
}

#[test]
fn test_arp_reply() {
    let mut arp = arp_request();
    MutableArpPacket::new(&mut arp)
        .unwrap()
        .set_operation(ArpOperations::Reply);
    let frame = ethernet(EtherTypes::Arp, &arp);
    let classification = classifier().classify(&frame).unwrap();
    assert_eq!(classification.to_string(), "02:00:00:00:00:03 is 192.168.1.3");
}

#[test]
fn test_arp_truncated_after_header() {
    // Nothing follows the 28 bytes of the ARP header, not even padding.
    let frame = ethernet(EtherTypes::Arp, &arp_request());
    assert_eq!(frame.len(), 14 + 28);
    assert!(matches!(
        classifier().classify(&frame),
        Ok(Classification::Arp(_))
    ));

    let frame = ethernet(EtherTypes::Arp, &arp_request()[..27]);
    assert_eq!(
        classifier().classify(&frame),
        Err(MalformedPacket::Truncated {
            layer: "ARP",
            available: 27
        })
    );
}

#[test]
fn test_unsupported_arp() {
    let mut arp = arp_request();
    MutableArpPacket::new(&mut arp)
        .unwrap()
        .set_hw_addr_len(8);
    let frame = ethernet(EtherTypes::Arp, &arp);
    assert_eq!(
        classifier().classify(&frame),
        Err(MalformedPacket::UnsupportedArp {
            hardware: 8,
            protocol: 4
        })
    );
}

#[test]
fn test_http_request() {
    let payload = b"GET / HTTP/1.1\r\nHost: example.org\r\n\r\n";
    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Tcp, &tcp(51234, 80, payload)),
    );
    let mut classifier = classifier();
    let classification = classifier.classify(&frame).unwrap();
    assert_eq!(
        classification.to_string(),
        "192.168.1.3 >> 93.184.216.34  TCP"
    );
    assert_eq!(classifier.decoder().requests, vec![payload.to_vec()]);
    assert!(classifier.decoder().replies.is_empty());
}

#[test]
fn test_http_reply() {
    let payload = b"HTTP/1.1 200 OK\r\n\r\n";
    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Tcp, &tcp(80, 51234, payload)),
    );
    let mut classifier = classifier();
    classifier.classify(&frame).unwrap();
    assert!(classifier.decoder().requests.is_empty());
    assert_eq!(classifier.decoder().replies, vec![payload.to_vec()]);
}

#[test]
fn test_other_ports_are_not_decoded() {
    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Tcp, &tcp(51234, 443, b"\x16\x03\x01")),
    );
    let mut classifier = classifier();
    match classifier.classify(&frame).unwrap() {
        Classification::Ipv4(summary) => {
            assert_eq!(summary.transport, Transport::Tcp);
            assert_eq!(summary.ports, Some((51234, 443)));
            assert_eq!(summary.tcp_payload_length, Some(3));
        }
        other => panic!("unexpected classification: {other:?}"),
    }
    assert!(classifier.decoder().requests.is_empty());
    assert!(classifier.decoder().replies.is_empty());
}

#[test]
fn test_tcp_options_are_skipped() {
    let payload = b"GET / HTTP/1.0\r\n\r\n";
    let mut segment = tcp(51234, 80, &[&[1u8; 12][..], &payload[..]].concat());
    MutableTcpPacket::new(&mut segment)
        .unwrap()
        .set_data_offset(8);
    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Tcp, &segment),
    );
    let mut classifier = classifier();
    classifier.classify(&frame).unwrap();
    assert_eq!(classifier.decoder().requests, vec![payload.to_vec()]);
}

#[test]
fn test_ethernet_padding_is_ignored() {
    let mut frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Tcp, &tcp(51234, 80, b"")),
    );
    frame.resize(60, 0);
    let mut classifier = classifier();
    classifier.classify(&frame).unwrap();
    assert_eq!(classifier.decoder().requests, vec![Vec::<u8>::new()]);
}

#[test]
fn test_udp_and_icmp() {
    let mut udp = vec![0u8; 8];
    let mut packet = MutableUdpPacket::new(&mut udp).unwrap();
    packet.set_source(5353);
    packet.set_destination(53);
    packet.set_length(8);
    let frame = ethernet(EtherTypes::Ipv4, &ipv4(IpNextHeaderProtocols::Udp, &udp));
    let classification = classifier().classify(&frame).unwrap();
    assert_eq!(
        classification.to_string(),
        "192.168.1.3 >> 93.184.216.34  UDP"
    );

    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Icmp, &[8, 0, 0, 0, 0, 1, 0, 1]),
    );
    let classification = classifier().classify(&frame).unwrap();
    assert_eq!(
        classification.to_string(),
        "192.168.1.3 >> 93.184.216.34  ICMP"
    );
}

#[test]
fn test_truncated_tcp() {
    let segment = tcp(51234, 80, b"");
    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Tcp, &segment[..12]),
    );
    let mut classifier = classifier();
    let classification = classifier.classify(&frame).unwrap();
    // The IPv4 line is logged even though the TCP header is cut short.
    assert_eq!(
        classification.to_string(),
        "192.168.1.3 >> 93.184.216.34  TCP"
    );
    match classification {
        Classification::Ipv4(summary) => {
            assert_eq!(summary.ports, None);
            assert_eq!(summary.tcp_payload_length, None);
            assert_eq!(
                summary.transport_error,
                Some(MalformedPacket::Truncated {
                    layer: "TCP",
                    available: 12
                })
            );
        }
        other => panic!("unexpected classification: {other:?}"),
    }
    assert!(classifier.decoder().requests.is_empty());
}

#[test]
fn test_truncated_udp() {
    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Udp, &[0x14, 0xe9, 0x00]),
    );
    match classifier().classify(&frame).unwrap() {
        Classification::Ipv4(summary) => {
            assert_eq!(summary.to_string(), "192.168.1.3 >> 93.184.216.34  UDP");
            assert_eq!(summary.ports, None);
            assert_eq!(
                summary.transport_error,
                Some(MalformedPacket::Truncated {
                    layer: "UDP",
                    available: 3
                })
            );
        }
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_invalid_header_lengths() {
    let mut packet = ipv4(IpNextHeaderProtocols::Tcp, &tcp(51234, 80, b""));
    MutableIpv4Packet::new(&mut packet)
        .unwrap()
        .set_header_length(2);
    let frame = ethernet(EtherTypes::Ipv4, &packet);
    assert_eq!(
        classifier().classify(&frame),
        Err(MalformedPacket::InvalidHeaderLength {
            layer: "IPv4",
            length: 8
        })
    );

    let mut segment = tcp(51234, 80, b"");
    MutableTcpPacket::new(&mut segment)
        .unwrap()
        .set_data_offset(15);
    let frame = ethernet(
        EtherTypes::Ipv4,
        &ipv4(IpNextHeaderProtocols::Tcp, &segment),
    );
    let mut classifier = classifier();
    match classifier.classify(&frame).unwrap() {
        Classification::Ipv4(summary) => assert_eq!(
            summary.transport_error,
            Some(MalformedPacket::Truncated {
                layer: "TCP options",
                available: 20
            })
        ),
        other => panic!("unexpected classification: {other:?}"),
    }
    assert!(classifier.decoder().requests.is_empty());
}

#[test]
fn test_short_frames() {
    assert_eq!(
        classifier().classify(&[0u8; 10]),
        Err(MalformedPacket::Truncated {
            layer: "Ethernet",
            available: 10
        })
    );
    let frame = ethernet(EtherTypes::Ipv4, &[0x45, 0, 0]);
    assert_eq!(
        classifier().classify(&frame),
        Err(MalformedPacket::Truncated {
            layer: "IPv4",
            available: 3
        })
    );
}

#[test]
fn test_other_ethertype() {
    let frame = ethernet(EtherTypes::Ipv6, &[0u8; 40]);
    assert_eq!(
        classifier().classify(&frame),
        Ok(Classification::Other(EtherTypes::Ipv6))
    );
}
