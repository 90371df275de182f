//! Bounded-time capture of echo replies.
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::trace;
use pcap::{Active, Capture, Direction};
use pnet::packet::ethernet::EthernetPacket;
use pnet::util::MacAddr;

pub struct EchoReceiver {
    cap: Capture<Active>,
}

impl EchoReceiver {
    pub fn new(interface: &str) -> Result<Self> {
        // Not promiscuous: replies addressed to us are all we need.
        // The short pcap timeout lets `next_reply_source` check its own deadline.
        let cap = pcap::Capture::from_device(interface)?
            .promisc(false)
            .snaplen(65536)
            .timeout(50)
            .immediate_mode(true)
            .open()
            .with_context(|| format!("Cannot open capture on {interface}"))?;
        cap.direction(Direction::In)?;
        Ok(Self { cap })
    }

    /// Only deliver echo replies sent by `source`.
    ///
    /// Must be called before the probe is sent, otherwise the reply may be missed.
    pub fn expect_reply_from(&mut self, source: Ipv4Addr) -> Result<()> {
        self.cap
            .filter(
                &format!("icmp and icmp[icmptype] = icmp-echoreply and src host {source}"),
                true,
            )
            .context("Cannot install echo reply filter")?;
        Ok(())
    }

    /// Wait for the next echo reply and return its Ethernet source address.
    ///
    /// Returns `Ok(None)` if nothing arrives within `timeout`. The deadline is
    /// enforced by polling with the short pcap timeout, since pcap's own timeout
    /// only starts after a first packet on some platforms.
    pub fn next_reply_source(&mut self, timeout: Duration) -> Result<Option<MacAddr>> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            match self.cap.next_packet() {
                Ok(packet) => {
                    let ethernet = EthernetPacket::new(packet.data)
                        .context("Cannot build Ethernet header")?;
                    trace!("echo_reply src_mac={}", ethernet.get_source());
                    return Ok(Some(ethernet.get_source()));
                }
                Err(pcap::Error::TimeoutExpired) | Err(pcap::Error::NoMorePackets) => {
                    if start.elapsed() >= timeout {
                        return Ok(None);
                    }
                    std::thread::sleep(poll_interval);
                }
                Err(error) => return Err(anyhow!(error)),
            }
        }
    }
}
