//! Capture, classify and relay the frames of one direction.
//!
//! Two loops run per session: the target-facing loop sees what the target
//! sends (believing we are the gateway), the gateway-facing loop sees what the
//! gateway sends to the target. Each loop owns its capture and injection
//! handles on its own thread.
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use log::{debug, error, info, trace};
use pcap::{Active, Capture, Direction, Stat};
use strum::Display as StrumDisplay;

use crate::error::CaptureError;
use crate::http::{HttpDecoder, HttpLogger};
use crate::models::Session;
use crate::parser::{Classification, Classifier};
use crate::relay::{Injector, Relay, Relayed};
use crate::utilities::lock;

/// Maximum number of bytes captured per frame.
pub const SNAPLEN: i32 = 65536;

/// Read timeout of the capture, in milliseconds; bounds the cancellation latency.
pub const READ_TIMEOUT_MS: i32 = 100;

/// Cooperative stop signal shared by the loops.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The peer whose frames a loop captures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum Side {
    Target,
    Gateway,
}

/// A stream of captured Ethernet frames.
pub trait FrameSource {
    /// Wait for the next frame.
    ///
    /// Returns `Ok(None)` when the read timeout expired without a frame, so
    /// that the caller can check for cancellation.
    fn next_frame(&mut self) -> Result<Option<&[u8]>>;

    /// Counters maintained by the capture backend, if any.
    fn capture_statistics(&mut self) -> Option<Stat> {
        None
    }
}

impl FrameSource for Capture<Active> {
    fn next_frame(&mut self) -> Result<Option<&[u8]>> {
        match self.next_packet() {
            Ok(packet) => Ok(Some(packet.data)),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn capture_statistics(&mut self) -> Option<Stat> {
        self.stats().ok()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayStatistics {
    /// Number of packets received by the capture.
    pub pcap_received: u32,
    /// Number of packets dropped because there was no room in the operating system's buffer when
    /// they arrived, because packets weren't being read fast enough.
    pub pcap_dropped: u32,
    /// Number of packets dropped by the network interface or its driver.
    pub pcap_if_dropped: u32,
    pub received: u64,
    pub classified: u64,
    pub malformed: u64,
    pub relayed: u64,
    pub relay_failures: u64,
}

impl Display for RelayStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "pcap_received={}", self.pcap_received)?;
        write!(f, " pcap_dropped={}", self.pcap_dropped)?;
        write!(f, " pcap_interface_dropped={}", self.pcap_if_dropped)?;
        write!(f, " frames_received={}", self.received)?;
        write!(f, " frames_classified={}", self.classified)?;
        write!(f, " frames_malformed={}", self.malformed)?;
        write!(f, " frames_relayed={}", self.relayed)?;
        write!(f, " relay_failures={}", self.relay_failures)
    }
}

/// Per-frame work of a loop: classification then relay.
pub struct FramePipeline<D: HttpDecoder, I: Injector> {
    side: Side,
    classifier: Classifier<D>,
    relay: Relay<I>,
    statistics: Arc<Mutex<RelayStatistics>>,
}

impl<D: HttpDecoder, I: Injector> FramePipeline<D, I> {
    pub fn new(side: Side, decoder: D, injector: I) -> Self {
        Self {
            side,
            classifier: Classifier::new(decoder),
            relay: Relay::new(injector),
            statistics: Arc::new(Mutex::new(RelayStatistics::default())),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn classifier(&self) -> &Classifier<D> {
        &self.classifier
    }

    pub fn relay(&self) -> &Relay<I> {
        &self.relay
    }

    pub fn statistics(&self) -> &Arc<Mutex<RelayStatistics>> {
        &self.statistics
    }

    /// Classify `frame`, then relay it whatever the outcome of the classification.
    pub fn process(&mut self, frame: &[u8]) {
        let classified = match self.classifier.classify(frame) {
            Ok(classification @ Classification::Other(_)) => {
                debug!("{}", classification);
                true
            }
            Ok(classification) => {
                info!("{}", classification);
                true
            }
            Err(error) => {
                debug!("side={} malformed frame: {}", self.side, error);
                false
            }
        };
        let relayed = self.relay.relay(frame);

        let mut statistics = lock(&self.statistics);
        statistics.received += 1;
        if classified {
            statistics.classified += 1;
        } else {
            statistics.malformed += 1;
        }
        match relayed {
            Ok(Relayed::Sent) => statistics.relayed += 1,
            Ok(Relayed::Dropped) => {}
            Err(error) => {
                debug!("side={} {}", self.side, error);
                statistics.relay_failures += 1;
            }
        }
    }
}

/// Feed every frame of `source` through `pipeline` until `token` is cancelled.
///
/// Returns early only on a capture error.
pub fn run<S, D, I>(
    source: &mut S,
    pipeline: &mut FramePipeline<D, I>,
    token: &CancellationToken,
) -> Result<()>
where
    S: FrameSource + ?Sized,
    D: HttpDecoder,
    I: Injector,
{
    while !token.is_cancelled() {
        if let Some(frame) = source.next_frame()? {
            trace!("side={} frame len={}", pipeline.side, frame.len());
            pipeline.process(frame);
        }
        if let Some(stat) = source.capture_statistics() {
            let mut statistics = lock(&pipeline.statistics);
            statistics.pcap_received = stat.received;
            statistics.pcap_dropped = stat.dropped;
            statistics.pcap_if_dropped = stat.if_dropped;
        }
    }
    Ok(())
}

/// Filter expression installed on the capture of `side`.
pub fn capture_filter(session: &Session, side: Side) -> String {
    let mut filter = match side {
        Side::Target => format!("ether src {}", session.target_mac),
        Side::Gateway => format!(
            "ether src {} and dst host {}",
            session.gateway_mac, session.target_ip
        ),
    };
    if let Some(extra) = &session.filter {
        filter.push_str(&format!(" and ({extra})"));
    }
    // Excludes frames this host originates. Relayed frames keep the peer's
    // source MAC, so only the inbound direction set in `open_capture` keeps
    // them out of the capture.
    filter.push_str(&format!(" and not ether src {}", session.attacker_mac));
    filter
}

/// Open a promiscuous inbound capture on `device` with `filter` installed.
pub fn open_capture(device: &str, filter: &str) -> Result<Capture<Active>, CaptureError> {
    let open_error = |source| CaptureError::Open {
        device: device.to_string(),
        source,
    };
    let mut cap = Capture::from_device(device)
        .map_err(open_error)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .immediate_mode(true)
        .open()
        .map_err(open_error)?;
    // Injected frames are outbound: this is what prevents relaying them again.
    cap.direction(Direction::In).map_err(open_error)?;
    cap.filter(filter, true)
        .map_err(|source| CaptureError::Filter {
            device: device.to_string(),
            filter: filter.to_string(),
            source,
        })?;
    Ok(cap)
}

/// Open a handle used only to inject frames on `device`.
pub fn open_injector(device: &str) -> Result<Capture<Active>, CaptureError> {
    let open_error = |source| CaptureError::Open {
        device: device.to_string(),
        source,
    };
    Capture::from_device(device)
        .map_err(open_error)?
        .open()
        .map_err(open_error)
}

// The pcap crate doesn't support `pcap_loop` and `pcap_breakloop`,
// so the loop polls the cancellation token between reads.
pub struct CaptureLoop {
    side: Side,
    handle: JoinHandle<Result<()>>,
    statistics: Arc<Mutex<RelayStatistics>>,
}

impl CaptureLoop {
    /// Open the capture of `side` on the session device and start relaying to `relay_device`.
    ///
    /// Nothing is spawned if the capture or the filter cannot be set up.
    pub fn start(
        session: Arc<Session>,
        side: Side,
        relay_device: &str,
        token: CancellationToken,
    ) -> Result<Self, CaptureError> {
        let filter = capture_filter(&session, side);
        debug!("side={} device={} filter={:?}", side, session.device, filter);
        let source = open_capture(&session.device, &filter)?;
        let injector = open_injector(relay_device)?;
        let pipeline = FramePipeline::new(side, HttpLogger, injector);
        Self::spawn(source, pipeline, token)
    }

    /// Run `pipeline` over `source` on a new thread.
    pub fn spawn<S, D, I>(
        mut source: S,
        mut pipeline: FramePipeline<D, I>,
        token: CancellationToken,
    ) -> Result<Self, CaptureError>
    where
        S: FrameSource + Send + 'static,
        D: HttpDecoder + Send + 'static,
        I: Injector + Send + 'static,
    {
        let side = pipeline.side();
        let statistics = pipeline.statistics().clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{side}"))
            .spawn(move || {
                let result = run(&mut source, &mut pipeline, &token);
                match &result {
                    Ok(()) => debug!("side={} capture loop stopped", side),
                    Err(error) => error!("side={} capture loop failed: {:#}", side, error),
                }
                result
            })
            .map_err(CaptureError::Spawn)?;
        Ok(Self {
            side,
            handle,
            statistics,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn statistics(&self) -> &Arc<Mutex<RelayStatistics>> {
        &self.statistics
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop thread and return its outcome.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| anyhow!("{} capture loop panicked", self.side))?
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use pnet::util::MacAddr;

    use super::*;

    fn session() -> Session {
        Session {
            device: "eth0".to_string(),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            network: Ipv4Addr::new(192, 168, 1, 0),
            gateway_ip: Ipv4Addr::new(192, 168, 1, 1),
            gateway_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x01),
            attacker_ip: Ipv4Addr::new(192, 168, 1, 2),
            attacker_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x02),
            target_ip: Ipv4Addr::new(192, 168, 1, 3),
            target_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x03),
            filter: None,
        }
    }

    #[test]
    fn test_capture_filter() {
        let session = session();
        assert_eq!(
            capture_filter(&session, Side::Target),
            "ether src 02:00:00:00:00:03 and not ether src 02:00:00:00:00:02"
        );
        assert_eq!(
            capture_filter(&session, Side::Gateway),
            "ether src 02:00:00:00:00:01 and dst host 192.168.1.3 and not ether src 02:00:00:00:00:02"
        );
        let session = session.with_filter(Some("tcp port 80".to_string()));
        assert_eq!(
            capture_filter(&session, Side::Target),
            "ether src 02:00:00:00:00:03 and (tcp port 80) and not ether src 02:00:00:00:00:02"
        );
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Target.to_string(), "target");
        assert_eq!(Side::Gateway.to_string(), "gateway");
    }
}
