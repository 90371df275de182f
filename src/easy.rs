//! High-level interface for intercepting the traffic of a target.
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use onpath::easy::{intercept, Config};
//! use onpath::CancellationToken;
//!
//! let config = Config {
//!     target: Ipv4Addr::new(192, 168, 1, 42),
//!     ..Config::default()
//! };
//! let token = CancellationToken::new();
//! let (target_statistics, gateway_statistics) = intercept(&config, token).unwrap();
//!
//! println!("{} {}", target_statistics, gateway_statistics);
//! ```
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};

use crate::capture_loop::{CancellationToken, CaptureLoop, RelayStatistics, Side};
use crate::error::ResolveError;
use crate::logger::StatisticsLogger;
use crate::models::{ManualAddresses, Session};
use crate::resolver::{resolve, ResolverOptions};
use crate::utilities::{get_default_interface, lock};

/// Resolve the session described by `config`, then relay until `token` is cancelled.
///
/// Returns the final statistics of the target-facing and gateway-facing loops.
pub fn intercept(
    config: &Config,
    token: CancellationToken,
) -> Result<(RelayStatistics, RelayStatistics)> {
    info!("{}", config);
    let session = resolve_session(config)?;
    intercept_session(config, session, token)
}

/// Resolve the addresses of the session, or take them from `config.manual`.
pub fn resolve_session(config: &Config) -> Result<Session, ResolveError> {
    let session = match &config.manual {
        Some(addresses) => Session::manual(&config.interface, config.target, addresses),
        None => resolve(&config.interface, config.target, config.resolver_options())?,
    };
    Ok(session.with_filter(config.filter.clone()))
}

/// Run both capture loops over an already resolved session.
///
/// Returns when `token` is cancelled or when both loops have stopped.
pub fn intercept_session(
    config: &Config,
    session: Session,
    token: CancellationToken,
) -> Result<(RelayStatistics, RelayStatistics)> {
    info!("{}", session);
    let session = Arc::new(session);
    let relay_device = config
        .relay_interface
        .clone()
        .unwrap_or_else(|| session.device.clone());

    let target_loop = CaptureLoop::start(
        session.clone(),
        Side::Target,
        &relay_device,
        token.clone(),
    )?;
    let gateway_loop = match CaptureLoop::start(
        session.clone(),
        Side::Gateway,
        &relay_device,
        token.clone(),
    ) {
        Ok(gateway_loop) => gateway_loop,
        Err(error) => {
            token.cancel();
            let _ = target_loop.join();
            return Err(error.into());
        }
    };

    let target_statistics = target_loop.statistics().clone();
    let gateway_statistics = gateway_loop.statistics().clone();
    let logger = StatisticsLogger::new(
        vec![
            (Side::Target, target_statistics.clone()),
            (Side::Gateway, gateway_statistics.clone()),
        ],
        config.statistics_interval,
    );

    let refresh = Duration::from_millis(100);
    while !token.is_cancelled() && !(target_loop.is_finished() && gateway_loop.is_finished()) {
        sleep(refresh);
    }
    info!("Stopping the capture loops...");
    token.cancel();

    // Loop failures are already logged by the loops themselves.
    for capture_loop in [target_loop, gateway_loop] {
        let side = capture_loop.side();
        if let Err(error) = capture_loop.join() {
            error!("side={} {:#}", side, error);
        }
    }
    logger.stop();

    let final_target_statistics = lock(&target_statistics).clone();
    let final_gateway_statistics = lock(&gateway_statistics).clone();
    Ok((final_target_statistics, final_gateway_statistics))
}

/// Interception configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Interface on which the target and the gateway are captured.
    pub interface: String,
    /// Interface on which frames are relayed (the capture interface by default).
    pub relay_interface: Option<String>,
    /// Address of the intercepted host.
    pub target: Ipv4Addr,
    /// Skip the resolution and use these addresses.
    pub manual: Option<ManualAddresses>,
    /// Extra pcap filter expression applied to both loops.
    pub filter: Option<String>,
    /// Log the resolved addresses at info level.
    pub debug: bool,
    /// Time to wait for the echo reply of the gateway (and of the fallback address).
    pub gateway_timeout: Duration,
    /// Time to wait for the echo reply of the target.
    pub target_timeout: Duration,
    /// Address probed through the gateway when the gateway does not answer.
    pub fallback_address: Ipv4Addr,
    /// Interval between two statistics log lines.
    pub statistics_interval: Duration,
}

impl Config {
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            gateway_timeout: self.gateway_timeout,
            target_timeout: self.target_timeout,
            fallback_address: self.fallback_address,
            debug: self.debug,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let resolver = ResolverOptions::default();
        Config {
            interface: get_default_interface(),
            relay_interface: None,
            target: Ipv4Addr::UNSPECIFIED,
            manual: None,
            filter: None,
            debug: false,
            gateway_timeout: resolver.gateway_timeout,
            target_timeout: resolver.target_timeout,
            fallback_address: resolver.fallback_address,
            statistics_interval: Duration::from_secs(5),
        }
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "interface={:?}", self.interface)?;
        write!(f, " relay_interface={:?}", self.relay_interface)?;
        write!(f, " target={}", self.target)?;
        write!(f, " manual={}", self.manual.is_some())?;
        write!(f, " filter={:?}", self.filter)?;
        write!(f, " debug={:?}", self.debug)?;
        write!(f, " gateway_timeout={:?}", self.gateway_timeout)?;
        write!(f, " target_timeout={:?}", self.target_timeout)?;
        write!(f, " fallback_address={}", self.fallback_address)?;
        write!(f, " statistics_interval={:?}", self.statistics_interval)
    }
}

#[cfg(test)]
mod tests {
    use pnet::util::MacAddr;

    use super::*;

    #[test]
    fn test_resolve_session_manual() {
        let addresses = ManualAddresses {
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway_ip: Ipv4Addr::new(10, 0, 0, 1),
            gateway_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x01),
            attacker_ip: Ipv4Addr::new(10, 0, 0, 2),
            attacker_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x02),
            target_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x03),
        };
        let config = Config {
            interface: "eth0".to_string(),
            target: Ipv4Addr::new(10, 0, 0, 3),
            manual: Some(addresses),
            filter: Some("tcp".to_string()),
            ..Config::default()
        };
        let session = resolve_session(&config).unwrap();
        assert_eq!(session.device, "eth0");
        assert_eq!(session.network, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(session.target_ip, Ipv4Addr::new(10, 0, 0, 3));
        assert_eq!(session.target_mac, MacAddr::new(0x02, 0, 0, 0, 0, 0x03));
        assert_eq!(session.filter.as_deref(), Some("tcp"));
    }

    #[test]
    fn test_config_display() {
        let config = Config {
            interface: "eth0".to_string(),
            ..Config::default()
        };
        let line = config.to_string();
        assert!(line.starts_with("interface=\"eth0\" relay_interface=None"));
        assert!(line.contains(" fallback_address=8.8.8.8"));
    }
}
