//! Intercept and relay the traffic between a target and its gateway.
//!
//! The target (and optionally the gateway) must already send its frames to
//! this host, e.g. because their ARP caches were poisoned.
use std::net::Ipv4Addr;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use onpath::easy::{intercept_session, resolve_session, Config};
use onpath::models::ManualAddresses;
use onpath::utilities::{configure_logger, exit_process_on_panic, get_default_interface};
use onpath::CancellationToken;
use pnet::util::MacAddr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface on which to capture the traffic.
    #[arg(short = 'i', long, default_value_t = get_default_interface())]
    interface: String,
    /// Interface on which to relay the traffic (the capture interface by default).
    #[arg(long)]
    relay_interface: Option<String>,
    /// Address of the intercepted host.
    #[arg(short = 't', long)]
    target: Ipv4Addr,
    /// Extra pcap filter applied to both directions.
    #[arg(short = 'f', long)]
    filter: Option<String>,
    /// Log the resolved addresses and default the log level to debug.
    #[arg(short = 'd', long, default_value_t = false)]
    debug: bool,
    /// Minimum log level.
    #[arg(short = 'L', long)]
    log_level: Option<LevelFilter>,
    /// Do not resolve the addresses, use the ones given below.
    #[arg(long, default_value_t = false, requires_all = ["netmask", "gateway_ip", "gateway_mac", "attacker_ip", "attacker_mac", "target_mac"])]
    manual: bool,
    #[arg(long)]
    netmask: Option<Ipv4Addr>,
    #[arg(long)]
    gateway_ip: Option<Ipv4Addr>,
    #[arg(long)]
    gateway_mac: Option<MacAddr>,
    #[arg(long)]
    attacker_ip: Option<Ipv4Addr>,
    #[arg(long)]
    attacker_mac: Option<MacAddr>,
    #[arg(long)]
    target_mac: Option<MacAddr>,
    /// Time in milliseconds to wait for the echo reply of the gateway.
    #[arg(long, default_value_t = 2000)]
    gateway_timeout: u64,
    /// Time in milliseconds to wait for the echo reply of the target.
    #[arg(long, default_value_t = 1000)]
    target_timeout: u64,
    /// Address probed through the gateway if the gateway does not answer.
    #[arg(long, default_value_t = Ipv4Addr::new(8, 8, 8, 8))]
    fallback_address: Ipv4Addr,
    /// Interval in seconds between two statistics lines.
    #[arg(long, default_value_t = 5)]
    statistics_interval: u64,
}

impl Args {
    fn manual_addresses(&self) -> Result<Option<ManualAddresses>> {
        if !self.manual {
            return Ok(None);
        }
        Ok(Some(ManualAddresses {
            netmask: self.netmask.context("--netmask is required")?,
            gateway_ip: self.gateway_ip.context("--gateway-ip is required")?,
            gateway_mac: self.gateway_mac.context("--gateway-mac is required")?,
            attacker_ip: self.attacker_ip.context("--attacker-ip is required")?,
            attacker_mac: self.attacker_mac.context("--attacker-mac is required")?,
            target_mac: self.target_mac.context("--target-mac is required")?,
        }))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    configure_logger(args.log_level.unwrap_or(default_level));
    exit_process_on_panic();

    let config = Config {
        manual: args.manual_addresses()?,
        interface: args.interface,
        relay_interface: args.relay_interface,
        target: args.target,
        filter: args.filter,
        debug: args.debug,
        gateway_timeout: Duration::from_millis(args.gateway_timeout),
        target_timeout: Duration::from_millis(args.target_timeout),
        fallback_address: args.fallback_address,
        statistics_interval: Duration::from_secs(args.statistics_interval),
    };
    info!("{}", config);

    let session = match resolve_session(&config) {
        Ok(session) => session,
        Err(error) => {
            error!("{}", error);
            process::exit(error.exit_code());
        }
    };

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("Cannot set Ctrl-C handler")?;
    info!("Relaying, press CTRL+C to stop...");

    let (target_statistics, gateway_statistics) = intercept_session(&config, session, token)?;
    info!("side=target {}", target_statistics);
    info!("side=gateway {}", gateway_statistics);
    Ok(())
}
