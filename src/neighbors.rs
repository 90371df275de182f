//! Query the kernel routing table.
//!
//! # Examples
//!
//! ```no_run
//! use anyhow::{Context, Result};
//! use onpath::neighbors::RoutingTable;
//!
//! fn main() -> Result<()> {
//!     let table = RoutingTable::from_native()?;
//!     let route = table.default_route().context("no default route")?;
//!     println!("default via {} dev {}", route.gateway, route.interface);
//!     Ok(())
//! }
//! ```
pub mod netlink;
mod route;

#[cfg(target_os = "linux")]
pub use netlink::NetlinkSocket;
pub use netlink::{Progress, Reassembler};
pub use route::*;

use anyhow::Result;
use std::net::Ipv4Addr;

/// Return the gateway of the default route, if there is one.
pub fn default_gateway() -> Result<Option<Ipv4Addr>> {
    let table = RoutingTable::from_native()?;
    Ok(table.default_route().map(|route| route.gateway))
}
