//! Netlink route protocol: dump requests and multipart response reassembly.
//!
//! Netlink headers and attributes are encoded in host byte order.
use log::{debug, warn};

use crate::error::NetlinkError;
use crate::neighbors::RouteEntry;

/// Size of `struct nlmsghdr`.
pub const NLMSG_HDRLEN: usize = 16;
/// Size of `struct rtmsg`.
pub const RTMSG_LEN: usize = 12;

pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_GETROUTE: u16 = 26;

pub const NLM_F_REQUEST: u16 = 0x1;
pub const NLM_F_MULTI: u16 = 0x2;
pub const NLM_F_DUMP: u16 = 0x300;

/// Round `length` up to the 4-byte netlink alignment.
pub fn align(length: usize) -> usize {
    (length + 3) & !3
}

pub(crate) fn ne_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_ne_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn ne_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// A `struct nlmsghdr`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NetlinkHeader {
    /// Length of the message, header included.
    pub length: u32,
    pub kind: u16,
    pub flags: u16,
    pub sequence: u32,
    pub pid: u32,
}

impl NetlinkHeader {
    pub fn decode(buffer: &[u8]) -> Result<Self, NetlinkError> {
        if buffer.len() < NLMSG_HDRLEN {
            return Err(NetlinkError::Truncated {
                needed: NLMSG_HDRLEN,
                available: buffer.len(),
            });
        }
        Ok(Self {
            length: ne_u32(buffer, 0),
            kind: ne_u16(buffer, 4),
            flags: ne_u16(buffer, 6),
            sequence: ne_u32(buffer, 8),
            pid: ne_u32(buffer, 12),
        })
    }

    pub fn encode(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.length.to_ne_bytes());
        buffer.extend_from_slice(&self.kind.to_ne_bytes());
        buffer.extend_from_slice(&self.flags.to_ne_bytes());
        buffer.extend_from_slice(&self.sequence.to_ne_bytes());
        buffer.extend_from_slice(&self.pid.to_ne_bytes());
    }

    pub fn is_multipart(&self) -> bool {
        self.flags & NLM_F_MULTI != 0
    }
}

/// Build a request dumping the routes of every address family.
pub fn route_dump_request(sequence: u32, pid: u32) -> Vec<u8> {
    let header = NetlinkHeader {
        length: (NLMSG_HDRLEN + RTMSG_LEN) as u32,
        kind: RTM_GETROUTE,
        flags: NLM_F_REQUEST | NLM_F_DUMP,
        sequence,
        pid,
    };
    let mut buffer = Vec::with_capacity(NLMSG_HDRLEN + RTMSG_LEN);
    header.encode(&mut buffer);
    buffer.resize(NLMSG_HDRLEN + RTMSG_LEN, 0);
    buffer
}

/// One message of a netlink datagram.
#[derive(Copy, Clone, Debug)]
pub struct Message<'a> {
    pub header: NetlinkHeader,
    /// The bytes following the header, up to the message length.
    pub payload: &'a [u8],
    /// The whole message, header included.
    pub raw: &'a [u8],
}

/// Iterator over the messages packed in a buffer.
///
/// Iteration stops after the first invalid message.
pub struct Messages<'a> {
    buffer: &'a [u8],
}

pub fn messages(buffer: &[u8]) -> Messages<'_> {
    Messages { buffer }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<Message<'a>, NetlinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            return None;
        }
        let header = match NetlinkHeader::decode(self.buffer) {
            Ok(header) => header,
            Err(error) => {
                self.buffer = &[];
                return Some(Err(error));
            }
        };
        let length = header.length as usize;
        if length < NLMSG_HDRLEN {
            self.buffer = &[];
            return Some(Err(NetlinkError::InvalidLength(header.length)));
        }
        if length > self.buffer.len() {
            let error = NetlinkError::Truncated {
                needed: length,
                available: self.buffer.len(),
            };
            self.buffer = &[];
            return Some(Err(error));
        }
        let raw = &self.buffer[..length];
        self.buffer = self.buffer.get(align(length)..).unwrap_or(&[]);
        Some(Ok(Message {
            header,
            payload: &raw[NLMSG_HDRLEN..],
            raw,
        }))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// More datagrams are expected.
    Incomplete,
    /// A done record or a non-multipart record was seen.
    Complete,
}

/// Accumulates the datagrams answering one dump request.
///
/// Only messages echoing the request's sequence number and port id are kept;
/// anything else belongs to another exchange and is skipped.
#[derive(Debug)]
pub struct Reassembler {
    sequence: u32,
    pid: u32,
    buffer: Vec<u8>,
    progress: Progress,
}

impl Reassembler {
    pub fn new(sequence: u32, pid: u32) -> Self {
        Self {
            sequence,
            pid,
            buffer: Vec::new(),
            progress: Progress::Incomplete,
        }
    }

    /// Feed one received datagram.
    ///
    /// An invalid message is logged and the rest of its datagram dropped;
    /// what was accumulated so far is kept.
    pub fn push(&mut self, datagram: &[u8]) -> Result<Progress, NetlinkError> {
        if self.progress == Progress::Complete {
            return Ok(Progress::Complete);
        }
        for message in messages(datagram) {
            let message = match message {
                Ok(message) => message,
                Err(error) => {
                    warn!("partial netlink read: {}", error);
                    break;
                }
            };
            let header = message.header;
            if header.sequence != self.sequence || header.pid != self.pid {
                debug!(
                    "skipping netlink message seq={} pid={} (expected seq={} pid={})",
                    header.sequence, header.pid, self.sequence, self.pid
                );
                continue;
            }
            match header.kind {
                NLMSG_DONE => {
                    self.progress = Progress::Complete;
                    return Ok(Progress::Complete);
                }
                NLMSG_ERROR => {
                    // An error message carries a negative errno, zero for an acknowledgement.
                    let errno = message
                        .payload
                        .get(..4)
                        .map(|bytes| ne_u32(bytes, 0) as i32)
                        .unwrap_or(0);
                    if errno != 0 {
                        return Err(NetlinkError::Kernel(-errno));
                    }
                }
                _ => {
                    self.buffer.extend_from_slice(message.raw);
                    self.buffer.resize(align(self.buffer.len()), 0);
                }
            }
            if !header.is_multipart() {
                self.progress = Progress::Complete;
                return Ok(Progress::Complete);
            }
        }
        Ok(Progress::Incomplete)
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// The accumulated messages, each padded to the netlink alignment.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Decode the IPv4 main-table routes accumulated so far.
    pub fn routes(&self) -> Vec<RouteEntry> {
        messages(&self.buffer)
            .filter_map(Result::ok)
            .filter(|message| message.header.kind == RTM_NEWROUTE)
            .filter_map(|message| RouteEntry::from_netlink(message.payload))
            .collect()
    }
}

#[cfg(target_os = "linux")]
pub use socket::NetlinkSocket;

#[cfg(target_os = "linux")]
mod socket {
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use anyhow::{bail, Context, Result};
    use log::trace;

    use super::{route_dump_request, Progress, Reassembler};
    use crate::neighbors::RouteEntry;

    /// Large enough for the page-sized datagrams the kernel sends during dumps.
    const RECEIVE_BUFFER_SIZE: usize = 32768;

    static SEQUENCE: AtomicU32 = AtomicU32::new(1);

    /// A `NETLINK_ROUTE` datagram socket.
    pub struct NetlinkSocket {
        fd: OwnedFd,
        pid: u32,
    }

    impl NetlinkSocket {
        /// Open and bind a route socket; reads fail after `timeout`.
        pub fn open(timeout: Duration) -> Result<Self> {
            // SAFETY: plain socket(2) call, the descriptor is owned right after.
            let raw = unsafe {
                libc::socket(
                    libc::AF_NETLINK,
                    libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                    libc::NETLINK_ROUTE,
                )
            };
            if raw < 0 {
                return Err(io::Error::last_os_error()).context("cannot create netlink socket");
            }
            // SAFETY: `raw` is a freshly created descriptor that nothing else owns.
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let tv = libc::timeval {
                tv_sec: timeout.as_secs() as libc::time_t,
                tv_usec: timeout.subsec_micros() as libc::suseconds_t,
            };
            // SAFETY: `tv` outlives the call and the length matches its type.
            let ret = unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_RCVTIMEO,
                    &tv as *const libc::timeval as *const libc::c_void,
                    mem::size_of::<libc::timeval>() as libc::socklen_t,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error()).context("cannot set netlink timeout");
            }

            // Let the kernel pick the port id, then read it back: replies echo it.
            // SAFETY: sockaddr_nl is plain data, all-zero is a valid value.
            let mut address: libc::sockaddr_nl = unsafe { mem::zeroed() };
            address.nl_family = libc::AF_NETLINK as libc::sa_family_t;
            let mut length = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
            // SAFETY: `address` is a valid sockaddr_nl of `length` bytes.
            let ret = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &address as *const libc::sockaddr_nl as *const libc::sockaddr,
                    length,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error()).context("cannot bind netlink socket");
            }
            // SAFETY: `address` and `length` describe a writable sockaddr_nl.
            let ret = unsafe {
                libc::getsockname(
                    fd.as_raw_fd(),
                    &mut address as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                    &mut length,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error()).context("cannot read netlink port id");
            }

            Ok(Self {
                fd,
                pid: address.nl_pid,
            })
        }

        /// The port id the kernel assigned to this socket.
        pub fn pid(&self) -> u32 {
            self.pid
        }

        fn send(&self, buffer: &[u8]) -> io::Result<()> {
            // SAFETY: the pointer and length come from a live slice.
            let ret = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    buffer.as_ptr() as *const libc::c_void,
                    buffer.len(),
                    0,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
            // SAFETY: the pointer and length come from a live mutable slice.
            let ret = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                    0,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(ret as usize)
        }

        /// Dump the IPv4 routes of the main table.
        pub fn dump_routes(&self) -> Result<Vec<RouteEntry>> {
            let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
            self.send(&route_dump_request(sequence, self.pid))
                .context("cannot send the route dump request")?;

            let mut reassembler = Reassembler::new(sequence, self.pid);
            let mut datagram = vec![0u8; RECEIVE_BUFFER_SIZE];
            loop {
                let length = self
                    .recv(&mut datagram)
                    .context("cannot read the route dump response")?;
                if length == 0 {
                    bail!("netlink socket closed during the route dump");
                }
                trace!("netlink datagram of {} bytes", length);
                if reassembler.push(&datagram[..length])? == Progress::Complete {
                    break;
                }
            }
            Ok(reassembler.routes())
        }
    }
}
