//! Host interface boundary.
//!
//! The virtual switch pairs every front-panel port with a tap device and
//! moves frames between them through two filter pipelines. This module
//! models just what the MACsec code touches: the tap descriptor, the two
//! pipelines, and the promiscuous-mode switch for a link.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockType};
use tracing::{debug, info};

use crate::error::{MacsecError, MacsecResult};
use crate::traffic_filter::{FilterPriority, TrafficFilter, TrafficFilterPipes};

/// Tap device and filter hook points of one host interface.
#[derive(Debug)]
pub struct HostInterfaceInfo {
    name: String,
    tap: Arc<OwnedFd>,
    eth2tap: TrafficFilterPipes,
    tap2eth: TrafficFilterPipes,
}

impl HostInterfaceInfo {
    /// Wraps an already open tap descriptor.
    pub fn new(name: impl Into<String>, tap: OwnedFd) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tap: Arc::new(tap),
            eth2tap: TrafficFilterPipes::new(),
            tap2eth: TrafficFilterPipes::new(),
        })
    }

    /// Host interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the tap descriptor.
    pub fn tap(&self) -> Arc<OwnedFd> {
        Arc::clone(&self.tap)
    }

    /// Raw tap descriptor.
    pub fn tap_fd(&self) -> RawFd {
        self.tap.as_raw_fd()
    }

    /// Pipeline for frames travelling physical -> tap.
    pub fn eth2tap(&self) -> &TrafficFilterPipes {
        &self.eth2tap
    }

    /// Pipeline for frames travelling tap -> physical.
    pub fn tap2eth(&self) -> &TrafficFilterPipes {
        &self.tap2eth
    }

    pub fn install_eth2tap_filter(
        &self,
        priority: FilterPriority,
        filter: Arc<dyn TrafficFilter>,
    ) -> MacsecResult<()> {
        self.eth2tap.install_filter(priority, filter)
    }

    pub fn uninstall_eth2tap_filter(&self, filter: &Arc<dyn TrafficFilter>) -> bool {
        self.eth2tap.uninstall_filter(filter)
    }

    pub fn install_tap2eth_filter(
        &self,
        priority: FilterPriority,
        filter: Arc<dyn TrafficFilter>,
    ) -> MacsecResult<()> {
        self.tap2eth.install_filter(priority, filter)
    }

    pub fn uninstall_tap2eth_filter(&self, filter: &Arc<dyn TrafficFilter>) -> bool {
        self.tap2eth.uninstall_filter(filter)
    }
}

/// Puts a link into promiscuous mode.
#[cfg_attr(test, mockall::automock)]
pub trait PromiscuousMode: Send + Sync {
    /// Sets IFF_PROMISC on `interface`.
    fn set_promiscuous(&self, interface: &str) -> MacsecResult<()>;
}

/// `struct ifreq` restricted to the flags member.
#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 24 - std::mem::size_of::<libc::c_short>()],
}

impl IfReqFlags {
    fn new(interface: &str) -> io::Result<Self> {
        let bytes = interface.as_bytes();
        if bytes.is_empty() || bytes.len() >= libc::IFNAMSIZ || bytes.contains(&0) {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        let mut req = Self {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: 0,
            _pad: [0; 24 - std::mem::size_of::<libc::c_short>()],
        };
        for (dst, src) in req.ifr_name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        Ok(req)
    }
}

/// Sets IFF_PROMISC with SIOCGIFFLAGS/SIOCSIFFLAGS on a throwaway socket.
#[derive(Debug, Clone, Default)]
pub struct IoctlPromiscuousMode;

impl IoctlPromiscuousMode {
    pub fn new() -> Self {
        Self
    }

    fn set_flag(interface: &str) -> io::Result<()> {
        let mut req = IfReqFlags::new(interface)?;

        let sock = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;

        // SAFETY: req is an ifreq-layout struct that outlives the call.
        if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS as _, &mut req) } < 0 {
            return Err(io::Error::last_os_error());
        }

        if req.ifr_flags & libc::IFF_PROMISC as libc::c_short != 0 {
            debug!(interface = %interface, "Link already promiscuous");
            return Ok(());
        }

        req.ifr_flags |= libc::IFF_PROMISC as libc::c_short;
        // SAFETY: as above.
        if unsafe { libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS as _, &req) } < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl PromiscuousMode for IoctlPromiscuousMode {
    fn set_promiscuous(&self, interface: &str) -> MacsecResult<()> {
        Self::set_flag(interface).map_err(|source| MacsecError::Promiscuous {
            interface: interface.to_string(),
            source,
        })?;
        info!(interface = %interface, "Set link promiscuous");
        Ok(())
    }
}
