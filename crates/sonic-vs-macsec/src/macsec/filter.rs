//! MACsec interception filters.
//!
//! A MACsec-enabled host interface gets one filter in each of its two
//! pipelines. EAPOL always takes the default path so key agreement keeps
//! working; everything else is diverted:
//!
//! - egress (tap -> physical) frames are written into the MACsec socket
//!   and the kernel encrypts them;
//! - ingress (physical -> tap) frames are dropped, since the forwarder
//!   thread delivers the decrypted copy from the MACsec device.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use tracing::{error, trace};

use super::types::{MacsecDirection, EAPOL_ETHER_TYPE, ETHER_TYPE_OFFSET, ETH_HEADER_SIZE};
use crate::traffic_filter::{FilterStatus, TrafficFilter};

/// How a read/write errno is handled on the MACsec data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IoErrorKind {
    /// ENETDOWN / EIO: expected while the link flaps.
    Transient,
    /// EBADF: the descriptor was closed underneath us.
    Closed,
    /// Anything else.
    Unexpected,
}

pub(crate) fn classify_io_error(err: &io::Error) -> IoErrorKind {
    match err.raw_os_error() {
        Some(libc::ENETDOWN) | Some(libc::EIO) => IoErrorKind::Transient,
        Some(libc::EBADF) => IoErrorKind::Closed,
        _ => IoErrorKind::Unexpected,
    }
}

/// Writes one whole frame to `fd`.
pub(crate) fn write_frame(fd: &OwnedFd, frame: &[u8]) -> io::Result<usize> {
    // SAFETY: frame is readable for frame.len() bytes and fd stays open
    // for the duration of the borrow.
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            frame.as_ptr() as *const libc::c_void,
            frame.len(),
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Returns the EtherType of `frame`, if it has a full Ethernet header.
pub fn ether_type(frame: &[u8]) -> Option<u16> {
    if frame.len() < ETH_HEADER_SIZE {
        return None;
    }
    Some(u16::from_be_bytes([
        frame[ETHER_TYPE_OFFSET],
        frame[ETHER_TYPE_OFFSET + 1],
    ]))
}

/// Per-direction behaviour of a [`MacsecFilter`].
#[derive(Debug, Clone)]
pub enum MacsecFilterKind {
    /// Redirect frames into the MACsec socket.
    Egress {
        /// Raw socket bound to the MACsec device.
        socket: Arc<OwnedFd>,
    },
    /// Swallow frames; the forwarder owns ingress delivery.
    Ingress,
}

/// Filter installed into a host interface pipeline for one MACsec device.
#[derive(Debug, Clone)]
pub struct MacsecFilter {
    macsec_name: String,
    kind: MacsecFilterKind,
}

impl MacsecFilter {
    /// Filter for the tap -> physical pipeline.
    pub fn egress(macsec_name: impl Into<String>, socket: Arc<OwnedFd>) -> Self {
        Self {
            macsec_name: macsec_name.into(),
            kind: MacsecFilterKind::Egress { socket },
        }
    }

    /// Filter for the physical -> tap pipeline.
    pub fn ingress(macsec_name: impl Into<String>) -> Self {
        Self {
            macsec_name: macsec_name.into(),
            kind: MacsecFilterKind::Ingress,
        }
    }

    /// MACsec device this filter serves.
    pub fn macsec_name(&self) -> &str {
        &self.macsec_name
    }

    /// Direction this filter intercepts.
    pub fn direction(&self) -> MacsecDirection {
        match self.kind {
            MacsecFilterKind::Egress { .. } => MacsecDirection::Egress,
            MacsecFilterKind::Ingress => MacsecDirection::Ingress,
        }
    }

    fn forward(&self, frame: &[u8]) -> FilterStatus {
        match &self.kind {
            MacsecFilterKind::Ingress => FilterStatus::Terminate,
            MacsecFilterKind::Egress { socket } => match write_frame(socket, frame) {
                Ok(_) => FilterStatus::Terminate,
                Err(err) => match classify_io_error(&err) {
                    IoErrorKind::Transient => FilterStatus::Terminate,
                    IoErrorKind::Unexpected => {
                        error!(
                            device = %self.macsec_name,
                            fd = socket.as_raw_fd(),
                            error = %err,
                            "failed to write to macsec device"
                        );
                        FilterStatus::Terminate
                    }
                    IoErrorKind::Closed => {
                        error!(
                            device = %self.macsec_name,
                            fd = socket.as_raw_fd(),
                            error = %err,
                            "macsec socket closed, egress path is down"
                        );
                        FilterStatus::Error
                    }
                },
            },
        }
    }
}

impl TrafficFilter for MacsecFilter {
    fn execute(&self, buffer: &mut [u8], length: &mut usize) -> FilterStatus {
        let frame = &buffer[..(*length).min(buffer.len())];

        if ether_type(frame) == Some(EAPOL_ETHER_TYPE) {
            trace!(device = %self.macsec_name, "EAPOL bypasses macsec");
            return FilterStatus::Continue;
        }

        self.forward(frame)
    }
}
