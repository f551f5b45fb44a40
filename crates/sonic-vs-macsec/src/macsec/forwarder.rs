//! MACsec forwarder.
//!
//! The kernel MACsec device decrypts ingress traffic on its own; somebody
//! still has to move the cleartext frames to the tap device. A
//! [`MacsecForwarder`] owns a raw packet socket bound to the MACsec device
//! and one thread that copies every frame read from it to the tap.
//!
//! The thread waits in `poll(2)` on the socket and on an eventfd. Dropping
//! the forwarder clears the run flag, signals the eventfd, joins the thread
//! and only then closes the socket.

use std::io;
use std::mem::ManuallyDrop;
use std::ops::ControlFlow;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::sys::socket::{socket, AddressFamily, SockFlag, SockProtocol, SockType};
use tracing::{debug, error, info, warn};

use super::filter::{classify_io_error, write_frame, IoErrorKind};
use super::types::ETH_FRAME_BUFFER_SIZE;
use crate::error::{MacsecError, MacsecResult};
use crate::host_intf::PromiscuousMode;

/// Opens the socket a forwarder reads from.
pub trait PacketSocketFactory: Send + Sync {
    /// Returns a socket receiving every frame of `interface`.
    fn open(&self, interface: &str) -> MacsecResult<OwnedFd>;
}

/// `AF_PACKET`/`SOCK_RAW` socket for all protocols, bound to one link.
pub struct RawPacketSocketFactory {
    promisc: Arc<dyn PromiscuousMode>,
}

impl RawPacketSocketFactory {
    pub fn new(promisc: Arc<dyn PromiscuousMode>) -> Self {
        Self { promisc }
    }
}

impl PacketSocketFactory for RawPacketSocketFactory {
    fn open(&self, interface: &str) -> MacsecResult<OwnedFd> {
        // Dropped, and so closed, on any early return below.
        let socket = socket(
            AddressFamily::Packet,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::EthAll,
        )
        .map_err(|e| MacsecError::socket("socket", interface, e.into()))?;

        let ifindex = nix::net::if_::if_nametoindex(interface)
            .map_err(|_| MacsecError::interface_not_found(interface))?;

        self.promisc.set_promiscuous(interface)?;

        // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = ifindex as libc::c_int;

        // SAFETY: addr is a fully initialised sockaddr_ll and the length
        // passed matches its size.
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(MacsecError::socket(
                "bind",
                interface,
                io::Error::last_os_error(),
            ));
        }

        debug!(interface = %interface, ifindex = ifindex, "Bound raw packet socket");
        Ok(socket)
    }
}

/// Cancellation event backed by an eventfd.
struct ExitEvent {
    fd: OwnedFd,
}

impl ExitEvent {
    fn new(interface: &str) -> MacsecResult<Self> {
        // SAFETY: eventfd(2) takes no pointers.
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(MacsecError::socket(
                "eventfd",
                interface,
                io::Error::last_os_error(),
            ));
        }
        // SAFETY: fd was just returned by eventfd(2).
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn notify(&self) -> io::Result<()> {
        let value: u64 = 1;
        // SAFETY: eventfd writes are exactly 8 bytes, read from `value`.
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &value as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// State moved into the forwarding thread.
struct ForwardLoop {
    macsec_name: String,
    socket: Arc<OwnedFd>,
    tap: Arc<OwnedFd>,
    exit_event: Arc<ExitEvent>,
    run: Arc<AtomicBool>,
    buffer_size: usize,
}

impl ForwardLoop {
    fn run(self) {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut fds = [
            libc::pollfd {
                fd: self.exit_event.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.socket.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        while self.run.load(Ordering::Acquire) {
            for pfd in fds.iter_mut() {
                pfd.revents = 0;
            }

            // SAFETY: fds is a live array of fds.len() pollfds; both
            // descriptors are held open by self for the whole loop.
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(
                    device = %self.macsec_name,
                    error = %err,
                    "poll failed, ending forwarding thread"
                );
                return;
            }

            if fds[0].revents != 0 {
                break;
            }

            let revents = fds[1].revents;
            if revents & libc::POLLNVAL != 0 {
                info!(device = %self.macsec_name, "macsec socket invalid, ending thread");
                return;
            }
            if revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) == 0 {
                continue;
            }

            // SAFETY: buffer is writable for buffer.len() bytes.
            let size = unsafe {
                libc::read(
                    self.socket.as_raw_fd(),
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };

            if size < 0 {
                let err = io::Error::last_os_error();
                warn!(
                    device = %self.macsec_name,
                    fd = self.socket.as_raw_fd(),
                    error = %err,
                    "failed to read from macsec device"
                );
                if classify_io_error(&err) == IoErrorKind::Closed {
                    info!(device = %self.macsec_name, "ending thread for macsec device");
                    return;
                }
                continue;
            }

            if size == 0 {
                if revents & libc::POLLHUP != 0 {
                    info!(device = %self.macsec_name, "macsec socket hung up, ending thread");
                    return;
                }
                continue;
            }

            if let Err(err) = write_frame(&self.tap, &buffer[..size as usize]) {
                if self.tap_write_failed(&err).is_break() {
                    return;
                }
            }
        }

        info!(device = %self.macsec_name, "ending thread proc");
    }

    /// Only a closed tap ends the thread.
    fn tap_write_failed(&self, err: &io::Error) -> ControlFlow<()> {
        match classify_io_error(err) {
            IoErrorKind::Transient => ControlFlow::Continue(()),
            IoErrorKind::Unexpected => {
                error!(
                    device = %self.macsec_name,
                    tap_fd = self.tap.as_raw_fd(),
                    error = %err,
                    "failed to write to tap device"
                );
                ControlFlow::Continue(())
            }
            IoErrorKind::Closed => {
                error!(
                    device = %self.macsec_name,
                    tap_fd = self.tap.as_raw_fd(),
                    error = %err,
                    "tap closed, ending thread"
                );
                ControlFlow::Break(())
            }
        }
    }
}

/// Raw socket on a MACsec device plus the thread draining it to the tap.
pub struct MacsecForwarder {
    macsec_name: String,
    // Taken in Drop, after the thread has been joined.
    socket: ManuallyDrop<Arc<OwnedFd>>,
    exit_event: Arc<ExitEvent>,
    run: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MacsecForwarder {
    /// Opens the MACsec socket through `factory` and starts forwarding to `tap`.
    ///
    /// Nothing is spawned unless the socket is fully set up.
    pub fn new(
        macsec_name: &str,
        tap: Arc<OwnedFd>,
        factory: &dyn PacketSocketFactory,
    ) -> MacsecResult<Self> {
        Self::with_buffer_size(macsec_name, tap, factory, ETH_FRAME_BUFFER_SIZE)
    }

    /// Same as [`new`](Self::new) with an explicit read buffer size.
    pub fn with_buffer_size(
        macsec_name: &str,
        tap: Arc<OwnedFd>,
        factory: &dyn PacketSocketFactory,
        buffer_size: usize,
    ) -> MacsecResult<Self> {
        let socket = Arc::new(factory.open(macsec_name)?);
        let exit_event = Arc::new(ExitEvent::new(macsec_name)?);
        let run = Arc::new(AtomicBool::new(true));

        let forward_loop = ForwardLoop {
            macsec_name: macsec_name.to_string(),
            socket: Arc::clone(&socket),
            tap,
            exit_event: Arc::clone(&exit_event),
            run: Arc::clone(&run),
            buffer_size,
        };

        let thread = thread::Builder::new()
            .name(format!("macsec-{}", macsec_name))
            .spawn(move || forward_loop.run())
            .map_err(|e| MacsecError::socket("spawn", macsec_name, e))?;

        info!(device = %macsec_name, "setup MACsec forward rule succeeded");

        Ok(Self {
            macsec_name: macsec_name.to_string(),
            socket: ManuallyDrop::new(socket),
            exit_event,
            run,
            thread: Some(thread),
        })
    }

    /// MACsec device name.
    pub fn macsec_name(&self) -> &str {
        &self.macsec_name
    }

    /// Shared handle to the MACsec socket, for the egress filter.
    pub fn socket(&self) -> Arc<OwnedFd> {
        Arc::clone(&self.socket)
    }

    /// Returns true while the forwarding thread has not exited.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn stop(&mut self) {
        self.run.store(false, Ordering::Release);

        if let Err(err) = self.exit_event.notify() {
            error!(device = %self.macsec_name, error = %err, "failed to signal exit event");
        }

        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                // Joining ourselves would deadlock.
                error!(device = %self.macsec_name, "forwarder dropped from its own thread");
            } else if handle.join().is_err() {
                error!(device = %self.macsec_name, "forwarding thread panicked");
            }
        }
    }

    fn close_socket(&mut self) {
        // SAFETY: called once, from Drop; the field is never touched again.
        let socket = unsafe { ManuallyDrop::take(&mut self.socket) };

        match Arc::try_unwrap(socket) {
            Ok(fd) => {
                if let Err(err) = nix::unistd::close(fd.into_raw_fd()) {
                    error!(
                        device = %self.macsec_name,
                        error = %err,
                        "failed to close macsec socket"
                    );
                }
            }
            Err(_) => {
                debug!(
                    device = %self.macsec_name,
                    "macsec socket still referenced, closing with last holder"
                );
            }
        }
    }
}

impl Drop for MacsecForwarder {
    fn drop(&mut self) {
        self.stop();
        self.close_socket();
    }
}

impl std::fmt::Debug for MacsecForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacsecForwarder")
            .field("macsec_name", &self.macsec_name)
            .field("socket", &self.socket.as_raw_fd())
            .field("running", &self.is_running())
            .finish()
    }
}
