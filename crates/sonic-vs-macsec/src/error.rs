//! Error types for MACsec provisioning and forwarding.
//!
//! Every fallible operation in this crate returns [`MacsecResult`]. Errors
//! carry enough context (device name, exact command, errno) to be logged
//! once by the caller without re-deriving what was attempted.

use std::io;
use thiserror::Error;

use crate::macsec::types::{An, Sci};

/// Result type alias for MACsec operations.
pub type MacsecResult<T> = Result<T, MacsecError>;

/// Errors that can occur while driving kernel MACsec state.
#[derive(Debug, Error)]
pub enum MacsecError {
    /// Failed to spawn the control tool.
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Control tool returned a non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Interface name could not be resolved to an index.
    #[error("Interface '{interface}' not found")]
    InterfaceNotFound {
        /// The interface name.
        interface: String,
    },

    /// Socket, eventfd or thread setup failed.
    #[error("{operation} failed on {interface}: {source}")]
    Socket {
        /// The step that failed (e.g. "socket", "bind").
        operation: &'static str,
        /// The interface the socket belongs to.
        interface: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Putting a link into promiscuous mode failed.
    #[error("promisc failed on {interface}: {source}")]
    Promiscuous {
        /// The interface name.
        interface: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A filter is already installed at this priority.
    #[error("Filter priority {priority} is already occupied")]
    FilterConflict {
        /// The contested priority.
        priority: i32,
    },

    /// A traffic manager already exists for the device.
    #[error("MACsec traffic manager for {device} already exists")]
    TrafficManagerExists {
        /// The MACsec device name.
        device: String,
    },

    /// No traffic manager is registered for the device.
    #[error("MACsec traffic manager for {device} doesn't exist")]
    TrafficManagerNotFound {
        /// The MACsec device name.
        device: String,
    },

    /// The secure channel is absent from the device dump.
    #[error("MACsec SC {sci} at the device {device} is nonexisting")]
    ScNotFound {
        /// The MACsec device name.
        device: String,
        /// Secure channel identifier.
        sci: Sci,
    },

    /// The secure association is absent from its secure channel.
    #[error("MACsec SA {sci}:{an} at the device {device} is nonexisting")]
    SaNotFound {
        /// The MACsec device name.
        device: String,
        /// Secure channel identifier.
        sci: Sci,
        /// Association number.
        an: An,
    },

    /// The SA line was found but carried no packet number.
    #[error("The packet number isn't in the MACsec SA {sci}:{an} at the device {device}")]
    PacketNumberNotFound {
        /// The MACsec device name.
        device: String,
        /// Secure channel identifier.
        sci: Sci,
        /// Association number.
        an: An,
    },

    /// Association number outside 0..=3.
    #[error("Invalid AN {0}, must be 0-3")]
    InvalidAssociationNumber(An),

    /// SCI that is not 16 hex digits.
    #[error("Invalid SCI '{0}', must be 16 hex digits")]
    InvalidSci(Sci),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MacsecError {
    /// Creates a socket setup error.
    pub fn socket(
        operation: &'static str,
        interface: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self::Socket {
            operation,
            interface: interface.into(),
            source,
        }
    }

    /// Creates an interface not found error.
    pub fn interface_not_found(interface: impl Into<String>) -> Self {
        Self::InterfaceNotFound {
            interface: interface.into(),
        }
    }

    /// Creates an SC not found error.
    pub fn sc_not_found(device: impl Into<String>, sci: impl Into<Sci>) -> Self {
        Self::ScNotFound {
            device: device.into(),
            sci: sci.into(),
        }
    }

    /// Creates an SA not found error.
    pub fn sa_not_found(device: impl Into<String>, sci: impl Into<Sci>, an: An) -> Self {
        Self::SaNotFound {
            device: device.into(),
            sci: sci.into(),
            an,
        }
    }

    /// Returns true if the failure may clear on a later attempt.
    ///
    /// Nothing in this crate retries on its own; callers use this to decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MacsecError::ShellCommandFailed { .. }
                | MacsecError::ScNotFound { .. }
                | MacsecError::InterfaceNotFound { .. }
        )
    }
}
