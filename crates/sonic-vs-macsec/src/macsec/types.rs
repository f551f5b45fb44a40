//! MACsec (802.1AE) value types.

use std::fmt;
use std::sync::Arc;

use crate::error::{MacsecError, MacsecResult};
use crate::host_intf::HostInterfaceInfo;

/// Secure Channel Identifier in the text form the `ip` tool prints.
pub type Sci = String;

/// Association Number (0-3).
pub type An = u16;

/// Packet Number.
pub type Pn = u64;

/// Highest valid association number.
pub const MAX_AN: An = 3;

/// Hex digits in the text form of an SCI.
pub const SCI_HEX_LEN: usize = 16;

/// EtherType of EAPOL (802.1X key exchange).
pub const EAPOL_ETHER_TYPE: u16 = 0x888e;

/// Destination + source MAC.
pub const MAC_ADDRESS_SIZE: usize = 6;

/// Offset of the EtherType field in an Ethernet header.
pub const ETHER_TYPE_OFFSET: usize = 2 * MAC_ADDRESS_SIZE;

/// Size of an untagged Ethernet header.
pub const ETH_HEADER_SIZE: usize = ETHER_TYPE_OFFSET + 2;

/// Default receive buffer for the forwarder.
pub const ETH_FRAME_BUFFER_SIZE: usize = 0x4000;

/// Direction of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacsecDirection {
    /// Transmit side (TXSC).
    Egress,
    /// Receive side (RXSC).
    Ingress,
}

impl MacsecDirection {
    /// Tag the `ip macsec show` dump uses for this direction's SCs.
    pub fn sc_tag(&self) -> &'static str {
        match self {
            MacsecDirection::Egress => "TXSC",
            MacsecDirection::Ingress => "RXSC",
        }
    }

    /// Keyword used by `ip macsec` sub-commands.
    pub fn keyword(&self) -> &'static str {
        match self {
            MacsecDirection::Egress => "tx",
            MacsecDirection::Ingress => "rx",
        }
    }
}

impl fmt::Display for MacsecDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacsecDirection::Egress => write!(f, "egress"),
            MacsecDirection::Ingress => write!(f, "ingress"),
        }
    }
}

/// Target of one MACsec operation.
///
/// Carries no identity of its own: the manager derives everything it checks
/// from these fields, so repeating an operation with the same attr is safe.
#[derive(Clone)]
pub struct MacsecAttr {
    /// Underlying veth the MACsec device is stacked on.
    pub veth_name: String,
    /// MACsec netdevice name.
    pub macsec_name: String,
    /// Key identifier passed as `key <AUTH_KEY>`.
    pub auth_key: String,
    /// Secure association key.
    pub sak: String,
    /// Secure channel identifier.
    pub sci: Sci,
    /// Association number.
    pub an: An,
    /// Initial packet number.
    pub pn: Pn,
    /// Include the SCI in transmitted SecTAGs.
    pub send_sci: bool,
    /// Encrypt (as opposed to integrity-only).
    pub encryption_enable: bool,
    /// Direction of the SC/SA being addressed.
    pub direction: MacsecDirection,
    /// Host interface whose pipelines get the MACsec filters.
    pub info: Arc<HostInterfaceInfo>,
}

impl MacsecAttr {
    /// Creates an attr for `macsec_name` stacked on `veth_name`.
    ///
    /// Remaining fields start at egress, AN 0, PN 1, encryption and SCI on.
    pub fn new(
        veth_name: impl Into<String>,
        macsec_name: impl Into<String>,
        info: Arc<HostInterfaceInfo>,
    ) -> Self {
        Self {
            veth_name: veth_name.into(),
            macsec_name: macsec_name.into(),
            auth_key: String::new(),
            sak: String::new(),
            sci: Sci::new(),
            an: 0,
            pn: 1,
            send_sci: true,
            encryption_enable: true,
            direction: MacsecDirection::Egress,
            info,
        }
    }

    /// Sets the secure channel identifier.
    pub fn with_sci(mut self, sci: impl Into<Sci>) -> Self {
        self.sci = sci.into();
        self
    }

    /// Sets the direction.
    pub fn with_direction(mut self, direction: MacsecDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Sets association number and initial packet number.
    pub fn with_sa(mut self, an: An, pn: Pn) -> Self {
        self.an = an;
        self.pn = pn;
        self
    }

    /// Sets key identifier and SAK.
    pub fn with_keys(mut self, auth_key: impl Into<String>, sak: impl Into<String>) -> Self {
        self.auth_key = auth_key.into();
        self.sak = sak.into();
        self
    }

    /// Checks the association number range and the SCI format.
    pub fn validate(&self) -> MacsecResult<()> {
        if self.an > MAX_AN {
            return Err(MacsecError::InvalidAssociationNumber(self.an));
        }
        if !is_valid_sci(&self.sci) {
            return Err(MacsecError::InvalidSci(self.sci.clone()));
        }
        Ok(())
    }
}

/// Returns true if `sci` is exactly [`SCI_HEX_LEN`] hex digits.
pub fn is_valid_sci(sci: &str) -> bool {
    sci.len() == SCI_HEX_LEN && sci.bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Debug for MacsecAttr {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacsecAttr")
            .field("veth_name", &self.veth_name)
            .field("macsec_name", &self.macsec_name)
            .field("auth_key", &"<redacted>")
            .field("sak", &"<redacted>")
            .field("sci", &self.sci)
            .field("an", &self.an)
            .field("pn", &self.pn)
            .field("send_sci", &self.send_sci)
            .field("encryption_enable", &self.encryption_enable)
            .field("direction", &self.direction)
            .finish()
    }
}
