//! `ip macsec show` output parsing.
//!
//! The dump is nested text:
//!
//! ```text
//! 2774: macsec0: protect on validate strict sc off sa off encrypt on ...
//!     cipher suite: GCM-AES-128, using ICV length 16
//!     TXSC: fe5400409b920001 on SA 0
//!         0: PN 84, state on, key ebe9123ecbbfd96bee92c8ab01000000
//!     RXSC: 5254001234560001, state on
//!         0: PN 28, state on, key ebe9123ecbbfd96bee92c8ab01000000
//! ```
//!
//! Each `find_*` narrows the previous step's slice: device block, then SC
//! block, then SA line. A miss is `None`; callers treat it as "not present".

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{An, MacsecDirection, Pn};

/// Device header: `<index>: <name>: <flags...>`
static DEVICE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\d+:\s*([^\s:]+):").expect("Invalid regex pattern"));

static PACKET_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PN\s*(\d+)").expect("Invalid regex pattern"));

/// Names of every MACsec device in a bare `ip macsec show` dump, in order.
pub fn list_devices(dump: &str) -> Vec<String> {
    DEVICE_HEADER_RE
        .captures_iter(dump)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Block of `dump` describing `macsec_name`, header line included.
pub fn find_device<'a>(dump: &'a str, macsec_name: &str) -> Option<&'a str> {
    let mut headers = DEVICE_HEADER_RE.captures_iter(dump).peekable();

    while let Some(caps) = headers.next() {
        if &caps[1] != macsec_name {
            continue;
        }
        let start = caps.get(0)?.start();
        let end = headers
            .peek()
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(dump.len());
        return Some(&dump[start..end]);
    }

    None
}

/// SC line for `sci` in `direction` plus the SA lines nested under it.
///
/// An empty `sci` never matches.
pub fn find_sc_block<'a>(
    device_block: &'a str,
    direction: MacsecDirection,
    sci: &str,
) -> Option<&'a str> {
    if sci.is_empty() {
        return None;
    }
    let pattern = format!(
        r"(?m)^[ \t]*{}:[ \t]*{}\b[^\n]*\n?(?:[ \t]+\d+:[ \t]*PN[^\n]*\n?)*",
        direction.sc_tag(),
        regex::escape(sci)
    );
    let re = Regex::new(&pattern).ok()?;
    re.find(device_block).map(|m| m.as_str())
}

/// SA line for association number `an` inside an SC block.
pub fn find_sa_line(sc_block: &str, an: An) -> Option<&str> {
    let pattern = format!(r"(?m)^[ \t]*{}:[ \t]*PN[ \t]*\d+[^\n]*", an);
    let re = Regex::new(&pattern).ok()?;
    re.find(sc_block).map(|m| m.as_str())
}

/// Packet number from an SA line.
pub fn parse_packet_number(sa_line: &str) -> Option<Pn> {
    PACKET_NUMBER_RE
        .captures(sa_line)
        .and_then(|caps| caps[1].parse().ok())
}
