//! Shell command builders for MACsec operations
//!
//! Every builder takes the control tool path first (see
//! [`MacsecConfig::ip_cmd`](crate::config::MacsecConfig)) so tests and
//! alternate installs can point it elsewhere.

use crate::shell::shellquote;

use super::types::MacsecAttr;

const REDACTED: &str = "<redacted>";

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Build MACsec port creation command
///
/// Creates the MACsec netdevice on top of the veth and brings it up. The
/// egress SC comes into existence with the device.
pub fn build_create_port_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} link add link {} name {} type macsec sci {} encrypt {} send_sci {} && \
         {} link set dev {} up",
        ip_cmd,
        shellquote(&attr.veth_name),
        shellquote(&attr.macsec_name),
        shellquote(&attr.sci),
        on_off(attr.encryption_enable),
        on_off(attr.send_sci),
        ip_cmd,
        shellquote(&attr.macsec_name)
    )
}

/// Build MACsec port deletion command
pub fn build_delete_port_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} link del link {} name {} type macsec",
        ip_cmd,
        shellquote(&attr.veth_name),
        shellquote(&attr.macsec_name)
    )
}

/// Build egress SA creation command
///
/// Installs the transmit SA and makes it the encoding SA.
pub fn build_create_egress_sa_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} macsec add {} tx sa {} pn {} on key {} {} && \
         {} link set link {} name {} type macsec encodingsa {}",
        ip_cmd,
        shellquote(&attr.macsec_name),
        attr.an,
        attr.pn,
        shellquote(&attr.auth_key),
        shellquote(&attr.sak),
        ip_cmd,
        shellquote(&attr.veth_name),
        shellquote(&attr.macsec_name),
        attr.an
    )
}

/// Build egress SA deletion command
///
/// Disables the SA before deleting it.
pub fn build_delete_egress_sa_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} macsec set {} tx sa {} off && {} macsec del {} tx sa {}",
        ip_cmd,
        shellquote(&attr.macsec_name),
        attr.an,
        ip_cmd,
        shellquote(&attr.macsec_name),
        attr.an
    )
}

/// Build ingress SC creation command
pub fn build_create_ingress_sc_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} macsec add {} rx sci {} on",
        ip_cmd,
        shellquote(&attr.macsec_name),
        shellquote(&attr.sci)
    )
}

/// Build ingress SC deletion command
pub fn build_delete_ingress_sc_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} macsec set {} rx sci {} off && {} macsec del {} rx sci {}",
        ip_cmd,
        shellquote(&attr.macsec_name),
        shellquote(&attr.sci),
        ip_cmd,
        shellquote(&attr.macsec_name),
        shellquote(&attr.sci)
    )
}

/// Build ingress SA creation command
pub fn build_create_ingress_sa_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} macsec add {} rx sci {} sa {} pn {} on key {} {}",
        ip_cmd,
        shellquote(&attr.macsec_name),
        shellquote(&attr.sci),
        attr.an,
        attr.pn,
        shellquote(&attr.auth_key),
        shellquote(&attr.sak)
    )
}

/// Build ingress SA deletion command
pub fn build_delete_ingress_sa_cmd(ip_cmd: &str, attr: &MacsecAttr) -> String {
    format!(
        "{} macsec set {} rx sci {} sa {} off && {} macsec del {} rx sci {} sa {}",
        ip_cmd,
        shellquote(&attr.macsec_name),
        shellquote(&attr.sci),
        attr.an,
        ip_cmd,
        shellquote(&attr.macsec_name),
        shellquote(&attr.sci),
        attr.an
    )
}

/// Build MACsec show command
///
/// Without a device, dumps every MACsec device.
pub fn build_show_cmd(ip_cmd: &str, macsec_name: Option<&str>) -> String {
    match macsec_name {
        Some(name) => format!("{} macsec show {}", ip_cmd, shellquote(name)),
        None => format!("{} macsec show", ip_cmd),
    }
}

/// Build forced link deletion command, used by the stale-device sweep
pub fn build_delete_link_cmd(ip_cmd: &str, macsec_name: &str) -> String {
    format!("{} link del {}", ip_cmd, shellquote(macsec_name))
}

/// Returns `cmd` with the attr's key material masked, for logs and errors.
pub fn redact_keys(cmd: &str, attr: &MacsecAttr) -> String {
    let mut redacted = cmd.to_string();
    for secret in [&attr.sak, &attr.auth_key] {
        if !secret.is_empty() {
            redacted = redacted.replace(&shellquote(secret), REDACTED);
        }
    }
    redacted
}
