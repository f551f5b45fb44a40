//! MACsec support for the SONiC virtual switch
//!
//! The virtual switch emulates MACsec with the Linux kernel: each
//! MACsec-enabled front-panel port gets a kernel MACsec device stacked on its
//! veth, provisioned with the `ip` tool. This crate handles:
//! - MACsec port, SC and SA provisioning and teardown (idempotent)
//! - Packet number queries parsed from `ip macsec show`
//! - Filters that divert tap traffic into the MACsec device, EAPOL excepted
//! - A forwarder thread per device copying decrypted frames to the tap
//! - Sweeping stale MACsec devices on start and stop

pub mod config;
pub mod error;
pub mod host_intf;
pub mod macsec;
pub mod shell;
pub mod traffic_filter;

pub use config::MacsecConfig;
pub use error::{MacsecError, MacsecResult};
pub use host_intf::{HostInterfaceInfo, IoctlPromiscuousMode, PromiscuousMode};
pub use macsec::{MacsecAttr, MacsecDirection, MacsecManager};
pub use shell::{CommandExecutor, ExecResult, ShellExecutor};
pub use traffic_filter::{FilterPriority, FilterStatus, TrafficFilter, TrafficFilterPipes};
