//! MACsec session management and data path.

pub mod commands;
pub mod filter;
pub mod forwarder;
pub mod manager;
pub mod show;
pub mod types;

pub use filter::{MacsecFilter, MacsecFilterKind};
pub use forwarder::{MacsecForwarder, PacketSocketFactory, RawPacketSocketFactory};
pub use manager::{MacsecManager, MacsecTrafficManager};
pub use types::{An, MacsecAttr, MacsecDirection, Pn, Sci};
