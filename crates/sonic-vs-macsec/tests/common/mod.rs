//! Test fixtures: a simulated `ip` tool and socketpair-backed packet sockets.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sonic_vs_macsec::macsec::PacketSocketFactory;
use sonic_vs_macsec::{
    CommandExecutor, ExecResult, HostInterfaceInfo, MacsecConfig, MacsecManager, MacsecResult,
};

pub const IP: &str = "/sbin/ip";

#[derive(Debug, Clone)]
struct Sa {
    pn: u64,
    on: bool,
    key_id: String,
}

#[derive(Debug, Clone)]
struct Sc {
    on: bool,
    sas: BTreeMap<u16, Sa>,
}

#[derive(Debug, Clone)]
struct Device {
    index: u32,
    veth: String,
    up: bool,
    encrypt: bool,
    send_sci: bool,
    encoding_sa: u16,
    tx_sci: String,
    tx_sas: BTreeMap<u16, Sa>,
    rx: BTreeMap<String, Sc>,
}

#[derive(Debug, Default)]
struct KernelState {
    devices: BTreeMap<String, Device>,
    next_index: u32,
}

/// In-memory stand-in for `ip link` / `ip macsec`.
///
/// Understands exactly the command lines the manager builds, chained with
/// `&&`, and renders `ip macsec show` in the kernel's layout.
#[derive(Default)]
pub struct FakeIp {
    state: Mutex<KernelState>,
    commands: Mutex<Vec<String>>,
    failures: Mutex<Vec<String>>,
}

fn ok() -> ExecResult {
    ExecResult::ok("")
}

fn fail(code: i32, msg: &str) -> ExecResult {
    ExecResult::failed(code, msg)
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Splits a command line the way `/bin/sh` would for our quoting.
fn tokenize(cmd: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = cmd.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

impl FakeIp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Commands other than `show`.
    pub fn mutating_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !c.contains(" macsec show"))
            .collect()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().clear();
    }

    /// Makes every command line starting with `prefix` exit 2.
    pub fn fail_on(&self, prefix: &str) {
        self.failures.lock().push(prefix.to_string());
    }

    /// Adds a MACsec device as if left behind by an earlier run.
    pub fn add_device(&self, name: &str, veth: &str, sci: &str) {
        let mut state = self.state.lock();
        state.next_index += 1;
        let index = 2773 + state.next_index;
        state.devices.insert(
            name.to_string(),
            Device {
                index,
                veth: veth.to_string(),
                up: false,
                encrypt: true,
                send_sci: true,
                encoding_sa: 0,
                tx_sci: sci.to_string(),
                tx_sas: BTreeMap::new(),
                rx: BTreeMap::new(),
            },
        );
    }

    pub fn has_device(&self, name: &str) -> bool {
        self.state.lock().devices.contains_key(name)
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.state
            .lock()
            .devices
            .get(name)
            .map(|d| d.up)
            .unwrap_or(false)
    }

    pub fn encoding_sa(&self, name: &str) -> Option<u16> {
        self.state.lock().devices.get(name).map(|d| d.encoding_sa)
    }

    /// Simulates traffic advancing the packet number of an SA.
    pub fn set_pn(&self, name: &str, rx_sci: Option<&str>, an: u16, pn: u64) {
        let mut state = self.state.lock();
        let Some(device) = state.devices.get_mut(name) else {
            return;
        };
        let sas = match rx_sci {
            Some(sci) => match device.rx.get_mut(sci) {
                Some(sc) => &mut sc.sas,
                None => return,
            },
            None => &mut device.tx_sas,
        };
        if let Some(sa) = sas.get_mut(&an) {
            sa.pn = pn;
        }
    }

    fn render(device_name: &str, device: &Device) -> String {
        let mut out = format!(
            "{}: {}: protect on validate strict sc off sa off encrypt {} send_sci {} \
             end_station off scb off replay off window 0\n",
            device.index,
            device_name,
            on_off(device.encrypt),
            on_off(device.send_sci)
        );
        out.push_str("    cipher suite: GCM-AES-128, using ICV length 16\n");
        out.push_str(&format!(
            "    TXSC: {} on SA {}\n",
            device.tx_sci, device.encoding_sa
        ));
        for (an, sa) in &device.tx_sas {
            out.push_str(&format!(
                "        {}: PN {}, state {}, key {}\n",
                an,
                sa.pn,
                on_off(sa.on),
                sa.key_id
            ));
        }
        for (sci, sc) in &device.rx {
            out.push_str(&format!("    RXSC: {}, state {}\n", sci, on_off(sc.on)));
            for (an, sa) in &sc.sas {
                out.push_str(&format!(
                    "        {}: PN {}, state {}, key {}\n",
                    an,
                    sa.pn,
                    on_off(sa.on),
                    sa.key_id
                ));
            }
        }
        out
    }

    fn run_one(&self, args: &[&str]) -> ExecResult {
        let mut state = self.state.lock();

        match args {
            [
                "link", "add", "link", veth, "name", dev, "type", "macsec", "sci", sci, "encrypt",
                encrypt, "send_sci", send_sci,
            ] => {
                if state.devices.contains_key(*dev) {
                    return fail(2, "RTNETLINK answers: File exists");
                }
                state.next_index += 1;
                let index = 2773 + state.next_index;
                state.devices.insert(
                    dev.to_string(),
                    Device {
                        index,
                        veth: veth.to_string(),
                        up: false,
                        encrypt: *encrypt == "on",
                        send_sci: *send_sci == "on",
                        encoding_sa: 0,
                        tx_sci: sci.to_string(),
                        tx_sas: BTreeMap::new(),
                        rx: BTreeMap::new(),
                    },
                );
                ok()
            }
            ["link", "set", "dev", dev, "up"] => match state.devices.get_mut(*dev) {
                Some(device) => {
                    device.up = true;
                    ok()
                }
                None => fail(1, "Cannot find device"),
            },
            ["link", "set", "link", veth, "name", dev, "type", "macsec", "encodingsa", an] => {
                let Ok(an) = an.parse::<u16>() else {
                    return fail(1, "invalid AN");
                };
                match state.devices.get_mut(*dev) {
                    Some(device) if device.veth == *veth => {
                        device.encoding_sa = an;
                        ok()
                    }
                    _ => fail(1, "Cannot find device"),
                }
            }
            ["link", "del", "link", veth, "name", dev, "type", "macsec"] => {
                let stacked = state
                    .devices
                    .get(*dev)
                    .map(|device| device.veth == *veth)
                    .unwrap_or(false);
                if !stacked {
                    return fail(1, "Cannot find device");
                }
                state.devices.remove(*dev);
                ok()
            }
            ["link", "del", dev] => match state.devices.remove(*dev) {
                Some(_) => ok(),
                None => fail(1, "Cannot find device"),
            },
            ["macsec", "add", dev, "tx", "sa", an, "pn", pn, "on", "key", key_id, _sak] => {
                let (Ok(an), Ok(pn)) = (an.parse::<u16>(), pn.parse::<u64>()) else {
                    return fail(1, "invalid number");
                };
                let Some(device) = state.devices.get_mut(*dev) else {
                    return fail(1, "Cannot find device");
                };
                if device.tx_sas.contains_key(&an) {
                    return fail(2, "RTNETLINK answers: File exists");
                }
                device.tx_sas.insert(
                    an,
                    Sa {
                        pn,
                        on: true,
                        key_id: key_id.to_string(),
                    },
                );
                ok()
            }
            ["macsec", "add", dev, "rx", "sci", sci, "on"] => {
                let Some(device) = state.devices.get_mut(*dev) else {
                    return fail(1, "Cannot find device");
                };
                if device.rx.contains_key(*sci) {
                    return fail(2, "RTNETLINK answers: File exists");
                }
                device.rx.insert(
                    sci.to_string(),
                    Sc {
                        on: true,
                        sas: BTreeMap::new(),
                    },
                );
                ok()
            }
            [
                "macsec", "add", dev, "rx", "sci", sci, "sa", an, "pn", pn, "on", "key", key_id,
                _sak,
            ] => {
                let (Ok(an), Ok(pn)) = (an.parse::<u16>(), pn.parse::<u64>()) else {
                    return fail(1, "invalid number");
                };
                let Some(sc) = state
                    .devices
                    .get_mut(*dev)
                    .and_then(|device| device.rx.get_mut(*sci))
                else {
                    return fail(1, "RTNETLINK answers: No such file or directory");
                };
                if sc.sas.contains_key(&an) {
                    return fail(2, "RTNETLINK answers: File exists");
                }
                sc.sas.insert(
                    an,
                    Sa {
                        pn,
                        on: true,
                        key_id: key_id.to_string(),
                    },
                );
                ok()
            }
            ["macsec", "set", dev, "tx", "sa", an, "off"] => {
                let Ok(an) = an.parse::<u16>() else {
                    return fail(1, "invalid AN");
                };
                match state
                    .devices
                    .get_mut(*dev)
                    .and_then(|device| device.tx_sas.get_mut(&an))
                {
                    Some(sa) => {
                        sa.on = false;
                        ok()
                    }
                    None => fail(1, "RTNETLINK answers: No such file or directory"),
                }
            }
            ["macsec", "del", dev, "tx", "sa", an] => {
                let Ok(an) = an.parse::<u16>() else {
                    return fail(1, "invalid AN");
                };
                match state
                    .devices
                    .get_mut(*dev)
                    .and_then(|device| device.tx_sas.remove(&an))
                {
                    Some(_) => ok(),
                    None => fail(1, "RTNETLINK answers: No such file or directory"),
                }
            }
            ["macsec", "set", dev, "rx", "sci", sci, "off"] => {
                match state
                    .devices
                    .get_mut(*dev)
                    .and_then(|device| device.rx.get_mut(*sci))
                {
                    Some(sc) => {
                        sc.on = false;
                        ok()
                    }
                    None => fail(1, "RTNETLINK answers: No such file or directory"),
                }
            }
            ["macsec", "del", dev, "rx", "sci", sci] => {
                match state
                    .devices
                    .get_mut(*dev)
                    .and_then(|device| device.rx.remove(*sci))
                {
                    Some(_) => ok(),
                    None => fail(1, "RTNETLINK answers: No such file or directory"),
                }
            }
            ["macsec", "set", dev, "rx", "sci", sci, "sa", an, "off"] => {
                let Ok(an) = an.parse::<u16>() else {
                    return fail(1, "invalid AN");
                };
                match state
                    .devices
                    .get_mut(*dev)
                    .and_then(|device| device.rx.get_mut(*sci))
                    .and_then(|sc| sc.sas.get_mut(&an))
                {
                    Some(sa) => {
                        sa.on = false;
                        ok()
                    }
                    None => fail(1, "RTNETLINK answers: No such file or directory"),
                }
            }
            ["macsec", "del", dev, "rx", "sci", sci, "sa", an] => {
                let Ok(an) = an.parse::<u16>() else {
                    return fail(1, "invalid AN");
                };
                match state
                    .devices
                    .get_mut(*dev)
                    .and_then(|device| device.rx.get_mut(*sci))
                    .and_then(|sc| sc.sas.remove(&an))
                {
                    Some(_) => ok(),
                    None => fail(1, "RTNETLINK answers: No such file or directory"),
                }
            }
            ["macsec", "show"] => ExecResult::ok(
                state
                    .devices
                    .iter()
                    .map(|(name, device)| Self::render(name, device))
                    .collect::<String>(),
            ),
            ["macsec", "show", dev] => match state.devices.get(*dev) {
                Some(device) => ExecResult::ok(Self::render(dev, device)),
                None => fail(1, &format!("Device \"{}\" does not exist.", dev)),
            },
            other => fail(255, &format!("unsupported: {:?}", other)),
        }
    }
}

#[async_trait]
impl CommandExecutor for FakeIp {
    async fn exec(&self, cmd: &str) -> MacsecResult<ExecResult> {
        self.commands.lock().push(cmd.to_string());

        if self
            .failures
            .lock()
            .iter()
            .any(|prefix| cmd.starts_with(prefix.as_str()))
        {
            return Ok(fail(2, "injected failure"));
        }

        let tokens = tokenize(cmd);
        let mut stdout = String::new();

        for segment in tokens.split(|t| t == "&&") {
            let Some((tool, args)) = segment.split_first() else {
                continue;
            };
            if tool != IP {
                return Ok(fail(127, &format!("{}: not found", tool)));
            }
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let result = self.run_one(&args);
            if !result.success() {
                return Ok(result);
            }
            stdout.push_str(&result.stdout);
        }

        Ok(ExecResult::ok(stdout))
    }
}

/// Serves one end of a socketpair per MACsec device; the test keeps the other.
#[derive(Default)]
pub struct PairFactory {
    peers: Mutex<HashMap<String, UnixDatagram>>,
}

impl PairFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Kernel side of the MACsec socket for `device`.
    pub fn peer(&self, device: &str) -> Option<UnixDatagram> {
        self.peers
            .lock()
            .get(device)
            .and_then(|peer| peer.try_clone().ok())
    }
}

impl PacketSocketFactory for PairFactory {
    fn open(&self, interface: &str) -> MacsecResult<OwnedFd> {
        let (ours, peer) = UnixDatagram::pair()?;
        peer.set_read_timeout(Some(Duration::from_secs(5)))?;
        self.peers.lock().insert(interface.to_string(), peer);
        Ok(ours.into())
    }
}

/// Host interface backed by a socketpair; returns the tap's far end.
pub fn host_interface(name: &str) -> (Arc<HostInterfaceInfo>, UnixDatagram) {
    let (tap, tap_peer) = UnixDatagram::pair().unwrap();
    tap_peer
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    (HostInterfaceInfo::new(name, tap.into()), tap_peer)
}

pub fn manager(ip: &Arc<FakeIp>, factory: &Arc<PairFactory>) -> MacsecManager {
    MacsecManager::new(
        MacsecConfig::default(),
        Arc::clone(ip) as Arc<dyn CommandExecutor>,
        Arc::clone(factory) as Arc<dyn PacketSocketFactory>,
    )
    .unwrap()
}

/// Ethernet frame with the given EtherType.
pub fn frame(ether_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x52, 0x54, 0x00, 0xaa, 0xbb, 0xcc];
    frame.extend_from_slice(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    frame.extend_from_slice(&ether_type.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
