//! MacsecManager implementation - kernel MACsec session management.
//!
//! Every provisioning call means "ensure this state holds": it first asks
//! the kernel (through `ip macsec show`) whether the device, SC or SA is
//! already there and only runs the mutating command when it is not. The
//! kernel is authoritative; the only local state is one
//! [`MacsecTrafficManager`] per MACsec device, holding the forwarder and the
//! two filters spliced into the host interface pipelines.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::commands;
use super::filter::MacsecFilter;
use super::forwarder::{MacsecForwarder, PacketSocketFactory, RawPacketSocketFactory};
use super::show;
use super::types::{An, MacsecAttr, MacsecDirection, Pn};
use crate::config::MacsecConfig;
use crate::error::{MacsecError, MacsecResult};
use crate::host_intf::{HostInterfaceInfo, IoctlPromiscuousMode};
use crate::shell::{CommandExecutor, ShellExecutor};
use crate::traffic_filter::TrafficFilter;

/// Per-device data path state.
///
/// Dropping an entry uninstalls both filters first; the forwarder is
/// declared last so it is stopped only after nothing can reach its socket.
pub struct MacsecTrafficManager {
    info: Arc<HostInterfaceInfo>,
    ingress_filter: Arc<dyn TrafficFilter>,
    egress_filter: Arc<dyn TrafficFilter>,
    forwarder: MacsecForwarder,
}

impl MacsecTrafficManager {
    /// Host interface the filters are installed on.
    pub fn info(&self) -> &Arc<HostInterfaceInfo> {
        &self.info
    }

    /// Forwarder draining the MACsec device into the tap.
    pub fn forwarder(&self) -> &MacsecForwarder {
        &self.forwarder
    }
}

impl Drop for MacsecTrafficManager {
    fn drop(&mut self) {
        self.info.uninstall_eth2tap_filter(&self.ingress_filter);
        self.info.uninstall_tap2eth_filter(&self.egress_filter);
    }
}

impl std::fmt::Debug for MacsecTrafficManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacsecTrafficManager")
            .field("interface", &self.info.name())
            .field("forwarder", &self.forwarder)
            .finish()
    }
}

/// MACsec session manager.
///
/// Drives kernel MACsec state with the `ip` tool and owns the traffic
/// manager entries. Provisioning methods take `&mut self`, so calls for one
/// manager are serialized by the borrow checker.
pub struct MacsecManager {
    config: MacsecConfig,
    executor: Arc<dyn CommandExecutor>,
    socket_factory: Arc<dyn PacketSocketFactory>,
    traffic_managers: HashMap<String, MacsecTrafficManager>,
}

impl MacsecManager {
    /// Creates a manager without touching the kernel.
    ///
    /// Call [`on_start`](Self::on_start) before provisioning anything.
    pub fn new(
        config: MacsecConfig,
        executor: Arc<dyn CommandExecutor>,
        socket_factory: Arc<dyn PacketSocketFactory>,
    ) -> MacsecResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            executor,
            socket_factory,
            traffic_managers: HashMap::new(),
        })
    }

    /// Manager backed by `/bin/sh` and real `AF_PACKET` sockets.
    pub fn with_system(config: MacsecConfig) -> MacsecResult<Self> {
        Self::new(
            config,
            Arc::new(ShellExecutor::new()),
            Arc::new(RawPacketSocketFactory::new(Arc::new(
                IoctlPromiscuousMode::new(),
            ))),
        )
    }

    /// Creates the manager and runs the startup sweep.
    pub async fn start(
        config: MacsecConfig,
        executor: Arc<dyn CommandExecutor>,
        socket_factory: Arc<dyn PacketSocketFactory>,
    ) -> MacsecResult<Self> {
        let mut mgr = Self::new(config, executor, socket_factory)?;
        mgr.on_start().await?;
        Ok(mgr)
    }

    /// Active configuration.
    pub fn config(&self) -> &MacsecConfig {
        &self.config
    }

    /// Removes MACsec devices left over from a previous run.
    pub async fn on_start(&mut self) -> MacsecResult<()> {
        if !self.config.cleanup_on_start {
            debug!("Startup cleanup disabled");
            return Ok(());
        }
        self.cleanup_macsec_devices().await.map(|_| ())
    }

    /// Tears down every traffic manager and, if configured, every MACsec device.
    pub async fn on_stop(&mut self) -> MacsecResult<()> {
        let count = self.traffic_managers.len();
        self.traffic_managers.clear();
        if count > 0 {
            info!(count = count, "Released MACsec traffic managers");
        }

        if !self.config.cleanup_on_stop {
            return Ok(());
        }
        self.cleanup_macsec_devices().await.map(|_| ())
    }

    /// Deletes every MACsec device the kernel reports.
    ///
    /// Failing to list devices is an error; failing to delete one is logged
    /// and the sweep moves on. Returns the number of devices deleted.
    #[instrument(skip(self))]
    pub async fn cleanup_macsec_devices(&self) -> MacsecResult<usize> {
        let cmd = commands::build_show_cmd(&self.config.ip_cmd, None);
        let dump = self.executor.exec_or_throw(&cmd).await.map_err(|e| {
            error!(error = %e, "Cannot show MACsec ports");
            e
        })?;

        let mut deleted = 0;
        for device in show::list_devices(&dump) {
            let cmd = commands::build_delete_link_cmd(&self.config.ip_cmd, &device);
            match self.executor.exec_or_throw(&cmd).await {
                Ok(_) => {
                    info!(device = %device, "Cleaned up MACsec interface");
                    deleted += 1;
                }
                Err(e) => {
                    warn!(device = %device, error = %e, "Cannot cleanup MACsec interface");
                }
            }
        }

        Ok(deleted)
    }

    // ---------------------------------------------------------------------
    // Provisioning
    // ---------------------------------------------------------------------

    /// Ensures the MACsec device exists, is up, and has a traffic manager.
    ///
    /// The egress SC is created implicitly with the device.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, veth = %attr.veth_name))]
    pub async fn create_macsec_port(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        attr.validate()?;

        if self.is_macsec_device_existing(&attr.macsec_name).await? {
            if !self.traffic_managers.contains_key(&attr.macsec_name) {
                self.add_macsec_traffic_manager(&attr.macsec_name, &attr.info)?;
            }
            return Ok(());
        }

        let cmd = commands::build_create_port_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await?;

        self.add_macsec_traffic_manager(&attr.macsec_name, &attr.info)
    }

    /// Ensures the SC described by `attr` exists.
    ///
    /// An egress SC exists exactly when its port does.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci, direction = %attr.direction))]
    pub async fn create_macsec_sc(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        let result = match attr.direction {
            MacsecDirection::Egress => self.create_macsec_port(attr).await,
            MacsecDirection::Ingress => self.create_macsec_ingress_sc(attr).await,
        };

        if let Err(ref e) = result {
            warn!(error = %e, "Cannot create MACsec {} SC", attr.direction);
        }
        result
    }

    /// Ensures the egress SA exists and is the encoding SA.
    ///
    /// Creates the port first when needed.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci, an = attr.an))]
    pub async fn create_macsec_egress_sa(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        attr.validate()?;

        if self
            .is_macsec_sa_existing(&attr.macsec_name, MacsecDirection::Egress, &attr.sci, attr.an)
            .await?
        {
            return Ok(());
        }

        self.create_macsec_port(attr).await.map_err(|e| {
            warn!(error = %e, "Cannot create MACsec device");
            e
        })?;

        let cmd = commands::build_create_egress_sa_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await
    }

    /// Ensures the ingress SC exists.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci))]
    pub async fn create_macsec_ingress_sc(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        attr.validate()?;

        if self
            .is_macsec_sc_existing(&attr.macsec_name, MacsecDirection::Ingress, &attr.sci)
            .await?
        {
            return Ok(());
        }

        let cmd = commands::build_create_ingress_sc_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await
    }

    /// Ensures the ingress SA exists, creating its SC first when needed.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci, an = attr.an))]
    pub async fn create_macsec_ingress_sa(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        attr.validate()?;

        if self
            .is_macsec_sa_existing(&attr.macsec_name, MacsecDirection::Ingress, &attr.sci, attr.an)
            .await?
        {
            return Ok(());
        }

        self.create_macsec_ingress_sc(attr).await.map_err(|e| {
            warn!(error = %e, "Cannot create MACsec ingress SC");
            e
        })?;

        let cmd = commands::build_create_ingress_sa_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await
    }

    /// Ensures the SA described by `attr` exists.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci, an = attr.an, direction = %attr.direction))]
    pub async fn create_macsec_sa(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        let result = match attr.direction {
            MacsecDirection::Egress => self.create_macsec_egress_sa(attr).await,
            MacsecDirection::Ingress => self.create_macsec_ingress_sa(attr).await,
        };

        if let Err(ref e) = result {
            warn!(error = %e, "Cannot create MACsec {} SA", attr.direction);
        }
        result
    }

    // ---------------------------------------------------------------------
    // Teardown
    // ---------------------------------------------------------------------

    /// Ensures the MACsec device is gone and its traffic manager released.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, veth = %attr.veth_name))]
    pub async fn delete_macsec_port(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        if !self.is_macsec_device_existing(&attr.macsec_name).await? {
            // Device already deleted; drop whatever data path it left behind.
            if self.traffic_managers.remove(&attr.macsec_name).is_some() {
                warn!("Released traffic manager of a vanished MACsec device");
            }
            return Ok(());
        }

        let cmd = commands::build_delete_port_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await?;

        match self.delete_macsec_traffic_manager(&attr.macsec_name) {
            Err(MacsecError::TrafficManagerNotFound { .. }) => Ok(()),
            other => other,
        }
    }

    /// Ensures the egress SA is disabled and deleted.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci, an = attr.an))]
    pub async fn delete_macsec_egress_sa(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        attr.validate()?;

        if !self
            .is_macsec_sa_existing(&attr.macsec_name, MacsecDirection::Egress, &attr.sci, attr.an)
            .await?
        {
            return Ok(());
        }

        let cmd = commands::build_delete_egress_sa_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await
    }

    /// Ensures the ingress SC is disabled and deleted.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci))]
    pub async fn delete_macsec_ingress_sc(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        attr.validate()?;

        if !self
            .is_macsec_sc_existing(&attr.macsec_name, MacsecDirection::Ingress, &attr.sci)
            .await?
        {
            return Ok(());
        }

        let cmd = commands::build_delete_ingress_sc_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await
    }

    /// Ensures the ingress SA is disabled and deleted.
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci, an = attr.an))]
    pub async fn delete_macsec_ingress_sa(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        attr.validate()?;

        if !self
            .is_macsec_sa_existing(&attr.macsec_name, MacsecDirection::Ingress, &attr.sci, attr.an)
            .await?
        {
            return Ok(());
        }

        let cmd = commands::build_delete_ingress_sa_cmd(&self.config.ip_cmd, attr);
        self.run(&cmd, attr).await
    }

    /// Ensures the SC described by `attr` is gone.
    ///
    /// The egress SC belongs to the port; removing it is a no-op here and
    /// happens in [`delete_macsec_port`](Self::delete_macsec_port).
    pub async fn delete_macsec_sc(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        match attr.direction {
            MacsecDirection::Egress => {
                debug!(device = %attr.macsec_name, "Egress SC is removed with its port");
                Ok(())
            }
            MacsecDirection::Ingress => self.delete_macsec_ingress_sc(attr).await,
        }
    }

    /// Ensures the SA described by `attr` is gone.
    pub async fn delete_macsec_sa(&mut self, attr: &MacsecAttr) -> MacsecResult<()> {
        match attr.direction {
            MacsecDirection::Egress => self.delete_macsec_egress_sa(attr).await,
            MacsecDirection::Ingress => self.delete_macsec_ingress_sa(attr).await,
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Current packet number of the SA described by `attr`.
    ///
    /// # Returns
    ///
    /// * `Ok(pn)` - the PN the kernel reports
    /// * `Err(ScNotFound | SaNotFound)` - the SC or SA is not present
    /// * `Err(PacketNumberNotFound)` - the SA line carried no PN
    #[instrument(skip(self, attr), fields(device = %attr.macsec_name, sci = %attr.sci, an = attr.an, direction = %attr.direction))]
    pub async fn get_macsec_sa_pn(&self, attr: &MacsecAttr) -> MacsecResult<Pn> {
        attr.validate()?;

        let Some(sc_block) = self
            .get_macsec_sc_info(&attr.macsec_name, attr.direction, &attr.sci)
            .await?
        else {
            warn!("MACsec SC is nonexisting");
            return Err(MacsecError::sc_not_found(&attr.macsec_name, &attr.sci));
        };

        let Some(sa_line) = show::find_sa_line(&sc_block, attr.an) else {
            warn!("MACsec SA is nonexisting");
            return Err(MacsecError::sa_not_found(&attr.macsec_name, &attr.sci, attr.an));
        };

        show::parse_packet_number(sa_line).ok_or_else(|| {
            warn!("The packet number isn't in the MACsec SA");
            MacsecError::PacketNumberNotFound {
                device: attr.macsec_name.clone(),
                sci: attr.sci.clone(),
                an: attr.an,
            }
        })
    }

    /// Block of `ip macsec show <device>` for the device, or `None` if absent.
    ///
    /// Output without the device's header line counts as absent.
    pub async fn get_macsec_device_info(&self, macsec_name: &str) -> MacsecResult<Option<String>> {
        let cmd = commands::build_show_cmd(&self.config.ip_cmd, Some(macsec_name));
        let result = self.executor.exec(&cmd).await?;

        if !result.success() {
            debug!(device = %macsec_name, exit_code = result.exit_code, "MACsec device not shown");
            return Ok(None);
        }

        Ok(show::find_device(&result.stdout, macsec_name).map(str::to_string))
    }

    /// Returns true if the kernel knows the MACsec device.
    pub async fn is_macsec_device_existing(&self, macsec_name: &str) -> MacsecResult<bool> {
        Ok(self.get_macsec_device_info(macsec_name).await?.is_some())
    }

    /// SC line plus its SA lines, or `None` if the device or SC is absent.
    pub async fn get_macsec_sc_info(
        &self,
        macsec_name: &str,
        direction: MacsecDirection,
        sci: &str,
    ) -> MacsecResult<Option<String>> {
        let Some(device) = self.get_macsec_device_info(macsec_name).await? else {
            return Ok(None);
        };

        Ok(show::find_sc_block(&device, direction, sci).map(str::to_string))
    }

    /// Returns true if the SC is present on the device.
    pub async fn is_macsec_sc_existing(
        &self,
        macsec_name: &str,
        direction: MacsecDirection,
        sci: &str,
    ) -> MacsecResult<bool> {
        Ok(self
            .get_macsec_sc_info(macsec_name, direction, sci)
            .await?
            .is_some())
    }

    /// SA line, or `None` if the device, SC or SA is absent.
    pub async fn get_macsec_sa_info(
        &self,
        macsec_name: &str,
        direction: MacsecDirection,
        sci: &str,
        an: An,
    ) -> MacsecResult<Option<String>> {
        let Some(sc_block) = self.get_macsec_sc_info(macsec_name, direction, sci).await? else {
            return Ok(None);
        };

        Ok(show::find_sa_line(&sc_block, an).map(|line| line.trim().to_string()))
    }

    /// Returns true if the SA is present in its SC.
    pub async fn is_macsec_sa_existing(
        &self,
        macsec_name: &str,
        direction: MacsecDirection,
        sci: &str,
        an: An,
    ) -> MacsecResult<bool> {
        Ok(self
            .get_macsec_sa_info(macsec_name, direction, sci, an)
            .await?
            .is_some())
    }

    /// Number of MACsec devices with an active data path.
    pub fn traffic_manager_count(&self) -> usize {
        self.traffic_managers.len()
    }

    /// Returns true if `macsec_name` has an active data path.
    pub fn has_traffic_manager(&self, macsec_name: &str) -> bool {
        self.traffic_managers.contains_key(macsec_name)
    }

    /// Traffic manager of `macsec_name`, if any.
    pub fn traffic_manager(&self, macsec_name: &str) -> Option<&MacsecTrafficManager> {
        self.traffic_managers.get(macsec_name)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Runs a mutating command; failures carry the redacted command line.
    async fn run(&self, cmd: &str, attr: &MacsecAttr) -> MacsecResult<()> {
        let shown = commands::redact_keys(cmd, attr);
        info!(command = %shown, "Executing MACsec command");

        let result = self.executor.exec(cmd).await.map_err(|e| match e {
            MacsecError::ShellExec { source, .. } => MacsecError::ShellExec {
                command: shown.clone(),
                source,
            },
            other => other,
        })?;

        if result.success() {
            return Ok(());
        }

        let err = MacsecError::ShellCommandFailed {
            command: shown,
            exit_code: result.exit_code,
            output: result.combined_output(),
        };
        error!(error = %err, "MACsec command failed");
        Err(err)
    }

    fn add_macsec_traffic_manager(
        &mut self,
        macsec_name: &str,
        info: &Arc<HostInterfaceInfo>,
    ) -> MacsecResult<()> {
        if self.traffic_managers.contains_key(macsec_name) {
            error!(device = %macsec_name, "MACsec traffic manager already exists");
            return Err(MacsecError::TrafficManagerExists {
                device: macsec_name.to_string(),
            });
        }

        let forwarder = MacsecForwarder::with_buffer_size(
            macsec_name,
            info.tap(),
            self.socket_factory.as_ref(),
            self.config.frame_buffer_size,
        )?;

        let ingress_filter: Arc<dyn TrafficFilter> = Arc::new(MacsecFilter::ingress(macsec_name));
        let egress_filter: Arc<dyn TrafficFilter> =
            Arc::new(MacsecFilter::egress(macsec_name, forwarder.socket()));

        let priority = self.config.priority();
        info.install_eth2tap_filter(priority, Arc::clone(&ingress_filter))?;
        if let Err(e) = info.install_tap2eth_filter(priority, Arc::clone(&egress_filter)) {
            info.uninstall_eth2tap_filter(&ingress_filter);
            return Err(e);
        }

        self.traffic_managers.insert(
            macsec_name.to_string(),
            MacsecTrafficManager {
                info: Arc::clone(info),
                ingress_filter,
                egress_filter,
                forwarder,
            },
        );

        info!(device = %macsec_name, interface = %info.name(), "Added MACsec traffic manager");
        Ok(())
    }

    fn delete_macsec_traffic_manager(&mut self, macsec_name: &str) -> MacsecResult<()> {
        match self.traffic_managers.remove(macsec_name) {
            Some(entry) => {
                drop(entry);
                info!(device = %macsec_name, "Deleted MACsec traffic manager");
                Ok(())
            }
            None => {
                error!(device = %macsec_name, "MACsec traffic manager doesn't exist");
                Err(MacsecError::TrafficManagerNotFound {
                    device: macsec_name.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for MacsecManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacsecManager")
            .field("config", &self.config)
            .field("traffic_managers", &self.traffic_managers)
            .finish()
    }
}
