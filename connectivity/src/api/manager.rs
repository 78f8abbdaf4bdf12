use log::info;
use zbus::Connection;

use crate::Result;
use crate::api::models::NetworkingStatus;
use crate::core::counter::Counter;
use crate::core::property_watcher::{ObjectIdentity, PropertyProtocol, PropertyWatcher};
use crate::core::settings::{ConnectivitySettings, SettingsStore};
use crate::monitoring::active_connections::ActiveConnectionManager;
use crate::monitoring::kill_switch::{FlightModeToggle, KillSwitch, WifiToggle};
use crate::monitoring::links::LinkRegistry;
use crate::monitoring::sims::ModemManager;
use crate::monitoring::vpn::VpnManager;
use crate::types::constants::network_manager;

/// The whole connectivity model behind one handle.
///
/// Building one starts every monitoring task; they run until the last clone
/// of the returned handle (or of the component handles taken from it) is
/// dropped.
///
/// # Example
///
/// ```no_run
/// use connectivity::{ConnectivityManager, FileSettingsStore};
///
/// # async fn example() -> connectivity::Result<()> {
/// let store = FileSettingsStore::open("/tmp/connectivity")?;
/// let manager = ConnectivityManager::system(Box::new(store)).await?;
///
/// for link in manager.links().links() {
///     println!("{} {}", link.path(), link.status());
/// }
/// manager.set_wifi_enabled(true).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectivityManager {
    conn: Connection,
    links: LinkRegistry,
    active_connections: ActiveConnectionManager,
    vpn: VpnManager,
    sims: ModemManager,
    kill_switch: KillSwitch,
    wifi_toggle: WifiToggle,
    flight_mode: FlightModeToggle,
}

impl ConnectivityManager {
    /// Builds the model on the system bus.
    pub async fn system(store: Box<dyn SettingsStore>) -> Result<Self> {
        let conn = Connection::system().await?;
        Self::new(&conn, store).await
    }

    /// Builds the model on `conn`. SIM settings are kept in `store`.
    pub async fn new(conn: &Connection, store: Box<dyn SettingsStore>) -> Result<Self> {
        let (root, mut initial) = PropertyWatcher::new(
            conn,
            ObjectIdentity::new(
                network_manager::SERVICE,
                network_manager::INTERFACE,
                network_manager::PATH,
            ),
            PropertyProtocol::Freedesktop,
        )
        .await?;
        // Components read the root snapshot directly.
        while initial.try_recv().is_ok() {}

        let kill_switch = KillSwitch::new(conn).await?;
        let links = LinkRegistry::new(conn, root.clone(), kill_switch.clone()).await?;
        let active_connections = ActiveConnectionManager::new(conn, root.clone()).await?;
        let vpn = VpnManager::new(conn, active_connections.clone(), Counter::starting_at(1)).await?;
        let sims = ModemManager::new(conn, ConnectivitySettings::new(store)).await?;
        let wifi_toggle = WifiToggle::new(kill_switch.clone(), root);
        let flight_mode = FlightModeToggle::new(kill_switch.clone());

        info!(
            "Connectivity model ready: {} links, {} VPN connections, {} modems",
            links.links().len(),
            vpn.connections().len(),
            sims.modems().len()
        );

        Ok(Self {
            conn: conn.clone(),
            links,
            active_connections,
            vpn,
            sims,
            kill_switch,
            wifi_toggle,
            flight_mode,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn active_connections(&self) -> &ActiveConnectionManager {
        &self.active_connections
    }

    pub fn vpn(&self) -> &VpnManager {
        &self.vpn
    }

    pub fn sims(&self) -> &ModemManager {
        &self.sims
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub fn wifi_toggle(&self) -> &WifiToggle {
        &self.wifi_toggle
    }

    pub fn flight_mode(&self) -> &FlightModeToggle {
        &self.flight_mode
    }

    pub async fn set_wifi_enabled(&self, enabled: bool) -> Result<()> {
        self.wifi_toggle.set_enabled(enabled).await
    }

    pub async fn set_flight_mode(&self, enabled: bool) -> Result<()> {
        self.flight_mode.set_flight_mode(enabled).await
    }

    pub fn set_mobile_data_enabled(&self, enabled: bool) -> Result<()> {
        self.sims.set_mobile_data_enabled(enabled)
    }

    pub fn networking_status(&self) -> NetworkingStatus {
        self.links.networking_status()
    }
}
