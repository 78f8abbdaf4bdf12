//! Configured VPN connections, kept in sync with NetworkManager's settings
//! service.

use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;
use zbus::Connection;

use crate::Result;
use crate::api::models::{ConnectivityError, VpnType};
use crate::core::active_connections::ActiveConnectionEvent;
use crate::core::counter::Counter;
use crate::core::signal::Signal;
use crate::core::state_wait::wait_for_vpn_activation;
use crate::core::vpn::{VpnConnection, VpnConnectionSet, VpnEvent, new_connection_settings};
use crate::dbus::{
    ConnectionRemovedStream, NMSettingsConnectionProxy, NMSettingsProxy, NewConnectionStream,
    UpdatedStream,
};
use crate::monitoring::active_connections::ActiveConnectionManager;
use crate::util::utils::root_path;

struct Shared {
    conn: Connection,
    settings: NMSettingsProxy<'static>,
    active: ActiveConnectionManager,
    set: Mutex<VpnConnectionSet>,
    watches: Mutex<HashMap<String, DropGuard>>,
    counter: Counter,
    cancel: CancellationToken,
    events: Signal<VpnEvent>,
}

impl Shared {
    fn with_set<R>(&self, f: impl FnOnce(&mut VpnConnectionSet) -> R) -> Option<R> {
        self.set.lock().ok().map(|mut set| f(&mut set))
    }

    fn emit(&self, event: Option<VpnEvent>) {
        if let Some(event) = event {
            self.events.emit(event);
        }
    }

    fn update_activation(&self) {
        let active = self.active.connections();
        for event in self
            .with_set(|set| set.update_activation(&active))
            .unwrap_or_default()
        {
            self.events.emit(event);
        }
    }

    fn forget(&self, path: &str) {
        if let Ok(mut watches) = self.watches.lock() {
            watches.remove(path);
        }
        let event = self.with_set(|set| set.remove(path)).flatten();
        if event.is_some() {
            debug!("VPN connection {path} removed");
            self.emit(event);
            self.update_activation();
        }
    }

    fn path_of(&self, uuid: &str) -> Result<String> {
        self.with_set(|set| set.by_uuid(uuid).map(|c| c.path.clone()))
            .flatten()
            .ok_or(ConnectivityError::NoVpnConnection)
    }

    fn get(&self, uuid: &str) -> Result<VpnConnection> {
        self.with_set(|set| set.by_uuid(uuid).cloned())
            .flatten()
            .ok_or(ConnectivityError::NoVpnConnection)
    }
}

/// Every OpenVPN and PPTP connection NetworkManager has saved, with its
/// activation state.
#[derive(Clone)]
pub struct VpnManager {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for VpnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnManager")
            .field("connections", &self.connections().len())
            .finish_non_exhaustive()
    }
}

impl VpnManager {
    /// Loads the saved VPN connections and starts following changes.
    ///
    /// `counter` numbers the default names of connections created through
    /// [`add`](Self::add).
    pub async fn new(
        conn: &Connection,
        active: ActiveConnectionManager,
        counter: Counter,
    ) -> Result<Self> {
        let settings = NMSettingsProxy::new(conn).await?;

        // Subscribe to signals FIRST to avoid race condition
        let added = settings.receive_new_connection().await?;
        let removed = settings.receive_connection_removed().await?;
        let owners = settings.inner().receive_owner_changed().await?;
        let active_events = active.subscribe();

        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            conn: conn.clone(),
            settings,
            active,
            set: Mutex::new(VpnConnectionSet::new()),
            watches: Mutex::new(HashMap::new()),
            counter,
            cancel: cancel.clone(),
            events: Signal::new(),
        });
        load(&shared).await;

        tokio::spawn(run(shared.clone(), added, removed, owners, active_events));

        Ok(Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        })
    }

    pub fn subscribe(&self) -> UnboundedReceiver<VpnEvent> {
        self.shared.events.subscribe()
    }

    pub fn connections(&self) -> Vec<VpnConnection> {
        self.shared
            .with_set(|set| set.snapshot())
            .unwrap_or_default()
    }

    pub fn connection(&self, uuid: &str) -> Option<VpnConnection> {
        self.shared.get(uuid).ok()
    }

    /// Creates an empty connection of the given protocol. Returns its uuid.
    ///
    /// The new definition shows up in [`connections`](Self::connections)
    /// once NetworkManager announces it.
    pub async fn add(&self, kind: VpnType) -> Result<String> {
        let uuid = Uuid::new_v4().to_string();
        let settings = new_connection_settings(kind, self.shared.counter.next(), &uuid)?;
        let path = self.shared.settings.add_connection(settings).await?;
        info!("Added {kind} connection {uuid} at {}", path.as_str());
        Ok(uuid)
    }

    pub async fn remove(&self, uuid: &str) -> Result<()> {
        let proxy = self.settings_connection(uuid).await?;
        proxy.delete().await?;
        info!("Removed VPN connection {uuid}");
        Ok(())
    }

    pub async fn set_id(&self, uuid: &str, id: &str) -> Result<()> {
        let mut connection = self.shared.get(uuid)?;
        connection.id = id.to_owned();
        self.update(&connection).await
    }

    /// Writes the editable fields of `connection` back to NetworkManager.
    /// Sections this crate does not model are left as they are.
    pub async fn update(&self, connection: &VpnConnection) -> Result<()> {
        let proxy = self.settings_connection(&connection.uuid).await?;
        let mut settings = proxy.get_settings().await?;
        connection.merge_into(&mut settings)?;
        proxy.update(settings).await?;
        debug!("Updated VPN connection {}", connection.uuid);
        Ok(())
    }

    /// Activates or deactivates a connection.
    ///
    /// Activation is refused while another VPN connection is still changing
    /// state.
    pub async fn set_active(&self, uuid: &str, active: bool) -> Result<()> {
        let connection = self.shared.get(uuid)?;
        if active {
            if connection.is_active() {
                return Err(ConnectivityError::ToggleNoOp("active".into()));
            }
            if !connection.activatable {
                return Err(ConnectivityError::VpnBusy);
            }
            let root = root_path()?;
            let active_path = self
                .shared
                .active
                .activate(&connection.path, root.as_str(), root.as_str())
                .await?;
            debug!("VPN {uuid} activating as {active_path}");
        } else {
            let Some(active_path) = connection.active_connection else {
                return Err(ConnectivityError::ToggleNoOp("inactive".into()));
            };
            self.shared.active.deactivate(&active_path).await?;
        }
        Ok(())
    }

    /// Waits until the VPN active connection at `active_path` is up.
    pub async fn wait_for_activation(&self, active_path: &str, timeout: Duration) -> Result<()> {
        wait_for_vpn_activation(&self.shared.conn, active_path, timeout).await?;
        info!("VPN {active_path} activated");
        Ok(())
    }

    async fn settings_connection(&self, uuid: &str) -> Result<NMSettingsConnectionProxy<'static>> {
        let path = self.shared.path_of(uuid)?;
        Ok(NMSettingsConnectionProxy::builder(&self.shared.conn)
            .path(path)?
            .build()
            .await?)
    }
}

async fn load(shared: &Arc<Shared>) {
    match shared.settings.list_connections().await {
        Ok(paths) => {
            for path in paths {
                track(shared, path.as_str()).await;
            }
        }
        Err(e) => debug!("NetworkManager settings not available: {e}"),
    }
    shared.update_activation();
}

/// Reads one saved connection. Returns `None` when it is not a modelled VPN.
async fn read(
    proxy: &NMSettingsConnectionProxy<'static>,
    path: &str,
) -> Result<Option<VpnConnection>> {
    let settings = proxy.get_settings().await?;
    Ok(VpnConnection::from_settings(path, &settings))
}

async fn track(shared: &Arc<Shared>, path: &str) {
    let tracked = shared
        .watches
        .lock()
        .map(|w| w.contains_key(path))
        .unwrap_or(false);
    if tracked {
        return;
    }

    let started = async {
        let proxy = NMSettingsConnectionProxy::builder(&shared.conn)
            .path(path.to_owned())?
            .build()
            .await?;
        // Subscribe to signals FIRST to avoid race condition
        let updates = proxy.receive_updated().await?;
        let connection = read(&proxy, path).await?;
        Ok::<_, ConnectivityError>((proxy, updates, connection))
    };
    let (proxy, updates, connection) = match started.await {
        Ok(parts) => parts,
        Err(e) => {
            warn!("Failed to read connection {path}: {e}");
            return;
        }
    };
    let Some(connection) = connection else {
        return;
    };

    debug!("Tracking VPN connection {} ({})", connection.id, connection.uuid);
    shared.emit(shared.with_set(|set| set.upsert(connection)).flatten());
    shared.update_activation();

    let token = shared.cancel.child_token();
    if let Ok(mut watches) = shared.watches.lock() {
        watches.insert(path.to_owned(), token.clone().drop_guard());
    }
    tokio::spawn(watch_connection(
        shared.clone(),
        path.to_owned(),
        proxy,
        updates,
        token,
    ));
}

async fn watch_connection(
    shared: Arc<Shared>,
    path: String,
    proxy: NMSettingsConnectionProxy<'static>,
    mut updates: UpdatedStream,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = updates.next() => {
                if signal.is_none() {
                    break;
                }
                match read(&proxy, &path).await {
                    Ok(Some(connection)) => {
                        shared.emit(shared.with_set(|set| set.upsert(connection)).flatten());
                    }
                    Ok(None) => {
                        debug!("{path} is no longer a VPN connection");
                        shared.forget(&path);
                        break;
                    }
                    Err(e) => warn!("Failed to refresh {path}: {e}"),
                }
            }
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    mut added: NewConnectionStream,
    mut removed: ConnectionRemovedStream,
    mut owners: zbus::proxy::OwnerChangedStream<'static>,
    mut active_events: UnboundedReceiver<ActiveConnectionEvent>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            signal = added.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => track(&shared, args.connection.as_str()).await,
                    Err(e) => warn!("Malformed NewConnection: {e}"),
                },
                None => break,
            },
            signal = removed.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => shared.forget(args.connection.as_str()),
                    Err(e) => warn!("Malformed ConnectionRemoved: {e}"),
                },
                None => break,
            },
            owner = owners.next() => match owner {
                Some(Some(_)) => {
                    info!("NetworkManager restarted, reloading VPN connections");
                    let paths: Vec<String> = shared
                        .with_set(|set| set.snapshot().into_iter().map(|c| c.path).collect())
                        .unwrap_or_default();
                    for path in paths {
                        shared.forget(&path);
                    }
                    load(&shared).await;
                }
                Some(None) => debug!("NetworkManager settings went away"),
                None => break,
            },
            event = active_events.recv() => match event {
                Some(_) => shared.update_activation(),
                None => break,
            },
        }
    }
    debug!("VPN tracking stopped");
}
