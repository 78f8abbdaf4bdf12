//! Live registry of NetworkManager devices.
//!
//! One task follows `DeviceAdded`/`DeviceRemoved` and the kill switch; each
//! device then gets its own task fed by a [`PropertyWatcher`] on
//! `org.freedesktop.NetworkManager.Device`. Wi-Fi device tasks additionally
//! watch every access point the device reports and keep the link's
//! [`AccessPointGrouper`](crate::core::grouper::AccessPointGrouper) current.

use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::Connection;
use zvariant::{OwnedObjectPath, Value};

use crate::Result;
use crate::api::models::{ConnectivityError, KillSwitchState, LinkStatus, NetworkingStatus};
use crate::core::access_point::{AccessPoint, AccessPointKey};
use crate::core::grouper::GroupChange;
use crate::core::link::{
    CellularLinkState, Link, LinkState, WiredLinkState, networking_status_from_nm_state,
};
use crate::core::property_watcher::{
    ObjectIdentity, PropertyProtocol, PropertyWatcher, WatcherEvent,
};
use crate::core::signal::Signal;
use crate::core::wifi::WifiLinkState;
use crate::dbus::{
    AccessPointAddedStream, AccessPointRemovedStream, DeviceAddedStream, DeviceRemovedStream,
    NMProxy, NMSettingsConnectionProxy, NMWirelessProxy,
};
use crate::monitoring::kill_switch::{KillSwitch, KillSwitchEvent};
use crate::types::constants::{device_state, device_type, network_manager, setting};
use crate::util::utils::root_path;
use crate::util::variant::PropertyValue;

/// Changes published by the [`LinkRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A link appeared or disappeared.
    LinksUpdated,
    StatusChanged { path: String, status: LinkStatus },
    /// Interface name or other details of a link changed.
    LinkUpdated(String),
    /// The grouped access points of a Wi-Fi link changed.
    AccessPointsUpdated(String),
    ActiveAccessPointChanged(String),
    /// NetworkManager's global state moved to another [`NetworkingStatus`].
    NetworkingStatusChanged(NetworkingStatus),
}

struct Shared {
    conn: Connection,
    nm: NMProxy<'static>,
    network_manager: PropertyWatcher,
    kill_switch: KillSwitch,
    links: Mutex<BTreeMap<String, LinkState>>,
    devices: Mutex<HashMap<String, DropGuard>>,
    events: Signal<LinkEvent>,
}

impl Shared {
    fn with_link<R>(&self, path: &str, f: impl FnOnce(&mut LinkState) -> R) -> Option<R> {
        let mut links = self.links.lock().ok()?;
        links.get_mut(path).map(f)
    }

    fn with_wifi<R>(&self, path: &str, f: impl FnOnce(&mut WifiLinkState) -> R) -> Option<R> {
        self.with_link(path, |link| match link {
            LinkState::Wifi(wifi) => Some(f(wifi)),
            _ => None,
        })
        .flatten()
    }

    fn contains(&self, path: &str) -> bool {
        self.links
            .lock()
            .map(|links| links.contains_key(path))
            .unwrap_or(false)
    }

    fn emit_status(&self, path: &str, status: Option<LinkStatus>) {
        if let Some(status) = status {
            self.events.emit(LinkEvent::StatusChanged {
                path: path.to_owned(),
                status,
            });
        }
    }

    fn emit_group_change(&self, path: &str, change: GroupChange) {
        if change != GroupChange::Unchanged {
            self.events
                .emit(LinkEvent::AccessPointsUpdated(path.to_owned()));
        }
    }

    fn apply_kill_switch(&self, state: KillSwitchState) {
        let changes: Vec<(String, LinkStatus)> = match self.links.lock() {
            Ok(mut links) => links
                .iter_mut()
                .filter_map(|(path, link)| match link {
                    LinkState::Wifi(wifi) => {
                        wifi.set_kill_switch(state).map(|s| (path.clone(), s))
                    }
                    _ => None,
                })
                .collect(),
            Err(_) => return,
        };
        for (path, status) in changes {
            self.emit_status(&path, Some(status));
        }
    }

    fn remove_device(&self, path: &str) {
        let removed = self
            .links
            .lock()
            .map(|mut links| links.remove(path).is_some())
            .unwrap_or(false);
        // Dropping the guard stops the device task and its watchers.
        if let Ok(mut devices) = self.devices.lock() {
            devices.remove(path);
        }
        if removed {
            info!("Link {path} removed");
            self.events.emit(LinkEvent::LinksUpdated);
        }
    }
}

/// All network interfaces NetworkManager manages, kept in sync with the bus.
///
/// Dropping the last clone stops every task the registry spawned.
#[derive(Clone)]
pub struct LinkRegistry {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for LinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkRegistry")
            .field("links", &self.links().len())
            .finish_non_exhaustive()
    }
}

impl LinkRegistry {
    /// Starts tracking devices.
    ///
    /// `network_manager` is a watcher on the root NetworkManager object; it
    /// is used for the global `State` and for `WirelessEnabled`.
    pub async fn new(
        conn: &Connection,
        network_manager: PropertyWatcher,
        kill_switch: KillSwitch,
    ) -> Result<Self> {
        let nm = NMProxy::new(conn).await?;

        // Subscribe to signals FIRST to avoid race condition
        let added = nm.receive_device_added().await?;
        let removed = nm.receive_device_removed().await?;
        let owners = nm.inner().receive_owner_changed().await?;
        let kill_switch_events = kill_switch.subscribe();
        let root_events = network_manager.subscribe();

        let shared = Arc::new(Shared {
            conn: conn.clone(),
            nm,
            network_manager,
            kill_switch,
            links: Mutex::new(BTreeMap::new()),
            devices: Mutex::new(HashMap::new()),
            events: Signal::new(),
        });

        let cancel = CancellationToken::new();
        sync_devices(&shared, &cancel).await;

        tokio::spawn(run(
            shared.clone(),
            added,
            removed,
            owners,
            kill_switch_events,
            root_events,
            cancel.clone(),
        ));

        Ok(Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        })
    }

    pub fn subscribe(&self) -> UnboundedReceiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshots of every tracked link, ordered by device path.
    pub fn links(&self) -> Vec<Link> {
        self.shared
            .links
            .lock()
            .map(|links| links.values().map(LinkState::snapshot).collect())
            .unwrap_or_default()
    }

    pub fn link(&self, path: &str) -> Option<Link> {
        self.shared.with_link(path, |link| link.snapshot())
    }

    pub fn has_wifi(&self) -> bool {
        self.shared
            .links
            .lock()
            .map(|links| links.values().any(|l| matches!(l, LinkState::Wifi(_))))
            .unwrap_or(false)
    }

    /// Global connectivity derived from NetworkManager's `State`.
    pub fn networking_status(&self) -> NetworkingStatus {
        networking_status(&self.shared.network_manager)
    }

    /// Turns Wi-Fi on: lifts a software block, then enables wireless in
    /// NetworkManager.
    pub async fn enable_wifi(&self) -> Result<()> {
        match self.shared.kill_switch.state() {
            KillSwitchState::SoftBlocked | KillSwitchState::HardBlocked => {
                self.shared.kill_switch.unblock().await?
            }
            KillSwitchState::Unblocked | KillSwitchState::NotAvailable => {}
        }
        self.shared
            .network_manager
            .set("WirelessEnabled", PropertyValue::Bool(true));
        Ok(())
    }

    /// Turns Wi-Fi off by soft-blocking the radio. Without a kill switch,
    /// wireless is disabled in NetworkManager instead.
    pub async fn disable_wifi(&self) -> Result<()> {
        match self.shared.kill_switch.state() {
            KillSwitchState::Unblocked => self.shared.kill_switch.block().await,
            KillSwitchState::NotAvailable => {
                self.shared
                    .network_manager
                    .set("WirelessEnabled", PropertyValue::Bool(false));
                Ok(())
            }
            KillSwitchState::SoftBlocked | KillSwitchState::HardBlocked => Ok(()),
        }
    }

    /// Connects the Wi-Fi device at `device` to the network grouped under
    /// `key`.
    ///
    /// A saved connection with the same SSID is reused; otherwise a new one
    /// is created through `AddAndActivateConnection`. Returns the active
    /// connection path.
    pub async fn connect_to(&self, device: &str, key: &AccessPointKey) -> Result<String> {
        let specific = self
            .shared
            .with_wifi(device, |wifi| {
                wifi.group(key).map(|group| group.object_path().to_owned())
            })
            .ok_or_else(|| ConnectivityError::NotFound(format!("Wi-Fi link {device}")))?
            .ok_or_else(|| ConnectivityError::NotFound(format!("network on {device}")))?;

        let status = self.shared.with_wifi(device, |wifi| wifi.set_connecting(true));
        self.shared.emit_status(device, status.flatten());

        let result = self.activate_wifi(device, &specific, &key.ssid).await;
        if let Err(e) = &result {
            warn!("Failed to connect {device}: {e}");
            let status = self.shared.with_wifi(device, |wifi| wifi.set_connecting(false));
            self.shared.emit_status(device, status.flatten());
        }
        result
    }

    async fn activate_wifi(&self, device: &str, specific: &str, ssid: &[u8]) -> Result<String> {
        let device_path = OwnedObjectPath::try_from(device.to_owned())?;
        let specific_path = OwnedObjectPath::try_from(specific.to_owned())?;

        let candidates = self
            .shared
            .with_wifi(device, |wifi| wifi.available_connections().to_vec())
            .unwrap_or_default();
        if let Some(saved) = find_saved_wifi(&self.shared.conn, &candidates, ssid).await? {
            debug!("Activating saved connection {}", saved.as_str());
            let active = self
                .shared
                .nm
                .activate_connection(saved, device_path, specific_path)
                .await?;
            return Ok(active.to_string());
        }

        let mut connection = HashMap::new();
        connection.insert("type", Value::from(setting::WIRELESS));
        let mut wireless = HashMap::new();
        wireless.insert("ssid", Value::from(ssid.to_vec()));
        let settings = HashMap::from([(setting::CONNECTION, connection), (setting::WIRELESS, wireless)]);

        debug!("No saved connection, creating one");
        let (_, active) = self
            .shared
            .nm
            .add_and_activate_connection(settings, device_path, specific_path)
            .await?;
        Ok(active.to_string())
    }

    /// Activates a saved connection on a wired device.
    pub async fn activate_wired(&self, device: &str, connection: &str) -> Result<String> {
        let active = self
            .shared
            .nm
            .activate_connection(
                OwnedObjectPath::try_from(connection.to_owned())?,
                OwnedObjectPath::try_from(device.to_owned())?,
                root_path()?,
            )
            .await?;
        Ok(active.to_string())
    }
}

/// Finds, among the device's available connections, a saved Wi-Fi connection
/// whose SSID matches `ssid` byte for byte.
async fn find_saved_wifi(
    conn: &Connection,
    candidates: &[String],
    ssid: &[u8],
) -> Result<Option<OwnedObjectPath>> {
    for candidate in candidates {
        let path = OwnedObjectPath::try_from(candidate.clone())?;
        let proxy = NMSettingsConnectionProxy::builder(conn)
            .path(path.clone())?
            .build()
            .await?;
        let values = match proxy.get_settings().await {
            Ok(values) => values,
            Err(e) => {
                warn!("Failed to read settings of {}: {e}", path.as_str());
                continue;
            }
        };
        let matches = values
            .get(setting::WIRELESS)
            .and_then(|section| section.get("ssid"))
            .map(PropertyValue::from)
            .and_then(|value| value.as_bytes().map(|b| b == ssid))
            .unwrap_or(false);
        if matches {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn networking_status(network_manager: &PropertyWatcher) -> NetworkingStatus {
    let state = network_manager
        .get("State")
        .and_then(|v| v.as_u32())
        .unwrap_or(0);
    networking_status_from_nm_state(state)
}

async fn run(
    shared: Arc<Shared>,
    mut added: DeviceAddedStream,
    mut removed: DeviceRemovedStream,
    mut owners: zbus::proxy::OwnerChangedStream<'static>,
    mut kill_switch_events: UnboundedReceiver<KillSwitchEvent>,
    mut root_events: UnboundedReceiver<WatcherEvent>,
    cancel: CancellationToken,
) {
    let mut status = networking_status(&shared.network_manager);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = added.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => {
                        let path = args.device_path.to_string();
                        if let Err(e) = add_device(&shared, &path, &cancel).await {
                            warn!("Failed to track device {path}: {e}");
                        }
                    }
                    Err(e) => warn!("Malformed DeviceAdded: {e}"),
                },
                None => break,
            },
            signal = removed.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => shared.remove_device(args.device_path.as_str()),
                    Err(e) => warn!("Malformed DeviceRemoved: {e}"),
                },
                None => break,
            },
            owner = owners.next() => match owner {
                Some(Some(_)) => {
                    info!("NetworkManager restarted, reloading devices");
                    sync_devices(&shared, &cancel).await;
                }
                Some(None) => debug!("NetworkManager went away"),
                None => break,
            },
            event = kill_switch_events.recv() => match event {
                Some(KillSwitchEvent::StateChanged(state)) => shared.apply_kill_switch(state),
                Some(KillSwitchEvent::FlightModeChanged(_)) => {}
                None => break,
            },
            event = root_events.recv() => match event {
                Some(WatcherEvent::Changed { name, .. }) if name == "State" => {
                    let now = networking_status(&shared.network_manager);
                    if now != status {
                        status = now;
                        shared.events.emit(LinkEvent::NetworkingStatusChanged(now));
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    debug!("Link registry stopped");
}

/// Reconciles the tracked links with `GetDevices`.
async fn sync_devices(shared: &Arc<Shared>, cancel: &CancellationToken) {
    let devices = match shared.nm.get_devices().await {
        Ok(devices) => devices,
        Err(e) => {
            debug!("NetworkManager not available: {e}");
            return;
        }
    };
    let current: Vec<String> = devices.iter().map(|p| p.to_string()).collect();

    let stale: Vec<String> = shared
        .links
        .lock()
        .map(|links| {
            links
                .keys()
                .filter(|path| !current.contains(path))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    for path in stale {
        shared.remove_device(&path);
    }

    for path in current {
        if let Err(e) = add_device(shared, &path, cancel).await {
            warn!("Failed to track device {path}: {e}");
        }
    }
}

fn device_identity(interface: &str, path: &str) -> ObjectIdentity {
    ObjectIdentity::new(network_manager::SERVICE, interface, path)
}

async fn add_device(shared: &Arc<Shared>, path: &str, parent: &CancellationToken) -> Result<()> {
    if shared.contains(path) {
        return Ok(());
    }

    let (device, device_events) = PropertyWatcher::new(
        &shared.conn,
        device_identity(network_manager::DEVICE_INTERFACE, path),
        PropertyProtocol::Freedesktop,
    )
    .await?;
    let props = device.snapshot();
    let kind = props
        .get("DeviceType")
        .and_then(PropertyValue::as_u32)
        .unwrap_or(0);
    let name = props
        .get("Interface")
        .and_then(PropertyValue::as_str)
        .unwrap_or_default();

    let mut link = match kind {
        device_type::WIFI => LinkState::Wifi(WifiLinkState::new(
            path,
            name,
            shared.kill_switch.state(),
        )),
        device_type::ETHERNET => LinkState::Wired(WiredLinkState::new(path, name)),
        device_type::MODEM => {
            let mut cellular = CellularLinkState::new(path, name);
            let text = |key: &str| props.get(key).and_then(PropertyValue::as_str).unwrap_or_default();
            cellular.bind_modem(text("Driver"), text("Udi"));
            LinkState::Cellular(cellular)
        }
        other => {
            debug!("Ignoring device {path} of type {other}");
            return Ok(());
        }
    };

    let mut names: Vec<_> = props.keys().collect();
    names.sort();
    for name in names {
        link.apply_device_property(name, &props[name]);
    }
    let is_wifi = matches!(link, LinkState::Wifi(_));

    let token = parent.child_token();
    let wireless = if is_wifi {
        Some(WirelessWatch::new(&shared.conn, path).await?)
    } else {
        None
    };

    if let Ok(mut links) = shared.links.lock() {
        links.insert(path.to_owned(), link);
    }
    if let Ok(mut devices) = shared.devices.lock() {
        devices.insert(path.to_owned(), token.clone().drop_guard());
    }
    info!("Link {path} ({name}) added");
    shared.events.emit(LinkEvent::LinksUpdated);

    tokio::spawn(run_device(
        shared.clone(),
        path.to_owned(),
        device,
        device_events,
        wireless,
        token,
    ));
    Ok(())
}

fn handle_device_event(shared: &Shared, path: &str, event: WatcherEvent) {
    let WatcherEvent::Changed { name, value } = event else {
        return;
    };
    let Some(update) = shared.with_link(path, |link| {
        let mut update = link.apply_device_property(&name, &value);
        if let LinkState::Wifi(wifi) = link
            && name == "State"
            && wifi.is_connecting()
            && matches!(
                value.as_u32(),
                Some(device_state::ACTIVATED | device_state::FAILED)
            )
        {
            update.status = wifi.set_connecting(false).or(update.status);
        }
        update
    }) else {
        return;
    };
    shared.emit_status(path, update.status);
    if update.name || update.details {
        shared.events.emit(LinkEvent::LinkUpdated(path.to_owned()));
    }
}

/// Access-point bookkeeping of a Wi-Fi device task.
struct WirelessWatch {
    proxy: NMWirelessProxy<'static>,
    added: AccessPointAddedStream,
    removed: AccessPointRemovedStream,
    watcher: PropertyWatcher,
    events: UnboundedReceiver<WatcherEvent>,
    access_points: HashMap<String, PropertyWatcher>,
    ap_tx: UnboundedSender<(String, WatcherEvent)>,
    ap_rx: UnboundedReceiver<(String, WatcherEvent)>,
}

impl WirelessWatch {
    async fn new(conn: &Connection, path: &str) -> Result<Self> {
        let proxy = NMWirelessProxy::builder(conn)
            .path(path.to_owned())?
            .build()
            .await?;
        let added = proxy.receive_access_point_added().await?;
        let removed = proxy.receive_access_point_removed().await?;
        let (watcher, events) = PropertyWatcher::new(
            conn,
            device_identity(network_manager::WIRELESS_INTERFACE, path),
            PropertyProtocol::Freedesktop,
        )
        .await?;
        let (ap_tx, ap_rx) = unbounded_channel();
        Ok(Self {
            proxy,
            added,
            removed,
            watcher,
            events,
            access_points: HashMap::new(),
            ap_tx,
            ap_rx,
        })
    }

    async fn load(&mut self, shared: &Shared, device: &str) {
        match self.proxy.get_all_access_points().await {
            Ok(paths) => {
                for ap in paths {
                    self.add(shared, device, ap.as_str()).await;
                }
            }
            Err(e) => warn!("Failed to list access points of {device}: {e}"),
        }
    }

    async fn add(&mut self, shared: &Shared, device: &str, ap_path: &str) {
        if self.access_points.contains_key(ap_path) {
            return;
        }
        let (watcher, mut events) = match PropertyWatcher::new(
            &shared.conn,
            device_identity(network_manager::ACCESS_POINT_INTERFACE, ap_path),
            PropertyProtocol::Freedesktop,
        )
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Failed to watch access point {ap_path}: {e}");
                return;
            }
        };

        // The initial Changed events are already reflected in the snapshot.
        while events.try_recv().is_ok() {}
        regroup(shared, device, ap_path, &watcher);

        let tx = self.ap_tx.clone();
        let forward_path = ap_path.to_owned();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send((forward_path.clone(), event)).is_err() {
                    break;
                }
            }
        });
        self.access_points.insert(ap_path.to_owned(), watcher);
    }

    fn remove(&mut self, shared: &Shared, device: &str, ap_path: &str) {
        if self.access_points.remove(ap_path).is_none() {
            return;
        }
        let change = shared
            .with_wifi(device, |wifi| {
                if wifi.has_access_point(ap_path) {
                    wifi.remove_access_point(ap_path)
                } else {
                    GroupChange::Unchanged
                }
            })
            .unwrap_or(GroupChange::Unchanged);
        shared.emit_group_change(device, change);
    }

    fn handle_access_point(&self, shared: &Shared, device: &str, ap_path: &str, event: WatcherEvent) {
        let WatcherEvent::Changed { name, value } = event else {
            return;
        };
        let change = match name.as_str() {
            "Strength" => value.as_u8().and_then(|strength| {
                shared.with_wifi(device, |wifi| wifi.update_strength(ap_path, strength.min(100)))
            }),
            "LastSeen" => value
                .as_i64()
                .and_then(|t| u64::try_from(t).ok())
                .and_then(|t| {
                    shared.with_wifi(device, |wifi| wifi.update_last_connected(ap_path, t))
                }),
            "Ssid" | "WpaFlags" | "RsnFlags" | "Mode" => {
                if let Some(watcher) = self.access_points.get(ap_path) {
                    regroup(shared, device, ap_path, watcher);
                }
                None
            }
            _ => None,
        };
        if let Some(change) = change {
            shared.emit_group_change(device, change);
        }
    }

    fn handle_wireless(&self, shared: &Shared, device: &str, event: WatcherEvent) {
        if let WatcherEvent::Changed { name, value } = event
            && name == "ActiveAccessPoint"
        {
            let path = value.as_str().unwrap_or("/");
            if shared
                .with_wifi(device, |wifi| wifi.set_active_access_point(path))
                .unwrap_or(false)
            {
                shared
                    .events
                    .emit(LinkEvent::ActiveAccessPointChanged(device.to_owned()));
            }
        }
    }
}

/// (Re)files an access point under the group its current properties put it
/// in. Hidden networks are kept out of the grouper until they reveal an SSID.
fn regroup(shared: &Shared, device: &str, ap_path: &str, watcher: &PropertyWatcher) {
    let ap = AccessPoint::from_properties(ap_path, &watcher.snapshot());
    let change = shared.with_wifi(device, |wifi| {
        if ap.raw_ssid.is_empty() {
            debug!("Access point {ap_path} has no SSID");
            return Ok(if wifi.has_access_point(ap_path) {
                wifi.remove_access_point(ap_path)
            } else {
                GroupChange::Unchanged
            });
        }
        wifi.add_access_point(ap)
    });
    match change {
        Some(Ok(change)) => shared.emit_group_change(device, change),
        Some(Err(e)) => warn!("Failed to group access point {ap_path}: {e}"),
        None => {}
    }
}

async fn run_device(
    shared: Arc<Shared>,
    path: String,
    _device: PropertyWatcher,
    mut device_events: UnboundedReceiver<WatcherEvent>,
    wireless: Option<WirelessWatch>,
    cancel: CancellationToken,
) {
    let Some(mut wireless) = wireless else {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = device_events.recv() => match event {
                    Some(event) => handle_device_event(&shared, &path, event),
                    None => break,
                },
            }
        }
        return;
    };

    wireless.load(&shared, &path).await;
    if let Some(active) = wireless.watcher.get("ActiveAccessPoint") {
        wireless.handle_wireless(
            &shared,
            &path,
            WatcherEvent::Changed {
                name: "ActiveAccessPoint".into(),
                value: active,
            },
        );
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = device_events.recv() => match event {
                Some(event) => handle_device_event(&shared, &path, event),
                None => break,
            },
            event = wireless.events.recv() => match event {
                Some(event) => wireless.handle_wireless(&shared, &path, event),
                None => break,
            },
            signal = wireless.added.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => {
                        let ap = args.access_point.to_string();
                        wireless.add(&shared, &path, &ap).await;
                    }
                    Err(e) => warn!("Malformed AccessPointAdded: {e}"),
                },
                None => break,
            },
            signal = wireless.removed.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => wireless.remove(&shared, &path, args.access_point.as_str()),
                    Err(e) => warn!("Malformed AccessPointRemoved: {e}"),
                },
                None => break,
            },
            Some((ap, event)) = wireless.ap_rx.recv() => {
                wireless.handle_access_point(&shared, &path, &ap, event);
            }
        }
    }
    debug!("Stopped tracking {path}");
}
