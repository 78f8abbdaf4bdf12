//! Follows NetworkManager's `ActiveConnections` list.
//!
//! Every change of the root object's `ActiveConnections` property triggers
//! one reconciliation pass. New entries get a [`PropertyWatcher`] on
//! `org.freedesktop.NetworkManager.Connection.Active`, and VPN entries also
//! follow `VpnStateChanged`.

use futures::StreamExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::Connection;
use zvariant::{OwnedObjectPath, Value};

use crate::Result;
use crate::api::models::{VpnConnectionState, VpnConnectionStateReason};
use crate::core::active_connections::{
    ActiveConnection, ActiveConnectionEvent, ActiveConnectionSet, PropertyEffect,
};
use crate::core::property_watcher::{
    ObjectIdentity, PropertyProtocol, PropertyWatcher, WatcherEvent,
};
use crate::core::signal::Signal;
use crate::dbus::{NMProxy, NMVpnConnectionProxy, VpnConnectionStateChangedStream};
use crate::types::constants::network_manager;

const ACTIVE_CONNECTIONS: &str = "ActiveConnections";

struct Shared {
    conn: Connection,
    nm: NMProxy<'static>,
    network_manager: PropertyWatcher,
    set: Mutex<ActiveConnectionSet>,
    tasks: Mutex<HashMap<String, DropGuard>>,
    sync_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    changed: Signal<()>,
    events: Signal<ActiveConnectionEvent>,
}

impl Shared {
    fn with_set<R>(&self, f: impl FnOnce(&mut ActiveConnectionSet) -> R) -> Option<R> {
        self.set.lock().ok().map(|mut set| f(&mut set))
    }

    fn listed_paths(&self) -> Vec<String> {
        self.network_manager
            .get(ACTIVE_CONNECTIONS)
            .and_then(|v| v.as_str_list().map(<[String]>::to_vec))
            .unwrap_or_default()
    }
}

/// Live view of the connections NetworkManager currently has up or is
/// bringing up.
#[derive(Clone)]
pub struct ActiveConnectionManager {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for ActiveConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConnectionManager")
            .field("connections", &self.connections().len())
            .finish_non_exhaustive()
    }
}

impl ActiveConnectionManager {
    /// Starts tracking. `network_manager` watches the root NetworkManager
    /// object.
    pub async fn new(conn: &Connection, network_manager: PropertyWatcher) -> Result<Self> {
        let nm = NMProxy::new(conn).await?;
        let root_events = network_manager.subscribe();

        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            conn: conn.clone(),
            nm,
            network_manager,
            set: Mutex::new(ActiveConnectionSet::new()),
            tasks: Mutex::new(HashMap::new()),
            sync_lock: tokio::sync::Mutex::new(()),
            cancel: cancel.clone(),
            changed: Signal::new(),
            events: Signal::new(),
        });
        sync(&shared).await;

        tokio::spawn(run(shared.clone(), root_events));

        Ok(Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        })
    }

    /// Fires once per reconciliation pass that added or removed entries.
    pub fn subscribe_changed(&self) -> UnboundedReceiver<()> {
        self.shared.changed.subscribe()
    }

    /// Per-entry change stream.
    pub fn subscribe(&self) -> UnboundedReceiver<ActiveConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn connections(&self) -> Vec<ActiveConnection> {
        self.shared
            .with_set(|set| set.snapshot())
            .unwrap_or_default()
    }

    /// Returns the active connection at `path`, re-reading the list once if
    /// it is not tracked yet.
    pub async fn lookup(&self, path: &str) -> Option<ActiveConnection> {
        if let Some(found) = self.shared.with_set(|set| set.get(path).cloned()).flatten() {
            return Some(found);
        }
        debug!("Active connection {path} not tracked yet, re-syncing");
        sync(&self.shared).await;
        self.shared.with_set(|set| set.get(path).cloned()).flatten()
    }

    /// The active connection created from the saved connection at
    /// `connection_path`.
    pub fn by_connection(&self, connection_path: &str) -> Option<ActiveConnection> {
        self.shared
            .with_set(|set| set.by_connection(connection_path).cloned())
            .flatten()
    }

    pub async fn activate(&self, connection: &str, device: &str, specific: &str) -> Result<String> {
        let active = self
            .shared
            .nm
            .activate_connection(
                OwnedObjectPath::try_from(connection.to_owned())?,
                OwnedObjectPath::try_from(device.to_owned())?,
                OwnedObjectPath::try_from(specific.to_owned())?,
            )
            .await?;
        debug!("Activated {connection} as {}", active.as_str());
        Ok(active.to_string())
    }

    /// Creates a connection from `settings` and activates it. Returns the
    /// saved connection path and the active connection path.
    pub async fn add_and_activate(
        &self,
        settings: HashMap<&str, HashMap<&str, Value<'_>>>,
        device: &str,
        specific: &str,
    ) -> Result<(String, String)> {
        let (saved, active) = self
            .shared
            .nm
            .add_and_activate_connection(
                settings,
                OwnedObjectPath::try_from(device.to_owned())?,
                OwnedObjectPath::try_from(specific.to_owned())?,
            )
            .await?;
        Ok((saved.to_string(), active.to_string()))
    }

    pub async fn deactivate(&self, active_path: &str) -> Result<()> {
        self.shared
            .nm
            .deactivate_connection(OwnedObjectPath::try_from(active_path.to_owned())?)
            .await?;
        Ok(())
    }
}

async fn run(shared: Arc<Shared>, mut root_events: UnboundedReceiver<WatcherEvent>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            event = root_events.recv() => match event {
                Some(WatcherEvent::Changed { name, .. }) if name == ACTIVE_CONNECTIONS => {
                    sync(&shared).await
                }
                // A vanished NetworkManager takes its active connections along.
                Some(WatcherEvent::ServiceLost) => sync(&shared).await,
                Some(_) => {}
                None => break,
            },
        }
    }
    debug!("Active connection tracking stopped");
}

/// One reconciliation pass. Passes never interleave.
async fn sync(shared: &Arc<Shared>) {
    let _pass = shared.sync_lock.lock().await;
    let paths = shared.listed_paths();
    let Some(diff) = shared.with_set(|set| set.reconcile(&paths)) else {
        return;
    };
    if diff.is_empty() {
        return;
    }

    for path in &diff.removed {
        if let Ok(mut tasks) = shared.tasks.lock() {
            tasks.remove(path);
        }
        debug!("Active connection {path} gone");
        shared
            .events
            .emit(ActiveConnectionEvent::Removed(path.clone()));
    }

    for path in &diff.added {
        if let Err(e) = track(shared, path).await {
            warn!("Failed to track active connection {path}: {e}");
            // Picked up again by the next pass.
            shared.with_set(|set| set.remove(path));
            continue;
        }
        shared.events.emit(ActiveConnectionEvent::Added(path.clone()));
    }

    shared.changed.emit(());
}

async fn vpn_stream(
    conn: &Connection,
    path: &str,
) -> Result<(VpnConnectionStateChangedStream, VpnConnectionState)> {
    let proxy = NMVpnConnectionProxy::builder(conn)
        .path(path.to_owned())?
        .cache_properties(zbus::proxy::CacheProperties::No)
        .build()
        .await?;
    // Subscribe to signals FIRST to avoid race condition
    let stream = proxy.receive_vpn_connection_state_changed().await?;
    let state = VpnConnectionState::from(proxy.vpn_state().await?);
    Ok((stream, state))
}

/// Fills in a freshly reconciled entry and starts its task.
async fn track(shared: &Arc<Shared>, path: &str) -> Result<()> {
    let (watcher, mut events) = PropertyWatcher::new(
        &shared.conn,
        ObjectIdentity::new(
            network_manager::SERVICE,
            network_manager::ACTIVE_CONNECTION_INTERFACE,
            path,
        ),
        PropertyProtocol::Freedesktop,
    )
    .await?;
    // Already covered by the snapshot below.
    while events.try_recv().is_ok() {}

    let props = watcher.snapshot();
    let effect = shared
        .with_set(|set| set.get_mut(path).map(|c| c.apply_all(&props)))
        .flatten()
        .unwrap_or(PropertyEffect::Unchanged);

    let mut vpn = None;
    if effect == PropertyEffect::BecameVpn {
        vpn = start_vpn(shared, path).await;
    }

    let token = shared.cancel.child_token();
    if let Ok(mut tasks) = shared.tasks.lock() {
        tasks.insert(path.to_owned(), token.clone().drop_guard());
    }
    tokio::spawn(run_connection(
        shared.clone(),
        path.to_owned(),
        watcher,
        events,
        vpn,
        token,
    ));
    Ok(())
}

async fn start_vpn(shared: &Shared, path: &str) -> Option<VpnConnectionStateChangedStream> {
    let (stream, state) = crate::try_log!(
        vpn_stream(&shared.conn, path).await,
        format!("Failed to follow VPN state of {path}")
    );
    set_vpn_state(shared, path, state, VpnConnectionStateReason::Unknown);
    Some(stream)
}

fn set_vpn_state(
    shared: &Shared,
    path: &str,
    state: VpnConnectionState,
    reason: VpnConnectionStateReason,
) {
    let changed = shared
        .with_set(|set| set.get_mut(path).map(|c| c.set_vpn_state(state, reason)))
        .flatten()
        .unwrap_or(false);
    if changed {
        debug!("VPN {path} is {state} ({reason})");
        shared.events.emit(ActiveConnectionEvent::VpnStateChanged {
            path: path.to_owned(),
            state,
            reason,
        });
    }
}

async fn next_vpn_signal(
    stream: &mut Option<VpnConnectionStateChangedStream>,
) -> Option<crate::dbus::VpnConnectionStateChanged> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    path: String,
    _watcher: PropertyWatcher,
    mut events: UnboundedReceiver<WatcherEvent>,
    mut vpn: Option<VpnConnectionStateChangedStream>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(WatcherEvent::Changed { name, value }) => {
                    let effect = shared
                        .with_set(|set| set.get_mut(&path).map(|c| c.apply(&name, &value)))
                        .flatten()
                        .unwrap_or(PropertyEffect::Unchanged);
                    match effect {
                        PropertyEffect::Unchanged => continue,
                        PropertyEffect::Updated => {}
                        PropertyEffect::BecameVpn => vpn = start_vpn(&shared, &path).await,
                        PropertyEffect::LeftVpn => vpn = None,
                    }
                    shared.events.emit(ActiveConnectionEvent::Updated(path.clone()));
                }
                Some(_) => {}
                None => break,
            },
            signal = next_vpn_signal(&mut vpn) => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => set_vpn_state(
                        &shared,
                        &path,
                        VpnConnectionState::from(args.state),
                        VpnConnectionStateReason::from(args.reason),
                    ),
                    Err(e) => warn!("Malformed VpnStateChanged on {path}: {e}"),
                },
                None => vpn = None,
            },
        }
    }
}
