//! oFono modems and the SIM cards in them.
//!
//! Each modem gets a task owning a watcher on `org.ofono.Modem`. The
//! `SimManager` and `ConnectionManager` watchers come and go with the
//! modem's `Interfaces`. Every update is fed into [`SimManagerState`];
//! the policy writes it asks for are issued on the modem's
//! `ConnectionManager`.

use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::Connection;

use crate::Result;
use crate::api::models::{ConnectivityError, PinType};
use crate::core::property_watcher::{
    ObjectIdentity, PropertyProtocol, PropertyWatcher, WatcherEvent,
};
use crate::core::settings::ConnectivitySettings;
use crate::core::signal::Signal;
use crate::core::sim::{
    CARD_PROPERTIES, Modem, Outcome, PinRequest, PolicyAction, Sim, SimEvent, SimManagerState,
    card_left, enter_pin_request, reset_pin_request,
};
use crate::dbus::{ModemAddedStream, ModemRemovedStream, OfonoManagerProxy, SimManagerProxy};
use crate::types::constants::ofono;
use crate::util::variant::PropertyValue;

struct Shared {
    conn: Connection,
    manager: OfonoManagerProxy<'static>,
    state: Mutex<SimManagerState>,
    modems: Mutex<HashMap<String, DropGuard>>,
    connection_managers: Mutex<HashMap<String, PropertyWatcher>>,
    cancel: CancellationToken,
    events: Signal<SimEvent>,
}

impl Shared {
    fn with_state<R>(&self, f: impl FnOnce(&mut SimManagerState) -> R) -> Result<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ConnectivityError::Stuck("SIM state lock poisoned".into()))?;
        Ok(f(&mut state))
    }

    /// Publishes the events of `outcome` and issues its policy writes.
    fn apply(&self, outcome: Outcome) {
        for (path, action) in outcome.actions {
            let watcher = self
                .connection_managers
                .lock()
                .ok()
                .and_then(|cms| cms.get(&path).cloned());
            let Some(watcher) = watcher else {
                debug!("{path} has no connection manager yet, deferring {action:?}");
                continue;
            };
            match action {
                PolicyAction::SetPowered(powered) => {
                    watcher.set("Powered", PropertyValue::Bool(powered))
                }
                PolicyAction::SetRoamingAllowed(allowed) => {
                    watcher.set("RoamingAllowed", PropertyValue::Bool(allowed))
                }
            }
        }
        for event in outcome.events {
            self.events.emit(event);
        }
    }

    fn feed(&self, f: impl FnOnce(&mut SimManagerState) -> Outcome) {
        match self.with_state(f) {
            Ok(outcome) => self.apply(outcome),
            Err(e) => warn!("Dropping SIM update: {e}"),
        }
    }

    fn remove_modem(&self, path: &str) {
        let tracked = self
            .modems
            .lock()
            .map(|mut modems| modems.remove(path).is_some())
            .unwrap_or(false);
        if let Ok(mut cms) = self.connection_managers.lock() {
            cms.remove(path);
        }
        if tracked {
            self.feed(|state| state.modem_removed(path));
        }
    }
}

/// Modems and SIM cards reported by oFono, plus the persisted per-SIM
/// policy.
#[derive(Clone)]
pub struct ModemManager {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for ModemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemManager")
            .field("modems", &self.modems().len())
            .finish_non_exhaustive()
    }
}

impl ModemManager {
    /// Loads the persisted SIM data from `settings` and starts following
    /// oFono. A missing oFono is not an error.
    pub async fn new(conn: &Connection, settings: ConnectivitySettings) -> Result<Self> {
        let manager = OfonoManagerProxy::new(conn).await?;

        // Subscribe to signals FIRST to avoid race condition
        let added = manager.receive_modem_added().await?;
        let removed = manager.receive_modem_removed().await?;
        let owners = manager.inner().receive_owner_changed().await?;

        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            conn: conn.clone(),
            manager,
            state: Mutex::new(SimManagerState::new(settings)),
            modems: Mutex::new(HashMap::new()),
            connection_managers: Mutex::new(HashMap::new()),
            cancel: cancel.clone(),
            events: Signal::new(),
        });
        load(&shared).await;

        tokio::spawn(run(shared.clone(), added, removed, owners));

        Ok(Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        })
    }

    pub fn subscribe(&self) -> UnboundedReceiver<SimEvent> {
        self.shared.events.subscribe()
    }

    pub fn modems(&self) -> Vec<Modem> {
        self.shared
            .with_state(|state| state.modems())
            .unwrap_or_default()
    }

    /// Every known SIM, present or not, in the order they were first seen.
    pub fn sims(&self) -> Vec<Sim> {
        self.shared
            .with_state(|state| state.sims())
            .unwrap_or_default()
    }

    pub fn sim(&self, iccid: &str) -> Option<Sim> {
        self.shared.with_state(|state| state.sim(iccid)).ok().flatten()
    }

    pub fn mobile_data_enabled(&self) -> bool {
        self.shared
            .with_state(|state| state.mobile_data_enabled())
            .unwrap_or(false)
    }

    pub fn sim_for_mobile_data(&self) -> Option<String> {
        self.shared
            .with_state(|state| state.sim_for_mobile_data().map(str::to_owned))
            .ok()
            .flatten()
    }

    pub fn set_mobile_data_enabled(&self, enabled: bool) -> Result<()> {
        let outcome = self
            .shared
            .with_state(|state| state.set_mobile_data_enabled(enabled))??;
        self.shared.apply(outcome);
        Ok(())
    }

    pub fn set_sim_for_mobile_data(&self, iccid: &str) -> Result<()> {
        let outcome = self
            .shared
            .with_state(|state| state.set_sim_for_mobile_data(iccid))??;
        self.shared.apply(outcome);
        Ok(())
    }

    pub fn set_data_roaming_enabled(&self, iccid: &str, enabled: bool) -> Result<()> {
        let outcome = self
            .shared
            .with_state(|state| state.set_data_roaming_enabled(iccid, enabled))??;
        self.shared.apply(outcome);
        Ok(())
    }

    /// Unlocks SIM `iccid` with a PIN or PUK. The new lock state arrives
    /// through the usual SIM updates.
    pub async fn enter_pin(&self, iccid: &str, pin_type: PinType, pin: &str) -> Result<()> {
        match enter_pin_request(pin_type, pin)? {
            Some(request) => self.send_pin(iccid, request).await,
            None => Ok(()),
        }
    }

    /// Unblocks SIM `iccid` with its PUK and sets a new PIN.
    pub async fn reset_pin(
        &self,
        iccid: &str,
        pin_type: PinType,
        puk: &str,
        new_pin: &str,
    ) -> Result<()> {
        match reset_pin_request(pin_type, puk, new_pin)? {
            Some(request) => self.send_pin(iccid, request).await,
            None => Ok(()),
        }
    }

    async fn send_pin(&self, iccid: &str, request: PinRequest) -> Result<()> {
        let path = self
            .shared
            .with_state(|state| state.sim_manager_of(iccid))??;
        let proxy = SimManagerProxy::builder(&self.shared.conn)
            .path(path.as_str())?
            .build()
            .await?;
        match &request {
            PinRequest::Enter { pin_type, pin } => {
                proxy.enter_pin(pin_type, pin).await?;
                info!("SIM {iccid} took its {pin_type}");
            }
            PinRequest::Reset {
                pin_type,
                puk,
                new_pin,
            } => {
                proxy.reset_pin(pin_type, puk, new_pin).await?;
                info!("SIM {iccid} PIN reset");
            }
        }
        Ok(())
    }
}

async fn load(shared: &Arc<Shared>) {
    match shared.manager.get_modems().await {
        Ok(modems) => {
            for (path, _) in modems {
                add_modem(shared, path.as_str()).await;
            }
        }
        Err(e) => debug!("oFono not available: {e}"),
    }
}

fn ofono_identity(interface: &str, path: &str) -> ObjectIdentity {
    ObjectIdentity::new(ofono::SERVICE, interface, path)
}

async fn watch(
    conn: &Connection,
    interface: &str,
    path: &str,
) -> Option<(PropertyWatcher, UnboundedReceiver<WatcherEvent>)> {
    match PropertyWatcher::new(conn, ofono_identity(interface, path), PropertyProtocol::Ofono).await
    {
        Ok(pair) => Some(pair),
        Err(e) => {
            warn!("Failed to watch {interface} on {path}: {e}");
            None
        }
    }
}

async fn add_modem(shared: &Arc<Shared>, path: &str) {
    let tracked = shared
        .modems
        .lock()
        .map(|m| m.contains_key(path))
        .unwrap_or(false);
    if tracked {
        return;
    }
    let Some((modem, events)) = watch(&shared.conn, ofono::MODEM_INTERFACE, path).await else {
        return;
    };

    shared.feed(|state| state.modem_added(path));
    let token = shared.cancel.child_token();
    if let Ok(mut modems) = shared.modems.lock() {
        modems.insert(path.to_owned(), token.clone().drop_guard());
    }
    info!("Modem {path} added");
    tokio::spawn(run_modem(shared.clone(), path.to_owned(), modem, events, token));
}

async fn recv(rx: &mut Option<UnboundedReceiver<WatcherEvent>>) -> Option<WatcherEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Starts or stops the per-interface watchers to match `interfaces`.
async fn sync_interfaces(
    shared: &Shared,
    path: &str,
    interfaces: &[String],
    sim: &mut Option<PropertyWatcher>,
    sim_events: &mut Option<UnboundedReceiver<WatcherEvent>>,
    connection_events: &mut Option<UnboundedReceiver<WatcherEvent>>,
) {
    let has = |name: &str| interfaces.iter().any(|i| i == name);

    if has(ofono::SIM_MANAGER_INTERFACE) {
        if sim.is_none()
            && let Some((watcher, rx)) =
                watch(&shared.conn, ofono::SIM_MANAGER_INTERFACE, path).await
        {
            *sim = Some(watcher);
            *sim_events = Some(rx);
        }
    } else if sim.take().is_some() {
        debug!("{path}: SimManager gone");
        *sim_events = None;
    }

    if has(ofono::CONNECTION_MANAGER_INTERFACE) {
        if connection_events.is_none()
            && let Some((watcher, rx)) =
                watch(&shared.conn, ofono::CONNECTION_MANAGER_INTERFACE, path).await
        {
            if let Ok(mut cms) = shared.connection_managers.lock() {
                cms.insert(path.to_owned(), watcher);
            }
            *connection_events = Some(rx);
        }
    } else if connection_events.take().is_some() {
        debug!("{path}: ConnectionManager gone");
        if let Ok(mut cms) = shared.connection_managers.lock() {
            cms.remove(path);
        }
    }
}

async fn run_modem(
    shared: Arc<Shared>,
    path: String,
    _modem: PropertyWatcher,
    mut modem_events: UnboundedReceiver<WatcherEvent>,
    cancel: CancellationToken,
) {
    let mut sim: Option<PropertyWatcher> = None;
    let mut sim_events: Option<UnboundedReceiver<WatcherEvent>> = None;
    let mut connection_events: Option<UnboundedReceiver<WatcherEvent>> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = modem_events.recv() => match event {
                Some(WatcherEvent::Changed { name, value }) => {
                    let outcome = shared.with_state(|state| state.modem_property(&path, &name, &value));
                    if name == "Interfaces" {
                        let interfaces = value.as_str_list().unwrap_or_default().to_vec();
                        sync_interfaces(
                            &shared,
                            &path,
                            &interfaces,
                            &mut sim,
                            &mut sim_events,
                            &mut connection_events,
                        )
                        .await;
                    }
                    // Applied after the watchers exist so policy writes
                    // reach a fresh ConnectionManager.
                    match outcome {
                        Ok(outcome) => shared.apply(outcome),
                        Err(e) => warn!("Dropping modem update: {e}"),
                    }
                }
                Some(_) => {}
                None => break,
            },
            event = recv(&mut sim_events) => match event {
                Some(WatcherEvent::Changed { name, value }) => {
                    shared.feed(|state| state.sim_property(&path, &name, &value));
                    if card_left(&name, &value)
                        && let Some(sim) = &sim
                    {
                        // The same card may come back reporting identical values.
                        sim.forget(CARD_PROPERTIES);
                    }
                }
                Some(_) => {}
                None => sim_events = None,
            },
            event = recv(&mut connection_events) => match event {
                Some(WatcherEvent::Changed { name, value }) => {
                    shared.feed(|state| state.connection_property(&path, &name, &value));
                }
                Some(_) => {}
                None => connection_events = None,
            },
        }
    }

    if let Ok(mut cms) = shared.connection_managers.lock() {
        cms.remove(&path);
    }
    debug!("Stopped tracking modem {path}");
}

async fn run(
    shared: Arc<Shared>,
    mut added: ModemAddedStream,
    mut removed: ModemRemovedStream,
    mut owners: zbus::proxy::OwnerChangedStream<'static>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            signal = added.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => add_modem(&shared, args.path.as_str()).await,
                    Err(e) => warn!("Malformed ModemAdded: {e}"),
                },
                None => break,
            },
            signal = removed.next() => match signal {
                Some(signal) => match signal.args() {
                    Ok(args) => {
                        info!("Modem {} removed", args.path.as_str());
                        shared.remove_modem(args.path.as_str());
                    }
                    Err(e) => warn!("Malformed ModemRemoved: {e}"),
                },
                None => break,
            },
            owner = owners.next() => match owner {
                Some(owner) => {
                    let paths: Vec<String> = shared
                        .modems
                        .lock()
                        .map(|m| m.keys().cloned().collect())
                        .unwrap_or_default();
                    for path in paths {
                        shared.remove_modem(&path);
                    }
                    if owner.is_some() {
                        info!("oFono restarted, reloading modems");
                        load(&shared).await;
                    }
                }
                None => break,
            },
        }
    }
    debug!("Modem tracking stopped");
}
