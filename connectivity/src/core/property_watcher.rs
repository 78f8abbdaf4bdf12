//! Cached view of one remote object's properties.
//!
//! A [`PropertyWatcher`] is bound to a single `(service, interface, path)`
//! identity. It fetches the full property set when the service appears,
//! applies change notifications to its cache and republishes only the
//! values that actually changed. When the owning service restarts the cache
//! is dropped and rebuilt from scratch.
//!
//! Two wire conventions are supported:
//!
//! - [`PropertyProtocol::Freedesktop`]: `org.freedesktop.DBus.Properties`
//!   (`GetAll`, `Get`, `Set`, `PropertiesChanged`). Used by NetworkManager
//!   and URfkill.
//! - [`PropertyProtocol::Ofono`]: per-interface `GetProperties`,
//!   `SetProperty` and `PropertyChanged(name, value)`.

use futures::StreamExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use zbus::Connection;
use zvariant::OwnedValue;

use crate::Result;
use crate::core::signal::Signal;
use crate::util::utils::service_proxy;
use crate::util::variant::{PropertyValue, property_map};

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// The remote object a watcher is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    pub service: String,
    pub interface: String,
    pub path: String,
}

impl ObjectIdentity {
    pub fn new(
        service: impl Into<String>,
        interface: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            interface: interface.into(),
            path: path.into(),
        }
    }
}

/// How properties are read, written and announced by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyProtocol {
    Freedesktop,
    Ofono,
}

/// Notification emitted by a [`PropertyWatcher`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEvent {
    /// A property's cached value changed, or was invalidated and re-fetched.
    Changed { name: String, value: PropertyValue },
    /// The first full property fetch completed. Emitted once per watcher.
    Initialized,
    /// The remote service went away and the cache was cleared.
    ServiceLost,
}

/// The property snapshot owned by one watcher.
///
/// Only the watcher's own change processing mutates it; readers get clones.
#[derive(Debug, Default)]
pub struct PropertyCache {
    values: HashMap<String, PropertyValue>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole cache, returning every entry sorted by name.
    pub fn replace_all(
        &mut self,
        values: HashMap<String, PropertyValue>,
    ) -> Vec<(String, PropertyValue)> {
        self.values = values;
        let mut entries: Vec<_> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Applies an update. Returns the value only when it differs from the
    /// cached one.
    pub fn apply(&mut self, name: &str, value: PropertyValue) -> Option<PropertyValue> {
        if self.values.get(name) == Some(&value) {
            return None;
        }
        self.values.insert(name.to_owned(), value.clone());
        Some(value)
    }

    /// Stores a re-fetched value unconditionally.
    pub fn store(&mut self, name: &str, value: PropertyValue) {
        self.values.insert(name.to_owned(), value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.values.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, PropertyValue> {
        self.values.clone()
    }
}

struct Shared {
    identity: ObjectIdentity,
    protocol: PropertyProtocol,
    cache: Mutex<PropertyCache>,
    events: Signal<WatcherEvent>,
    initialized: AtomicBool,
}

impl Shared {
    fn emit_all(&self, events: Vec<WatcherEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    fn mark_initialized(&self) {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            self.events.emit(WatcherEvent::Initialized);
        }
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut PropertyCache) -> R) -> Option<R> {
        self.cache.lock().ok().map(|mut cache| f(&mut cache))
    }
}

struct Inner {
    shared: Arc<Shared>,
    proxy: zbus::Proxy<'static>,
    cancel: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cached, self-healing view of a remote object's properties.
///
/// Cloning is cheap; the background task stops when the last clone is
/// dropped.
#[derive(Clone)]
pub struct PropertyWatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PropertyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyWatcher")
            .field("identity", &self.inner.shared.identity)
            .finish_non_exhaustive()
    }
}

impl PropertyWatcher {
    /// Creates a watcher and performs the initial fetch before returning.
    ///
    /// The returned receiver is subscribed before the first fetch, so it
    /// sees the initial `Changed` events followed by `Initialized`. A
    /// service that is not running yet is not an error; the watcher fills
    /// in once it appears.
    pub async fn new(
        conn: &Connection,
        identity: ObjectIdentity,
        protocol: PropertyProtocol,
    ) -> Result<(Self, UnboundedReceiver<WatcherEvent>)> {
        let control_interface = match protocol {
            PropertyProtocol::Freedesktop => PROPERTIES_INTERFACE.to_owned(),
            PropertyProtocol::Ofono => identity.interface.clone(),
        };
        let proxy = service_proxy(
            conn,
            identity.service.clone(),
            identity.path.clone(),
            control_interface,
        )
        .await?;

        let shared = Arc::new(Shared {
            identity,
            protocol,
            cache: Mutex::new(PropertyCache::new()),
            events: Signal::new(),
            initialized: AtomicBool::new(false),
        });
        let rx = shared.events.subscribe();

        // Subscribe before fetching so nothing emitted in between is lost.
        let owners = proxy.receive_owner_changed().await?;
        let changes = change_stream(&proxy, protocol).await?;

        match fetch_all(&proxy, &shared.identity, protocol).await {
            Ok(values) => refresh(&shared, values),
            Err(e) => debug!(
                "{} {} not available yet: {e}",
                shared.identity.service, shared.identity.path
            ),
        }

        let cancel = CancellationToken::new();
        tokio::spawn(run(
            shared.clone(),
            proxy.clone(),
            owners,
            changes,
            cancel.clone(),
        ));

        Ok((
            Self {
                inner: Arc::new(Inner {
                    shared,
                    proxy,
                    cancel,
                }),
            },
            rx,
        ))
    }

    pub fn identity(&self) -> &ObjectIdentity {
        &self.inner.shared.identity
    }

    /// Returns the cached value of a property.
    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.inner
            .shared
            .with_cache(|cache| cache.get(name).cloned())
            .flatten()
    }

    /// Returns a copy of the whole cache.
    pub fn snapshot(&self) -> HashMap<String, PropertyValue> {
        self.inner
            .shared
            .with_cache(|cache| cache.snapshot())
            .unwrap_or_default()
    }

    /// Whether the cache currently holds the remote object's properties.
    pub fn is_initialized(&self) -> bool {
        self.inner
            .shared
            .with_cache(|cache| !cache.is_empty())
            .unwrap_or(false)
    }

    /// Drops cached values so the next report of each is delivered even
    /// when it repeats the last one.
    pub fn forget(&self, names: &[&str]) {
        self.inner.shared.with_cache(|cache| {
            for name in names {
                cache.remove(name);
            }
        });
    }

    /// Subscribes to future change notifications.
    pub fn subscribe(&self) -> UnboundedReceiver<WatcherEvent> {
        self.inner.shared.events.subscribe()
    }

    /// Writes a property without waiting for the reply.
    ///
    /// The cache is not touched; it is reconciled through the change
    /// notification the service sends back. Writes of the value already
    /// cached are skipped.
    pub fn set(&self, name: &str, value: PropertyValue) {
        if self.get(name).as_ref() == Some(&value) {
            return;
        }
        let Some(variant) = value.to_value() else {
            warn!("Refusing to write unsupported value to property {name}");
            return;
        };

        let proxy = self.inner.proxy.clone();
        let shared = self.inner.shared.clone();
        let name = name.to_owned();
        tokio::spawn(async move {
            let result = match shared.protocol {
                PropertyProtocol::Freedesktop => {
                    proxy
                        .call_method(
                            "Set",
                            &(shared.identity.interface.as_str(), name.as_str(), &variant),
                        )
                        .await
                }
                PropertyProtocol::Ofono => {
                    proxy
                        .call_method("SetProperty", &(name.as_str(), &variant))
                        .await
                }
            };
            if let Err(e) = result {
                warn!(
                    "Failed to set {}.{name} on {}: {e}",
                    shared.identity.interface, shared.identity.path
                );
            }
        });
    }
}

type MessageStream = zbus::proxy::SignalStream<'static>;

async fn change_stream(
    proxy: &zbus::Proxy<'static>,
    protocol: PropertyProtocol,
) -> zbus::Result<MessageStream> {
    match protocol {
        PropertyProtocol::Freedesktop => proxy.receive_signal("PropertiesChanged").await,
        PropertyProtocol::Ofono => proxy.receive_signal("PropertyChanged").await,
    }
}

async fn fetch_all(
    proxy: &zbus::Proxy<'static>,
    identity: &ObjectIdentity,
    protocol: PropertyProtocol,
) -> Result<HashMap<String, PropertyValue>> {
    let reply = match protocol {
        PropertyProtocol::Freedesktop => {
            proxy
                .call_method("GetAll", &(identity.interface.as_str(),))
                .await?
        }
        PropertyProtocol::Ofono => proxy.call_method("GetProperties", &()).await?,
    };
    let raw: HashMap<String, OwnedValue> = reply.body().deserialize()?;
    Ok(property_map(raw))
}

async fn fetch_one(
    proxy: &zbus::Proxy<'static>,
    identity: &ObjectIdentity,
    name: &str,
) -> Result<PropertyValue> {
    let reply = proxy
        .call_method("Get", &(identity.interface.as_str(), name))
        .await?;
    let value: OwnedValue = reply.body().deserialize()?;
    Ok(PropertyValue::from(&value))
}

fn refresh(shared: &Shared, values: HashMap<String, PropertyValue>) {
    let entries = shared
        .with_cache(|cache| cache.replace_all(values))
        .unwrap_or_default();
    shared.emit_all(
        entries
            .into_iter()
            .map(|(name, value)| WatcherEvent::Changed { name, value })
            .collect(),
    );
    shared.mark_initialized();
}

async fn handle_change(shared: &Shared, proxy: &zbus::Proxy<'static>, msg: zbus::Message) {
    let identity = &shared.identity;
    let mut events = Vec::new();

    match shared.protocol {
        PropertyProtocol::Freedesktop => {
            let body = msg.body();
            let parsed: zbus::Result<(String, HashMap<String, OwnedValue>, Vec<String>)> =
                body.deserialize();
            let (interface, changed, invalidated) = match parsed {
                Ok(args) => args,
                Err(e) => {
                    warn!("Malformed PropertiesChanged from {}: {e}", identity.path);
                    return;
                }
            };
            if interface != identity.interface {
                return;
            }

            let mut names: Vec<_> = changed.keys().cloned().collect();
            names.sort();
            shared.with_cache(|cache| {
                for name in names {
                    if let Some(raw) = changed.get(&name)
                        && let Some(value) = cache.apply(&name, PropertyValue::from(raw))
                    {
                        events.push(WatcherEvent::Changed { name, value });
                    }
                }
            });

            for name in invalidated {
                match fetch_one(proxy, identity, &name).await {
                    Ok(value) => {
                        shared.with_cache(|cache| cache.store(&name, value.clone()));
                        events.push(WatcherEvent::Changed { name, value });
                    }
                    Err(e) => warn!(
                        "Failed to re-fetch invalidated property {name} on {}: {e}",
                        identity.path
                    ),
                }
            }
        }
        PropertyProtocol::Ofono => {
            let body = msg.body();
            let parsed: zbus::Result<(String, OwnedValue)> = body.deserialize();
            match parsed {
                Ok((name, raw)) => {
                    if let Some(Some(value)) =
                        shared.with_cache(|cache| cache.apply(&name, PropertyValue::from(&raw)))
                    {
                        events.push(WatcherEvent::Changed { name, value });
                    }
                }
                Err(e) => warn!("Malformed PropertyChanged from {}: {e}", identity.path),
            }
        }
    }

    shared.emit_all(events);
}

async fn run(
    shared: Arc<Shared>,
    proxy: zbus::Proxy<'static>,
    mut owners: zbus::proxy::OwnerChangedStream<'static>,
    mut changes: MessageStream,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            owner = owners.next() => match owner {
                Some(Some(owner)) => {
                    debug!(
                        "{} now owned by {owner}, reloading {}",
                        shared.identity.service, shared.identity.path
                    );
                    shared.with_cache(|cache| cache.clear());
                    match change_stream(&proxy, shared.protocol).await {
                        Ok(stream) => changes = stream,
                        Err(e) => warn!("Failed to resubscribe to {}: {e}", shared.identity.path),
                    }
                    match fetch_all(&proxy, &shared.identity, shared.protocol).await {
                        Ok(values) => refresh(&shared, values),
                        Err(e) => warn!("Failed to reload {}: {e}", shared.identity.path),
                    }
                }
                Some(None) => {
                    debug!("{} lost its owner", shared.identity.service);
                    shared.with_cache(|cache| cache.clear());
                    shared.events.emit(WatcherEvent::ServiceLost);
                }
                None => break,
            },
            msg = changes.next() => match msg {
                Some(msg) => handle_change(&shared, &proxy, msg).await,
                None => {
                    debug!("Change stream for {} ended", shared.identity.path);
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strength(v: u8) -> PropertyValue {
        PropertyValue::Byte(v)
    }

    #[test]
    fn apply_reports_only_differences() {
        let mut cache = PropertyCache::new();
        assert_eq!(cache.apply("Strength", strength(40)), Some(strength(40)));
        assert_eq!(cache.apply("Strength", strength(40)), None);
        assert_eq!(cache.apply("Strength", strength(41)), Some(strength(41)));
        assert_eq!(cache.get("Strength"), Some(&strength(41)));
    }

    #[test]
    fn removed_entry_is_reported_again() {
        let mut cache = PropertyCache::new();
        cache.apply("CardIdentifier", PropertyValue::from("8901"));
        assert_eq!(cache.remove("CardIdentifier"), Some(PropertyValue::from("8901")));
        assert_eq!(
            cache.apply("CardIdentifier", PropertyValue::from("8901")),
            Some(PropertyValue::from("8901"))
        );
    }

    #[test]
    fn replace_all_clears_stale_entries() {
        let mut cache = PropertyCache::new();
        cache.apply("Old", PropertyValue::Bool(true));

        let mut fresh = HashMap::new();
        fresh.insert("B".to_string(), PropertyValue::UInt32(2));
        fresh.insert("A".to_string(), PropertyValue::UInt32(1));
        let entries = cache.replace_all(fresh);

        assert_eq!(
            entries,
            vec![
                ("A".to_string(), PropertyValue::UInt32(1)),
                ("B".to_string(), PropertyValue::UInt32(2)),
            ]
        );
        assert!(cache.get("Old").is_none());
    }

    #[test]
    fn store_overwrites_without_comparison() {
        let mut cache = PropertyCache::new();
        cache.apply("State", PropertyValue::UInt32(100));
        cache.store("State", PropertyValue::UInt32(100));
        assert_eq!(cache.get("State"), Some(&PropertyValue::UInt32(100)));
    }

    #[test]
    fn empty_cache_is_uninitialized() {
        let mut cache = PropertyCache::new();
        assert!(cache.is_empty());
        cache.apply("Powered", PropertyValue::Bool(false));
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn refresh_emits_changes_then_initialized_once() {
        let shared = Shared {
            identity: ObjectIdentity::new("org.example", "org.example.Thing", "/thing"),
            protocol: PropertyProtocol::Freedesktop,
            cache: Mutex::new(PropertyCache::new()),
            events: Signal::new(),
            initialized: AtomicBool::new(false),
        };
        let mut rx = shared.events.subscribe();

        let mut values = HashMap::new();
        values.insert("Powered".to_string(), PropertyValue::Bool(true));
        refresh(&shared, values.clone());
        refresh(&shared, values);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                WatcherEvent::Changed {
                    name: "Powered".into(),
                    value: PropertyValue::Bool(true)
                },
                WatcherEvent::Initialized,
                WatcherEvent::Changed {
                    name: "Powered".into(),
                    value: PropertyValue::Bool(true)
                },
            ]
        );
    }
}
