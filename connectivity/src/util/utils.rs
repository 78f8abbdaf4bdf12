//! Utility functions for proxies and data conversion.
//!
//! Provides helpers for building untyped proxies against the services this
//! crate consumes and for decoding raw SSID bytes.

use std::str;
use zbus::Connection;
use zvariant::OwnedObjectPath;

use crate::Result;
use crate::types::constants::network_manager;

/// Helper to create an untyped proxy for any service, path and interface.
///
/// All arguments are owned so the proxy can outlive the caller's borrows
/// and be moved into background tasks.
pub(crate) async fn service_proxy(
    conn: &Connection,
    service: String,
    path: String,
    interface: String,
) -> Result<zbus::Proxy<'static>> {
    Ok(zbus::proxy::Builder::new(conn)
        .destination(service)?
        .path(path)?
        .interface(interface)?
        .cache_properties(zbus::proxy::CacheProperties::No)
        .build()
        .await?)
}

/// Helper to create a NetworkManager D-Bus proxy for a given path and interface.
pub(crate) async fn nm_proxy(
    conn: &Connection,
    path: impl Into<String>,
    interface: &str,
) -> Result<zbus::Proxy<'static>> {
    service_proxy(
        conn,
        network_manager::SERVICE.to_owned(),
        path.into(),
        interface.to_owned(),
    )
    .await
}

/// Helper to create a Settings proxy.
///
/// Used to list, add, and manage saved connection profiles.
pub(crate) async fn settings_proxy(conn: &Connection) -> Result<zbus::Proxy<'static>> {
    nm_proxy(
        conn,
        network_manager::SETTINGS_PATH,
        "org.freedesktop.NetworkManager.Settings",
    )
    .await
}

/// Helper to create a Settings.Connection proxy for a specific connection.
///
/// Used to read, update or delete one saved connection.
pub(crate) async fn connection_settings_proxy(
    conn: &Connection,
    connection_path: impl Into<String>,
) -> Result<zbus::Proxy<'static>> {
    nm_proxy(
        conn,
        connection_path,
        "org.freedesktop.NetworkManager.Settings.Connection",
    )
    .await
}

/// The `/` object path NetworkManager uses for "no object".
pub(crate) fn root_path() -> Result<OwnedObjectPath> {
    Ok(OwnedObjectPath::try_from("/")?)
}

/// Best-effort decoding of raw SSID bytes.
///
/// Valid UTF-8 is returned as-is. Otherwise printable ASCII bytes are kept
/// and everything else becomes U+FFFD.
pub fn decode_ssid(bytes: &[u8]) -> String {
    match str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => bytes
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    char::from(b)
                } else {
                    char::REPLACEMENT_CHARACTER
                }
            })
            .collect(),
    }
}

/// Parses the trailing decimal digits of an object path, e.g. `/ril_1` -> 1.
pub(crate) fn trailing_index(path: &str) -> Option<u32> {
    let digits: String = path
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Macro to convert Result to Option with error logging.
/// Usage: `try_log!(result, "context message")?`
#[macro_export]
macro_rules! try_log {
    ($result:expr, $context:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => {
                log::warn!("{}: {:?}", $context, e);
                return None;
            }
        }
    };
}
