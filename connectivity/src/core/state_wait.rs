//! Signal-driven waits with bounded timeouts.
//!
//! Waits subscribe to the relevant signal before reading the current state
//! so a transition between the two cannot be missed. Timeouts use
//! `futures-timer` and do not depend on the tokio clock.

use futures::{FutureExt, StreamExt, select};
use futures_timer::Delay;
use log::{debug, warn};
use std::future::Future;
use std::pin::pin;
use std::time::Duration;
use zbus::Connection;

use crate::Result;
use crate::api::models::{ConnectivityError, VpnConnectionState, VpnConnectionStateReason};
use crate::dbus::NMVpnConnectionProxy;

fn vpn_failed(state: VpnConnectionState, reason: VpnConnectionStateReason) -> ConnectivityError {
    ConnectivityError::VpnFailed { state, reason }
}

/// Waits for the VPN on `active_path` to reach `Activated`.
///
/// `Failed` and `Disconnected` end the wait with
/// [`ConnectivityError::VpnFailed`] carrying the reason NetworkManager gave.
pub(crate) async fn wait_for_vpn_activation(
    conn: &Connection,
    active_path: &str,
    timeout: Duration,
) -> Result<()> {
    let vpn = NMVpnConnectionProxy::builder(conn)
        .path(active_path.to_owned())?
        .build()
        .await?;

    // Subscribe to signals FIRST to avoid race condition
    let mut stream = vpn.receive_vpn_connection_state_changed().await?;

    let state = VpnConnectionState::from(vpn.vpn_state().await?);
    debug!("VPN {active_path} is {state}");
    match state {
        VpnConnectionState::Activated => return Ok(()),
        VpnConnectionState::Failed | VpnConnectionState::Disconnected => {
            return Err(vpn_failed(state, VpnConnectionStateReason::Unknown));
        }
        _ => {}
    }

    let mut timeout_delay = pin!(Delay::new(timeout).fuse());

    loop {
        select! {
            _ = timeout_delay => {
                warn!("VPN activation timed out after {timeout:?}");
                return Err(ConnectivityError::Timeout);
            }
            signal_opt = stream.next() => {
                let Some(signal) = signal_opt else {
                    return Err(ConnectivityError::Stuck("VPN signal stream ended".into()));
                };
                let args = match signal.args() {
                    Ok(args) => args,
                    Err(e) => {
                        warn!("Failed to parse VpnStateChanged args: {e}");
                        continue;
                    }
                };
                let state = VpnConnectionState::from(args.state);
                let reason = VpnConnectionStateReason::from(args.reason);
                debug!("VPN {active_path} changed to {state} ({reason})");
                match state {
                    VpnConnectionState::Activated => return Ok(()),
                    VpnConnectionState::Failed | VpnConnectionState::Disconnected => {
                        return Err(vpn_failed(state, reason));
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Runs `fut` for at most `timeout`.
///
/// Used for the few startup calls that block progress, such as agent
/// registration.
pub(crate) async fn bounded<T, F>(fut: F, timeout: Duration, what: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let mut fut = pin!(fut.fuse());
    let mut timeout_delay = pin!(Delay::new(timeout).fuse());
    select! {
        result = fut => result,
        _ = timeout_delay => {
            warn!("{what} timed out after {timeout:?}");
            Err(ConnectivityError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded(async { Ok(7) }, Duration::from_secs(1), "test")
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let result: Result<()> = bounded(
            futures::future::pending(),
            Duration::from_millis(10),
            "pending",
        )
        .await;
        assert!(matches!(result, Err(ConnectivityError::Timeout)));
    }
}
