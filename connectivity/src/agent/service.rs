//! Puts a [`SecretAgent`] on the bus.
//!
//! Method calls on the agent object are dispatched by hand from a
//! [`MessageStream`] rather than through the object server, so a
//! `GetSecrets` reply can be sent whenever the prompt resolves, or never.

use async_trait::async_trait;
use futures::{FutureExt, Stream, StreamExt, select};
use futures_timer::Delay;
use log::{debug, error, info, warn};
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::message::Type as MessageType;
use zbus::{Connection, Message, MessageStream};
use zvariant::OwnedObjectPath;

use crate::Result;
use crate::agent::secret_agent::SecretAgent;
use crate::agent::secret_request::SecretRequest;
use crate::api::models::ConnectivityError;
use crate::dbus::NMAgentManagerProxy;
use crate::types::constants::secret_agent;
use crate::types::constants::timeouts::REGISTRATION_TIMEOUT;
use crate::util::variant::SettingsMap;

/// Where an agent registers itself.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, identifier: &str) -> Result<()>;

    async fn unregister(&self) -> Result<()>;
}

#[async_trait]
impl Registrar for NMAgentManagerProxy<'static> {
    async fn register(&self, identifier: &str) -> Result<()> {
        Ok(NMAgentManagerProxy::register(self, identifier).await?)
    }

    async fn unregister(&self) -> Result<()> {
        Ok(NMAgentManagerProxy::unregister(self).await?)
    }
}

async fn bounded<T>(call: impl Future<Output = Result<T>>, what: &str) -> Result<T> {
    let mut call = pin!(call.fuse());
    let mut delay = pin!(Delay::new(REGISTRATION_TIMEOUT).fuse());
    select! {
        result = call => result,
        _ = delay => {
            warn!("{what} timed out after {REGISTRATION_TIMEOUT:?}");
            Err(ConnectivityError::Timeout)
        }
    }
}

/// Keeps an agent registered under one identifier.
#[derive(Debug)]
pub struct AgentRegistration<R> {
    registrar: R,
    identifier: String,
}

impl<R: Registrar> AgentRegistration<R> {
    pub fn new(registrar: R, identifier: impl Into<String>) -> Self {
        Self {
            registrar,
            identifier: identifier.into(),
        }
    }

    pub fn registrar(&self) -> &R {
        &self.registrar
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub async fn register(&self) -> Result<()> {
        bounded(self.registrar.register(&self.identifier), "agent registration").await?;
        info!("Secret agent registered as {}", self.identifier);
        Ok(())
    }

    pub async fn unregister(&self) -> Result<()> {
        bounded(self.registrar.unregister(), "agent unregistration").await?;
        info!("Secret agent {} unregistered", self.identifier);
        Ok(())
    }

    /// Registers again every time `owners` reports that the agent manager
    /// has a new owner.
    ///
    /// Registrations do not survive a NetworkManager restart. Runs until
    /// `owners` ends or `cancel` fires.
    pub async fn follow<S>(&self, owners: S, cancel: CancellationToken)
    where
        S: Stream<Item = bool>,
    {
        let mut owners = pin!(owners);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                owner = owners.next() => match owner {
                    Some(true) => {
                        info!("Agent manager restarted, registering again");
                        if let Err(e) = self.register().await {
                            error!("Failed to register secret agent again: {e}");
                        }
                    }
                    Some(false) => debug!("Agent manager went away"),
                    None => break,
                },
            }
        }
    }
}

/// The exported agent object plus its registration.
pub struct SecretAgentService {
    agent: SecretAgent,
    registration: Arc<AgentRegistration<NMAgentManagerProxy<'static>>>,
    _guard: DropGuard,
}

impl std::fmt::Debug for SecretAgentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretAgentService")
            .field("identifier", &self.registration.identifier())
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl SecretAgentService {
    /// Exports `agent` and registers it under `identifier`.
    ///
    /// Fails if NetworkManager does not accept the registration within
    /// [`REGISTRATION_TIMEOUT`].
    pub async fn start(conn: &Connection, agent: SecretAgent, identifier: &str) -> Result<Self> {
        // Subscribe to signals FIRST to avoid race condition
        let calls = MessageStream::from(conn);
        let manager = NMAgentManagerProxy::new(conn).await?;
        let owners = manager.inner().receive_owner_changed().await?;

        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        tokio::spawn(dispatch(conn.clone(), agent.clone(), calls, cancel.clone()));

        let registration = Arc::new(AgentRegistration::new(manager, identifier));
        registration.register().await?;

        let follower = registration.clone();
        tokio::spawn(async move {
            follower
                .follow(owners.map(|owner| owner.is_some()), cancel)
                .await;
        });

        Ok(Self {
            agent,
            registration,
            _guard: guard,
        })
    }

    pub fn agent(&self) -> &SecretAgent {
        &self.agent
    }

    /// Unregisters and stops answering calls.
    pub async fn stop(self) -> Result<()> {
        self.registration.unregister().await
    }
}

async fn dispatch(
    conn: Connection,
    agent: SecretAgent,
    mut calls: MessageStream,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = calls.next() => match msg {
                Some(Ok(msg)) => {
                    if let Err(e) = handle(&conn, &agent, msg).await {
                        warn!("Failed to answer secret agent call: {e}");
                    }
                }
                Some(Err(e)) => warn!("Bad message on agent connection: {e}"),
                None => break,
            },
        }
    }
    debug!("Secret agent dispatcher stopped");
}

/// A call on the agent object, with its arguments decoded.
#[derive(Debug)]
enum AgentCall {
    GetSecrets(SecretRequest),
    CancelGetSecrets {
        connection_path: String,
        setting_name: String,
    },
    SaveSecrets {
        connection_path: String,
    },
    DeleteSecrets {
        connection_path: String,
    },
}

fn is_agent_call(msg: &Message) -> bool {
    let header = msg.header();
    header.message_type() == MessageType::MethodCall
        && header.path().map(|p| p.as_str()) == Some(secret_agent::PATH)
}

fn args<T>(msg: &Message) -> std::result::Result<T, zbus::fdo::Error>
where
    T: for<'d> serde::Deserialize<'d> + zvariant::Type,
{
    msg.body()
        .deserialize::<T>()
        .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

/// Decodes `msg`. `Ok(None)` for anything that is not a method call on the
/// agent object; `Err` is the error reply to send.
fn decode(msg: &Message) -> std::result::Result<Option<AgentCall>, zbus::fdo::Error> {
    if !is_agent_call(msg) {
        return Ok(None);
    }
    let header = msg.header();
    if let Some(interface) = header.interface()
        && interface.as_str() != secret_agent::INTERFACE
    {
        return Err(zbus::fdo::Error::UnknownInterface(interface.to_string()));
    }
    let member = header.member().map(|m| m.as_str()).unwrap_or_default();

    let call = match member {
        "GetSecrets" => {
            let (connection, path, setting_name, hints, flags) =
                args::<(SettingsMap, OwnedObjectPath, String, Vec<String>, u32)>(msg)?;
            AgentCall::GetSecrets(SecretRequest {
                connection,
                connection_path: path.to_string(),
                setting_name,
                hints,
                flags,
            })
        }
        "CancelGetSecrets" => {
            let (path, setting_name) = args::<(OwnedObjectPath, String)>(msg)?;
            AgentCall::CancelGetSecrets {
                connection_path: path.to_string(),
                setting_name,
            }
        }
        "SaveSecrets" => {
            let (_, path) = args::<(SettingsMap, OwnedObjectPath)>(msg)?;
            AgentCall::SaveSecrets {
                connection_path: path.to_string(),
            }
        }
        "DeleteSecrets" => {
            let (_, path) = args::<(SettingsMap, OwnedObjectPath)>(msg)?;
            AgentCall::DeleteSecrets {
                connection_path: path.to_string(),
            }
        }
        other => return Err(zbus::fdo::Error::UnknownMethod(other.to_owned())),
    };
    Ok(Some(call))
}

async fn handle(conn: &Connection, agent: &SecretAgent, msg: Message) -> Result<()> {
    let header = msg.header();
    let call = match decode(&msg) {
        Ok(Some(call)) => call,
        Ok(None) => return Ok(()),
        Err(e) => {
            debug!("Rejecting agent call: {e}");
            conn.reply_dbus_error(&header, e).await?;
            return Ok(());
        }
    };

    match call {
        AgentCall::GetSecrets(request) => match agent.get_secrets(request) {
            Err(e) => conn.reply_dbus_error(&header, e).await?,
            Ok(reply) => {
                let conn = conn.clone();
                let msg = msg.clone();
                tokio::spawn(async move {
                    let header = msg.header();
                    let sent = match reply.await {
                        Ok(Ok(settings)) => conn.reply(&header, &settings).await,
                        Ok(Err(e)) => conn.reply_dbus_error(&header, e).await,
                        Err(_) => {
                            debug!("GetSecrets cancelled, not replying");
                            Ok(())
                        }
                    };
                    if let Err(e) = sent {
                        warn!("Failed to send GetSecrets reply: {e}");
                    }
                });
            }
        },
        AgentCall::CancelGetSecrets {
            connection_path,
            setting_name,
        } => {
            agent
                .cancel_get_secrets(&connection_path, &setting_name)
                .await;
            conn.reply(&header, &()).await?;
        }
        AgentCall::SaveSecrets { connection_path } => {
            agent.save_secrets(&connection_path);
            conn.reply(&header, &()).await?;
        }
        AgentCall::DeleteSecrets { connection_path } => {
            agent.delete_secrets(&connection_path);
            conn.reply(&header, &()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use zvariant::ObjectPath;

    #[derive(Default)]
    struct FlakyRegistrar {
        calls: Mutex<Vec<String>>,
        fail_next: Mutex<bool>,
    }

    #[async_trait]
    impl Registrar for FlakyRegistrar {
        async fn register(&self, identifier: &str) -> Result<()> {
            self.calls.lock().unwrap().push(identifier.to_owned());
            let mut fail = self.fail_next.lock().unwrap();
            if std::mem::take(&mut *fail) {
                return Err(ConnectivityError::Refused("agent manager".into()));
            }
            Ok(())
        }

        async fn unregister(&self) -> Result<()> {
            Ok(())
        }
    }

    const CONNECTION_PATH: &str = "/org/freedesktop/NetworkManager/Settings/4";

    fn call<B>(path: &str, interface: &str, member: &str, body: &B) -> Message
    where
        B: serde::Serialize + zvariant::DynamicType,
    {
        Message::method_call(path, member)
            .unwrap()
            .interface(interface)
            .unwrap()
            .build(body)
            .unwrap()
    }

    fn agent_call<B>(member: &str, body: &B) -> Message
    where
        B: serde::Serialize + zvariant::DynamicType,
    {
        call(secret_agent::PATH, secret_agent::INTERFACE, member, body)
    }

    fn settings() -> SettingsMap {
        let mut settings = SettingsMap::new();
        crate::util::variant::set_setting(&mut settings, "connection", "id", "Home").unwrap();
        settings
    }

    fn path() -> ObjectPath<'static> {
        ObjectPath::try_from(CONNECTION_PATH).unwrap()
    }

    #[test]
    fn get_secrets_arguments_are_decoded() {
        let msg = agent_call(
            "GetSecrets",
            &(
                settings(),
                path(),
                "802-11-wireless-security",
                vec!["psk"],
                5u32,
            ),
        );
        let Ok(Some(AgentCall::GetSecrets(request))) = decode(&msg) else {
            panic!("GetSecrets not decoded");
        };
        assert_eq!(request.connection_path, CONNECTION_PATH);
        assert_eq!(request.setting_name, "802-11-wireless-security");
        assert_eq!(request.hints, vec!["psk".to_string()]);
        assert_eq!(request.flags, 5);
        assert_eq!(request.display_id(), "Home");
    }

    #[test]
    fn cancel_save_and_delete_are_decoded() {
        let msg = agent_call("CancelGetSecrets", &(path(), "802-11-wireless-security"));
        assert!(matches!(
            decode(&msg),
            Ok(Some(AgentCall::CancelGetSecrets { connection_path, setting_name }))
                if connection_path == CONNECTION_PATH && setting_name == "802-11-wireless-security"
        ));

        let msg = agent_call("SaveSecrets", &(settings(), path()));
        assert!(matches!(
            decode(&msg),
            Ok(Some(AgentCall::SaveSecrets { connection_path })) if connection_path == CONNECTION_PATH
        ));

        let msg = agent_call("DeleteSecrets", &(settings(), path()));
        assert!(matches!(
            decode(&msg),
            Ok(Some(AgentCall::DeleteSecrets { connection_path })) if connection_path == CONNECTION_PATH
        ));
    }

    #[test]
    fn malformed_arguments_are_invalid_args() {
        let msg = agent_call("GetSecrets", &("not a settings map",));
        assert!(matches!(decode(&msg), Err(zbus::fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn unknown_member_and_interface_are_rejected() {
        let msg = agent_call("Frobnicate", &());
        assert!(matches!(decode(&msg), Err(zbus::fdo::Error::UnknownMethod(m)) if m == "Frobnicate"));

        let msg = call(secret_agent::PATH, "org.example.Other", "GetSecrets", &());
        assert!(matches!(decode(&msg), Err(zbus::fdo::Error::UnknownInterface(_))));
    }

    #[test]
    fn traffic_for_other_objects_is_ignored() {
        let msg = call("/org/example/Elsewhere", secret_agent::INTERFACE, "GetSecrets", &());
        assert!(matches!(decode(&msg), Ok(None)));

        let signal = Message::signal(secret_agent::PATH, secret_agent::INTERFACE, "Changed")
            .unwrap()
            .build(&())
            .unwrap();
        assert!(matches!(decode(&signal), Ok(None)));
    }

    #[tokio::test]
    async fn failed_re_registration_keeps_following() {
        let registrar = FlakyRegistrar {
            fail_next: Mutex::new(true),
            ..Default::default()
        };
        let registration = AgentRegistration::new(registrar, "test.Agent");

        let owners = futures::stream::iter([true, false, true]);
        registration.follow(owners, CancellationToken::new()).await;

        assert_eq!(
            *registration.registrar.calls.lock().unwrap(),
            vec!["test.Agent", "test.Agent"]
        );
    }

    #[tokio::test]
    async fn cancelled_follow_stops() {
        let registration = AgentRegistration::new(FlakyRegistrar::default(), "test.Agent");
        let cancel = CancellationToken::new();
        cancel.cancel();
        registration
            .follow(futures::stream::pending::<bool>(), cancel)
            .await;
        assert!(registration.registrar.calls.lock().unwrap().is_empty());
    }
}
