use async_trait::async_trait;
use connectivity::agent::{
    AgentError, AgentRegistration, PasswordKind, PasswordPrompt, PromptOutcome, PromptRequest,
    Registrar, SecretAgent, SecretRequest,
};
use connectivity::{Counter, SettingsMap};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zvariant::{OwnedValue, Value};

/// Answers every prompt with whatever the test sends next.
struct ScriptedPrompt {
    outcomes: tokio::sync::Mutex<mpsc::UnboundedReceiver<PromptOutcome>>,
    shown: Mutex<Vec<PromptRequest>>,
}

#[async_trait]
impl PasswordPrompt for ScriptedPrompt {
    async fn show(&self, request: PromptRequest) -> PromptOutcome {
        self.shown.lock().unwrap().push(request);
        self.outcomes
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(PromptOutcome::Dismissed)
    }

    async fn close(&self, _request_id: u64) {}
}

fn scripted() -> (Arc<ScriptedPrompt>, mpsc::UnboundedSender<PromptOutcome>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let prompt = ScriptedPrompt {
        outcomes: tokio::sync::Mutex::new(rx),
        shown: Mutex::new(Vec::new()),
    };
    (Arc::new(prompt), tx)
}

fn value(s: &str) -> OwnedValue {
    OwnedValue::try_from(Value::from(s)).unwrap()
}

fn wifi_connection(key_mgmt: &str) -> SettingsMap {
    let mut connection = HashMap::new();
    connection.insert("id".to_string(), value("Home"));
    connection.insert("type".to_string(), value("802-11-wireless"));
    let mut security = HashMap::new();
    security.insert("key-mgmt".to_string(), value(key_mgmt));

    let mut settings = SettingsMap::new();
    settings.insert("connection".to_string(), connection);
    settings.insert("802-11-wireless-security".to_string(), security);
    settings
}

fn request(key_mgmt: &str, flags: u32) -> SecretRequest {
    SecretRequest {
        connection: wifi_connection(key_mgmt),
        connection_path: "/org/freedesktop/NetworkManager/Settings/7".into(),
        setting_name: "802-11-wireless-security".into(),
        hints: Vec::new(),
        flags,
    }
}

fn string_setting<'a>(settings: &'a SettingsMap, section: &str, key: &str) -> Option<&'a str> {
    match &**settings.get(section)?.get(key)? {
        Value::Str(s) => Some(s.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn no_interaction_fails_immediately() {
    let (prompt, _outcomes) = scripted();
    let agent = SecretAgent::new(prompt.clone(), Counter::starting_at(1));

    match agent.get_secrets(request("wpa-psk", 0)) {
        Err(AgentError::NoSecrets(message)) => {
            assert_eq!(message, "No password found for this connection.")
        }
        other => panic!("expected NoSecrets, got {:?}", other.map(|_| ())),
    }
    assert!(!agent.is_pending());
    assert!(prompt.shown.lock().unwrap().is_empty());
}

#[tokio::test]
async fn connect_returns_settings_with_psk() {
    let (prompt, outcomes) = scripted();
    let agent = SecretAgent::new(prompt.clone(), Counter::starting_at(1));

    let reply = agent.get_secrets(request("wpa-psk", 5)).unwrap();
    assert!(agent.is_pending());
    outcomes.send(PromptOutcome::connect("hunter2")).unwrap();

    let settings = reply.await.unwrap().unwrap();
    assert_eq!(
        string_setting(&settings, "802-11-wireless-security", "psk"),
        Some("hunter2")
    );
    assert_eq!(
        string_setting(&settings, "802-11-wireless-security", "key-mgmt"),
        Some("wpa-psk")
    );
    assert_eq!(string_setting(&settings, "connection", "id"), Some("Home"));
    assert!(!agent.is_pending());

    let shown = prompt.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].id, 1);
    assert_eq!(shown[0].title, "Connect to “Home”");
    assert_eq!(shown[0].kind, PasswordKind::Wpa);
}

#[derive(Default)]
struct CountingRegistrar {
    registered: Mutex<Vec<String>>,
}

#[async_trait]
impl Registrar for CountingRegistrar {
    async fn register(&self, identifier: &str) -> connectivity::Result<()> {
        self.registered.lock().unwrap().push(identifier.to_owned());
        Ok(())
    }

    async fn unregister(&self) -> connectivity::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn agent_manager_restart_registers_once_more() {
    let registration = Arc::new(AgentRegistration::new(
        CountingRegistrar::default(),
        "org.connectivity.SecretAgent",
    ));
    registration.register().await.unwrap();

    // NetworkManager goes away, then comes back under a new owner.
    let (owners_tx, owners_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let follower = registration.clone();
    let follow_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        follower
            .follow(owner_stream(owners_rx), follow_cancel)
            .await
    });

    owners_tx.send(false).unwrap();
    owners_tx.send(true).unwrap();
    drop(owners_tx);
    task.await.unwrap();

    // Startup registration plus exactly one for the restart.
    let registered = registration.registrar().registered.lock().unwrap();
    assert_eq!(registered.len(), 2);
    assert!(registered.iter().all(|id| id == "org.connectivity.SecretAgent"));
}

fn owner_stream(mut rx: mpsc::UnboundedReceiver<bool>) -> impl futures::Stream<Item = bool> {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}
