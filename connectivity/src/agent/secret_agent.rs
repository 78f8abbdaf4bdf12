//! The secret agent's request state machine.
//!
//! The agent is either idle or holds exactly one pending request. A pending
//! request ends in one of three ways:
//! - the user connects and the reply carries the password;
//! - the prompt is dismissed and the reply is `NoSecrets`;
//! - NetworkManager cancels and no reply is sent at all.
//!
//! The reply travels over a oneshot channel, so it can be sent at most once.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::agent::prompt::{PasswordPrompt, PromptOutcome, PromptRequest};
use crate::agent::secret_request::{SecretField, SecretRequest};
use crate::core::counter::Counter;
use crate::types::constants::secret_agent::NO_PASSWORD_MESSAGE;
use crate::util::variant::SettingsMap;

/// Error replies sent to NetworkManager.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "org.freedesktop.NetworkManager.SecretAgent")]
pub enum AgentError {
    NoSecrets(String),
    Busy(String),
}

impl AgentError {
    pub(crate) fn no_password() -> Self {
        Self::NoSecrets(NO_PASSWORD_MESSAGE.to_owned())
    }
}

/// What a `GetSecrets` call is eventually answered with.
pub type SecretsReply = std::result::Result<SettingsMap, AgentError>;

struct Pending {
    id: u64,
    request: SecretRequest,
    field: SecretField,
    reply: oneshot::Sender<SecretsReply>,
    prompt_task: Option<AbortHandle>,
}

enum AgentState {
    Idle,
    Pending(Pending),
}

struct Inner {
    prompt: Arc<dyn PasswordPrompt>,
    ids: Counter,
    state: Mutex<AgentState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the pending request if it is still `id`.
    fn take(&self, id: u64) -> Option<Pending> {
        let mut state = self.state();
        match &*state {
            AgentState::Pending(pending) if pending.id == id => {
                match std::mem::replace(&mut *state, AgentState::Idle) {
                    AgentState::Pending(pending) => Some(pending),
                    AgentState::Idle => None,
                }
            }
            _ => None,
        }
    }
}

/// Answers NetworkManager's secret requests by asking the user.
#[derive(Clone)]
pub struct SecretAgent {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SecretAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretAgent")
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

impl SecretAgent {
    /// `ids` numbers the prompts this agent shows.
    pub fn new(prompt: Arc<dyn PasswordPrompt>, ids: Counter) -> Self {
        Self {
            inner: Arc::new(Inner {
                prompt,
                ids,
                state: Mutex::new(AgentState::Idle),
            }),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state(), AgentState::Pending(_))
    }

    /// Starts answering `request`.
    ///
    /// An `Err` is the immediate reply. Otherwise a prompt is shown and the
    /// returned receiver yields the reply once the user acts. If the request
    /// is cancelled first, the receiver closes without a value.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_secrets(
        &self,
        request: SecretRequest,
    ) -> std::result::Result<oneshot::Receiver<SecretsReply>, AgentError> {
        if request.flags == 0 {
            debug!("GetSecrets for {} without interaction", request.connection_path);
            return Err(AgentError::no_password());
        }

        let mut state = self.inner.state();
        if let AgentState::Pending(pending) = &*state {
            warn!(
                "Rejecting GetSecrets for {} while {} is pending",
                request.connection_path, pending.request.connection_path
            );
            return Err(AgentError::Busy(format!(
                "a request for {} is already pending",
                pending.request.connection_path
            )));
        }

        let Some(field) = request.secret_field() else {
            debug!(
                "No password kind for key management {:?}",
                request.key_mgmt()
            );
            return Err(AgentError::no_password());
        };

        let id = self.inner.ids.next();
        let prompt = PromptRequest::new(id, request.display_id(), field.kind);
        info!("Asking for the {} password of {}", field.kind, prompt.connection_id);

        let (reply, receiver) = oneshot::channel();
        let agent = self.clone();
        let task = tokio::spawn(async move {
            let outcome = agent.inner.prompt.show(prompt).await;
            agent.complete(id, outcome).await;
        });

        *state = AgentState::Pending(Pending {
            id,
            request,
            field,
            reply,
            prompt_task: Some(task.abort_handle()),
        });
        Ok(receiver)
    }

    async fn complete(&self, id: u64, outcome: PromptOutcome) {
        let Some(pending) = self.inner.take(id) else {
            debug!("Prompt {id} resolved after its request ended");
            return;
        };

        let reply = match outcome.into_password() {
            Some(password) => pending
                .request
                .with_password(pending.field, &password)
                .map_err(|e| {
                    warn!("Could not write password into settings: {e}");
                    AgentError::no_password()
                }),
            None => {
                debug!("Prompt {id} dismissed");
                Err(AgentError::no_password())
            }
        };
        if pending.reply.send(reply).is_err() {
            debug!("Reply for prompt {id} had no receiver");
        }
        self.inner.prompt.close(id).await;
    }

    /// Drops the pending request without replying.
    pub async fn cancel_get_secrets(&self, connection_path: &str, setting_name: &str) {
        let pending = {
            let mut state = self.inner.state();
            match std::mem::replace(&mut *state, AgentState::Idle) {
                AgentState::Pending(pending) => pending,
                AgentState::Idle => {
                    debug!("CancelGetSecrets for {connection_path} with nothing pending");
                    return;
                }
            }
        };
        if pending.request.connection_path != connection_path
            || pending.request.setting_name != setting_name
        {
            debug!(
                "CancelGetSecrets for {connection_path}/{setting_name} drops request for {}",
                pending.request.connection_path
            );
        }
        info!("Secret request {} cancelled", pending.id);
        if let Some(task) = &pending.prompt_task {
            task.abort();
        }
        self.inner.prompt.close(pending.id).await;
    }

    /// Secrets are never stored by this agent.
    pub fn save_secrets(&self, connection_path: &str) {
        debug!("SaveSecrets for {connection_path} ignored");
    }

    pub fn delete_secrets(&self, connection_path: &str) {
        debug!("DeleteSecrets for {connection_path} ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::constants::setting;
    use crate::util::variant::{set_setting, setting_str};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct FakePrompt {
        outcomes: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<PromptOutcome>>>,
        shown: Mutex<Vec<PromptRequest>>,
        closed: Mutex<Vec<u64>>,
    }

    impl FakePrompt {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<PromptOutcome>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let prompt = Self {
                outcomes: tokio::sync::Mutex::new(Some(rx)),
                ..Default::default()
            };
            (Arc::new(prompt), tx)
        }
    }

    #[async_trait]
    impl PasswordPrompt for FakePrompt {
        async fn show(&self, request: PromptRequest) -> PromptOutcome {
            self.shown.lock().unwrap().push(request);
            let mut outcomes = self.outcomes.lock().await;
            match outcomes.as_mut() {
                Some(rx) => rx.recv().await.unwrap_or(PromptOutcome::Dismissed),
                None => PromptOutcome::Dismissed,
            }
        }

        async fn close(&self, request_id: u64) {
            self.closed.lock().unwrap().push(request_id);
        }
    }

    fn request(path: &str, key_mgmt: &str, flags: u32) -> SecretRequest {
        let mut connection = SettingsMap::new();
        set_setting(&mut connection, setting::CONNECTION, "id", "Home").unwrap();
        set_setting(
            &mut connection,
            setting::WIRELESS_SECURITY,
            setting::KEY_MGMT,
            key_mgmt,
        )
        .unwrap();
        SecretRequest {
            connection,
            connection_path: path.into(),
            setting_name: setting::WIRELESS_SECURITY.into(),
            hints: Vec::new(),
            flags,
        }
    }

    fn agent() -> (SecretAgent, Arc<FakePrompt>, mpsc::UnboundedSender<PromptOutcome>) {
        let (prompt, outcomes) = FakePrompt::new();
        let agent = SecretAgent::new(prompt.clone(), Counter::starting_at(1));
        (agent, prompt, outcomes)
    }

    #[tokio::test]
    async fn unsupported_key_management_fails_without_prompting() {
        let (agent, prompt, _outcomes) = agent();
        let result = agent.get_secrets(request("/s/1", "wpa-eap", 5));
        assert!(matches!(result, Err(AgentError::NoSecrets(_))));
        assert!(!agent.is_pending());
        assert!(prompt.shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wep_request_fills_first_key() {
        let (agent, prompt, outcomes) = agent();
        let reply = agent.get_secrets(request("/s/1", "none", 1)).unwrap();
        outcomes.send(PromptOutcome::connect("abcde")).unwrap();

        let settings = reply.await.unwrap().unwrap();
        assert_eq!(
            setting_str(&settings, setting::WIRELESS_SECURITY, setting::WEP_KEY0).as_deref(),
            Some("abcde")
        );
        assert_eq!(prompt.shown.lock().unwrap()[0].kind, crate::agent::PasswordKind::Wep);
        assert!(!agent.is_pending());
    }

    #[tokio::test]
    async fn dismissed_prompt_replies_no_secrets() {
        let (agent, prompt, outcomes) = agent();
        let reply = agent.get_secrets(request("/s/1", "wpa-psk", 1)).unwrap();
        outcomes.send(PromptOutcome::Dismissed).unwrap();

        match reply.await.unwrap() {
            Err(AgentError::NoSecrets(message)) => assert_eq!(message, NO_PASSWORD_MESSAGE),
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(!agent.is_pending());
        assert_eq!(*prompt.closed.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn connect_without_a_password_replies_no_secrets() {
        let (agent, prompt, outcomes) = agent();
        let reply = agent.get_secrets(request("/s/1", "wpa-psk", 1)).unwrap();
        outcomes.send(PromptOutcome::connect("")).unwrap();

        assert!(matches!(reply.await.unwrap(), Err(AgentError::NoSecrets(_))));
        assert!(!agent.is_pending());
        assert_eq!(*prompt.closed.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn second_request_is_busy() {
        let (agent, _prompt, outcomes) = agent();
        let first = agent.get_secrets(request("/s/1", "wpa-psk", 1)).unwrap();

        let second = agent.get_secrets(request("/s/2", "wpa-psk", 1));
        assert!(matches!(second, Err(AgentError::Busy(_))));
        assert!(agent.is_pending());

        outcomes.send(PromptOutcome::connect("hunter2")).unwrap();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_sends_no_reply() {
        let (agent, prompt, _outcomes) = agent();
        let reply = agent.get_secrets(request("/s/1", "wpa-psk", 1)).unwrap();

        agent
            .cancel_get_secrets("/s/1", setting::WIRELESS_SECURITY)
            .await;

        assert!(!agent.is_pending());
        assert!(reply.await.is_err());
        assert_eq!(*prompt.closed.lock().unwrap(), vec![1]);

        // The agent takes new requests afterwards, with a fresh prompt id.
        let _next = agent.get_secrets(request("/s/1", "wpa-psk", 1)).unwrap();
        assert!(agent.is_pending());
        tokio::task::yield_now().await;
        assert_eq!(prompt.shown.lock().unwrap().last().map(|r| r.id), Some(2));
    }

    #[tokio::test]
    async fn cancel_while_idle_is_harmless() {
        let (agent, prompt, _outcomes) = agent();
        agent.cancel_get_secrets("/s/1", setting::WIRELESS_SECURITY).await;
        assert!(!agent.is_pending());
        assert!(prompt.closed.lock().unwrap().is_empty());
    }
}
