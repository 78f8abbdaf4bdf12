//! The password prompt the secret agent drives.

use async_trait::async_trait;
use std::fmt;

/// Action key a prompt reports when the user chose to connect.
pub const CONNECT_ACTION: &str = "connect";

/// Which kind of password the prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PasswordKind {
    Wpa,
    Wep,
}

impl fmt::Display for PasswordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wpa => write!(f, "WPA"),
            Self::Wep => write!(f, "WEP"),
        }
    }
}

/// What a prompt is shown with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub id: u64,
    /// Display id of the connection asking for secrets.
    pub connection_id: String,
    pub title: String,
    pub kind: PasswordKind,
}

impl PromptRequest {
    pub fn new(id: u64, connection_id: impl Into<String>, kind: PasswordKind) -> Self {
        let connection_id = connection_id.into();
        Self {
            id,
            title: format!("Connect to “{connection_id}”"),
            connection_id,
            kind,
        }
    }
}

/// How a prompt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The user picked the action named `key`. `password` holds whatever
    /// was typed.
    Action { key: String, password: String },
    /// Closed without an action.
    Dismissed,
}

impl PromptOutcome {
    pub fn connect(password: impl Into<String>) -> Self {
        Self::Action {
            key: CONNECT_ACTION.to_owned(),
            password: password.into(),
        }
    }

    /// The password, if the user asked to connect and typed one.
    pub fn into_password(self) -> Option<String> {
        match self {
            Self::Action { key, password } if key == CONNECT_ACTION && !password.is_empty() => {
                Some(password)
            }
            _ => None,
        }
    }
}

/// Shows password prompts on behalf of the secret agent.
///
/// `show` resolves once the user acts on the prompt. `close` withdraws a
/// prompt that is still on screen; it is also called after `show` resolved,
/// so it must tolerate ids it no longer knows.
#[async_trait]
pub trait PasswordPrompt: Send + Sync {
    async fn show(&self, request: PromptRequest) -> PromptOutcome;

    async fn close(&self, request_id: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_quotes_the_connection() {
        let request = PromptRequest::new(3, "Home", PasswordKind::Wpa);
        assert_eq!(request.title, "Connect to “Home”");
        assert_eq!(request.connection_id, "Home");
    }

    #[test]
    fn only_connect_yields_a_password() {
        assert_eq!(
            PromptOutcome::connect("hunter2").into_password().as_deref(),
            Some("hunter2")
        );
        let other = PromptOutcome::Action {
            key: "cancel".into(),
            password: "hunter2".into(),
        };
        assert_eq!(other.into_password(), None);
        assert_eq!(PromptOutcome::connect("").into_password(), None);
        assert_eq!(PromptOutcome::Dismissed.into_password(), None);
    }
}
