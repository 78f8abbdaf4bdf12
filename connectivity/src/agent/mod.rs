//! NetworkManager secret agent.
//!
//! [`SecretAgent`] is the request state machine and knows nothing about the
//! bus. [`SecretAgentService`] exports it at
//! `/org/freedesktop/NetworkManager/SecretAgent` and keeps it registered
//! with NetworkManager's agent manager. The user-facing prompt is supplied
//! by the caller through [`PasswordPrompt`].

pub mod prompt;
pub mod secret_agent;
pub mod secret_request;
pub mod service;

pub use prompt::{CONNECT_ACTION, PasswordKind, PasswordPrompt, PromptOutcome, PromptRequest};
pub use secret_agent::{AgentError, SecretAgent, SecretsReply};
pub use secret_request::{SecretField, SecretRequest, secret_field};
pub use service::{AgentRegistration, Registrar, SecretAgentService};
