//! Password prompt shown as a desktop notification.
//!
//! The notification carries a "connect" action and an inline reply field.
//! Servers that support inline replies report the typed text through
//! `NotificationReplied`; the prompt resolves as soon as the user either
//! replies, picks an action or closes the notification.

use async_trait::async_trait;
use connectivity::agent::{CONNECT_ACTION, PasswordPrompt, PromptOutcome, PromptRequest};
use futures::StreamExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use zbus::{Connection, proxy};
use zvariant::Value;

const APP_NAME: &str = "connectivity-service";
const ICON: &str = "network-wireless";
const INLINE_REPLY: &str = "inline-reply";

#[proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, &Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;

    fn close_notification(&self, id: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    fn action_invoked(&self, id: u32, action_key: String) -> zbus::Result<()>;

    #[zbus(signal)]
    fn notification_closed(&self, id: u32, reason: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    fn notification_replied(&self, id: u32, text: String) -> zbus::Result<()>;
}

/// Asks for Wi-Fi passwords through `org.freedesktop.Notifications`.
pub struct NotificationPrompt {
    notifications: NotificationsProxy<'static>,
    /// Prompt id to notification id.
    shown: Mutex<HashMap<u64, u32>>,
}

impl NotificationPrompt {
    pub async fn new(conn: &Connection) -> zbus::Result<Self> {
        Ok(Self {
            notifications: NotificationsProxy::new(conn).await?,
            shown: Mutex::new(HashMap::new()),
        })
    }

    fn remember(&self, request_id: u64, notification: u32) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.insert(request_id, notification);
        }
    }

    fn forget(&self, request_id: u64) -> Option<u32> {
        self.shown.lock().ok()?.remove(&request_id)
    }

    async fn run(&self, request: &PromptRequest) -> zbus::Result<PromptOutcome> {
        // Subscribe to signals FIRST to avoid race condition
        let mut actions = self.notifications.receive_action_invoked().await?;
        let mut replies = self.notifications.receive_notification_replied().await?;
        let mut closed = self.notifications.receive_notification_closed().await?;

        let placeholder = Value::from("Password");
        let mut hints = HashMap::new();
        hints.insert("x-kde-reply-placeholder-text", &placeholder);

        let body = format!("Enter the {} password", request.kind);
        let id = self
            .notifications
            .notify(
                APP_NAME,
                0,
                ICON,
                &request.title,
                &body,
                &[CONNECT_ACTION, "Connect", INLINE_REPLY, "Password"],
                hints,
                0,
            )
            .await?;
        self.remember(request.id, id);
        debug!("Prompt {} shown as notification {id}", request.id);

        loop {
            tokio::select! {
                signal = replies.next() => match signal {
                    Some(signal) => {
                        let args = signal.args()?;
                        if args.id == id {
                            return Ok(PromptOutcome::connect(args.text));
                        }
                    }
                    None => break,
                },
                signal = actions.next() => match signal {
                    Some(signal) => {
                        let args = signal.args()?;
                        if args.id == id {
                            return Ok(PromptOutcome::Action {
                                key: args.action_key,
                                password: String::new(),
                            });
                        }
                    }
                    None => break,
                },
                signal = closed.next() => match signal {
                    Some(signal) => {
                        if signal.args()?.id == id {
                            return Ok(PromptOutcome::Dismissed);
                        }
                    }
                    None => break,
                },
            }
        }
        Ok(PromptOutcome::Dismissed)
    }
}

#[async_trait]
impl PasswordPrompt for NotificationPrompt {
    async fn show(&self, request: PromptRequest) -> PromptOutcome {
        self.run(&request).await.unwrap_or_else(|e| {
            warn!("Password prompt failed: {e}");
            PromptOutcome::Dismissed
        })
    }

    async fn close(&self, request_id: u64) {
        let Some(id) = self.forget(request_id) else {
            return;
        };
        if let Err(e) = self.notifications.close_notification(id).await {
            debug!("Notification {id} already gone: {e}");
        }
    }
}
