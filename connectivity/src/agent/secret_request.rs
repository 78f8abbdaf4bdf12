//! One `GetSecrets` call and the key-management rules for answering it.

use crate::agent::prompt::PasswordKind;
use crate::types::constants::setting;
use crate::util::variant::{SettingsMap, set_setting, setting_str};

/// The settings field a password is written to, and what the prompt
/// should ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretField {
    pub key: &'static str,
    pub kind: PasswordKind,
}

/// Maps a `key-mgmt` value to the field that holds its password. Anything else has no password this agent can supply.
pub fn secret_field(key_mgmt: &str) -> Option<SecretField> {
    match key_mgmt {
        "wpa-psk" | "wpa-none" => Some(SecretField {
            key: setting::PSK,
            kind: PasswordKind::Wpa,
        }),
        "none" => Some(SecretField {
            key: setting::WEP_KEY0,
            kind: PasswordKind::Wep,
        }),
        _ => None,
    }
}

/// Arguments of a `GetSecrets` call.
#[derive(Debug, Clone)]
pub struct SecretRequest {
    pub connection: SettingsMap,
    pub connection_path: String,
    pub setting_name: String,
    pub hints: Vec<String>,
    pub flags: u32,
}

impl SecretRequest {
    /// `key-mgmt` of the setting NetworkManager asked secrets for.
    pub fn key_mgmt(&self) -> Option<String> {
        setting_str(&self.connection, &self.setting_name, setting::KEY_MGMT)
    }

    pub fn secret_field(&self) -> Option<SecretField> {
        self.key_mgmt().as_deref().and_then(secret_field)
    }

    /// `connection.id`, falling back to the object path.
    pub fn display_id(&self) -> String {
        setting_str(&self.connection, setting::CONNECTION, "id")
            .unwrap_or_else(|| self.connection_path.clone())
    }

    /// The connection's settings with `password` written into `field` of
    /// the requested setting.
    pub fn with_password(&self, field: SecretField, password: &str) -> zvariant::Result<SettingsMap> {
        let mut settings = SettingsMap::with_capacity(self.connection.len());
        for (name, section) in &self.connection {
            let mut copy = std::collections::HashMap::with_capacity(section.len());
            for (key, value) in section {
                copy.insert(key.clone(), value.try_clone()?);
            }
            settings.insert(name.clone(), copy);
        }
        set_setting(&mut settings, &self.setting_name, field.key, password)?;
        Ok(settings)
    }
}
