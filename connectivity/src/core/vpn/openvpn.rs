//! OpenVPN connection properties.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the client authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenVpnConnectionType {
    /// Certificates only.
    #[default]
    Tls,
    Password,
    /// Certificates plus username and password.
    PasswordTls,
    StaticKey,
}

impl OpenVpnConnectionType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Tls => "tls",
            Self::Password => "password",
            Self::PasswordTls => "password-tls",
            Self::StaticKey => "static-key",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "password" => Self::Password,
            "password-tls" => Self::PasswordTls,
            "static-key" => Self::StaticKey,
            _ => Self::Tls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyDirection {
    Zero,
    One,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Tun,
    Tap,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenVpnSettings {
    pub connection_type: OpenVpnConnectionType,
    pub remote: String,
    pub port: Option<u16>,

    pub ca: String,
    pub cert: String,
    pub key: String,
    /// Secret; never part of `vpn.data`.
    pub cert_pass: String,
    pub username: String,
    /// Secret; never part of `vpn.data`.
    pub password: String,

    pub static_key: String,
    pub static_key_direction: Option<KeyDirection>,
    pub local_ip: String,
    pub remote_ip: String,

    pub proto_tcp: bool,
    pub comp_lzo: bool,
    pub dev_type: Option<DeviceType>,
    pub cipher: Option<String>,
    pub tunnel_mtu: Option<u32>,
}

impl OpenVpnSettings {
    /// Parses `vpn.data` and `vpn.secrets`.
    pub fn from_maps(data: &HashMap<String, String>, secrets: &HashMap<String, String>) -> Self {
        let text = |key: &str| data.get(key).cloned().unwrap_or_default();
        let yes = |key: &str| data.get(key).is_some_and(|v| v == "yes");

        Self {
            connection_type: data
                .get("connection-type")
                .map(|t| OpenVpnConnectionType::parse(t))
                .unwrap_or_default(),
            remote: text("remote"),
            port: data.get("port").and_then(|p| p.parse().ok()),
            ca: text("ca"),
            cert: text("cert"),
            key: text("key"),
            cert_pass: secrets.get("cert-pass").cloned().unwrap_or_default(),
            username: text("username"),
            password: secrets.get("password").cloned().unwrap_or_default(),
            static_key: text("static-key"),
            static_key_direction: match data.get("static-key-direction").map(String::as_str) {
                Some("0") => Some(KeyDirection::Zero),
                Some("1") => Some(KeyDirection::One),
                _ => None,
            },
            local_ip: text("local-ip"),
            remote_ip: text("remote-ip"),
            proto_tcp: yes("proto-tcp"),
            comp_lzo: yes("comp-lzo"),
            dev_type: match data.get("dev-type").map(String::as_str) {
                Some("tun") => Some(DeviceType::Tun),
                Some("tap") => Some(DeviceType::Tap),
                _ => None,
            },
            cipher: data.get("cipher").cloned(),
            tunnel_mtu: data.get("tunnel-mtu").and_then(|m| m.parse().ok()),
        }
    }

    /// Builds `vpn.data`. Only the keys relevant to the connection type are
    /// written.
    pub fn to_data(&self) -> HashMap<String, String> {
        let mut data = HashMap::new();
        let mut put = |key: &str, value: &str| {
            data.insert(key.to_owned(), value.to_owned());
        };

        put("connection-type", self.connection_type.as_str());
        put("remote", &self.remote);
        match self.connection_type {
            OpenVpnConnectionType::Tls => {
                put("ca", &self.ca);
                put("cert", &self.cert);
                put("cert-pass-flags", "1");
                put("key", &self.key);
            }
            OpenVpnConnectionType::Password => {
                put("ca", &self.ca);
                put("username", &self.username);
                put("password-flags", "1");
            }
            OpenVpnConnectionType::PasswordTls => {
                put("ca", &self.ca);
                put("cert", &self.cert);
                put("cert-pass-flags", "1");
                put("key", &self.key);
                put("username", &self.username);
                put("password-flags", "1");
            }
            OpenVpnConnectionType::StaticKey => {
                put("ca", &self.ca);
                put("local-ip", &self.local_ip);
                put("remote-ip", &self.remote_ip);
                put("static-key", &self.static_key);
                match self.static_key_direction {
                    Some(KeyDirection::Zero) => put("static-key-direction", "0"),
                    Some(KeyDirection::One) => put("static-key-direction", "1"),
                    None => {}
                }
            }
        }

        if let Some(port) = self.port {
            put("port", &port.to_string());
        }
        if self.comp_lzo {
            put("comp-lzo", "yes");
        }
        if self.proto_tcp {
            put("proto-tcp", "yes");
        }
        match self.dev_type {
            Some(DeviceType::Tun) => put("dev-type", "tun"),
            Some(DeviceType::Tap) => put("dev-type", "tap"),
            None => {}
        }
        if let Some(cipher) = &self.cipher {
            put("cipher", cipher);
        }
        if let Some(mtu) = self.tunnel_mtu {
            put("tunnel-mtu", &mtu.to_string());
        }
        data
    }

    /// Builds `vpn.secrets` for the connection type.
    pub fn to_secrets(&self) -> HashMap<String, String> {
        let mut secrets = HashMap::new();
        match self.connection_type {
            OpenVpnConnectionType::Tls => {
                secrets.insert("cert-pass".into(), self.cert_pass.clone());
            }
            OpenVpnConnectionType::Password => {
                secrets.insert("password".into(), self.password.clone());
            }
            OpenVpnConnectionType::PasswordTls => {
                secrets.insert("cert-pass".into(), self.cert_pass.clone());
                secrets.insert("password".into(), self.password.clone());
            }
            OpenVpnConnectionType::StaticKey => {}
        }
        secrets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_password_tls_connection() {
        let data: HashMap<String, String> = [
            ("connection-type", "password-tls"),
            ("remote", "vpn.example.com"),
            ("port", "1194"),
            ("ca", "/etc/ca.pem"),
            ("username", "alice"),
            ("proto-tcp", "yes"),
            ("dev-type", "tap"),
            ("tunnel-mtu", "1400"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let secrets: HashMap<String, String> =
            [("password".to_string(), "pw".to_string())].into();

        let vpn = OpenVpnSettings::from_maps(&data, &secrets);
        assert_eq!(vpn.connection_type, OpenVpnConnectionType::PasswordTls);
        assert_eq!(vpn.port, Some(1194));
        assert_eq!(vpn.username, "alice");
        assert_eq!(vpn.password, "pw");
        assert!(vpn.proto_tcp);
        assert!(!vpn.comp_lzo);
        assert_eq!(vpn.dev_type, Some(DeviceType::Tap));
        assert_eq!(vpn.tunnel_mtu, Some(1400));
    }

    #[test]
    fn unknown_connection_type_defaults_to_tls() {
        let data: HashMap<String, String> =
            [("connection-type".to_string(), "bogus".to_string())].into();
        let vpn = OpenVpnSettings::from_maps(&data, &HashMap::new());
        assert_eq!(vpn.connection_type, OpenVpnConnectionType::Tls);
    }

    #[test]
    fn static_key_writes_only_its_keys() {
        let vpn = OpenVpnSettings {
            connection_type: OpenVpnConnectionType::StaticKey,
            remote: "gw".into(),
            static_key: "/etc/static.key".into(),
            static_key_direction: Some(KeyDirection::One),
            local_ip: "10.8.0.2".into(),
            remote_ip: "10.8.0.1".into(),
            username: "ignored".into(),
            ..Default::default()
        };
        let data = vpn.to_data();
        assert_eq!(data.get("static-key-direction").map(String::as_str), Some("1"));
        assert!(!data.contains_key("username"));
        assert!(vpn.to_secrets().is_empty());
    }

    #[test]
    fn tls_secrets_carry_cert_pass() {
        let vpn = OpenVpnSettings {
            cert_pass: "unlock".into(),
            ..Default::default()
        };
        assert_eq!(
            vpn.to_secrets().get("cert-pass").map(String::as_str),
            Some("unlock")
        );
        assert!(!vpn.to_data().contains_key("cert-pass"));
    }
}
