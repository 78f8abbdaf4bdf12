//! PPTP connection properties.
//!
//! NetworkManager's PPTP plugin stores everything as `vpn.data` strings.
//! Several options are "anti-bools": the key is present with `yes` when the
//! feature is turned *off*.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// MPPE encryption strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MppeType {
    #[default]
    All,
    Mppe128,
    Mppe40,
}

impl MppeType {
    fn key(self) -> &'static str {
        match self {
            Self::All => "require-mppe",
            Self::Mppe128 => "require-mppe-128",
            Self::Mppe40 => "require-mppe-40",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PptpSettings {
    pub gateway: String,
    pub user: String,
    /// Secret; never part of `vpn.data`.
    pub password: String,
    pub domain: String,

    pub allow_pap: bool,
    pub allow_chap: bool,
    pub allow_mschap: bool,
    pub allow_mschapv2: bool,
    pub allow_eap: bool,
    pub require_mppe: bool,
    pub mppe_type: MppeType,
    pub mppe_stateful: bool,
    pub bsd_compression: bool,
    pub deflate_compression: bool,
    pub tcp_header_compression: bool,
    /// Sends LCP echo requests (interval 30 s, 5 failures).
    pub send_ppp_echo_packets: bool,
}

impl Default for PptpSettings {
    fn default() -> Self {
        Self {
            gateway: String::new(),
            user: String::new(),
            password: String::new(),
            domain: String::new(),
            allow_pap: true,
            allow_chap: true,
            allow_mschap: true,
            allow_mschapv2: true,
            allow_eap: true,
            require_mppe: false,
            mppe_type: MppeType::All,
            mppe_stateful: false,
            bsd_compression: true,
            deflate_compression: true,
            tcp_header_compression: true,
            send_ppp_echo_packets: false,
        }
    }
}

fn yes(data: &HashMap<String, String>, key: &str) -> bool {
    data.get(key).is_some_and(|v| v == "yes")
}

impl PptpSettings {
    /// Parses `vpn.data` and `vpn.secrets`.
    pub fn from_maps(data: &HashMap<String, String>, secrets: &HashMap<String, String>) -> Self {
        let text = |key: &str| data.get(key).cloned().unwrap_or_default();

        let mppe_type = [MppeType::All, MppeType::Mppe128, MppeType::Mppe40]
            .into_iter()
            .find(|t| yes(data, t.key()));

        Self {
            gateway: text("gateway"),
            user: text("user"),
            password: secrets.get("password").cloned().unwrap_or_default(),
            domain: text("domain"),
            allow_pap: !yes(data, "refuse-pap"),
            allow_chap: !yes(data, "refuse-chap"),
            allow_mschap: !yes(data, "refuse-mschap"),
            allow_mschapv2: !yes(data, "refuse-mschapv2"),
            allow_eap: !yes(data, "refuse-eap"),
            require_mppe: mppe_type.is_some(),
            mppe_type: mppe_type.unwrap_or_default(),
            mppe_stateful: yes(data, "mppe-stateful"),
            bsd_compression: !yes(data, "nobsdcomp"),
            deflate_compression: !yes(data, "nodeflate"),
            tcp_header_compression: !yes(data, "no-vj-comp"),
            send_ppp_echo_packets: data.contains_key("lcp-echo-interval")
                || data.contains_key("lcp-echo-failure"),
        }
    }

    /// Builds `vpn.data`.
    pub fn to_data(&self) -> HashMap<String, String> {
        let mut data = HashMap::new();
        let mut flag = |key: &str, on: bool| {
            if on {
                data.insert(key.to_owned(), "yes".to_owned());
            }
        };

        // PAP, CHAP and EAP cannot carry MPPE, so they are only refused
        // explicitly when MPPE is not required.
        flag("refuse-pap", !self.require_mppe && !self.allow_pap);
        flag("refuse-chap", !self.require_mppe && !self.allow_chap);
        flag("refuse-mschap", !self.allow_mschap);
        flag("refuse-mschapv2", !self.allow_mschapv2);
        flag("refuse-eap", !self.require_mppe && !self.allow_eap);

        let mppe = self.require_mppe && (self.allow_mschap || self.allow_mschapv2);
        flag(self.mppe_type.key(), mppe);
        flag("mppe-stateful", mppe && self.mppe_stateful);

        flag("nobsdcomp", !self.bsd_compression);
        flag("nodeflate", !self.deflate_compression);
        flag("no-vj-comp", !self.tcp_header_compression);

        data.insert("gateway".into(), self.gateway.clone());
        data.insert("user".into(), self.user.clone());
        if !self.domain.is_empty() {
            data.insert("domain".into(), self.domain.clone());
        }
        // Agent-owned secret.
        data.insert("password-flags".into(), "1".into());
        if self.send_ppp_echo_packets {
            data.insert("lcp-echo-interval".into(), "30".into());
            data.insert("lcp-echo-failure".into(), "5".into());
        }
        data
    }

    /// Builds `vpn.secrets`.
    pub fn to_secrets(&self) -> HashMap<String, String> {
        let mut secrets = HashMap::new();
        if !self.password.is_empty() {
            secrets.insert("password".into(), self.password.clone());
        }
        secrets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn anti_bools_are_inverted() {
        let data = map(&[
            ("gateway", "vpn.example.com"),
            ("refuse-eap", "yes"),
            ("nodeflate", "yes"),
            ("lcp-echo-interval", "30"),
        ]);
        let pptp = PptpSettings::from_maps(&data, &HashMap::new());
        assert_eq!(pptp.gateway, "vpn.example.com");
        assert!(!pptp.allow_eap);
        assert!(pptp.allow_pap);
        assert!(!pptp.deflate_compression);
        assert!(pptp.bsd_compression);
        assert!(pptp.send_ppp_echo_packets);
        assert!(!pptp.require_mppe);
    }

    #[test]
    fn mppe_variant_is_detected() {
        let data = map(&[("require-mppe-128", "yes"), ("mppe-stateful", "yes")]);
        let pptp = PptpSettings::from_maps(&data, &HashMap::new());
        assert!(pptp.require_mppe);
        assert_eq!(pptp.mppe_type, MppeType::Mppe128);
        assert!(pptp.mppe_stateful);

        let data = pptp.to_data();
        assert_eq!(data.get("require-mppe-128").map(String::as_str), Some("yes"));
        assert!(!data.contains_key("require-mppe"));
    }

    #[test]
    fn mppe_suppresses_pap_chap_eap_refusals() {
        let pptp = PptpSettings {
            require_mppe: true,
            allow_pap: false,
            allow_chap: false,
            allow_eap: false,
            ..Default::default()
        };
        let data = pptp.to_data();
        assert!(!data.contains_key("refuse-pap"));
        assert!(!data.contains_key("refuse-chap"));
        assert!(!data.contains_key("refuse-eap"));
        assert_eq!(data.get("require-mppe").map(String::as_str), Some("yes"));
    }

    #[test]
    fn password_lives_in_secrets() {
        let pptp = PptpSettings {
            password: "s3cret".into(),
            domain: "CORP".into(),
            send_ppp_echo_packets: true,
            ..Default::default()
        };
        let data = pptp.to_data();
        assert!(!data.contains_key("password"));
        assert_eq!(data.get("password-flags").map(String::as_str), Some("1"));
        assert_eq!(data.get("domain").map(String::as_str), Some("CORP"));
        assert_eq!(data.get("lcp-echo-failure").map(String::as_str), Some("5"));
        assert_eq!(
            pptp.to_secrets().get("password").map(String::as_str),
            Some("s3cret")
        );

        let reparsed = PptpSettings::from_maps(&data, &pptp.to_secrets());
        assert_eq!(reparsed, pptp);
    }
}
